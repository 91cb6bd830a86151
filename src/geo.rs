//! Flags rows whose coordinates are missing, out of range, or implausibly far
//! from the previous valid point.

use std::{fmt, io::Write};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{coerce, error::Result, rows::RowSet, stats::round_to};

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const DEFAULT_THRESHOLD_KM: f64 = 25.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeoReason {
    MissingOrNonNumeric,
    OutOfRange,
    DistanceThresholdExceeded,
}

impl GeoReason {
    pub fn as_str(self) -> &'static str {
        match self {
            GeoReason::MissingOrNonNumeric => "missing_or_non_numeric",
            GeoReason::OutOfRange => "out_of_range",
            GeoReason::DistanceThresholdExceeded => "distance_threshold_exceeded",
        }
    }
}

impl fmt::Display for GeoReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoFlag {
    pub row: usize,
    pub is_suspect: bool,
    pub reasons: Vec<GeoReason>,
    /// Distance from the previous valid point, rounded to metres.
    pub distance_km: Option<f64>,
}

impl GeoFlag {
    pub fn suspect_reason(&self) -> String {
        self.reasons.iter().map(|r| r.as_str()).join("|")
    }
}

pub fn validate_lat_lon(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// One flag per row, in row order. A jump of at least `threshold_km` from the
/// previous valid point is suspect; invalid rows do not move that point.
pub fn flag_geo_suspects(
    rows: &RowSet,
    lat_column: &str,
    lon_column: &str,
    threshold_km: f64,
) -> Result<Vec<GeoFlag>> {
    let lat_idx = rows.require_column(lat_column)?;
    let lon_idx = rows.require_column(lon_column)?;

    let mut previous: Option<(f64, f64)> = None;
    let flags = (0..rows.len())
        .map(|row| {
            let lat = coerce::to_number(rows.cell(row, lat_idx));
            let lon = coerce::to_number(rows.cell(row, lon_idx));
            let mut reasons = Vec::new();
            let mut distance_km = None;
            match (lat, lon) {
                (Some(lat), Some(lon)) if validate_lat_lon(lat, lon) => {
                    if let Some((prev_lat, prev_lon)) = previous {
                        let distance = haversine_km(prev_lat, prev_lon, lat, lon);
                        if distance >= threshold_km {
                            reasons.push(GeoReason::DistanceThresholdExceeded);
                        }
                        distance_km = Some(round_to(distance, 3));
                    }
                    previous = Some((lat, lon));
                }
                (Some(_), Some(_)) => reasons.push(GeoReason::OutOfRange),
                _ => reasons.push(GeoReason::MissingOrNonNumeric),
            }
            GeoFlag {
                row,
                is_suspect: !reasons.is_empty(),
                reasons,
                distance_km,
            }
        })
        .collect();
    Ok(flags)
}

/// Writes the rows with `is_suspect`, `suspect_reason` and `distance_km`
/// appended.
pub fn write_annotated<W: Write>(
    rows: &RowSet,
    flags: &[GeoFlag],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    let mut header = rows.headers.clone();
    header.extend(["is_suspect", "suspect_reason", "distance_km"].map(String::from));
    writer.write_record(&header)?;
    for (row, flag) in rows.rows.iter().zip(flags) {
        let mut record = row.clone();
        record.resize(rows.headers.len(), String::new());
        record.push(flag.is_suspect.to_string());
        record.push(flag.suspect_reason());
        record.push(flag.distance_km.map(|d| d.to_string()).unwrap_or_default());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_matches_known_distance() {
        // Seoul City Hall to Busan City Hall is roughly 325 km.
        let distance = haversine_km(37.5663, 126.9779, 35.1798, 129.0750);
        assert!((distance - 325.0).abs() < 5.0, "distance {distance}");
        assert_eq!(haversine_km(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn flags_each_failure_mode() {
        let rows = RowSet::from_csv_text(
            "id,lat,lon\n1,37.5,127.0\n2,,127.0\n3,95,127.0\n4,37.5001,127.0001\n5,35.1,129.0\n",
            "points.csv",
        )
        .unwrap();
        let flags = flag_geo_suspects(&rows, "lat", "lon", DEFAULT_THRESHOLD_KM).unwrap();
        assert_eq!(flags.len(), 5);
        assert!(!flags[0].is_suspect);
        assert_eq!(flags[0].distance_km, None);
        assert_eq!(flags[1].reasons, vec![GeoReason::MissingOrNonNumeric]);
        assert_eq!(flags[2].reasons, vec![GeoReason::OutOfRange]);
        // Row 4 is measured against row 1, skipping the invalid rows.
        assert!(!flags[3].is_suspect);
        assert!(flags[3].distance_km.unwrap() < 0.1);
        assert_eq!(flags[4].suspect_reason(), "distance_threshold_exceeded");
    }

    #[test]
    fn threshold_is_inclusive() {
        let rows = RowSet::from_csv_text("lat,lon\n0,0\n0,0\n", "same.csv").unwrap();
        let flags = flag_geo_suspects(&rows, "lat", "lon", 0.0).unwrap();
        assert!(flags[1].is_suspect);
    }

    #[test]
    fn unknown_column_is_rejected() {
        let rows = RowSet::from_csv_text("lat,lon\n0,0\n", "p.csv").unwrap();
        assert!(flag_geo_suspects(&rows, "lat", "lng", 25.0).is_err());
    }

    #[test]
    fn annotated_output_appends_flag_columns() {
        let rows = RowSet::from_csv_text("lat,lon\n0,0\nx,0\n", "p.csv").unwrap();
        let flags = flag_geo_suspects(&rows, "lat", "lon", 25.0).unwrap();
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_annotated(&rows, &flags, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(
            text,
            "lat,lon,is_suspect,suspect_reason,distance_km\n0,0,false,,\nx,0,true,missing_or_non_numeric,\n"
        );
    }
}
