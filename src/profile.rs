//! Single-pass column profiling.
//!
//! [`ColumnProfiler`] consumes rows one at a time and keeps, per column, only
//! bounded state: counters, a cardinality bitmap, a capped frequency table and
//! two reservoirs (raw text for semantic typing, numbers for outliers). Nothing
//! is revisited, so a file of any length is profiled in one pass with memory
//! proportional to the column count.
//!
//! ## Column typing
//!
//! A column is `float` when at least one non-missing cell coerces to a number
//! and none failed to. Semantic types are then assigned in precedence order:
//! latitude/longitude by column name (float only), `date` when most sampled
//! text parses as a date, `category` for low-cardinality text, `numeric` for
//! the remaining float columns and `text` otherwise.

use std::{collections::BTreeMap, fmt, io::Read, path::Path};

use encoding_rs::{Encoding, UTF_8};
use log::debug;
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    coerce,
    config::ProfilerConfig,
    error::{InsightError, Result},
    frequency::{BoundedCounter, OTHER_BUCKET},
    io_utils,
    sketch::{CardinalityBitmap, Reservoir},
    stats,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Float,
    String,
}

impl DType {
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Float => "float",
            DType::String => "string",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Date,
    Category,
    GeoLatitude,
    GeoLongitude,
    Numeric,
    Text,
}

impl SemanticType {
    pub fn as_str(self) -> &'static str {
        match self {
            SemanticType::Date => "date",
            SemanticType::Category => "category",
            SemanticType::GeoLatitude => "geo_latitude",
            SemanticType::GeoLongitude => "geo_longitude",
            SemanticType::Numeric => "numeric",
            SemanticType::Text => "text",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopValue {
    pub value: String,
    pub count: u64,
    /// Share of all rows in the file, missing rows included.
    pub ratio: f64,
}

impl TopValue {
    /// True for the synthetic bucket holding values past the tracking cap.
    pub fn is_overflow(&self) -> bool {
        self.value == OTHER_BUCKET
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NumericDistribution {
    pub positive_ratio: f64,
    pub zero_ratio: f64,
    pub negative_ratio: f64,
    pub outlier_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NumericStats {
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnProfile {
    pub name: String,
    pub missing_count: u64,
    pub non_missing_count: u64,
    pub missing_ratio: f64,
    pub unique_count_estimate: u64,
    pub unique_ratio: f64,
    pub dominant_value_ratio: f64,
    pub top_values: Vec<TopValue>,
    pub top_values_capped: bool,
    /// Present when at least one cell coerced to a number.
    pub numeric_distribution: Option<NumericDistribution>,
    /// Present only for `float` columns.
    pub numeric_stats: Option<NumericStats>,
    pub dtype: DType,
    pub semantic_type: SemanticType,
}

impl ColumnProfile {
    pub fn row_count(&self) -> u64 {
        self.missing_count + self.non_missing_count
    }

    pub fn is_categorical(&self) -> bool {
        self.dtype == DType::String || self.semantic_type == SemanticType::Category
    }

    /// Most frequent real value; the overflow bucket never counts.
    pub fn dominant_value(&self) -> Option<&TopValue> {
        self.top_values.iter().find(|t| !t.is_overflow())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatioCell {
    pub count: u64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupTargetRatio {
    pub group_column: String,
    pub target_column: String,
    pub groups: BTreeMap<String, BTreeMap<String, RatioCell>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileProfile {
    pub source: String,
    pub row_count: u64,
    pub column_count: usize,
    pub columns: Vec<ColumnProfile>,
    pub group_target_ratio: Option<GroupTargetRatio>,
}

impl FileProfile {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Group × target frequency table requested alongside the profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grouping {
    pub group_column: String,
    pub target_column: String,
}

impl Grouping {
    pub fn new(group_column: impl Into<String>, target_column: impl Into<String>) -> Self {
        Self {
            group_column: group_column.into(),
            target_column: target_column.into(),
        }
    }

    /// Both columns or neither; one without the other is a configuration error.
    pub fn from_options(group: Option<&str>, target: Option<&str>) -> Result<Option<Self>> {
        match (group, target) {
            (Some(g), Some(t)) => Ok(Some(Self::new(g, t))),
            (None, None) => Ok(None),
            (Some(g), None) => Err(InsightError::invalid_config(format!(
                "Group column '{g}' was given without a target column"
            ))),
            (None, Some(t)) => Err(InsightError::invalid_config(format!(
                "Target column '{t}' was given without a group column"
            ))),
        }
    }
}

struct ColumnAccumulator {
    name: String,
    missing: u64,
    non_missing: u64,
    bitmap: CardinalityBitmap,
    counter: BoundedCounter,
    value_samples: Reservoir<String>,
    positive: u64,
    zero: u64,
    negative: u64,
    numeric_count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
    text_seen: bool,
    outlier_samples: Reservoir<f64>,
}

impl ColumnAccumulator {
    fn new(name: String, config: &ProfilerConfig) -> Self {
        Self {
            name,
            missing: 0,
            non_missing: 0,
            bitmap: CardinalityBitmap::new(config.bitmap_bits),
            counter: BoundedCounter::new(config.top_value_cap),
            value_samples: Reservoir::new(config.value_sample_cap),
            positive: 0,
            zero: 0,
            negative: 0,
            numeric_count: 0,
            sum: 0.0,
            min: None,
            max: None,
            text_seen: false,
            outlier_samples: Reservoir::new(config.outlier_sample_cap),
        }
    }

    fn observe(&mut self, raw: &str, rng: &mut StdRng) {
        let value = raw.trim();
        if value.is_empty() {
            self.missing += 1;
            return;
        }
        self.non_missing += 1;
        self.bitmap.insert(value);
        self.counter.observe(value);
        self.value_samples.offer(value.to_string(), rng);

        let Some(number) = coerce::to_number(value) else {
            self.text_seen = true;
            return;
        };
        self.numeric_count += 1;
        self.sum += number;
        self.min = Some(self.min.map_or(number, |current| current.min(number)));
        self.max = Some(self.max.map_or(number, |current| current.max(number)));
        if number > 0.0 {
            self.positive += 1;
        } else if number < 0.0 {
            self.negative += 1;
        } else {
            self.zero += 1;
        }
        self.outlier_samples.offer(number, rng);
    }

    fn finish(self, row_count: u64, config: &ProfilerConfig) -> ColumnProfile {
        let dtype = if self.numeric_count > 0 && !self.text_seen {
            DType::Float
        } else {
            DType::String
        };

        let numeric_stats = match (dtype, self.min, self.max) {
            (DType::Float, Some(min), Some(max)) => Some(NumericStats {
                count: self.numeric_count,
                mean: self.sum / self.numeric_count as f64,
                min,
                max,
            }),
            _ => None,
        };

        let numeric_total = self.positive + self.zero + self.negative;
        let numeric_distribution = (numeric_total > 0).then(|| NumericDistribution {
            positive_ratio: stats::ratio(self.positive, numeric_total),
            zero_ratio: stats::ratio(self.zero, numeric_total),
            negative_ratio: stats::ratio(self.negative, numeric_total),
            outlier_ratio: stats::outlier_ratio(self.outlier_samples.as_slice()),
        });

        let top_values = self
            .counter
            .top(config.top_n)
            .into_iter()
            .map(|(value, count)| TopValue {
                value,
                count,
                ratio: stats::ratio(count, row_count),
            })
            .collect::<Vec<_>>();
        let dominant_value_ratio = top_values
            .iter()
            .find(|t| !t.is_overflow())
            .map(|t| t.ratio)
            .unwrap_or(0.0);

        let unique_count_estimate = (self.bitmap.estimate() as u64).min(self.non_missing);
        let unique_ratio = stats::ratio(unique_count_estimate, self.non_missing);

        let semantic_type = infer_semantic_type(
            &self.name,
            dtype,
            self.value_samples.as_slice(),
            unique_ratio,
            config,
        );

        ColumnProfile {
            name: self.name,
            missing_count: self.missing,
            non_missing_count: self.non_missing,
            missing_ratio: stats::ratio(self.missing, row_count),
            unique_count_estimate,
            unique_ratio,
            dominant_value_ratio,
            top_values,
            top_values_capped: self.counter.is_capped(),
            numeric_distribution,
            numeric_stats,
            dtype,
            semantic_type,
        }
    }
}

pub fn infer_semantic_type(
    column: &str,
    dtype: DType,
    samples: &[String],
    unique_ratio: f64,
    config: &ProfilerConfig,
) -> SemanticType {
    let lower = column.to_lowercase();
    if dtype == DType::Float && (lower.contains("lat") || column.contains("위도")) {
        return SemanticType::GeoLatitude;
    }
    if dtype == DType::Float
        && (lower.contains("lon") || lower.contains("lng") || column.contains("경도"))
    {
        return SemanticType::GeoLongitude;
    }
    if dtype == DType::String {
        let non_empty = samples
            .iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if !non_empty.is_empty() {
            let hits = non_empty
                .iter()
                .filter(|s| coerce::looks_like_date(s))
                .count();
            if hits as f64 / non_empty.len() as f64 >= config.date_hit_ratio {
                return SemanticType::Date;
            }
        }
        if unique_ratio <= config.category_unique_ratio {
            return SemanticType::Category;
        }
    }
    if dtype == DType::Float {
        return SemanticType::Numeric;
    }
    SemanticType::Text
}

pub struct ColumnProfiler {
    source: String,
    config: ProfilerConfig,
    columns: Vec<ColumnAccumulator>,
    grouping: Option<(usize, usize, Grouping)>,
    group_counts: BTreeMap<String, BTreeMap<String, u64>>,
    row_count: u64,
    rng: StdRng,
}

impl ColumnProfiler {
    pub fn new(
        source: impl Into<String>,
        headers: &[String],
        grouping: Option<&Grouping>,
        config: &ProfilerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let source = source.into();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(InsightError::EmptyInput(format!(
                "{source} has no named columns"
            )));
        }
        let grouping = match grouping {
            Some(g) => {
                let locate = |name: &str| {
                    headers.iter().position(|h| h == name).ok_or_else(|| {
                        InsightError::invalid_config(format!(
                            "Grouping column '{name}' not found in {source}"
                        ))
                    })
                };
                Some((locate(&g.group_column)?, locate(&g.target_column)?, g.clone()))
            }
            None => None,
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            columns: headers
                .iter()
                .map(|h| ColumnAccumulator::new(h.clone(), config))
                .collect(),
            source,
            config: config.clone(),
            grouping,
            group_counts: BTreeMap::new(),
            row_count: 0,
            rng,
        })
    }

    pub fn ingest<S: AsRef<str>>(&mut self, row: &[S]) {
        self.row_count += 1;
        let cell = |idx: usize| row.get(idx).map(|s| s.as_ref()).unwrap_or("");

        if let Some((group_idx, target_idx, _)) = &self.grouping {
            let group = cell(*group_idx).trim();
            let target = cell(*target_idx).trim();
            if !group.is_empty() && !target.is_empty() {
                *self
                    .group_counts
                    .entry(group.to_string())
                    .or_default()
                    .entry(target.to_string())
                    .or_insert(0) += 1;
            }
        }

        for (idx, column) in self.columns.iter_mut().enumerate() {
            column.observe(cell(idx), &mut self.rng);
        }
    }

    pub fn finish(self) -> FileProfile {
        let row_count = self.row_count;
        let config = self.config;
        let columns = self
            .columns
            .into_iter()
            .map(|c| c.finish(row_count, &config))
            .collect::<Vec<_>>();

        let group_target_ratio = self.grouping.map(|(_, _, grouping)| {
            let groups = self
                .group_counts
                .into_iter()
                .map(|(group, counts)| {
                    let total = counts.values().sum::<u64>();
                    let cells = counts
                        .into_iter()
                        .map(|(target, count)| {
                            (
                                target,
                                RatioCell {
                                    count,
                                    ratio: stats::ratio(count, total),
                                },
                            )
                        })
                        .collect();
                    (group, cells)
                })
                .collect();
            GroupTargetRatio {
                group_column: grouping.group_column,
                target_column: grouping.target_column,
                groups,
            }
        });

        debug!(
            "Profiled {} row(s) across {} column(s) from {}",
            row_count,
            columns.len(),
            self.source
        );
        FileProfile {
            source: self.source,
            row_count,
            column_count: columns.len(),
            columns,
            group_target_ratio,
        }
    }
}

/// Profiles an in-memory row source: `columns` names the header, `rows`
/// yields the cells of each row in header order.
pub fn profile_rows<I, R, S>(
    source: &str,
    columns: &[String],
    rows: I,
    grouping: Option<&Grouping>,
    config: &ProfilerConfig,
) -> Result<FileProfile>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[S]>,
    S: AsRef<str>,
{
    let mut profiler = ColumnProfiler::new(source, columns, grouping, config)?;
    for row in rows {
        profiler.ingest(row.as_ref());
    }
    Ok(profiler.finish())
}

pub fn profile_reader<R: Read>(
    mut reader: csv::Reader<R>,
    encoding: &'static Encoding,
    source: &str,
    grouping: Option<&Grouping>,
    config: &ProfilerConfig,
) -> Result<FileProfile> {
    let headers = io_utils::reader_headers(&mut reader, encoding, source)?;
    let mut profiler = ColumnProfiler::new(source, &headers, grouping, config)?;
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        let decoded = io_utils::decode_record(&record, encoding)?;
        profiler.ingest(&decoded);
    }
    Ok(profiler.finish())
}

pub fn profile_path(
    path: &Path,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
    grouping: Option<&Grouping>,
    config: &ProfilerConfig,
) -> Result<FileProfile> {
    let delimiter = io_utils::resolve_input_delimiter(path, delimiter);
    let reader = io_utils::open_csv_reader_from_path(path, delimiter, true)?;
    profile_reader(
        reader,
        encoding,
        &path.display().to_string(),
        grouping,
        config,
    )
}

pub fn profile_csv_text(
    text: &str,
    source: &str,
    grouping: Option<&Grouping>,
    config: &ProfilerConfig,
) -> Result<FileProfile> {
    let reader = io_utils::open_csv_reader(text.as_bytes(), b',', true);
    profile_reader(reader, UTF_8, source, grouping, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(text: &str) -> FileProfile {
        profile_csv_text(text, "inline.csv", None, &ProfilerConfig::default()).expect("profile")
    }

    #[test]
    fn mixed_column_is_string_without_numeric_stats() {
        let profile = profile("a,b\n1,10\n2,hello\n");
        let b = profile.column("b").unwrap();
        assert_eq!(b.dtype, DType::String);
        assert!(b.numeric_stats.is_none());
        assert!(b.numeric_distribution.is_some());

        let a = profile.column("a").unwrap();
        assert_eq!(a.dtype, DType::Float);
        let stats = a.numeric_stats.as_ref().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 1.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 2.0);
    }

    #[test]
    fn missing_cells_are_counted_per_column() {
        let profile = profile("a,b\n1,\n,\n3,x\n");
        let a = profile.column("a").unwrap();
        assert_eq!((a.missing_count, a.non_missing_count), (1, 2));
        let b = profile.column("b").unwrap();
        assert_eq!((b.missing_count, b.non_missing_count), (2, 1));
        assert!((b.missing_ratio - 0.666667).abs() < 1e-9);
    }

    #[test]
    fn empty_column_is_string_and_unknown_semantics_are_category() {
        let profile = profile("a,b\n1,\n2,\n");
        let b = profile.column("b").unwrap();
        assert_eq!(b.dtype, DType::String);
        assert_eq!(b.unique_count_estimate, 0);
        assert_eq!(b.dominant_value_ratio, 0.0);
        assert!(b.top_values.is_empty());
        assert_eq!(b.semantic_type, SemanticType::Category);
    }

    #[test]
    fn sign_distribution_and_top_values() {
        let profile = profile("v\n-1\n0\n2\n2\n(3)\n");
        let v = profile.column("v").unwrap();
        let dist = v.numeric_distribution.as_ref().unwrap();
        assert_eq!(dist.positive_ratio, 0.4);
        assert_eq!(dist.zero_ratio, 0.2);
        assert_eq!(dist.negative_ratio, 0.4);
        assert_eq!(v.top_values[0].value, "2");
        assert_eq!(v.top_values[0].count, 2);
        assert_eq!(v.dominant_value_ratio, 0.4);
        assert_eq!(v.numeric_stats.as_ref().unwrap().min, -3.0);
    }

    #[test]
    fn semantic_types_follow_precedence() {
        let text = "lat,lng,day,city,note,amount\n\
                    37.5,127.0,2024-01-01,seoul,alpha,10\n\
                    35.1,129.0,2024-01-02,seoul,beta,20\n\
                    36.0,128.0,2024-01-03,seoul,gamma,30\n\
                    35.5,128.5,2024-01-04,seoul,delta,40\n\
                    37.0,126.5,2024-01-05,seoul,epsilon,50\n\
                    36.5,127.5,2024-01-06,busan,zeta,60\n";
        let profile = profile(text);
        let kind = |name: &str| profile.column(name).unwrap().semantic_type;
        assert_eq!(kind("lat"), SemanticType::GeoLatitude);
        assert_eq!(kind("lng"), SemanticType::GeoLongitude);
        assert_eq!(kind("day"), SemanticType::Date);
        assert_eq!(kind("note"), SemanticType::Text);
        assert_eq!(kind("amount"), SemanticType::Numeric);
        // two distinct of six values: unique ratio 0.333 is above the threshold
        assert_eq!(kind("city"), SemanticType::Text);
    }

    #[test]
    fn low_cardinality_text_is_category() {
        let mut text = String::from("status\n");
        for i in 0..20 {
            text.push_str(if i % 4 == 0 { "open\n" } else { "closed\n" });
        }
        let profile = profile(&text);
        assert_eq!(
            profile.column("status").unwrap().semantic_type,
            SemanticType::Category
        );
    }

    #[test]
    fn korean_geo_column_names_are_recognised() {
        let profile = profile("위도,경도\n37.5,127.0\n35.1,129.0\n");
        assert_eq!(profile.columns[0].semantic_type, SemanticType::GeoLatitude);
        assert_eq!(profile.columns[1].semantic_type, SemanticType::GeoLongitude);
    }

    #[test]
    fn top_values_cap_marks_overflow() {
        let config = ProfilerConfig {
            top_value_cap: 3,
            ..ProfilerConfig::default()
        };
        let columns = vec!["id".to_string()];
        let rows = (0..10).map(|i| vec![format!("v{i}")]).collect::<Vec<_>>();
        let profile = profile_rows("ids", &columns, &rows, None, &config).unwrap();
        let id = &profile.columns[0];
        assert!(id.top_values_capped);
        assert_eq!(id.top_values[0].value, crate::frequency::OTHER_BUCKET);
        assert_eq!(id.top_values[0].count, 7);
        assert!(id.top_values.len() <= 5);
        assert_eq!(id.dominant_value().unwrap().value, "v0");
        assert_eq!(id.dominant_value_ratio, 0.1);
    }

    #[test]
    fn group_target_ratios_skip_blank_cells() {
        let grouping = Grouping::new("region", "kind");
        let profile = profile_csv_text(
            "region,kind\nseoul,a\nseoul,b\nseoul,a\nbusan,a\n,a\nbusan,\n",
            "inline.csv",
            Some(&grouping),
            &ProfilerConfig::default(),
        )
        .unwrap();
        let table = profile.group_target_ratio.unwrap();
        assert_eq!(table.group_column, "region");
        let seoul = &table.groups["seoul"];
        assert_eq!(seoul["a"].count, 2);
        assert!((seoul["a"].ratio - 0.666667).abs() < 1e-9);
        assert_eq!(table.groups["busan"]["a"].ratio, 1.0);
        assert_eq!(table.groups.len(), 2);
    }

    #[test]
    fn grouping_requires_both_columns_present() {
        assert!(Grouping::from_options(Some("g"), None).is_err());
        assert!(Grouping::from_options(None, None).unwrap().is_none());

        let grouping = Grouping::new("region", "missing");
        let err = profile_csv_text(
            "region,kind\nseoul,a\n",
            "inline.csv",
            Some(&grouping),
            &ProfilerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, InsightError::InvalidConfiguration(_)));
    }

    #[test]
    fn header_only_file_has_zero_rows() {
        let profile = profile("a,b\n");
        assert_eq!(profile.row_count, 0);
        assert_eq!(profile.column_count, 2);
        assert_eq!(profile.columns[0].missing_ratio, 0.0);
    }

    #[test]
    fn missing_header_is_fatal() {
        let err = profile_csv_text("", "blank.csv", None, &ProfilerConfig::default()).unwrap_err();
        assert!(matches!(err, InsightError::HeaderMissing { .. }));
    }
}
