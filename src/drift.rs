use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{profile::FileProfile, stats::round_to};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaDriftRecord {
    pub dtype_changed: bool,
    pub missing_ratio_range: f64,
    pub dominant_value_ratio_range: f64,
    /// Spread of means across files with numeric stats; `0.0` when fewer than
    /// two files have them.
    pub mean_range: f64,
}

/// Per shared column, how much type, missingness, dominance and mean vary
/// across `files`. Files lacking the column are skipped for that column.
pub fn schema_drift(
    files: &[FileProfile],
    shared_columns: &[String],
) -> BTreeMap<String, SchemaDriftRecord> {
    shared_columns
        .iter()
        .map(|column| {
            let profiles = files
                .iter()
                .filter_map(|f| f.column(column))
                .collect::<Vec<_>>();
            let dtypes = profiles.iter().map(|p| p.dtype).collect::<BTreeSet<_>>();
            let missing = profiles.iter().map(|p| p.missing_ratio).collect::<Vec<_>>();
            let dominant = profiles
                .iter()
                .map(|p| p.dominant_value_ratio)
                .collect::<Vec<_>>();
            let means = profiles
                .iter()
                .filter_map(|p| p.numeric_stats.as_ref().map(|s| s.mean))
                .collect::<Vec<_>>();
            let record = SchemaDriftRecord {
                dtype_changed: dtypes.len() > 1,
                missing_ratio_range: spread(&missing),
                dominant_value_ratio_range: spread(&dominant),
                mean_range: if means.len() < 2 { 0.0 } else { spread(&means) },
            };
            (column.clone(), record)
        })
        .collect()
}

fn spread(values: &[f64]) -> f64 {
    round_to(crate::stats::range(values), 6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ProfilerConfig, profile::profile_csv_text};

    fn profile(text: &str, name: &str) -> FileProfile {
        profile_csv_text(text, name, None, &ProfilerConfig::default()).unwrap()
    }

    #[test]
    fn detects_dtype_change_and_ranges() {
        let first = profile("id,amount\n1,10\n2,20\n3,\n4,30\n", "first.csv");
        let second = profile("id,amount\n1,n/a\n2,40\n3,50\n4,60\n", "second.csv");
        let shared = vec!["amount".to_string(), "id".to_string()];
        let drift = schema_drift(&[first, second], &shared);

        let amount = &drift["amount"];
        assert!(amount.dtype_changed);
        assert_eq!(amount.missing_ratio_range, 0.25);
        // Only the first file is float, so there is nothing to spread.
        assert_eq!(amount.mean_range, 0.0);

        let id = &drift["id"];
        assert!(!id.dtype_changed);
        assert_eq!(id.mean_range, 0.0);
        assert_eq!(id.dominant_value_ratio_range, 0.0);
    }

    #[test]
    fn mean_range_spans_numeric_files() {
        let first = profile("v\n1\n3\n", "a.csv");
        let second = profile("v\n10\n20\n", "b.csv");
        let drift = schema_drift(&[first, second], &["v".to_string()]);
        assert_eq!(drift["v"].mean_range, 13.0);
    }
}
