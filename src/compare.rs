//! Before/after distribution comparison.
//!
//! Both sides are bucketed identically per common column: numeric columns
//! share equal-width bins over the joint range, categorical columns share the
//! sorted union of observed values. PSI, Jensen-Shannon divergence and
//! chi-square are then computed over the matched buckets. Every comparison
//! also fingerprints both inputs and records a lineage link between them.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use encoding_rs::Encoding;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    coerce,
    config::CompareConfig,
    error::Result,
    io_utils,
    rows::RowSet,
    versioning::{self, DatasetVersion, LineageStore},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDrift {
    #[serde(rename = "type")]
    pub kind: DistributionKind,
    pub buckets: Vec<String>,
    pub before_counts: Vec<u64>,
    pub after_counts: Vec<u64>,
    pub psi: f64,
    pub js_divergence: f64,
    pub chi_square: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SideSummary {
    pub source_name: String,
    pub fingerprint: String,
    pub row_count: usize,
    pub column_count: usize,
}

impl SideSummary {
    fn new(version: &DatasetVersion, source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            fingerprint: version.fingerprint.clone(),
            row_count: version.row_count,
            column_count: version.column_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonReport {
    pub before: SideSummary,
    pub after: SideSummary,
    pub common_columns: Vec<String>,
    pub column_metrics: BTreeMap<String, ColumnDrift>,
    pub lineage_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CompareSources {
    pub before: String,
    pub after: String,
}

impl Default for CompareSources {
    fn default() -> Self {
        Self {
            before: "before.csv".to_string(),
            after: "after.csv".to_string(),
        }
    }
}

pub fn compare_csv_texts(
    before_text: &str,
    after_text: &str,
    sources: &CompareSources,
    config: &CompareConfig,
    lineage: &LineageStore,
) -> Result<ComparisonReport> {
    let before = RowSet::from_csv_text(before_text, &sources.before)?;
    let after = RowSet::from_csv_text(after_text, &sources.after)?;
    compare_row_sets(
        (&before, before_text),
        (&after, after_text),
        sources,
        config,
        lineage,
    )
}

/// Compares two files; each side's delimiter comes from `delimiter` or, when
/// absent, from its extension (`.tsv` reads as tab-separated).
pub fn compare_csv_files(
    before_path: &Path,
    after_path: &Path,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
    config: &CompareConfig,
    lineage: &LineageStore,
) -> Result<ComparisonReport> {
    let sources = CompareSources {
        before: io_utils::source_label(before_path),
        after: io_utils::source_label(after_path),
    };
    let before_text = io_utils::read_text(before_path, encoding)?;
    let after_text = io_utils::read_text(after_path, encoding)?;
    let before = RowSet::from_delimited_text(
        &before_text,
        io_utils::resolve_input_delimiter(before_path, delimiter),
        &sources.before,
    )?;
    let after = RowSet::from_delimited_text(
        &after_text,
        io_utils::resolve_input_delimiter(after_path, delimiter),
        &sources.after,
    )?;
    compare_row_sets(
        (&before, &before_text),
        (&after, &after_text),
        &sources,
        config,
        lineage,
    )
}

fn compare_row_sets(
    (before, before_text): (&RowSet, &str),
    (after, after_text): (&RowSet, &str),
    sources: &CompareSources,
    config: &CompareConfig,
    lineage: &LineageStore,
) -> Result<ComparisonReport> {
    let before_columns = before.headers.iter().collect::<BTreeSet<_>>();
    let common_columns = after
        .headers
        .iter()
        .filter(|h| before_columns.contains(h))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();

    let mut column_metrics = BTreeMap::new();
    for column in &common_columns {
        let before_values = column_cells(before, column);
        let after_values = column_cells(after, column);
        if let Some(drift) = compare_column(&before_values, &after_values, config) {
            column_metrics.insert(column.clone(), drift);
        }
    }

    let before_version = versioning::fingerprint(before_text, &sources.before, None);
    let after_version = versioning::fingerprint(after_text, &sources.after, None);
    let mut context = Map::new();
    context.insert(
        "common_columns".to_string(),
        Value::from(common_columns.clone()),
    );
    let lineage_path = lineage.record(
        &before_version,
        &after_version,
        &sources.before,
        &sources.after,
        context,
    )?;

    info!(
        "Compared {} column(s) between '{}' and '{}'",
        column_metrics.len(),
        sources.before,
        sources.after
    );
    Ok(ComparisonReport {
        before: SideSummary::new(&before_version, &sources.before),
        after: SideSummary::new(&after_version, &sources.after),
        common_columns,
        column_metrics,
        lineage_path,
    })
}

fn column_cells<'a>(rows: &'a RowSet, column: &str) -> Vec<&'a str> {
    match rows.column_index(column) {
        Some(idx) => rows.column_values(idx).collect(),
        None => Vec::new(),
    }
}

/// Buckets and scores one column; `None` when neither side has any cells.
pub fn compare_column(before: &[&str], after: &[&str], config: &CompareConfig) -> Option<ColumnDrift> {
    let (kind, buckets, before_counts, after_counts) = if is_numeric_column(before, after) {
        let numbers = |cells: &[&str]| {
            cells
                .iter()
                .filter_map(|c| coerce::to_number(c))
                .collect::<Vec<_>>()
        };
        let before_numbers = numbers(before);
        let after_numbers = numbers(after);
        let edges = make_bins(
            before_numbers.iter().chain(after_numbers.iter()).copied(),
            config.num_bins,
        )?;
        (
            DistributionKind::Numeric,
            bin_labels(&edges),
            bin_counts(&before_numbers, &edges),
            bin_counts(&after_numbers, &edges),
        )
    } else {
        let categories = before
            .iter()
            .chain(after.iter())
            .map(|c| c.trim())
            .collect::<BTreeSet<_>>();
        if categories.is_empty() {
            return None;
        }
        let categories = categories.into_iter().collect::<Vec<_>>();
        (
            DistributionKind::Categorical,
            categories.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            category_counts(before, &categories),
            category_counts(after, &categories),
        )
    };

    let before_probs = normalize(&before_counts, config.epsilon);
    let after_probs = normalize(&after_counts, config.epsilon);
    let drift = ColumnDrift {
        kind,
        psi: psi(&before_probs, &after_probs),
        js_divergence: js_divergence(&before_probs, &after_probs),
        chi_square: chi_square(&before_counts, &after_counts, config.epsilon),
        buckets,
        before_counts,
        after_counts,
    };
    debug!(
        "{:?} column drift over {} bucket(s): psi={:.6}",
        drift.kind,
        drift.buckets.len(),
        drift.psi
    );
    Some(drift)
}

/// Numeric iff at least one non-empty cell exists and every non-empty cell on
/// both sides coerces to a number.
pub fn is_numeric_column(before: &[&str], after: &[&str]) -> bool {
    let mut seen = false;
    for cell in before.iter().chain(after.iter()) {
        if cell.trim().is_empty() {
            continue;
        }
        if coerce::to_number(cell).is_none() {
            return false;
        }
        seen = true;
    }
    seen
}

/// Equal-width bin edges over the range of `values`, or a single `±0.5` band
/// around a constant. `None` when there are no values.
pub fn make_bins(values: impl IntoIterator<Item = f64>, num_bins: usize) -> Option<Vec<f64>> {
    let (min, max) = values.into_iter().fold(None, |acc: Option<(f64, f64)>, v| {
        Some(acc.map_or((v, v), |(lo, hi)| (lo.min(v), hi.max(v))))
    })?;
    if is_close(min, max) || num_bins == 0 {
        return Some(vec![min - 0.5, max + 0.5]);
    }
    let step = (max - min) / num_bins as f64;
    let mut edges = (0..num_bins)
        .map(|i| min + step * i as f64)
        .collect::<Vec<_>>();
    edges.push(max);
    Some(edges)
}

fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}

/// Counts per bin; every bin is half-open except the last, which is closed.
pub fn bin_counts(values: &[f64], edges: &[f64]) -> Vec<u64> {
    let bins = edges.len().saturating_sub(1);
    let mut counts = vec![0u64; bins];
    for &value in values {
        for i in 0..bins {
            let (lower, upper) = (edges[i], edges[i + 1]);
            let last = i + 1 == bins;
            if lower <= value && (value < upper || (last && value <= upper)) {
                counts[i] += 1;
                break;
            }
        }
    }
    counts
}

fn bin_labels(edges: &[f64]) -> Vec<String> {
    let bins = edges.len().saturating_sub(1);
    (0..bins)
        .map(|i| {
            let close = if i + 1 == bins { ']' } else { ')' };
            format!(
                "[{}, {}{close}",
                format_sig(edges[i]),
                format_sig(edges[i + 1])
            )
        })
        .collect()
}

/// Four significant digits, switching to exponent form for very large or
/// very small magnitudes.
fn format_sig(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }
    let exponent = value.abs().log10().floor() as i32;
    if !(-4..4).contains(&exponent) {
        return format!("{value:.3e}");
    }
    let decimals = (3 - exponent).max(0) as usize;
    let text = format!("{value:.decimals$}");
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

fn category_counts(cells: &[&str], categories: &[&str]) -> Vec<u64> {
    let mut counter: HashMap<&str, u64> = HashMap::new();
    for cell in cells {
        *counter.entry(cell.trim()).or_insert(0) += 1;
    }
    categories
        .iter()
        .map(|c| counter.get(c).copied().unwrap_or(0))
        .collect()
}

/// Probability vector floored at `epsilon`; uniform when the total is zero.
pub fn normalize(counts: &[u64], epsilon: f64) -> Vec<f64> {
    let total = counts.iter().sum::<u64>();
    if total == 0 {
        let uniform = 1.0 / counts.len().max(1) as f64;
        return vec![uniform; counts.len()];
    }
    counts
        .iter()
        .map(|&c| (c as f64 / total as f64).max(epsilon))
        .collect()
}

pub fn psi(before: &[f64], after: &[f64]) -> f64 {
    before
        .iter()
        .zip(after)
        .map(|(b, a)| (a - b) * (a / b).ln())
        .sum()
}

pub fn js_divergence(before: &[f64], after: &[f64]) -> f64 {
    let mid = before
        .iter()
        .zip(after)
        .map(|(b, a)| (b + a) / 2.0)
        .collect::<Vec<_>>();
    let kl = |p: &[f64]| -> f64 {
        p.iter()
            .zip(&mid)
            .map(|(pi, mi)| pi * (pi / mi).ln())
            .sum()
    };
    (0.5 * kl(before) + 0.5 * kl(after)).max(0.0)
}

/// Pearson chi-square of `after` against `before` rescaled to the after
/// total. Buckets empty on both sides contribute nothing.
pub fn chi_square(before: &[u64], after: &[u64], epsilon: f64) -> f64 {
    let before_total = before.iter().sum::<u64>();
    let after_total = after.iter().sum::<u64>();
    if before_total == 0 || after_total == 0 {
        return 0.0;
    }
    before
        .iter()
        .zip(after)
        .filter(|(b, a)| **b > 0 || **a > 0)
        .map(|(&expected_raw, &observed)| {
            let expected =
                (expected_raw as f64 * after_total as f64 / before_total as f64).max(epsilon);
            let diff = observed as f64 - expected;
            diff * diff / expected
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run(before: &str, after: &str) -> (ComparisonReport, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = LineageStore::new(dir.path().join("lineage"));
        let report = compare_csv_texts(
            before,
            after,
            &CompareSources::default(),
            &CompareConfig::default(),
            &store,
        )
        .unwrap();
        (report, dir)
    }

    #[test]
    fn identical_inputs_have_zero_drift() {
        let text = "city,sales\nseoul,100\nbusan,200\n";
        let (report, _dir) = run(text, text);
        assert_eq!(report.common_columns, vec!["city", "sales"]);
        for drift in report.column_metrics.values() {
            assert_eq!(drift.psi, 0.0);
            assert_eq!(drift.js_divergence, 0.0);
            assert_eq!(drift.chi_square, 0.0);
        }
        assert_eq!(report.before.fingerprint.len(), 64);
    }

    #[test]
    fn category_shift_is_detected() {
        let (report, _dir) = run(
            "city,sales\nseoul,100\nbusan,200\n",
            "city,sales\nseoul,100\nseoul,100\n",
        );
        let city = &report.column_metrics["city"];
        assert_eq!(city.kind, DistributionKind::Categorical);
        assert_eq!(city.buckets, vec!["busan", "seoul"]);
        assert_eq!(city.before_counts, vec![1, 1]);
        assert_eq!(city.after_counts, vec![0, 2]);
        assert!(city.psi > 0.0);
        assert!(city.chi_square > 0.0);
        assert!((city.chi_square - 2.0).abs() < 1e-9);
        assert!(city.js_divergence > 0.0);

        let sales = &report.column_metrics["sales"];
        assert_eq!(sales.kind, DistributionKind::Numeric);
        assert_eq!(sales.buckets.len(), 10);
        assert!(sales.buckets.last().unwrap().ends_with(']'));
    }

    #[test]
    fn lineage_link_is_always_written() {
        let (report, _dir) = run("a\n1\n", "a\n2\n");
        assert!(report.lineage_path.exists());
        let link = LineageStore::load(&report.lineage_path).unwrap();
        assert_eq!(link.context["common_columns"], serde_json::json!(["a"]));
        assert_eq!(link.before.fingerprint, report.before.fingerprint);
    }

    #[test]
    fn only_common_columns_are_compared() {
        let (report, _dir) = run("a,b\n1,x\n", "b,c\ny,2\n");
        assert_eq!(report.common_columns, vec!["b"]);
        assert_eq!(report.column_metrics.len(), 1);
    }

    #[test]
    fn constant_numeric_column_uses_single_band() {
        let edges = make_bins([5.0, 5.0, 5.0], 10).unwrap();
        assert_eq!(edges, vec![4.5, 5.5]);
        assert_eq!(bin_labels(&edges), vec!["[4.5, 5.5]"]);
        assert!(make_bins(std::iter::empty(), 10).is_none());
    }

    #[test]
    fn max_value_lands_in_last_bin() {
        let edges = make_bins([0.0, 10.0], 10).unwrap();
        assert_eq!(edges.len(), 11);
        let counts = bin_counts(&[0.0, 9.99, 10.0, 5.0], &edges);
        assert_eq!(counts[0], 1);
        assert_eq!(counts[5], 1);
        assert_eq!(counts[9], 2);
    }

    #[test]
    fn mixed_cells_make_column_categorical() {
        assert!(is_numeric_column(&["1", " ", "$2"], &["(3)"]));
        assert!(!is_numeric_column(&["1"], &["two"]));
        assert!(!is_numeric_column(&["", ""], &[]));
    }

    #[test]
    fn normalize_floors_and_falls_back_to_uniform() {
        assert_eq!(normalize(&[0, 0, 0, 0], 1e-9), vec![0.25; 4]);
        assert_eq!(normalize(&[0, 4], 1e-9), vec![1e-9, 1.0]);
    }

    #[test]
    fn chi_square_skips_buckets_empty_on_both_sides() {
        assert_eq!(chi_square(&[2, 0, 3], &[2, 0, 3], 1e-9), 0.0);
        assert_eq!(chi_square(&[0, 0], &[1, 1], 1e-9), 0.0);
    }

    #[test]
    fn significant_digit_labels() {
        assert_eq!(format_sig(100.0), "100");
        assert_eq!(format_sig(110.0), "110");
        assert_eq!(format_sig(0.12346), "0.1235");
        assert_eq!(format_sig(-2.5), "-2.5");
    }
}
