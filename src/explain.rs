//! Rule-based reason candidates for anomalies in a single file.
//!
//! Each rule reads the finished [`FileProfile`] (the recent-change rule also
//! needs the raw rows) and either abstains or proposes one candidate scored
//! in `[0, 100]`. Candidates are ranked by score; equal scores keep rule
//! evaluation order.

use std::{collections::BTreeMap, fmt, path::Path};

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    coerce,
    config::ExplainConfig,
    error::{InsightError, Result},
    profile::{ColumnProfile, DType, FileProfile, SemanticType},
    rows::RowSet,
    stats::{self, round_to},
};

pub const DEFAULT_UNIT_PATTERN: &str = r"([A-Za-z가-힣/%]+)$";
pub const DEFAULT_UNIT_MAX_LEN: usize = 8;

/// Trailing unit token matcher used by the unit-mismatch rule.
#[derive(Debug, Clone)]
pub struct UnitPattern {
    regex: Regex,
    max_len: usize,
}

impl UnitPattern {
    pub fn new(pattern: &str, max_len: usize) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|err| {
            InsightError::invalid_config(format!("Invalid unit pattern '{pattern}': {err}"))
        })?;
        Ok(Self { regex, max_len })
    }

    /// Lowercased unit suffix of a value that also contains a digit.
    pub fn extract(&self, value: &str) -> Option<String> {
        let text = value.trim();
        if !text.chars().any(|ch| ch.is_numeric()) {
            return None;
        }
        let found = self.regex.find(text)?;
        let unit = found.as_str();
        if unit.chars().count() > self.max_len {
            return None;
        }
        Some(unit.to_lowercase())
    }
}

impl Default for UnitPattern {
    fn default() -> Self {
        Self::new(DEFAULT_UNIT_PATTERN, DEFAULT_UNIT_MAX_LEN)
            .expect("default unit pattern is a valid regex")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    MissingConcentration,
    CategoryBias,
    UnitMismatch,
    RecentChange,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::MissingConcentration => "missing_concentration",
            RuleKind::CategoryBias => "category_bias",
            RuleKind::UnitMismatch => "unit_mismatch",
            RuleKind::RecentChange => "recent_change",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasonCandidate {
    pub rule: RuleKind,
    pub score: f64,
    pub reason: String,
    pub evidence: Map<String, Value>,
}

/// True when the recent-change rule could apply and so needs the raw rows.
pub fn needs_rows(profile: &FileProfile) -> bool {
    let has_date = profile
        .columns
        .iter()
        .any(|c| c.semantic_type == SemanticType::Date);
    let has_float = profile.columns.iter().any(|c| c.dtype == DType::Float);
    has_date && has_float
}

pub fn generate_reason_candidates(
    label: &str,
    profile: &FileProfile,
    rows: Option<&RowSet>,
    config: &ExplainConfig,
) -> Vec<ReasonCandidate> {
    let name = display_name(label);
    let mut candidates = [
        missing_concentration(&name, profile, config),
        category_bias(&name, profile, config),
        unit_mismatch(&name, profile, config),
        rows.and_then(|rows| recent_change(&name, profile, rows, config)),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(config.top_k);
    candidates
}

fn display_name(label: &str) -> String {
    Path::new(label)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| label.to_string())
}

fn score(raw: f64) -> f64 {
    round_to(raw.min(100.0), 2)
}

fn evidence(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn missing_concentration(
    name: &str,
    profile: &FileProfile,
    config: &ExplainConfig,
) -> Option<ReasonCandidate> {
    let mut best: Option<(&str, f64)> = None;
    for column in &profile.columns {
        let ratio = column.missing_ratio;
        if ratio < config.missing_ratio_threshold {
            continue;
        }
        if best.is_none_or(|(_, current)| ratio > current) {
            best = Some((&column.name, ratio));
        }
    }
    let (column, ratio) = best?;
    Some(ReasonCandidate {
        rule: RuleKind::MissingConcentration,
        score: score(ratio * 100.0),
        reason: format!(
            "{name}:{column} has concentrated missing values ({:.1}% missing)",
            ratio * 100.0
        ),
        evidence: evidence(json!({ "column": column, "missing_ratio": ratio })),
    })
}

fn category_bias(
    name: &str,
    profile: &FileProfile,
    config: &ExplainConfig,
) -> Option<ReasonCandidate> {
    let best = profile
        .columns
        .iter()
        .filter(|c| c.is_categorical() && c.dominant_value_ratio >= config.dominant_ratio_threshold)
        .fold(None, |best: Option<&ColumnProfile>, c| match best {
            Some(b) if b.dominant_value_ratio >= c.dominant_value_ratio => Some(b),
            _ => Some(c),
        })?;
    let dominant = best.dominant_value_ratio;
    let top_value = best
        .dominant_value()
        .map(|t| t.value.as_str())
        .unwrap_or("(unknown)");
    Some(ReasonCandidate {
        rule: RuleKind::CategoryBias,
        score: score(dominant * 100.0),
        reason: format!(
            "{name}:{} is dominated by '{top_value}' ({:.1}%)",
            best.name,
            dominant * 100.0
        ),
        evidence: evidence(json!({
            "column": best.name,
            "dominant_value_ratio": dominant,
            "top_value": top_value,
        })),
    })
}

fn unit_mismatch(
    name: &str,
    profile: &FileProfile,
    config: &ExplainConfig,
) -> Option<ReasonCandidate> {
    let mut best: Option<ReasonCandidate> = None;
    for column in &profile.columns {
        let mut units: BTreeMap<String, f64> = BTreeMap::new();
        for top in &column.top_values {
            if let Some(unit) = config.unit_pattern.extract(&top.value) {
                *units.entry(unit).or_insert(0.0) += top.ratio;
            }
        }
        if units.len() < 2 {
            continue;
        }
        let coverage = units.values().sum::<f64>();
        if coverage < config.unit_coverage_threshold {
            continue;
        }
        let unit_names = units.keys().cloned().collect::<Vec<_>>();
        let candidate = ReasonCandidate {
            rule: RuleKind::UnitMismatch,
            score: score((units.len() - 1) as f64 * 18.0 + coverage * 50.0),
            reason: format!(
                "{name}:{} mixes several units ({})",
                column.name,
                unit_names.join(", ")
            ),
            evidence: evidence(json!({
                "column": column.name,
                "units": unit_names,
                "coverage": round_to(coverage, 4),
            })),
        };
        if best.as_ref().is_none_or(|b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }
    best
}

fn recent_change(
    name: &str,
    profile: &FileProfile,
    rows: &RowSet,
    config: &ExplainConfig,
) -> Option<ReasonCandidate> {
    let date_columns = profile
        .columns
        .iter()
        .filter(|c| c.semantic_type == SemanticType::Date)
        .filter_map(|c| rows.column_index(&c.name).map(|idx| (c.name.as_str(), idx)))
        .collect::<Vec<_>>();
    let numeric_columns = profile
        .columns
        .iter()
        .filter(|c| c.dtype == DType::Float)
        .filter_map(|c| rows.column_index(&c.name).map(|idx| (c.name.as_str(), idx)))
        .collect::<Vec<_>>();
    if date_columns.is_empty() || numeric_columns.is_empty() {
        return None;
    }

    let mut best: Option<ReasonCandidate> = None;
    for &(date_column, date_idx) in &date_columns {
        let mut series: Vec<(NaiveDateTime, Vec<Option<f64>>)> = Vec::new();
        for row in 0..rows.len() {
            let Some(when) = coerce::parse_date_like(rows.cell(row, date_idx)) else {
                continue;
            };
            let values = numeric_columns
                .iter()
                .map(|&(_, idx)| coerce::to_number(rows.cell(row, idx)))
                .collect::<Vec<_>>();
            if values.iter().any(Option::is_some) {
                series.push((when, values));
            }
        }
        if series.len() < config.min_series_len {
            continue;
        }

        series.sort_by_key(|(when, _)| *when);
        let len = series.len();
        let window = (len / 5).max(3);
        let prev = &series[len.saturating_sub(2 * window)..len.saturating_sub(window)];
        let recent = &series[len.saturating_sub(window)..];

        for (slot, &(column, _)) in numeric_columns.iter().enumerate() {
            let values_in = |part: &[(NaiveDateTime, Vec<Option<f64>>)]| {
                part.iter().filter_map(|(_, v)| v[slot]).collect::<Vec<_>>()
            };
            let prev_values = values_in(prev);
            let recent_values = values_in(recent);
            if prev_values.len() < 2 || recent_values.len() < 2 {
                continue;
            }
            let (Some(prev_mean), Some(recent_mean)) =
                (stats::mean(&prev_values), stats::mean(&recent_values))
            else {
                continue;
            };
            let baseline = prev_mean.abs().max(1e-9);
            let change = (recent_mean - prev_mean).abs() / baseline;
            if change < config.recent_change_threshold {
                continue;
            }
            let candidate = ReasonCandidate {
                rule: RuleKind::RecentChange,
                score: score(change * 100.0),
                reason: format!(
                    "{name}:{column} recent mean shifted sharply ({:.1}%)",
                    change * 100.0
                ),
                evidence: evidence(json!({
                    "date_column": date_column,
                    "column": column,
                    "prev_mean": round_to(prev_mean, 4),
                    "recent_mean": round_to(recent_mean, 4),
                    "change_ratio": round_to(change, 4),
                })),
            };
            if best.as_ref().is_none_or(|b| candidate.score > b.score) {
                best = Some(candidate);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ProfilerConfig, profile::profile_csv_text};

    fn explain(text: &str) -> Vec<ReasonCandidate> {
        let profile = profile_csv_text(text, "data/sample.csv", None, &ProfilerConfig::default())
            .unwrap();
        let rows = RowSet::from_csv_text(text, "sample.csv").unwrap();
        generate_reason_candidates(
            "data/sample.csv",
            &profile,
            Some(&rows),
            &ExplainConfig::default(),
        )
    }

    #[test]
    fn half_missing_column_yields_single_candidate() {
        let candidates = explain("a,b\n1,x\n,y\n");
        assert_eq!(candidates.len(), 1);
        let only = &candidates[0];
        assert_eq!(only.rule, RuleKind::MissingConcentration);
        assert!((only.score - 50.0).abs() < 1e-9);
        assert!(only.reason.starts_with("sample.csv:a"));
        assert_eq!(only.evidence["column"], json!("a"));
    }

    #[test]
    fn dominant_category_is_reported() {
        let mut text = String::from("kind,id\n");
        for i in 0..10 {
            let kind = if i < 8 { "car" } else { "bus" };
            text.push_str(&format!("{kind},{i}\n"));
        }
        let candidates = explain(&text);
        assert_eq!(candidates[0].rule, RuleKind::CategoryBias);
        assert_eq!(candidates[0].score, 80.0);
        assert_eq!(candidates[0].evidence["top_value"], json!("car"));
    }

    #[test]
    fn mixed_units_are_detected() {
        let text = "weight\n10kg\n12kg\n3lb\n4lb\n5 g\n";
        let candidates = explain(text);
        let unit = candidates
            .iter()
            .find(|c| c.rule == RuleKind::UnitMismatch)
            .expect("unit candidate");
        assert_eq!(unit.evidence["units"], json!(["g", "kg", "lb"]));
        // two extra units and full coverage
        assert_eq!(unit.score, 86.0);
    }

    #[test]
    fn unit_pattern_rejects_long_or_digitless_tokens() {
        let pattern = UnitPattern::default();
        assert_eq!(pattern.extract("10KG"), Some("kg".to_string()));
        assert_eq!(pattern.extract("30%"), Some("%".to_string()));
        assert_eq!(pattern.extract("5개"), Some("개".to_string()));
        assert_eq!(pattern.extract("kg"), None);
        assert_eq!(pattern.extract("12kilograms"), None);
        assert!(UnitPattern::new("(", 8).is_err());
    }

    #[test]
    fn recent_mean_shift_is_detected() {
        let mut text = String::from("day,sales\n");
        for (day, sales) in [(1, 10), (2, 11), (3, 9), (4, 10), (5, 30), (6, 31), (7, 29)] {
            text.push_str(&format!("2024-01-0{day},{sales}\n"));
        }
        let candidates = explain(&text);
        let change = candidates
            .iter()
            .find(|c| c.rule == RuleKind::RecentChange)
            .expect("recent change candidate");
        assert_eq!(change.evidence["column"], json!("sales"));
        assert_eq!(change.evidence["date_column"], json!("day"));
        assert!(change.score >= 50.0);
    }

    #[test]
    fn recent_change_needs_rows_and_enough_points() {
        let text = "day,sales\n2024-01-01,1\n2024-01-02,100\n";
        let profile =
            profile_csv_text(text, "short.csv", None, &ProfilerConfig::default()).unwrap();
        assert!(needs_rows(&profile));
        let rows = RowSet::from_csv_text(text, "short.csv").unwrap();
        let candidates =
            generate_reason_candidates("short.csv", &profile, Some(&rows), &ExplainConfig::default());
        assert!(candidates.iter().all(|c| c.rule != RuleKind::RecentChange));
    }

    #[test]
    fn ties_keep_rule_order_and_top_k_applies() {
        // 'a' is 70% missing and 'b' is 70% one value, so both rules score 70.
        let mut text = String::from("a,b\n");
        for i in 0..10 {
            let a = if i < 7 { "" } else { "1" };
            let b = if i < 7 { "same" } else { ["p", "q", "r"][i - 7] };
            text.push_str(&format!("{a},{b}\n"));
        }
        let candidates = explain(&text);
        assert_eq!(candidates[0].rule, RuleKind::MissingConcentration);
        assert_eq!(candidates[1].rule, RuleKind::CategoryBias);
        assert_eq!(candidates[0].score, candidates[1].score);

        let profile =
            profile_csv_text(&text, "t.csv", None, &ProfilerConfig::default()).unwrap();
        let config = ExplainConfig {
            top_k: 1,
            ..ExplainConfig::default()
        };
        assert_eq!(generate_reason_candidates("t.csv", &profile, None, &config).len(), 1);
    }
}
