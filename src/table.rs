//! Plain-text tables for terminal output.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::{compare::ComparisonReport, geo::GeoFlag, profile::FileProfile};

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(3);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

/// One line per column: type, missingness, cardinality and top value.
pub fn render_profile(profile: &FileProfile) -> String {
    let headers = [
        "column", "dtype", "semantic", "missing", "unique~", "dominant", "top value",
    ]
    .map(String::from);
    let rows = profile
        .columns
        .iter()
        .map(|c| {
            let mut top = c
                .top_values
                .first()
                .map(|t| format!("{} ({})", t.value, t.count))
                .unwrap_or_default();
            if c.top_values_capped {
                top.push_str(" *");
            }
            vec![
                c.name.clone(),
                c.dtype.to_string(),
                c.semantic_type.to_string(),
                format!("{:.4}", c.missing_ratio),
                c.unique_count_estimate.to_string(),
                format!("{:.4}", c.dominant_value_ratio),
                top,
            ]
        })
        .collect::<Vec<_>>();
    let mut out = format!(
        "{}: {} row(s), {} column(s)\n",
        profile.source, profile.row_count, profile.column_count
    );
    out.push_str(&render_table(&headers, &rows));
    out
}

pub fn render_comparison(report: &ComparisonReport) -> String {
    let headers = ["column", "type", "buckets", "psi", "js", "chi2"].map(String::from);
    let rows = report
        .column_metrics
        .iter()
        .map(|(name, drift)| {
            vec![
                name.clone(),
                format!("{:?}", drift.kind).to_lowercase(),
                drift.buckets.len().to_string(),
                format!("{:.6}", drift.psi),
                format!("{:.6}", drift.js_divergence),
                format!("{:.6}", drift.chi_square),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

pub fn render_geo_flags(flags: &[GeoFlag]) -> String {
    let headers = ["row", "suspect", "reason", "distance_km"].map(String::from);
    let rows = flags
        .iter()
        .filter(|f| f.is_suspect)
        .map(|f| {
            vec![
                (f.row + 1).to_string(),
                f.is_suspect.to_string(),
                f.suspect_reason(),
                f.distance_km.map(|d| format!("{d:.3}")).unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut cells = Vec::with_capacity(values.len());
    for (value, width) in values.iter().zip(widths) {
        let sanitized = sanitize_cell(value);
        let padding = width.saturating_sub(display_width(&sanitized));
        let mut cell = sanitized.into_owned();
        cell.push_str(&" ".repeat(padding));
        cells.push(cell);
    }
    cells.join("  ").trim_end().to_string()
}

/// Terminal columns occupied by `value`: Hangul and CJK ideographs count
/// double and ANSI colour sequences count zero.
fn display_width(value: &str) -> usize {
    let mut width = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else if is_wide(ch) {
            width += 2;
        } else {
            width += 1;
        }
    }
    width
}

fn is_wide(ch: char) -> bool {
    matches!(ch,
        '\u{1100}'..='\u{115F}'
        | '\u{2E80}'..='\u{303E}'
        | '\u{3041}'..='\u{33FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7A3}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FF00}'..='\u{FF60}'
        | '\u{FFE0}'..='\u{FFE6}')
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
