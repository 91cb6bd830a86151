//! Multi-file analysis: profiles several CSV files on a bounded worker pool,
//! then derives shared columns, schema drift, reason candidates and short
//! insight lines across them.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
    io,
    path::{Path, PathBuf},
};

use encoding_rs::{Encoding, UTF_8};
use itertools::Itertools;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    cache::ProfileCache,
    config::{ExplainConfig, ProfilerConfig},
    drift::{SchemaDriftRecord, schema_drift},
    error::{InsightError, Result},
    explain::{self, ReasonCandidate},
    io_utils,
    profile::{self, FileProfile, Grouping},
    rows::RowSet,
};

pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const MAX_INSIGHTS: usize = 30;
pub const TOP_REASONS: usize = 3;
const INSIGHT_MISSING_RATIO: f64 = 0.2;
const INSIGHT_OUTLIER_RATIO: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub profiler: ProfilerConfig,
    pub explain: ExplainConfig,
    pub grouping: Option<Grouping>,
    /// Worker threads; `None` uses `min(4, file count)`.
    pub workers: Option<usize>,
    pub delimiter: Option<u8>,
    pub encoding: &'static Encoding,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            profiler: ProfilerConfig::default(),
            explain: ExplainConfig::default(),
            grouping: None,
            workers: None,
            delimiter: None,
            encoding: UTF_8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileReport {
    pub path: String,
    pub profile: FileProfile,
    pub reason_candidates: Vec<ReasonCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedReason {
    pub file: String,
    #[serde(flatten)]
    pub candidate: ReasonCandidate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiFileReport {
    pub question: String,
    pub file_count: usize,
    pub total_row_count: u64,
    pub shared_columns: Vec<String>,
    pub union_columns: Vec<String>,
    pub files: Vec<FileReport>,
    pub schema_drift: BTreeMap<String, SchemaDriftRecord>,
    pub insights: Vec<String>,
    pub reason_candidates: Vec<RankedReason>,
}

fn worker_count(requested: Option<usize>, files: usize) -> usize {
    requested
        .filter(|w| *w > 0)
        .unwrap_or_else(|| DEFAULT_MAX_WORKERS.min(files))
        .clamp(1, files.max(1))
}

/// Profiles every path, consulting `cache` first when given.
///
/// Files are spread over a dedicated pool of `options.workers` threads.
/// Results come back in the order of `paths`; when several files fail, the
/// failure of the earliest one (in `paths` order) is returned.
pub fn profile_files(
    paths: &[PathBuf],
    options: &AnalyzeOptions,
    cache: Option<&ProfileCache>,
) -> Result<Vec<FileProfile>> {
    let workers = worker_count(options.workers, paths.len());
    if workers <= 1 {
        return paths
            .iter()
            .map(|path| load_or_profile(path, options, cache))
            .collect();
    }

    debug!("Profiling {} file(s) on {} worker(s)", paths.len(), workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("csv-insight-profile-{i}"))
        .build()?;
    let results = pool.install(|| {
        paths
            .par_iter()
            .map(|path| load_or_profile(path, options, cache))
            .collect::<Vec<_>>()
    });
    results.into_iter().collect()
}

fn load_or_profile(
    path: &Path,
    options: &AnalyzeOptions,
    cache: Option<&ProfileCache>,
) -> Result<FileProfile> {
    let grouping = options.grouping.as_ref();
    if let Some(profile) = cache.and_then(|c| c.load(path, grouping, &options.profiler)) {
        return Ok(profile);
    }
    let profile = profile::profile_path(
        path,
        options.delimiter,
        options.encoding,
        grouping,
        &options.profiler,
    )?;
    if let Some(cache) = cache
        && let Err(err) = cache.store(path, grouping, &options.profiler, &profile)
    {
        warn!("Failed to cache profile for {path:?}: {err}");
    }
    Ok(profile)
}

pub fn analyze_files(
    paths: &[PathBuf],
    question: &str,
    options: &AnalyzeOptions,
    cache: Option<&ProfileCache>,
) -> Result<MultiFileReport> {
    if paths.is_empty() {
        return Err(InsightError::EmptyInput(
            "at least one CSV path is required".to_string(),
        ));
    }
    if paths.iter().any(|p| io_utils::is_dash(p)) {
        return Err(InsightError::invalid_config(
            "reading from stdin ('-') is not supported for multi-file analysis; pass file paths",
        ));
    }
    if let Some(missing) = paths.iter().find(|p| !p.exists()) {
        return Err(InsightError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("CSV file not found: {}", missing.display()),
        )));
    }

    let profiles = profile_files(paths, options, cache)?;

    let mut files = Vec::with_capacity(profiles.len());
    for (path, profile) in paths.iter().zip(profiles) {
        let label = path.display().to_string();
        let rows = if explain::needs_rows(&profile) {
            let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
            Some(RowSet::from_path(path, delimiter, options.encoding)?)
        } else {
            None
        };
        let reason_candidates =
            explain::generate_reason_candidates(&label, &profile, rows.as_ref(), &options.explain);
        files.push(FileReport {
            path: label,
            profile,
            reason_candidates,
        });
    }

    let column_sets = files
        .iter()
        .map(|f| f.profile.column_names().into_iter().collect::<BTreeSet<_>>())
        .collect::<Vec<_>>();
    let union_columns = column_sets
        .iter()
        .flatten()
        .sorted()
        .dedup()
        .cloned()
        .collect::<Vec<_>>();
    let shared_columns = union_columns
        .iter()
        .filter(|c| column_sets.iter().all(|set| set.contains(*c)))
        .cloned()
        .collect::<Vec<_>>();

    let file_profiles = files.iter().map(|f| f.profile.clone()).collect::<Vec<_>>();
    let schema_drift = schema_drift(&file_profiles, &shared_columns);

    let mut reason_candidates = files
        .iter()
        .flat_map(|f| {
            f.reason_candidates.iter().map(|candidate| RankedReason {
                file: f.path.clone(),
                candidate: candidate.clone(),
            })
        })
        .collect::<Vec<_>>();
    reason_candidates.sort_by(|a, b| b.candidate.score.total_cmp(&a.candidate.score));
    reason_candidates.truncate(TOP_REASONS);

    let insights = generate_insights(&files, &schema_drift);
    let total_row_count = files.iter().map(|f| f.profile.row_count).sum();
    info!(
        "Analyzed {} file(s), {} row(s), {} shared column(s)",
        files.len(),
        total_row_count,
        shared_columns.len()
    );

    Ok(MultiFileReport {
        question: question.to_string(),
        file_count: files.len(),
        total_row_count,
        shared_columns,
        union_columns,
        files,
        schema_drift,
        insights,
        reason_candidates,
    })
}

pub fn generate_insights(
    files: &[FileReport],
    drift: &BTreeMap<String, SchemaDriftRecord>,
) -> Vec<String> {
    let mut insights = Vec::new();
    for file in files {
        for column in &file.profile.columns {
            if column.missing_ratio >= INSIGHT_MISSING_RATIO {
                insights.push(format!(
                    "{}:{} has a high missing ratio ({:.2}%)",
                    file.path,
                    column.name,
                    column.missing_ratio * 100.0
                ));
            }
            let outliers = column
                .numeric_distribution
                .as_ref()
                .map(|d| d.outlier_ratio)
                .unwrap_or(0.0);
            if outliers >= INSIGHT_OUTLIER_RATIO {
                insights.push(format!(
                    "{}:{} has a high outlier ratio ({:.2}%)",
                    file.path,
                    column.name,
                    outliers * 100.0
                ));
            }
        }
    }
    for (column, record) in drift {
        if record.dtype_changed {
            insights.push(format!(
                "Shared column {column} is typed differently across files"
            ));
        }
        if record.mean_range > 0.0 {
            insights.push(format!(
                "Shared column {column} mean varies across files by {:.4}",
                record.mean_range
            ));
        }
    }
    for file in files {
        for reason in file.reason_candidates.iter().take(TOP_REASONS) {
            insights.push(format!(
                "{} reason[{}] {}",
                file.path, reason.rule, reason.reason
            ));
        }
    }
    insights.truncate(MAX_INSIGHTS);
    insights
}

pub fn render_markdown(report: &MultiFileReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Multi-CSV analysis report\n");
    let _ = writeln!(out, "- Question: {}", report.question);
    let _ = writeln!(out, "- Files: {}", report.file_count);
    let _ = writeln!(out, "- Total rows: {}", report.total_row_count);
    let shared = if report.shared_columns.is_empty() {
        "(none)".to_string()
    } else {
        report.shared_columns.join(", ")
    };
    let _ = writeln!(out, "- Shared columns: {shared}\n");

    if !report.insights.is_empty() {
        let _ = writeln!(out, "## Key insights\n");
        for insight in report.insights.iter().take(10) {
            let _ = writeln!(out, "- {insight}");
        }
        out.push('\n');
    }

    for file in &report.files {
        let _ = writeln!(out, "## File: {}\n", file.path);
        let _ = writeln!(out, "- Rows: {}", file.profile.row_count);
        let _ = writeln!(out, "- Columns: {}\n", file.profile.column_count);
        let _ = writeln!(
            out,
            "| column | dtype | semantic type | missing ratio | unique ratio | dominant ratio |"
        );
        let _ = writeln!(out, "|---|---|---|---:|---:|---:|");
        for column in &file.profile.columns {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {:.4} | {:.4} | {:.4} |",
                column.name,
                column.dtype,
                column.semantic_type,
                column.missing_ratio,
                column.unique_ratio,
                column.dominant_value_ratio
            );
        }
        if let Some(table) = &file.profile.group_target_ratio {
            let _ = writeln!(
                out,
                "\n- Group ratios: {} x {}",
                table.group_column, table.target_column
            );
        }
        out.push('\n');
    }

    let _ = writeln!(out, "## Schema and distribution drift across files\n");
    let _ = writeln!(
        out,
        "| column | dtype changed | missing ratio range | dominant ratio range | mean range |"
    );
    let _ = writeln!(out, "|---|---|---:|---:|---:|");
    for (column, record) in &report.schema_drift {
        let _ = writeln!(
            out,
            "| {} | {} | {:.4} | {:.4} | {:.4} |",
            column,
            record.dtype_changed,
            record.missing_ratio_range,
            record.dominant_value_ratio_range,
            record.mean_range
        );
    }
    out
}
