//! Dataset fingerprints and before/after lineage records.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::{
    cache::write_atomic,
    error::Result,
};

pub const FINGERPRINT_PREFIX_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetVersion {
    pub fingerprint: String,
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
}

impl DatasetVersion {
    pub fn short_fingerprint(&self) -> &str {
        let end = self.fingerprint.len().min(FINGERPRINT_PREFIX_LEN);
        &self.fingerprint[..end]
    }
}

/// Content hash of a CSV snapshot.
///
/// Blank lines and trailing whitespace are ignored; the header is the first
/// remaining line split on commas. The hash covers the source name, header,
/// row count, normalised text and `meta`, serialised as JSON with sorted keys,
/// so identical inputs always produce the same fingerprint.
pub fn fingerprint(csv_text: &str, source_name: &str, meta: Option<&Map<String, Value>>) -> DatasetVersion {
    let lines = csv_text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>();
    let columns: Vec<String> = lines
        .first()
        .map(|header| header.trim_start().split(',').map(str::to_string).collect())
        .unwrap_or_default();
    let row_count = lines.len().saturating_sub(1);

    // serde_json maps are ordered by key, which makes this encoding canonical.
    let payload = json!({
        "source_name": source_name,
        "columns": columns,
        "row_count": row_count,
        "csv_text": lines.join("\n"),
        "meta": meta.cloned().unwrap_or_default(),
    });
    let digest = Sha256::digest(payload.to_string().as_bytes());

    DatasetVersion {
        fingerprint: format!("{digest:x}"),
        row_count,
        column_count: columns.len(),
        columns,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionSummary {
    pub source_name: String,
    pub fingerprint: String,
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
}

impl VersionSummary {
    fn new(version: &DatasetVersion, source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            fingerprint: version.fingerprint.clone(),
            row_count: version.row_count,
            column_count: version.column_count,
            columns: version.columns.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineageLink {
    /// RFC 3339, UTC.
    pub created_at: String,
    pub before: VersionSummary,
    pub after: VersionSummary,
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Directory of lineage records, one file per (before, after) pair.
#[derive(Debug, Clone)]
pub struct LineageStore {
    dir: PathBuf,
}

impl LineageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn link_path(&self, before: &DatasetVersion, after: &DatasetVersion) -> PathBuf {
        self.dir.join(format!(
            "{}__{}.json",
            before.short_fingerprint(),
            after.short_fingerprint()
        ))
    }

    /// Writes the link for `before -> after`. Recording the same pair again
    /// replaces the file with identical content apart from `created_at`.
    pub fn record(
        &self,
        before: &DatasetVersion,
        after: &DatasetVersion,
        before_source: &str,
        after_source: &str,
        context: Map<String, Value>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let link = LineageLink {
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            before: VersionSummary::new(before, before_source),
            after: VersionSummary::new(after, after_source),
            context,
        };
        let path = self.link_path(before, after);
        write_atomic(&path, serde_json::to_string_pretty(&link)?.as_bytes())?;
        debug!("Recorded lineage {path:?}");
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<LineageLink> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
