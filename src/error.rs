//! Error types shared by the profiling, comparison and explanation modules.
//!
//! Library code returns [`Result`]; the command handlers in `lib.rs` wrap
//! these in `anyhow` with per-command context.

use std::{process::ExitStatus, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, InsightError>;

#[derive(Error, Debug)]
pub enum InsightError {
    /// The input has no parseable header row.
    #[error("CSV header not found in {source_name}")]
    HeaderMissing { source_name: String },

    /// Nothing to work on: no files, or a header without usable columns.
    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The external model collaborator failed; never retried here.
    #[error("External tool failed: {0}")]
    ExternalToolFailure(#[from] ExternalToolError),

    #[error("Failed to decode text: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Error, Debug)]
pub enum ExternalToolError {
    #[error("timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("exited with {status}: {stderr}")]
    NonZeroExit { status: ExitStatus, stderr: String },
}

impl InsightError {
    pub fn header_missing(source_name: impl Into<String>) -> Self {
        InsightError::HeaderMissing {
            source_name: source_name.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        InsightError::InvalidConfiguration(message.into())
    }
}
