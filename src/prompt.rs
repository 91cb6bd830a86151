//! Analysis prompt assembly and the external model contract.
//!
//! The crate never talks to a model directly: it builds the prompt text and
//! hands it to a [`ModelRunner`]. [`CommandModel`] runs an external program,
//! feeds the prompt on stdin and returns what the program prints.

use std::{
    io::{Read, Write},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info};
use serde_json::json;

use crate::{
    error::{ExternalToolError, Result},
    multi::MultiFileReport,
    profile::FileProfile,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

const PREAMBLE: &str = "You are a data analysis assistant.\n\
Answer using only the data summary below.\n\
Answer format: Summary / Evidence / Limitations / Next steps\n";

fn assemble(question: &str, summary: &serde_json::Value) -> Result<String> {
    Ok(format!(
        "{PREAMBLE}\nQuestion: {question}\n\nData summary (JSON):\n{}",
        serde_json::to_string_pretty(summary)?
    ))
}

pub fn build_prompt(profile: &FileProfile, question: &str) -> Result<String> {
    assemble(question, &serde_json::to_value(profile)?)
}

/// Prompt over a multi-file report. Per-column detail is left out; the model
/// sees the shared structure, drift, insights and top reasons.
pub fn build_multi_file_prompt(report: &MultiFileReport) -> Result<String> {
    let files = report
        .files
        .iter()
        .map(|f| {
            json!({
                "path": f.path,
                "row_count": f.profile.row_count,
                "columns": f.profile.column_names(),
            })
        })
        .collect::<Vec<_>>();
    let summary = json!({
        "file_count": report.file_count,
        "total_row_count": report.total_row_count,
        "shared_columns": report.shared_columns,
        "files": files,
        "schema_drift": report.schema_drift,
        "insights": report.insights,
        "reason_candidates": report.reason_candidates,
    });
    assemble(&report.question, &summary)
}

/// Runs a prompt against a language model and returns its answer.
pub trait ModelRunner {
    fn run(&self, prompt: &str, timeout: Duration) -> Result<String>;
}

/// An external program that reads the prompt on stdin and answers on stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
}

impl CommandModel {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Splits a command line on whitespace: the first word is the program.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program).with_args(words))
    }
}

impl ModelRunner for CommandModel {
    fn run(&self, prompt: &str, timeout: Duration) -> Result<String> {
        info!("Running model command '{}'", self.program);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take();
        let input = prompt.to_string();
        let writer = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                // A program that exits without reading its input is not an error here.
                let _ = stdin.write_all(input.as_bytes());
            }
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_with_timeout(&mut child, timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExternalToolError::TimedOut { after: timeout }.into());
            }
        };
        let _ = writer.join();
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            return Err(ExternalToolError::NonZeroExit {
                status,
                stderr: stderr.trim().to_string(),
            }
            .into());
        }
        debug!("Model command returned {} byte(s)", stdout.len());
        Ok(stdout.trim().to_string())
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
