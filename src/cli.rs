use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Profile CSV columns, detect drift and build analysis prompts",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Profile one or more CSV files and report drift across them
    Profile(ProfileArgs),
    /// Compare value distributions between a before and an after CSV
    Compare(CompareArgs),
    /// Print the content fingerprint of a CSV file
    Fingerprint(FingerprintArgs),
    /// Rank likely explanations for anomalies in a CSV file
    Explain(ExplainArgs),
    /// Flag missing, out-of-range or jumping coordinates
    Geo(GeoArgs),
    /// Build an analysis prompt and optionally run it through a model command
    Prompt(PromptArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Markdown,
    Table,
}

#[derive(Debug, Args)]
pub struct InputOptions {
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct CacheOptions {
    /// Directory holding cached profiles and lineage records
    #[arg(long = "cache-dir")]
    pub cache_dir: Option<PathBuf>,
    /// Always profile from scratch and leave the cache untouched
    #[arg(long = "no-cache")]
    pub no_cache: bool,
}

#[derive(Debug, Args)]
pub struct ProfileArgs {
    /// Input CSV files
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// Question recorded with the report
    #[arg(short = 'q', long, default_value = "")]
    pub question: String,
    /// Column to group target values by (requires --target-column)
    #[arg(long = "group-column")]
    pub group_column: Option<String>,
    /// Column whose values are counted per group (requires --group-column)
    #[arg(long = "target-column")]
    pub target_column: Option<String>,
    /// Worker threads for multi-file profiling (defaults to min(4, files))
    #[arg(long)]
    pub workers: Option<usize>,
    /// Report format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
    /// Write the report here instead of stdout
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Seed for the sampling reservoirs (a fixed default keeps runs reproducible)
    #[arg(long)]
    pub seed: Option<u64>,
    #[command(flatten)]
    pub input: InputOptions,
    #[command(flatten)]
    pub cache: CacheOptions,
}

#[derive(Debug, Args)]
pub struct CompareArgs {
    /// Baseline CSV file
    #[arg(long)]
    pub before: PathBuf,
    /// Changed CSV file
    #[arg(long)]
    pub after: PathBuf,
    /// Delimiter for both inputs (defaults by extension: .tsv is tab)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Equal-width bins for numeric columns
    #[arg(long, default_value_t = 10)]
    pub bins: usize,
    /// Report format (markdown falls back to json)
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
    /// Directory holding lineage records (defaults to <cache>/lineage)
    #[arg(long = "cache-dir")]
    pub cache_dir: Option<PathBuf>,
    /// Character encoding of both inputs (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct FingerprintArgs {
    /// Input CSV file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Source name folded into the fingerprint (defaults to the file name)
    #[arg(long = "source-name")]
    pub source_name: Option<String>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExplainArgs {
    /// Input CSV file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Number of candidates to keep
    #[arg(long, default_value_t = 3)]
    pub top: usize,
    /// Emit JSON instead of one line per candidate
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub input_options: InputOptions,
}

#[derive(Debug, Args)]
pub struct GeoArgs {
    /// Input CSV file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Latitude column
    #[arg(long, default_value = "lat")]
    pub lat: String,
    /// Longitude column
    #[arg(long, default_value = "lon")]
    pub lon: String,
    /// Distance from the previous valid point that marks a row suspect
    #[arg(long = "threshold-km", default_value_t = crate::geo::DEFAULT_THRESHOLD_KM)]
    pub threshold_km: f64,
    /// Annotated CSV output (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub input_options: InputOptions,
}

#[derive(Debug, Args)]
pub struct PromptArgs {
    /// Input CSV files; more than one builds a multi-file prompt
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// Question for the model
    #[arg(short = 'q', long)]
    pub question: String,
    /// Model command that reads the prompt on stdin, e.g. `ollama run llama3`
    #[arg(long = "model-cmd")]
    pub model_cmd: Option<String>,
    /// Seconds to wait for the model command
    #[arg(long = "timeout-secs", default_value_t = crate::prompt::DEFAULT_TIMEOUT.as_secs())]
    pub timeout_secs: u64,
    #[command(flatten)]
    pub input_options: InputOptions,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
