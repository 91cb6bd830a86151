pub mod cache;
pub mod cli;
pub mod coerce;
pub mod compare;
pub mod config;
pub mod drift;
pub mod error;
pub mod explain;
pub mod frequency;
pub mod geo;
pub mod io_utils;
pub mod multi;
pub mod profile;
pub mod prompt;
pub mod rows;
pub mod sketch;
pub mod stats;
pub mod table;
pub mod versioning;

use std::{env, fs, io::Write, path::Path, sync::OnceLock, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cache::ProfileCache,
    cli::{Cli, Commands, OutputFormat},
    config::{CacheConfig, CompareConfig, ExplainConfig, ProfilerConfig},
    multi::AnalyzeOptions,
    profile::Grouping,
    prompt::{CommandModel, ModelRunner},
    rows::RowSet,
    versioning::LineageStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_insight", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Profile(args) => handle_profile(&args),
        Commands::Compare(args) => handle_compare(&args),
        Commands::Fingerprint(args) => handle_fingerprint(&args),
        Commands::Explain(args) => handle_explain(&args),
        Commands::Geo(args) => handle_geo(&args),
        Commands::Prompt(args) => handle_prompt(&args),
    }
}

fn handle_profile(args: &cli::ProfileArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input.input_encoding.as_deref())?;
    let grouping = Grouping::from_options(
        args.group_column.as_deref(),
        args.target_column.as_deref(),
    )?;
    let mut profiler = ProfilerConfig::default();
    if let Some(seed) = args.seed {
        profiler.seed = Some(seed);
    }
    let options = AnalyzeOptions {
        profiler,
        explain: ExplainConfig::default(),
        grouping,
        workers: args.workers,
        delimiter: args.input.delimiter,
        encoding,
    };
    let cache = (!args.cache.no_cache).then(|| {
        let dir = args
            .cache
            .cache_dir
            .clone()
            .unwrap_or_else(|| CacheConfig::default().dir);
        debug!("Using profile cache at {dir:?}");
        ProfileCache::new(CacheConfig::with_dir(dir))
    });

    info!("Profiling {} file(s)", args.inputs.len());
    let report = multi::analyze_files(&args.inputs, &args.question, &options, cache.as_ref())
        .with_context(|| format!("Profiling {:?}", args.inputs))?;

    let rendered = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&report)?,
        OutputFormat::Markdown => multi::render_markdown(&report),
        OutputFormat::Table => {
            let mut out = String::new();
            for file in &report.files {
                out.push_str(&table::render_profile(&file.profile));
                out.push('\n');
            }
            for insight in &report.insights {
                out.push_str(&format!("- {insight}\n"));
            }
            out
        }
    };
    write_output(args.output.as_deref(), &rendered)
}

fn handle_compare(args: &cli::CompareArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let cache_config = args
        .cache_dir
        .clone()
        .map(CacheConfig::with_dir)
        .unwrap_or_default();
    let lineage = LineageStore::new(cache_config.lineage_dir());
    let config = CompareConfig {
        num_bins: args.bins,
        ..CompareConfig::default()
    };
    let report = compare::compare_csv_files(
        &args.before,
        &args.after,
        args.delimiter,
        encoding,
        &config,
        &lineage,
    )
    .with_context(|| format!("Comparing {:?} with {:?}", args.before, args.after))?;
    info!("Lineage recorded at {:?}", report.lineage_path);

    let rendered = match args.format {
        OutputFormat::Table => table::render_comparison(&report),
        OutputFormat::Json | OutputFormat::Markdown => serde_json::to_string_pretty(&report)?,
    };
    write_output(None, &rendered)
}

fn handle_fingerprint(args: &cli::FingerprintArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let text = io_utils::read_text(&args.input, encoding)
        .with_context(|| format!("Reading {:?}", args.input))?;
    let source_name = args
        .source_name
        .clone()
        .unwrap_or_else(|| io_utils::source_label(&args.input));
    let version = versioning::fingerprint(&text, &source_name, None);
    write_output(None, &serde_json::to_string_pretty(&version)?)
}

fn handle_explain(args: &cli::ExplainArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_options.input_encoding.as_deref())?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.input_options.delimiter);
    let profile = profile::profile_path(
        &args.input,
        Some(delimiter),
        encoding,
        None,
        &ProfilerConfig::default(),
    )
    .with_context(|| format!("Profiling {:?}", args.input))?;
    let rows = if explain::needs_rows(&profile) {
        Some(
            RowSet::from_path(&args.input, delimiter, encoding)
                .with_context(|| format!("Reading rows from {:?}", args.input))?,
        )
    } else {
        None
    };
    let config = ExplainConfig {
        top_k: args.top,
        ..ExplainConfig::default()
    };
    let label = args.input.display().to_string();
    let candidates = explain::generate_reason_candidates(&label, &profile, rows.as_ref(), &config);
    info!("{} reason candidate(s) for {label}", candidates.len());

    let rendered = if args.json {
        serde_json::to_string_pretty(&candidates)?
    } else {
        candidates
            .iter()
            .map(|c| format!("[{:>6.2}] {}: {}\n", c.score, c.rule, c.reason))
            .collect::<String>()
    };
    write_output(None, &rendered)
}

fn handle_geo(args: &cli::GeoArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_options.input_encoding.as_deref())?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.input_options.delimiter);
    let rows = RowSet::from_path(&args.input, delimiter, encoding)
        .with_context(|| format!("Reading {:?}", args.input))?;
    let flags = geo::flag_geo_suspects(&rows, &args.lat, &args.lon, args.threshold_km)
        .with_context(|| format!("Flagging coordinates in {:?}", args.input))?;
    let suspects = flags.iter().filter(|f| f.is_suspect).count();
    info!(
        "{} of {} row(s) flagged as suspect in {:?}",
        suspects,
        flags.len(),
        args.input
    );
    let mut writer = io_utils::open_csv_writer(args.output.as_deref(), delimiter)?;
    geo::write_annotated(&rows, &flags, &mut writer)
        .with_context(|| "Writing annotated rows".to_string())?;
    if args.output.is_some() {
        eprint!("{}", table::render_geo_flags(&flags));
    }
    Ok(())
}

fn handle_prompt(args: &cli::PromptArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_options.input_encoding.as_deref())?;
    let prompt = if let [single] = args.inputs.as_slice() {
        let profile = profile::profile_path(
            single,
            args.input_options.delimiter,
            encoding,
            None,
            &ProfilerConfig::default(),
        )
        .with_context(|| format!("Profiling {single:?}"))?;
        prompt::build_prompt(&profile, &args.question)?
    } else {
        let options = AnalyzeOptions {
            delimiter: args.input_options.delimiter,
            encoding,
            ..AnalyzeOptions::default()
        };
        let report = multi::analyze_files(&args.inputs, &args.question, &options, None)
            .with_context(|| format!("Profiling {:?}", args.inputs))?;
        prompt::build_multi_file_prompt(&report)?
    };

    let Some(command_line) = &args.model_cmd else {
        return write_output(None, &prompt);
    };
    let model = CommandModel::from_command_line(command_line)
        .ok_or_else(|| anyhow!("--model-cmd must name a program"))?;
    let answer = model
        .run(&prompt, Duration::from_secs(args.timeout_secs))
        .with_context(|| format!("Running model command '{command_line}'"))?;
    write_output(None, &answer)
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) if !io_utils::is_dash(path) => {
            fs::write(path, text).with_context(|| format!("Writing {path:?}"))?;
            info!("Report written to {path:?}");
        }
        _ => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}
