//! mc-descriptors CLI - Monte Carlo descriptor-subset search.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use mc_descriptors::{
    compute::{ArtifactAssembler, ArtifactError, ProcessEvaluator, SearchController, SearchError},
    schema::{ConfigError, Dataset, DatasetError, SearchConfig, TrialRecord},
};

#[derive(Parser)]
#[command(name = "mc-descriptors")]
#[command(about = "Monte Carlo descriptor-subset search over an external regression evaluator")]
#[command(version)]
struct Cli {
    /// Dataset file: tag column, target column, then descriptor columns
    #[arg(required_unless_present = "example_config")]
    dataset: Option<PathBuf>,

    /// Number of descriptors per subset
    #[arg(required_unless_present = "example_config")]
    subset_size: Option<usize>,

    /// Number of accepted trials to produce
    #[arg(required_unless_present = "example_config")]
    trials: Option<usize>,

    /// Seed for subset sampling
    #[arg(required_unless_present = "example_config")]
    seed: Option<u64>,

    /// Reject subsets whose largest absolute pairwise correlation exceeds this
    #[arg(long, visible_alias = "maxpw", value_name = "THRESHOLD")]
    max_pairwise_correlation: Option<f64>,

    /// JSON configuration file; explicit flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Evaluator executable
    #[arg(long)]
    evaluator: Option<PathBuf>,

    /// Extra evaluator argument placed before the artifact path (repeatable)
    #[arg(long = "evaluator-arg", allow_hyphen_values = true)]
    evaluator_args: Vec<String>,

    /// Prefix of the evaluator's summary line
    #[arg(long)]
    marker: Option<String>,

    /// Per-evaluation time limit in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Block prepended to every matrix artifact
    #[arg(long)]
    header: Option<PathBuf>,

    /// Block appended to every matrix artifact
    #[arg(long)]
    trailer: Option<PathBuf>,

    /// Minimum column-name width in the matrix artifact
    #[arg(long)]
    tag_width: Option<usize>,

    /// Dataset field delimiter
    #[arg(long)]
    delimiter: Option<char>,

    /// Abort after this many attempts (rejected and failed included)
    #[arg(long)]
    max_attempts: Option<u64>,

    /// Number of candidates evaluated concurrently
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Output format for accepted trials
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the default configuration as JSON and exit
    #[arg(long)]
    example_config: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// `Step N: ['A', 'B'] | <summary>`
    Text,
    /// One JSON object per line
    Json,
}

/// Everything that aborts a run before or during the search.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("Matrix boilerplate: {0}")]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("Cannot render configuration: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    if cli.example_config {
        println!("{}", serde_json::to_string_pretty(&SearchConfig::default())?);
        return Ok(());
    }

    let config = build_config(&cli)?;
    config.validate()?;

    // clap enforces the positional arguments outside --example-config
    let Some(dataset_path) = cli.dataset else {
        return Ok(());
    };

    let dataset = Dataset::load(&dataset_path, config.delimiter)?;
    log::info!(
        "Loaded {} systems with {} descriptors from {}",
        dataset.row_count(),
        dataset.descriptor_names().len(),
        dataset_path.display()
    );

    let assembler = ArtifactAssembler::from_config(&config.artifact)?;
    let evaluator = ProcessEvaluator::from_config(&config.evaluator).map_err(SearchError::from)?;
    let mut controller = SearchController::new(config, dataset, assembler, evaluator)?;

    let format = cli.format;
    controller.run_with_callback(|trial| print_trial(trial, format))?;
    Ok(())
}

fn build_config(cli: &Cli) -> Result<SearchConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => SearchConfig::from_json_file(path)?,
        None => SearchConfig::default(),
    };

    if let Some(subset_size) = cli.subset_size {
        config.subset_size = subset_size;
    }
    if let Some(trials) = cli.trials {
        config.trials = trials;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if cli.max_pairwise_correlation.is_some() {
        config.max_pairwise_correlation = cli.max_pairwise_correlation;
    }
    if cli.max_attempts.is_some() {
        config.max_attempts = cli.max_attempts;
    }
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    if let Some(delimiter) = cli.delimiter {
        config.delimiter = delimiter;
    }
    if let Some(program) = &cli.evaluator {
        config.evaluator.program = program.clone();
    }
    if !cli.evaluator_args.is_empty() {
        config.evaluator.args = cli.evaluator_args.clone();
    }
    if let Some(marker) = &cli.marker {
        config.evaluator.marker = marker.clone();
    }
    if cli.timeout_secs.is_some() {
        config.evaluator.timeout_secs = cli.timeout_secs;
    }
    if let Some(header) = &cli.header {
        config.artifact.header_path = header.clone();
    }
    if let Some(trailer) = &cli.trailer {
        config.artifact.trailer_path = trailer.clone();
    }
    if let Some(tag_width) = cli.tag_width {
        config.artifact.tag_width = tag_width;
    }

    Ok(config)
}

fn print_trial(trial: &TrialRecord, format: OutputFormat) {
    match format {
        OutputFormat::Text => println!("{trial}"),
        OutputFormat::Json => match serde_json::to_string(trial) {
            Ok(line) => println!("{line}"),
            Err(e) => log::error!("Cannot serialize trial {}: {e}", trial.index),
        },
    }
}
