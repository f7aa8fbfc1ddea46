use sqlfuzz_core::config::{FuzzerKind, SqlfuzzConfig};
use sqlfuzz_core::corpus::{load_seed_dir, save_population};
use sqlfuzz_core::coverage::GcovrCoverage;
use sqlfuzz_core::executor::CommandExecutor;
use sqlfuzz_core::fuzzer::Fuzzer;
use sqlfuzz_core::generator::GrammarFuzzer;
use sqlfuzz_core::grammar::Grammar;
use sqlfuzz_core::mutation_fuzzer::MutationFuzzer;
use sqlfuzz_core::{Campaign, CampaignReport};

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use rand_chacha::ChaCha8Rng;
use rand_core::{OsRng, SeedableRng, TryRngCore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{info, warn};

const DEFAULT_CONFIG_FILE: &str = "sqlfuzz.toml";

#[derive(ValueEnum, Debug, Clone, Copy)]
enum KindArg {
    Grammar,
    Mutation,
}

impl From<KindArg> for FuzzerKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Grammar => FuzzerKind::Grammar,
            KindArg::Mutation => FuzzerKind::Mutation,
        }
    }
}

/// Generate SQL inputs for a SQLite binary and track the branch coverage they reach.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration; `sqlfuzz.toml` in the current directory is used if present.
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    #[clap(short, long, value_enum)]
    fuzzer: Option<KindArg>,
    /// Number of generate/execute cycles.
    #[clap(short, long)]
    runs: Option<usize>,
    /// Measure coverage after every N cycles instead of only at the end.
    #[clap(long)]
    measure_every: Option<usize>,
    /// Keep inputs that increase coverage (mutation fuzzer only).
    #[clap(long)]
    feedback: bool,
    #[clap(long)]
    seed: Option<u64>,
    #[clap(long, value_parser)]
    grammar_file: Option<PathBuf>,
    #[clap(long, value_parser)]
    seed_dir: Option<PathBuf>,
    /// Write the final mutation population here as `<md5>.dat` files.
    #[clap(long, value_parser)]
    save_dir: Option<PathBuf>,
    /// Replace the target program, keeping configured arguments.
    #[clap(long)]
    target_command: Option<String>,
    /// Write the JSON report here instead of stdout.
    #[clap(long, value_parser)]
    report: Option<PathBuf>,
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_new(level)
        .map_err(|e| anyhow::anyhow!("Invalid log level '{level}': {e}"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn load_config(config_file: Option<&Path>) -> anyhow::Result<SqlfuzzConfig> {
    match config_file {
        Some(config_path) => {
            info!(?config_path, "loading configuration");
            Ok(SqlfuzzConfig::load_from_file(config_path)?)
        }
        None => {
            let default_config_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!(?default_config_path, "no config file specified, loading default");
                Ok(SqlfuzzConfig::load_from_file(default_config_path)?)
            } else {
                info!("no config file found, using built-in defaults");
                Ok(SqlfuzzConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut SqlfuzzConfig, cli: Cli) {
    let fuzzer = &mut config.fuzzer;
    if let Some(kind) = cli.fuzzer {
        fuzzer.kind = kind.into();
    }
    if let Some(runs) = cli.runs {
        fuzzer.runs = runs;
    }
    if cli.measure_every.is_some() {
        fuzzer.measure_every = cli.measure_every;
    }
    if cli.feedback {
        fuzzer.feedback_enabled = true;
    }
    if cli.seed.is_some() {
        fuzzer.rng_seed = cli.seed;
    }
    if cli.grammar_file.is_some() {
        fuzzer.grammar_file = cli.grammar_file;
    }
    if cli.seed_dir.is_some() {
        config.corpus.seed_dir = cli.seed_dir;
    }
    if cli.save_dir.is_some() {
        config.corpus.save_dir = cli.save_dir;
    }
    if let Some(target_cmd) = cli.target_command {
        match config.executor.command.first_mut() {
            Some(program) => *program = target_cmd,
            None => config.executor.command.push(target_cmd),
        }
    }
}

fn build_fuzzer(config: &SqlfuzzConfig) -> anyhow::Result<Box<dyn Fuzzer<ChaCha8Rng>>> {
    let settings = &config.fuzzer;
    match settings.kind {
        FuzzerKind::Grammar => {
            let grammar = match &settings.grammar_file {
                Some(path) => Grammar::load_from_file(path)
                    .with_context(|| format!("Failed to load grammar from {path:?}"))?,
                None => Grammar::create_table(),
            };
            grammar.validate().context("Grammar failed validation")?;
            let fuzzer =
                GrammarFuzzer::with_settings(Arc::new(grammar), settings.grammar_settings())?;
            Ok(Box::new(fuzzer))
        }
        FuzzerKind::Mutation => {
            let Some(seed_dir) = &config.corpus.seed_dir else {
                bail!(
                    "The mutation fuzzer needs a seed directory (--seed-dir or [corpus] seed-dir)"
                );
            };
            let seeds = load_seed_dir(seed_dir, &config.corpus.extension)?;
            info!(count = seeds.len(), ?seed_dir, "loaded seeds");
            let fuzzer =
                MutationFuzzer::new(seeds, settings.min_mutations, settings.max_mutations)?;
            Ok(Box::new(fuzzer))
        }
    }
}

fn write_report(
    report: &CampaignReport,
    rng_seed: u64,
    path: Option<&Path>,
) -> anyhow::Result<()> {
    let mut value = serde_json::to_value(report)?;
    if let Some(fields) = value.as_object_mut() {
        fields.insert("rng-seed".to_string(), rng_seed.into());
    }
    let json = serde_json::to_string_pretty(&value)?;
    match path {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {path:?}"))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let mut config = load_config(cli.config_file.as_deref())?;
    let report_path = cli.report.clone();
    apply_overrides(&mut config, cli);

    let rng_seed = match config.fuzzer.rng_seed {
        Some(seed) => seed,
        None => OsRng
            .try_next_u64()
            .map_err(|e| anyhow::anyhow!("Failed to draw an RNG seed from the OS: {e}"))?,
    };
    info!(rng_seed, "seeding random source");
    let mut rng = ChaCha8Rng::seed_from_u64(rng_seed);

    let fuzzer = build_fuzzer(&config)?;
    let executor = CommandExecutor::new(config.executor.to_executor_config());
    let coverage = GcovrCoverage::new(config.coverage.to_gcovr_settings());

    let mut campaign = Campaign::new(
        fuzzer,
        Box::new(executor),
        Box::new(coverage),
        config.fuzzer.campaign_options(),
    )?;

    let cancel = campaign.cancel_handle();
    ctrlc::set_handler(move || {
        if !cancel.swap(true, Ordering::Relaxed) {
            warn!("interrupt received, stopping after the current cycle");
        }
    })
    .context("Failed to install the Ctrl-C handler")?;

    let start_time = Instant::now();
    let report = campaign.run_campaign(config.fuzzer.runs, &mut rng)?;
    if report.cancelled {
        warn!(
            executions = report.executions,
            runs = report.runs_requested,
            "campaign interrupted before all runs completed"
        );
    }
    info!(elapsed = ?start_time.elapsed(), "fuzz loop finished");

    if let Some(save_dir) = &config.corpus.save_dir {
        match campaign.fuzzer().population() {
            Some(population) => {
                let written = save_population(save_dir, population, &config.corpus.extension)?;
                info!(written, ?save_dir, "saved population");
            }
            None => warn!("fuzzer keeps no population, nothing to save"),
        }
    }

    write_report(&report, rng_seed, report_path.as_deref())
}
