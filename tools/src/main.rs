use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tools::{demo, SimConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "deltapack-tools",
    version,
    about = "deltapack simulation and inspection tools"
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the synthetic world and print a JSON report.
    Simulate {
        /// JSON config; flags below override its fields.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of ships.
        #[arg(long)]
        ships: Option<u32>,
        /// Number of pickups.
        #[arg(long)]
        pickups: Option<u32>,
        /// Number of ticks to simulate.
        #[arg(long)]
        ticks: Option<u32>,
        /// RNG seed for deterministic results.
        #[arg(long)]
        seed: Option<u64>,
        /// Ticks the delayed string table observer lags behind.
        #[arg(long)]
        delay: Option<u32>,
        /// Pack on the calling thread.
        #[arg(long)]
        sequential: bool,
        /// Ignore changed-offset lists and always diff.
        #[arg(long)]
        no_fast_path: bool,
        /// Cross-check every fast-path pack against a full diff.
        #[arg(long)]
        validate: bool,
        /// Write the report here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Exit with an error if any consistency check failed.
        #[arg(long)]
        strict: bool,
    },
    /// Print the demo schema's flattened layout as JSON.
    Schema {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Simulate {
            config,
            ships,
            pickups,
            ticks,
            seed,
            delay,
            sequential,
            no_fast_path,
            validate,
            out,
            strict,
        } => {
            let mut config = match config {
                Some(path) => load_config(&path)?,
                None => SimConfig::default(),
            };
            config.ships = ships.unwrap_or(config.ships);
            config.pickups = pickups.unwrap_or(config.pickups);
            config.ticks = ticks.unwrap_or(config.ticks);
            config.seed = seed.unwrap_or(config.seed);
            config.observer_delay = delay.unwrap_or(config.observer_delay);
            config.pack.parallel &= !sequential;
            config.pack.fast_path &= !no_fast_path;
            config.pack.validate |= validate;

            let report = tools::run(&config)?;
            let json = serde_json::to_string_pretty(&report).context("serialize report")?;
            emit(out.as_deref(), &json)?;
            if strict && !report.is_consistent() {
                bail!("simulation finished with consistency errors");
            }
        }
        Command::Schema { out } => {
            let registry = demo::registry().context("build demo schema")?;
            let json =
                serde_json::to_string_pretty(&demo::dump(&registry)).context("serialize schema")?;
            emit(out.as_deref(), &json)?;
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn load_config(path: &Path) -> Result<SimConfig> {
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parse config {}", path.display()))
}

fn emit(out: Option<&Path>, json: &str) -> Result<()> {
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create output dir {}", parent.display()))?;
            }
            fs::write(path, json).with_context(|| format!("write {}", path.display()))
        }
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
