//! flower-exchange CLI - run a market from a scenario file or a seed

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use flower_exchange::{run, AllocationMode, LogSink, MarketConfig, MarketError, Scenario};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Lowest ask wins
    BestPrice,
    /// First eligible seller by id
    FirstFit,
}

impl From<Mode> for AllocationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::BestPrice => AllocationMode::BestPrice,
            Mode::FirstFit => AllocationMode::FirstFit,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "flower-exchange")]
#[command(about = "Round-based double-auction flower market")]
#[command(version)]
struct Cli {
    /// Scenario JSON file (defaults to the built-in flower market)
    #[arg(short, long, value_name = "PATH", conflicts_with = "seed")]
    scenario: Option<PathBuf>,

    /// Generate a random scenario from this seed
    #[arg(long)]
    seed: Option<u64>,

    /// Sellers in a generated scenario
    #[arg(long, default_value_t = 5, requires = "seed")]
    sellers: usize,

    /// Buyers in a generated scenario
    #[arg(long, default_value_t = 50, requires = "seed")]
    buyers: usize,

    /// Base configuration JSON file; flags below override it
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Worker threads per process
    #[arg(short, long, env = "MARKET_WORKERS")]
    workers: Option<usize>,

    /// Cooperating ranks
    #[arg(short, long, env = "MARKET_PROCESSES")]
    processes: Option<usize>,

    #[arg(long)]
    max_rounds: Option<u64>,

    #[arg(long)]
    price_floor: Option<f64>,

    #[arg(long)]
    decay_step: Option<f64>,

    /// Decay every ask each open round, not just untraded ones
    #[arg(long)]
    decay_every_round: bool,

    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn config(&self) -> Result<MarketConfig, MarketError> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => MarketConfig::default(),
        };
        if let Some(workers) = self.workers {
            config = config.with_worker_count(workers);
        }
        if let Some(processes) = self.processes {
            config = config.with_process_count(processes);
        }
        if let Some(max_rounds) = self.max_rounds {
            config = config.with_max_rounds(max_rounds);
        }
        if let Some(floor) = self.price_floor {
            config = config.with_price_floor(floor);
        }
        if let Some(step) = self.decay_step {
            config = config.with_price_decay_step(step);
        }
        if self.decay_every_round {
            config = config.with_decay_only_on_no_trade(false);
        }
        if let Some(mode) = self.mode {
            config = config.with_allocation_mode(mode.into());
        }
        Ok(config)
    }

    fn scenario(&self) -> Result<Scenario, MarketError> {
        match (&self.scenario, self.seed) {
            (Some(path), _) => Scenario::load(path),
            (None, Some(seed)) => Ok(Scenario::random(seed, self.sellers, self.buyers)),
            (None, None) => Ok(Scenario::flower_market()),
        }
    }
}

fn main() -> Result<(), MarketError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;
    let scenario = cli.scenario()?;

    info!(
        sellers = scenario.sellers.len(),
        buyers = scenario.buyers.len(),
        workers = config.worker_count,
        processes = config.process_count,
        mode = ?config.allocation_mode,
        "starting market"
    );

    let report = run(&scenario, &config, &mut LogSink).map_err(|e| {
        tracing::error!(error = %e, "market aborted");
        e
    })?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
