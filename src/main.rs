use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use signal_sim::optimization::Strategy;
use signal_sim::{SimConfig, TrafficSystem};

#[derive(Parser)]
#[command(name = "signal_sim")]
#[command(about = "Closed-loop traffic signal simulation")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value = "3000")]
    ticks: u32,

    /// Time delta per tick in seconds
    #[arg(long, default_value = "0.1")]
    delta: f32,

    /// Grid rows (overrides the config file)
    #[arg(long)]
    rows: Option<usize>,

    /// Grid columns (overrides the config file)
    #[arg(long)]
    cols: Option<usize>,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Optimization strategy (overrides the config file)
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Spawn probability per boundary point per second
    #[arg(long)]
    spawn_rate: Option<f32>,

    /// Log a progress line every N ticks (0 disables)
    #[arg(long, default_value = "100")]
    report_every: u32,

    /// Print the grid map with each progress line
    #[arg(long)]
    map: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,signal_sim=info"),
    )
    .init();

    let cli = Cli::parse();
    if cli.delta <= 0.0 {
        anyhow::bail!("--delta must be positive, got {}", cli.delta);
    }

    let mut config = match &cli.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    if let Some(rows) = cli.rows {
        config.grid.rows = rows;
    }
    if let Some(cols) = cli.cols {
        config.grid.cols = cols;
    }
    if let Some(rate) = cli.spawn_rate {
        config.grid.spawn_rate = rate;
    }
    if let Some(strategy) = cli.strategy {
        config.orchestrator.strategy = strategy;
    }

    let mut system =
        TrafficSystem::new(&config, cli.seed).context("Failed to build the simulation")?;

    info!(
        "Running {}x{} grid for {} ticks of {}s ({:?} strategy)",
        config.grid.rows, config.grid.cols, cli.ticks, cli.delta, config.orchestrator.strategy
    );
    if cli.map {
        system.world.print_summary();
        system.world.draw_map();
    }

    system.run(cli.ticks, cli.delta, cli.report_every, cli.map);
    system.shutdown();

    if cli.map {
        system.world.print_summary();
        system.world.draw_map();
    }
    system.log_report();
    Ok(())
}
