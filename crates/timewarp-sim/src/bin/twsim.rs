//! Timewarp simulation runner.
//!
//! # Quick Start
//!
//! ```bash
//! # Run the ping-pong workload with rendezvous every third token
//! twsim run --seed 42 --lps 8
//!
//! # Same, with groups of four and the sync journal written out
//! twsim run --seed 42 --groups 4 --journal sync.jsonl
//!
//! # Show the configuration a run would use
//! twsim config
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use timewarp_config::{ConfigLoader, TimewarpConfig};
use timewarp_sim::{PingPong, SimConfig, Simulation};
use tracing_subscriber::EnvFilter;

/// Deterministic Time Warp runs of the Timewarp sync core.
#[derive(Parser)]
#[command(name = "twsim")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding timewarp.toml (defaults to the current directory).
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ping-pong workload and print a JSON summary.
    Run {
        #[arg(long)]
        seed: Option<u64>,

        /// Number of logical processes.
        #[arg(long)]
        lps: Option<u32>,

        #[arg(long)]
        end_time: Option<f64>,

        #[arg(long)]
        max_steps: Option<u64>,

        /// Form static groups of SIZE members.
        #[arg(long, value_name = "SIZE")]
        groups: Option<u32>,

        /// Disable rendezvous synchronization.
        #[arg(long)]
        no_cross_state: bool,

        /// Deliver in order and run lowest timestamp first.
        #[arg(long)]
        conservative: bool,

        /// Write every sync event to this file as JSON lines.
        #[arg(long)]
        journal: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut loader = ConfigLoader::new();
    if let Some(dir) = &cli.project_dir {
        loader = loader.with_project_dir(dir);
    }
    let config = loader.load().context("failed to load configuration")?;
    init_tracing(&config);

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Run {
            seed,
            lps,
            end_time,
            max_steps,
            groups,
            no_cross_state,
            conservative,
            journal,
        } => {
            let mut config = config;
            if let Some(seed) = seed {
                config.simulation.seed = seed;
            }
            if let Some(lps) = lps {
                config.kernel.lps = lps;
            }
            if let Some(end_time) = end_time {
                config.simulation.end_time = end_time;
            }
            if let Some(max_steps) = max_steps {
                config.simulation.max_steps = max_steps;
            }
            if let Some(size) = groups {
                config.sync.groups = true;
                config.sync.group_size = size;
            }
            if no_cross_state {
                config.sync.cross_state = false;
                config.sync.groups = false;
            }
            if conservative {
                config.simulation.shuffle_delivery = false;
                config.simulation.optimistic = false;
            }
            if journal.is_some() {
                config.logging.journal = journal;
            }
            config.validate()?;
            run(&config)
        }
    }
}

fn init_tracing(config: &TimewarpConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.logging.ansi)
        .with_writer(std::io::stderr)
        .init();
}

fn run(config: &TimewarpConfig) -> Result<()> {
    let sim_config = SimConfig::from(config);
    let app = PingPong::new(sim_config.lps, config.simulation.rendezvous_period)
        .with_groups(&sim_config.group_layout());
    let mut sim = Simulation::new(sim_config, app)?;
    let summary = sim.run()?;

    if let Some(path) = &config.logging.journal {
        let file = File::create(path)
            .with_context(|| format!("failed to create journal {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for event in sim.journal() {
            serde_json::to_writer(&mut writer, event)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        tracing::info!(path = %path.display(), events = sim.journal().len(), "journal written");
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !summary.blocked.is_empty() {
        bail!("{} LPs still blocked at the end of the run", summary.blocked.len());
    }
    Ok(())
}
