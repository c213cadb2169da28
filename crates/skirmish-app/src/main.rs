use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use skirmish_app::{JsonLinesObserver, load_config, run_headless};
use skirmish_core::{Battlefield, BattlefieldConfig, SpatialIndexKind, Visibility};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "skirmish",
    version,
    about = "Run the chaotic tactical battlefield simulation headless"
)]
struct Cli {
    /// JSON configuration file; flags below override its values.
    #[arg(long, env = "SKIRMISH_CONFIG")]
    config: Option<PathBuf>,

    /// Number of agents to deploy.
    #[arg(long)]
    agents: Option<usize>,

    /// Ticks to simulate before exiting.
    #[arg(long, default_value_t = 500)]
    ticks: u64,

    /// RNG seed for a reproducible battle.
    #[arg(long, env = "SKIRMISH_SEED")]
    seed: Option<u64>,

    /// Aggression threshold; the usual range is 0.5 to 2.0.
    #[arg(long, allow_negative_numbers = true)]
    aggression: Option<f32>,

    /// Whether agents see rivals as they move or as they stood at the start of the tick.
    #[arg(long, value_enum)]
    visibility: Option<VisibilityArg>,

    /// Spatial index used for rival detection.
    #[arg(long, value_enum)]
    index: Option<IndexArg>,

    /// Log a progress line every N ticks (0 disables).
    #[arg(long, default_value_t = 100)]
    summary_every: u64,

    /// Write one JSON object per tick to this file.
    #[arg(long)]
    jsonl: Option<PathBuf>,

    /// Include every agent's state in the JSON lines.
    #[arg(long, requires = "jsonl")]
    with_agents: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VisibilityArg {
    Sequential,
    Snapshot,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum IndexArg {
    Linear,
    Grid,
}

impl Cli {
    fn apply(&self, config: &mut BattlefieldConfig) {
        if let Some(agents) = self.agents {
            config.agent_count = agents;
        }
        if let Some(seed) = self.seed {
            config.rng_seed = Some(seed);
        }
        if let Some(aggression) = self.aggression {
            config.aggression_threshold = aggression;
        }
        if let Some(visibility) = self.visibility {
            config.visibility = match visibility {
                VisibilityArg::Sequential => Visibility::Sequential,
                VisibilityArg::Snapshot => Visibility::Snapshot,
            };
        }
        if let Some(index) = self.index {
            config.spatial_index = match index {
                IndexArg::Linear => SpatialIndexKind::LinearScan,
                IndexArg::Grid => SpatialIndexKind::UniformGrid,
            };
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply(&mut config);
    if !(0.5..=2.0).contains(&config.aggression_threshold) {
        warn!(
            aggression = config.aggression_threshold,
            "aggression threshold outside the usual 0.5..=2.0 range"
        );
    }

    let mut field = Battlefield::new(config).context("failed to deploy battlefield")?;
    if let Some(path) = &cli.jsonl {
        let file = File::create(path)
            .with_context(|| format!("failed to create tick log {}", path.display()))?;
        field.set_observer(Box::new(JsonLinesObserver::new(file, cli.with_agents)));
    }

    info!(
        agents = field.agent_count(),
        ticks = cli.ticks,
        aggression = field.aggression_threshold(),
        "Starting skirmish simulation"
    );
    let last = run_headless(&mut field, cli.ticks, cli.summary_every);

    match last {
        Some(summary) => {
            info!(
                tick = summary.tick.0,
                total_power = summary.total_power,
                "Battle finished"
            );
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to encode summary")?
            );
        }
        None => warn!("No ticks were simulated"),
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
