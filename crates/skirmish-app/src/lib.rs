//! Shared plumbing for the headless skirmish runner.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use skirmish_core::{Agent, BattleObserver, Battlefield, BattlefieldConfig, TickSummary};
use tracing::{info, warn};

/// Load a JSON battlefield configuration, falling back to defaults when no path is given.
///
/// Missing fields take their default values.
pub fn load_config(path: Option<&Path>) -> Result<BattlefieldConfig> {
    let Some(path) = path else {
        return Ok(BattlefieldConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

#[derive(Serialize)]
struct TickRecord<'a> {
    #[serde(flatten)]
    summary: &'a TickSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    agents: Option<&'a [Agent]>,
}

/// Observer writing one JSON object per tick.
pub struct JsonLinesObserver<W: Write + Send> {
    writer: BufWriter<W>,
    include_agents: bool,
    failed: bool,
}

impl<W: Write + Send> JsonLinesObserver<W> {
    #[must_use]
    pub fn new(writer: W, include_agents: bool) -> Self {
        Self {
            writer: BufWriter::new(writer),
            include_agents,
            failed: false,
        }
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|err| err.into_error())
            .context("failed to flush tick log")
    }

    fn write_record(&mut self, summary: &TickSummary, agents: &[Agent]) -> Result<()> {
        let record = TickRecord {
            summary,
            agents: self.include_agents.then_some(agents),
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> BattleObserver for JsonLinesObserver<W> {
    fn on_tick(&mut self, summary: &TickSummary, agents: &[Agent]) {
        if self.failed {
            return;
        }
        if let Err(err) = self.write_record(summary, agents) {
            // One warning, then stop; the simulation itself is unaffected.
            warn!(tick = summary.tick.0, error = %err, "tick log disabled after write failure");
            self.failed = true;
        }
    }
}

/// Advance `ticks` times, logging a summary every `summary_every` ticks (0 disables).
pub fn run_headless(
    field: &mut Battlefield,
    ticks: u64,
    summary_every: u64,
) -> Option<TickSummary> {
    let mut last = None;
    for _ in 0..ticks {
        let summary = field.advance();
        if summary_every > 0 && summary.tick.0.is_multiple_of(summary_every) {
            info!(
                tick = summary.tick.0,
                attacking = summary.attacking,
                maneuvering = summary.maneuvering,
                retreating = summary.retreating,
                total_power = summary.total_power,
                equilibrium = summary.equilibrium_applied,
                "battle progress"
            );
        }
        last = Some(summary);
    }
    last
}
