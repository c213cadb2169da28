//! Threat assessment: maps the power of visible rivals onto a tactical stance.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Rival;

/// Tactical mode an agent adopts for a single tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Attack,
    #[default]
    Maneuver,
    Retreat,
}

impl Stance {
    /// All stances in display order.
    pub const ALL: [Stance; 3] = [Stance::Attack, Stance::Maneuver, Stance::Retreat];

    /// Lowercase label used in logs and serialized output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Stance::Attack => "attack",
            Stance::Maneuver => "maneuver",
            Stance::Retreat => "retreat",
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threat-ratio bands scaled by the aggression threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreatBands {
    /// Aggression threshold `τ`; ratios strictly below it attack.
    pub threshold: f32,
    /// Multiplier on `τ` above which agents retreat.
    pub retreat_band: f32,
}

impl ThreatBands {
    #[must_use]
    pub const fn new(threshold: f32, retreat_band: f32) -> Self {
        Self {
            threshold,
            retreat_band,
        }
    }

    /// Map a threat ratio onto a stance. Both band edges belong to `Maneuver`.
    #[must_use]
    pub fn classify(&self, ratio: f32) -> Stance {
        let upper = self.retreat_band * self.threshold;
        if ratio < self.threshold {
            Stance::Attack
        } else if ratio <= upper {
            Stance::Maneuver
        } else {
            Stance::Retreat
        }
    }
}

impl Default for ThreatBands {
    fn default() -> Self {
        Self::new(1.0, 1.4)
    }
}

/// Result of assessing the visible rivals from one agent's point of view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreatAssessment {
    pub stance: Stance,
    /// `None` when no rivals are visible.
    pub ratio: Option<f32>,
}

/// Sum of rival power over the observer's own power, or `None` with nobody in sight.
///
/// `own_power` must be positive; the battlefield floor guarantees this.
#[must_use]
pub fn threat_ratio(own_power: f32, rivals: &[Rival]) -> Option<f32> {
    if rivals.is_empty() {
        return None;
    }
    debug_assert!(own_power > 0.0, "threat ratio requires positive power");
    let total: f32 = rivals.iter().map(|rival| rival.power).sum();
    Some(total / own_power)
}

/// Assess visible rivals; an empty rival set always yields `Maneuver`.
#[must_use]
pub fn assess(own_power: f32, rivals: &[Rival], bands: ThreatBands) -> ThreatAssessment {
    match threat_ratio(own_power, rivals) {
        Some(ratio) => ThreatAssessment {
            stance: bands.classify(ratio),
            ratio: Some(ratio),
        },
        None => ThreatAssessment {
            stance: Stance::Maneuver,
            ratio: None,
        },
    }
}
