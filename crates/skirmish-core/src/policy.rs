//! Movement policies for each stance.
//!
//! Every policy normalizes a base direction and then adds a bounded uniform perturbation
//! ("chaos"), so results are only approximately unit length. A zero-length base direction
//! is divided by one instead of its norm, which passes the zero vector through untouched.

use rand::{Rng, RngCore};

use crate::threat::Stance;
use crate::{MoveVector, Position, Rival};

/// Normalize `(dx, dy)`, treating a zero norm as one.
#[must_use]
pub fn normalize_or_raw(dx: f32, dy: f32) -> MoveVector {
    let mut norm = dx.hypot(dy);
    if norm == 0.0 {
        norm = 1.0;
    }
    MoveVector::new(dx / norm, dy / norm)
}

/// Uniform perturbation in `[-bound, bound]²`, x drawn before y.
pub fn jitter(rng: &mut dyn RngCore, bound: f32) -> MoveVector {
    let dx = rng.random_range(-bound..=bound);
    let dy = rng.random_range(-bound..=bound);
    MoveVector::new(dx, dy)
}

/// Weakest visible rival; the earliest one wins ties.
#[must_use]
pub fn weakest(rivals: &[Rival]) -> Option<&Rival> {
    rivals.iter().reduce(|best, rival| {
        if rival.power < best.power {
            rival
        } else {
            best
        }
    })
}

/// Mean position of the visible rivals.
#[must_use]
pub fn centroid(rivals: &[Rival]) -> Option<Position> {
    if rivals.is_empty() {
        return None;
    }
    let count = rivals.len() as f32;
    let (sum_x, sum_y) = rivals.iter().fold((0.0_f32, 0.0_f32), |(x, y), rival| {
        (x + rival.position.x, y + rival.position.y)
    });
    Some(Position::new(sum_x / count, sum_y / count))
}

/// Head toward the weakest visible rival, falling back to the defensive pattern.
pub fn attack_vector(
    origin: Position,
    rivals: &[Rival],
    chaos: f32,
    rng: &mut dyn RngCore,
) -> MoveVector {
    let Some(target) = weakest(rivals) else {
        return defensive_vector(chaos, rng);
    };
    let direction = normalize_or_raw(target.position.x - origin.x, target.position.y - origin.y);
    direction + jitter(rng, chaos)
}

/// Random heading with half-strength chaos.
pub fn defensive_vector(chaos: f32, rng: &mut dyn RngCore) -> MoveVector {
    let raw_x = rng.random_range(-1.0..=1.0);
    let raw_y = rng.random_range(-1.0..=1.0);
    normalize_or_raw(raw_x, raw_y) + jitter(rng, chaos * 0.5)
}

/// Move directly away from the centroid of visible rivals.
pub fn escape_vector(
    origin: Position,
    rivals: &[Rival],
    chaos: f32,
    rng: &mut dyn RngCore,
) -> MoveVector {
    let Some(center) = centroid(rivals) else {
        return defensive_vector(chaos, rng);
    };
    let direction = normalize_or_raw(origin.x - center.x, origin.y - center.y);
    direction + jitter(rng, chaos)
}

/// Dispatch to the policy matching `stance`.
pub fn policy_vector(
    stance: Stance,
    origin: Position,
    rivals: &[Rival],
    chaos: f32,
    rng: &mut dyn RngCore,
) -> MoveVector {
    match stance {
        Stance::Attack => attack_vector(origin, rivals, chaos, rng),
        Stance::Maneuver => defensive_vector(chaos, rng),
        Stance::Retreat => escape_vector(origin, rivals, chaos, rng),
    }
}
