//! Core simulation engine for the skirmish battlefield.
//!
//! A fixed population of agents lives in a square arena. Every tick each agent scans for
//! rivals inside the detection radius, derives a stance from the threat they pose, moves
//! along the matching policy vector and pays a stance-dependent power cost. Once all agents
//! have moved, a population-wide equilibrium bonus keeps total power from collapsing.

use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use skirmish_index::{IndexError, LinearScanIndex, NeighborhoodIndex, UniformGridIndex};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::Add;
use thiserror::Error;
use tracing::{debug, trace, warn};

pub mod policy;
pub mod threat;

pub use threat::{Stance, ThreatAssessment, ThreatBands};

/// Stable agent identity assigned at deployment.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct AgentId(pub u32);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// High level simulation clock (ticks processed since construction).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Point inside the arena.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Hard clamp into `[0, extent]²`.
    #[must_use]
    pub fn clamped(self, extent: f32) -> Self {
        Self::new(self.x.clamp(0.0, extent), self.y.clamp(0.0, extent))
    }

    #[must_use]
    pub fn within(self, extent: f32) -> bool {
        (0.0..=extent).contains(&self.x) && (0.0..=extent).contains(&self.y)
    }

    const fn as_pair(self) -> (f32, f32) {
        (self.x, self.y)
    }
}

/// Movement direction produced by a stance policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MoveVector {
    pub dx: f32,
    pub dy: f32,
}

impl MoveVector {
    #[must_use]
    pub const fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }

    #[must_use]
    pub fn length(self) -> f32 {
        self.dx.hypot(self.dy)
    }

    #[must_use]
    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.dx * factor, self.dy * factor)
    }
}

impl Add for MoveVector {
    type Output = MoveVector;

    fn add(self, rhs: MoveVector) -> MoveVector {
        MoveVector::new(self.dx + rhs.dx, self.dy + rhs.dy)
    }
}

/// Deployment label drawn at random for each agent. Carried for display only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Doctrine {
    #[default]
    Active,
    Passive,
}

/// What an observing agent knows about one visible rival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rival {
    pub id: AgentId,
    pub position: Position,
    pub power: f32,
}

impl Rival {
    #[must_use]
    pub const fn new(id: AgentId, position: Position, power: f32) -> Self {
        Self {
            id,
            position,
            power,
        }
    }
}

/// Output of an agent's decision for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub stance: Stance,
    pub vector: MoveVector,
    pub threat_ratio: Option<f32>,
}

/// A single combatant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    id: AgentId,
    doctrine: Doctrine,
    power: f32,
    position: Position,
    stance: Stance,
    vector: MoveVector,
    threat_ratio: Option<f32>,
}

impl Agent {
    /// New agent standing still in `Maneuver`.
    #[must_use]
    pub fn new(id: AgentId, power: f32, position: Position) -> Self {
        Self {
            id,
            doctrine: Doctrine::default(),
            power,
            position,
            stance: Stance::Maneuver,
            vector: MoveVector::default(),
            threat_ratio: None,
        }
    }

    #[must_use]
    pub fn with_doctrine(mut self, doctrine: Doctrine) -> Self {
        self.doctrine = doctrine;
        self
    }

    #[must_use]
    pub const fn id(&self) -> AgentId {
        self.id
    }

    #[must_use]
    pub const fn doctrine(&self) -> Doctrine {
        self.doctrine
    }

    #[must_use]
    pub const fn power(&self) -> f32 {
        self.power
    }

    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    #[must_use]
    pub const fn stance(&self) -> Stance {
        self.stance
    }

    /// Movement vector chosen on the most recent tick.
    #[must_use]
    pub const fn vector(&self) -> MoveVector {
        self.vector
    }

    /// Threat ratio seen on the most recent tick, `None` if nobody was visible.
    #[must_use]
    pub const fn threat_ratio(&self) -> Option<f32> {
        self.threat_ratio
    }

    #[must_use]
    pub const fn as_rival(&self) -> Rival {
        Rival::new(self.id, self.position, self.power)
    }

    /// Choose a stance and movement vector. Depends only on the current inputs; the
    /// previous stance plays no part.
    pub fn decide(
        &self,
        rivals: &[Rival],
        bands: ThreatBands,
        chaos: f32,
        rng: &mut dyn RngCore,
    ) -> Decision {
        let assessment = threat::assess(self.power, rivals, bands);
        let vector = policy::policy_vector(assessment.stance, self.position, rivals, chaos, rng);
        Decision {
            stance: assessment.stance,
            vector,
            threat_ratio: assessment.ratio,
        }
    }
}

/// Per-stance scalar, used for speed factors and power decay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StanceTable {
    pub attack: f32,
    pub maneuver: f32,
    pub retreat: f32,
}

impl StanceTable {
    #[must_use]
    pub const fn new(attack: f32, maneuver: f32, retreat: f32) -> Self {
        Self {
            attack,
            maneuver,
            retreat,
        }
    }

    #[must_use]
    pub const fn get(&self, stance: Stance) -> f32 {
        match stance {
            Stance::Attack => self.attack,
            Stance::Maneuver => self.maneuver,
            Stance::Retreat => self.retreat,
        }
    }

    fn is_valid(&self) -> bool {
        [self.attack, self.maneuver, self.retreat]
            .iter()
            .all(|value| value.is_finite() && *value >= 0.0)
    }
}

/// Which positions and powers rivals are seen with during a tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Agents update in place; later agents see earlier agents' new positions and power.
    #[default]
    Sequential,
    /// Detection and threat assessment use state captured at the start of the tick.
    Snapshot,
}

/// Spatial index used for rival detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpatialIndexKind {
    #[default]
    LinearScan,
    UniformGrid,
}

/// Errors that can occur when constructing a battlefield.
#[derive(Debug, Error, PartialEq)]
pub enum BattlefieldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("duplicate agent id {0}")]
    DuplicateAgent(AgentId),
    #[error("agent {0} starts outside the arena")]
    AgentOutOfBounds(AgentId),
    #[error("agent {0} starts below the power floor")]
    AgentBelowPowerFloor(AgentId),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Static configuration for a battlefield.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BattlefieldConfig {
    /// Number of agents deployed by [`Battlefield::new`].
    pub agent_count: usize,
    /// Edge length of the square arena.
    pub arena_size: f32,
    /// Rivals strictly closer than this are visible.
    pub detection_radius: f32,
    /// Bound on the perturbation added to policy vectors.
    pub chaos_factor: f32,
    /// Lower bound (inclusive) of deployment power.
    pub initial_power_min: f32,
    /// Upper bound (exclusive) of deployment power.
    pub initial_power_max: f32,
    /// No agent's power drops below this.
    pub power_floor: f32,
    /// Total power below which the equilibrium bonus is paid out.
    pub equilibrium_floor: f32,
    /// Flat power added to every agent when the equilibrium triggers.
    pub equilibrium_bonus: f32,
    /// Bound on the per-tick positional noise, independent of policy chaos.
    pub movement_jitter: f32,
    /// Initial aggression threshold `τ`.
    pub aggression_threshold: f32,
    /// Retreat above `retreat_band * τ`.
    pub retreat_band: f32,
    /// Distance multiplier applied to the policy vector.
    pub speed: StanceTable,
    /// Power paid each tick.
    pub decay: StanceTable,
    /// Optional RNG seed for reproducible battles.
    pub rng_seed: Option<u64>,
    pub visibility: Visibility,
    pub spatial_index: SpatialIndexKind,
    /// Tick summaries retained in memory; 0 disables the history.
    pub history_capacity: usize,
}

impl Default for BattlefieldConfig {
    fn default() -> Self {
        Self {
            agent_count: 50,
            arena_size: 10.0,
            detection_radius: 3.0,
            chaos_factor: 0.3,
            initial_power_min: 0.5,
            initial_power_max: 1.5,
            power_floor: 0.1,
            equilibrium_floor: 10.0,
            equilibrium_bonus: 0.03,
            movement_jitter: 0.05,
            aggression_threshold: 1.0,
            retreat_band: 1.4,
            speed: StanceTable::new(0.35, 0.25, 0.30),
            decay: StanceTable::new(0.02, 0.005, 0.015),
            rng_seed: None,
            visibility: Visibility::Sequential,
            spatial_index: SpatialIndexKind::LinearScan,
            history_capacity: 256,
        }
    }
}

impl BattlefieldConfig {
    /// Validates everything except `agent_count`, which only matters for random deployment.
    fn validate_dynamics(&self) -> Result<(), BattlefieldError> {
        if !(self.arena_size.is_finite() && self.arena_size > 0.0) {
            return Err(BattlefieldError::InvalidConfig(
                "arena_size must be positive",
            ));
        }
        if !(self.detection_radius.is_finite() && self.detection_radius > 0.0) {
            return Err(BattlefieldError::InvalidConfig(
                "detection_radius must be positive",
            ));
        }
        if !(self.power_floor.is_finite() && self.power_floor > 0.0) {
            return Err(BattlefieldError::InvalidConfig(
                "power_floor must be positive",
            ));
        }
        if !(self.chaos_factor.is_finite() && self.chaos_factor >= 0.0)
            || !(self.movement_jitter.is_finite() && self.movement_jitter >= 0.0)
        {
            return Err(BattlefieldError::InvalidConfig(
                "chaos_factor and movement_jitter must be non-negative",
            ));
        }
        if !(self.equilibrium_floor.is_finite() && self.equilibrium_floor >= 0.0)
            || !(self.equilibrium_bonus.is_finite() && self.equilibrium_bonus >= 0.0)
        {
            return Err(BattlefieldError::InvalidConfig(
                "equilibrium floor and bonus must be non-negative",
            ));
        }
        if !self.speed.is_valid() || !self.decay.is_valid() {
            return Err(BattlefieldError::InvalidConfig(
                "stance speeds and decays must be non-negative",
            ));
        }
        if !self.aggression_threshold.is_finite() {
            return Err(BattlefieldError::InvalidConfig(
                "aggression_threshold must be finite",
            ));
        }
        if !(self.retreat_band.is_finite() && self.retreat_band >= 1.0) {
            return Err(BattlefieldError::InvalidConfig(
                "retreat_band must be at least 1.0",
            ));
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), BattlefieldError> {
        if self.agent_count == 0 {
            return Err(BattlefieldError::InvalidConfig(
                "agent_count must be non-zero",
            ));
        }
        if !(self.initial_power_min.is_finite() && self.initial_power_max.is_finite())
            || self.initial_power_min > self.initial_power_max
        {
            return Err(BattlefieldError::InvalidConfig(
                "initial power range must be finite and ordered",
            ));
        }
        self.validate_dynamics()?;
        if self.initial_power_min < self.power_floor {
            return Err(BattlefieldError::InvalidConfig(
                "initial_power_min cannot be below power_floor",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }

    fn build_index(&self) -> Box<dyn NeighborhoodIndex> {
        match self.spatial_index {
            SpatialIndexKind::LinearScan => Box::new(LinearScanIndex::new()),
            SpatialIndexKind::UniformGrid => Box::new(UniformGridIndex::new(
                self.detection_radius,
                self.arena_size,
                self.arena_size,
            )),
        }
    }

    fn sample_power(&self, rng: &mut dyn RngCore) -> f32 {
        if self.initial_power_max > self.initial_power_min {
            rng.random_range(self.initial_power_min..self.initial_power_max)
        } else {
            self.initial_power_min
        }
    }
}

/// Summary emitted after each tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub agent_count: usize,
    pub attacking: usize,
    pub maneuvering: usize,
    pub retreating: usize,
    pub total_power: f32,
    pub average_power: f32,
    pub aggression_threshold: f32,
    pub equilibrium_applied: bool,
}

/// Sink invoked after each tick with the summary and the updated population.
pub trait BattleObserver: Send {
    fn on_tick(&mut self, summary: &TickSummary, agents: &[Agent]);
}

/// No-op observer.
#[derive(Debug, Default)]
pub struct NullObserver;

impl BattleObserver for NullObserver {
    fn on_tick(&mut self, _summary: &TickSummary, _agents: &[Agent]) {}
}

/// Collect the rivals `agent_idx` can see, in agent order.
fn visible_rivals(
    index: &dyn NeighborhoodIndex,
    agent_idx: usize,
    radius_sq: f32,
    lookup: impl Fn(usize) -> Rival,
) -> Vec<Rival> {
    let mut found = Vec::new();
    index.neighbors_within(agent_idx, radius_sq, &mut |other_idx, _| {
        found.push(other_idx);
    });
    found.sort_unstable();
    found.into_iter().map(lookup).collect()
}

/// The arena and everything in it.
pub struct Battlefield {
    config: BattlefieldConfig,
    tick: Tick,
    aggression_threshold: f32,
    rng: SmallRng,
    agents: Vec<Agent>,
    index: Box<dyn NeighborhoodIndex>,
    position_scratch: Vec<(f32, f32)>,
    observer: Box<dyn BattleObserver>,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for Battlefield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Battlefield")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("aggression_threshold", &self.aggression_threshold)
            .field("agent_count", &self.agents.len())
            .finish()
    }
}

impl Battlefield {
    /// Deploy `config.agent_count` agents with random power and position.
    pub fn new(config: BattlefieldConfig) -> Result<Self, BattlefieldError> {
        Self::with_observer(config, Box::new(NullObserver))
    }

    /// Deploy a random population and report every tick to `observer`.
    pub fn with_observer(
        config: BattlefieldConfig,
        observer: Box<dyn BattleObserver>,
    ) -> Result<Self, BattlefieldError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let agents = (0..config.agent_count)
            .map(|slot| {
                let doctrine = if rng.random_bool(0.5) {
                    Doctrine::Active
                } else {
                    Doctrine::Passive
                };
                let power = config.sample_power(&mut rng);
                let x = rng.random_range(0.0..config.arena_size);
                let y = rng.random_range(0.0..config.arena_size);
                Agent::new(AgentId(slot as u32), power, Position::new(x, y)).with_doctrine(doctrine)
            })
            .collect();
        Self::assemble(config, agents, rng, observer)
    }

    /// Build a battlefield from an explicit initial population.
    ///
    /// `config.agent_count` is overwritten with the population size.
    pub fn from_agents(
        mut config: BattlefieldConfig,
        agents: Vec<Agent>,
    ) -> Result<Self, BattlefieldError> {
        if agents.is_empty() {
            return Err(BattlefieldError::InvalidConfig(
                "population must not be empty",
            ));
        }
        config.validate_dynamics()?;
        let mut seen = HashSet::with_capacity(agents.len());
        for agent in &agents {
            if !seen.insert(agent.id) {
                return Err(BattlefieldError::DuplicateAgent(agent.id));
            }
            if !agent.position.within(config.arena_size) {
                return Err(BattlefieldError::AgentOutOfBounds(agent.id));
            }
            if !(agent.power.is_finite() && agent.power >= config.power_floor) {
                return Err(BattlefieldError::AgentBelowPowerFloor(agent.id));
            }
        }
        config.agent_count = agents.len();
        let rng = config.seeded_rng();
        Self::assemble(config, agents, rng, Box::new(NullObserver))
    }

    fn assemble(
        config: BattlefieldConfig,
        agents: Vec<Agent>,
        rng: SmallRng,
        observer: Box<dyn BattleObserver>,
    ) -> Result<Self, BattlefieldError> {
        let mut index = config.build_index();
        let position_scratch: Vec<(f32, f32)> =
            agents.iter().map(|agent| agent.position.as_pair()).collect();
        index.rebuild(&position_scratch)?;
        debug!(
            agents = agents.len(),
            seed = ?config.rng_seed,
            visibility = ?config.visibility,
            index = ?config.spatial_index,
            "battlefield deployed"
        );
        let history = VecDeque::with_capacity(config.history_capacity);
        Ok(Self {
            aggression_threshold: config.aggression_threshold,
            config,
            tick: Tick::zero(),
            rng,
            agents,
            index,
            position_scratch,
            observer,
            history,
        })
    }

    /// Replace the random source, e.g. to replay a battle with a known generator state.
    #[must_use]
    pub fn with_rng(mut self, rng: SmallRng) -> Self {
        self.rng = rng;
        self
    }

    fn stage_index(&mut self) {
        self.position_scratch.clear();
        self.position_scratch
            .extend(self.agents.iter().map(|agent| agent.position.as_pair()));
        self.index
            .rebuild(&self.position_scratch)
            .expect("index configuration validated at construction");
    }

    fn stage_sequential(&mut self, bands: ThreatBands, radius_sq: f32) {
        for idx in 0..self.agents.len() {
            let agents = &self.agents;
            let rivals = visible_rivals(self.index.as_ref(), idx, radius_sq, |other| {
                agents[other].as_rival()
            });
            let decision =
                self.agents[idx].decide(&rivals, bands, self.config.chaos_factor, &mut self.rng);
            self.integrate(idx, decision);
            self.index
                .update(idx, self.agents[idx].position.as_pair());
        }
    }

    fn stage_snapshot(&mut self, bands: ThreatBands, radius_sq: f32) {
        let snapshot: Vec<Rival> = self.agents.iter().map(Agent::as_rival).collect();
        let index = self.index.as_ref();
        let visible: Vec<Vec<Rival>> = (0..snapshot.len())
            .into_par_iter()
            .map(|idx| visible_rivals(index, idx, radius_sq, |other| snapshot[other]))
            .collect();
        for (idx, rivals) in visible.iter().enumerate() {
            let decision =
                self.agents[idx].decide(rivals, bands, self.config.chaos_factor, &mut self.rng);
            self.integrate(idx, decision);
        }
    }

    /// Apply a decision: move, clamp, and pay the stance's power cost.
    fn integrate(&mut self, idx: usize, decision: Decision) {
        let speed = self.config.speed.get(decision.stance);
        let decay = self.config.decay.get(decision.stance);
        let noise = policy::jitter(&mut self.rng, self.config.movement_jitter);
        let step = decision.vector.scaled(speed) + noise;

        let agent = &mut self.agents[idx];
        agent.stance = decision.stance;
        agent.vector = decision.vector;
        agent.threat_ratio = decision.threat_ratio;
        agent.position = Position::new(agent.position.x + step.dx, agent.position.y + step.dy)
            .clamped(self.config.arena_size);
        agent.power = (agent.power - decay).max(self.config.power_floor);
    }

    /// Pay the equilibrium bonus when total power has sunk below the floor.
    fn stage_equilibrium(&mut self) -> bool {
        let total = self.total_power();
        if total >= self.config.equilibrium_floor {
            return false;
        }
        for agent in &mut self.agents {
            agent.power += self.config.equilibrium_bonus;
        }
        debug!(
            tick = self.tick.0 + 1,
            total_power = total,
            bonus = self.config.equilibrium_bonus,
            "equilibrium correction applied"
        );
        true
    }

    fn summarize(&self, equilibrium_applied: bool) -> TickSummary {
        let [attacking, maneuvering, retreating] = Stance::ALL.map(|stance| {
            self.agents
                .iter()
                .filter(|agent| agent.stance == stance)
                .count()
        });
        let total_power = self.total_power();
        TickSummary {
            tick: self.tick,
            agent_count: self.agents.len(),
            attacking,
            maneuvering,
            retreating,
            total_power,
            average_power: total_power / self.agents.len() as f32,
            aggression_threshold: self.aggression_threshold,
            equilibrium_applied,
        }
    }

    fn stage_history(&mut self, summary: &TickSummary) {
        self.observer.on_tick(summary, &self.agents);
        if self.config.history_capacity == 0 {
            return;
        }
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary.clone());
    }

    fn debug_assert_invariants(&self) {
        for agent in &self.agents {
            debug_assert!(
                agent.power.is_finite() && agent.power >= self.config.power_floor,
                "agent {} power {} below floor",
                agent.id,
                agent.power
            );
            debug_assert!(
                agent.position.within(self.config.arena_size),
                "agent {} escaped the arena at {:?}",
                agent.id,
                agent.position
            );
        }
    }

    /// Run exactly one tick and return its summary.
    pub fn advance(&mut self) -> TickSummary {
        let bands = ThreatBands::new(self.aggression_threshold, self.config.retreat_band);
        let radius_sq = self.config.detection_radius * self.config.detection_radius;

        self.stage_index();
        match self.config.visibility {
            Visibility::Sequential => self.stage_sequential(bands, radius_sq),
            Visibility::Snapshot => self.stage_snapshot(bands, radius_sq),
        }
        let equilibrium_applied = self.stage_equilibrium();
        self.tick = self.tick.next();
        self.debug_assert_invariants();

        let summary = self.summarize(equilibrium_applied);
        trace!(
            tick = summary.tick.0,
            attacking = summary.attacking,
            maneuvering = summary.maneuvering,
            retreating = summary.retreating,
            total_power = summary.total_power,
            "tick complete"
        );
        self.stage_history(&summary);
        summary
    }

    /// Current aggression threshold `τ`.
    #[must_use]
    pub const fn aggression_threshold(&self) -> f32 {
        self.aggression_threshold
    }

    /// Set `τ` for subsequent ticks. Any finite value is accepted; values outside
    /// `[0.5, 2.0]` simply push the population toward all-attack or all-retreat.
    pub fn set_aggression_threshold(&mut self, value: f32) {
        if !value.is_finite() {
            warn!(value, "ignoring non-finite aggression threshold");
            return;
        }
        self.aggression_threshold = value;
    }

    #[must_use]
    pub fn config(&self) -> &BattlefieldConfig {
        &self.config
    }

    /// Ticks processed since construction.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Agents in iteration order.
    #[must_use]
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.id == id)
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn total_power(&self) -> f32 {
        self.agents.iter().map(|agent| agent.power).sum()
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Replace the observer.
    pub fn set_observer(&mut self, observer: Box<dyn BattleObserver>) {
        self.observer = observer;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn quiet_config() -> BattlefieldConfig {
        BattlefieldConfig {
            chaos_factor: 0.0,
            movement_jitter: 0.0,
            rng_seed: Some(11),
            ..BattlefieldConfig::default()
        }
    }

    fn duel() -> Vec<Agent> {
        vec![
            Agent::new(AgentId(0), 1.0, Position::new(0.0, 0.0)),
            Agent::new(AgentId(1), 0.4, Position::new(1.0, 0.0)),
        ]
    }

    #[test]
    fn rejects_empty_population() {
        let config = BattlefieldConfig {
            agent_count: 0,
            ..BattlefieldConfig::default()
        };
        assert_eq!(
            Battlefield::new(config).err(),
            Some(BattlefieldError::InvalidConfig("agent_count must be non-zero"))
        );
        assert!(matches!(
            Battlefield::from_agents(BattlefieldConfig::default(), Vec::new()),
            Err(BattlefieldError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_invalid_dynamics() {
        let cases = [
            BattlefieldConfig {
                detection_radius: 0.0,
                ..BattlefieldConfig::default()
            },
            BattlefieldConfig {
                power_floor: 0.0,
                ..BattlefieldConfig::default()
            },
            BattlefieldConfig {
                initial_power_min: 0.05,
                ..BattlefieldConfig::default()
            },
            BattlefieldConfig {
                initial_power_min: 2.0,
                ..BattlefieldConfig::default()
            },
            BattlefieldConfig {
                retreat_band: 0.9,
                ..BattlefieldConfig::default()
            },
            BattlefieldConfig {
                decay: StanceTable::new(-0.1, 0.0, 0.0),
                ..BattlefieldConfig::default()
            },
            BattlefieldConfig {
                aggression_threshold: f32::NAN,
                ..BattlefieldConfig::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(Battlefield::new(config.clone()), Err(BattlefieldError::InvalidConfig(_))),
                "expected rejection for {config:?}"
            );
        }
    }

    #[test]
    fn rejects_grid_too_fine_for_arena() {
        let config = BattlefieldConfig {
            agent_count: 2,
            detection_radius: 1e-9,
            spatial_index: SpatialIndexKind::UniformGrid,
            rng_seed: Some(1),
            ..BattlefieldConfig::default()
        };
        let expected = Some(BattlefieldError::Index(IndexError::InvalidConfig(
            "grid too fine for arena",
        )));
        assert_eq!(Battlefield::new(config.clone()).err(), expected);
        assert_eq!(
            Battlefield::from_agents(config.clone(), duel()).err(),
            expected
        );

        let linear = BattlefieldConfig {
            spatial_index: SpatialIndexKind::LinearScan,
            ..config
        };
        assert!(Battlefield::new(linear).is_ok());
    }

    #[test]
    fn rejects_bad_initial_agents() {
        let mut agents = duel();
        agents[1] = Agent::new(AgentId(0), 0.4, Position::new(1.0, 0.0));
        assert_eq!(
            Battlefield::from_agents(quiet_config(), agents).err(),
            Some(BattlefieldError::DuplicateAgent(AgentId(0)))
        );

        let mut agents = duel();
        agents[1] = Agent::new(AgentId(1), 0.4, Position::new(10.5, 0.0));
        assert_eq!(
            Battlefield::from_agents(quiet_config(), agents).err(),
            Some(BattlefieldError::AgentOutOfBounds(AgentId(1)))
        );

        let mut agents = duel();
        agents[1] = Agent::new(AgentId(1), 0.0, Position::new(1.0, 0.0));
        assert_eq!(
            Battlefield::from_agents(quiet_config(), agents).err(),
            Some(BattlefieldError::AgentBelowPowerFloor(AgentId(1)))
        );
    }

    #[test]
    fn deployment_respects_config() {
        let config = BattlefieldConfig {
            agent_count: 40,
            rng_seed: Some(3),
            ..BattlefieldConfig::default()
        };
        let field = Battlefield::new(config).expect("battlefield");
        assert_eq!(field.agent_count(), 40);
        assert_eq!(field.tick(), Tick(0));
        for (slot, agent) in field.agents().iter().enumerate() {
            assert_eq!(agent.id(), AgentId(slot as u32));
            assert!((0.5..1.5).contains(&agent.power()));
            assert!(agent.position().within(10.0));
            assert_eq!(agent.stance(), Stance::Maneuver);
        }
        let doctrines: HashSet<Doctrine> = field.agents().iter().map(Agent::doctrine).collect();
        assert_eq!(doctrines.len(), 2);
    }

    #[test]
    fn duel_scenario_attack_and_retreat() {
        let mut field = Battlefield::from_agents(quiet_config(), duel()).expect("battlefield");
        field.advance();

        let attacker = field.agent(AgentId(0)).expect("attacker");
        assert_eq!(attacker.stance(), Stance::Attack);
        assert!((attacker.threat_ratio().expect("ratio") - 0.4).abs() < 1e-6);
        assert!((attacker.vector().dx - 1.0).abs() < 1e-6);
        assert!(attacker.vector().dy.abs() < 1e-6);
        assert!((attacker.position().x - 0.35).abs() < 1e-6);

        let defender = field.agent(AgentId(1)).expect("defender");
        assert_eq!(defender.stance(), Stance::Retreat);
        assert!(defender.threat_ratio().expect("ratio") > 1.4);
        assert!(defender.vector().dx > 0.0);
    }

    #[test]
    fn sequential_mode_sees_updated_positions() {
        let agents = vec![
            Agent::new(AgentId(0), 1.0, Position::new(1.0, 1.0)),
            Agent::new(AgentId(1), 1.0, Position::new(5.0, 8.1)),
            Agent::new(AgentId(2), 0.5, Position::new(5.0, 8.3)),
        ];
        let sequential = BattlefieldConfig {
            equilibrium_floor: 0.0,
            ..quiet_config()
        };
        let snapshot = BattlefieldConfig {
            visibility: Visibility::Snapshot,
            ..sequential.clone()
        };

        // Agent 1 charges the weaker agent 2 and overshoots it. Sequentially, agent 2 then
        // flees from where agent 1 ended up; with a snapshot it flees from where it started.
        let mut seq = Battlefield::from_agents(sequential, agents.clone()).expect("sequential");
        seq.advance();
        let mut snap = Battlefield::from_agents(snapshot, agents).expect("snapshot");
        snap.advance();

        assert_eq!(seq.agents()[1].stance(), Stance::Attack);
        assert_eq!(snap.agents()[1].stance(), Stance::Attack);
        assert!((seq.agents()[1].position().y - 8.45).abs() < 1e-5);

        assert_eq!(seq.agents()[2].stance(), Stance::Retreat);
        assert_eq!(snap.agents()[2].stance(), Stance::Retreat);
        assert_eq!(
            seq.agents()[2].threat_ratio(),
            Some(seq.agents()[1].power() / 0.5)
        );
        assert_eq!(snap.agents()[2].threat_ratio(), Some(2.0));
        assert!(seq.agents()[2].vector().dy < 0.0);
        assert!(snap.agents()[2].vector().dy > 0.0);
    }

    #[test]
    fn threshold_is_read_fresh_each_tick() {
        let mut field = Battlefield::from_agents(quiet_config(), duel()).expect("battlefield");
        field.set_aggression_threshold(0.1);
        field.advance();
        assert_eq!(field.agents()[0].stance(), Stance::Retreat);

        field.set_aggression_threshold(5.0);
        field.advance();
        assert_eq!(field.agents()[0].stance(), Stance::Attack);
        assert_eq!(field.agents()[1].stance(), Stance::Attack);
        assert_eq!(field.history().last().map(|s| s.aggression_threshold), Some(5.0));
    }

    #[test]
    fn non_finite_threshold_is_ignored() {
        let mut field = Battlefield::from_agents(quiet_config(), duel()).expect("battlefield");
        field.set_aggression_threshold(f32::NAN);
        assert_eq!(field.aggression_threshold(), 1.0);
        field.set_aggression_threshold(-3.0);
        assert_eq!(field.aggression_threshold(), -3.0);
        field.advance();
        assert!(field.agents().iter().all(|a| a.stance() == Stance::Retreat));
    }

    #[test]
    fn positions_clamp_at_walls() {
        let agents = vec![
            Agent::new(AgentId(0), 1.0, Position::new(10.0, 0.0)),
            Agent::new(AgentId(1), 0.2, Position::new(8.0, 0.0)),
        ];
        let mut field = Battlefield::from_agents(quiet_config(), agents).expect("battlefield");
        for _ in 0..20 {
            field.advance();
            assert!(field.agents().iter().all(|a| a.position().within(10.0)));
        }
    }

    #[test]
    fn history_is_bounded() {
        let config = BattlefieldConfig {
            agent_count: 5,
            history_capacity: 4,
            rng_seed: Some(8),
            ..BattlefieldConfig::default()
        };
        let mut field = Battlefield::new(config).expect("battlefield");
        for _ in 0..10 {
            field.advance();
        }
        let ticks: Vec<u64> = field.history().map(|s| s.tick.0).collect();
        assert_eq!(ticks, vec![7, 8, 9, 10]);
    }

    #[derive(Clone, Default)]
    struct RecordingObserver {
        seen: Arc<Mutex<Vec<(Tick, usize)>>>,
    }

    impl BattleObserver for RecordingObserver {
        fn on_tick(&mut self, summary: &TickSummary, agents: &[Agent]) {
            self.seen
                .lock()
                .expect("observer lock")
                .push((summary.tick, agents.len()));
        }
    }

    #[test]
    fn observer_receives_every_tick() {
        let observer = RecordingObserver::default();
        let config = BattlefieldConfig {
            agent_count: 6,
            rng_seed: Some(21),
            ..BattlefieldConfig::default()
        };
        let mut field =
            Battlefield::with_observer(config, Box::new(observer.clone())).expect("battlefield");
        for _ in 0..3 {
            field.advance();
        }
        let seen = observer.seen.lock().expect("observer lock").clone();
        assert_eq!(seen, vec![(Tick(1), 6), (Tick(2), 6), (Tick(3), 6)]);
    }

    #[test]
    fn summary_counts_stances() {
        let mut field = Battlefield::from_agents(quiet_config(), duel()).expect("battlefield");
        let summary = field.advance();
        assert_eq!(summary.tick, Tick(1));
        assert_eq!(summary.attacking, 1);
        assert_eq!(summary.retreating, 1);
        assert_eq!(summary.maneuvering, 0);
        assert_eq!(
            summary.attacking + summary.maneuvering + summary.retreating,
            summary.agent_count
        );
        assert!(summary.equilibrium_applied);
        assert!((summary.total_power - field.total_power()).abs() < 1e-6);
    }
}
