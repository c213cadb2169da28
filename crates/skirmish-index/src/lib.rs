//! Spatial indexing abstractions for agent neighborhood queries.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Common behaviour exposed by neighborhood indices.
///
/// Neighbors are reported when their squared distance is strictly below the query radius;
/// an agent is never reported as its own neighbor.
pub trait NeighborhoodIndex: Send + Sync {
    /// Rebuild internal structures from agent positions.
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError>;

    /// Move a single agent without rebuilding the whole index.
    fn update(&mut self, agent_idx: usize, position: (f32, f32));

    /// Visit neighbors of `agent_idx` within the provided squared radius.
    fn neighbors_within(
        &self,
        agent_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );
}

/// Upper bound on the number of cells a [`UniformGridIndex`] may allocate.
pub const MAX_GRID_CELLS: usize = 1 << 20;

fn distance_sq(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    dx * dx + dy * dy
}

/// Brute-force index that compares every pair of agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearScanIndex {
    #[serde(skip)]
    positions: Vec<(f32, f32)>,
}

impl LinearScanIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NeighborhoodIndex for LinearScanIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        Ok(())
    }

    fn update(&mut self, agent_idx: usize, position: (f32, f32)) {
        if let Some(slot) = self.positions.get_mut(agent_idx) {
            *slot = position;
        }
    }

    fn neighbors_within(
        &self,
        agent_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        let Some(&origin) = self.positions.get(agent_idx) else {
            return;
        };
        for (other_idx, &other) in self.positions.iter().enumerate() {
            if other_idx == agent_idx {
                continue;
            }
            let dist_sq = distance_sq(origin, other);
            if dist_sq < radius_sq {
                visitor(other_idx, OrderedFloat(dist_sq));
            }
        }
    }
}

/// Uniform grid index bucketing agents into square cells over a bounded arena.
///
/// Positions outside the arena are bucketed into the nearest edge cell, so queries stay
/// correct (if slower) for callers that do not clamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    /// Edge length of each grid cell used for bucketing agents.
    pub cell_size: f32,
    /// Arena width covered by the grid.
    pub width: f32,
    /// Arena height covered by the grid.
    pub height: f32,
    #[serde(skip)]
    cols: usize,
    #[serde(skip)]
    rows: usize,
    #[serde(skip)]
    buckets: Vec<Vec<usize>>,
    #[serde(skip)]
    positions: Vec<(f32, f32)>,
    #[serde(skip)]
    cell_of: Vec<usize>,
}

impl UniformGridIndex {
    /// Create a new uniform grid with the provided cell size covering `width` x `height`.
    #[must_use]
    pub fn new(cell_size: f32, width: f32, height: f32) -> Self {
        Self {
            cell_size,
            width,
            height,
            cols: 0,
            rows: 0,
            buckets: Vec::new(),
            positions: Vec::new(),
            cell_of: Vec::new(),
        }
    }

    /// Number of grid cells along each axis as `(cols, rows)`; zero before the first rebuild.
    #[must_use]
    pub const fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    fn axis_cell(&self, value: f32, cells: usize) -> usize {
        if cells == 0 || value.is_nan() {
            return 0;
        }
        let raw = (value / self.cell_size).floor();
        if raw <= 0.0 {
            0
        } else {
            (raw as usize).min(cells - 1)
        }
    }

    fn cell_coords(&self, position: (f32, f32)) -> (usize, usize) {
        (
            self.axis_cell(position.0, self.cols),
            self.axis_cell(position.1, self.rows),
        )
    }

    fn cell_index(&self, position: (f32, f32)) -> usize {
        let (cx, cy) = self.cell_coords(position);
        cy * self.cols + cx
    }
}

impl Default for UniformGridIndex {
    fn default() -> Self {
        Self::new(3.0, 10.0, 10.0)
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        if !(self.width.is_finite() && self.width > 0.0)
            || !(self.height.is_finite() && self.height > 0.0)
        {
            return Err(IndexError::InvalidConfig("grid extent must be positive"));
        }
        let cols = (self.width / self.cell_size).ceil().max(1.0);
        let rows = (self.height / self.cell_size).ceil().max(1.0);
        if cols > MAX_GRID_CELLS as f32 || rows > MAX_GRID_CELLS as f32 {
            return Err(IndexError::InvalidConfig("grid too fine for arena"));
        }
        let cell_count = (cols as usize)
            .checked_mul(rows as usize)
            .filter(|&count| count <= MAX_GRID_CELLS)
            .ok_or(IndexError::InvalidConfig("grid too fine for arena"))?;
        self.cols = cols as usize;
        self.rows = rows as usize;
        self.buckets.iter_mut().for_each(Vec::clear);
        self.buckets.resize_with(cell_count, Vec::new);

        self.positions.clear();
        self.positions.extend_from_slice(positions);
        self.cell_of.clear();
        for (idx, &position) in positions.iter().enumerate() {
            let cell = self.cell_index(position);
            self.buckets[cell].push(idx);
            self.cell_of.push(cell);
        }
        Ok(())
    }

    fn update(&mut self, agent_idx: usize, position: (f32, f32)) {
        if agent_idx >= self.positions.len() {
            return;
        }
        self.positions[agent_idx] = position;
        let next = self.cell_index(position);
        let previous = self.cell_of[agent_idx];
        if next == previous {
            return;
        }
        let bucket = &mut self.buckets[previous];
        if let Some(slot) = bucket.iter().position(|&idx| idx == agent_idx) {
            bucket.swap_remove(slot);
        }
        self.buckets[next].push(agent_idx);
        self.cell_of[agent_idx] = next;
    }

    fn neighbors_within(
        &self,
        agent_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        let Some(&origin) = self.positions.get(agent_idx) else {
            return;
        };
        if radius_sq <= 0.0 || self.buckets.is_empty() {
            return;
        }
        let span = (radius_sq.sqrt() / self.cell_size).ceil() as usize;
        let (cx, cy) = self.cell_coords(origin);
        let x_range = cx.saturating_sub(span)..=cx.saturating_add(span).min(self.cols - 1);
        let y_range = cy.saturating_sub(span)..=cy.saturating_add(span).min(self.rows - 1);
        for y in y_range {
            for x in x_range.clone() {
                for &other_idx in &self.buckets[y * self.cols + x] {
                    if other_idx == agent_idx {
                        continue;
                    }
                    let dist_sq = distance_sq(origin, self.positions[other_idx]);
                    if dist_sq < radius_sq {
                        visitor(other_idx, OrderedFloat(dist_sq));
                    }
                }
            }
        }
    }
}
