//! Field snapshots and region temperature statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigurationError;
use crate::sim::heat_transfer::{Grid, SimulationState};

/// Offset between kelvin and degrees Celsius.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Which steps to keep a full copy of the field for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPlan {
    /// Evenly spaced steps; the first and last step are always included.
    Count(usize),
    /// Steps nearest to these times in s, plus the first and last step.
    Times(Vec<f64>),
}

impl Default for SnapshotPlan {
    fn default() -> Self {
        SnapshotPlan::Count(4)
    }
}

impl SnapshotPlan {
    /// Sorted, unique step indices in `0..=steps`.
    pub fn step_indices(&self, steps: usize, dt: f64) -> Result<Vec<usize>, ConfigurationError> {
        let mut indices = match self {
            SnapshotPlan::Count(n) => {
                let n = (*n).clamp(2, steps.saturating_add(1));
                let stride = steps as f64 / (n - 1) as f64;
                (0..n)
                    .map(|k| ((k as f64 * stride).round() as usize).min(steps))
                    .collect::<Vec<_>>()
            }
            SnapshotPlan::Times(times) => {
                let mut indices = vec![0, steps];
                let horizon = steps as f64 * dt;
                for &t in times {
                    if !(t.is_finite() && t >= 0.0) {
                        return Err(ConfigurationError::InvalidRunControls(format!(
                            "snapshot time must be finite and non-negative (got {t})"
                        )));
                    }
                    let step = (t / dt).round();
                    if step > steps as f64 {
                        warn!(
                            time = t,
                            horizon,
                            "Snapshot time lies beyond the end of the run, using the final step"
                        );
                    }
                    indices.push((step as usize).min(steps));
                }
                indices
            }
        };
        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }
}

/// Immutable copy of the field at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    step: usize,
    time: f64,
    temperatures: Vec<f64>,
}

impl Snapshot {
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn temperatures(&self) -> &[f64] {
        &self.temperatures
    }
}

/// Temperature summary of one region.
///
/// The mean is taken over node samples, each node counting equally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl RegionStats {
    pub fn in_celsius(&self) -> RegionStats {
        RegionStats {
            min: self.min - KELVIN_OFFSET,
            max: self.max - KELVIN_OFFSET,
            mean: self.mean - KELVIN_OFFSET,
        }
    }
}

#[derive(Debug, Clone)]
struct RegionTracker {
    name: String,
    nodes: Vec<usize>,
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl RegionTracker {
    fn observe(&mut self, field: &[f64]) {
        for &idx in &self.nodes {
            let t = field[idx];
            self.min = self.min.min(t);
            self.max = self.max.max(t);
            self.sum += t;
        }
        self.count += self.nodes.len();
    }

    fn stats(&self) -> Option<RegionStats> {
        (self.count > 0).then(|| RegionStats {
            min: self.min,
            max: self.max,
            mean: self.sum / self.count as f64,
        })
    }
}

/// Captures snapshots at planned steps and streams region statistics over
/// every observed state.
#[derive(Debug, Clone)]
pub struct SnapshotRecorder {
    indices: Vec<usize>,
    next: usize,
    snapshots: Vec<Snapshot>,
    trackers: Vec<RegionTracker>,
}

impl SnapshotRecorder {
    /// Track every layer and heat-source region of `grid` for a run of `steps` steps.
    pub fn new(
        grid: &Grid,
        plan: &SnapshotPlan,
        steps: usize,
        dt: f64,
    ) -> Result<Self, ConfigurationError> {
        let indices = plan.step_indices(steps, dt)?;
        let trackers = grid
            .region_names()
            .into_iter()
            .map(|name| {
                let nodes = grid.region_nodes(&name).unwrap_or_default();
                RegionTracker {
                    name,
                    nodes,
                    min: f64::INFINITY,
                    max: f64::NEG_INFINITY,
                    sum: 0.0,
                    count: 0,
                }
            })
            .collect();
        Ok(Self {
            snapshots: Vec::with_capacity(indices.len()),
            indices,
            next: 0,
            trackers,
        })
    }

    /// Bytes needed to hold all planned snapshots of a `nodes`-node field.
    pub fn snapshot_bytes(snapshot_count: usize, nodes: usize) -> usize {
        nodes
            .saturating_mul(std::mem::size_of::<f64>())
            .saturating_add(std::mem::size_of::<Snapshot>())
            .saturating_mul(snapshot_count)
    }

    /// Steps at which snapshots will be taken.
    pub fn planned_steps(&self) -> &[usize] {
        &self.indices
    }

    /// Record one state. Call with the initial state and after every step.
    pub fn observe(&mut self, state: &SimulationState) {
        for tracker in &mut self.trackers {
            tracker.observe(&state.temperatures);
        }
        while self.next < self.indices.len() && self.indices[self.next] < state.step {
            self.next += 1;
        }
        if self.indices.get(self.next) == Some(&state.step) {
            self.snapshots.push(Snapshot {
                step: state.step,
                time: state.time,
                temperatures: state.temperatures.clone(),
            });
            self.next += 1;
        }
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn into_snapshots(self) -> Vec<Snapshot> {
        self.snapshots
    }

    /// Statistics of a region over every observed state.
    pub fn region_stats(&self, name: &str) -> Result<RegionStats, ConfigurationError> {
        let tracker = self
            .trackers
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ConfigurationError::UnknownRegion(name.to_string()))?;
        tracker
            .stats()
            .ok_or_else(|| ConfigurationError::EmptyRegion(name.to_string()))
    }

    /// Statistics of every non-empty region, keyed by name.
    pub fn all_region_stats(&self) -> BTreeMap<String, RegionStats> {
        self.trackers
            .iter()
            .filter_map(|t| t.stats().map(|s| (t.name.clone(), s)))
            .collect()
    }

    /// Statistics of a region restricted to the recorded snapshots.
    pub fn snapshot_region_stats(
        &self,
        grid: &Grid,
        name: &str,
    ) -> Result<RegionStats, ConfigurationError> {
        let nodes = grid
            .region_nodes(name)
            .ok_or_else(|| ConfigurationError::UnknownRegion(name.to_string()))?;
        if nodes.is_empty() || self.snapshots.is_empty() {
            return Err(ConfigurationError::EmptyRegion(name.to_string()));
        }
        let mut tracker = RegionTracker {
            name: name.to_string(),
            nodes,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        };
        for snapshot in &self.snapshots {
            tracker.observe(&snapshot.temperatures);
        }
        tracker
            .stats()
            .ok_or_else(|| ConfigurationError::EmptyRegion(name.to_string()))
    }
}

/// Largest nodal change between each pair of consecutive snapshots, in K.
///
/// Values approaching zero indicate a steady state.
pub fn max_successive_delta(snapshots: &[Snapshot]) -> Vec<f64> {
    snapshots
        .windows(2)
        .map(|w| {
            w[0].temperatures
                .iter()
                .zip(&w[1].temperatures)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max)
        })
        .collect()
}
