//! Error taxonomy for panel simulations.
//!
//! Configuration problems are detected before any integration starts.
//! Numerical problems abort a run and carry the last valid state.
//! Resource problems enforce the caller's budget.

use std::time::Duration;

use thiserror::Error;

use crate::sim::heat_transfer::SimulationState;

/// Invalid layer stack, geometry, optics or run controls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("layer stack is empty")]
    EmptyLayerStack,
    #[error("layer {layer:?}: {property} must be positive and finite (got {value})")]
    NonPositiveProperty {
        layer: String,
        property: &'static str,
        value: f64,
    },
    #[error("duplicate layer name {0:?}")]
    DuplicateLayer(String),
    #[error("unknown layer {0:?}")]
    UnknownLayer(String),
    #[error("invalid grid: {0}")]
    InvalidGrid(String),
    #[error("heat source {source_name:?} spans [{start}, {end}] m, outside the domain [0, {width}] m")]
    HeatSourceOutsideDomain {
        source_name: String,
        start: f64,
        end: f64,
        width: f64,
    },
    #[error("heat source {0:?} covers no grid node")]
    HeatSourceCoversNoNode(String),
    #[error("heat sources {first:?} and {second:?} overlap")]
    OverlappingHeatSources { first: String, second: String },
    #[error("heat source {0:?} requires a 2-D grid")]
    HeatSourceRequiresLateralGrid(String),
    #[error("invalid heat source {source_name:?}: {reason}")]
    InvalidHeatSource { source_name: String, reason: String },
    #[error("layer {0:?} carries embedded power but received no grid node")]
    PoweredLayerWithoutNodes(String),
    #[error("invalid boundary optics: {0}")]
    InvalidOptics(String),
    #[error("invalid illumination profile: {0}")]
    InvalidIllumination(String),
    #[error("invalid run controls: {0}")]
    InvalidRunControls(String),
    #[error("unknown region {0:?}")]
    UnknownRegion(String),
    #[error("region {0:?} contains no grid node")]
    EmptyRegion(String),
}

/// Failure of the discretized problem during assembly or stepping.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericalError {
    #[error("non-finite temperature {value} at node {node}")]
    NonFinite { node: usize, value: f64 },
    #[error("negative absolute temperature {value} K at node {node}")]
    NegativeTemperature { node: usize, value: f64 },
    #[error("temperature {value} K at node {node} exceeds the limit of {limit} K")]
    TemperatureLimitExceeded { node: usize, value: f64, limit: f64 },
    #[error("assembled matrix is singular (pivot {pivot} at row {row})")]
    SingularMatrix { row: usize, pivot: f64 },
    #[error("linear solver did not converge after {iterations} iterations (residual {residual})")]
    SolverDidNotConverge { iterations: usize, residual: f64 },
    #[error("explicit timestep {requested} s exceeds the stability limit of {limit} s")]
    UnstableTimestep { requested: f64, limit: f64 },
}

/// Requested work exceeds the configured budget.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("grid has {nodes} nodes, budget allows {limit}")]
    TooManyNodes { nodes: usize, limit: usize },
    #[error("run needs {steps} steps, budget allows {limit}")]
    TooManySteps { steps: usize, limit: usize },
    #[error("run needs {node_steps} node updates, budget allows {limit}")]
    TooMuchWork { node_steps: u64, limit: u64 },
    #[error("snapshots need {bytes} bytes, budget allows {limit}")]
    SnapshotMemory { bytes: usize, limit: usize },
    #[error("wall-clock budget of {limit:?} exhausted after {elapsed:?} at step {step}")]
    WallClockExceeded {
        step: usize,
        elapsed: Duration,
        limit: Duration,
    },
}

/// Any failure of one simulation run.
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("numerical failure at step {step}: {source}")]
    Numerical {
        step: usize,
        #[source]
        source: NumericalError,
        /// State after the last step that passed all checks.
        last_state: Box<SimulationState>,
    },
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl SimulationError {
    /// Step index at which a numerical failure happened.
    pub fn failing_step(&self) -> Option<usize> {
        match self {
            SimulationError::Numerical { step, .. } => Some(*step),
            SimulationError::Resource(ResourceError::WallClockExceeded { step, .. }) => {
                Some(*step)
            }
            _ => None,
        }
    }

    /// Last valid state for numerical failures.
    pub fn last_state(&self) -> Option<&SimulationState> {
        match self {
            SimulationError::Numerical { last_state, .. } => Some(last_state),
            _ => None,
        }
    }
}
