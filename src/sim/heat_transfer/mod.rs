//! Transient heat conduction through a layered panel.
//!
//! A vertex-centred finite-volume discretization of the layer stack, with
//! radiative/solar boundaries on the sun-facing and radiator surfaces.
//!
//! # Architecture
//!
//! ```text
//! [Layer] + [HeatSourcePlacement] ──► build_grid() ──► Grid
//!                                                        │
//!                         ConductanceNetwork + BoundaryModel
//!                                                        │
//!                                      TimeIntegrator::step(fraction)
//! ```
//!
//! The integrator sees only node capacities, sources and face
//! conductances, so 1-D and 2-D grids share the same stepping code.

pub mod boundary;
pub mod grid;
pub mod integrator;
pub mod network;
pub mod solver_sparse;

pub use boundary::{BoundaryExchange, BoundaryModel, BoundaryOptics, STEFAN_BOLTZMANN};
pub use grid::{
    Grid, GridConfig, GridGeometry, LateralGrid, LayerRegion, Resolution, SourceRegion,
    build_grid,
};
pub use integrator::{
    EnergyLedger, ExplicitTimestepPolicy, IntegratorSettings, IntegratorStatus, LimitPolicy,
    Scheme, SimulationState, TemperatureGuard, TimeIntegrator, TimestepPlan,
    stability_limit,
};
pub use network::{ConductanceNetwork, Face};
pub use solver_sparse::{LinearSolverConfig, PcgSettings};
