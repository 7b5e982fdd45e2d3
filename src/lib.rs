pub mod error;
pub mod io;
pub mod sim;

// Prelude
pub use error::{ConfigurationError, NumericalError, ResourceError, SimulationError};
pub use sim::heat_transfer::{
    BoundaryOptics, Grid, GridConfig, Scheme, SimulationState, TimeIntegrator, build_grid,
};
pub use sim::illumination::{IlluminationProfile, IlluminationSource};
pub use sim::materials::{HeatSourcePlacement, Layer, ThermalProperties};
pub use sim::recorder::{RegionStats, Snapshot, SnapshotPlan};
pub use sim::simulation::{
    SimulationConfig, SimulationResult, run_batch, run_simulation, run_simulation_with,
};
