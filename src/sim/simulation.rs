//! End-to-end panel runs: configuration, budget checks, stepping loop and
//! result assembly.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigurationError, ResourceError, SimulationError};
use crate::sim::heat_transfer::{
    BoundaryOptics, EnergyLedger, ExplicitTimestepPolicy, GridConfig, GridGeometry,
    IntegratorSettings, IntegratorStatus, LinearSolverConfig, Scheme, SimulationState,
    TemperatureGuard, TimeIntegrator, TimestepPlan, build_grid,
};
use crate::sim::illumination::{
    IlluminationProfile, IlluminationSample, IlluminationSampling, IlluminationSource,
};
use crate::sim::materials::{
    HeatSourcePlacement, Layer, reference_asic, reference_stack_1d, reference_stack_2d,
};
use crate::sim::recorder::{
    RegionStats, Snapshot, SnapshotPlan, SnapshotRecorder, max_successive_delta,
};

/// Steps between two wall-clock checks.
const WALL_CLOCK_INTERVAL: usize = 256;

fn default_initial_temperature() -> f64 {
    290.0
}

fn default_periods() -> usize {
    5
}

/// Time controls of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunControls {
    /// Simulated time in s. Defaults to the illumination profile duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time: Option<f64>,
    /// Requested timestep in s.
    pub timestep: f64,
    #[serde(default)]
    pub scheme: Scheme,
    /// Uniform starting temperature in K.
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f64,
    #[serde(default)]
    pub explicit_timestep_policy: ExplicitTimestepPolicy,
    #[serde(default)]
    pub illumination_sampling: IlluminationSampling,
}

/// Where the sunlit fraction comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IlluminationInput {
    Profile {
        samples: Vec<IlluminationSample>,
    },
    Constant {
        fraction: f64,
    },
    /// Each orbit starts in eclipse.
    EclipseCycle {
        orbit_period: f64,
        eclipse_duration: f64,
        #[serde(default = "default_periods")]
        periods: usize,
    },
}

impl Default for IlluminationInput {
    fn default() -> Self {
        IlluminationInput::Constant { fraction: 1.0 }
    }
}

impl IlluminationInput {
    pub fn build(&self) -> Result<IlluminationProfile, ConfigurationError> {
        match self {
            IlluminationInput::Profile { samples } => IlluminationProfile::new(samples.clone()),
            IlluminationInput::Constant { fraction } => IlluminationProfile::constant(*fraction),
            IlluminationInput::EclipseCycle {
                orbit_period,
                eclipse_duration,
                periods,
            } => IlluminationProfile::eclipse_cycle(*orbit_period, *eclipse_duration, *periods),
        }
    }
}

/// Upper bounds on the work one run may request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBudget {
    pub max_nodes: usize,
    pub max_steps: usize,
    /// Nodes times steps.
    pub max_node_steps: u64,
    pub max_snapshot_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wall_time_s: Option<f64>,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            max_nodes: 1_000_000,
            max_steps: 50_000_000,
            max_node_steps: 50_000_000_000,
            max_snapshot_bytes: 1 << 30,
            max_wall_time_s: None,
        }
    }
}

impl ResourceBudget {
    pub fn check_nodes(&self, nodes: usize) -> Result<(), ResourceError> {
        if nodes > self.max_nodes {
            return Err(ResourceError::TooManyNodes {
                nodes,
                limit: self.max_nodes,
            });
        }
        Ok(())
    }

    /// Step count and total node updates of a planned run.
    pub fn check_work(&self, nodes: usize, steps: usize) -> Result<(), ResourceError> {
        if steps > self.max_steps {
            return Err(ResourceError::TooManySteps {
                steps,
                limit: self.max_steps,
            });
        }
        let node_steps = (nodes as u64).saturating_mul(steps as u64);
        if node_steps > self.max_node_steps {
            return Err(ResourceError::TooMuchWork {
                node_steps,
                limit: self.max_node_steps,
            });
        }
        Ok(())
    }

    /// Memory held by `snapshots` copies of a `nodes`-node field.
    pub fn check_snapshots(&self, nodes: usize, snapshots: usize) -> Result<(), ResourceError> {
        let bytes = SnapshotRecorder::snapshot_bytes(snapshots, nodes);
        if bytes > self.max_snapshot_bytes {
            return Err(ResourceError::SnapshotMemory {
                bytes,
                limit: self.max_snapshot_bytes,
            });
        }
        Ok(())
    }

    fn wall_time(&self) -> Option<Duration> {
        self.max_wall_time_s
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Declarative description of one panel run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Layers from the sun-facing side to the radiator.
    pub layers: Vec<Layer>,
    pub grid: GridConfig,
    #[serde(default)]
    pub heat_sources: Vec<HeatSourcePlacement>,
    #[serde(default)]
    pub optics: BoundaryOptics,
    pub run: RunControls,
    #[serde(default)]
    pub illumination: IlluminationInput,
    #[serde(default)]
    pub snapshots: SnapshotPlan,
    #[serde(default)]
    pub temperature_guard: TemperatureGuard,
    #[serde(default)]
    pub linear_solver: LinearSolverConfig,
    #[serde(default)]
    pub budget: ResourceBudget,
    /// Regions that must exist and be non-empty; listed first in reports.
    #[serde(default)]
    pub report_regions: Vec<String>,
}

impl SimulationConfig {
    /// Five-layer 1-D panel with a 9 W board, 31 nodes, five 90-minute
    /// orbits with 30-minute eclipses, 1 s Crank-Nicolson steps.
    pub fn reference_1d() -> Self {
        Self {
            name: Some("reference-1d".into()),
            layers: reference_stack_1d(),
            grid: GridConfig::one_dimensional(31),
            heat_sources: Vec::new(),
            optics: BoundaryOptics::default(),
            run: RunControls {
                total_time: None,
                timestep: 1.0,
                scheme: Scheme::CrankNicolson,
                initial_temperature: default_initial_temperature(),
                explicit_timestep_policy: ExplicitTimestepPolicy::Clamp,
                illumination_sampling: IlluminationSampling::StepStart,
            },
            illumination: IlluminationInput::EclipseCycle {
                orbit_period: 5400.0,
                eclipse_duration: 1800.0,
                periods: 5,
            },
            snapshots: SnapshotPlan::Count(5),
            temperature_guard: TemperatureGuard::default(),
            linear_solver: LinearSolverConfig::default(),
            budget: ResourceBudget::default(),
            report_regions: vec!["pcb".into()],
        }
    }

    /// Six-layer 20 mm cross-section of a 20 mm deep tile with an 8 mm,
    /// 9 W ASIC, one sunlit orbit.
    pub fn reference_2d() -> Self {
        Self {
            name: Some("reference-2d".into()),
            layers: reference_stack_2d(),
            grid: GridConfig::two_dimensional(0.02, 0.001, 0.0001, 0.02),
            heat_sources: vec![reference_asic()],
            optics: BoundaryOptics::default(),
            run: RunControls {
                total_time: Some(5400.0),
                timestep: 0.5,
                scheme: Scheme::CrankNicolson,
                initial_temperature: default_initial_temperature(),
                explicit_timestep_policy: ExplicitTimestepPolicy::Clamp,
                illumination_sampling: IlluminationSampling::StepStart,
            },
            illumination: IlluminationInput::Constant { fraction: 1.0 },
            snapshots: SnapshotPlan::Count(4),
            temperature_guard: TemperatureGuard::default(),
            linear_solver: LinearSolverConfig::default(),
            budget: ResourceBudget::default(),
            report_regions: vec!["asic_die".into(), "pcb".into()],
        }
    }

    fn integrator_settings(&self, horizon: f64) -> IntegratorSettings {
        IntegratorSettings {
            scheme: self.run.scheme,
            timestep: self.run.timestep,
            horizon,
            explicit_timestep_policy: self.run.explicit_timestep_policy,
            temperature_guard: self.temperature_guard,
            linear_solver: self.linear_solver,
            max_steps: self.budget.max_steps,
        }
    }
}

/// Everything a run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub geometry: GridGeometry,
    pub scheme: Scheme,
    pub timestep: TimestepPlan,
    pub snapshots: Vec<Snapshot>,
    /// Statistics in K over the full history, keyed by region name.
    pub region_stats: BTreeMap<String, RegionStats>,
    pub report_regions: Vec<String>,
    pub final_state: SimulationState,
    pub energy: EnergyLedger,
    /// Node clamps performed by the temperature guard.
    pub clamped_nodes: usize,
    /// Time-averaged sunlit fraction actually applied.
    pub mean_sunlit_fraction: f64,
}

impl SimulationResult {
    pub fn region(&self, name: &str) -> Option<&RegionStats> {
        self.region_stats.get(name)
    }

    /// Region statistics in degrees Celsius.
    pub fn region_celsius(&self, name: &str) -> Option<RegionStats> {
        self.region(name).map(RegionStats::in_celsius)
    }

    /// Largest nodal change between consecutive snapshots.
    pub fn max_successive_delta(&self) -> Vec<f64> {
        max_successive_delta(&self.snapshots)
    }
}

/// Run `config` with the illumination it describes.
pub fn run_simulation(config: &SimulationConfig) -> Result<SimulationResult, SimulationError> {
    let profile = config.illumination.build()?;
    run_simulation_with(config, &profile)
}

/// Run `config` with an external illumination source (its own
/// `illumination` entry is ignored).
pub fn run_simulation_with(
    config: &SimulationConfig,
    illumination: &dyn IlluminationSource,
) -> Result<SimulationResult, SimulationError> {
    let started = Instant::now();
    let nodes = config.grid.node_count(&config.layers)?;
    config.budget.check_nodes(nodes)?;
    let grid = build_grid(&config.layers, &config.grid, &config.heat_sources)?;

    for name in &config.report_regions {
        match grid.region_nodes(name) {
            None => return Err(ConfigurationError::UnknownRegion(name.clone()).into()),
            Some(region) if region.is_empty() => {
                return Err(ConfigurationError::EmptyRegion(name.clone()).into());
            }
            Some(_) => {}
        }
    }

    let horizon = match (config.run.total_time, illumination.duration()) {
        (Some(total), _) => total,
        (None, Some(duration)) => duration,
        (None, None) => {
            return Err(ConfigurationError::InvalidRunControls(
                "total_time is required when the illumination has no duration".into(),
            )
            .into());
        }
    };
    if let Some(duration) = illumination.duration() {
        if horizon > duration {
            warn!(
                horizon,
                duration, "Illumination ends before the run, holding its last value"
            );
        }
    }

    let settings = config.integrator_settings(horizon);
    let initial_temperature = config.run.initial_temperature;
    let geometry = grid.geometry();
    let mut integrator = TimeIntegrator::new(grid, config.optics, &settings, initial_temperature)?;
    let plan = *integrator.plan();
    config.budget.check_work(nodes, plan.steps)?;
    let mut recorder = SnapshotRecorder::new(
        integrator.grid(),
        &config.snapshots,
        plan.steps,
        plan.effective,
    )?;
    config
        .budget
        .check_snapshots(nodes, recorder.planned_steps().len())?;

    let dt = plan.effective;
    let sampling = config.run.illumination_sampling;
    let wall_limit = config.budget.wall_time();
    let mut sunlit = 0.0;

    recorder.observe(integrator.state());
    while integrator.status() != IntegratorStatus::Completed {
        let fraction = illumination.sample(sampling, integrator.state().time, dt);
        sunlit += fraction * dt;
        let state = integrator.step(fraction)?;
        recorder.observe(state);

        if let Some(limit) = wall_limit {
            if state.step % WALL_CLOCK_INTERVAL == 0 {
                let elapsed = started.elapsed();
                if elapsed > limit {
                    return Err(ResourceError::WallClockExceeded {
                        step: state.step,
                        elapsed,
                        limit,
                    }
                    .into());
                }
            }
        }
    }

    let energy = *integrator.ledger();
    info!(
        name = config.name.as_deref().unwrap_or("unnamed"),
        steps = integrator.state().step,
        elapsed_s = started.elapsed().as_secs_f64(),
        energy_residual = energy.relative_residual(),
        "Simulation finished"
    );

    Ok(SimulationResult {
        name: config.name.clone(),
        geometry,
        scheme: config.run.scheme,
        timestep: *integrator.plan(),
        region_stats: recorder.all_region_stats(),
        snapshots: recorder.into_snapshots(),
        report_regions: config.report_regions.clone(),
        final_state: integrator.state().clone(),
        energy,
        clamped_nodes: integrator.clamped_nodes(),
        mean_sunlit_fraction: sunlit / horizon,
    })
}

/// Run independent candidate configurations in parallel.
///
/// A failed candidate only affects its own entry.
pub fn run_batch(configs: &[SimulationConfig]) -> Vec<Result<SimulationResult, SimulationError>> {
    info!(candidates = configs.len(), "Running batch");
    configs.par_iter().map(run_simulation).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::heat_transfer::Resolution;

    fn short_1d() -> SimulationConfig {
        let mut config = SimulationConfig::reference_1d();
        config.grid = GridConfig::one_dimensional(11);
        config.run.total_time = Some(120.0);
        config.illumination = IlluminationInput::Constant { fraction: 1.0 };
        config
    }

    #[test]
    fn test_reference_configs_are_json_round_trippable() {
        for config in [SimulationConfig::reference_1d(), SimulationConfig::reference_2d()] {
            let json = serde_json::to_string_pretty(&config).unwrap();
            let back: SimulationConfig = serde_json::from_str(&json).unwrap();
            assert_eq!(back.layers.len(), config.layers.len());
            assert_eq!(back.illumination, config.illumination);
            assert_eq!(back.report_regions, config.report_regions);
            assert_eq!(back.heat_sources.len(), config.heat_sources.len());
            for (a, b) in back.layers.iter().zip(&config.layers) {
                assert_eq!(a.name, b.name);
                assert!((a.thickness - b.thickness).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "layers": [
                {"name": "plate", "thickness": 0.002, "conductivity": 200.0,
                 "density": 2700.0, "specific_heat": 900.0}
            ],
            "grid": {"thickness_resolution": {"nodes": 5}},
            "run": {"total_time": 10.0, "timestep": 1.0}
        }"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.run.scheme, Scheme::CrankNicolson);
        assert_eq!(config.run.initial_temperature, 290.0);
        assert_eq!(config.illumination, IlluminationInput::Constant { fraction: 1.0 });
        assert_eq!(config.grid.area, 1.0);

        let result = run_simulation(&config).unwrap();
        assert_eq!(result.final_state.step, 10);
        assert!((result.final_state.time - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_run_reports_requested_regions() {
        let result = run_simulation(&short_1d()).unwrap();
        let pcb = result.region("pcb").unwrap();
        assert!(pcb.max >= pcb.mean && pcb.mean >= pcb.min);
        assert!(result.region_celsius("pcb").unwrap().mean < pcb.mean);
        assert_eq!(result.snapshots.first().unwrap().step(), 0);
        assert_eq!(result.snapshots.last().unwrap().step(), result.timestep.steps);
        assert!((result.mean_sunlit_fraction - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_report_region_fails_before_stepping() {
        let mut config = short_1d();
        config.report_regions = vec!["asic".into()];
        let err = run_simulation(&config).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Configuration(ConfigurationError::UnknownRegion(_))
        ));
    }

    #[test]
    fn test_unbounded_illumination_needs_total_time() {
        let mut config = short_1d();
        config.run.total_time = None;
        assert!(matches!(
            run_simulation(&config),
            Err(SimulationError::Configuration(
                ConfigurationError::InvalidRunControls(_)
            ))
        ));
    }

    #[test]
    fn test_budget_limits() {
        let mut config = short_1d();
        config.budget.max_nodes = 5;
        assert!(matches!(
            run_simulation(&config),
            Err(SimulationError::Resource(ResourceError::TooManyNodes {
                nodes: 11,
                limit: 5
            }))
        ));

        let mut config = short_1d();
        config.budget.max_steps = 10;
        assert!(matches!(
            run_simulation(&config),
            Err(SimulationError::Resource(ResourceError::TooManySteps { .. }))
        ));

        let mut config = short_1d();
        config.budget.max_snapshot_bytes = 16;
        assert!(matches!(
            run_simulation(&config),
            Err(SimulationError::Resource(ResourceError::SnapshotMemory { .. }))
        ));

        let mut config = short_1d();
        config.run.total_time = Some(1000.0);
        config.budget.max_wall_time_s = Some(0.0);
        assert!(matches!(
            run_simulation(&config),
            Err(SimulationError::Resource(ResourceError::WallClockExceeded { step: 256, .. }))
        ));
    }

    #[test]
    fn test_extreme_horizon_is_rejected_by_step_budget() {
        let mut config = short_1d();
        config.run.total_time = Some(1e20);
        assert!(matches!(
            run_simulation(&config),
            Err(SimulationError::Resource(ResourceError::TooManySteps { .. }))
        ));
    }

    #[test]
    fn test_node_budget_is_checked_before_building_the_grid() {
        let mut config = short_1d();
        config.grid = GridConfig::one_dimensional(20_000_000);
        config.budget.max_nodes = 10;
        let started = Instant::now();
        assert!(matches!(
            run_simulation(&config),
            Err(SimulationError::Resource(ResourceError::TooManyNodes {
                nodes: 20_000_000,
                limit: 10
            }))
        ));
        assert!(started.elapsed() < Duration::from_secs(1));

        let mut config = short_1d();
        config.grid.thickness_resolution = Resolution::Spacing(1e-300);
        assert!(matches!(
            run_simulation(&config),
            Err(SimulationError::Configuration(ConfigurationError::InvalidGrid(_)))
        ));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let good = short_1d();
        let mut bad = short_1d();
        bad.layers[0].conductivity = 0.0;
        let results = run_batch(&[good.clone(), bad, good]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(SimulationError::Configuration(
                ConfigurationError::NonPositiveProperty { .. }
            ))
        ));
        assert!(results[2].is_ok());
    }
}
