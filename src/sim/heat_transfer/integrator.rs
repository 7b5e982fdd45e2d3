use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigurationError, NumericalError, ResourceError, SimulationError};
use crate::sim::heat_transfer::boundary::{BoundaryExchange, BoundaryModel, BoundaryOptics};
use crate::sim::heat_transfer::grid::Grid;
use crate::sim::heat_transfer::network::ConductanceNetwork;
use crate::sim::heat_transfer::solver_sparse::{
    LinearSolver, LinearSolverConfig, SymmetricSparseMatrix,
};

/// Steps logged at debug level after the start of a run.
const DEBUG_STEPS: usize = 3;

/// Temperature field of one run at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Node temperatures in K, row-major (row 0 = sun-facing surface).
    pub temperatures: Vec<f64>,
    /// Simulated time in s.
    pub time: f64,
    /// Number of completed steps.
    pub step: usize,
}

impl SimulationState {
    /// Uniform field at time zero.
    pub fn initial(grid: &Grid, temperature: f64) -> Self {
        Self {
            temperatures: vec![temperature; grid.node_count()],
            time: 0.0,
            step: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegratorStatus {
    Initialized,
    Stepping,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Forward Euler, timestep bounded by the stability limit.
    Explicit,
    /// Trapezoidal rule with the radiative terms lagged by one step.
    #[default]
    CrankNicolson,
}

/// What to do with an explicit timestep above the stability limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplicitTimestepPolicy {
    /// Reduce to half the limit and log a warning.
    #[default]
    Clamp,
    /// Fail with [`NumericalError::UnstableTimestep`].
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPolicy {
    #[default]
    Fail,
    /// Clamp offending nodes to the limit; the removed energy is booked in the ledger.
    Clamp,
}

/// Sanity bound on the temperature field, checked after every step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureGuard {
    /// Upper bound in K.
    pub max_temperature: f64,
    pub policy: LimitPolicy,
}

impl Default for TemperatureGuard {
    fn default() -> Self {
        Self {
            max_temperature: 5000.0,
            policy: LimitPolicy::Fail,
        }
    }
}

/// Outcome of checking one candidate field.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GuardReport {
    pub clamped_nodes: usize,
    /// Energy removed by clamping in J.
    pub removed_energy: f64,
}

impl TemperatureGuard {
    /// Reject non-finite or negative temperatures and apply the upper bound.
    pub fn inspect(
        &self,
        field: &mut [f64],
        capacities: &[f64],
    ) -> Result<GuardReport, NumericalError> {
        let mut report = GuardReport::default();
        for (node, t) in field.iter_mut().enumerate() {
            let value = *t;
            if !value.is_finite() {
                return Err(NumericalError::NonFinite { node, value });
            }
            if value < 0.0 {
                return Err(NumericalError::NegativeTemperature { node, value });
            }
            if value > self.max_temperature {
                match self.policy {
                    LimitPolicy::Fail => {
                        return Err(NumericalError::TemperatureLimitExceeded {
                            node,
                            value,
                            limit: self.max_temperature,
                        });
                    }
                    LimitPolicy::Clamp => {
                        report.clamped_nodes += 1;
                        report.removed_energy += capacities[node] * (value - self.max_temperature);
                        *t = self.max_temperature;
                    }
                }
            }
        }
        Ok(report)
    }
}

/// Run controls of one integration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorSettings {
    pub scheme: Scheme,
    /// Requested timestep in s.
    pub timestep: f64,
    /// Simulated time span in s.
    pub horizon: f64,
    pub explicit_timestep_policy: ExplicitTimestepPolicy,
    pub temperature_guard: TemperatureGuard,
    pub linear_solver: LinearSolverConfig,
    /// Largest step count a plan may use.
    pub max_steps: usize,
}

impl IntegratorSettings {
    pub fn new(scheme: Scheme, timestep: f64, horizon: f64) -> Self {
        Self {
            scheme,
            timestep,
            horizon,
            explicit_timestep_policy: ExplicitTimestepPolicy::default(),
            temperature_guard: TemperatureGuard::default(),
            linear_solver: LinearSolverConfig::default(),
            max_steps: usize::MAX,
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(ConfigurationError::InvalidRunControls(format!(
                "timestep must be positive (got {})",
                self.timestep
            )));
        }
        if !(self.horizon.is_finite() && self.horizon > 0.0) {
            return Err(ConfigurationError::InvalidRunControls(format!(
                "total time must be positive (got {})",
                self.horizon
            )));
        }
        let limit = self.temperature_guard.max_temperature;
        if !(limit.is_finite() && limit > 0.0) {
            return Err(ConfigurationError::InvalidRunControls(format!(
                "max_temperature must be positive (got {limit})"
            )));
        }
        Ok(())
    }
}

/// Timestep actually used by a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimestepPlan {
    pub requested: f64,
    pub effective: f64,
    pub steps: usize,
    /// Explicit stability limit in s (informational for Crank-Nicolson).
    pub stability_limit: f64,
    /// Whether the requested timestep was reduced for stability.
    pub clamped: bool,
}

/// Largest stable forward-Euler timestep in s.
///
/// The smaller of the uniform-diffusivity bound `1 / (2 alpha_max sum 1/h^2)`
/// and the Gershgorin bound of the assembled operator, which also covers
/// material interfaces, half-volume edge nodes and the surface radiation
/// linearised at `temperature_bound`.
pub fn stability_limit(
    grid: &Grid,
    network: &ConductanceNetwork,
    boundary: &BoundaryModel,
    temperature_bound: f64,
) -> f64 {
    let alpha = grid.max_diffusivity();
    let mut inv_h2 = 1.0 / (grid.dy() * grid.dy());
    if let Some(dx) = grid.dx() {
        inv_h2 += 1.0 / (dx * dx);
    }
    let uniform = if alpha > 0.0 {
        1.0 / (2.0 * alpha * inv_h2)
    } else {
        f64::INFINITY
    };
    let mut radiative = vec![0.0; grid.node_count()];
    boundary.add_radiative_conductance(temperature_bound, &mut radiative);
    uniform.min(network.gershgorin_limit(&grid.capacities(), &radiative))
}

/// Choose the timestep and step count for `settings` given the explicit
/// stability `limit`.
///
/// The step count is `ceil(horizon / dt)` and the effective timestep
/// `horizon / steps`, so the run ends exactly at the horizon without
/// exceeding the safe timestep.
fn plan_timestep(
    settings: &IntegratorSettings,
    limit: f64,
    initial: &SimulationState,
) -> Result<TimestepPlan, SimulationError> {
    let requested = settings.timestep;
    let mut target = requested;
    let mut clamped = false;
    if settings.scheme == Scheme::Explicit && requested > limit {
        match settings.explicit_timestep_policy {
            ExplicitTimestepPolicy::Clamp => {
                target = 0.5 * limit;
                clamped = true;
                warn!(
                    requested,
                    limit,
                    effective = target,
                    "Explicit timestep exceeds the stability limit, clamping"
                );
            }
            ExplicitTimestepPolicy::Reject => {
                return Err(SimulationError::Numerical {
                    step: 0,
                    source: NumericalError::UnstableTimestep { requested, limit },
                    last_state: Box::new(initial.clone()),
                });
            }
        }
    }
    let steps = ((settings.horizon / target) * (1.0 - 1e-12)).ceil().max(1.0);
    if !(steps <= settings.max_steps as f64) {
        return Err(ResourceError::TooManySteps {
            steps: steps as usize,
            limit: settings.max_steps,
        }
        .into());
    }
    let steps = steps as usize;
    Ok(TimestepPlan {
        requested,
        effective: settings.horizon / steps as f64,
        steps,
        stability_limit: limit,
        clamped,
    })
}

/// Energy balance of a run in J.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyLedger {
    /// Heat generated by layers and heat sources.
    pub source: f64,
    /// Net heat entering through both surfaces.
    pub boundary_net: f64,
    pub absorbed_solar: f64,
    /// Heat radiated by both surfaces.
    pub emitted: f64,
    /// Heat removed by temperature clamping.
    pub clamped: f64,
    /// Change of stored thermal energy since the start.
    pub stored_change: f64,
}

impl EnergyLedger {
    /// Stored change not explained by sources, boundaries and clamping.
    pub fn residual(&self) -> f64 {
        self.stored_change - (self.source + self.boundary_net - self.clamped)
    }

    /// Residual relative to the largest ledger term.
    pub fn relative_residual(&self) -> f64 {
        let scale = [
            self.source.abs(),
            self.boundary_net.abs(),
            self.absorbed_solar.abs(),
            self.emitted.abs(),
            self.stored_change.abs(),
        ]
        .into_iter()
        .fold(0.0, f64::max);
        if scale > 0.0 {
            self.residual().abs() / scale
        } else {
            0.0
        }
    }

    fn record(&mut self, exchange: BoundaryExchange, source_power: f64, dt: f64) {
        self.source += source_power * dt;
        self.boundary_net += exchange.net() * dt;
        self.absorbed_solar += exchange.absorbed_solar * dt;
        self.emitted += (exchange.emitted_top + exchange.emitted_bottom) * dt;
    }
}

/// Advances the temperature field of one grid.
///
/// The conduction operator and (for Crank-Nicolson) the factored system
/// matrix are built once in [`TimeIntegrator::new`]; each [`step`] only
/// evaluates the boundary and performs one update or solve.
///
/// [`step`]: TimeIntegrator::step
pub struct TimeIntegrator {
    grid: Grid,
    network: ConductanceNetwork,
    boundary: BoundaryModel,
    capacities: Vec<f64>,
    sources: Vec<f64>,
    total_source_power: f64,
    solver: Option<LinearSolver>,
    scheme: Scheme,
    guard: TemperatureGuard,
    plan: TimestepPlan,
    state: SimulationState,
    status: IntegratorStatus,
    ledger: EnergyLedger,
    clamped_nodes: usize,
    rates: Vec<f64>,
    next: Vec<f64>,
}

impl TimeIntegrator {
    pub fn new(
        grid: Grid,
        optics: BoundaryOptics,
        settings: &IntegratorSettings,
        initial_temperature: f64,
    ) -> Result<Self, SimulationError> {
        settings.validate()?;
        if !(initial_temperature.is_finite() && initial_temperature > 0.0) {
            return Err(ConfigurationError::InvalidRunControls(format!(
                "initial temperature must be positive kelvin (got {initial_temperature})"
            ))
            .into());
        }

        let boundary = BoundaryModel::new(&grid, optics)?;
        let network = ConductanceNetwork::assemble(&grid);
        let capacities = grid.capacities();
        let sources: Vec<f64> = (0..grid.node_count()).map(|i| grid.source_power(i)).collect();
        let total_source_power = sources.iter().sum();
        let n = grid.node_count();
        let state = SimulationState::initial(&grid, initial_temperature);

        let temperature_bound = initial_temperature.max(settings.temperature_guard.max_temperature);
        let limit = stability_limit(&grid, &network, &boundary, temperature_bound);
        let plan = plan_timestep(settings, limit, &state)?;

        let solver = match settings.scheme {
            Scheme::Explicit => None,
            Scheme::CrankNicolson => {
                let matrix =
                    SymmetricSparseMatrix::crank_nicolson(&capacities, &network, plan.effective);
                let solver = LinearSolver::prepare(matrix, settings.linear_solver).map_err(
                    |source| SimulationError::Numerical {
                        step: 0,
                        source,
                        last_state: Box::new(state.clone()),
                    },
                )?;
                Some(solver)
            }
        };

        info!(
            nodes = n,
            nx = grid.nx(),
            ny = grid.ny(),
            scheme = ?settings.scheme,
            dt = plan.effective,
            steps = plan.steps,
            stability_limit = plan.stability_limit,
            source_power = total_source_power,
            "Time integrator ready"
        );

        Ok(Self {
            grid,
            network,
            boundary,
            capacities,
            sources,
            total_source_power,
            solver,
            scheme: settings.scheme,
            guard: settings.temperature_guard,
            plan,
            state,
            status: IntegratorStatus::Initialized,
            ledger: EnergyLedger::default(),
            clamped_nodes: 0,
            rates: vec![0.0; n],
            next: vec![0.0; n],
        })
    }

    /// Advance one timestep with the given sunlit fraction.
    ///
    /// On failure the state stays at the last valid step and the integrator
    /// moves to [`IntegratorStatus::Failed`].
    pub fn step(&mut self, illumination_fraction: f64) -> Result<&SimulationState, SimulationError> {
        match self.status {
            IntegratorStatus::Completed | IntegratorStatus::Failed => {
                return Err(ConfigurationError::InvalidRunControls(format!(
                    "integrator is {:?} and cannot step",
                    self.status
                ))
                .into());
            }
            IntegratorStatus::Initialized | IntegratorStatus::Stepping => {}
        }
        if !(0.0..=1.0).contains(&illumination_fraction) {
            return Err(ConfigurationError::InvalidIllumination(format!(
                "sunlit fraction must be in [0, 1] (got {illumination_fraction})"
            ))
            .into());
        }
        self.status = IntegratorStatus::Stepping;

        let dt = self.plan.effective;
        let exchange = match self.advance(illumination_fraction, dt) {
            Ok(exchange) => exchange,
            Err(source) => return Err(self.fail(source)),
        };
        let report = match self.guard.inspect(&mut self.next, &self.capacities) {
            Ok(report) => report,
            Err(source) => return Err(self.fail(source)),
        };
        if report.clamped_nodes > 0 {
            warn!(
                step = self.state.step + 1,
                nodes = report.clamped_nodes,
                limit = self.guard.max_temperature,
                removed_energy = report.removed_energy,
                "Temperature clamped to the configured limit"
            );
        }

        let stored: f64 = self
            .next
            .iter()
            .zip(&self.state.temperatures)
            .zip(&self.capacities)
            .map(|((new, old), c)| c * (new - old))
            .sum();
        self.ledger.record(exchange, self.total_source_power, dt);
        self.ledger.clamped += report.removed_energy;
        self.ledger.stored_change += stored;
        self.clamped_nodes += report.clamped_nodes;

        std::mem::swap(&mut self.state.temperatures, &mut self.next);
        self.state.step += 1;
        self.state.time = self.state.step as f64 * dt;

        if self.state.step <= DEBUG_STEPS {
            debug!(
                step = self.state.step,
                time = self.state.time,
                top = self.boundary.top_temperature(&self.state.temperatures),
                bottom = self.boundary.bottom_temperature(&self.state.temperatures),
                "Step"
            );
        }
        if self.state.step >= self.plan.steps {
            self.status = IntegratorStatus::Completed;
            info!(
                steps = self.state.step,
                time = self.state.time,
                energy_residual = self.ledger.residual(),
                "Integration completed"
            );
        }
        Ok(&self.state)
    }

    /// Write the candidate field into `self.next`.
    fn advance(&mut self, fraction: f64, dt: f64) -> Result<BoundaryExchange, NumericalError> {
        let temps = &self.state.temperatures;
        self.network.heat_flow(temps, &mut self.rates);
        let exchange = match self.scheme {
            Scheme::Explicit => {
                for (r, s) in self.rates.iter_mut().zip(&self.sources) {
                    *r += s;
                }
                let exchange = self.boundary.accumulate(temps, fraction, &mut self.rates);
                for i in 0..temps.len() {
                    self.next[i] = temps[i] + dt * self.rates[i] / self.capacities[i];
                }
                exchange
            }
            Scheme::CrankNicolson => {
                // rhs = (C/dt - K/2) T + S + B(T)
                for i in 0..temps.len() {
                    self.rates[i] =
                        self.capacities[i] / dt * temps[i] + 0.5 * self.rates[i] + self.sources[i];
                }
                let exchange = self.boundary.accumulate(temps, fraction, &mut self.rates);
                self.next.copy_from_slice(temps);
                if let Some(solver) = &self.solver {
                    solver.solve(&self.rates, &mut self.next)?;
                }
                exchange
            }
        };
        Ok(exchange)
    }

    fn fail(&mut self, source: NumericalError) -> SimulationError {
        self.status = IntegratorStatus::Failed;
        let step = self.state.step + 1;
        warn!(step, error = %source, "Integration failed");
        SimulationError::Numerical {
            step,
            source,
            last_state: Box::new(self.state.clone()),
        }
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn status(&self) -> IntegratorStatus {
        self.status
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn plan(&self) -> &TimestepPlan {
        &self.plan
    }

    pub fn ledger(&self) -> &EnergyLedger {
        &self.ledger
    }

    /// Total number of node clamps over the run.
    pub fn clamped_nodes(&self) -> usize {
        self.clamped_nodes
    }
}
