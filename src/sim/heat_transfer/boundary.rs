use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::sim::heat_transfer::grid::Grid;

/// Stefan-Boltzmann constant in W/(m^2*K^4).
pub const STEFAN_BOLTZMANN: f64 = 5.670374419e-8;

/// Optical and radiative properties of the two panel surfaces.
///
/// The top surface faces the sun and deep space, the bottom (radiator)
/// surface sees deep space through `view_factor`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryOptics {
    /// Solar absorptivity of the top surface [0, 1].
    pub absorptivity: f64,
    /// Infrared emissivity of the top surface [0, 1].
    pub emissivity_top: f64,
    /// Infrared emissivity of the radiator [0, 1].
    pub emissivity_bottom: f64,
    /// Radiator view factor to deep space [0, 1].
    pub view_factor: f64,
    /// Radiating area of the radiator relative to the panel footprint.
    pub area_factor: f64,
    /// Radiating area of the top surface relative to the panel footprint.
    pub top_area_factor: f64,
    /// Solar flux at the panel in W/m^2.
    pub solar_flux: f64,
    /// Effective temperature of deep space in K.
    pub space_temperature: f64,
}

impl Default for BoundaryOptics {
    fn default() -> Self {
        Self {
            absorptivity: 0.9,
            emissivity_top: 0.9,
            emissivity_bottom: 0.85,
            view_factor: 1.0,
            area_factor: 1.0,
            top_area_factor: 1.0,
            solar_flux: 1361.0,
            space_temperature: 2.7,
        }
    }
}

impl BoundaryOptics {
    /// No solar input and no radiative exchange on either surface.
    pub fn adiabatic() -> Self {
        Self {
            absorptivity: 0.0,
            emissivity_top: 0.0,
            emissivity_bottom: 0.0,
            solar_flux: 0.0,
            ..Self::default()
        }
    }

    pub fn with_solar_flux(mut self, solar_flux: f64) -> Self {
        self.solar_flux = solar_flux;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let unit = [
            ("absorptivity", self.absorptivity),
            ("emissivity_top", self.emissivity_top),
            ("emissivity_bottom", self.emissivity_bottom),
            ("view_factor", self.view_factor),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidOptics(format!(
                    "{name} must be in [0, 1] (got {value})"
                )));
            }
        }
        let non_negative = [
            ("area_factor", self.area_factor),
            ("top_area_factor", self.top_area_factor),
            ("solar_flux", self.solar_flux),
            ("space_temperature", self.space_temperature),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigurationError::InvalidOptics(format!(
                    "{name} must be finite and non-negative (got {value})"
                )));
            }
        }
        Ok(())
    }

    /// Absorbed solar flux in W/m^2 for a given sunlit fraction.
    pub fn absorbed_solar(&self, illumination_fraction: f64) -> f64 {
        self.absorptivity * self.solar_flux * illumination_fraction
    }

    /// Net flux into the top surface in W/m^2 (positive = heating).
    pub fn top_flux(&self, temperature: f64, illumination_fraction: f64) -> f64 {
        self.absorbed_solar(illumination_fraction) - self.top_emission(temperature)
    }

    /// Net flux into the radiator surface in W/m^2 (always <= 0 above space temperature).
    pub fn bottom_flux(&self, temperature: f64) -> f64 {
        -self.bottom_emission(temperature)
    }

    /// Slope of the top emission `d(flux)/dT` in W/(m^2*K).
    pub fn top_emission_slope(&self, temperature: f64) -> f64 {
        4.0 * self.emissivity_top * self.top_area_factor * STEFAN_BOLTZMANN * temperature.powi(3)
    }

    /// Slope of the radiator emission `d(flux)/dT` in W/(m^2*K).
    pub fn bottom_emission_slope(&self, temperature: f64) -> f64 {
        4.0 * self.emissivity_bottom
            * self.view_factor
            * self.area_factor
            * STEFAN_BOLTZMANN
            * temperature.powi(3)
    }

    fn top_emission(&self, temperature: f64) -> f64 {
        self.emissivity_top
            * self.top_area_factor
            * STEFAN_BOLTZMANN
            * (temperature.powi(4) - self.space_temperature.powi(4))
    }

    fn bottom_emission(&self, temperature: f64) -> f64 {
        self.emissivity_bottom
            * self.view_factor
            * self.area_factor
            * STEFAN_BOLTZMANN
            * (temperature.powi(4) - self.space_temperature.powi(4))
    }
}

/// Heat exchanged through the two surfaces during one evaluation, in W.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundaryExchange {
    pub absorbed_solar: f64,
    pub emitted_top: f64,
    pub emitted_bottom: f64,
}

impl BoundaryExchange {
    /// Net heat rate into the panel in W.
    pub fn net(&self) -> f64 {
        self.absorbed_solar - self.emitted_top - self.emitted_bottom
    }
}

/// Radiative/solar boundary of a grid: the whole first row faces the sun,
/// the whole last row is the radiator.
#[derive(Debug, Clone)]
pub struct BoundaryModel {
    optics: BoundaryOptics,
    /// (node, exposed face area in m^2)
    top: Vec<(usize, f64)>,
    bottom: Vec<(usize, f64)>,
}

impl BoundaryModel {
    pub fn new(grid: &Grid, optics: BoundaryOptics) -> Result<Self, ConfigurationError> {
        optics.validate()?;
        let top = grid
            .top_nodes()
            .enumerate()
            .map(|(i, idx)| (idx, grid.column_area(i)))
            .collect();
        let bottom = grid
            .bottom_nodes()
            .enumerate()
            .map(|(i, idx)| (idx, grid.column_area(i)))
            .collect();
        Ok(Self {
            optics,
            top,
            bottom,
        })
    }

    /// Add the boundary heat rates (W) evaluated at `temperatures` to `rates`.
    ///
    /// The fourth-power terms are evaluated at the given field; callers that
    /// advance implicitly therefore lag them by one step.
    pub fn accumulate(
        &self,
        temperatures: &[f64],
        illumination_fraction: f64,
        rates: &mut [f64],
    ) -> BoundaryExchange {
        let mut exchange = BoundaryExchange::default();
        let absorbed = self.optics.absorbed_solar(illumination_fraction);
        for &(idx, area) in &self.top {
            let emitted = self.optics.top_emission(temperatures[idx]);
            rates[idx] += (absorbed - emitted) * area;
            exchange.absorbed_solar += absorbed * area;
            exchange.emitted_top += emitted * area;
        }
        for &(idx, area) in &self.bottom {
            let emitted = self.optics.bottom_emission(temperatures[idx]);
            rates[idx] -= emitted * area;
            exchange.emitted_bottom += emitted * area;
        }
        exchange
    }

    /// Add the linearised radiative conductance (W/K) of each surface node
    /// at a uniform `temperature` to `out`.
    pub fn add_radiative_conductance(&self, temperature: f64, out: &mut [f64]) {
        let top = self.optics.top_emission_slope(temperature);
        for &(idx, area) in &self.top {
            out[idx] += top * area;
        }
        let bottom = self.optics.bottom_emission_slope(temperature);
        for &(idx, area) in &self.bottom {
            out[idx] += bottom * area;
        }
    }

    /// Mean temperature of the sun-facing row.
    pub fn top_temperature(&self, temperatures: &[f64]) -> f64 {
        mean_of(&self.top, temperatures)
    }

    /// Mean temperature of the radiator row.
    pub fn bottom_temperature(&self, temperatures: &[f64]) -> f64 {
        mean_of(&self.bottom, temperatures)
    }
}

fn mean_of(nodes: &[(usize, f64)], temperatures: &[f64]) -> f64 {
    let sum: f64 = nodes.iter().map(|&(idx, _)| temperatures[idx]).sum();
    sum / nodes.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::heat_transfer::grid::{GridConfig, build_grid};
    use crate::sim::materials::reference_stack_1d;

    #[test]
    fn test_top_flux_matches_formula() {
        let optics = BoundaryOptics {
            top_area_factor: 0.3,
            ..BoundaryOptics::default()
        };
        let t: f64 = 300.0;
        let expected = 0.9 * 1361.0 * 0.5
            - 0.9 * 0.3 * STEFAN_BOLTZMANN * (t.powi(4) - 2.7_f64.powi(4));
        assert!((optics.top_flux(t, 0.5) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_bottom_flux_is_cooling() {
        let optics = BoundaryOptics::default();
        assert!(optics.bottom_flux(300.0) < 0.0);
        assert!(optics.bottom_flux(optics.space_temperature).abs() < 1e-12);
        let expected = -0.85 * STEFAN_BOLTZMANN * (300.0_f64.powi(4) - 2.7_f64.powi(4));
        assert!((optics.bottom_flux(300.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_adiabatic_optics_exchange_nothing() {
        let optics = BoundaryOptics::adiabatic();
        assert_eq!(optics.top_flux(400.0, 1.0), 0.0);
        assert_eq!(optics.bottom_flux(400.0), 0.0);
    }

    #[test]
    fn test_optics_validation() {
        let bad = BoundaryOptics {
            emissivity_top: 1.2,
            ..BoundaryOptics::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigurationError::InvalidOptics(_))));

        let negative = BoundaryOptics::default().with_solar_flux(-1.0);
        assert!(negative.validate().is_err());
        assert!(BoundaryOptics::default().validate().is_ok());
    }

    #[test]
    fn test_accumulate_scales_by_face_area() {
        let layers = reference_stack_1d();
        let mut config = GridConfig::one_dimensional(11);
        config.area = 0.5;
        let grid = build_grid(&layers, &config, &[]).unwrap();
        let model = BoundaryModel::new(&grid, BoundaryOptics::default()).unwrap();

        let temps = vec![300.0; grid.node_count()];
        let mut rates = vec![0.0; grid.node_count()];
        let exchange = model.accumulate(&temps, 1.0, &mut rates);

        let optics = BoundaryOptics::default();
        assert!((rates[0] - optics.top_flux(300.0, 1.0) * 0.5).abs() < 1e-9);
        assert!((rates[10] - optics.bottom_flux(300.0) * 0.5).abs() < 1e-9);
        assert!(rates[1..10].iter().all(|&r| r == 0.0));
        assert!((exchange.net() - (rates[0] + rates[10])).abs() < 1e-9);
    }

    #[test]
    fn test_radiative_conductance_is_emission_slope() {
        let layers = reference_stack_1d();
        let grid = build_grid(&layers, &GridConfig::one_dimensional(11), &[]).unwrap();
        let optics = BoundaryOptics::default();
        let model = BoundaryModel::new(&grid, optics).unwrap();

        let mut conductance = vec![0.0; grid.node_count()];
        model.add_radiative_conductance(400.0, &mut conductance);

        let h = 1e-3;
        let slope = (optics.bottom_flux(400.0 - h) - optics.bottom_flux(400.0 + h)) / (2.0 * h);
        assert!((conductance[10] - slope).abs() < 1e-6, "{} vs {slope}", conductance[10]);
        assert!((conductance[0] - optics.top_emission_slope(400.0)).abs() < 1e-12);
        assert!(conductance[1..10].iter().all(|&g| g == 0.0));

        let mut none = vec![0.0; grid.node_count()];
        BoundaryModel::new(&grid, BoundaryOptics::adiabatic())
            .unwrap()
            .add_radiative_conductance(400.0, &mut none);
        assert!(none.iter().all(|&g| g == 0.0));
    }
}
