use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// A single layer of the panel stack.
///
/// Layers are listed from the sun-facing side (top) to the radiator (bottom).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    /// Thickness in meters.
    pub thickness: f64,
    /// Thermal conductivity in W/(m*K).
    pub conductivity: f64,
    /// Density in kg/m^3.
    pub density: f64,
    /// Specific heat capacity in J/(kg*K).
    pub specific_heat: f64,
    /// Total power dissipated uniformly inside the layer, in W.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_power: Option<f64>,
}

/// Bulk thermal properties of a material (used for heat-source footprints).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalProperties {
    /// Thermal conductivity in W/(m*K).
    pub conductivity: f64,
    /// Density in kg/m^3.
    pub density: f64,
    /// Specific heat in J/(kg*K).
    pub specific_heat: f64,
}

/// An embedded heat source (ASIC) placed inside a host layer of a 2-D grid.
///
/// Each entry of `centers` is one instance with the same width and power.
/// The footprint spans the full thickness of the host layer laterally from
/// `center - width / 2` to `center + width / 2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatSourcePlacement {
    pub name: String,
    /// Name of the layer the source sits in.
    pub host_layer: String,
    /// Lateral centre positions in meters.
    pub centers: Vec<f64>,
    /// Lateral width in meters.
    pub width: f64,
    /// Power per instance in W.
    pub power: f64,
    /// Material of the footprint. Defaults to the host layer material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<ThermalProperties>,
}

impl Layer {
    pub fn new(
        name: &str,
        thickness: f64,
        conductivity: f64,
        density: f64,
        specific_heat: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            thickness,
            conductivity,
            density,
            specific_heat,
            embedded_power: None,
        }
    }

    pub fn with_embedded_power(mut self, power: f64) -> Self {
        self.embedded_power = Some(power);
        self
    }

    pub fn properties(&self) -> ThermalProperties {
        ThermalProperties {
            conductivity: self.conductivity,
            density: self.density,
            specific_heat: self.specific_heat,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_positive(&self.name, "thickness", self.thickness)?;
        self.properties().validate(&self.name)?;
        if let Some(p) = self.embedded_power {
            if !p.is_finite() || p < 0.0 {
                return Err(ConfigurationError::NonPositiveProperty {
                    layer: self.name.clone(),
                    property: "embedded_power",
                    value: p,
                });
            }
        }
        Ok(())
    }
}

impl ThermalProperties {
    pub fn new(conductivity: f64, density: f64, specific_heat: f64) -> Self {
        Self {
            conductivity,
            density,
            specific_heat,
        }
    }

    pub fn validate(&self, owner: &str) -> Result<(), ConfigurationError> {
        check_positive(owner, "conductivity", self.conductivity)?;
        check_positive(owner, "density", self.density)?;
        check_positive(owner, "specific_heat", self.specific_heat)
    }
}

impl HeatSourcePlacement {
    /// Single-instance source centred at `center`.
    pub fn new(name: &str, host_layer: &str, center: f64, width: f64, power: f64) -> Self {
        Self {
            name: name.to_string(),
            host_layer: host_layer.to_string(),
            centers: vec![center],
            width,
            power,
            material: None,
        }
    }

    pub fn with_centers(mut self, centers: Vec<f64>) -> Self {
        self.centers = centers;
        self
    }

    pub fn with_material(mut self, material: ThermalProperties) -> Self {
        self.material = Some(material);
        self
    }

    /// Total power of all instances in W.
    pub fn total_power(&self) -> f64 {
        self.power * self.centers.len() as f64
    }

    /// Region name of one instance. Single-instance sources use the bare name.
    pub fn instance_name(&self, instance: usize) -> String {
        if self.centers.len() == 1 {
            self.name.clone()
        } else {
            format!("{}[{}]", self.name, instance)
        }
    }
}

fn check_positive(owner: &str, property: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::NonPositiveProperty {
            layer: owner.to_string(),
            property,
            value,
        })
    }
}

/// Total thickness of a layer stack in meters.
pub fn stack_thickness(layers: &[Layer]) -> f64 {
    layers.iter().map(|l| l.thickness).sum()
}

/// Cumulative layer boundary offsets, starting at 0 and ending at the stack thickness.
pub fn layer_boundaries(layers: &[Layer]) -> Vec<f64> {
    let mut bounds = Vec::with_capacity(layers.len() + 1);
    let mut acc = 0.0;
    bounds.push(acc);
    for layer in layers {
        acc += layer.thickness;
        bounds.push(acc);
    }
    bounds
}

/// Five-layer 1-D panel: solar cells, TIM, FR4 board dissipating 9 W, TIM, aluminium radiator.
pub fn reference_stack_1d() -> Vec<Layer> {
    vec![
        Layer::new("solar_cells", 0.0002, 150.0, 2320.0, 800.0),
        Layer::new("tim_top", 0.001, 1.5, 2100.0, 1000.0),
        Layer::new("pcb", 0.003, 150.0, 1850.0, 820.0).with_embedded_power(9.0),
        Layer::new("tim_bottom", 0.001, 1.5, 2100.0, 1000.0),
        Layer::new("radiator", 0.002, 205.0, 2700.0, 877.0),
    ]
}

/// Six-layer 2-D panel cross-section with a dedicated ASIC layer.
pub fn reference_stack_2d() -> Vec<Layer> {
    vec![
        Layer::new("solar_cells", 0.0002, 150.0, 2330.0, 700.0),
        Layer::new("tim_top", 0.0002, 3.0, 2200.0, 1000.0),
        Layer::new("pcb", 0.0016, 0.3, 1850.0, 900.0),
        Layer::new("asic", 0.001, 130.0, 2330.0, 700.0),
        Layer::new("tim_bottom", 0.0002, 3.0, 2200.0, 1000.0),
        Layer::new("radiator", 0.002, 205.0, 2700.0, 900.0),
    ]
}

/// Silicon ASIC material.
pub fn asic_material() -> ThermalProperties {
    ThermalProperties::new(130.0, 2330.0, 700.0)
}

/// 8 mm wide, 9 W ASIC centred on a 20 mm wide cross-section.
pub fn reference_asic() -> HeatSourcePlacement {
    HeatSourcePlacement::new("asic_die", "asic", 0.010, 0.008, 9.0).with_material(asic_material())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_boundaries_accumulate() {
        let layers = reference_stack_1d();
        let b = layer_boundaries(&layers);
        assert_eq!(b.len(), layers.len() + 1);
        assert_eq!(b[0], 0.0);
        assert!((b[5] - 0.0072).abs() < 1e-12, "got {}", b[5]);
        assert!((stack_thickness(&layers) - 0.0072).abs() < 1e-12);
    }

    #[test]
    fn test_layer_validation_rejects_non_positive_properties() {
        let layer = Layer::new("bad", 0.001, 1.0, 0.0, 900.0);
        let err = layer.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::NonPositiveProperty {
                layer: "bad".into(),
                property: "density",
                value: 0.0,
            }
        );

        let thin = Layer::new("thin", -0.001, 1.0, 1.0, 1.0);
        assert!(thin.validate().is_err());

        let insulator = Layer::new("void", 0.001, 0.0, 1.0, 1.0);
        assert!(insulator.validate().is_err());
    }

    #[test]
    fn test_layer_validation_rejects_negative_power() {
        let layer = Layer::new("pcb", 0.001, 1.0, 1.0, 1.0).with_embedded_power(-1.0);
        assert!(layer.validate().is_err());
    }

    #[test]
    fn test_instance_names() {
        let single = HeatSourcePlacement::new("asic", "pcb", 0.01, 0.002, 1.0);
        assert_eq!(single.instance_name(0), "asic");

        let pair = single.with_centers(vec![0.005, 0.015]);
        assert_eq!(pair.instance_name(1), "asic[1]");
        assert_eq!(pair.total_power(), 2.0);
    }
}
