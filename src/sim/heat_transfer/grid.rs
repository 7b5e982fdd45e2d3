//! Structured vertex-centred grid built from a layer stack.
//!
//! Rows run through the thickness (row 0 is the sun-facing surface), columns
//! run laterally. A 1-D grid is the special case of a single column whose
//! footprint is the panel area.
//!
//! Edge nodes own half a spacing, so the control volumes tile the domain and
//! heat-source power is distributed over exactly the volume it covers.

use std::ops::Range;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::sim::materials::{HeatSourcePlacement, Layer, layer_boundaries, stack_thickness};

/// Relative tolerance used when comparing node coordinates with boundaries.
const POSITION_TOLERANCE: f64 = 1e-9;

/// Requested discretization along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Target node spacing in meters; the actual spacing divides the extent evenly.
    Spacing(f64),
    /// Number of nodes including both ends.
    Nodes(usize),
}

/// Lateral extent of a 2-D cross-section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LateralGrid {
    /// Domain width in meters.
    pub width: f64,
    pub resolution: Resolution,
    /// Out-of-plane depth of the cross-section in meters.
    #[serde(default = "default_depth")]
    pub depth: f64,
}

/// Grid layout of one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub thickness_resolution: Resolution,
    /// Panel area in m^2 represented by a 1-D grid.
    #[serde(default = "default_area")]
    pub area: f64,
    /// Lateral axis; `None` builds a 1-D grid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lateral: Option<LateralGrid>,
}

fn default_depth() -> f64 {
    0.001
}

fn default_area() -> f64 {
    1.0
}

impl GridConfig {
    /// 1-D grid with `nodes` nodes through the thickness and a 1 m^2 footprint.
    pub fn one_dimensional(nodes: usize) -> Self {
        Self {
            thickness_resolution: Resolution::Nodes(nodes),
            area: default_area(),
            lateral: None,
        }
    }

    /// 2-D cross-section with target spacings `dx` (lateral) and `dy` (thickness).
    pub fn two_dimensional(width: f64, dx: f64, dy: f64, depth: f64) -> Self {
        Self {
            thickness_resolution: Resolution::Spacing(dy),
            area: default_area(),
            lateral: Some(LateralGrid {
                width,
                resolution: Resolution::Spacing(dx),
                depth,
            }),
        }
    }
}

impl GridConfig {
    /// Nodes per row and per column for `layers`, computed without allocating.
    pub fn dimensions(&self, layers: &[Layer]) -> Result<(usize, usize), ConfigurationError> {
        validate_stack(layers)?;
        let ny = self
            .thickness_resolution
            .node_count(stack_thickness(layers), "thickness")?;
        let nx = match &self.lateral {
            None => 1,
            Some(lateral) => {
                if !(lateral.width.is_finite() && lateral.width > 0.0) {
                    return Err(ConfigurationError::InvalidGrid(format!(
                        "lateral width must be positive (got {})",
                        lateral.width
                    )));
                }
                lateral.resolution.node_count(lateral.width, "lateral")?
            }
        };
        Ok((nx, ny))
    }

    /// Total node count of the grid `build_grid` would produce.
    pub fn node_count(&self, layers: &[Layer]) -> Result<usize, ConfigurationError> {
        let (nx, ny) = self.dimensions(layers)?;
        checked_node_count(nx, ny)
    }
}

fn checked_node_count(nx: usize, ny: usize) -> Result<usize, ConfigurationError> {
    nx.checked_mul(ny).ok_or_else(|| {
        ConfigurationError::InvalidGrid(format!("{nx} x {ny} nodes is not addressable"))
    })
}

fn validate_stack(layers: &[Layer]) -> Result<(), ConfigurationError> {
    if layers.is_empty() {
        return Err(ConfigurationError::EmptyLayerStack);
    }
    for (i, layer) in layers.iter().enumerate() {
        layer.validate()?;
        if layers[..i].iter().any(|l| l.name == layer.name) {
            return Err(ConfigurationError::DuplicateLayer(layer.name.clone()));
        }
    }
    Ok(())
}

impl Resolution {
    fn node_count(&self, extent: f64, axis: &str) -> Result<usize, ConfigurationError> {
        let n = match *self {
            Resolution::Spacing(h) => {
                if !(h.is_finite() && h > 0.0) {
                    return Err(ConfigurationError::InvalidGrid(format!(
                        "{axis} spacing must be positive (got {h})"
                    )));
                }
                let intervals = (extent / h - POSITION_TOLERANCE).ceil().max(0.0);
                if !(intervals < usize::MAX as f64) {
                    return Err(ConfigurationError::InvalidGrid(format!(
                        "{axis} spacing {h} m is too fine for an extent of {extent} m"
                    )));
                }
                (intervals as usize).checked_add(1).ok_or_else(|| {
                    ConfigurationError::InvalidGrid(format!("{axis} spacing {h} m is too fine"))
                })?
            }
            Resolution::Nodes(n) => n,
        };
        if n < 2 {
            return Err(ConfigurationError::InvalidGrid(format!(
                "{axis} axis needs at least 2 nodes (got {n})"
            )));
        }
        Ok(n)
    }
}

/// Row range of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRegion {
    pub name: String,
    /// Position of the layer in the stack (0 = top).
    pub index: usize,
    pub rows: Range<usize>,
}

/// Node block covered by one heat-source instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRegion {
    /// Instance name (`name` or `name[i]`).
    pub name: String,
    /// Name of the placement this instance belongs to.
    pub placement: String,
    pub rows: Range<usize>,
    pub columns: Range<usize>,
    /// Power of this instance in W.
    pub power: f64,
}

/// Discretized panel with per-node thermal properties.
#[derive(Debug, Clone)]
pub struct Grid {
    nx: usize,
    ny: usize,
    dx: Option<f64>,
    dy: f64,
    depth: f64,
    x: Vec<f64>,
    y: Vec<f64>,
    conductivity: Vec<f64>,
    density: Vec<f64>,
    specific_heat: Vec<f64>,
    /// Volumetric heat generation in W/m^3.
    source_density: Vec<f64>,
    /// Control volume in m^3.
    volume: Vec<f64>,
    /// Footprint of each column in m^2 (area of its top and bottom faces).
    column_area: Vec<f64>,
    /// Area in m^2 of the lateral faces in each row (2-D only).
    row_face_area: Vec<f64>,
    boundaries: Vec<f64>,
    layers: Vec<LayerRegion>,
    sources: Vec<SourceRegion>,
}

/// Build the grid for `layers` (top to bottom) with optional heat sources.
///
/// Every node is assigned to the layer whose half-open interval
/// `[b_j, b_{j+1})` contains its depth; the last layer is closed. Heat-source
/// footprints then overwrite the material of the nodes they cover and receive
/// a uniform volumetric source `power / covered volume`.
pub fn build_grid(
    layers: &[Layer],
    config: &GridConfig,
    sources: &[HeatSourcePlacement],
) -> Result<Grid, ConfigurationError> {
    let (nx, ny) = config.dimensions(layers)?;
    let n = checked_node_count(nx, ny)?;
    let thickness = stack_thickness(layers);
    let boundaries = layer_boundaries(layers);
    let dy = thickness / (ny - 1) as f64;
    let y: Vec<f64> = (0..ny).map(|j| j as f64 * dy).collect();

    let (dx, x, depth, column_area) = match config.lateral {
        None => {
            if !(config.area.is_finite() && config.area > 0.0) {
                return Err(ConfigurationError::InvalidGrid(format!(
                    "panel area must be positive (got {})",
                    config.area
                )));
            }
            (None, vec![0.0], config.area, vec![config.area])
        }
        Some(lateral) => {
            if !(lateral.depth.is_finite() && lateral.depth > 0.0) {
                return Err(ConfigurationError::InvalidGrid(format!(
                    "depth must be positive (got {})",
                    lateral.depth
                )));
            }
            let dx = lateral.width / (nx - 1) as f64;
            let x: Vec<f64> = (0..nx).map(|i| i as f64 * dx).collect();
            let column_area = (0..nx)
                .map(|i| half_at_ends(i, nx) * dx * lateral.depth)
                .collect();
            (Some(dx), x, lateral.depth, column_area)
        }
    };

    let row_face_area: Vec<f64> = if dx.is_some() {
        (0..ny).map(|j| half_at_ends(j, ny) * dy * depth).collect()
    } else {
        Vec::new()
    };

    // Layer of each row.
    let tol = POSITION_TOLERANCE * thickness;
    let row_layer: Vec<usize> = y
        .iter()
        .map(|&yj| {
            boundaries[1..layers.len()]
                .iter()
                .take_while(|&&b| b <= yj + tol)
                .count()
        })
        .collect();

    let layer_regions: Vec<LayerRegion> = layers
        .iter()
        .enumerate()
        .map(|(l, layer)| {
            let start = row_layer.iter().position(|&r| r == l);
            let rows = match start {
                Some(s) => {
                    let len = row_layer[s..].iter().take_while(|&&r| r == l).count();
                    s..s + len
                }
                None => 0..0,
            };
            if rows.is_empty() {
                tracing::warn!(
                    layer = %layer.name,
                    thickness = layer.thickness,
                    spacing = dy,
                    "Layer is thinner than the node spacing and received no node"
                );
            }
            LayerRegion {
                name: layer.name.clone(),
                index: l,
                rows,
            }
        })
        .collect();

    let mut grid = Grid {
        nx,
        ny,
        dx,
        dy,
        depth,
        x,
        y,
        conductivity: vec![0.0; n],
        density: vec![0.0; n],
        specific_heat: vec![0.0; n],
        source_density: vec![0.0; n],
        volume: vec![0.0; n],
        column_area,
        row_face_area,
        boundaries,
        layers: layer_regions,
        sources: Vec::new(),
    };

    for j in 0..ny {
        let layer = &layers[row_layer[j]];
        let cv_y = half_at_ends(j, ny) * dy;
        for i in 0..nx {
            let idx = grid.index(i, j);
            grid.conductivity[idx] = layer.conductivity;
            grid.density[idx] = layer.density;
            grid.specific_heat[idx] = layer.specific_heat;
            grid.volume[idx] = grid.column_area[i] * cv_y;
        }
    }

    let owner = grid.place_sources(sources)?;
    grid.distribute_layer_power(layers, &owner)?;
    Ok(grid)
}

/// 0.5 for the first and last index of an axis, 1.0 elsewhere.
fn half_at_ends(i: usize, n: usize) -> f64 {
    if i == 0 || i + 1 == n { 0.5 } else { 1.0 }
}

impl Grid {
    fn place_sources(
        &mut self,
        placements: &[HeatSourcePlacement],
    ) -> Result<Vec<Option<usize>>, ConfigurationError> {
        let mut owner: Vec<Option<usize>> = vec![None; self.node_count()];
        if placements.is_empty() {
            return Ok(owner);
        }

        for placement in placements {
            let name = &placement.name;
            if self.dx.is_none() {
                return Err(ConfigurationError::HeatSourceRequiresLateralGrid(name.clone()));
            }
            if self.layers.iter().any(|l| &l.name == name) {
                return Err(invalid_source(name, "name collides with a layer name"));
            }
            if placement.centers.is_empty() {
                return Err(invalid_source(name, "no centre positions given"));
            }
            if !(placement.width.is_finite() && placement.width > 0.0) {
                return Err(invalid_source(name, "width must be positive"));
            }
            if !(placement.power.is_finite() && placement.power >= 0.0) {
                return Err(invalid_source(name, "power must be non-negative"));
            }
            let Some(host) = self.layers.iter().find(|l| l.name == placement.host_layer) else {
                return Err(ConfigurationError::UnknownLayer(placement.host_layer.clone()));
            };
            let rows = host.rows.clone();
            if let Some(material) = placement.material {
                material.validate(name)?;
            }

            let width = self.x[self.nx - 1];
            let tol = POSITION_TOLERANCE * width;
            for (instance, &center) in placement.centers.iter().enumerate() {
                let start = center - 0.5 * placement.width;
                let end = center + 0.5 * placement.width;
                if !center.is_finite() || start < -tol || end > width + tol {
                    return Err(ConfigurationError::HeatSourceOutsideDomain {
                        source_name: placement.instance_name(instance),
                        start,
                        end,
                        width,
                    });
                }
                let first = self.x.iter().position(|&xi| xi >= start - tol);
                let count = first.map_or(0, |f| {
                    self.x[f..].iter().take_while(|&&xi| xi <= end + tol).count()
                });
                let columns = first.map_or(0..0, |f| f..f + count);
                if rows.is_empty() || columns.is_empty() {
                    return Err(ConfigurationError::HeatSourceCoversNoNode(
                        placement.instance_name(instance),
                    ));
                }

                let region_idx = self.sources.len();
                let mut covered_volume = 0.0;
                for j in rows.clone() {
                    for i in columns.clone() {
                        let idx = self.index(i, j);
                        if let Some(other) = owner[idx] {
                            return Err(ConfigurationError::OverlappingHeatSources {
                                first: self.sources[other].name.clone(),
                                second: placement.instance_name(instance),
                            });
                        }
                        owner[idx] = Some(region_idx);
                        covered_volume += self.volume[idx];
                    }
                }

                let q = placement.power / covered_volume;
                for j in rows.clone() {
                    for i in columns.clone() {
                        let idx = self.index(i, j);
                        if let Some(material) = placement.material {
                            self.conductivity[idx] = material.conductivity;
                            self.density[idx] = material.density;
                            self.specific_heat[idx] = material.specific_heat;
                        }
                        self.source_density[idx] = q;
                    }
                }

                self.sources.push(SourceRegion {
                    name: placement.instance_name(instance),
                    placement: name.clone(),
                    rows: rows.clone(),
                    columns,
                    power: placement.power,
                });
            }
        }
        Ok(owner)
    }

    fn distribute_layer_power(
        &mut self,
        layers: &[Layer],
        owner: &[Option<usize>],
    ) -> Result<(), ConfigurationError> {
        for (layer, region) in layers.iter().zip(self.layers.clone()) {
            let Some(power) = layer.embedded_power else {
                continue;
            };
            let nodes: Vec<usize> = region
                .rows
                .clone()
                .flat_map(|j| (0..self.nx).map(move |i| (i, j)))
                .map(|(i, j)| self.index(i, j))
                .filter(|&idx| owner[idx].is_none())
                .collect();
            if nodes.is_empty() {
                return Err(ConfigurationError::PoweredLayerWithoutNodes(layer.name.clone()));
            }
            let volume: f64 = nodes.iter().map(|&idx| self.volume[idx]).sum();
            let q = power / volume;
            for idx in nodes {
                self.source_density[idx] = q;
            }
        }
        Ok(())
    }

    /// Flat index of node (column `i`, row `j`).
    pub fn index(&self, i: usize, j: usize) -> usize {
        j * self.nx + i
    }

    pub fn node_count(&self) -> usize {
        self.nx * self.ny
    }

    /// Number of lateral columns (1 for a 1-D grid).
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Number of rows through the thickness.
    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn is_two_dimensional(&self) -> bool {
        self.dx.is_some()
    }

    /// Lateral spacing in meters (2-D only).
    pub fn dx(&self) -> Option<f64> {
        self.dx
    }

    /// Through-thickness spacing in meters.
    pub fn dy(&self) -> f64 {
        self.dy
    }

    /// Lateral node coordinates in meters.
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Out-of-plane extent in meters (2-D), or the panel area in m^2 (1-D).
    pub fn depth(&self) -> f64 {
        self.depth
    }

    /// Depth coordinates in meters, 0 at the sun-facing surface.
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn conductivity(&self) -> &[f64] {
        &self.conductivity
    }

    pub fn density(&self) -> &[f64] {
        &self.density
    }

    pub fn specific_heat(&self) -> &[f64] {
        &self.specific_heat
    }

    /// Volumetric heat generation per node in W/m^3.
    pub fn source_density(&self) -> &[f64] {
        &self.source_density
    }

    /// Control volume per node in m^3.
    pub fn volume(&self) -> &[f64] {
        &self.volume
    }

    /// Footprint of column `i` in m^2.
    pub fn column_area(&self, i: usize) -> f64 {
        self.column_area[i]
    }

    /// Area of the lateral faces of row `j` in m^2 (2-D only).
    pub fn row_face_area(&self, j: usize) -> f64 {
        self.row_face_area.get(j).copied().unwrap_or(0.0)
    }

    /// Heat capacity of node `idx` in J/K.
    pub fn capacity(&self, idx: usize) -> f64 {
        self.density[idx] * self.specific_heat[idx] * self.volume[idx]
    }

    pub fn capacities(&self) -> Vec<f64> {
        (0..self.node_count()).map(|i| self.capacity(i)).collect()
    }

    /// Thermal diffusivity of node `idx` in m^2/s.
    pub fn diffusivity(&self, idx: usize) -> f64 {
        self.conductivity[idx] / (self.density[idx] * self.specific_heat[idx])
    }

    pub fn max_diffusivity(&self) -> f64 {
        (0..self.node_count())
            .map(|i| self.diffusivity(i))
            .fold(0.0, f64::max)
    }

    /// Heat generated in node `idx` in W.
    pub fn source_power(&self, idx: usize) -> f64 {
        self.source_density[idx] * self.volume[idx]
    }

    pub fn total_source_power(&self) -> f64 {
        (0..self.node_count()).map(|i| self.source_power(i)).sum()
    }

    /// Sun-facing row.
    pub fn top_nodes(&self) -> Range<usize> {
        0..self.nx
    }

    /// Radiator row.
    pub fn bottom_nodes(&self) -> Range<usize> {
        (self.ny - 1) * self.nx..self.ny * self.nx
    }

    /// Cumulative layer boundary offsets in meters.
    pub fn layer_boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    pub fn layers(&self) -> &[LayerRegion] {
        &self.layers
    }

    pub fn heat_sources(&self) -> &[SourceRegion] {
        &self.sources
    }

    /// Names of all regions: layers, heat-source instances, and multi-instance placements.
    pub fn region_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layers.iter().map(|l| l.name.clone()).collect();
        for source in &self.sources {
            if !names.contains(&source.name) {
                names.push(source.name.clone());
            }
            if !names.contains(&source.placement) {
                names.push(source.placement.clone());
            }
        }
        names
    }

    /// Node indices of a layer, a heat-source instance or a whole placement.
    pub fn region_nodes(&self, name: &str) -> Option<Vec<usize>> {
        if let Some(layer) = self.layers.iter().find(|l| l.name == name) {
            let nodes = layer
                .rows
                .clone()
                .flat_map(|j| (0..self.nx).map(move |i| j * self.nx + i))
                .collect();
            return Some(nodes);
        }
        let matching: Vec<&SourceRegion> = self
            .sources
            .iter()
            .filter(|s| s.name == name || s.placement == name)
            .collect();
        if matching.is_empty() {
            return None;
        }
        let mut nodes = Vec::new();
        for source in matching {
            for j in source.rows.clone() {
                for i in source.columns.clone() {
                    nodes.push(self.index(i, j));
                }
            }
        }
        Some(nodes)
    }

    /// Stored thermal energy `sum(rho * c_p * V * T)` in J.
    pub fn thermal_energy(&self, temperatures: &[f64]) -> f64 {
        temperatures
            .iter()
            .enumerate()
            .map(|(i, t)| self.capacity(i) * t)
            .sum()
    }

    /// View a flat field as a `(ny, nx)` array, row 0 at the sun-facing surface.
    pub fn field_view<'a>(&self, field: &'a [f64]) -> Option<ArrayView2<'a, f64>> {
        ArrayView2::from_shape((self.ny, self.nx), field).ok()
    }

    /// Serializable coordinates and labels for plotting collaborators.
    pub fn geometry(&self) -> GridGeometry {
        GridGeometry {
            nx: self.nx,
            ny: self.ny,
            x: self.x.clone(),
            y: self.y.clone(),
            layer_boundaries: self.boundaries.clone(),
            layers: self.layers.clone(),
            heat_sources: self.sources.clone(),
        }
    }
}

fn invalid_source(name: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidHeatSource {
        source_name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Grid coordinates and region layout, detached from the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub nx: usize,
    pub ny: usize,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub layer_boundaries: Vec<f64>,
    pub layers: Vec<LayerRegion>,
    pub heat_sources: Vec<SourceRegion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::materials::{reference_asic, reference_stack_1d, reference_stack_2d};

    fn two_layer_stack() -> Vec<Layer> {
        vec![
            Layer::new("top", 0.002, 1.0, 1000.0, 1000.0),
            Layer::new("bottom", 0.002, 2.0, 2000.0, 500.0),
        ]
    }

    #[test]
    fn test_reference_1d_grid() {
        let layers = reference_stack_1d();
        let grid = build_grid(&layers, &GridConfig::one_dimensional(31), &[]).unwrap();

        assert_eq!(grid.node_count(), 31);
        assert!(!grid.is_two_dimensional());
        assert!((grid.dy() - 0.0072 / 30.0).abs() < 1e-15);

        // Control volumes tile the stack.
        let total: f64 = grid.volume().iter().sum();
        assert!((total - 0.0072).abs() < 1e-12, "total volume = {total}");

        // Every node belongs to one layer.
        let covered: usize = grid.layers().iter().map(|l| l.rows.len()).sum();
        assert_eq!(covered, 31);
        assert_eq!(grid.layers()[0].rows, 0..1);
        assert_eq!(grid.layers()[4].rows.end, 31);

        // The PCB power is injected exactly.
        assert!(
            (grid.total_source_power() - 9.0).abs() < 1e-9,
            "power = {}",
            grid.total_source_power()
        );
    }

    #[test]
    fn test_node_on_boundary_belongs_to_lower_layer() {
        // 5 nodes over 4 mm: y = 0, 1, 2, 3, 4 mm. Node at 2 mm sits on the interface.
        let grid = build_grid(&two_layer_stack(), &GridConfig::one_dimensional(5), &[]).unwrap();
        assert_eq!(grid.layers()[0].rows, 0..2);
        assert_eq!(grid.layers()[1].rows, 2..5);
        assert_eq!(grid.conductivity()[2], 2.0);
        // Last node is closed into the last layer.
        assert_eq!(grid.conductivity()[4], 2.0);
    }

    #[test]
    fn test_spacing_resolution_rounds_up() {
        let config = GridConfig {
            thickness_resolution: Resolution::Spacing(0.0015),
            area: 1.0,
            lateral: None,
        };
        let grid = build_grid(&two_layer_stack(), &config, &[]).unwrap();
        // ceil(4 / 1.5) + 1 = 4 nodes
        assert_eq!(grid.ny(), 4);
        assert!(grid.dy() <= 0.0015);
    }

    #[test]
    fn test_node_count_matches_built_grid() {
        let config = GridConfig::two_dimensional(0.02, 0.001, 0.0001, 0.02);
        let layers = reference_stack_2d();
        let grid = build_grid(&layers, &config, &[]).unwrap();
        assert_eq!(config.dimensions(&layers).unwrap(), (grid.nx(), grid.ny()));
        assert_eq!(config.node_count(&layers).unwrap(), grid.node_count());
    }

    #[test]
    fn test_vanishing_spacing_is_rejected_without_overflow() {
        let config = GridConfig {
            thickness_resolution: Resolution::Spacing(1e-300),
            area: 1.0,
            lateral: None,
        };
        let err = config.node_count(&two_layer_stack()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidGrid(_)), "{err:?}");
        assert!(build_grid(&two_layer_stack(), &config, &[]).is_err());
    }

    #[test]
    fn test_unaddressable_node_count_is_rejected() {
        let config = GridConfig {
            thickness_resolution: Resolution::Nodes(usize::MAX / 2),
            area: 1.0,
            lateral: Some(LateralGrid {
                width: 0.01,
                resolution: Resolution::Nodes(4),
                depth: 0.01,
            }),
        };
        let err = config.node_count(&two_layer_stack()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidGrid(_)), "{err:?}");
    }

    #[test]
    fn test_empty_stack_is_rejected() {
        let err = build_grid(&[], &GridConfig::one_dimensional(10), &[]).unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyLayerStack);
    }

    #[test]
    fn test_too_few_nodes_is_rejected() {
        let err = build_grid(&two_layer_stack(), &GridConfig::one_dimensional(1), &[]).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidGrid(_)));
    }

    #[test]
    fn test_duplicate_layer_names_are_rejected() {
        let layers = vec![
            Layer::new("a", 0.001, 1.0, 1.0, 1.0),
            Layer::new("a", 0.001, 1.0, 1.0, 1.0),
        ];
        let err = build_grid(&layers, &GridConfig::one_dimensional(5), &[]).unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateLayer("a".into()));
    }

    #[test]
    fn test_reference_2d_grid_with_asic() {
        let layers = reference_stack_2d();
        let config = GridConfig::two_dimensional(0.020, 0.001, 0.0005, 0.001);
        let grid = build_grid(&layers, &config, &[reference_asic()]).unwrap();

        assert_eq!(grid.nx(), 21);
        assert_eq!(grid.ny(), 12);
        assert_eq!(grid.heat_sources().len(), 1);

        let asic = &grid.heat_sources()[0];
        // 8 mm centred at 10 mm: x in [6, 14] mm -> columns 6..=14
        assert_eq!(asic.columns, 6..15);
        assert!((grid.total_source_power() - 9.0).abs() < 1e-9);

        let nodes = grid.region_nodes("asic_die").unwrap();
        assert_eq!(nodes.len(), asic.rows.len() * 9);
        for &idx in &nodes {
            assert_eq!(grid.conductivity()[idx], 130.0);
        }

        // Volumes tile the cross-section (width * thickness * depth).
        let total: f64 = grid.volume().iter().sum();
        let expected = 0.020 * 0.0052 * 0.001;
        assert!((total - expected).abs() < 1e-15, "total = {total}");
    }

    #[test]
    fn test_heat_source_outside_domain() {
        let layers = reference_stack_2d();
        let config = GridConfig::two_dimensional(0.020, 0.001, 0.0005, 0.001);
        let wide = HeatSourcePlacement::new("chip", "asic", 0.010, 0.025, 1.0);
        let err = build_grid(&layers, &config, &[wide]).unwrap_err();
        assert!(matches!(err, ConfigurationError::HeatSourceOutsideDomain { .. }));

        let off_edge = HeatSourcePlacement::new("chip", "asic", 0.019, 0.004, 1.0);
        let err = build_grid(&layers, &config, &[off_edge]).unwrap_err();
        assert!(matches!(err, ConfigurationError::HeatSourceOutsideDomain { .. }));
    }

    #[test]
    fn test_overlapping_sources_are_rejected() {
        let layers = reference_stack_2d();
        let config = GridConfig::two_dimensional(0.020, 0.001, 0.0005, 0.001);
        let pair = HeatSourcePlacement::new("chip", "asic", 0.008, 0.004, 1.0)
            .with_centers(vec![0.008, 0.010]);
        let err = build_grid(&layers, &config, &[pair]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::OverlappingHeatSources {
                first: "chip[0]".into(),
                second: "chip[1]".into(),
            }
        );
    }

    #[test]
    fn test_multiple_sources_and_regions() {
        let layers = reference_stack_2d();
        let config = GridConfig::two_dimensional(0.020, 0.001, 0.0005, 0.001);
        let pair = HeatSourcePlacement::new("chip", "asic", 0.005, 0.004, 2.0)
            .with_centers(vec![0.005, 0.015]);
        let grid = build_grid(&layers, &config, &[pair]).unwrap();

        assert_eq!(grid.heat_sources().len(), 2);
        assert!((grid.total_source_power() - 4.0).abs() < 1e-9);

        let first = grid.region_nodes("chip[0]").unwrap();
        let both = grid.region_nodes("chip").unwrap();
        assert_eq!(both.len(), 2 * first.len());
        assert!(grid.region_names().contains(&"chip".to_string()));
        assert!(grid.region_nodes("nope").is_none());
    }

    #[test]
    fn test_sources_require_lateral_grid() {
        let layers = reference_stack_1d();
        let source = HeatSourcePlacement::new("chip", "pcb", 0.0, 0.001, 1.0);
        let err = build_grid(&layers, &GridConfig::one_dimensional(31), &[source]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::HeatSourceRequiresLateralGrid("chip".into())
        );
    }

    #[test]
    fn test_unknown_host_layer() {
        let layers = reference_stack_2d();
        let config = GridConfig::two_dimensional(0.020, 0.001, 0.0005, 0.001);
        let source = HeatSourcePlacement::new("chip", "missing", 0.01, 0.002, 1.0);
        let err = build_grid(&layers, &config, &[source]).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownLayer("missing".into()));
    }

    #[test]
    fn test_powered_layer_without_nodes() {
        let layers = vec![
            Layer::new("top", 0.004, 1.0, 1.0, 1.0),
            Layer::new("film", 0.00001, 1.0, 1.0, 1.0).with_embedded_power(1.0),
            Layer::new("bottom", 0.004, 1.0, 1.0, 1.0),
        ];
        let config = GridConfig {
            thickness_resolution: Resolution::Spacing(0.001),
            area: 1.0,
            lateral: None,
        };
        let err = build_grid(&layers, &config, &[]).unwrap_err();
        assert_eq!(err, ConfigurationError::PoweredLayerWithoutNodes("film".into()));
    }

    #[test]
    fn test_field_view_shape() {
        let layers = reference_stack_2d();
        let config = GridConfig::two_dimensional(0.020, 0.001, 0.0005, 0.001);
        let grid = build_grid(&layers, &config, &[]).unwrap();
        let field: Vec<f64> = (0..grid.node_count()).map(|i| i as f64).collect();
        let view = grid.field_view(&field).unwrap();
        assert_eq!(view.dim(), (12, 21));
        assert_eq!(view[[1, 0]], 21.0);
        assert!(grid.field_view(&field[1..]).is_none());
    }
}
