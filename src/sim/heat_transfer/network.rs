use crate::sim::heat_transfer::grid::Grid;

/// Conductive link between two neighbouring nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Face {
    pub a: usize,
    pub b: usize,
    /// Conductance k_face * area / distance in W/K.
    pub conductance: f64,
}

/// Discrete conduction operator of a grid.
///
/// Heat flowing into node `i` is `sum_j K_ij * (T_j - T_i)`. The network is
/// symmetric and its rows sum to zero, so it moves energy between nodes
/// without creating or destroying any.
#[derive(Debug, Clone)]
pub struct ConductanceNetwork {
    faces: Vec<Face>,
    /// Sum of face conductances at each node in W/K.
    diagonal: Vec<f64>,
    /// Largest index distance between linked nodes.
    bandwidth: usize,
}

/// Conductance of a face between two half-cells in series:
/// `K = A / (d/2 / k_a + d/2 / k_b)`, i.e. the harmonic mean of `k_a` and `k_b`.
pub fn series_conductance(k_a: f64, k_b: f64, area: f64, distance: f64) -> f64 {
    if k_a + k_b <= 0.0 {
        return 0.0;
    }
    area * 2.0 * k_a * k_b / ((k_a + k_b) * distance)
}

impl ConductanceNetwork {
    /// Link every node to its vertical and (for 2-D grids) lateral neighbours.
    pub fn assemble(grid: &Grid) -> Self {
        let (nx, ny) = (grid.nx(), grid.ny());
        let k = grid.conductivity();
        let mut faces = Vec::with_capacity(2 * grid.node_count());

        for j in 0..ny.saturating_sub(1) {
            for i in 0..nx {
                let a = grid.index(i, j);
                let b = grid.index(i, j + 1);
                faces.push(Face {
                    a,
                    b,
                    conductance: series_conductance(k[a], k[b], grid.column_area(i), grid.dy()),
                });
            }
        }

        if let Some(dx) = grid.dx() {
            for j in 0..ny {
                for i in 0..nx - 1 {
                    let a = grid.index(i, j);
                    let b = grid.index(i + 1, j);
                    faces.push(Face {
                        a,
                        b,
                        conductance: series_conductance(k[a], k[b], grid.row_face_area(j), dx),
                    });
                }
            }
        }

        Self::from_faces(grid.node_count(), faces)
    }

    pub fn from_faces(node_count: usize, faces: Vec<Face>) -> Self {
        let mut diagonal = vec![0.0; node_count];
        let mut bandwidth = 0;
        for face in &faces {
            diagonal[face.a] += face.conductance;
            diagonal[face.b] += face.conductance;
            bandwidth = bandwidth.max(face.a.abs_diff(face.b));
        }
        Self {
            faces,
            diagonal,
            bandwidth,
        }
    }

    pub fn node_count(&self) -> usize {
        self.diagonal.len()
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn diagonal(&self) -> &[f64] {
        &self.diagonal
    }

    pub fn bandwidth(&self) -> usize {
        self.bandwidth
    }

    /// Write the net conductive heat flow (W) into each node to `out`.
    pub fn heat_flow(&self, temperatures: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for face in &self.faces {
            let q = face.conductance * (temperatures[face.b] - temperatures[face.a]);
            out[face.a] += q;
            out[face.b] -= q;
        }
    }

    /// Largest forward-Euler step for which the Gershgorin disc of
    /// `C^-1 (K + G)` stays inside the stability region:
    /// `min_i C_i / (sum_j K_ij + G_i)`.
    ///
    /// `boundary` holds the extra diagonal stiffness `G_i` in W/K of each
    /// node (e.g. linearised surface radiation); pass an empty slice for none.
    pub fn gershgorin_limit(&self, capacities: &[f64], boundary: &[f64]) -> f64 {
        self.diagonal
            .iter()
            .enumerate()
            .map(|(i, &d)| d + boundary.get(i).copied().unwrap_or(0.0))
            .zip(capacities)
            .filter(|&(d, _)| d > 0.0)
            .map(|(d, &c)| c / d)
            .fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::heat_transfer::grid::{GridConfig, build_grid};
    use crate::sim::materials::{Layer, reference_stack_2d};

    #[test]
    fn test_face_conductance_same_material() {
        // K = A / (0.025/1.4 + 0.025/1.4) = 28.0
        let k = series_conductance(1.4, 1.4, 1.0, 0.05);
        assert!((k - 28.0).abs() < 1e-9, "got {k}");
    }

    #[test]
    fn test_face_conductance_interface_is_harmonic() {
        let k = series_conductance(150.0, 1.5, 1.0, 1.0);
        assert!((k - 2.0 * 150.0 * 1.5 / 151.5).abs() < 1e-12);
        assert_eq!(series_conductance(0.0, 0.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_1d_network_is_a_chain() {
        let layers = vec![Layer::new("slab", 0.004, 2.0, 1000.0, 1000.0)];
        let grid = build_grid(&layers, &GridConfig::one_dimensional(5), &[]).unwrap();
        let net = ConductanceNetwork::assemble(&grid);

        assert_eq!(net.faces().len(), 4);
        assert_eq!(net.bandwidth(), 1);
        // k * A / dy = 2 / 0.001
        for face in net.faces() {
            assert!((face.conductance - 2000.0).abs() < 1e-9);
        }
        assert!((net.diagonal()[0] - 2000.0).abs() < 1e-9);
        assert!((net.diagonal()[2] - 4000.0).abs() < 1e-9);
    }

    #[test]
    fn test_heat_flow_conserves_energy() {
        let grid = build_grid(
            &reference_stack_2d(),
            &GridConfig::two_dimensional(0.02, 0.001, 0.0005, 0.001),
            &[],
        )
        .unwrap();
        let net = ConductanceNetwork::assemble(&grid);
        assert_eq!(net.bandwidth(), grid.nx());

        let temps: Vec<f64> = (0..grid.node_count())
            .map(|i| 280.0 + (i % 7) as f64 * 3.0)
            .collect();
        let mut flow = vec![0.0; grid.node_count()];
        net.heat_flow(&temps, &mut flow);
        let total: f64 = flow.iter().sum();
        assert!(total.abs() < 1e-6, "net flow = {total}");

        // Uniform field: no flow anywhere.
        net.heat_flow(&vec![300.0; grid.node_count()], &mut flow);
        assert!(flow.iter().all(|q| q.abs() < 1e-9));
    }

    #[test]
    fn test_gershgorin_limit_uniform_slab() {
        let layers = vec![Layer::new("slab", 0.004, 2.0, 1000.0, 1000.0)];
        let grid = build_grid(&layers, &GridConfig::one_dimensional(5), &[]).unwrap();
        let net = ConductanceNetwork::assemble(&grid);
        // dy^2 / (2 alpha) with alpha = 2e-6, dy = 1e-3
        let limit = net.gershgorin_limit(&grid.capacities(), &[]);
        assert!((limit - 0.25).abs() < 1e-9, "limit = {limit}");

        // Surface stiffness only tightens the bound at the node it acts on.
        let mut boundary = vec![0.0; grid.node_count()];
        boundary[0] = 2000.0;
        let stiff = net.gershgorin_limit(&grid.capacities(), &boundary);
        // Top node: C = 500 J/K, K = 2000 W/K
        assert!((stiff - 0.125).abs() < 1e-9, "limit = {stiff}");
    }
}
