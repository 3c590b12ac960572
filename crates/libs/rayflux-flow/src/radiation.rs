use crate::{EulerState, FlowError, FlowField, Process, StepContext};
use base::Communicator;
use mesh::{CellId, FaceId, MeshAdapter, Side};
use rad::{optics::blackbody_intensity, OpticalSnapshot, RadiationModel, RadiationSolution, RadiationSolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed temperature of the boundary faces carrying a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WallCondition {
    /// Boundary label of the faces.
    pub label: String,
    /// Wall temperature in K.
    pub temperature: f64,
}

/// Radiative heat exchange between the gas and the domain walls.
///
/// Before every step the optical properties are evaluated from the flow
/// state and the radiation solver runs once. The net flux received by every
/// wall face is then removed from the energy of the cell behind it.
pub struct RadiationProcess {
    solver: RadiationSolver,
    model: Box<dyn RadiationModel>,
    walls: Vec<(FaceId, f64)>,
    ambient: f64,
    solution: Option<RadiationSolution>,
    sources: BTreeMap<CellId, f64>,
}

impl RadiationProcess {
    /// Creates the process; walls without a condition are black at 0 K.
    pub fn new(solver: RadiationSolver, model: Box<dyn RadiationModel>) -> Self {
        Self {
            solver,
            model,
            walls: Vec::new(),
            ambient: 0.0,
            solution: None,
            sources: BTreeMap::new(),
        }
    }

    /// Fixes the temperature of the labelled walls.
    pub fn with_wall(mut self, wall: &WallCondition) -> Result<Self, FlowError> {
        let faces = self
            .solver
            .view()
            .mesh()
            .boundary_faces_labelled(&wall.label)
            .map(|f| (f.id, wall.temperature))
            .collect::<Vec<_>>();
        if faces.is_empty() {
            return Err(FlowError::InvalidSetup(format!(
                "no boundary face is labelled {:?}",
                wall.label
            )));
        }
        self.walls.extend(faces);
        Ok(self)
    }

    /// Temperature of walls without an explicit condition.
    pub fn with_ambient_temperature(mut self, temperature: f64) -> Self {
        self.ambient = temperature;
        self
    }

    /// Underlying radiation solver.
    pub fn solver(&self) -> &RadiationSolver { &self.solver }

    /// Energy source of a cell from the latest solve.
    pub fn energy_source(&self, cell: CellId) -> f64 { self.sources.get(&cell).copied().unwrap_or(0.0) }
}

impl Process for RadiationProcess {
    fn name(&self) -> &str { "radiation" }

    fn pre_step(&mut self, ctx: &StepContext, field: &FlowField, comm: &dyn Communicator) -> Result<(), FlowError> {
        let states = field.thermo_states()?;
        let mut snapshot = OpticalSnapshot::evaluate(
            field.rank(),
            self.model.as_ref(),
            states.iter().map(|(cell, state)| (*cell, state)),
        )
        .with_ambient(blackbody_intensity(self.ambient));
        for &(face, temperature) in &self.walls {
            snapshot.set_wall_temperature(face, temperature);
        }

        let solution = self.solver.solve(&snapshot, comm)?;
        let view = self.solver.view().clone();
        let mut sources = BTreeMap::new();
        for (&face, &flux) in &solution.flux {
            let geometry = view.face_geometry(face)?;
            let cell = view.cell_of(face, Side::Owner)?.ok_or(mesh::MeshError::FaceNotFound {
                face,
                rank: view.rank(),
            })?;
            let volume = view.cell_geometry(cell)?.volume;
            *sources.entry(cell).or_insert(0.0) -= flux * geometry.area / volume;
        }
        log::debug!(
            "Step {}: radiation solved in {} rounds, {} source cells",
            ctx.step,
            solution.report.rounds,
            sources.len()
        );
        self.sources = sources;
        self.solution = Some(solution);
        Ok(())
    }

    fn source(&self, cell: CellId, _state: &EulerState) -> EulerState {
        EulerState {
            rho_e: self.energy_source(cell),
            ..Default::default()
        }
    }

    fn radiation(&self) -> Option<&RadiationSolution> { self.solution.as_ref() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdealGas;
    use approx::assert_relative_eq;
    use base::{math::DVec3, ChannelComm};
    use mesh::{Mesh, Partition, PartitionView};
    use rad::{optics::ModelKind, RadiationConfig};
    use std::sync::Arc;

    fn process(n: usize) -> RadiationProcess {
        let mesh = Arc::new(Mesh::structured_box([n, n, n], DVec3::ZERO, DVec3::splat(1.0)).unwrap());
        let partition = Arc::new(Partition::single(&mesh));
        let view = Arc::new(PartitionView::new(mesh.clone(), partition, 0).unwrap());
        let config = RadiationConfig {
            n_theta: 4,
            n_phi: 8,
            ..Default::default()
        };
        let emitting = mesh.boundary_faces().map(|f| f.id).collect::<Vec<_>>();
        let solver = RadiationSolver::new(config, view, emitting).unwrap();
        RadiationProcess::new(solver, ModelKind::Gray { absorptivity: 2.0 }.model())
    }

    fn step() -> StepContext {
        StepContext {
            step: 0,
            time: 0.0,
            dt: 1.0e-3,
        }
    }

    #[test]
    fn hot_gas_loses_energy_to_cold_walls() {
        let mut radiation = process(3);
        let cells = radiation.solver().view().owned_cells().to_vec();
        let field = FlowField::at_rest(0, IdealGas::default(), cells.iter().copied(), 1.0, 1500.0);
        let comm = ChannelComm::world(1).remove(0);
        assert!(radiation.radiation().is_none());
        radiation.pre_step(&step(), &field, &comm).unwrap();

        let solution = radiation.radiation().unwrap();
        assert!(solution.flux.values().all(|&q| q > 0.0));
        // Only the centre cell of a 3x3x3 box has no wall.
        let centre = CellId(13);
        assert_eq!(radiation.energy_source(centre), 0.0);
        for &cell in cells.iter().filter(|&&c| c != centre) {
            let state = field.get(cell).unwrap();
            assert!(radiation.source(cell, state).rho_e < 0.0);
        }
        assert_eq!(radiation.source(centre, field.get(centre).unwrap()), EulerState::default());
    }

    #[test]
    fn isothermal_enclosure_is_in_equilibrium() {
        let mut radiation = process(2)
            .with_wall(&WallCondition {
                label: "z+".to_string(),
                temperature: 900.0,
            })
            .unwrap()
            .with_ambient_temperature(900.0);
        let cells = radiation.solver().view().owned_cells().to_vec();
        let field = FlowField::at_rest(0, IdealGas::default(), cells.iter().copied(), 1.0, 900.0);
        let comm = ChannelComm::world(1).remove(0);
        radiation.pre_step(&step(), &field, &comm).unwrap();

        let emission = blackbody_intensity(900.0);
        for cell in cells {
            assert!(radiation.energy_source(cell).abs() < 1e-9 * emission);
        }
        let flux = radiation.radiation().unwrap().flux.values().copied().collect::<Vec<_>>();
        assert_eq!(flux.len(), 24);
        assert_relative_eq!(flux.iter().sum::<f64>(), 0.0, epsilon = 1e-9 * emission);
    }

    #[test]
    fn unknown_wall_label_is_rejected() {
        let wall = WallCondition {
            label: "inlet".to_string(),
            temperature: 300.0,
        };
        assert!(matches!(process(1).with_wall(&wall), Err(FlowError::InvalidSetup(_))));
    }
}
