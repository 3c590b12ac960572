use crate::{EulerState, FlowError, FlowField, Process, StepContext};
use base::Communicator;
use mesh::CellId;

/// Average density over all cells of all ranks.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DensityReference {
    /// Global average density.
    pub average: f64,
    /// Number of cells averaged over.
    pub cells: u64,
}

impl DensityReference {
    /// Reduces the density of every rank's field. Collective.
    pub fn compute(field: &FlowField, comm: &dyn Communicator) -> Self {
        let local = field.iter().map(|(_, s)| s.rho).sum::<f64>();
        let sum = comm.all_reduce_sum_f64(local);
        let cells = comm.all_reduce_sum_u64(field.len() as u64);
        let average = if cells == 0 { 0.0 } else { sum / cells as f64 };
        Self { average, cells }
    }
}

/// Buoyancy force of density deviations from the global average.
///
/// Only cells heavier than the average are pushed along gravity; the energy
/// source is the work of that force.
#[derive(Debug, Clone, PartialEq)]
pub struct Buoyancy {
    gravity: [f64; 3],
    reference: Option<DensityReference>,
}

impl Buoyancy {
    /// Creates the process for the given gravitational acceleration.
    pub fn new(gravity: [f64; 3]) -> Self {
        Self {
            gravity,
            reference: None,
        }
    }

    /// Reference density of the current step, `None` before the first step.
    pub fn reference(&self) -> Option<DensityReference> { self.reference }
}

impl Process for Buoyancy {
    fn name(&self) -> &str { "buoyancy" }

    fn pre_step(&mut self, ctx: &StepContext, field: &FlowField, comm: &dyn Communicator) -> Result<(), FlowError> {
        let reference = DensityReference::compute(field, comm);
        log::debug!(
            "Step {}: reference density {} over {} cells",
            ctx.step,
            reference.average,
            reference.cells
        );
        self.reference = Some(reference);
        Ok(())
    }

    fn source(&self, _cell: CellId, state: &EulerState) -> EulerState {
        let reference = match self.reference {
            Some(reference) if state.rho > 0.0 => reference,
            _ => return EulerState::default(),
        };
        let velocity = state.velocity();
        let mut source = EulerState::default();
        for n in 0..3 {
            source.rho_u[n] = ((state.rho - reference.average) * self.gravity[n]).max(0.0);
            source.rho_e += velocity[n] * source.rho_u[n];
        }
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdealGas;
    use approx::assert_relative_eq;
    use base::ChannelComm;

    fn state(rho: f64, u: [f64; 3]) -> EulerState {
        EulerState {
            rho,
            rho_e: 1.0e5,
            rho_u: u.map(|v| v * rho),
        }
    }

    #[test]
    fn reference_density_spans_all_ranks() {
        let references = std::thread::scope(|s| {
            let handles = ChannelComm::world(2)
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mut field = FlowField::new(comm.rank(), IdealGas::default());
                        // Rank 0 holds one cell of density 1, rank 1 two of density 4.
                        let n = comm.rank() + 1;
                        for i in 0..n {
                            field.insert(CellId(i as u32), state((n * n) as f64, [0.0; 3]));
                        }
                        let mut buoyancy = Buoyancy::new([0.0, 0.0, -9.81]);
                        let ctx = StepContext {
                            step: 0,
                            time: 0.0,
                            dt: 1.0,
                        };
                        buoyancy.pre_step(&ctx, &field, &comm).unwrap();
                        buoyancy.reference().unwrap()
                    })
                })
                .collect::<Vec<_>>();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });
        for reference in references {
            assert_eq!(reference.cells, 3);
            assert_relative_eq!(reference.average, 3.0, max_relative = 1e-12);
        }
    }

    #[test]
    fn only_positive_components_push() {
        let mut buoyancy = Buoyancy::new([1.0, -2.0, 0.5]);
        assert_eq!(buoyancy.source(CellId(0), &state(2.0, [1.0; 3])), EulerState::default());
        buoyancy.reference = Some(DensityReference {
            average: 1.5,
            cells: 10,
        });

        let source = buoyancy.source(CellId(0), &state(2.0, [3.0, 1.0, -4.0]));
        assert_eq!(source.rho, 0.0);
        assert_relative_eq!(source.rho_u[0], 0.5);
        assert_eq!(source.rho_u[1], 0.0);
        assert_relative_eq!(source.rho_u[2], 0.25);
        assert_relative_eq!(source.rho_e, 3.0 * 0.5 - 4.0 * 0.25, max_relative = 1e-12);

        // Lighter cells flip the sign of every component.
        let light = buoyancy.source(CellId(0), &state(1.0, [1.0; 3]));
        assert_eq!(light.rho_u, [0.0, 1.0, 0.0]);
        assert_relative_eq!(light.rho_e, 1.0);
    }
}
