use crate::{
    accum::Accumulator,
    cache::{CacheStamp, CacheStats, PathCache},
    carrier::{Carrier, CarrierId},
    config::{RadiationConfig, TracingMethod},
    exchange::{agree, Coordinator, InFlightLedger},
    optics::OpticalProperties,
    traverse::{Limits, Termination, Tracer},
    ConvergenceExceeded, RadiationError, SolveWarning,
};
use base::{quadrature::OrdinateSet, Communicator};
use mesh::{FaceId, MeshAdapter, MeshError, PartitionView};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

/// Ordinates closer than this cosine to a face plane carry no flux through
/// the face and are not traced.
const GRAZING_COSINE: f64 = 1.0e-12;

/// Diagnostics of one solve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    /// Rounds performed.
    pub rounds: u32,
    /// Carriers launched over all ranks.
    pub carriers: u64,
    /// Carrier hand-offs over all ranks.
    pub handoffs: u64,
    /// Path cache activity on this rank.
    pub cache: CacheStats,
    /// Non-fatal events on this rank.
    pub warnings: Vec<SolveWarning>,
    /// Whether any rank finished with a warning, making the flux approximate.
    pub approximate: bool,
}

/// Result of a solve on one rank.
#[derive(Debug, Clone, PartialEq)]
pub struct RadiationSolution {
    /// Net radiative flux into every emitting face owned by the rank.
    pub flux: BTreeMap<FaceId, f64>,
    /// Diagnostics.
    pub report: SolveReport,
    intensities: Accumulator,
}

impl RadiationSolution {
    /// Net radiative flux into `face`, `None` if the face is not an emitting
    /// face of this rank.
    pub fn flux_at(&self, face: FaceId) -> Option<f64> { self.flux.get(&face).copied() }

    /// Intensity gathered for `face` along `ordinate`.
    pub fn incident_intensity(&self, face: FaceId, ordinate: u32) -> Option<f64> {
        self.intensities.incident_intensity(face, ordinate)
    }
}

/// Radiation solver of one rank.
///
/// Every owned emitting face launches one carrier per ordinate that is not
/// parallel to it. Carriers are traced until they leave the domain, possibly
/// across several ranks, and their gathered intensity is integrated into the
/// net flux of their face.
pub struct RadiationSolver {
    config: RadiationConfig,
    view: Arc<PartitionView>,
    ordinates: Arc<OrdinateSet>,
    emitting: Vec<FaceId>,
    cache: PathCache,
    limits: Limits,
    max_rounds: u32,
    ledger: Option<Arc<InFlightLedger>>,
}

impl RadiationSolver {
    /// Creates the solver of the rank seen by `view`.
    ///
    /// `emitting` lists the domain boundary faces whose flux is wanted; faces
    /// owned by other ranks are ignored so every rank can be given the same
    /// list.
    pub fn new<I>(config: RadiationConfig, view: Arc<PartitionView>, emitting: I) -> Result<Self, RadiationError>
    where
        I: IntoIterator<Item = FaceId>,
    {
        let config = config.validate()?;
        let mut faces = Vec::new();
        for id in emitting {
            let face = view.mesh().face(id).ok_or(MeshError::FaceNotFound {
                face: id,
                rank: view.rank(),
            })?;
            if !face.is_boundary() {
                return Err(RadiationError::InvalidConfig(format!(
                    "emitting face {} is not on the domain boundary",
                    id
                )));
            }
            if view.owns(face.cells.0) {
                faces.push(id);
            }
        }
        faces.sort_unstable();
        faces.dedup();

        let diameter = view.mesh().diameter_in_cells();
        let limits = Limits {
            max_hops: config.hop_budget(diameter),
            transmissivity_threshold: config.transmissivity_threshold,
        };
        let max_rounds = config.round_ceiling(diameter);
        let ordinates = Arc::new(OrdinateSet::equal_angle(config.n_theta, config.n_phi));
        log::debug!(
            "Rank {}: {} emitting faces, {} ordinates, {:?} tracing, {} hops, {} rounds",
            view.rank(),
            faces.len(),
            ordinates.len(),
            config.method,
            limits.max_hops,
            max_rounds
        );
        Ok(Self {
            cache: PathCache::new(config.bucket_width, config.entry_tolerance),
            config,
            view,
            ordinates,
            emitting: faces,
            limits,
            max_rounds,
            ledger: None,
        })
    }

    /// Records the carriers in flight after every exchange into `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<InFlightLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &RadiationConfig { &self.config }

    /// Tracing method selected at construction.
    pub fn method(&self) -> TracingMethod { self.config.method }

    /// Ordinate quadrature shared by all carriers.
    pub fn ordinates(&self) -> &Arc<OrdinateSet> { &self.ordinates }

    /// Emitting faces owned by this rank, ascending.
    pub fn emitting_faces(&self) -> &[FaceId] { &self.emitting }

    /// Mesh view of the rank.
    pub fn view(&self) -> &Arc<PartitionView> { &self.view }

    /// Carrier hop budget.
    pub fn limits(&self) -> Limits { self.limits }

    /// Round ceiling.
    pub fn max_rounds(&self) -> u32 { self.max_rounds }

    /// Runs one solve against frozen optical properties. Must be called by
    /// every rank of `comm` together.
    pub fn solve<O, C>(&mut self, optics: &O, comm: &C) -> Result<RadiationSolution, RadiationError>
    where
        O: OpticalProperties + ?Sized,
        C: Communicator + ?Sized,
    {
        let view = self.view.as_ref();
        if comm.rank() != view.rank() || comm.size() != view.partition().n_ranks() {
            return Err(RadiationError::InvalidConfig(format!(
                "communicator rank {} of {} does not match partition rank {} of {}",
                comm.rank(),
                comm.size(),
                view.rank(),
                view.partition().n_ranks()
            )));
        }
        if self.config.method == TracingMethod::RaySharing {
            self.cache.prepare(CacheStamp {
                mesh_revision: view.mesh().revision(),
                optics_epoch: optics.epoch(),
            });
        }

        let in_flight = agree(comm, self.launch())?;
        let launched = in_flight.len() as u64;
        let tracer = Tracer::new(view, optics, self.limits);
        let tracer = match self.config.method {
            TracingMethod::Standard => tracer,
            TracingMethod::RaySharing => tracer.with_cache(&self.cache),
        };

        let mut accumulator = Accumulator::new();
        let mut warnings = Vec::new();
        let mut coordinator = Coordinator::new(comm, view, self.max_rounds)
            .parallel(self.config.parallel)
            .with_ledger(self.ledger.as_deref());
        let summary = coordinator.run(&tracer, in_flight, |carrier, termination| {
            match termination {
                Some(Termination::Degenerate) => warnings.push(SolveWarning::GeometryDegenerate {
                    carrier: carrier.id,
                    cell: carrier.cell,
                }),
                Some(Termination::HopBudget) => warnings.push(
                    ConvergenceExceeded::HopBudget {
                        carrier: carrier.id,
                        hops: carrier.hops,
                    }
                    .into(),
                ),
                _ => {},
            }
            accumulator.deposit(carrier.id.face, carrier.id.ordinate, carrier.intensity);
        })?;
        if summary.ceiling_reached {
            log::warn!(
                "Rank {}: round ceiling of {} reached, {} carriers flushed",
                view.rank(),
                self.max_rounds,
                summary.flushed
            );
            warnings.push(
                ConvergenceExceeded::RoundCeiling {
                    rounds: summary.rounds,
                    flushed: summary.flushed,
                }
                .into(),
            );
        }

        let accumulator = agree(comm, accumulator.route(view, comm))?;
        let flux = self
            .emitting
            .iter()
            .map(|&face| -> Result<_, RadiationError> {
                let normal = view.face_geometry(face)?.normal;
                Ok((face, accumulator.flux_at(face, normal, &self.ordinates)))
            })
            .collect::<Result<BTreeMap<_, _>, _>>();
        let flux = agree(comm, flux)?;

        let report = SolveReport {
            rounds: summary.rounds,
            carriers: comm.all_reduce_sum_u64(launched),
            handoffs: comm.all_reduce_sum_u64(summary.sent),
            cache: self.cache.stats(),
            approximate: !comm.all_reduce_and(warnings.is_empty()),
            warnings,
        };
        if report.approximate && view.rank() == 0 {
            log::warn!("Radiation solve finished with approximate fluxes");
        }
        log::debug!(
            "Rank {}: solve done in {} rounds, {} carriers, cache {:?}",
            view.rank(),
            report.rounds,
            report.carriers,
            report.cache
        );
        Ok(RadiationSolution {
            flux,
            report,
            intensities: accumulator,
        })
    }

    /// Launches one carrier per emitting face and non-grazing ordinate.
    fn launch(&self) -> Result<BTreeMap<CarrierId, Carrier>, RadiationError> {
        let mut in_flight = BTreeMap::new();
        for &face in &self.emitting {
            let geometry = self.view.face_geometry(face)?;
            let owner = self.view.cell_of(face, mesh::Side::Owner)?.ok_or(MeshError::FaceNotFound {
                face,
                rank: self.view.rank(),
            })?;
            for ordinate in self.ordinates.iter() {
                if ordinate.direction.dot(geometry.normal).abs() <= GRAZING_COSINE {
                    continue;
                }
                let id = CarrierId {
                    face,
                    ordinate: ordinate.index,
                };
                in_flight.insert(id, Carrier::launch(id, ordinate.direction, geometry.centroid, owner));
            }
        }
        Ok(in_flight)
    }
}
