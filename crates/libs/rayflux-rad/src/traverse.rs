//! Cell-by-cell traversal of carriers.

use crate::{
    cache::{PathCache, Segment, SegmentExit},
    carrier::Carrier,
    optics::OpticalProperties,
    RadiationError,
};
use base::math::DVec3;
use mesh::{CellId, FaceId, MeshAdapter, MeshError};

/// Faces whose outward normal makes a smaller cosine with the direction are
/// treated as parallel to it.
const PARALLEL_COSINE: f64 = 1.0e-12;

/// Relative tolerance under which two exit distances are considered equal.
const TIE_TOLERANCE: f64 = 1.0e-12;

/// Face through which a ray leaves a cell.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ExitFace {
    /// Face crossed.
    pub face: FaceId,
    /// Distance from the ray origin to the face plane along the ray.
    pub distance: f64,
}

/// Finds the face through which the ray `position + t·direction` leaves
/// `cell`: the nearest plane among the faces the direction points out of.
/// Equally near faces resolve to the lowest face id.
///
/// Returns `None` when no face qualifies, which only happens for degenerate
/// cells or directions.
pub fn exit_face<M>(
    view: &M,
    cell: CellId,
    position: DVec3,
    direction: DVec3,
) -> Result<Option<ExitFace>, MeshError>
where
    M: MeshAdapter + ?Sized,
{
    let mut best: Option<ExitFace> = None;
    for &face in view.faces_of(cell)? {
        let normal = view.outward_normal(face, cell)?;
        let cosine = direction.dot(normal);
        if cosine <= PARALLEL_COSINE {
            continue;
        }
        let centroid = view.face_geometry(face)?.centroid;
        let distance = ((centroid - position).dot(normal) / cosine).max(0.0);
        if !distance.is_finite() {
            continue;
        }
        best = match best {
            None => Some(ExitFace { face, distance }),
            Some(current) => {
                let tolerance = TIE_TOLERANCE * current.distance.max(1.0);
                let nearer = distance < current.distance - tolerance;
                let tied = (distance - current.distance).abs() <= tolerance;
                if nearer || (tied && face < current.face) {
                    Some(ExitFace { face, distance })
                } else {
                    Some(current)
                }
            },
        };
    }
    Ok(best)
}

/// Why a carrier stopped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The carrier left the domain through a boundary face.
    DomainExit,
    /// The transmissivity fell below the negligibility threshold.
    Negligible,
    /// The hop budget was exhausted.
    HopBudget,
    /// No exit face was found.
    Degenerate,
}

/// Result of advancing a carrier as far as its rank allows.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The carrier is finished; its intensity is final.
    Terminated(Termination),
    /// The carrier must continue on another rank.
    Handoff {
        /// Rank owning the next cell.
        rank: usize,
    },
}

/// Work ceilings of a carrier.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Limits {
    /// Maximum number of cells a carrier may cross.
    pub max_hops: u32,
    /// Transmissivity under which gathering stops.
    pub transmissivity_threshold: f64,
}

/// Advances carriers through the cells of one rank.
pub struct Tracer<'a, M: ?Sized, O: ?Sized> {
    view: &'a M,
    optics: &'a O,
    cache: Option<&'a PathCache>,
    limits: Limits,
}

impl<'a, M, O> Tracer<'a, M, O>
where
    M: MeshAdapter + ?Sized,
    O: OpticalProperties + ?Sized,
{
    /// Creates a tracer deriving every cell sequence itself.
    pub fn new(view: &'a M, optics: &'a O, limits: Limits) -> Self {
        Self {
            view,
            optics,
            cache: None,
            limits,
        }
    }

    /// Shares derived cell sequences through `cache`.
    pub fn with_cache(mut self, cache: &'a PathCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Advances the carrier until it terminates or reaches a cell owned by
    /// another rank.
    pub fn advance(&self, carrier: &mut Carrier) -> Result<Outcome, RadiationError> {
        if carrier.hops == 0 && carrier.entry_face == carrier.id.face {
            let normal = self.view.outward_normal(carrier.id.face, carrier.cell)?;
            if carrier.direction.dot(normal) > 0.0 {
                // Pointing out of the domain: only the face's own emission.
                carrier.gather_wall(self.optics.boundary_intensity(carrier.id.face));
                log::trace!("{} leaves through its own face", carrier.id);
                return Ok(Outcome::Terminated(Termination::DomainExit));
            }
        }
        match self.cache {
            Some(cache) => match cache.get(carrier.entry_face, carrier.position, carrier.direction) {
                Some(segment) => self.replay(carrier, &segment),
                None => self.trace(carrier, Some(cache)),
            },
            None => self.trace(carrier, None),
        }
    }

    /// Derives the cell sequence of the carrier, recording it into `cache`
    /// once complete.
    fn trace(&self, carrier: &mut Carrier, cache: Option<&PathCache>) -> Result<Outcome, RadiationError> {
        let entry_face = carrier.entry_face;
        let entry = carrier.position;
        let mut steps = Vec::new();
        let mut transmissivity = 1.0;
        loop {
            let cell = carrier.cell;
            let exit = match exit_face(self.view, cell, carrier.position, carrier.direction)? {
                Some(exit) => exit,
                None => {
                    log::warn!(
                        "{} found no exit face in cell {} along {}",
                        carrier.id,
                        cell,
                        carrier.direction
                    );
                    return Ok(Outcome::Terminated(Termination::Degenerate));
                },
            };
            let kappa = self.optics.absorption_coefficient(cell)?;
            let source = self.optics.emission_source(cell)?;
            transmissivity *= carrier.cross(kappa, source, exit.distance);
            carrier.position += carrier.direction * exit.distance;
            if cache.is_some() {
                steps.push((cell, exit.distance));
            }
            log::trace!(
                "{} crossed {} over {} leaving by {}",
                carrier.id,
                cell,
                exit.distance,
                exit.face
            );

            let crossing = match self.view.across(exit.face, cell)? {
                None => Some(SegmentExit::Domain(exit.face)),
                Some(next) => {
                    let rank = self.view.owner_rank(next)?;
                    if rank == self.view.rank() {
                        carrier.cell = next;
                        carrier.entry_face = exit.face;
                        None
                    } else {
                        Some(SegmentExit::Rank {
                            face: exit.face,
                            cell: next,
                            rank,
                        })
                    }
                },
            };

            if let (Some(cache), Some(exit)) = (cache, crossing) {
                cache.insert(
                    entry_face,
                    carrier.direction,
                    Segment {
                        entry,
                        steps: std::mem::take(&mut steps),
                        exit,
                        transmissivity,
                    },
                );
            }
            if let Some(outcome) = self.settle(carrier, crossing) {
                return Ok(outcome);
            }
        }
    }

    /// Gathers along a cached cell sequence.
    fn replay(&self, carrier: &mut Carrier, segment: &Segment) -> Result<Outcome, RadiationError> {
        log::trace!(
            "{} replays {} cached cells from {}",
            carrier.id,
            segment.steps.len(),
            carrier.entry_face
        );
        let last = segment.steps.len().saturating_sub(1);
        for (i, &(cell, length)) in segment.steps.iter().enumerate() {
            let kappa = self.optics.absorption_coefficient(cell)?;
            let source = self.optics.emission_source(cell)?;
            carrier.cross(kappa, source, length);
            carrier.position += carrier.direction * length;
            let crossing = if i == last {
                Some(segment.exit)
            } else {
                carrier.cell = segment.steps[i + 1].0;
                None
            };
            if let Some(outcome) = self.settle(carrier, crossing) {
                return Ok(outcome);
            }
        }
        // Segments always hold at least one step; an empty one behaves like
        // its exit alone.
        Ok(self
            .settle(carrier, Some(segment.exit))
            .unwrap_or(Outcome::Terminated(Termination::Degenerate)))
    }

    /// Decides what happens to a carrier that just crossed a cell, given how
    /// it left the cell (`None` when it stays on this rank).
    fn settle(&self, carrier: &mut Carrier, crossing: Option<SegmentExit>) -> Option<Outcome> {
        if carrier.transmissivity < self.limits.transmissivity_threshold {
            return Some(Outcome::Terminated(Termination::Negligible));
        }
        if let Some(SegmentExit::Domain(face)) = crossing {
            carrier.gather_wall(self.optics.boundary_intensity(face));
            return Some(Outcome::Terminated(Termination::DomainExit));
        }
        if carrier.hops >= self.limits.max_hops {
            log::warn!(
                "{} exhausted its budget of {} hops in cell {}",
                carrier.id,
                self.limits.max_hops,
                carrier.cell
            );
            return Some(Outcome::Terminated(Termination::HopBudget));
        }
        match crossing {
            Some(SegmentExit::Rank { face, cell, rank }) => {
                carrier.cell = cell;
                carrier.entry_face = face;
                Some(Outcome::Handoff { rank })
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::CacheStamp,
        carrier::CarrierId,
        optics::{CellOptics, OpticalSnapshot},
    };
    use ahash::AHashMap;
    use approx::assert_relative_eq;
    use base::math::Axis;
    use mesh::{Mesh, Partition, PartitionView};
    use proptest::prelude::*;
    use std::sync::Arc;

    const LIMITS: Limits = Limits {
        max_hops: 100,
        transmissivity_threshold: 0.0,
    };

    fn bar(n: usize, ranks: usize) -> Vec<PartitionView> {
        let mesh = Arc::new(
            Mesh::structured_box([n, 1, 1], DVec3::ZERO, DVec3::new(n as f64, 1.0, 1.0)).unwrap(),
        );
        let partition = Arc::new(Partition::slabs(&mesh, ranks, Axis::X).unwrap());
        PartitionView::all(mesh, partition).unwrap()
    }

    fn uniform(view: &PartitionView, kappa: f64, source: f64) -> OpticalSnapshot {
        let cells = view
            .owned_cells()
            .iter()
            .map(|&c| (c, CellOptics { absorption: kappa, source }))
            .collect::<AHashMap<_, _>>();
        OpticalSnapshot::from_cells(view.rank(), cells)
    }

    fn face(view: &PartitionView, label: &str) -> FaceId {
        view.mesh().boundary_faces_labelled(label).next().unwrap().id
    }

    fn launch(view: &PartitionView, label: &str, direction: DVec3) -> Carrier {
        let f = view.mesh().face(face(view, label)).unwrap();
        Carrier::launch(
            CarrierId { face: f.id, ordinate: 0 },
            direction.normalize(),
            f.centroid,
            f.cells.0,
        )
    }

    #[test]
    fn single_cell_chord_length() {
        let mesh = Arc::new(
            Mesh::structured_box([1, 1, 1], DVec3::ZERO, DVec3::new(2.0, 1.0, 1.0)).unwrap(),
        );
        let view = PartitionView::new(mesh.clone(), Arc::new(Partition::single(&mesh)), 0).unwrap();
        let optics = uniform(&view, 0.0, 0.0);
        let mut carrier = launch(&view, "x-", DVec3::new(2.0, 0.2, 0.0));
        let exit = exit_face(&view, carrier.cell, carrier.position, carrier.direction)
            .unwrap()
            .unwrap();
        assert_eq!(exit.face, face(&view, "x+"));
        assert_relative_eq!(exit.distance, 4.04f64.sqrt(), epsilon = 1e-12);

        let outcome = Tracer::new(&view, &optics, LIMITS).advance(&mut carrier).unwrap();
        assert_eq!(outcome, Outcome::Terminated(Termination::DomainExit));
        assert_relative_eq!(carrier.path_length, 4.04f64.sqrt(), epsilon = 1e-12);
        assert!((carrier.position - DVec3::new(2.0, 0.7, 0.5)).length() < 1e-12);
        assert_eq!(carrier.hops, 1);
    }

    #[test]
    fn corner_ties_resolve_to_lowest_face() {
        let mesh = Arc::new(Mesh::structured_box([1, 1, 1], DVec3::ZERO, DVec3::ONE).unwrap());
        let view = PartitionView::new(mesh.clone(), Arc::new(Partition::single(&mesh)), 0).unwrap();
        let direction = DVec3::new(1.0, 1.0, 0.0).normalize();
        let exit = exit_face(&view, CellId(0), DVec3::splat(0.5), direction)
            .unwrap()
            .unwrap();
        // x+ and y+ are hit at the same edge; x-faces are numbered first.
        assert_eq!(exit.face, face(&view, "x+"));
        assert_relative_eq!(exit.distance, 0.5 * 2f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn transparent_medium_transmits_far_wall() {
        let views = bar(5, 1);
        let view = &views[0];
        let mut optics = uniform(view, 0.0, 123.0).with_ambient(1.0);
        optics.set_wall(face(view, "x+"), 42.0);
        let mut carrier = launch(view, "x-", DVec3::X);
        let outcome = Tracer::new(view, &optics, LIMITS).advance(&mut carrier).unwrap();
        assert_eq!(outcome, Outcome::Terminated(Termination::DomainExit));
        assert_eq!(carrier.intensity, 42.0);
        assert_eq!(carrier.hops, 5);
        assert_relative_eq!(carrier.path_length, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn gray_slab_matches_analytic_solution() {
        let views = bar(10, 1);
        let view = &views[0];
        let (kappa, source, wall) = (0.3, 5.0, 2.0);
        let optics = uniform(view, kappa, source).with_ambient(wall);
        let mut carrier = launch(view, "x-", DVec3::X);
        Tracer::new(view, &optics, LIMITS).advance(&mut carrier).unwrap();
        let t = (-kappa * 10.0).exp();
        assert_relative_eq!(carrier.intensity, source * (1.0 - t) + wall * t, epsilon = 1e-10);
        assert_relative_eq!(carrier.transmissivity, t, epsilon = 1e-12);
    }

    #[test]
    fn outward_ordinate_returns_own_emission() {
        let views = bar(3, 1);
        let view = &views[0];
        let mut optics = uniform(view, 1.0, 9.0).with_ambient(1.0);
        optics.set_wall(face(view, "x-"), 6.5);
        let mut carrier = launch(view, "x-", -DVec3::X);
        let outcome = Tracer::new(view, &optics, LIMITS).advance(&mut carrier).unwrap();
        assert_eq!(outcome, Outcome::Terminated(Termination::DomainExit));
        assert_eq!(carrier.intensity, 6.5);
        assert_eq!(carrier.path_length, 0.0);
        assert_eq!(carrier.hops, 0);
    }

    #[test]
    fn hop_budget_stops_long_paths() {
        let views = bar(10, 1);
        let view = &views[0];
        let optics = uniform(view, 0.1, 1.0).with_ambient(3.0);
        let limits = Limits {
            max_hops: 3,
            transmissivity_threshold: 0.0,
        };
        let mut carrier = launch(view, "x-", DVec3::X);
        let outcome = Tracer::new(view, &optics, limits).advance(&mut carrier).unwrap();
        assert_eq!(outcome, Outcome::Terminated(Termination::HopBudget));
        assert_eq!(carrier.hops, 3);
        assert!(carrier.intensity.is_finite());
        assert_relative_eq!(carrier.intensity, 1.0 - (-0.3f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn negligible_transmissivity_stops_gathering() {
        let views = bar(10, 1);
        let view = &views[0];
        let optics = uniform(view, 5.0, 1.0);
        let limits = Limits {
            max_hops: 100,
            transmissivity_threshold: 1e-3,
        };
        let mut carrier = launch(view, "x-", DVec3::X);
        let outcome = Tracer::new(view, &optics, limits).advance(&mut carrier).unwrap();
        assert_eq!(outcome, Outcome::Terminated(Termination::Negligible));
        // e^-5 > 1e-3 > e^-10
        assert_eq!(carrier.hops, 2);
    }

    #[test]
    fn carriers_are_handed_to_the_owning_rank() {
        let views = bar(4, 2);
        let optics = uniform(&views[0], 0.5, 1.0);
        let mut carrier = launch(&views[0], "x-", DVec3::X);
        let outcome = Tracer::new(&views[0], &optics, LIMITS).advance(&mut carrier).unwrap();
        assert_eq!(outcome, Outcome::Handoff { rank: 1 });
        assert_eq!(carrier.cell, CellId(2));
        assert_eq!(carrier.hops, 2);
        assert!((carrier.position - DVec3::new(2.0, 0.5, 0.5)).length() < 1e-12);
        assert_eq!(views[0].is_ghost_face(carrier.entry_face), Ok(true));

        let optics = uniform(&views[1], 0.5, 1.0);
        let outcome = Tracer::new(&views[1], &optics, LIMITS).advance(&mut carrier).unwrap();
        assert_eq!(outcome, Outcome::Terminated(Termination::DomainExit));
        assert_eq!(carrier.hops, 4);
        assert_relative_eq!(carrier.intensity, 1.0 - (-2.0f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn cache_hit_matches_cache_miss() {
        let mesh = Arc::new(
            Mesh::structured_box([4, 3, 2], DVec3::ZERO, DVec3::new(4.0, 3.0, 2.0)).unwrap(),
        );
        let view = PartitionView::new(mesh.clone(), Arc::new(Partition::single(&mesh)), 0).unwrap();
        let cells = mesh
            .cells()
            .iter()
            .map(|c| {
                let optics = CellOptics {
                    absorption: 0.1 + 0.05 * c.id.0 as f64,
                    source: c.centroid.x,
                };
                (c.id, optics)
            })
            .collect::<AHashMap<_, _>>();
        let optics = OpticalSnapshot::from_cells(0, cells).with_ambient(0.7);
        let mut cache = PathCache::new(1e-6, 1e-9);
        cache.prepare(CacheStamp {
            mesh_revision: mesh.revision(),
            optics_epoch: optics.epoch(),
        });
        let tracer = Tracer::new(&view, &optics, LIMITS).with_cache(&cache);

        let fresh = launch(&view, "x-", DVec3::new(1.0, 0.6, 0.3));
        let mut missed = fresh.clone();
        let mut hit = fresh.clone();
        let first = tracer.advance(&mut missed).unwrap();
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().inserts, 1);
        let second = tracer.advance(&mut hit).unwrap();
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(first, second);
        let mut uncached = fresh.clone();
        Tracer::new(&view, &optics, LIMITS).advance(&mut uncached).unwrap();
        for other in [&missed, &uncached] {
            assert_eq!(other.intensity, hit.intensity);
            assert_eq!(other.transmissivity, hit.transmissivity);
            assert_eq!(other.hops, hit.hops);
            assert_eq!(other.path_length, hit.path_length);
            assert_eq!(other.position, hit.position);
            assert_eq!(other.cell, hit.cell);
        }
        assert!(hit.hops > 1);
    }

    #[test]
    fn carriers_entering_a_face_elsewhere_trace_their_own_cells() {
        let mesh = Arc::new(
            Mesh::structured_box([2, 2, 1], DVec3::ZERO, DVec3::new(2.0, 2.0, 1.0)).unwrap(),
        );
        let partition = Arc::new(Partition::slabs(&mesh, 2, Axis::X).unwrap());
        let views = PartitionView::all(mesh.clone(), partition).unwrap();
        let optics = views
            .iter()
            .map(|view| {
                let cells = mesh
                    .cells()
                    .iter()
                    .filter(|c| view.owns(c.id))
                    .map(|c| {
                        let optics = CellOptics {
                            absorption: 0.3 + 0.2 * c.id.0 as f64,
                            source: c.centroid.y,
                        };
                        (c.id, optics)
                    })
                    .collect::<AHashMap<_, _>>();
                OpticalSnapshot::from_cells(view.rank(), cells)
            })
            .collect::<Vec<_>>();

        // Two carriers of the lower x- face reach the same ghost face of
        // rank 1, at y = 0.7 and y = 0.9. Only the upper one goes on into
        // the upper row of cells.
        let wall = mesh
            .boundary_faces_labelled("x-")
            .find(|f| f.centroid.y < 1.0)
            .unwrap();
        let direction = DVec3::new(1.0, 0.2, 0.1).normalize();
        let mut arrivals = Vec::new();
        for (ordinate, offset) in [(0, 0.0), (1, 0.2)] {
            let mut carrier = Carrier::launch(
                CarrierId { face: wall.id, ordinate },
                direction,
                wall.centroid + DVec3::Y * offset,
                wall.cells.0,
            );
            let outcome = Tracer::new(&views[0], &optics[0], LIMITS).advance(&mut carrier).unwrap();
            assert_eq!(outcome, Outcome::Handoff { rank: 1 });
            arrivals.push(carrier);
        }
        assert_eq!(arrivals[0].entry_face, arrivals[1].entry_face);
        assert_eq!(arrivals[0].cell, arrivals[1].cell);
        assert!((arrivals[1].position.y - arrivals[0].position.y - 0.2).abs() < 1e-12);

        let mut cache = PathCache::new(1e-6, 1e-9);
        cache.prepare(CacheStamp {
            mesh_revision: mesh.revision(),
            optics_epoch: optics[1].epoch(),
        });
        let shared = Tracer::new(&views[1], &optics[1], LIMITS).with_cache(&cache);
        let plain = Tracer::new(&views[1], &optics[1], LIMITS);
        let mut hops = Vec::new();
        for arrival in arrivals {
            let mut cached = arrival.clone();
            let mut traced = arrival;
            assert_eq!(shared.advance(&mut cached).unwrap(), plain.advance(&mut traced).unwrap());
            assert_eq!(cached.intensity, traced.intensity);
            assert_eq!(cached.transmissivity, traced.transmissivity);
            assert_eq!(cached.position, traced.position);
            assert_eq!(cached.hops, traced.hops);
            hops.push(traced.hops);
        }
        assert_eq!(hops, vec![2, 3]);
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn degenerate_direction_terminates() {
        let views = bar(2, 1);
        let view = &views[0];
        let optics = uniform(view, 0.0, 0.0);
        let mut carrier = launch(view, "x-", DVec3::X);
        carrier.direction = DVec3::ZERO;
        let outcome = Tracer::new(view, &optics, LIMITS).advance(&mut carrier).unwrap();
        assert_eq!(outcome, Outcome::Terminated(Termination::Degenerate));
        assert!(carrier.intensity.is_finite());
    }

    #[test]
    fn foreign_cells_are_lookup_errors() {
        let views = bar(4, 2);
        let optics = uniform(&views[1], 0.0, 0.0);
        let mut carrier = launch(&views[1], "x-", DVec3::X);
        assert!(matches!(
            Tracer::new(&views[1], &optics, LIMITS).advance(&mut carrier),
            Err(RadiationError::MeshLookup(_))
        ));
    }

    proptest! {
        #[test]
        fn exit_lies_on_the_cell_boundary(x in 0.05f64..0.95, y in 0.05f64..0.95,
                                         dx in -1.0f64..1.0, dy in -1.0f64..1.0, dz in 0.1f64..1.0) {
            let mesh = Arc::new(Mesh::structured_box([1, 1, 1], DVec3::ZERO, DVec3::ONE).unwrap());
            let view = PartitionView::new(mesh.clone(), Arc::new(Partition::single(&mesh)), 0).unwrap();
            let origin = DVec3::new(x, y, 0.0);
            let direction = DVec3::new(dx, dy, dz).normalize();
            let exit = exit_face(&view, CellId(0), origin, direction).unwrap().unwrap();
            let point = origin + direction * exit.distance;
            let crossed = mesh.face(exit.face).unwrap();
            prop_assert!((point - crossed.centroid).dot(crossed.normal).abs() < 1e-9);
            prop_assert!(point.cmpge(DVec3::splat(-1e-9)).all() && point.cmple(DVec3::splat(1.0 + 1e-9)).all());
        }
    }
}
