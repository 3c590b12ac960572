//! Accumulation of finished carriers into boundary face fluxes.

use crate::{carrier::CarrierId, CommunicationFailure, RadiationError};
use base::{
    comm::{decode, encode},
    math::DVec3,
    quadrature::OrdinateSet,
    Communicator,
};
use mesh::{FaceId, PartitionView};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map::Entry, BTreeMap};

/// Deposits sent by one rank to the rank owning their faces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositBatch {
    /// Sending rank.
    pub from: usize,
    /// Gathered intensity per carrier.
    pub deposits: Vec<(CarrierId, f64)>,
}

/// Gathered intensity of every finished carrier, keyed by its identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    intensities: BTreeMap<CarrierId, f64>,
    rejected: u64,
}

impl Accumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self { Self::default() }

    /// Records the intensity gathered for `face` along `ordinate`.
    ///
    /// Only the first deposit of a pair counts; later ones are rejected and
    /// `false` is returned.
    pub fn deposit(&mut self, face: FaceId, ordinate: u32, intensity: f64) -> bool {
        match self.intensities.entry(CarrierId { face, ordinate }) {
            Entry::Vacant(entry) => {
                entry.insert(intensity);
                true
            },
            Entry::Occupied(_) => {
                log::warn!("Rejected second deposit for {}#{}", face, ordinate);
                self.rejected += 1;
                false
            },
        }
    }

    /// Number of deposits held.
    pub fn len(&self) -> usize { self.intensities.len() }

    /// Whether nothing was deposited.
    pub fn is_empty(&self) -> bool { self.intensities.is_empty() }

    /// Number of rejected duplicate deposits.
    pub fn rejected(&self) -> u64 { self.rejected }

    /// Intensity gathered for `face` along `ordinate`.
    pub fn incident_intensity(&self, face: FaceId, ordinate: u32) -> Option<f64> {
        self.intensities.get(&CarrierId { face, ordinate }).copied()
    }

    /// Faces holding at least one deposit, ascending.
    pub fn faces(&self) -> Vec<FaceId> {
        let mut faces = self.intensities.keys().map(|id| id.face).collect::<Vec<_>>();
        faces.dedup();
        faces
    }

    /// Net radiative flux into `face`, whose outward unit normal is `normal`.
    ///
    /// Ordinates marching into the domain gathered the intensity arriving at
    /// the face and count positively; ordinates pointing out of it carry the
    /// face's own emission and count negatively.
    pub fn flux_at(&self, face: FaceId, normal: DVec3, ordinates: &OrdinateSet) -> f64 {
        let lo = CarrierId { face, ordinate: 0 };
        let hi = CarrierId {
            face,
            ordinate: u32::MAX,
        };
        self.intensities
            .range(lo..=hi)
            .filter_map(|(id, intensity)| {
                let ordinate = ordinates.get(id.ordinate)?;
                let cosine = ordinate.direction.dot(normal);
                let sign = if cosine < 0.0 { 1.0 } else { -1.0 };
                Some(sign * ordinate.weight * cosine.abs() * intensity)
            })
            .sum()
    }

    /// Moves every deposit to the rank owning its face's cell, with one
    /// all-to-all exchange. Afterwards every rank holds exactly the deposits
    /// of its own faces.
    pub fn route<C>(self, view: &PartitionView, comm: &C) -> Result<Self, RadiationError>
    where
        C: Communicator + ?Sized,
    {
        let rank = comm.rank();
        let mut kept = Accumulator {
            intensities: BTreeMap::new(),
            rejected: self.rejected,
        };
        let mut outgoing = (0..comm.size())
            .filter(|&r| r != rank)
            .map(|r| (r, Vec::new()))
            .collect::<BTreeMap<_, _>>();
        let mut sorted = Ok(());
        for (id, intensity) in self.intensities {
            let owner = view
                .mesh()
                .face(id.face)
                .and_then(|f| view.partition().owner_of(f.cells.0));
            match owner.map(|owner| outgoing.get_mut(&owner)) {
                Some(Some(deposits)) => deposits.push((id, intensity)),
                Some(None) => {
                    kept.deposit(id.face, id.ordinate, intensity);
                },
                None => {
                    sorted = Err(mesh::MeshError::FaceNotFound { face: id.face, rank });
                    break;
                },
            }
        }
        if sorted.is_err() {
            // Every other rank still waits for one batch from this one.
            outgoing.values_mut().for_each(Vec::clear);
        }

        let sent = outgoing.values().map(Vec::len).sum::<usize>();
        for (to, deposits) in outgoing {
            comm.send(to, encode(&DepositBatch { from: rank, deposits })?)?;
        }
        sorted?;
        let mut received = 0;
        for source in (0..comm.size()).filter(|&r| r != rank) {
            let batch: DepositBatch = decode(&comm.recv(source)?)?;
            if batch.from != source {
                return Err(CommunicationFailure::UnexpectedBatch {
                    rank,
                    expected_from: source,
                    expected_round: 0,
                    from: batch.from,
                    round: 0,
                }
                .into());
            }
            for (id, intensity) in batch.deposits {
                if !view.owns_boundary_face(id.face) {
                    return Err(CommunicationFailure::MisroutedDeposit { face: id.face, rank }.into());
                }
                kept.deposit(id.face, id.ordinate, intensity);
                received += 1;
            }
        }
        if sent + received > 0 {
            log::debug!(
                "Rank {} routed {} deposits away and received {}",
                rank,
                sent,
                received
            );
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use base::{
        math::{Axis, DVec3},
        ChannelComm,
    };
    use mesh::{Mesh, Partition};
    use std::{f64::consts::PI, sync::Arc};

    #[test]
    fn first_deposit_wins() {
        let mut acc = Accumulator::new();
        assert!(acc.deposit(FaceId(2), 1, 3.0));
        assert!(!acc.deposit(FaceId(2), 1, 4.0));
        assert!(acc.deposit(FaceId(2), 2, 5.0));
        assert_eq!(acc.incident_intensity(FaceId(2), 1), Some(3.0));
        assert_eq!(acc.incident_intensity(FaceId(3), 1), None);
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.rejected(), 1);
        assert_eq!(acc.faces(), vec![FaceId(2)]);
    }

    #[test]
    fn uniform_incident_intensity_gives_hemispherical_flux() {
        let ordinates = OrdinateSet::equal_angle(32, 32);
        let normal = DVec3::Z;
        let mut acc = Accumulator::new();
        for o in ordinates.iter() {
            // Incident ordinates march into the domain, against the normal.
            if o.direction.dot(normal) < 0.0 {
                acc.deposit(FaceId(0), o.index, 1.0);
            }
        }
        assert_relative_eq!(acc.flux_at(FaceId(0), normal, &ordinates), PI, epsilon = 1e-2);

        // Emitting back the same intensity cancels the flux.
        for o in ordinates.iter() {
            if o.direction.dot(normal) > 0.0 {
                acc.deposit(FaceId(0), o.index, 1.0);
            }
        }
        assert!(acc.flux_at(FaceId(0), normal, &ordinates).abs() < 1e-12);
        assert_eq!(acc.flux_at(FaceId(1), normal, &ordinates), 0.0);
    }

    #[test]
    fn deposits_are_routed_to_face_owners() {
        let mesh = Arc::new(Mesh::structured_box([4, 1, 1], DVec3::ZERO, DVec3::new(4.0, 1.0, 1.0)).unwrap());
        let partition = Arc::new(Partition::slabs(&mesh, 2, Axis::X).unwrap());
        let views = mesh::PartitionView::all(mesh.clone(), partition).unwrap();
        let x_minus = mesh.boundary_faces_labelled("x-").next().unwrap().id;
        let x_plus = mesh.boundary_faces_labelled("x+").next().unwrap().id;

        let routed = std::thread::scope(|s| {
            let handles = ChannelComm::world(2)
                .into_iter()
                .zip(views.iter())
                .map(|(comm, view)| {
                    s.spawn(move || {
                        // Every rank finished one carrier of each face.
                        let mut acc = Accumulator::new();
                        acc.deposit(x_minus, comm.rank() as u32, 1.0);
                        acc.deposit(x_plus, comm.rank() as u32, 2.0);
                        acc.route(view, &comm).unwrap()
                    })
                })
                .collect::<Vec<_>>();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });
        assert_eq!(routed[0].faces(), vec![x_minus]);
        assert_eq!(routed[1].faces(), vec![x_plus]);
        assert_eq!(routed[0].len(), 2);
        assert_eq!(routed[1].incident_intensity(x_plus, 0), Some(2.0));
    }
}
