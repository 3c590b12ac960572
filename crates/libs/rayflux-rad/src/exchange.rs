//! Round-based hand-off of carriers between ranks.
//!
//! A solve alternates between tracing every carrier held by a rank and
//! exchanging the carriers that reached another rank's cells. Every rank sends
//! exactly one batch, possibly empty, to each neighbour per round, so a round
//! boundary synchronises all ranks. A rank that fails still sends its
//! batches, and every round ends with a reduction of the ranks' success, so
//! all ranks stop together. The solve is done once a reduction over all
//! ranks finds no carrier in flight and no carrier moved.

use crate::{
    carrier::{Carrier, CarrierId},
    optics::OpticalProperties,
    traverse::{Outcome, Termination, Tracer},
    CommunicationFailure, RadiationError,
};
use base::{
    comm::{decode, encode},
    Communicator,
};
use mesh::{MeshAdapter, PartitionView};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

/// Phase of the coordinator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoundState {
    /// Carriers are advanced locally.
    Tracing,
    /// Carriers are handed to the ranks owning their next cell.
    Exchanging,
    /// No carrier is left in flight anywhere.
    Done,
}

/// Carriers handed from one rank to a neighbour in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffBatch {
    /// Round the batch belongs to.
    pub round: u32,
    /// Sending rank.
    pub from: usize,
    /// Carriers, in ascending id order.
    pub carriers: Vec<Carrier>,
}

/// A carrier found in flight on two ranks during the same round.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LedgerViolation {
    /// Round of the observation.
    pub round: u32,
    /// Carrier concerned.
    pub carrier: CarrierId,
    /// Ranks holding it.
    pub ranks: (usize, usize),
}

/// Instrumentation recording which rank holds each carrier at the end of
/// every exchange, shared by all ranks of a solve.
#[derive(Debug, Default)]
pub struct InFlightLedger {
    holders: Mutex<BTreeMap<(u32, CarrierId), usize>>,
    violations: Mutex<Vec<LedgerViolation>>,
}

impl InFlightLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self { Self::default() }

    /// Records the carriers held by `rank` at the end of `round`.
    pub fn record<I: IntoIterator<Item = CarrierId>>(&self, round: u32, rank: usize, carriers: I) {
        let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        for carrier in carriers {
            if let Some(&other) = holders.get(&(round, carrier)) {
                if other != rank {
                    self.violations
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(LedgerViolation {
                            round,
                            carrier,
                            ranks: (other, rank),
                        });
                }
                continue;
            }
            holders.insert((round, carrier), rank);
        }
    }

    /// Every violation observed so far.
    pub fn violations(&self) -> Vec<LedgerViolation> {
        self.violations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ranks that held `carrier` at the end of some round, in round order.
    pub fn holders_of(&self, carrier: CarrierId) -> Vec<(u32, usize)> {
        self.holders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((_, id), _)| *id == carrier)
            .map(|((round, _), rank)| (*round, *rank))
            .collect()
    }
}

/// Summary of the rounds of one solve on one rank.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ExchangeSummary {
    /// Rounds performed.
    pub rounds: u32,
    /// Carriers sent to other ranks.
    pub sent: u64,
    /// Carriers received from other ranks.
    pub received: u64,
    /// Carriers flushed by the round ceiling, over all ranks.
    pub flushed: u64,
    /// Whether the round ceiling ended the solve.
    pub ceiling_reached: bool,
}

/// Settles whether a step every rank performed together succeeded
/// everywhere. Must be called by all ranks of `comm`; a rank whose own step
/// succeeded while another rank's failed stops with
/// [`CommunicationFailure::Aborted`], so no rank is left waiting on a peer
/// that gave up.
pub fn agree<T, C>(comm: &C, local: Result<T, RadiationError>) -> Result<T, RadiationError>
where
    C: Communicator + ?Sized,
{
    let everywhere = comm.all_reduce_and(local.is_ok());
    match local {
        Err(err) => {
            log::error!("Rank {} stops the solve: {}", comm.rank(), err);
            Err(err)
        },
        Ok(_) if !everywhere => Err(CommunicationFailure::Aborted { rank: comm.rank() }.into()),
        ok => ok,
    }
}

/// Drives the rounds of a solve on one rank.
pub struct Coordinator<'a, C: ?Sized> {
    comm: &'a C,
    view: &'a PartitionView,
    max_rounds: u32,
    parallel: bool,
    ledger: Option<&'a InFlightLedger>,
    state: RoundState,
}

impl<'a, C: Communicator + ?Sized> Coordinator<'a, C> {
    /// Creates a coordinator stopping after `max_rounds` rounds.
    pub fn new(comm: &'a C, view: &'a PartitionView, max_rounds: u32) -> Self {
        Self {
            comm,
            view,
            max_rounds,
            parallel: false,
            ledger: None,
            state: RoundState::Tracing,
        }
    }

    /// Traces the carriers of a round in parallel.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Records the carriers in flight after every exchange.
    pub fn with_ledger(mut self, ledger: Option<&'a InFlightLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Current phase.
    pub fn state(&self) -> RoundState { self.state }

    /// Runs rounds until no carrier is in flight on any rank or the round
    /// ceiling is reached.
    ///
    /// `finish` receives every carrier leaving the solve on this rank,
    /// together with its termination, or `None` if it was flushed by the
    /// round ceiling.
    pub fn run<O, F>(
        &mut self,
        tracer: &Tracer<'_, PartitionView, O>,
        mut in_flight: BTreeMap<CarrierId, Carrier>,
        mut finish: F,
    ) -> Result<ExchangeSummary, RadiationError>
    where
        O: OpticalProperties + ?Sized,
        F: FnMut(Carrier, Option<Termination>),
    {
        let rank = self.comm.rank();
        let mut summary = ExchangeSummary::default();
        let mut round = 0u32;
        loop {
            self.state = RoundState::Tracing;
            let carriers = std::mem::take(&mut in_flight).into_values().collect::<Vec<_>>();
            let traced = carriers.len();
            let mut outgoing = self
                .view
                .neighbor_ranks()
                .iter()
                .map(|&r| (r, Vec::new()))
                .collect::<BTreeMap<_, _>>();
            let mut local = self.trace_all(tracer, carriers).and_then(|results| {
                for (carrier, outcome) in results {
                    match outcome {
                        Outcome::Terminated(termination) => finish(carrier, Some(termination)),
                        Outcome::Handoff { rank: to } => match outgoing.get_mut(&to) {
                            Some(batch) => batch.push(carrier),
                            None => {
                                return Err(CommunicationFailure::NotNeighbour {
                                    carrier: carrier.id,
                                    from: rank,
                                    to,
                                }
                                .into())
                            },
                        },
                    }
                }
                Ok(())
            });
            if local.is_err() {
                // Neighbours still expect one batch this round.
                outgoing.values_mut().for_each(Vec::clear);
            }

            self.state = RoundState::Exchanging;
            let sent = outgoing.values().map(Vec::len).sum::<usize>() as u64;
            for (to, carriers) in outgoing {
                let batch = HandoffBatch {
                    round,
                    from: rank,
                    carriers,
                };
                let posted = encode(&batch).and_then(|bytes| self.comm.send(to, bytes));
                if let Err(err) = posted {
                    if local.is_ok() {
                        local = Err(err.into());
                    }
                }
            }
            let local = local.and_then(|()| self.receive(round, &mut in_flight));
            let received = agree(self.comm, local)?;
            if let Some(ledger) = self.ledger {
                ledger.record(round, rank, in_flight.keys().copied());
            }
            summary.sent += sent;
            summary.received += received;
            round += 1;
            log::debug!(
                "Rank {} round {}: traced {}, sent {}, received {}",
                rank,
                round,
                traced,
                sent,
                received
            );

            let quiet = in_flight.is_empty() && sent == 0 && received == 0;
            if self.comm.all_reduce_and(quiet) {
                self.state = RoundState::Done;
                break;
            }
            if round >= self.max_rounds {
                let flushed = in_flight.len() as u64;
                for carrier in std::mem::take(&mut in_flight).into_values() {
                    finish(carrier, None);
                }
                summary.flushed = self.comm.all_reduce_sum_u64(flushed);
                summary.ceiling_reached = true;
                self.state = RoundState::Done;
                break;
            }
        }
        summary.rounds = round;
        Ok(summary)
    }

    fn trace_all<O>(
        &self,
        tracer: &Tracer<'_, PartitionView, O>,
        carriers: Vec<Carrier>,
    ) -> Result<Vec<(Carrier, Outcome)>, RadiationError>
    where
        O: OpticalProperties + ?Sized,
    {
        let rank = self.view.rank();
        let advance = |mut carrier: Carrier| -> Result<(Carrier, Outcome), RadiationError> {
            let outcome = tracer.advance(&mut carrier)?;
            if !carrier.is_sane() {
                return Err(RadiationError::NonFiniteCarrier {
                    carrier: carrier.id,
                    cell: carrier.cell,
                    rank,
                });
            }
            Ok((carrier, outcome))
        };
        if self.parallel {
            carriers.into_par_iter().map(advance).collect()
        } else {
            carriers.into_iter().map(advance).collect()
        }
    }

    /// Receives one batch from every neighbour and moves its carriers into
    /// the in-flight set.
    fn receive(&self, round: u32, in_flight: &mut BTreeMap<CarrierId, Carrier>) -> Result<u64, RadiationError> {
        let rank = self.comm.rank();
        let mut received = 0;
        for &source in self.view.neighbor_ranks() {
            let batch: HandoffBatch = decode(&self.comm.recv(source)?)?;
            if batch.round != round || batch.from != source {
                return Err(CommunicationFailure::UnexpectedBatch {
                    rank,
                    expected_from: source,
                    expected_round: round,
                    from: batch.from,
                    round: batch.round,
                }
                .into());
            }
            for carrier in batch.carriers {
                if !self.view.owns(carrier.cell) {
                    return Err(CommunicationFailure::Misrouted {
                        carrier: carrier.id,
                        rank,
                        cell: carrier.cell,
                    }
                    .into());
                }
                if !carrier.is_sane() {
                    return Err(CommunicationFailure::CorruptedCarrier {
                        carrier: carrier.id,
                        rank,
                    }
                    .into());
                }
                if in_flight.contains_key(&carrier.id) {
                    return Err(CommunicationFailure::Duplicate {
                        carrier: carrier.id,
                        rank,
                    }
                    .into());
                }
                in_flight.insert(carrier.id, carrier);
                received += 1;
            }
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        optics::{CellOptics, OpticalSnapshot},
        traverse::Limits,
    };
    use ahash::AHashMap;
    use base::{
        math::{Axis, DVec3},
        ChannelComm,
    };
    use mesh::{CellId, FaceId, Mesh, MeshAdapter, Partition};
    use std::sync::Arc;

    fn views(n_cells: usize, n_ranks: usize) -> Vec<PartitionView> {
        let mesh = Arc::new(
            Mesh::structured_box([n_cells, 1, 1], DVec3::ZERO, DVec3::new(n_cells as f64, 1.0, 1.0))
                .unwrap(),
        );
        let partition = Arc::new(Partition::slabs(&mesh, n_ranks, Axis::X).unwrap());
        PartitionView::all(mesh, partition).unwrap()
    }

    const LIMITS: Limits = Limits {
        max_hops: 100,
        transmissivity_threshold: 0.0,
    };

    fn uniform(view: &PartitionView, absorption: f64, source: f64) -> OpticalSnapshot {
        let cells = view
            .owned_cells()
            .iter()
            .map(|&c| (c, CellOptics { absorption, source }))
            .collect::<AHashMap<_, _>>();
        OpticalSnapshot::from_cells(view.rank(), cells).with_ambient(1.0)
    }

    /// One carrier from the x- face of the rank's first cell towards +x.
    fn launch(view: &PartitionView) -> BTreeMap<CarrierId, Carrier> {
        let mut in_flight = BTreeMap::new();
        if let Some(&first) = view.owned_cells().first() {
            let face = view.faces_of(first).unwrap()[0];
            let carrier = Carrier::launch(
                CarrierId { face, ordinate: view.rank() as u32 },
                DVec3::X,
                view.face_geometry(face).unwrap().centroid,
                first,
            );
            in_flight.insert(carrier.id, carrier);
        }
        in_flight
    }

    /// Launches one carrier per rank from the x- face of the rank's first cell
    /// towards +x, and runs the rounds on every rank.
    fn run(n_cells: usize, n_ranks: usize, max_rounds: u32) -> (Vec<ExchangeSummary>, Vec<Vec<Carrier>>, Arc<InFlightLedger>) {
        let views = views(n_cells, n_ranks);
        let ledger = Arc::new(InFlightLedger::new());
        let results = std::thread::scope(|s| {
            let handles = ChannelComm::world(n_ranks)
                .into_iter()
                .zip(views.iter())
                .map(|(comm, view)| {
                    let ledger = ledger.clone();
                    s.spawn(move || {
                        let optics = uniform(view, 0.0, 0.0);
                        let tracer = Tracer::new(view, &optics, LIMITS);
                        let mut finished = Vec::new();
                        let mut coordinator = Coordinator::new(&comm, view, max_rounds)
                            .with_ledger(Some(ledger.as_ref()));
                        let summary = coordinator
                            .run(&tracer, launch(view), |c, _| finished.push(c))
                            .unwrap();
                        assert_eq!(coordinator.state(), RoundState::Done);
                        (summary, finished)
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        let (summaries, finished) = results.into_iter().unzip();
        (summaries, finished, ledger)
    }

    #[test]
    fn carriers_cross_every_rank_once() {
        let (summaries, finished, ledger) = run(8, 4, 100);
        // Carriers launched on ranks 0..3 all leave through x+ on rank 3.
        assert!(finished[..3].iter().all(Vec::is_empty));
        assert_eq!(finished[3].len(), 4);
        for carrier in &finished[3] {
            assert_eq!(carrier.intensity, 1.0);
        }
        assert!(ledger.violations().is_empty());
        let from_rank_0 = finished[3]
            .iter()
            .find(|c| c.id.ordinate == 0)
            .unwrap()
            .id;
        assert_eq!(ledger.holders_of(from_rank_0), vec![(0, 1), (1, 2), (2, 3)]);
        for summary in &summaries {
            assert_eq!(summary.rounds, 4);
            assert!(!summary.ceiling_reached);
        }
        let sent: u64 = summaries.iter().map(|s| s.sent).sum();
        let received: u64 = summaries.iter().map(|s| s.received).sum();
        assert_eq!(sent, 3 + 2 + 1);
        assert_eq!(sent, received);
    }

    #[test]
    fn round_ceiling_flushes_carriers_in_flight() {
        let (summaries, finished, _) = run(8, 4, 1);
        for summary in &summaries {
            assert!(summary.ceiling_reached);
            assert_eq!(summary.rounds, 1);
            assert_eq!(summary.flushed, 3);
        }
        // Each carrier was flushed on the rank it had just reached, except
        // the one launched on the last rank, which left the domain.
        assert_eq!(finished[0].len(), 0);
        assert_eq!(finished[1].len(), 1);
        assert_eq!(finished[2].len(), 1);
        assert_eq!(finished[3].len(), 2);
        assert!(finished.iter().flatten().all(|c| c.intensity.is_finite()));
    }

    #[test]
    fn single_rank_finishes_in_one_round() {
        let (summaries, finished, ledger) = run(5, 1, 10);
        assert_eq!(summaries[0].rounds, 1);
        assert_eq!(summaries[0].sent, 0);
        assert_eq!(finished[0].len(), 1);
        assert!(ledger.holders_of(finished[0][0].id).is_empty());
    }

    #[test]
    fn a_failing_rank_stops_every_rank() {
        let views = views(8, 4);
        let results = std::thread::scope(|s| {
            let handles = ChannelComm::world(4)
                .into_iter()
                .zip(views.iter())
                .map(|(comm, view)| {
                    s.spawn(move || {
                        // The cells of rank 0 emit NaN.
                        let source = if view.rank() == 0 { f64::NAN } else { 1.0 };
                        let optics = uniform(view, 0.5, source);
                        let tracer = Tracer::new(view, &optics, LIMITS);
                        let mut coordinator = Coordinator::new(&comm, view, 100);
                        coordinator.run(&tracer, launch(view), |_, _| {})
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        assert!(matches!(
            results[0],
            Err(RadiationError::NonFiniteCarrier { rank: 0, .. })
        ));
        for (rank, result) in results.iter().enumerate().skip(1) {
            assert!(
                matches!(
                    result,
                    Err(RadiationError::Communication(CommunicationFailure::Aborted { rank: r })) if *r == rank
                ),
                "rank {} returned {:?}",
                rank,
                result
            );
        }
    }

    #[test]
    fn non_finite_carriers_are_not_finished() {
        let views = views(3, 1);
        let view = &views[0];
        let comm = ChannelComm::world(1).remove(0);
        let optics = uniform(view, 0.5, f64::NAN);
        let tracer = Tracer::new(view, &optics, LIMITS);
        let mut finished = Vec::new();
        let result = Coordinator::new(&comm, view, 10).run(&tracer, launch(view), |c, _| finished.push(c));
        assert!(matches!(
            result,
            Err(RadiationError::NonFiniteCarrier { rank: 0, cell: CellId(2), .. })
        ));
        assert!(finished.is_empty());
    }

    #[test]
    fn ledger_reports_double_ownership() {
        let ledger = InFlightLedger::new();
        let id = CarrierId { face: FaceId(0), ordinate: 1 };
        ledger.record(0, 0, [id]);
        ledger.record(0, 1, [id]);
        ledger.record(1, 1, [id]);
        assert_eq!(
            ledger.violations(),
            vec![LedgerViolation {
                round: 0,
                carrier: id,
                ranks: (0, 1)
            }]
        );
    }

    #[test]
    fn malformed_batches_are_communication_failures() {
        let views = views(4, 2);
        let comms = ChannelComm::world(2);
        let forged = HandoffBatch {
            round: 7,
            from: 0,
            carriers: Vec::new(),
        };
        comms[0].send(1, encode(&forged).unwrap()).unwrap();
        let coordinator = Coordinator::new(&comms[1], &views[1], 10);
        let mut in_flight = BTreeMap::new();
        assert!(matches!(
            coordinator.receive(0, &mut in_flight),
            Err(RadiationError::Communication(CommunicationFailure::UnexpectedBatch { .. }))
        ));

        // A carrier delivered to a rank that does not own its cell.
        let stray = Carrier::launch(
            CarrierId { face: FaceId(0), ordinate: 0 },
            DVec3::X,
            DVec3::ZERO,
            CellId(0),
        );
        let misrouted = HandoffBatch {
            round: 0,
            from: 0,
            carriers: vec![stray],
        };
        comms[0].send(1, encode(&misrouted).unwrap()).unwrap();
        assert!(matches!(
            coordinator.receive(0, &mut in_flight),
            Err(RadiationError::Communication(CommunicationFailure::Misrouted { .. }))
        ));

        comms[0].send(1, vec![0xff]).unwrap();
        assert!(matches!(
            coordinator.receive(0, &mut in_flight),
            Err(RadiationError::Communication(CommunicationFailure::Transport(_)))
        ));
    }
}
