use crate::carrier::CarrierId;
use base::CommError;
use mesh::{CellId, FaceId, MeshError};
use serde::{Deserialize, Serialize};

/// Fatal errors aborting a radiation solve.
#[derive(Debug, thiserror::Error)]
pub enum RadiationError {
    /// An id outside the rank's owned and halo range was looked up; the mesh
    /// or partition is corrupted.
    #[error("Mesh lookup failed: {0}")]
    MeshLookup(#[from] MeshError),

    /// Ranks can no longer agree on the set of carriers in flight.
    #[error("Communication failure: {0}")]
    Communication(#[from] CommunicationFailure),

    /// A carrier's intensity or transmissivity became non-finite while
    /// crossing the rank's cells; the optical properties are unusable.
    #[error("Carrier {carrier} reached a non-finite state in cell {cell} on rank {rank}")]
    NonFiniteCarrier {
        /// Carrier concerned.
        carrier: CarrierId,
        /// Cell the carrier stopped in.
        cell: CellId,
        /// Rank tracing it.
        rank: usize,
    },

    /// The configuration cannot be used for a solve.
    #[error("Invalid radiation configuration: {0}")]
    InvalidConfig(String),
}

impl From<CommError> for RadiationError {
    fn from(err: CommError) -> Self { RadiationError::Communication(CommunicationFailure::Transport(err)) }
}

/// Causes of a failed cross-rank exchange.
#[derive(Debug, thiserror::Error)]
pub enum CommunicationFailure {
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(CommError),

    /// A batch was tagged with another round or another sender.
    #[error(
        "Rank {rank} expected a batch from rank {expected_from} for round {expected_round}, got \
         one from rank {from} for round {round}"
    )]
    UnexpectedBatch {
        /// Receiving rank.
        rank: usize,
        /// Rank the batch was received from.
        expected_from: usize,
        /// Round being exchanged.
        expected_round: u32,
        /// Sender written in the batch.
        from: usize,
        /// Round written in the batch.
        round: u32,
    },

    /// A carrier was handed to a rank that does not own its next cell.
    #[error("Carrier {carrier} was handed to rank {rank}, which does not own cell {cell}")]
    Misrouted {
        /// Carrier concerned.
        carrier: CarrierId,
        /// Receiving rank.
        rank: usize,
        /// Cell the carrier is about to enter.
        cell: CellId,
    },

    /// A carrier must be handed to a rank that is not a neighbour.
    #[error("Carrier {carrier} must cross from rank {from} to non-neighbouring rank {to}")]
    NotNeighbour {
        /// Carrier concerned.
        carrier: CarrierId,
        /// Sending rank.
        from: usize,
        /// Destination rank.
        to: usize,
    },

    /// The same carrier is held twice by a rank.
    #[error("Carrier {carrier} is already in flight on rank {rank}")]
    Duplicate {
        /// Carrier concerned.
        carrier: CarrierId,
        /// Rank holding it.
        rank: usize,
    },

    /// A carrier arrived with a non-finite intensity or transmissivity.
    #[error("Carrier {carrier} arrived on rank {rank} with corrupted state")]
    CorruptedCarrier {
        /// Carrier concerned.
        carrier: CarrierId,
        /// Receiving rank.
        rank: usize,
    },

    /// Another rank failed during the same step and this rank stopped with it.
    #[error("Rank {rank} stopped because another rank failed")]
    Aborted {
        /// Stopping rank.
        rank: usize,
    },

    /// A flux deposit was routed to a rank not owning its face.
    #[error("Deposit for face {face} was routed to rank {rank}, which does not own it")]
    MisroutedDeposit {
        /// Face concerned.
        face: FaceId,
        /// Receiving rank.
        rank: usize,
    },
}

/// Reasons a solve finished with a result that is usable but approximate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ConvergenceExceeded {
    /// A carrier exhausted its hop budget before leaving the domain.
    #[error("Carrier {carrier} exhausted its budget of {hops} hops")]
    HopBudget {
        /// Carrier concerned.
        carrier: CarrierId,
        /// Hops performed.
        hops: u32,
    },

    /// The round ceiling was reached and the carriers still in flight were
    /// flushed with their partial intensity.
    #[error("Round ceiling of {rounds} rounds reached, {flushed} carriers flushed")]
    RoundCeiling {
        /// Rounds performed.
        rounds: u32,
        /// Carriers flushed over all ranks.
        flushed: u64,
    },
}

/// Non-fatal events of a radiation solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SolveWarning {
    /// A cell has no exit face for the carrier direction; the carrier was
    /// terminated where it stood.
    #[error("Carrier {carrier} found no exit face in cell {cell}")]
    GeometryDegenerate {
        /// Carrier concerned.
        carrier: CarrierId,
        /// Cell without exit.
        cell: CellId,
    },

    /// A work ceiling was reached.
    #[error(transparent)]
    ConvergenceExceeded(#[from] ConvergenceExceeded),
}
