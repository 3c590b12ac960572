//! # rayflux-flow
//! Flow-solver surface of rayflux.
//!
//! Holds the conserved Euler state of the cells owned by a rank and the
//! hooks a time-stepping flow solver calls around every step: processes
//! prepare themselves before the step and contribute per-cell sources,
//! monitors observe the result afterwards. Radiative heat transfer and
//! buoyancy are provided as processes.
#![warn(missing_docs)]

mod buoyancy;
mod field;
mod hooks;
mod monitor;
mod radiation;

pub use buoyancy::*;
pub use field::*;
pub use hooks::*;
pub use monitor::*;
pub use radiation::*;

use mesh::{CellId, MeshError};
use rad::RadiationError;

/// Errors raised while stepping the flow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// A radiation solve failed.
    #[error("Radiation solve failed: {0}")]
    Radiation(#[from] RadiationError),

    /// A mesh lookup failed.
    #[error(transparent)]
    MeshLookup(#[from] MeshError),

    /// The conserved state of a cell has no physical meaning.
    #[error("Invalid flow state in cell {cell}: {reason}")]
    InvalidState {
        /// Offending cell.
        cell: CellId,
        /// What is wrong with it.
        reason: String,
    },

    /// A process or monitor was set up inconsistently.
    #[error("Invalid setup: {0}")]
    InvalidSetup(String),
}
