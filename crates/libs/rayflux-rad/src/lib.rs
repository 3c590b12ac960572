//! # rayflux-rad
//! Radiative heat transfer to the domain walls by discrete-ordinate ray
//! tracing over a partitioned finite-volume mesh.
//!
//! Every emitting boundary face launches one [`Carrier`] per ordinate. A
//! carrier marches away from its face cell by cell, gathering the intensity
//! that reaches the face from the opposite direction, and is handed to the
//! neighbouring rank whenever it reaches a cell that rank owns. Rounds of
//! tracing and exchange repeat until no carrier is left in flight on any
//! rank; the gathered intensities are then integrated into the net
//! radiative flux of every face.
//!
//! The [`TracingMethod::RaySharing`] method additionally caches the cell
//! sequences derived by carriers, so that later carriers entering a face
//! along the same direction replay them instead of searching exit faces.
#![warn(missing_docs)]

pub mod accum;
pub mod cache;
pub mod carrier;
mod config;
mod error;
pub mod exchange;
pub mod optics;
mod solver;
pub mod traverse;

pub use carrier::{Carrier, CarrierId};
pub use config::*;
pub use error::*;
pub use optics::{OpticalProperties, OpticalSnapshot, RadiationModel, ThermoState};
pub use solver::*;
