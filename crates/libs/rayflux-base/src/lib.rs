//! # rayflux-base
//! Base library for rayflux.
//! Contains the basic types and functions shared by the mesh, radiation and
//! flow crates: math helpers, ordinate quadrature, rank communication,
//! configuration loading and logging.
#![warn(missing_docs)]

pub mod comm;
pub mod config;
pub mod error;
pub mod math;
pub mod quadrature;

#[cfg(feature = "cli")]
pub mod cli;

pub use comm::{ChannelComm, CommError, Communicator};
pub use error::RayfluxError;
