//! Optical properties of the participating medium.
//!
//! Properties are evaluated once per solve from the flow state into an
//! [`OpticalSnapshot`], so they never change while carriers are in flight.

use ahash::AHashMap;
use mesh::{CellId, FaceId, MeshError};
use serde::{Deserialize, Serialize};
use std::{
    f64::consts::PI,
    sync::atomic::{AtomicU64, Ordering},
};

/// Stefan-Boltzmann constant in W/(m²·K⁴).
pub const STEFAN_BOLTZMANN: f64 = 5.670374419e-8;

/// Second radiation constant in m·K.
const C2: f64 = 1.4388e-2;

/// Soot refractive index constant of the mean absorption model.
const C0: f64 = 7.0;

/// Black-body radiative intensity at the given temperature, σT⁴/π.
pub fn blackbody_intensity(temperature: f64) -> f64 { STEFAN_BOLTZMANN * temperature.powi(4) / PI }

/// Local thermodynamic state of a cell.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThermoState {
    /// Temperature in K.
    pub temperature: f64,
    /// Pressure in Pa.
    pub pressure: f64,
    /// Density in kg/m³.
    pub density: f64,
    /// Soot volume fraction.
    #[serde(default)]
    pub soot_volume_fraction: f64,
}

/// Absorption model of the participating medium.
pub trait RadiationModel: Send + Sync {
    /// Absorption coefficient (1/m) of a medium in the given state.
    fn absorption_coefficient(&self, state: &ThermoState) -> f64;
}

/// Non-participating medium.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Transparent;

impl RadiationModel for Transparent {
    fn absorption_coefficient(&self, _state: &ThermoState) -> f64 { 0.0 }
}

/// Gray medium with a constant absorption coefficient.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GrayConstant {
    /// Absorption coefficient in 1/m.
    pub absorptivity: f64,
}

impl RadiationModel for GrayConstant {
    fn absorption_coefficient(&self, _state: &ThermoState) -> f64 { self.absorptivity }
}

/// Planck-mean absorption of soot, κ = 3.72·f_v·C₀·T / C₂.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct SootMeanAbsorption;

impl RadiationModel for SootMeanAbsorption {
    fn absorption_coefficient(&self, state: &ThermoState) -> f64 {
        3.72 * state.soot_volume_fraction * C0 * state.temperature / C2
    }
}

/// Serialisable choice of [`RadiationModel`].
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ModelKind {
    /// See [`Transparent`].
    #[default]
    Transparent,
    /// See [`GrayConstant`].
    Gray {
        /// Absorption coefficient in 1/m.
        absorptivity: f64,
    },
    /// See [`SootMeanAbsorption`].
    Soot,
}

impl ModelKind {
    /// Instantiates the model.
    pub fn model(self) -> Box<dyn RadiationModel> {
        match self {
            ModelKind::Transparent => Box::new(Transparent),
            ModelKind::Gray { absorptivity } => Box::new(GrayConstant { absorptivity }),
            ModelKind::Soot => Box::new(SootMeanAbsorption),
        }
    }
}

/// Optical properties queried by the traversal engine.
pub trait OpticalProperties: Sync {
    /// Absorption coefficient of the cell, never negative.
    fn absorption_coefficient(&self, cell: CellId) -> Result<f64, MeshError>;

    /// Emitted intensity of the cell.
    fn emission_source(&self, cell: CellId) -> Result<f64, MeshError>;

    /// Intensity leaving a domain boundary face into the domain.
    fn boundary_intensity(&self, face: FaceId) -> f64;

    /// Identifies the state the properties were evaluated from; two
    /// snapshots never share an epoch.
    fn epoch(&self) -> u64;
}

/// Optical properties of one cell.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CellOptics {
    /// Absorption coefficient in 1/m.
    pub absorption: f64,
    /// Emitted intensity in W/(m²·sr).
    pub source: f64,
}

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Optical properties of the cells owned by one rank, frozen for a solve.
#[derive(Debug, Clone)]
pub struct OpticalSnapshot {
    rank: usize,
    cells: AHashMap<CellId, CellOptics>,
    walls: AHashMap<FaceId, f64>,
    ambient: f64,
    epoch: u64,
}

impl OpticalSnapshot {
    /// Evaluates the model on the given cell states. Emission follows the
    /// black-body intensity of the cell temperature.
    pub fn evaluate<'a, I>(rank: usize, model: &dyn RadiationModel, states: I) -> Self
    where
        I: IntoIterator<Item = (CellId, &'a ThermoState)>,
    {
        let cells = states
            .into_iter()
            .map(|(cell, state)| {
                let optics = CellOptics {
                    absorption: model.absorption_coefficient(state).max(0.0),
                    source: blackbody_intensity(state.temperature),
                };
                (cell, optics)
            })
            .collect::<AHashMap<_, _>>();
        Self::from_cells(rank, cells)
    }

    /// Creates a snapshot from precomputed cell properties.
    pub fn from_cells(rank: usize, cells: AHashMap<CellId, CellOptics>) -> Self {
        let epoch = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "Optical snapshot {} on rank {} covers {} cells",
            epoch,
            rank,
            cells.len()
        );
        Self {
            rank,
            cells,
            walls: AHashMap::new(),
            ambient: 0.0,
            epoch,
        }
    }

    /// Sets the intensity entering the domain through faces without an
    /// explicit wall intensity.
    pub fn with_ambient(mut self, intensity: f64) -> Self {
        self.ambient = intensity;
        self
    }

    /// Sets the intensity emitted by a boundary face.
    pub fn set_wall(&mut self, face: FaceId, intensity: f64) { self.walls.insert(face, intensity); }

    /// Sets the intensity of a boundary face from its temperature.
    pub fn set_wall_temperature(&mut self, face: FaceId, temperature: f64) {
        self.set_wall(face, blackbody_intensity(temperature));
    }

    fn lookup(&self, cell: CellId) -> Result<&CellOptics, MeshError> {
        self.cells.get(&cell).ok_or(MeshError::CellNotFound {
            cell,
            rank: self.rank,
        })
    }
}

impl OpticalProperties for OpticalSnapshot {
    fn absorption_coefficient(&self, cell: CellId) -> Result<f64, MeshError> {
        self.lookup(cell).map(|o| o.absorption)
    }

    fn emission_source(&self, cell: CellId) -> Result<f64, MeshError> { self.lookup(cell).map(|o| o.source) }

    fn boundary_intensity(&self, face: FaceId) -> f64 { self.walls.get(&face).copied().unwrap_or(self.ambient) }

    fn epoch(&self) -> u64 { self.epoch }
}
