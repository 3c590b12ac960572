//! Case files of the `rayflux` driver.

use base::{math::Axis, math::DVec3, RayfluxError};
use flow::{IdealGas, WallCondition};
use mesh::{FaceId, Mesh};
use rad::{optics::ModelKind, RadiationConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structured box mesh of a case, split into slabs across ranks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MeshConfig {
    /// Number of cells along each axis.
    pub divisions: [usize; 3],
    /// Lower corner of the box.
    #[serde(default)]
    pub min: [f64; 3],
    /// Upper corner of the box.
    pub max: [f64; 3],
    /// Axis the slabs are stacked along.
    #[serde(default = "default_partition_axis")]
    pub partition_axis: Axis,
}

fn default_partition_axis() -> Axis { Axis::X }

impl MeshConfig {
    /// Builds the mesh.
    pub fn build(&self) -> Result<Mesh, RayfluxError> {
        Mesh::structured_box(self.divisions, DVec3::from(self.min), DVec3::from(self.max))
            .map_err(|err| RayfluxError::with_context(err, "Failed to build the case mesh"))
    }
}

/// Uniform initial state of the gas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InitialState {
    /// Density in kg/m³.
    pub density: f64,
    /// Temperature in K.
    pub temperature: f64,
    /// Soot volume fraction.
    #[serde(default)]
    pub soot_volume_fraction: f64,
}

/// A complete case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CaseConfig {
    /// Number of outer steps.
    pub steps: u64,
    /// Time step size in s.
    pub dt: f64,
    /// Number of ranks.
    #[serde(default = "default_ranks")]
    pub ranks: usize,
    /// CSV file receiving the boundary fluxes, relative to the case file.
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Mesh.
    pub mesh: MeshConfig,
    /// Gas closure.
    #[serde(default)]
    pub gas: IdealGas,
    /// Initial state.
    pub initial: InitialState,
    /// Radiation solver parameters.
    #[serde(default)]
    pub radiation: RadiationConfig,
    /// Absorption model of the gas.
    #[serde(default)]
    pub model: ModelKind,
    /// Boundary labels whose flux is computed; every boundary face when
    /// empty.
    #[serde(default)]
    pub emitting: Vec<String>,
    /// Walls with a fixed temperature.
    #[serde(default)]
    pub walls: Vec<WallCondition>,
    /// Temperature of the other walls in K.
    #[serde(default)]
    pub ambient_temperature: f64,
    /// Gravitational acceleration; buoyancy is off when absent.
    #[serde(default)]
    pub gravity: Option<[f64; 3]>,
}

fn default_ranks() -> usize { 1 }

impl CaseConfig {
    /// Checks the parameters, returning them unchanged when usable.
    pub fn validate(self) -> Result<Self, RayfluxError> {
        if self.ranks == 0 {
            return Err(RayfluxError::new("A case needs at least one rank", None));
        }
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(RayfluxError::new(format!("Invalid time step {}", self.dt), None));
        }
        if !(self.initial.density > 0.0 && self.initial.temperature > 0.0) {
            return Err(RayfluxError::new(
                "The initial density and temperature must be positive",
                None,
            ));
        }
        let radiation = self
            .radiation
            .validate()
            .map_err(|err| RayfluxError::with_context(err, "Invalid radiation parameters"))?;
        Ok(Self { radiation, ..self })
    }

    /// Boundary faces whose flux is computed.
    pub fn emitting_faces(&self, mesh: &Mesh) -> Result<Vec<FaceId>, RayfluxError> {
        if self.emitting.is_empty() {
            return Ok(mesh.boundary_faces().map(|f| f.id).collect());
        }
        let mut faces = Vec::new();
        for label in &self.emitting {
            let before = faces.len();
            faces.extend(mesh.boundary_faces_labelled(label).map(|f| f.id));
            if faces.len() == before {
                return Err(RayfluxError::new(
                    format!("No boundary face is labelled {:?}", label),
                    None,
                ));
            }
        }
        faces.sort_unstable();
        faces.dedup();
        Ok(faces)
    }
}
