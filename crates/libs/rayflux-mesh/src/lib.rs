//! # rayflux-mesh
//! Read-only unstructured volumetric meshes and their partitioning across
//! ranks.
//!
//! A [`Mesh`] holds the global cell/face topology and geometry. A
//! [`Partition`] assigns every cell to a rank, and a [`PartitionView`] is
//! what one rank sees of the mesh: its owned cells plus one layer of halo
//! cells. Solvers query the mesh exclusively through the [`MeshAdapter`]
//! trait.
#![warn(missing_docs)]

mod builder;
mod mesh;
mod partition;
mod view;

pub use mesh::*;
pub use partition::*;
pub use view::*;

use base::math::DVec3;

/// Errors raised by mesh construction and lookups.
///
/// Lookup errors indicate a corrupted mesh or partition and are never
/// retried by callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MeshError {
    /// The cell is neither owned by nor in the halo of the rank.
    #[error("Cell {cell} is not visible on rank {rank}")]
    CellNotFound {
        /// Requested cell.
        cell: CellId,
        /// Rank performing the lookup.
        rank: usize,
    },

    /// The face does not border any cell visible on the rank.
    #[error("Face {face} is not visible on rank {rank}")]
    FaceNotFound {
        /// Requested face.
        face: FaceId,
        /// Rank performing the lookup.
        rank: usize,
    },

    /// The cell does not border the face.
    #[error("Cell {cell} does not border face {face}")]
    NotAdjacent {
        /// Face queried.
        face: FaceId,
        /// Cell that was expected to border it.
        cell: CellId,
    },

    /// The mesh topology or geometry is inconsistent.
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    /// The partition does not match the mesh.
    #[error("Invalid partition: {0}")]
    InvalidPartition(String),
}

/// Selects one of the (at most two) cells adjacent to a face.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Side {
    /// The cell the face normal points out of. Always present.
    Owner,
    /// The cell on the other side; absent for domain boundary faces.
    Neighbour,
}

/// Geometry of a cell.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CellGeometry {
    /// Centroid of the cell.
    pub centroid: DVec3,
    /// Volume of the cell.
    pub volume: f64,
}

/// Geometry of a face.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FaceGeometry {
    /// Centroid of the face.
    pub centroid: DVec3,
    /// Area of the face.
    pub area: f64,
    /// Unit normal pointing out of the owner cell.
    pub normal: DVec3,
}

/// Read-only view of an unstructured mesh as seen by one rank.
///
/// Every lookup of an id outside the rank's owned and halo range fails with
/// a [`MeshError`].
pub trait MeshAdapter: Sync {
    /// Rank the view belongs to.
    fn rank(&self) -> usize;

    /// Returns the cell on the given side of the face.
    fn cell_of(&self, face: FaceId, side: Side) -> Result<Option<CellId>, MeshError>;

    /// Returns the faces bounding the cell.
    fn faces_of(&self, cell: CellId) -> Result<&[FaceId], MeshError>;

    /// Returns the geometry of the cell.
    fn cell_geometry(&self, cell: CellId) -> Result<CellGeometry, MeshError>;

    /// Returns the geometry of the face.
    fn face_geometry(&self, face: FaceId) -> Result<FaceGeometry, MeshError>;

    /// Returns the rank owning the cell.
    fn owner_rank(&self, cell: CellId) -> Result<usize, MeshError>;

    /// Whether the face separates cells owned by different ranks.
    fn is_ghost_face(&self, face: FaceId) -> Result<bool, MeshError>;

    /// Returns the cell across `face` as seen from `cell`, `None` if the face
    /// lies on the domain boundary.
    fn across(&self, face: FaceId, cell: CellId) -> Result<Option<CellId>, MeshError> {
        let owner = self.cell_of(face, Side::Owner)?;
        let neighbour = self.cell_of(face, Side::Neighbour)?;
        if owner == Some(cell) {
            Ok(neighbour)
        } else if neighbour == Some(cell) {
            Ok(owner)
        } else {
            Err(MeshError::NotAdjacent { face, cell })
        }
    }

    /// Returns the unit normal of `face` pointing out of `cell`.
    fn outward_normal(&self, face: FaceId, cell: CellId) -> Result<DVec3, MeshError> {
        let normal = self.face_geometry(face)?.normal;
        if self.cell_of(face, Side::Owner)? == Some(cell) {
            Ok(normal)
        } else if self.cell_of(face, Side::Neighbour)? == Some(cell) {
            Ok(-normal)
        } else {
            Err(MeshError::NotAdjacent { face, cell })
        }
    }
}
