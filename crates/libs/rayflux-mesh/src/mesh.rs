use crate::{CellGeometry, FaceGeometry, MeshError};
use base::math::{is_unit, Aabb, DVec3};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    sync::atomic::{AtomicU64, Ordering},
};

/// Identifier of a mesh cell (control volume).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub u32);

/// Identifier of a mesh face.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FaceId(pub u32);

impl CellId {
    /// Index of the cell in the global cell array.
    #[inline]
    pub fn index(&self) -> usize { self.0 as usize }
}

impl FaceId {
    /// Index of the face in the global face array.
    #[inline]
    pub fn index(&self) -> usize { self.0 as usize }
}

impl Display for CellId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "c{}", self.0) }
}

impl Display for FaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "f{}", self.0) }
}

/// Mesh control volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Identifier, equal to the position in [`Mesh::cells`].
    pub id: CellId,
    /// Centroid of the cell.
    pub centroid: DVec3,
    /// Volume of the cell.
    pub volume: f64,
    /// Faces bounding the cell.
    pub faces: Vec<FaceId>,
}

/// Boundary between two cells, or between a cell and the outside of the
/// domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    /// Identifier, equal to the position in [`Mesh::faces`].
    pub id: FaceId,
    /// Centroid of the face.
    pub centroid: DVec3,
    /// Area of the face.
    pub area: f64,
    /// Unit normal pointing out of `cells.0`.
    pub normal: DVec3,
    /// Owner cell and, for interior faces, the neighbour cell.
    pub cells: (CellId, Option<CellId>),
    /// Region label of domain boundary faces.
    pub label: Option<String>,
}

impl Face {
    /// Whether the face lies on the domain boundary.
    pub fn is_boundary(&self) -> bool { self.cells.1.is_none() }
}

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

/// Global unstructured mesh. Immutable once constructed.
#[derive(Debug)]
pub struct Mesh {
    cells: Vec<Cell>,
    faces: Vec<Face>,
    bounds: Aabb,
    revision: u64,
}

impl Mesh {
    /// Creates a mesh from its cells and faces after checking that the
    /// topology and geometry are consistent.
    pub fn new(cells: Vec<Cell>, faces: Vec<Face>) -> Result<Self, MeshError> {
        for (i, cell) in cells.iter().enumerate() {
            if cell.id.index() != i {
                return Err(MeshError::InvalidMesh(format!(
                    "cell at position {} has id {}",
                    i, cell.id
                )));
            }
            if cell.volume.partial_cmp(&0.0) != Some(std::cmp::Ordering::Greater) {
                return Err(MeshError::InvalidMesh(format!(
                    "cell {} has non-positive volume {}",
                    cell.id, cell.volume
                )));
            }
            for face in &cell.faces {
                let adjacent = faces
                    .get(face.index())
                    .map(|f| f.cells.0 == cell.id || f.cells.1 == Some(cell.id))
                    .unwrap_or(false);
                if !adjacent {
                    return Err(MeshError::InvalidMesh(format!(
                        "cell {} lists face {} which does not border it",
                        cell.id, face
                    )));
                }
            }
        }
        for (i, face) in faces.iter().enumerate() {
            if face.id.index() != i {
                return Err(MeshError::InvalidMesh(format!(
                    "face at position {} has id {}",
                    i, face.id
                )));
            }
            if !is_unit(&face.normal) || face.area.partial_cmp(&0.0) != Some(std::cmp::Ordering::Greater) {
                return Err(MeshError::InvalidMesh(format!(
                    "face {} has invalid normal {} or area {}",
                    face.id, face.normal, face.area
                )));
            }
            let listed_by = |cell: CellId| {
                cells
                    .get(cell.index())
                    .map(|c| c.faces.contains(&face.id))
                    .unwrap_or(false)
            };
            if !listed_by(face.cells.0) || face.cells.1.map_or(false, |c| !listed_by(c)) {
                return Err(MeshError::InvalidMesh(format!(
                    "face {} is not listed by its adjacent cells",
                    face.id
                )));
            }
        }
        let bounds = Aabb::from_points(faces.iter().map(|f| f.centroid));
        let revision = NEXT_REVISION.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Created mesh revision {} with {} cells, {} faces, bounds {}",
            revision,
            cells.len(),
            faces.len(),
            bounds
        );
        Ok(Self {
            cells,
            faces,
            bounds,
            revision,
        })
    }

    /// All cells, indexed by [`CellId::index`].
    pub fn cells(&self) -> &[Cell] { &self.cells }

    /// All faces, indexed by [`FaceId::index`].
    pub fn faces(&self) -> &[Face] { &self.faces }

    /// Returns the cell with the given id.
    pub fn cell(&self, id: CellId) -> Option<&Cell> { self.cells.get(id.index()) }

    /// Returns the face with the given id.
    pub fn face(&self, id: FaceId) -> Option<&Face> { self.faces.get(id.index()) }

    /// Number of cells.
    pub fn num_cells(&self) -> usize { self.cells.len() }

    /// Number of faces.
    pub fn num_faces(&self) -> usize { self.faces.len() }

    /// Bounding box of the mesh.
    pub fn bounds(&self) -> Aabb { self.bounds }

    /// Unique revision number of the mesh. Two meshes never share a revision,
    /// so cached geometry can be tied to it.
    pub fn revision(&self) -> u64 { self.revision }

    /// Iterates over the domain boundary faces.
    pub fn boundary_faces(&self) -> impl Iterator<Item = &Face> + '_ {
        self.faces.iter().filter(|f| f.is_boundary())
    }

    /// Iterates over the domain boundary faces carrying the given label.
    pub fn boundary_faces_labelled<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Face> + 'a {
        self.boundary_faces()
            .filter(move |f| f.label.as_deref() == Some(label))
    }

    /// Geometry of the given cell.
    pub fn cell_geometry(&self, id: CellId) -> Option<CellGeometry> {
        self.cell(id).map(|c| CellGeometry {
            centroid: c.centroid,
            volume: c.volume,
        })
    }

    /// Geometry of the given face.
    pub fn face_geometry(&self, id: FaceId) -> Option<FaceGeometry> {
        self.face(id).map(|f| FaceGeometry {
            centroid: f.centroid,
            area: f.area,
            normal: f.normal,
        })
    }

    /// Estimated diameter of the mesh measured in cells: the bounding box
    /// diagonal divided by the edge length of the smallest cell.
    pub fn diameter_in_cells(&self) -> u32 {
        let min_volume = self
            .cells
            .iter()
            .map(|c| c.volume)
            .fold(f64::INFINITY, f64::min);
        if !min_volume.is_finite() || !self.bounds.is_valid() {
            return 1;
        }
        let diameter = self.bounds.diagonal() / min_volume.cbrt();
        (diameter.ceil() as u32).max(1)
    }
}
