use crate::{
    CellGeometry, CellId, FaceGeometry, FaceId, Mesh, MeshAdapter, MeshError, Partition, Side,
};
use std::{collections::BTreeSet, sync::Arc};

/// What one rank sees of a partitioned mesh: the cells it owns plus one layer
/// of halo cells owned by neighbouring ranks.
#[derive(Debug, Clone)]
pub struct PartitionView {
    mesh: Arc<Mesh>,
    partition: Arc<Partition>,
    rank: usize,
    owned: Vec<CellId>,
    visible_cells: Vec<bool>,
    visible_faces: Vec<bool>,
    neighbor_ranks: Vec<usize>,
}

impl PartitionView {
    /// Builds the view of `rank`.
    pub fn new(mesh: Arc<Mesh>, partition: Arc<Partition>, rank: usize) -> Result<Self, MeshError> {
        if rank >= partition.n_ranks() {
            return Err(MeshError::InvalidPartition(format!(
                "rank {} out of {} ranks",
                rank,
                partition.n_ranks()
            )));
        }
        let owner_of = |cell: CellId| {
            partition.owner_of(cell).ok_or_else(|| {
                MeshError::InvalidPartition(format!("cell {} has no owner", cell))
            })
        };

        let mut owned = Vec::new();
        let mut visible_cells = vec![false; mesh.num_cells()];
        let mut neighbor_ranks = BTreeSet::new();
        for cell in mesh.cells() {
            if owner_of(cell.id)? != rank {
                continue;
            }
            owned.push(cell.id);
            visible_cells[cell.id.index()] = true;
            for face in &cell.faces {
                let (a, b) = mesh.faces()[face.index()].cells;
                for other in std::iter::once(a).chain(b) {
                    visible_cells[other.index()] = true;
                    let other_rank = owner_of(other)?;
                    if other_rank != rank {
                        neighbor_ranks.insert(other_rank);
                    }
                }
            }
        }

        let visible_faces = mesh
            .faces()
            .iter()
            .map(|f| {
                visible_cells[f.cells.0.index()]
                    || f.cells.1.map_or(false, |c| visible_cells[c.index()])
            })
            .collect::<Vec<_>>();

        log::debug!(
            "Rank {} owns {} cells, sees {} cells, neighbours {:?}",
            rank,
            owned.len(),
            visible_cells.iter().filter(|v| **v).count(),
            neighbor_ranks
        );

        Ok(Self {
            mesh,
            partition,
            rank,
            owned,
            visible_cells,
            visible_faces,
            neighbor_ranks: neighbor_ranks.into_iter().collect(),
        })
    }

    /// Builds the views of every rank of the partition.
    pub fn all(mesh: Arc<Mesh>, partition: Arc<Partition>) -> Result<Vec<Self>, MeshError> {
        (0..partition.n_ranks())
            .map(|rank| Self::new(mesh.clone(), partition.clone(), rank))
            .collect()
    }

    /// The underlying global mesh.
    pub fn mesh(&self) -> &Mesh { &self.mesh }

    /// The partition the view was built from.
    pub fn partition(&self) -> &Partition { &self.partition }

    /// Cells owned by this rank, in ascending id order.
    pub fn owned_cells(&self) -> &[CellId] { &self.owned }

    /// Whether the cell is owned by this rank.
    pub fn owns(&self, cell: CellId) -> bool { self.partition.owner_of(cell) == Some(self.rank) }

    /// Ranks owning at least one halo cell of this rank, ascending.
    pub fn neighbor_ranks(&self) -> &[usize] { &self.neighbor_ranks }

    /// Whether the face is a domain boundary face whose owner cell belongs to
    /// this rank.
    pub fn owns_boundary_face(&self, face: FaceId) -> bool {
        self.mesh
            .face(face)
            .map_or(false, |f| f.is_boundary() && self.owns(f.cells.0))
    }

    fn check_cell(&self, cell: CellId) -> Result<&crate::Cell, MeshError> {
        match self.visible_cells.get(cell.index()) {
            Some(true) => self
                .mesh
                .cell(cell)
                .ok_or(MeshError::CellNotFound { cell, rank: self.rank }),
            _ => Err(MeshError::CellNotFound { cell, rank: self.rank }),
        }
    }

    fn check_face(&self, face: FaceId) -> Result<&crate::Face, MeshError> {
        match self.visible_faces.get(face.index()) {
            Some(true) => self
                .mesh
                .face(face)
                .ok_or(MeshError::FaceNotFound { face, rank: self.rank }),
            _ => Err(MeshError::FaceNotFound { face, rank: self.rank }),
        }
    }
}

impl MeshAdapter for PartitionView {
    fn rank(&self) -> usize { self.rank }

    fn cell_of(&self, face: FaceId, side: Side) -> Result<Option<CellId>, MeshError> {
        let face = self.check_face(face)?;
        Ok(match side {
            Side::Owner => Some(face.cells.0),
            Side::Neighbour => face.cells.1,
        })
    }

    fn faces_of(&self, cell: CellId) -> Result<&[FaceId], MeshError> {
        self.check_cell(cell).map(|c| c.faces.as_slice())
    }

    fn cell_geometry(&self, cell: CellId) -> Result<CellGeometry, MeshError> {
        let cell = self.check_cell(cell)?;
        Ok(CellGeometry {
            centroid: cell.centroid,
            volume: cell.volume,
        })
    }

    fn face_geometry(&self, face: FaceId) -> Result<FaceGeometry, MeshError> {
        let face = self.check_face(face)?;
        Ok(FaceGeometry {
            centroid: face.centroid,
            area: face.area,
            normal: face.normal,
        })
    }

    fn owner_rank(&self, cell: CellId) -> Result<usize, MeshError> {
        self.check_cell(cell)?;
        self.partition
            .owner_of(cell)
            .ok_or(MeshError::CellNotFound { cell, rank: self.rank })
    }

    fn is_ghost_face(&self, face: FaceId) -> Result<bool, MeshError> {
        let face = self.check_face(face)?;
        Ok(match face.cells.1 {
            Some(neighbour) => {
                self.partition.owner_of(face.cells.0) != self.partition.owner_of(neighbour)
            },
            None => false,
        })
    }
}
