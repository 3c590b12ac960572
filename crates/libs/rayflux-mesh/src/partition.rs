use crate::{CellId, Mesh, MeshError};
use base::math::Axis;

/// Assignment of every mesh cell to the rank owning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    owners: Vec<usize>,
    n_ranks: usize,
}

impl Partition {
    /// Assigns every cell of the mesh to rank 0.
    pub fn single(mesh: &Mesh) -> Self {
        Self {
            owners: vec![0; mesh.num_cells()],
            n_ranks: 1,
        }
    }

    /// Splits the mesh into `n_ranks` slabs of equal thickness along `axis`,
    /// binning cells by their centroid.
    ///
    /// Slabs left empty by a coarse mesh are allowed; their rank simply owns
    /// no cells.
    pub fn slabs(mesh: &Mesh, n_ranks: usize, axis: Axis) -> Result<Self, MeshError> {
        if n_ranks == 0 {
            return Err(MeshError::InvalidPartition(
                "number of ranks must be positive".to_string(),
            ));
        }
        let bounds = mesh.bounds();
        let lo = bounds.min[axis];
        let width = bounds.max[axis] - lo;
        let owners = mesh
            .cells()
            .iter()
            .map(|cell| {
                if width <= 0.0 {
                    return 0;
                }
                let t = (cell.centroid[axis] - lo) / width;
                ((t * n_ranks as f64).floor() as usize).min(n_ranks - 1)
            })
            .collect::<Vec<_>>();
        log::debug!(
            "Partitioned {} cells into {} slabs along {}",
            owners.len(),
            n_ranks,
            axis.name()
        );
        Ok(Self { owners, n_ranks })
    }

    /// Creates a partition from an explicit owner rank per cell.
    pub fn from_owners(mesh: &Mesh, owners: Vec<usize>, n_ranks: usize) -> Result<Self, MeshError> {
        if n_ranks == 0 {
            return Err(MeshError::InvalidPartition(
                "number of ranks must be positive".to_string(),
            ));
        }
        if owners.len() != mesh.num_cells() {
            return Err(MeshError::InvalidPartition(format!(
                "{} owners given for {} cells",
                owners.len(),
                mesh.num_cells()
            )));
        }
        if let Some((cell, rank)) = owners.iter().enumerate().find(|(_, &r)| r >= n_ranks) {
            return Err(MeshError::InvalidPartition(format!(
                "cell {} assigned to rank {} of {}",
                CellId(cell as u32),
                rank,
                n_ranks
            )));
        }
        Ok(Self { owners, n_ranks })
    }

    /// Rank owning the cell, `None` if the cell is not part of the mesh.
    pub fn owner_of(&self, cell: CellId) -> Option<usize> { self.owners.get(cell.index()).copied() }

    /// Number of ranks the mesh is split across.
    pub fn n_ranks(&self) -> usize { self.n_ranks }

    /// Iterates over the cells owned by `rank`.
    pub fn cells_of(&self, rank: usize) -> impl Iterator<Item = CellId> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(move |(_, &r)| r == rank)
            .map(|(i, _)| CellId(i as u32))
    }
}
