//! Construction of structured box meshes stored as unstructured meshes.

use crate::{Cell, CellId, Face, FaceId, Mesh, MeshError};
use base::math::{Axis, DVec3};

impl Mesh {
    /// Builds a box `[min, max]` divided into `divisions[0] × divisions[1] ×
    /// divisions[2]` hexahedral cells.
    ///
    /// Cells are numbered x fastest, then y, then z. Faces are numbered per
    /// axis (all x-normal faces first), each interior face being shared by
    /// its two cells with the normal pointing towards increasing index.
    /// Boundary faces are labelled `x-`, `x+`, `y-`, `y+`, `z-` and `z+`.
    pub fn structured_box(divisions: [usize; 3], min: DVec3, max: DVec3) -> Result<Mesh, MeshError> {
        if divisions.iter().any(|&n| n == 0) {
            return Err(MeshError::InvalidMesh(format!(
                "box divisions must be positive, got {:?}",
                divisions
            )));
        }
        let extent = max - min;
        if extent.min_element() <= 0.0 {
            return Err(MeshError::InvalidMesh(format!(
                "box extent must be positive, got {}",
                extent
            )));
        }
        let [nx, ny, nz] = divisions;
        let spacing = extent / DVec3::new(nx as f64, ny as f64, nz as f64);
        let cell_index = |ijk: [usize; 3]| ijk[0] + nx * (ijk[1] + ny * ijk[2]);

        let mut cells: Vec<Cell> = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let centroid =
                        min + spacing * DVec3::new(i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5);
                    cells.push(Cell {
                        id: CellId(cell_index([i, j, k]) as u32),
                        centroid,
                        volume: spacing.x * spacing.y * spacing.z,
                        faces: Vec::with_capacity(6),
                    });
                }
            }
        }

        let mut faces: Vec<Face> = Vec::new();
        for axis in Axis::ALL {
            let (u, v) = (axis.next_axis(), axis.next_axis().next_axis());
            let area = spacing[u] * spacing[v];
            let n = divisions[axis as usize];
            for plane in 0..=n {
                for b in 0..divisions[v as usize] {
                    for a in 0..divisions[u as usize] {
                        let mut lo = [0usize; 3];
                        lo[u as usize] = a;
                        lo[v as usize] = b;
                        let mut centroid = DVec3::ZERO;
                        centroid[axis] = min[axis] + spacing[axis] * plane as f64;
                        centroid[u] = min[u] + spacing[u] * (a as f64 + 0.5);
                        centroid[v] = min[v] + spacing[v] * (b as f64 + 0.5);

                        let (cells_of_face, normal, label) = if plane == 0 {
                            lo[axis as usize] = 0;
                            let owner = CellId(cell_index(lo) as u32);
                            ((owner, None), -axis.unit(), Some(format!("{}-", axis.name())))
                        } else if plane == n {
                            lo[axis as usize] = n - 1;
                            let owner = CellId(cell_index(lo) as u32);
                            ((owner, None), axis.unit(), Some(format!("{}+", axis.name())))
                        } else {
                            let mut hi = lo;
                            lo[axis as usize] = plane - 1;
                            hi[axis as usize] = plane;
                            let owner = CellId(cell_index(lo) as u32);
                            let neighbour = CellId(cell_index(hi) as u32);
                            ((owner, Some(neighbour)), axis.unit(), None)
                        };

                        let id = FaceId(faces.len() as u32);
                        cells[cells_of_face.0.index()].faces.push(id);
                        if let Some(neighbour) = cells_of_face.1 {
                            cells[neighbour.index()].faces.push(id);
                        }
                        faces.push(Face {
                            id,
                            centroid,
                            area,
                            normal,
                            cells: cells_of_face,
                            label,
                        });
                    }
                }
            }
        }

        Mesh::new(cells, faces)
    }
}
