use crate::{args::InfoOptions, case::CaseConfig};
use base::{config, quadrature::OrdinateSet, RayfluxError};
use mesh::Partition;

/// Prints what a run of the case would set up, without solving anything.
pub fn print_info(opts: InfoOptions) -> Result<(), RayfluxError> {
    let mut case = config::load_toml::<CaseConfig>(&opts.case)?;
    if let Some(ranks) = opts.ranks {
        case.ranks = ranks;
    }
    let case = case.validate()?;
    let mesh = case.mesh.build()?;
    let partition = Partition::slabs(&mesh, case.ranks, case.mesh.partition_axis)
        .map_err(|err| RayfluxError::with_context(err, "Failed to partition the mesh"))?;
    let emitting = case.emitting_faces(&mesh)?;
    let ordinates = OrdinateSet::equal_angle(case.radiation.n_theta, case.radiation.n_phi);
    let diameter = mesh.diameter_in_cells();

    println!("case: {}", opts.case.display());
    println!("  mesh: {} cells, {} faces, bounds {}", mesh.num_cells(), mesh.num_faces(), mesh.bounds());
    for rank in 0..partition.n_ranks() {
        println!("  rank {}: {} cells", rank, partition.cells_of(rank).count());
    }
    println!("  emitting faces: {}", emitting.len());
    println!(
        "  ordinates: {} ({} x {}), {:?} tracing",
        ordinates.len(),
        ordinates.n_theta(),
        ordinates.n_phi(),
        case.radiation.method
    );
    println!(
        "  hop budget: {}, round ceiling: {}",
        case.radiation.hop_budget(diameter),
        case.radiation.round_ceiling(diameter)
    );
    Ok(())
}
