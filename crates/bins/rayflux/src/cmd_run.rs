use crate::{args::RunOptions, case::CaseConfig};
use base::{config, ChannelComm, Communicator, RayfluxError};
use flow::{
    BoundaryFluxMonitor, Buoyancy, DiagnosticRecord, FlowError, FlowField, FluxRecord, RadiationDiagnostics,
    RadiationProcess, StepContext, StepHooks,
};
use mesh::{FaceId, Mesh, Partition, PartitionView};
use rad::RadiationSolver;
use serde::Serialize;
use std::{path::Path, sync::Arc};

/// What one rank recorded during a run.
#[derive(Debug, Default)]
pub struct RankOutput {
    /// Boundary fluxes of every step.
    pub fluxes: Vec<FluxRecord>,
    /// Radiation diagnostics of every step.
    pub diagnostics: Vec<DiagnosticRecord>,
}

/// One line of the flux CSV.
#[derive(Debug, Serialize)]
struct FluxRow<'a> {
    step: u64,
    time: f64,
    face: u32,
    label: &'a str,
    x: f64,
    y: f64,
    z: f64,
    flux: f64,
}

/// Runs the case file given on the command line.
pub fn run(opts: RunOptions) -> Result<(), RayfluxError> {
    let mut case = config::load_toml::<CaseConfig>(&opts.case)?;
    if let Some(ranks) = opts.ranks {
        case.ranks = ranks;
    }
    let case = case.validate()?;
    let base_dir = opts.case.parent().unwrap_or(Path::new("."));
    let output = opts
        .output
        .or_else(|| case.output.as_ref().map(|p| config::resolve_path(base_dir, p)));

    let mesh = Arc::new(case.mesh.build()?);
    log::info!(
        "Running {} steps on {} cells, {} faces over {} ranks",
        case.steps,
        mesh.num_cells(),
        mesh.num_faces(),
        case.ranks
    );
    let outputs = run_case(&case, mesh.clone())?;
    summarise(&outputs);
    match output {
        Some(path) => write_fluxes(&path, &mesh, &outputs),
        None => {
            log::info!("No output file given, fluxes are not written");
            Ok(())
        },
    }
}

/// Runs every rank of the case on its own thread.
pub fn run_case(case: &CaseConfig, mesh: Arc<Mesh>) -> Result<Vec<RankOutput>, RayfluxError> {
    let partition = Partition::slabs(&mesh, case.ranks, case.mesh.partition_axis)
        .map_err(|err| RayfluxError::with_context(err, "Failed to partition the mesh"))?;
    let views = PartitionView::all(mesh.clone(), Arc::new(partition))
        .map_err(|err| RayfluxError::with_context(err, "Failed to build the rank views"))?;
    let emitting = case.emitting_faces(&mesh)?;

    std::thread::scope(|s| {
        let mut handles = Vec::with_capacity(views.len());
        for (comm, view) in ChannelComm::world(case.ranks).into_iter().zip(views) {
            let emitting = emitting.clone();
            let handle = std::thread::Builder::new()
                .name(format!("rank-{}", comm.rank()))
                .spawn_scoped(s, move || run_rank(case, Arc::new(view), emitting, &comm))
                .map_err(|err| RayfluxError::from_io_error(err, "Failed to spawn a rank thread"))?;
            handles.push(handle);
        }
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| match handle.join() {
                Ok(result) => result.map_err(|err| RayfluxError::with_context(err, format!("Rank {} failed", rank))),
                Err(_) => Err(RayfluxError::new(format!("Rank {} panicked", rank), None)),
            })
            .collect()
    })
}

fn run_rank(
    case: &CaseConfig,
    view: Arc<PartitionView>,
    emitting: Vec<FaceId>,
    comm: &ChannelComm,
) -> Result<RankOutput, FlowError> {
    let mut field = FlowField::at_rest(
        comm.rank(),
        case.gas,
        view.owned_cells().iter().copied(),
        case.initial.density,
        case.initial.temperature,
    );
    for &cell in view.owned_cells() {
        field.set_soot(cell, case.initial.soot_volume_fraction);
    }

    let solver = RadiationSolver::new(case.radiation.clone(), view, emitting)?;
    let mut radiation = RadiationProcess::new(solver, case.model.model()).with_ambient_temperature(case.ambient_temperature);
    for wall in &case.walls {
        radiation = radiation.with_wall(wall)?;
    }
    let mut hooks = StepHooks::new().with_process(radiation);
    if let Some(gravity) = case.gravity {
        hooks = hooks.with_process(Buoyancy::new(gravity));
    }
    let mut hooks = hooks
        .with_monitor(BoundaryFluxMonitor::new())
        .with_monitor(RadiationDiagnostics::new());

    let mut ctx = StepContext {
        step: 0,
        time: 0.0,
        dt: case.dt,
    };
    for _ in 0..case.steps {
        hooks.step(&ctx, &mut field, comm)?;
        ctx = ctx.next();
    }

    Ok(RankOutput {
        fluxes: hooks
            .monitor::<BoundaryFluxMonitor>()
            .map(|m| m.series().to_vec())
            .unwrap_or_default(),
        diagnostics: hooks
            .monitor::<RadiationDiagnostics>()
            .map(|m| m.records().to_vec())
            .unwrap_or_default(),
    })
}

fn summarise(outputs: &[RankOutput]) {
    let Some(root) = outputs.first() else {
        return;
    };
    let warnings = outputs
        .iter()
        .flat_map(|o| &o.diagnostics)
        .map(|d| d.warnings)
        .sum::<usize>();
    let rounds = root.diagnostics.iter().map(|d| d.rounds).max().unwrap_or(0);
    let hits = outputs
        .iter()
        .flat_map(|o| &o.diagnostics)
        .map(|d| d.cache.hits)
        .sum::<u64>();
    log::info!(
        "Finished {} steps: at most {} rounds per solve, {} cache hits, {} warnings",
        root.diagnostics.len(),
        rounds,
        hits,
        warnings
    );
    if root.diagnostics.iter().any(|d| d.approximate) {
        log::warn!("Some radiation solves were approximate");
    }
}

/// Writes the flux of every face and step, ordered by step then face.
pub fn write_fluxes(path: &Path, mesh: &Mesh, outputs: &[RankOutput]) -> Result<(), RayfluxError> {
    let csv_error = |err: csv::Error| RayfluxError::with_context(err, format!("Failed to write {}", path.display()));
    let mut records = outputs
        .iter()
        .flat_map(|o| &o.fluxes)
        .flat_map(|r| r.flux.iter().map(move |(face, flux)| (r.step, r.time, *face, *flux)))
        .collect::<Vec<_>>();
    records.sort_by_key(|&(step, _, face, _)| (step, face));

    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    for (step, time, face, flux) in records {
        let Some(geometry) = mesh.face(face) else {
            continue;
        };
        let row = FluxRow {
            step,
            time,
            face: face.0,
            label: geometry.label.as_deref().unwrap_or(""),
            x: geometry.centroid.x,
            y: geometry.centroid.y,
            z: geometry.centroid.z,
            flux,
        };
        writer.serialize(&row).map_err(csv_error)?;
    }
    writer
        .flush()
        .map_err(|err| RayfluxError::from_io_error(err, format!("Failed to write {}", path.display())))?;
    log::info!("Boundary fluxes written to {}", path.display());
    Ok(())
}
