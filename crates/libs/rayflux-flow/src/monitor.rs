//! Monitors recording the radiation output of every step.

use crate::{FlowField, Monitor, Process, StepContext};
use mesh::FaceId;
use rad::{cache::CacheStats, RadiationSolution};
use serde::{Deserialize, Serialize};
use std::{any::Any, collections::BTreeMap};

fn latest_solution(processes: &[Box<dyn Process>]) -> Option<&RadiationSolution> {
    processes.iter().find_map(|p| p.radiation())
}

/// Boundary fluxes of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxRecord {
    /// Step index.
    pub step: u64,
    /// Simulation time at the start of the step.
    pub time: f64,
    /// Net radiative flux into every emitting face of the rank.
    pub flux: BTreeMap<FaceId, f64>,
}

/// Records the radiative flux of every boundary face after every step.
#[derive(Debug, Clone, Default)]
pub struct BoundaryFluxMonitor {
    series: Vec<FluxRecord>,
}

impl BoundaryFluxMonitor {
    /// Creates an empty monitor.
    pub fn new() -> Self { Self::default() }

    /// Recorded steps, in order.
    pub fn series(&self) -> &[FluxRecord] { &self.series }

    /// Record of the last step.
    pub fn latest(&self) -> Option<&FluxRecord> { self.series.last() }
}

impl Monitor for BoundaryFluxMonitor {
    fn name(&self) -> &str { "boundary-flux" }

    fn record(&mut self, ctx: &StepContext, _field: &FlowField, processes: &[Box<dyn Process>]) {
        match latest_solution(processes) {
            Some(solution) => self.series.push(FluxRecord {
                step: ctx.step,
                time: ctx.time,
                flux: solution.flux.clone(),
            }),
            None => log::warn!("Step {}: no radiation process to record fluxes from", ctx.step),
        }
    }

    fn as_any(&self) -> &dyn Any { self }
}

/// Solver diagnostics of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiagnosticRecord {
    /// Step index.
    pub step: u64,
    /// Exchange rounds of the solve.
    pub rounds: u32,
    /// Carriers launched over all ranks.
    pub carriers: u64,
    /// Hand-offs over all ranks.
    pub handoffs: u64,
    /// Warnings raised on this rank.
    pub warnings: usize,
    /// Whether the fluxes are approximate.
    pub approximate: bool,
    /// Path cache activity on this rank.
    pub cache: CacheStats,
}

/// Records the radiation solver diagnostics of every step.
#[derive(Debug, Clone, Default)]
pub struct RadiationDiagnostics {
    records: Vec<DiagnosticRecord>,
}

impl RadiationDiagnostics {
    /// Creates an empty monitor.
    pub fn new() -> Self { Self::default() }

    /// Recorded steps, in order.
    pub fn records(&self) -> &[DiagnosticRecord] { &self.records }

    /// Whether any recorded step ended with approximate fluxes.
    pub fn any_approximate(&self) -> bool { self.records.iter().any(|r| r.approximate) }
}

impl Monitor for RadiationDiagnostics {
    fn name(&self) -> &str { "radiation-diagnostics" }

    fn record(&mut self, ctx: &StepContext, field: &FlowField, processes: &[Box<dyn Process>]) {
        let Some(solution) = latest_solution(processes) else {
            return;
        };
        let report = &solution.report;
        for warning in &report.warnings {
            log::warn!("Step {} on rank {}: {}", ctx.step, field.rank(), warning);
        }
        if field.rank() == 0 {
            log::info!(
                "Step {}: {} carriers, {} hand-offs, {} rounds{}",
                ctx.step,
                report.carriers,
                report.handoffs,
                report.rounds,
                if report.approximate { ", approximate" } else { "" }
            );
        }
        self.records.push(DiagnosticRecord {
            step: ctx.step,
            rounds: report.rounds,
            carriers: report.carriers,
            handoffs: report.handoffs,
            warnings: report.warnings.len(),
            approximate: report.approximate,
            cache: report.cache,
        });
    }

    fn as_any(&self) -> &dyn Any { self }
}
