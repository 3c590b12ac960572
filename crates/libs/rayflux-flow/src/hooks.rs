//! Hooks run by the flow solver around every time step.

use crate::{EulerState, FlowError, FlowField};
use base::Communicator;
use mesh::CellId;
use rad::RadiationSolution;
use std::{any::Any, collections::BTreeMap};

/// Position of a step in the simulation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StepContext {
    /// Index of the step, starting at zero.
    pub step: u64,
    /// Simulation time at the start of the step.
    pub time: f64,
    /// Time step size.
    pub dt: f64,
}

impl StepContext {
    /// Context of the step following this one.
    pub fn next(&self) -> Self {
        Self {
            step: self.step + 1,
            time: self.time + self.dt,
            dt: self.dt,
        }
    }
}

/// A physical process contributing sources to the Euler equations.
pub trait Process: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Prepares the process for the coming step. Collective: every rank
    /// calls it for the same step.
    fn pre_step(&mut self, _ctx: &StepContext, _field: &FlowField, _comm: &dyn Communicator) -> Result<(), FlowError> {
        Ok(())
    }

    /// Source of the process in `cell`, in the state it had before the step.
    fn source(&self, cell: CellId, state: &EulerState) -> EulerState;

    /// Latest radiation solution, for processes that solve radiation.
    fn radiation(&self) -> Option<&RadiationSolution> { None }
}

/// Observer of the flow after every step.
pub trait Monitor: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Records the outcome of a step.
    fn record(&mut self, ctx: &StepContext, field: &FlowField, processes: &[Box<dyn Process>]);

    /// The monitor as [`Any`], to read its records back.
    fn as_any(&self) -> &dyn Any;
}

/// Processes and monitors registered with the flow solver.
#[derive(Default)]
pub struct StepHooks {
    processes: Vec<Box<dyn Process>>,
    monitors: Vec<Box<dyn Monitor>>,
}

impl StepHooks {
    /// Creates hooks without processes or monitors.
    pub fn new() -> Self { Self::default() }

    /// Registers a process. Processes run in registration order.
    pub fn with_process<P: Process + 'static>(mut self, process: P) -> Self {
        self.processes.push(Box::new(process));
        self
    }

    /// Registers a monitor. Monitors run in registration order.
    pub fn with_monitor<M: Monitor + 'static>(mut self, monitor: M) -> Self {
        self.monitors.push(Box::new(monitor));
        self
    }

    /// Registered processes.
    pub fn processes(&self) -> &[Box<dyn Process>] { &self.processes }

    /// First registered monitor of type `M`.
    pub fn monitor<M: Monitor + 'static>(&self) -> Option<&M> {
        self.monitors.iter().find_map(|m| m.as_any().downcast_ref::<M>())
    }

    /// Runs the pre-step hook of every process.
    pub fn pre_step(&mut self, ctx: &StepContext, field: &FlowField, comm: &dyn Communicator) -> Result<(), FlowError> {
        for process in &mut self.processes {
            log::trace!("Step {}: pre-step of {}", ctx.step, process.name());
            process.pre_step(ctx, field, comm)?;
        }
        Ok(())
    }

    /// Sum of the sources of all processes in every cell of the field.
    pub fn sources(&self, field: &FlowField) -> BTreeMap<CellId, EulerState> {
        field
            .iter()
            .map(|(cell, state)| {
                let total = self
                    .processes
                    .iter()
                    .fold(EulerState::default(), |acc, p| acc + p.source(cell, state));
                (cell, total)
            })
            .collect()
    }

    /// Notifies every monitor of a finished step.
    pub fn post_step(&mut self, ctx: &StepContext, field: &FlowField) {
        for monitor in &mut self.monitors {
            log::trace!("Step {}: recording {}", ctx.step, monitor.name());
            monitor.record(ctx, field, &self.processes);
        }
    }

    /// Runs a whole step: pre-step hooks, explicit update of the field with
    /// the summed sources, then the monitors.
    pub fn step(&mut self, ctx: &StepContext, field: &mut FlowField, comm: &dyn Communicator) -> Result<(), FlowError> {
        self.pre_step(ctx, field, comm)?;
        let sources = self.sources(field);
        field.apply(&sources, ctx.dt);
        self.post_step(ctx, field);
        Ok(())
    }
}
