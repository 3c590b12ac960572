//! Conserved flow state of the cells owned by one rank.

use crate::FlowError;
use mesh::CellId;
use rad::ThermoState;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ops::{Add, AddAssign, Mul},
};

/// Conserved Euler variables of a cell; also used for per-cell sources.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EulerState {
    /// Density.
    pub rho: f64,
    /// Total energy per unit volume.
    pub rho_e: f64,
    /// Momentum per unit volume.
    pub rho_u: [f64; 3],
}

impl EulerState {
    /// Gas at rest with the given density and temperature.
    pub fn at_rest(rho: f64, temperature: f64, gas: &IdealGas) -> Self {
        Self {
            rho,
            rho_e: rho * gas.specific_heat_cv() * temperature,
            rho_u: [0.0; 3],
        }
    }

    /// Velocity, zero where the density vanishes.
    pub fn velocity(&self) -> [f64; 3] {
        if self.rho > 0.0 {
            self.rho_u.map(|m| m / self.rho)
        } else {
            [0.0; 3]
        }
    }
}

impl Add for EulerState {
    type Output = EulerState;

    fn add(mut self, rhs: EulerState) -> Self::Output {
        self += rhs;
        self
    }
}

impl AddAssign for EulerState {
    fn add_assign(&mut self, rhs: EulerState) {
        self.rho += rhs.rho;
        self.rho_e += rhs.rho_e;
        for (m, r) in self.rho_u.iter_mut().zip(rhs.rho_u) {
            *m += r;
        }
    }
}

impl Mul<f64> for EulerState {
    type Output = EulerState;

    fn mul(self, rhs: f64) -> Self::Output {
        EulerState {
            rho: self.rho * rhs,
            rho_e: self.rho_e * rhs,
            rho_u: self.rho_u.map(|m| m * rhs),
        }
    }
}

/// Calorically perfect gas closing the Euler equations.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct IdealGas {
    /// Ratio of specific heats.
    pub gamma: f64,
    /// Specific gas constant in J/(kg·K).
    pub gas_constant: f64,
}

impl Default for IdealGas {
    fn default() -> Self {
        Self {
            gamma: 1.4,
            gas_constant: 287.0,
        }
    }
}

impl IdealGas {
    /// Specific heat at constant volume.
    pub fn specific_heat_cv(&self) -> f64 { self.gas_constant / (self.gamma - 1.0) }

    /// Thermodynamic state of a cell, `None` if the conserved variables do
    /// not describe a gas with positive density and temperature.
    pub fn thermo(&self, state: &EulerState) -> Option<ThermoState> {
        if !(state.rho > 0.0 && state.rho.is_finite()) {
            return None;
        }
        let u = state.velocity();
        let kinetic = 0.5 * u.iter().map(|v| v * v).sum::<f64>();
        let internal = state.rho_e / state.rho - kinetic;
        let temperature = internal / self.specific_heat_cv();
        (temperature > 0.0 && temperature.is_finite()).then_some(ThermoState {
            temperature,
            pressure: state.rho * self.gas_constant * temperature,
            density: state.rho,
            soot_volume_fraction: 0.0,
        })
    }
}

/// Euler state of the cells owned by one rank.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    rank: usize,
    gas: IdealGas,
    cells: BTreeMap<CellId, EulerState>,
    soot: BTreeMap<CellId, f64>,
}

impl FlowField {
    /// Creates an empty field for `rank`.
    pub fn new(rank: usize, gas: IdealGas) -> Self {
        Self {
            rank,
            gas,
            cells: BTreeMap::new(),
            soot: BTreeMap::new(),
        }
    }

    /// Creates a field of gas at rest in every given cell.
    pub fn at_rest<I>(rank: usize, gas: IdealGas, cells: I, rho: f64, temperature: f64) -> Self
    where
        I: IntoIterator<Item = CellId>,
    {
        let mut field = Self::new(rank, gas);
        for cell in cells {
            field.insert(cell, EulerState::at_rest(rho, temperature, &gas));
        }
        field
    }

    /// Rank owning the cells.
    pub fn rank(&self) -> usize { self.rank }

    /// Gas closure.
    pub fn gas(&self) -> &IdealGas { &self.gas }

    /// Sets the state of a cell.
    pub fn insert(&mut self, cell: CellId, state: EulerState) { self.cells.insert(cell, state); }

    /// Sets the soot volume fraction of a cell.
    pub fn set_soot(&mut self, cell: CellId, volume_fraction: f64) { self.soot.insert(cell, volume_fraction); }

    /// State of a cell.
    pub fn get(&self, cell: CellId) -> Option<&EulerState> { self.cells.get(&cell) }

    /// Cells and their states, ascending by cell.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &EulerState)> + '_ {
        self.cells.iter().map(|(c, s)| (*c, s))
    }

    /// Number of cells.
    pub fn len(&self) -> usize { self.cells.len() }

    /// Whether the field holds no cell.
    pub fn is_empty(&self) -> bool { self.cells.is_empty() }

    /// Thermodynamic state of every cell, ascending by cell.
    pub fn thermo_states(&self) -> Result<Vec<(CellId, ThermoState)>, FlowError> {
        self.cells
            .iter()
            .map(|(&cell, state)| {
                let mut thermo = self.gas.thermo(state).ok_or_else(|| FlowError::InvalidState {
                    cell,
                    reason: format!("{:?} has no positive density and temperature", state),
                })?;
                thermo.soot_volume_fraction = self.soot.get(&cell).copied().unwrap_or(0.0);
                Ok((cell, thermo))
            })
            .collect()
    }

    /// Advances every cell by `dt` times its source. Sources of cells not in
    /// the field are ignored.
    pub fn apply(&mut self, sources: &BTreeMap<CellId, EulerState>, dt: f64) {
        for (cell, source) in sources {
            match self.cells.get_mut(cell) {
                Some(state) => *state += *source * dt,
                None => log::trace!("Rank {} ignores source of foreign cell {}", self.rank, cell),
            }
        }
    }
}
