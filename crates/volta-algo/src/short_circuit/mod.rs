//! # Short-Circuit Analysis
//!
//! Symmetrical-component fault calculation on a compiled network:
//!
//! 1. [`sequence`] builds the positive, negative and zero sequence Y-buses
//! 2. [`solver`] extracts Thevenin impedances at the fault bus and applies
//!    the closed-form fault equations
//! 3. [`stress`] compares fault duty with equipment ratings
//! 4. [`protection`] evaluates device operating times and coordination
//!
//! Pre-fault voltages come from a load flow by default. When it does not
//! converge the analysis proceeds from a flat 1.0 pu profile and reports
//! `prefault_source = Flat`.

pub mod protection;
pub mod sequence;
pub mod solver;
pub mod stress;

pub use protection::{
    evaluate_coordination, CoordinationPair, CoordinationProblem, CoordinationSeverity,
    DeviceOperation, ProtectionCoordination,
};
pub use sequence::SequenceNetworks;
pub use solver::{
    fault_currents, BranchFaultCurrent, BusFaultVoltage, FaultSolution, ShortCircuitSolver,
    TheveninImpedances,
};
pub use stress::{assess_equipment, EquipmentStress, StressedEquipment};

use std::sync::Arc;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use volta_core::{
    BusId, FaultType, LinearSystemBackend, Network, ProtectiveDevice, VoltaError, VoltaResult,
};

use crate::config::{EngineConfig, PrefaultMode};
use crate::model::SystemModel;
use crate::power_flow::{AcPowerFlowSolver, LoadFlowOptions};
use crate::sparse::SparseYBus;

/// Fault solution with equipment and protection checks attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortCircuitResult {
    #[serde(flatten)]
    pub fault: FaultSolution,
    pub equipment_stress: Vec<EquipmentStress>,
    pub protection: ProtectionCoordination,
}

impl ShortCircuitResult {
    pub fn overstressed(&self) -> impl Iterator<Item = &EquipmentStress> {
        self.equipment_stress.iter().filter(|s| !s.within_rating)
    }

    pub fn bus_voltage(&self, bus: &BusId) -> Option<&BusFaultVoltage> {
        self.fault.bus_voltages.iter().find(|v| &v.bus == bus)
    }
}

/// A fault that could not be computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFault {
    pub bus: BusId,
    pub fault_type: FaultType,
    pub reason: String,
}

/// Every requested fault type at every bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShortCircuitStudy {
    pub results: Vec<ShortCircuitResult>,
    pub skipped: Vec<SkippedFault>,
}

impl ShortCircuitStudy {
    pub fn result(&self, bus: &BusId, fault_type: FaultType) -> Option<&ShortCircuitResult> {
        self.results
            .iter()
            .find(|r| &r.fault.fault_bus == bus && r.fault.fault_type == fault_type)
    }

    /// Largest fault current in kA seen at `bus` over all fault types.
    pub fn max_fault_current_ka(&self, bus: &BusId) -> Option<f64> {
        self.results
            .iter()
            .filter(|r| &r.fault.fault_bus == bus)
            .map(|r| r.fault.fault_current_ka)
            .fold(None, |acc, i| Some(acc.map_or(i, |a: f64| a.max(i))))
    }
}

/// Compiled network plus pre-fault state, ready for any number of faults.
pub struct ShortCircuitAnalyzer {
    model: SystemModel,
    devices: Vec<ProtectiveDevice>,
    prefault: Vec<Complex64>,
    prefault_source: PrefaultMode,
    config: EngineConfig,
    backend: Arc<dyn LinearSystemBackend>,
}

impl ShortCircuitAnalyzer {
    pub fn new(
        network: &Network,
        config: &EngineConfig,
        power_flow: &AcPowerFlowSolver,
    ) -> VoltaResult<Self> {
        let model = SystemModel::compile(network)?;
        let (prefault, prefault_source) = match config.short_circuit.prefault {
            PrefaultMode::Flat => (solver::flat_prefault(&model), PrefaultMode::Flat),
            PrefaultMode::LoadFlow => load_flow_prefault(&model, power_flow)?,
        };
        Ok(Self {
            devices: network.devices().into_iter().cloned().collect(),
            model,
            prefault,
            prefault_source,
            config: config.clone(),
            backend: config.power_flow.linear_solver.build_solver(),
        })
    }

    pub fn model(&self) -> &SystemModel {
        &self.model
    }

    pub fn prefault_source(&self) -> PrefaultMode {
        self.prefault_source
    }

    fn solver(&self) -> VoltaResult<ShortCircuitSolver<'_>> {
        ShortCircuitSolver::new(
            &self.model,
            self.prefault.clone(),
            self.prefault_source,
            self.config.short_circuit.fault_impedance.to_complex(),
            self.backend.as_ref(),
        )
    }

    fn finish(&self, fault: FaultSolution) -> ShortCircuitResult {
        let devices: Vec<&ProtectiveDevice> = self.devices.iter().collect();
        let equipment_stress = assess_equipment(&self.model, &devices, &fault);
        let protection = evaluate_coordination(&devices, &fault, &self.config.protection);
        ShortCircuitResult {
            fault,
            equipment_stress,
            protection,
        }
    }

    pub fn analyze(&self, bus: &BusId, fault_type: FaultType) -> VoltaResult<ShortCircuitResult> {
        let solver = self.solver()?;
        let fault = solver.solve(bus, fault_type)?;
        info!(
            bus = %bus,
            fault = %fault_type,
            current_ka = fault.fault_current_ka,
            "short-circuit analysis complete"
        );
        Ok(self.finish(fault))
    }

    /// Run `fault_types` at every reported bus.
    ///
    /// Faults that are undefined for the data (no zero-sequence path, no
    /// source) are listed in `skipped`; numerical failures abort the study.
    pub fn study(&self, fault_types: &[FaultType]) -> VoltaResult<ShortCircuitStudy> {
        let solver = self.solver()?;
        let cases: Vec<(BusId, FaultType)> = self
            .model
            .reported_buses()
            .flat_map(|(_, bus)| fault_types.iter().map(move |&ft| (bus.id.clone(), ft)))
            .collect();

        let outcomes = crate::map_cases(&cases, self.config.parallel, |(bus, ft)| {
            solver.solve(bus, *ft)
        });

        let mut study = ShortCircuitStudy::default();
        for ((bus, fault_type), outcome) in cases.into_iter().zip(outcomes) {
            match outcome {
                Ok(fault) => study.results.push(self.finish(fault)),
                Err(VoltaError::Parameter(reason)) => {
                    study.skipped.push(SkippedFault {
                        bus,
                        fault_type,
                        reason,
                    });
                }
                Err(other) => return Err(other),
            }
        }
        info!(
            faults = study.results.len(),
            skipped = study.skipped.len(),
            "short-circuit study complete"
        );
        Ok(study)
    }
}

fn load_flow_prefault(
    model: &SystemModel,
    power_flow: &AcPowerFlowSolver,
) -> VoltaResult<(Vec<Complex64>, PrefaultMode)> {
    let ybus = SparseYBus::from_model(model)?;
    match power_flow.solve_state(model, &ybus, &LoadFlowOptions::default()) {
        Ok(state) if state.converged => Ok((state.voltages(), PrefaultMode::LoadFlow)),
        Ok(state) => {
            warn!(
                iterations = state.iterations,
                "pre-fault load flow did not converge; using flat voltages"
            );
            Ok((solver::flat_prefault(model), PrefaultMode::Flat))
        }
        Err(VoltaError::Numerical(msg)) => {
            warn!(%msg, "pre-fault load flow failed; using flat voltages");
            Ok((solver::flat_prefault(model), PrefaultMode::Flat))
        }
        Err(other) => Err(other),
    }
}
