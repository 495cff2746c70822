//! Duty of switchgear and transformers against their fault ratings.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use volta_core::{BranchKind, ProtectiveDevice};

use super::solver::FaultSolution;
use crate::model::SystemModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressedEquipment {
    /// Bus switchgear short-circuit rating
    Bus,
    /// Line or cable interrupting rating
    Branch,
    /// Transformer through-fault capability
    Transformer,
    ProtectiveDevice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentStress {
    pub equipment: String,
    pub kind: StressedEquipment,
    pub fault_current_ka: f64,
    pub rating_ka: f64,
    pub within_rating: bool,
    pub utilization_pct: f64,
}

impl EquipmentStress {
    fn new(equipment: String, kind: StressedEquipment, fault_current_ka: f64, rating_ka: f64) -> Self {
        let utilization_pct = if rating_ka > 0.0 {
            fault_current_ka / rating_ka * 100.0
        } else {
            f64::INFINITY
        };
        Self {
            equipment,
            kind,
            fault_current_ka,
            rating_ka,
            within_rating: fault_current_ka <= rating_ka,
            utilization_pct,
        }
    }
}

/// Compare every rated piece of equipment with the current it sees.
///
/// Only equipment with a rating is reported. The faulted bus is checked
/// against the total fault current; branches, transformer windings and
/// devices against the current through their own terminals.
pub fn assess_equipment(
    model: &SystemModel,
    devices: &[&ProtectiveDevice],
    solution: &FaultSolution,
) -> Vec<EquipmentStress> {
    let mut stress = Vec::new();

    if let Some(rating) = model
        .bus_index(&solution.fault_bus)
        .and_then(|i| model.buses[i].short_circuit_rating_ka)
    {
        stress.push(EquipmentStress::new(
            solution.fault_bus.to_string(),
            StressedEquipment::Bus,
            solution.fault_current_ka,
            rating,
        ));
    }

    for (branch, current) in model.branches.iter().zip(&solution.branch_currents) {
        let Some(rating) = branch.interrupting_rating_ka else {
            continue;
        };
        let kind = match branch.kind {
            BranchKind::Transformer => StressedEquipment::Transformer,
            _ => StressedEquipment::Branch,
        };
        stress.push(EquipmentStress::new(
            branch.label.clone(),
            kind,
            current.max_phase_ka,
            rating,
        ));
    }

    for device in devices.iter().filter(|d| d.status) {
        let Some(rating) = device.interrupting_rating_ka else {
            continue;
        };
        // A transformer expanded to a star carries one entry per leg; the
        // device sees the largest of them.
        let through = solution
            .branch_currents
            .iter()
            .filter(|c| c.element == device.location)
            .map(|c| c.max_phase_ka)
            .fold(None, |acc: Option<f64>, i| Some(acc.map_or(i, |a| a.max(i))));
        let Some(current) = through else {
            warn!(device = %device.id, location = %device.location, "protected element not in service");
            continue;
        };
        stress.push(EquipmentStress::new(
            device.id.to_string(),
            StressedEquipment::ProtectiveDevice,
            current,
            rating.value(),
        ));
    }

    for over in stress.iter().filter(|s| !s.within_rating) {
        debug!(
            equipment = %over.equipment,
            current_ka = over.fault_current_ka,
            rating_ka = over.rating_ka,
            "fault duty exceeds rating"
        );
    }
    stress
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_and_verdict() {
        let ok = EquipmentStress::new("CB1".into(), StressedEquipment::ProtectiveDevice, 8.0, 10.0);
        assert!(ok.within_rating);
        assert!((ok.utilization_pct - 80.0).abs() < 1e-12);

        let over = EquipmentStress::new("B1".into(), StressedEquipment::Bus, 25.0, 20.0);
        assert!(!over.within_rating);
        assert!((over.utilization_pct - 125.0).abs() < 1e-12);
    }
}
