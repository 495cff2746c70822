//! Prioritized, costed upgrade recommendations.
//!
//! Sizing rules, with unit costs from [`TopologyConfig`]:
//!
//! ```text
//! redundant path     base + per_MVA · stranded load
//! voltage support    Q = V·ΔV / X_th · S_base          (Mvar)
//! capacity upgrade   ΔS = S_rated · (loading / limit − 1)
//! harmonic filter    reactive demand at the bus, at least 100 kvar
//! equipment upgrade  flat cost per overstressed item
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::spof::SinglePointOfFailure;
use crate::config::TopologyConfig;
use crate::harmonics::ViolationSeverity;
use crate::power_flow::{ViolationKind, VoltageViolation};
use crate::short_circuit::EquipmentStress;

/// Smallest harmonic filter offered.
pub const MIN_FILTER_KVAR: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    AddRedundantPath,
    AddVoltageSupport,
    UpgradeCapacity,
    UpgradeEquipment,
    AddHarmonicFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub kind: RecommendationKind,
    /// Element or bus the recommendation applies to
    pub target: String,
    pub description: String,
    pub estimated_cost: f64,
}

/// Critical first; within a priority, the larger spend first.
pub fn sort_recommendations(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| {
                b.estimated_cost
                    .partial_cmp(&a.estimated_cost)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.target.cmp(&b.target))
    });
}

pub fn redundant_path(
    spof: &SinglePointOfFailure,
    total_load_mw: f64,
    config: &TopologyConfig,
) -> Recommendation {
    let share = if total_load_mw > 0.0 {
        spof.stranded_load_mw / total_load_mw
    } else {
        0.0
    };
    let priority = if share >= 0.1 {
        Priority::Critical
    } else if spof.stranded_load_mw > 0.0 {
        Priority::High
    } else {
        Priority::Medium
    };
    let served_mw = spof.stranded_load_mw.max(spof.stranded_generation_mw);
    Recommendation {
        priority,
        kind: RecommendationKind::AddRedundantPath,
        target: spof.element.to_string(),
        description: format!(
            "Loss of {} de-energizes {} bus(es) ({:.1} MW load, {:.1} MW generation); add an alternate path",
            spof.element,
            spof.stranded_buses.len(),
            spof.stranded_load_mw,
            spof.stranded_generation_mw
        ),
        estimated_cost: config.redundant_path_base_cost
            + config.redundant_path_cost_per_mva * served_mw,
    }
}

/// Reactive support to bring a bus back to its limit.
///
/// `reactance_pu` is the driving-point reactance at the bus.
pub fn voltage_support(
    violation: &VoltageViolation,
    reactance_pu: f64,
    base_mva: f64,
    config: &TopologyConfig,
) -> Recommendation {
    let deviation = violation.deviation_pu();
    let mvar = violation.limit_pu * deviation / reactance_pu * base_mva;
    let priority = if deviation > 0.1 {
        Priority::Critical
    } else if deviation > 0.05 {
        Priority::High
    } else {
        Priority::Medium
    };
    let device = match violation.kind {
        ViolationKind::Under => "capacitor bank",
        ViolationKind::Over => "shunt reactor",
    };
    Recommendation {
        priority,
        kind: RecommendationKind::AddVoltageSupport,
        target: violation.bus.to_string(),
        description: format!(
            "Bus {} at {:.3} pu (limit {:.3}); install a {:.1} Mvar {device}",
            violation.bus, violation.voltage_pu, violation.limit_pu, mvar
        ),
        estimated_cost: config.voltage_support_cost_per_mvar * mvar,
    }
}

pub fn capacity_upgrade(
    label: &str,
    loading_pct: f64,
    rating_mva: f64,
    post_contingency: bool,
    config: &TopologyConfig,
) -> Recommendation {
    let limit = config.loading_limit_pct;
    let extra_mva = rating_mva * (loading_pct / limit - 1.0).max(0.0);
    let priority = if post_contingency {
        if loading_pct > 1.5 * limit {
            Priority::High
        } else {
            Priority::Medium
        }
    } else if loading_pct > 1.5 * limit {
        Priority::Critical
    } else if loading_pct > 1.2 * limit {
        Priority::High
    } else {
        Priority::Medium
    };
    let context = if post_contingency { " after an N-1 outage" } else { "" };
    Recommendation {
        priority,
        kind: RecommendationKind::UpgradeCapacity,
        target: label.to_string(),
        description: format!(
            "{label} loaded to {loading_pct:.1}%{context}; add {extra_mva:.1} MVA of capacity"
        ),
        estimated_cost: config.capacity_upgrade_cost_per_mva * extra_mva,
    }
}

pub fn equipment_upgrade(stress: &EquipmentStress, config: &TopologyConfig) -> Recommendation {
    let priority = if stress.utilization_pct > 150.0 {
        Priority::Critical
    } else if stress.utilization_pct > 120.0 {
        Priority::High
    } else {
        Priority::Medium
    };
    Recommendation {
        priority,
        kind: RecommendationKind::UpgradeEquipment,
        target: stress.equipment.clone(),
        description: format!(
            "{} sees {:.2} kA against a {:.2} kA rating ({:.0}%)",
            stress.equipment, stress.fault_current_ka, stress.rating_ka, stress.utilization_pct
        ),
        estimated_cost: config.equipment_upgrade_cost,
    }
}

pub fn harmonic_filter(
    bus: &str,
    worst: ViolationSeverity,
    reactive_demand_mvar: f64,
    config: &TopologyConfig,
) -> Recommendation {
    let kvar = (reactive_demand_mvar.abs() * 1000.0).max(MIN_FILTER_KVAR);
    let priority = match worst {
        ViolationSeverity::Critical => Priority::Critical,
        ViolationSeverity::High => Priority::High,
        ViolationSeverity::Medium => Priority::Medium,
        ViolationSeverity::Low => Priority::Low,
    };
    Recommendation {
        priority,
        kind: RecommendationKind::AddHarmonicFilter,
        target: bus.to_string(),
        description: format!("IEEE 519 limits exceeded at bus {bus}; install a {kvar:.0} kvar tuned filter"),
        estimated_cost: config.harmonic_filter_cost_per_kvar * kvar,
    }
}
