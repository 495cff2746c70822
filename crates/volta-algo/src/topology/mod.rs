//! # Topology and Redundancy Analysis
//!
//! Post-processing over a network and the results of earlier studies. The
//! analyzer runs no solver of its own; it reads:
//!
//! - the base-case [`LoadFlowResult`] for voltage violations, overloads and
//!   losses
//! - optionally a [`ShortCircuitStudy`] for equipment duty
//! - optionally a [`HarmonicAnalysisResult`] for IEEE 519 violations
//! - optionally a [`ContingencyReport`] for post-outage overloads
//!
//! and combines them with a graph search for single points of failure into
//! a ranked list of upgrades.

pub mod recommendations;
pub mod spof;

pub use recommendations::{Priority, Recommendation, RecommendationKind};
pub use spof::{find_single_points_of_failure, SinglePointOfFailure};

use std::collections::{BTreeMap, HashSet};

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use volta_core::{BusId, BusType, LinearSystemBackend, Network};

use crate::config::TopologyConfig;
use crate::contingency::ContingencyReport;
use crate::harmonics::{HarmonicAnalysisResult, ViolationSeverity};
use crate::model::SystemModel;
use crate::power_flow::{LoadFlowResult, VoltageViolation};
use crate::short_circuit::{EquipmentStress, ShortCircuitStudy};
use crate::sparse::SparseYBus;

/// Reactance assumed when the driving-point value cannot be computed.
pub const FALLBACK_REACTANCE_PU: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverloadedBranch {
    pub label: String,
    pub loading_pct: f64,
    pub rating_mva: f64,
    pub losses_mw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyOptimization {
    pub recommendations: Vec<Recommendation>,
    /// Share of outage candidates that strand no bus, in percent
    pub redundancy_pct: f64,
    /// Percentage points gained if every redundant-path recommendation is built
    pub redundancy_improvement: f64,
    /// Loss reduction expected from the capacity upgrades
    pub loss_reduction_mw: f64,
    pub cost_estimate: f64,
    pub single_points_of_failure: Vec<SinglePointOfFailure>,
    pub voltage_violations: Vec<VoltageViolation>,
    pub overloaded_branches: Vec<OverloadedBranch>,
    pub load_flow_converged: bool,
}

/// Results available to the analyzer.
#[derive(Debug, Clone, Copy)]
pub struct TopologyInputs<'a> {
    pub load_flow: &'a LoadFlowResult,
    pub short_circuit: Option<&'a ShortCircuitStudy>,
    pub harmonics: Option<&'a HarmonicAnalysisResult>,
    pub contingencies: Option<&'a ContingencyReport>,
}

impl<'a> TopologyInputs<'a> {
    pub fn new(load_flow: &'a LoadFlowResult) -> Self {
        Self {
            load_flow,
            short_circuit: None,
            harmonics: None,
            contingencies: None,
        }
    }
}

pub struct TopologyAnalyzer<'a> {
    config: &'a TopologyConfig,
    backend: &'a dyn LinearSystemBackend,
}

impl<'a> TopologyAnalyzer<'a> {
    pub fn new(config: &'a TopologyConfig, backend: &'a dyn LinearSystemBackend) -> Self {
        Self { config, backend }
    }

    pub fn analyze(
        &self,
        network: &Network,
        model: &SystemModel,
        inputs: TopologyInputs<'_>,
    ) -> TopologyOptimization {
        let config = self.config;
        let load_flow = inputs.load_flow;
        let total_load_mw: f64 = network
            .loads()
            .iter()
            .filter(|l| l.status)
            .map(|l| l.active_power.value())
            .sum();

        let candidates = spof::outage_candidates(network).len();
        let spofs = find_single_points_of_failure(network);
        let mut recommendations: Vec<Recommendation> = spofs
            .iter()
            .map(|s| recommendations::redundant_path(s, total_load_mw, config))
            .collect();
        let redundancy_pct = spof::redundancy_pct(candidates, spofs.len());
        let redundancy_improvement = 100.0 - redundancy_pct;

        let (voltage_violations, overloaded_branches) = if load_flow.converged {
            let overloaded: Vec<OverloadedBranch> = model
                .branches
                .iter()
                .filter_map(|b| {
                    let flow = load_flow.branch(&b.label)?;
                    let rating_mva = b.rating_mva?;
                    flow.is_overloaded(config.loading_limit_pct)
                        .then(|| OverloadedBranch {
                            label: b.label.clone(),
                            loading_pct: flow.loading_pct.unwrap_or(0.0),
                            rating_mva,
                            losses_mw: flow.losses_mw,
                        })
                })
                .collect();
            (load_flow.voltage_profile.violations.clone(), overloaded)
        } else {
            warn!("load flow did not converge; voltage and loading checks skipped");
            (Vec::new(), Vec::new())
        };

        if !voltage_violations.is_empty() {
            let grounded = grounded_admittance(model);
            for violation in &voltage_violations {
                let x = model
                    .bus_index(&violation.bus)
                    .and_then(|k| {
                        let y = grounded.as_ref()?;
                        self.driving_point_reactance(y, k)
                    })
                    .unwrap_or(FALLBACK_REACTANCE_PU);
                recommendations.push(recommendations::voltage_support(
                    violation,
                    x,
                    model.base_mva,
                    config,
                ));
            }
        }

        let mut loss_reduction_mw = 0.0;
        for branch in &overloaded_branches {
            recommendations.push(recommendations::capacity_upgrade(
                &branch.label,
                branch.loading_pct,
                branch.rating_mva,
                false,
                config,
            ));
            // Upgraded conductor sized to the limit: resistance scales down
            // with the capacity ratio.
            loss_reduction_mw +=
                branch.losses_mw * (1.0 - config.loading_limit_pct / branch.loading_pct);
        }

        if let Some(report) = inputs.contingencies {
            let base: HashSet<&str> = overloaded_branches.iter().map(|b| b.label.as_str()).collect();
            let mut worst: BTreeMap<&str, f64> = BTreeMap::new();
            for outcome in report.outcomes.iter().filter(|o| o.error.is_none()) {
                for flow in &outcome.overloaded {
                    if base.contains(flow.label.as_str()) {
                        continue;
                    }
                    let entry = worst.entry(flow.label.as_str()).or_insert(flow.loading_pct);
                    *entry = entry.max(flow.loading_pct);
                }
            }
            for (label, loading) in worst {
                if let Some(rating) = model
                    .branches
                    .iter()
                    .find(|b| b.label == label)
                    .and_then(|b| b.rating_mva)
                {
                    recommendations.push(recommendations::capacity_upgrade(
                        label, loading, rating, true, config,
                    ));
                }
            }
        }

        if let Some(study) = inputs.short_circuit {
            // One recommendation per item, at its worst duty
            let mut worst: BTreeMap<&str, &EquipmentStress> = BTreeMap::new();
            for stress in study.results.iter().flat_map(|r| r.overstressed()) {
                let entry = worst.entry(stress.equipment.as_str()).or_insert(stress);
                if stress.utilization_pct > entry.utilization_pct {
                    *entry = stress;
                }
            }
            recommendations.extend(
                worst
                    .values()
                    .map(|s| recommendations::equipment_upgrade(s, config)),
            );
        }

        if let Some(harmonics) = inputs.harmonics {
            let mut worst: BTreeMap<&BusId, ViolationSeverity> = BTreeMap::new();
            for v in &harmonics.violations {
                let entry = worst.entry(&v.bus).or_insert(v.severity);
                *entry = (*entry).max(v.severity);
            }
            for (bus, severity) in worst {
                let mvar: f64 = network
                    .loads_at_bus(bus)
                    .iter()
                    .filter(|l| l.status)
                    .map(|l| l.reactive_power.value())
                    .sum();
                recommendations.push(recommendations::harmonic_filter(
                    bus.as_str(),
                    severity,
                    mvar,
                    config,
                ));
            }
        }

        recommendations::sort_recommendations(&mut recommendations);
        let cost_estimate = recommendations.iter().map(|r| r.estimated_cost).sum();

        info!(
            recommendations = recommendations.len(),
            single_points_of_failure = spofs.len(),
            cost_estimate,
            "topology analysis complete"
        );

        TopologyOptimization {
            recommendations,
            redundancy_pct,
            redundancy_improvement,
            loss_reduction_mw,
            cost_estimate,
            single_points_of_failure: spofs,
            voltage_violations,
            overloaded_branches,
            load_flow_converged: load_flow.converged,
        }
    }

    fn driving_point_reactance(&self, y: &[Vec<Complex64>], k: usize) -> Option<f64> {
        let mut e = vec![Complex64::new(0.0, 0.0); y.len()];
        e[k] = Complex64::new(1.0, 0.0);
        let z = self.backend.solve_complex(y, &e).ok()?[k];
        (z.im > 1e-9).then_some(z.im)
    }
}

/// Network Y-bus with slack buses held as ideal sources, so Z_kk is the
/// Thevenin impedance seen from bus k.
fn grounded_admittance(model: &SystemModel) -> Option<Vec<Vec<Complex64>>> {
    let mut y = SparseYBus::from_model(model).ok()?.to_dense();
    let zero = Complex64::new(0.0, 0.0);
    for (k, _) in model
        .buses
        .iter()
        .enumerate()
        .filter(|(_, b)| b.bus_type == BusType::Slack)
    {
        for row in y.iter_mut() {
            row[k] = zero;
        }
        y[k].iter_mut().for_each(|entry| *entry = zero);
        y[k][k] = Complex64::new(1.0, 0.0);
    }
    Some(y)
}
