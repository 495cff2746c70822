//! Load-flow result types.

use serde::{Deserialize, Serialize};
use volta_core::{BusId, BusType, Degrees, ElementRef, GeneratorId, Network, PerUnit};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusResult {
    pub id: BusId,
    /// Type after Q-limit enforcement
    pub bus_type: BusType,
    pub voltage_pu: f64,
    pub angle_deg: f64,
    pub voltage_kv: f64,
    /// Net injection into the network (generation minus load)
    pub p_injection_mw: f64,
    pub q_injection_mvar: f64,
    pub load_mw: f64,
    pub load_mvar: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorResult {
    pub id: GeneratorId,
    pub bus: BusId,
    pub p_mw: f64,
    pub q_mvar: f64,
    pub at_q_limit: bool,
}

/// Power flow through one two-terminal element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchFlow {
    pub element: ElementRef,
    pub label: String,
    pub from_bus: BusId,
    pub to_bus: BusId,
    pub p_from_mw: f64,
    pub q_from_mvar: f64,
    pub p_to_mw: f64,
    pub q_to_mvar: f64,
    pub losses_mw: f64,
    pub losses_mvar: f64,
    /// Larger of the two terminal currents
    pub current_pu: f64,
    /// Current relative to the rating at nominal voltage
    pub loading_pct: Option<f64>,
}

impl BranchFlow {
    pub fn is_overloaded(&self, limit_pct: f64) -> bool {
        self.loading_pct.is_some_and(|l| l > limit_pct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationKind {
    Under,
    Over,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageViolation {
    pub bus: BusId,
    pub kind: ViolationKind,
    pub voltage_pu: f64,
    pub limit_pu: f64,
}

impl VoltageViolation {
    /// Distance outside the band, always positive.
    pub fn deviation_pu(&self) -> f64 {
        (self.voltage_pu - self.limit_pu).abs()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoltageProfile {
    pub min_pu: f64,
    pub min_bus: Option<BusId>,
    pub max_pu: f64,
    pub max_bus: Option<BusId>,
    pub average_pu: f64,
    pub violations: Vec<VoltageViolation>,
}

impl VoltageProfile {
    /// Summarize `(bus, |V|, (vmin, vmax))` triples.
    pub fn from_voltages<'a>(
        voltages: impl IntoIterator<Item = (&'a BusId, f64, (f64, f64))>,
    ) -> Self {
        let mut profile = VoltageProfile {
            min_pu: f64::INFINITY,
            max_pu: f64::NEG_INFINITY,
            ..Default::default()
        };
        let mut sum = 0.0;
        let mut count = 0usize;
        for (bus, v, (vmin, vmax)) in voltages {
            if v < profile.min_pu {
                profile.min_pu = v;
                profile.min_bus = Some(bus.clone());
            }
            if v > profile.max_pu {
                profile.max_pu = v;
                profile.max_bus = Some(bus.clone());
            }
            sum += v;
            count += 1;
            if v < vmin {
                profile.violations.push(VoltageViolation {
                    bus: bus.clone(),
                    kind: ViolationKind::Under,
                    voltage_pu: v,
                    limit_pu: vmin,
                });
            } else if v > vmax {
                profile.violations.push(VoltageViolation {
                    bus: bus.clone(),
                    kind: ViolationKind::Over,
                    voltage_pu: v,
                    limit_pu: vmax,
                });
            }
        }
        if count == 0 {
            return VoltageProfile::default();
        }
        profile.average_pu = sum / count as f64;
        profile
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// Outcome of a load-flow study.
///
/// A run that hits the iteration limit still produces a result with
/// `converged == false`; its voltages are the last iterate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadFlowResult {
    pub converged: bool,
    pub iterations: usize,
    /// Largest per-unit power mismatch at the final iterate
    pub max_mismatch: f64,
    pub buses: Vec<BusResult>,
    pub generators: Vec<GeneratorResult>,
    pub branches: Vec<BranchFlow>,
    pub total_generation_mw: f64,
    pub total_generation_mvar: f64,
    pub total_load_mw: f64,
    pub total_load_mvar: f64,
    pub total_losses_mw: f64,
    pub total_losses_mvar: f64,
    /// Active power absorbed by bus shunts
    pub total_shunt_mw: f64,
    pub voltage_profile: VoltageProfile,
    /// Buses switched from PV to PQ by generator Q limits
    pub pv_to_pq: Vec<BusId>,
}

impl LoadFlowResult {
    pub fn bus(&self, id: &BusId) -> Option<&BusResult> {
        self.buses.iter().find(|b| &b.id == id)
    }

    pub fn branch(&self, label: &str) -> Option<&BranchFlow> {
        self.branches.iter().find(|b| b.label == label)
    }

    pub fn generator(&self, id: &GeneratorId) -> Option<&GeneratorResult> {
        self.generators.iter().find(|g| &g.id == id)
    }

    /// Generation − load − losses − shunt consumption, in MW.
    pub fn power_balance_error_mw(&self) -> f64 {
        self.total_generation_mw - self.total_load_mw - self.total_losses_mw - self.total_shunt_mw
    }

    pub fn max_loading_pct(&self) -> Option<f64> {
        self.branches
            .iter()
            .filter_map(|b| b.loading_pct)
            .fold(None, |acc, l| Some(acc.map_or(l, |a: f64| a.max(l))))
    }

    pub fn overloaded_branches(&self, limit_pct: f64) -> impl Iterator<Item = &BranchFlow> {
        self.branches
            .iter()
            .filter(move |b| b.is_overloaded(limit_pct))
    }

    /// Write solved voltages back onto the network's buses so a later run
    /// can start from them with `flat_start = false`.
    pub fn apply_to(&self, network: &mut Network) {
        for bus in &self.buses {
            if let Some(target) = network.bus_mut(&bus.id) {
                target.voltage_pu = PerUnit(bus.voltage_pu);
                target.angle_deg = Degrees(bus.angle_deg);
            }
        }
    }
}
