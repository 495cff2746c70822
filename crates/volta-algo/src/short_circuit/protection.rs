//! Protection coordination under a given fault.
//!
//! Each in-service device sees the largest phase current through the element
//! it protects. For every device with an upstream backup, the coordination
//! margin is
//!
//! ```text
//! margin = t_upstream − t_downstream
//! ```
//!
//! A margin at or below `fatal_margin_s`, or a backup that operates while
//! the primary device does not, is fatal. A margin below
//! `min_coordination_margin_s` is a warning.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use volta_core::{DeviceId, ProtectiveDevice};

use super::solver::FaultSolution;
use crate::config::ProtectionConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceOperation {
    pub device: DeviceId,
    pub current_a: f64,
    /// `None` when the current is below pickup
    pub operating_time_s: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationPair {
    pub downstream: DeviceId,
    pub upstream: DeviceId,
    pub downstream_time_s: Option<f64>,
    pub upstream_time_s: Option<f64>,
    /// Defined when both devices operate
    pub margin_s: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationSeverity {
    Warning,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationProblem {
    pub downstream: DeviceId,
    pub upstream: DeviceId,
    pub margin_s: Option<f64>,
    pub severity: CoordinationSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectionCoordination {
    pub operations: Vec<DeviceOperation>,
    pub pairs: Vec<CoordinationPair>,
    pub problems: Vec<CoordinationProblem>,
    /// No fatal problems
    pub coordinated: bool,
}

impl ProtectionCoordination {
    pub fn fatal_count(&self) -> usize {
        self.problems
            .iter()
            .filter(|p| p.severity == CoordinationSeverity::Fatal)
            .count()
    }
}

/// Operating times and coordination margins for one fault.
pub fn evaluate_coordination(
    devices: &[&ProtectiveDevice],
    solution: &FaultSolution,
    config: &ProtectionConfig,
) -> ProtectionCoordination {
    let operations: Vec<DeviceOperation> = devices
        .iter()
        .filter(|d| d.status)
        .map(|device| {
            let current_a = solution
                .branch_currents
                .iter()
                .filter(|c| c.element == device.location)
                .map(|c| c.max_phase_ka * 1000.0)
                .fold(0.0, f64::max);
            DeviceOperation {
                device: device.id.clone(),
                current_a,
                operating_time_s: device.operating_time(current_a),
            }
        })
        .collect();

    let by_id: HashMap<&DeviceId, &DeviceOperation> =
        operations.iter().map(|op| (&op.device, op)).collect();

    let mut pairs = Vec::new();
    let mut problems = Vec::new();
    for device in devices.iter().filter(|d| d.status) {
        let Some(upstream_id) = &device.upstream else {
            continue;
        };
        let (Some(down), Some(up)) = (by_id.get(&device.id), by_id.get(upstream_id)) else {
            continue;
        };
        if down.current_a <= 0.0 || up.current_a <= 0.0 {
            continue;
        }
        let margin_s = match (down.operating_time_s, up.operating_time_s) {
            (Some(t_down), Some(t_up)) => Some(t_up - t_down),
            _ => None,
        };
        pairs.push(CoordinationPair {
            downstream: device.id.clone(),
            upstream: upstream_id.clone(),
            downstream_time_s: down.operating_time_s,
            upstream_time_s: up.operating_time_s,
            margin_s,
        });

        let problem = match (margin_s, down.operating_time_s, up.operating_time_s) {
            (Some(m), _, _) if m <= 0.0 => Some((
                CoordinationSeverity::Fatal,
                format!("upstream {upstream_id} operates {:.3} s before {}", -m, device.id),
            )),
            (Some(m), _, _) if m <= config.fatal_margin_s => Some((
                CoordinationSeverity::Fatal,
                format!(
                    "margin {m:.3} s between {} and {upstream_id} is at or below {:.3} s",
                    device.id, config.fatal_margin_s
                ),
            )),
            (Some(m), _, _) if m < config.min_coordination_margin_s => Some((
                CoordinationSeverity::Warning,
                format!(
                    "margin {m:.3} s between {} and {upstream_id} is below {:.3} s",
                    device.id, config.min_coordination_margin_s
                ),
            )),
            (None, None, Some(_)) => Some((
                CoordinationSeverity::Fatal,
                format!("{} does not pick up; backup {upstream_id} clears the fault", device.id),
            )),
            _ => None,
        };
        if let Some((severity, message)) = problem {
            debug!(downstream = %device.id, upstream = %upstream_id, ?severity, "{message}");
            problems.push(CoordinationProblem {
                downstream: device.id.clone(),
                upstream: upstream_id.clone(),
                margin_s,
                severity,
                message,
            });
        }
    }

    let coordinated = !problems
        .iter()
        .any(|p| p.severity == CoordinationSeverity::Fatal);
    ProtectionCoordination {
        operations,
        pairs,
        problems,
        coordinated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrefaultMode;
    use crate::short_circuit::solver::{BranchFaultCurrent, TheveninImpedances};
    use num_complex::Complex64;
    use volta_core::{ElementRef, FaultType, SequenceComponents, TripCurve};

    fn solution(currents: &[(&str, f64)]) -> FaultSolution {
        let zero = Complex64::new(0.0, 0.0);
        FaultSolution {
            fault_bus: "F".into(),
            fault_type: FaultType::ThreePhase,
            prefault_voltage: Complex64::new(1.0, 0.0),
            prefault_source: PrefaultMode::Flat,
            thevenin: TheveninImpedances { z1: zero, z2: zero, z0: zero },
            fault_current: SequenceComponents::default(),
            phase_currents_pu: [0.0; 3],
            fault_current_pu: 0.0,
            fault_current_ka: 0.0,
            fault_mva: 0.0,
            base_current_ka: 0.0,
            bus_voltages: Vec::new(),
            branch_currents: currents
                .iter()
                .map(|(id, ka)| BranchFaultCurrent {
                    element: ElementRef::Branch((*id).into()),
                    label: id.to_string(),
                    from_bus: "A".into(),
                    to_bus: "B".into(),
                    sequence: SequenceComponents::default(),
                    phase_pu: [0.0; 3],
                    max_phase_ka: *ka,
                })
                .collect(),
        }
    }

    fn definite(id: &str, line: &str, seconds: f64) -> ProtectiveDevice {
        ProtectiveDevice::new(
            id,
            ElementRef::Branch(line.into()),
            TripCurve::DefiniteTime { seconds },
            100.0,
        )
    }

    #[test]
    fn margin_classification() {
        let config = ProtectionConfig::default();
        let sol = solution(&[("L1", 2.0), ("L2", 2.0)]);

        let cases = [
            (0.5, None),
            (0.2, Some(CoordinationSeverity::Warning)),
            (0.05, Some(CoordinationSeverity::Fatal)),
            (-0.1, Some(CoordinationSeverity::Fatal)),
        ];
        for (margin, expected) in cases {
            let down = definite("R1", "L2", 0.2).with_upstream("R2");
            let up = definite("R2", "L1", 0.2 + margin);
            let result = evaluate_coordination(&[&down, &up], &sol, &config);
            assert_eq!(result.pairs.len(), 1);
            assert!((result.pairs[0].margin_s.unwrap() - margin).abs() < 1e-12);
            assert_eq!(result.problems.first().map(|p| p.severity), expected, "margin {margin}");
            assert_eq!(result.coordinated, expected != Some(CoordinationSeverity::Fatal));
        }
    }

    #[test]
    fn backup_tripping_alone_is_fatal() {
        let config = ProtectionConfig::default();
        // 500 A through L2 is below the 1000 A pickup of R1
        let sol = solution(&[("L1", 0.5), ("L2", 0.5)]);
        let mut down = definite("R1", "L2", 0.1).with_upstream("R2");
        down.pickup_a = 1000.0;
        let up = definite("R2", "L1", 0.5);
        let result = evaluate_coordination(&[&down, &up], &sol, &config);
        assert_eq!(result.fatal_count(), 1);
        assert!(result.problems[0].margin_s.is_none());
    }

    #[test]
    fn inverse_time_relays_see_branch_current() {
        let config = ProtectionConfig::default();
        let sol = solution(&[("L1", 4.0)]);
        let relay = ProtectiveDevice::new(
            "R1",
            ElementRef::Branch("L1".into()),
            TripCurve::IeeeVeryInverse,
            400.0,
        );
        let result = evaluate_coordination(&[&relay], &sol, &config);
        let op = &result.operations[0];
        assert!((op.current_a - 4000.0).abs() < 1e-9);
        // M = 10: 19.61/99 + 0.491
        let expected = 19.61 / 99.0 + 0.491;
        assert!((op.operating_time_s.unwrap() - expected).abs() < 1e-9);
        assert!(result.pairs.is_empty());
    }
}
