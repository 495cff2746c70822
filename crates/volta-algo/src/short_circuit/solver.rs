//! Fault currents from Thevenin sequence impedances.
//!
//! For a fault at bus f the driving-point impedances Z1, Z2, Z0 are the
//! diagonal entries of the sequence Z-bus, obtained by solving Y·z = e_f.
//! The same column gives the transfer impedances used for post-fault
//! voltages at every other bus:
//!
//! ```text
//! 3φ   I1 = Vf / (Z1 + Zf)
//! SLG  I0 = I1 = I2 = Vf / (Z1 + Z2 + Z0 + 3Zf)
//! LL   I1 = −I2 = Vf / (Z1 + Z2 + Zf)
//! LLG  I1 = Vf / (Z1 + Z2 ∥ (Z0 + 3Zf))
//!      I2 = −I1 · (Z0 + 3Zf) / (Z2 + Z0 + 3Zf)
//!      I0 = −I1 · Z2 / (Z2 + Z0 + 3Zf)
//!
//! V1_k = Vpre_k − Z1_kf·I1    V2_k = −Z2_kf·I2    V0_k = −Z0_kf·I0
//! ```
//!
//! Branch currents are the fault-driven change only; pre-fault load current
//! is not added.

use std::collections::VecDeque;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;
use volta_core::{
    base_current_ka, BusId, BusType, ElementRef, FaultType, Kilovolts, LinearSystemBackend,
    SequenceComponents, VoltaError, VoltaResult,
};

use super::sequence::SequenceNetworks;
use crate::config::PrefaultMode;
use crate::model::SystemModel;

/// Driving-point impedance above which a bus is treated as unreachable.
pub const OPEN_CIRCUIT_IMPEDANCE: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TheveninImpedances {
    pub z1: Complex64,
    pub z2: Complex64,
    pub z0: Complex64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusFaultVoltage {
    pub bus: BusId,
    pub sequence: SequenceComponents,
    /// Phase a, b, c magnitudes in pu
    pub phase_pu: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchFaultCurrent {
    pub element: ElementRef,
    pub label: String,
    pub from_bus: BusId,
    pub to_bus: BusId,
    /// Sequence currents entering at the from terminal
    pub sequence: SequenceComponents,
    pub phase_pu: [f64; 3],
    /// Largest phase current at either terminal, kA on the terminal's base
    pub max_phase_ka: f64,
}

/// Solution of one fault before equipment and protection checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultSolution {
    pub fault_bus: BusId,
    pub fault_type: FaultType,
    pub prefault_voltage: Complex64,
    pub prefault_source: PrefaultMode,
    pub thevenin: TheveninImpedances,
    pub fault_current: SequenceComponents,
    pub phase_currents_pu: [f64; 3],
    /// Largest phase current at the fault
    pub fault_current_pu: f64,
    pub fault_current_ka: f64,
    pub fault_mva: f64,
    pub base_current_ka: f64,
    pub bus_voltages: Vec<BusFaultVoltage>,
    pub branch_currents: Vec<BranchFaultCurrent>,
}

/// Sequence fault currents for the given Thevenin impedances.
pub fn fault_currents(
    fault_type: FaultType,
    vf: Complex64,
    z: &TheveninImpedances,
    zf: Complex64,
) -> SequenceComponents {
    let zero = Complex64::new(0.0, 0.0);
    match fault_type {
        FaultType::ThreePhase => SequenceComponents::new(zero, vf / (z.z1 + zf), zero),
        FaultType::LineToGround => {
            let i = vf / (z.z1 + z.z2 + z.z0 + zf * 3.0);
            SequenceComponents::new(i, i, i)
        }
        FaultType::LineToLine => {
            let i1 = vf / (z.z1 + z.z2 + zf);
            SequenceComponents::new(zero, i1, -i1)
        }
        FaultType::LineToLineToGround => {
            let z0g = z.z0 + zf * 3.0;
            let parallel = z.z2 * z0g / (z.z2 + z0g);
            let i1 = vf / (z.z1 + parallel);
            let i2 = -i1 * z0g / (z.z2 + z0g);
            let i0 = -i1 * z.z2 / (z.z2 + z0g);
            SequenceComponents::new(i0, i1, i2)
        }
    }
}

/// Thevenin solver over prepared sequence networks.
pub struct ShortCircuitSolver<'a> {
    model: &'a SystemModel,
    networks: SequenceNetworks,
    dense: [Vec<Vec<Complex64>>; 3],
    prefault: Vec<Complex64>,
    prefault_source: PrefaultMode,
    fault_impedance: Complex64,
    backend: &'a dyn LinearSystemBackend,
}

impl<'a> ShortCircuitSolver<'a> {
    pub fn new(
        model: &'a SystemModel,
        prefault: Vec<Complex64>,
        prefault_source: PrefaultMode,
        fault_impedance: Complex64,
        backend: &'a dyn LinearSystemBackend,
    ) -> VoltaResult<Self> {
        if prefault.len() != model.n_bus() {
            return Err(VoltaError::Parameter(format!(
                "pre-fault voltage vector has {} entries for {} buses",
                prefault.len(),
                model.n_bus()
            )));
        }
        let networks = SequenceNetworks::build(model)?;
        let dense = [
            networks.positive.to_dense(),
            networks.negative.to_dense(),
            networks.zero.to_dense(),
        ];
        Ok(Self {
            model,
            networks,
            dense,
            prefault,
            prefault_source,
            fault_impedance,
            backend,
        })
    }

    pub fn networks(&self) -> &SequenceNetworks {
        &self.networks
    }

    /// Column `f` of the Z-bus for sequence `k` (0 = positive, 1 = negative,
    /// 2 = zero).
    fn z_column(&self, k: usize, f: usize) -> VoltaResult<Vec<Complex64>> {
        let n = self.model.n_bus();
        let mut e = vec![Complex64::new(0.0, 0.0); n];
        e[f] = Complex64::new(1.0, 0.0);
        self.backend
            .solve_complex(&self.dense[k], &e)
            .map_err(|err| match err {
                VoltaError::Numerical(msg) => {
                    VoltaError::Numerical(format!("singular sequence network: {msg}"))
                }
                other => other,
            })
    }

    pub fn solve(&self, fault_bus: &BusId, fault_type: FaultType) -> VoltaResult<FaultSolution> {
        let f = self
            .model
            .bus_index(fault_bus)
            .filter(|&i| !self.model.buses[i].auxiliary)
            .ok_or_else(|| VoltaError::Parameter(format!("unknown fault bus '{fault_bus}'")))?;

        if fault_type.involves_ground() && !self.networks.missing_zero_data.is_empty() {
            return Err(VoltaError::Parameter(format!(
                "{fault_type} fault needs zero-sequence data for: {}",
                self.networks.missing_zero_data.join(", ")
            )));
        }
        if self.networks.positive_sources == 0 {
            return Err(VoltaError::Parameter(
                "no generator with short-circuit data; positive sequence network has no source"
                    .into(),
            ));
        }

        let z1_col = self.z_column(0, f)?;
        let z2_col = self.z_column(1, f)?;
        let z0_col = if fault_type.involves_ground() {
            self.z_column(2, f)?
        } else {
            vec![Complex64::new(0.0, 0.0); self.model.n_bus()]
        };
        let thevenin = TheveninImpedances {
            z1: z1_col[f],
            z2: z2_col[f],
            z0: z0_col[f],
        };

        if thevenin.z1.norm() > OPEN_CIRCUIT_IMPEDANCE {
            return Err(VoltaError::Parameter(format!(
                "no fault current source reaches bus '{fault_bus}'"
            )));
        }
        if fault_type.involves_ground() && thevenin.z0.norm() > OPEN_CIRCUIT_IMPEDANCE {
            return Err(VoltaError::Parameter(format!(
                "no zero-sequence path to ground at bus '{fault_bus}'"
            )));
        }

        let vf = self.prefault[f];
        let current = fault_currents(fault_type, vf, &thevenin, self.fault_impedance);
        let phases = current.to_phases();
        let fault_current_pu = phases.max_magnitude();
        let kv = Kilovolts(self.model.buses[f].base_kv);
        let i_base = base_current_ka(self.model.base_mva, kv).value();

        debug!(
            bus = %fault_bus,
            fault = %fault_type,
            z1 = thevenin.z1.norm(),
            current_pu = fault_current_pu,
            "solved fault"
        );

        // Sequence voltages: positive is the fault-driven change until the
        // pre-fault voltage is added for reporting.
        let n = self.model.n_bus();
        let dv1: Vec<Complex64> = (0..n).map(|k| -z1_col[k] * current.positive).collect();
        let v2: Vec<Complex64> = (0..n).map(|k| -z2_col[k] * current.negative).collect();
        let v0: Vec<Complex64> = (0..n).map(|k| -z0_col[k] * current.zero).collect();

        let bus_voltages = self
            .model
            .reported_buses()
            .map(|(k, bus)| {
                let sequence = SequenceComponents::new(v0[k], self.prefault[k] + dv1[k], v2[k]);
                BusFaultVoltage {
                    bus: bus.id.clone(),
                    sequence,
                    phase_pu: sequence.to_phases().magnitudes(),
                }
            })
            .collect();

        let branch_currents = self
            .model
            .branches
            .iter()
            .enumerate()
            .map(|(idx, branch)| {
                let positive = &self.networks.positive_stamps[idx];
                let negative = &self.networks.negative_stamps[idx];
                let zero_stamp = self.networks.zero_stamps[idx];
                let from_seq = SequenceComponents::new(
                    zero_stamp.map_or(Complex64::new(0.0, 0.0), |s| {
                        if s.from == branch.from {
                            s.from_current(&v0)
                        } else {
                            Complex64::new(0.0, 0.0)
                        }
                    }),
                    positive.from_current(&dv1),
                    negative.from_current(&v2),
                );
                let to_seq = SequenceComponents::new(
                    zero_stamp.map_or(Complex64::new(0.0, 0.0), |s| {
                        if s.from == s.to {
                            if s.from == branch.to {
                                s.from_current(&v0)
                            } else {
                                Complex64::new(0.0, 0.0)
                            }
                        } else {
                            s.to_current(&v0)
                        }
                    }),
                    positive.to_current(&dv1),
                    negative.to_current(&v2),
                );
                let from_phase = from_seq.to_phases().max_magnitude();
                let to_phase = to_seq.to_phases().max_magnitude();
                let from_base = base_current_ka(
                    self.model.base_mva,
                    Kilovolts(self.model.buses[branch.from].base_kv),
                )
                .value();
                let to_base = base_current_ka(
                    self.model.base_mva,
                    Kilovolts(self.model.buses[branch.to].base_kv),
                )
                .value();
                BranchFaultCurrent {
                    element: branch.element.clone(),
                    label: branch.label.clone(),
                    from_bus: self.model.buses[branch.from].id.clone(),
                    to_bus: self.model.buses[branch.to].id.clone(),
                    sequence: from_seq,
                    phase_pu: from_seq.to_phases().magnitudes(),
                    max_phase_ka: f64::max(from_phase * from_base, to_phase * to_base),
                }
            })
            .collect();

        Ok(FaultSolution {
            fault_bus: fault_bus.clone(),
            fault_type,
            prefault_voltage: vf,
            prefault_source: self.prefault_source,
            thevenin,
            fault_current: current,
            phase_currents_pu: phases.magnitudes(),
            fault_current_pu,
            fault_current_ka: fault_current_pu * i_base,
            fault_mva: fault_current_pu * vf.norm() * self.model.base_mva,
            base_current_ka: i_base,
            bus_voltages,
            branch_currents,
        })
    }
}

/// 1.0 pu at every bus, with angles rotated through transformer phase
/// shifts outward from the slack buses.
pub fn flat_prefault(model: &SystemModel) -> Vec<Complex64> {
    let n = model.n_bus();
    let mut angle: Vec<Option<f64>> = vec![None; n];
    let mut queue = VecDeque::new();
    for (i, bus) in model.buses.iter().enumerate() {
        if bus.bus_type == BusType::Slack {
            angle[i] = Some(bus.initial_angle_rad);
            queue.push_back(i);
        }
    }
    while let Some(i) = queue.pop_front() {
        let Some(theta) = angle[i] else { continue };
        for branch in &model.branches {
            // No-load voltage across a shifter: θ_to = θ_from − φ
            let (next, next_theta) = if branch.from == i {
                (branch.to, theta - branch.shift_rad)
            } else if branch.to == i {
                (branch.from, theta + branch.shift_rad)
            } else {
                continue;
            };
            if angle[next].is_none() {
                angle[next] = Some(next_theta);
                queue.push_back(next);
            }
        }
    }
    angle
        .into_iter()
        .map(|theta| Complex64::from_polar(1.0, theta.unwrap_or(0.0)))
        .collect()
}
