//! Positive, negative and zero sequence networks.
//!
//! Fault networks neglect loads, line charging and bus shunts. Sources
//! enter as shunt admittances at their terminal bus:
//!
//! | Source              | Positive          | Negative     | Zero                 |
//! |---------------------|-------------------|--------------|----------------------|
//! | Synchronous machine | 1/(ra + jx''d)    | 1/(ra + jx2) | 1/(ra + jx0 + 3Zn)   |
//! | Induction / wind    | 1/(ra + jx''d)    | same         | none                 |
//! | Inverter / PV       | current-limited   | none         | none                 |
//!
//! Machine data is on the machine base and is converted to the system base
//! here. Every diagonal carries a tiny leak to ground so that a region with
//! no path to ground yields a very large (but finite) driving-point
//! impedance instead of a singular matrix.

use num_complex::Complex64;
use tracing::{debug, warn};
use volta_core::{BranchKind, GeneratorKind, VoltaResult};

use crate::model::{SystemModel, ZeroSequencePath};
use crate::sparse::{BranchStamp, SparseYBus};

/// Admittance from every bus to ground added to keep the matrices regular.
pub const GROUND_LEAK: f64 = 1e-9;

/// Default inverter fault-current ceiling, per-unit of rating.
pub const DEFAULT_INVERTER_LIMIT_PU: f64 = 1.2;

#[derive(Debug, Clone)]
pub struct SequenceNetworks {
    pub positive: SparseYBus,
    pub negative: SparseYBus,
    pub zero: SparseYBus,
    /// Positive-sequence stamps aligned with `SystemModel::branches`
    pub positive_stamps: Vec<BranchStamp>,
    /// Negative-sequence stamps; phase shifts act in the opposite direction
    pub negative_stamps: Vec<BranchStamp>,
    /// Zero-sequence stamps aligned with `SystemModel::branches`
    pub zero_stamps: Vec<Option<BranchStamp>>,
    /// In-service lines and cables without zero-sequence data
    pub missing_zero_data: Vec<String>,
    /// Number of sources contributing positive-sequence current
    pub positive_sources: usize,
    /// Number of sources with a grounded neutral
    pub grounded_sources: usize,
}

impl SequenceNetworks {
    pub fn build(model: &SystemModel) -> VoltaResult<Self> {
        let n = model.n_bus();
        let base = model.base_mva;

        // Shifts stay in so fault changes share the load-flow angle frame
        let positive_stamps: Vec<BranchStamp> = model
            .branches
            .iter()
            .map(|b| BranchStamp::pi_model(b.from, b.to, b.y_series(), 0.0, b.tap, b.shift_rad))
            .collect();
        let negative_stamps: Vec<BranchStamp> = model
            .branches
            .iter()
            .map(|b| BranchStamp::pi_model(b.from, b.to, b.y_series(), 0.0, b.tap, -b.shift_rad))
            .collect();

        let mut missing_zero_data = Vec::new();
        let zero_stamps: Vec<Option<BranchStamp>> = model
            .branches
            .iter()
            .map(|b| match b.zero_sequence {
                ZeroSequencePath::Series { z0, .. } if z0.norm() > 1e-12 => Some(
                    BranchStamp::pi_model(b.from, b.to, z0.inv(), 0.0, b.tap, 0.0),
                ),
                ZeroSequencePath::ShuntFrom(z) if z.norm() > 1e-12 => {
                    Some(BranchStamp::shunt(b.from, z.inv()))
                }
                ZeroSequencePath::ShuntTo(z) if z.norm() > 1e-12 => {
                    Some(BranchStamp::shunt(b.to, z.inv()))
                }
                ZeroSequencePath::Unknown => {
                    if b.kind != BranchKind::Transformer {
                        missing_zero_data.push(b.label.clone());
                    }
                    None
                }
                _ => None,
            })
            .collect();

        let leak = Complex64::new(GROUND_LEAK, 0.0);
        let mut positive_shunts: Vec<(usize, Complex64)> = (0..n).map(|i| (i, leak)).collect();
        let mut negative_shunts = positive_shunts.clone();
        let mut zero_shunts = positive_shunts.clone();
        let mut positive_sources = 0;
        let mut grounded_sources = 0;

        for gen in &model.generators {
            let scale = gen.impedance_scale(base);
            if gen.kind.is_inverter_based() {
                let limit = gen
                    .fault_current_limit_pu
                    .unwrap_or(DEFAULT_INVERTER_LIMIT_PU);
                if limit > 0.0 {
                    positive_shunts.push((gen.bus, Complex64::new(0.0, 1.0 / limit * scale).inv()));
                    positive_sources += 1;
                }
                continue;
            }
            let Some(x) = gen.reactances else {
                warn!(generator = %gen.id, "no machine reactances; generator ignored in fault study");
                continue;
            };
            let z1 = Complex64::new(x.ra, x.xd_double_prime) * scale;
            positive_shunts.push((gen.bus, z1.inv()));
            positive_sources += 1;
            match gen.kind {
                GeneratorKind::Induction | GeneratorKind::Wind => {
                    negative_shunts.push((gen.bus, z1.inv()));
                }
                _ => {
                    let z2 = Complex64::new(x.ra, x.negative_sequence()) * scale;
                    negative_shunts.push((gen.bus, z2.inv()));
                    if let Some(zn) = gen.grounding.neutral_impedance() {
                        let z0 = (Complex64::new(x.ra, x.zero_sequence()) + zn * 3.0) * scale;
                        if z0.norm() > 1e-12 {
                            zero_shunts.push((gen.bus, z0.inv()));
                            grounded_sources += 1;
                        }
                    }
                }
            }
        }

        let zero_branch: Vec<BranchStamp> = zero_stamps.iter().flatten().copied().collect();
        grounded_sources += zero_branch.iter().filter(|s| s.from == s.to).count();

        debug!(
            positive_sources,
            grounded_sources,
            missing_zero = missing_zero_data.len(),
            "built sequence networks"
        );

        Ok(Self {
            positive: SparseYBus::from_stamps(n, &positive_stamps, &positive_shunts)?,
            negative: SparseYBus::from_stamps(n, &negative_stamps, &negative_shunts)?,
            zero: SparseYBus::from_stamps(n, &zero_branch, &zero_shunts)?,
            positive_stamps,
            negative_stamps,
            zero_stamps,
            missing_zero_data,
            positive_sources,
            grounded_sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volta_core::{
        Branch, Bus, BusType, Generator, Grounding, Kilovolts, MachineReactances, Network,
        Transformer, WindingConnection,
    };

    fn machine() -> Generator {
        Generator::new("G1", "HV", GeneratorKind::Synchronous)
            .with_reactances(MachineReactances::round_rotor(1.8, 0.3, 0.2, 0.1))
    }

    fn with_transformer(from: WindingConnection, to: WindingConnection) -> SystemModel {
        let mut network = Network::new();
        network.add_bus(Bus::new("HV", BusType::Slack, Kilovolts(69.0)));
        network.add_bus(Bus::new("LV", BusType::Pq, Kilovolts(13.8)));
        network.add_generator(machine());
        network
            .add_transformer(
                Transformer::new("T1", "HV", "LV", 100.0, 69.0, 13.8, 0.0, 0.1)
                    .with_connections(from, to),
            )
            .unwrap();
        SystemModel::compile(&network).unwrap()
    }

    fn zero_driving_point(model: &SystemModel, bus: &str) -> f64 {
        let networks = SequenceNetworks::build(model).unwrap();
        let i = model.bus_index(&bus.into()).unwrap();
        // Large when only the ground leak connects the bus to ground
        1.0 / networks.zero.y(i, i).norm()
    }

    #[test]
    fn delta_winding_blocks_zero_sequence() {
        // Delta on HV, grounded wye on LV: zero-sequence current flows on
        // the LV side only.
        let model = with_transformer(WindingConnection::Delta, WindingConnection::WyeGrounded);
        assert!(zero_driving_point(&model, "LV") < 1.0);
        let networks = SequenceNetworks::build(&model).unwrap();
        let hv = model.bus_index(&"HV".into()).unwrap();
        let lv = model.bus_index(&"LV".into()).unwrap();
        assert_eq!(networks.zero.y(hv, lv), Complex64::new(0.0, 0.0));
    }

    #[test]
    fn ungrounded_wye_is_open_in_zero_sequence() {
        let model = with_transformer(WindingConnection::Wye, WindingConnection::WyeGrounded);
        assert!(zero_driving_point(&model, "LV") > 1e6);
        let model = with_transformer(WindingConnection::Delta, WindingConnection::Delta);
        assert!(zero_driving_point(&model, "LV") > 1e6);
    }

    #[test]
    fn grounded_wye_pair_passes_zero_sequence() {
        let model = with_transformer(WindingConnection::WyeGrounded, WindingConnection::WyeGrounded);
        let networks = SequenceNetworks::build(&model).unwrap();
        let hv = model.bus_index(&"HV".into()).unwrap();
        let lv = model.bus_index(&"LV".into()).unwrap();
        assert!(networks.zero.y(hv, lv).norm() > 1.0);
        assert_eq!(networks.grounded_sources, 1);
    }

    #[test]
    fn ungrounded_generator_has_no_zero_sequence() {
        let mut network = Network::new();
        network.add_bus(Bus::new("HV", BusType::Slack, Kilovolts(69.0)));
        network.add_generator(machine().with_grounding(Grounding::Ungrounded));
        let model = SystemModel::compile(&network).unwrap();
        let networks = SequenceNetworks::build(&model).unwrap();
        assert_eq!(networks.grounded_sources, 0);
        assert_eq!(networks.positive_sources, 1);
        assert!(1.0 / networks.zero.y(0, 0).norm() > 1e6);
    }

    #[test]
    fn inverter_contributes_limited_positive_sequence_only() {
        let mut network = Network::new();
        network.add_bus(Bus::new("PCC", BusType::Slack, Kilovolts(13.8)));
        network.add_generator(
            Generator::new("PV1", "PCC", GeneratorKind::Pv)
                .with_rating(10.0)
                .with_fault_current_limit(1.5),
        );
        let model = SystemModel::compile(&network).unwrap();
        let networks = SequenceNetworks::build(&model).unwrap();
        // 1.5 pu on 10 MVA is 0.15 pu on the 100 MVA base
        assert!((networks.positive.y(0, 0).norm() - 0.15).abs() < 1e-6);
        assert!(networks.negative.y(0, 0).norm() < 1e-6);
    }

    #[test]
    fn lines_without_zero_data_are_reported() {
        let mut network = Network::new();
        network.add_bus(Bus::new("HV", BusType::Slack, Kilovolts(69.0)));
        network.add_bus(Bus::new("B2", BusType::Pq, Kilovolts(69.0)));
        network.add_generator(machine());
        network.add_branch(Branch::new("L1", "HV", "B2", 0.01, 0.05)).unwrap();
        let model = SystemModel::compile(&network).unwrap();
        let networks = SequenceNetworks::build(&model).unwrap();
        assert_eq!(networks.missing_zero_data, vec!["L1".to_string()]);
    }
}
