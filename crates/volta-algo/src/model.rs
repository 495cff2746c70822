//! Compiled, index-based view of a [`Network`].
//!
//! Solvers work on dense bus indices rather than string ids. Compiling a
//! network validates it, resolves every id once, converts element data to
//! per-unit on the system base and expands three-winding transformers to a
//! star of two-terminal legs around an auxiliary bus. The compiled model is
//! immutable; solver working state lives in the solvers.
//!
//! ## Transformer conversion
//!
//! ```text
//! z_sys = z_own · (S_base / S_rated) · (kV_lv / kV_bus,to)²
//! τ     = (1 + pos·step/100) · (kV_hv / kV_bus,from) / (kV_lv / kV_bus,to)
//! ```
//!
//! The tap sits on the from (HV) side, matching the π-model stamp in
//! [`crate::sparse::BranchStamp::pi_model`].

use std::collections::HashMap;

use num_complex::Complex64;
use tracing::{debug, warn};
use volta_core::{
    BranchKind, Bus, BusId, BusType, Diagnostics, ElementRef, Generator, GeneratorId,
    GeneratorKind, Grounding, HarmonicSpectrum, LoadId, LoadModel, MachineReactances, Network,
    Transformer, VoltaResult, WindingConnection,
};

use crate::sparse::BranchStamp;

/// Zero-sequence behaviour of a two-terminal element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZeroSequencePath {
    /// Series impedance between the terminals (with total charging)
    Series { z0: Complex64, b0: f64 },
    /// Shunt to ground at the from terminal only
    ShuntFrom(Complex64),
    /// Shunt to ground at the to terminal only
    ShuntTo(Complex64),
    /// No zero-sequence current can flow
    Open,
    /// Line or cable without zero-sequence data
    Unknown,
}

#[derive(Debug, Clone)]
pub struct BusModel {
    pub id: BusId,
    pub bus_type: BusType,
    /// Voltage base for kA conversion
    pub base_kv: f64,
    pub shunt: Complex64,
    pub initial_voltage: f64,
    pub initial_angle_rad: f64,
    pub vmin_pu: Option<f64>,
    pub vmax_pu: Option<f64>,
    pub short_circuit_rating_ka: Option<f64>,
    /// Star point of a three-winding transformer
    pub auxiliary: bool,
}

#[derive(Debug, Clone)]
pub struct LoadData {
    pub id: LoadId,
    pub bus: usize,
    /// Per-unit demand at 1.0 pu voltage, frequency factors applied
    pub p_pu: f64,
    pub q_pu: f64,
    pub model: LoadModel,
    pub harmonics: Option<HarmonicSpectrum>,
    pub demand_current_pu: Option<f64>,
}

impl LoadData {
    /// Load (P, Q) at voltage magnitude `v`.
    pub fn power_at(&self, v: f64) -> (f64, f64) {
        (
            self.p_pu * self.model.p_factor(v).0,
            self.q_pu * self.model.q_factor(v).0,
        )
    }

    /// Derivatives (dP/dV, dQ/dV) at voltage magnitude `v`.
    pub fn sensitivity_at(&self, v: f64) -> (f64, f64) {
        (
            self.p_pu * self.model.p_factor(v).1,
            self.q_pu * self.model.q_factor(v).1,
        )
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorData {
    pub id: GeneratorId,
    pub bus: usize,
    pub kind: GeneratorKind,
    pub rated_mva: f64,
    pub p_pu: f64,
    pub q_pu: f64,
    pub qmin_pu: f64,
    pub qmax_pu: f64,
    pub voltage_setpoint: Option<f64>,
    pub reactances: Option<MachineReactances>,
    pub grounding: Grounding,
    pub fault_current_limit_pu: Option<f64>,
}

impl GeneratorData {
    /// Factor converting machine-base impedance to system base.
    pub fn impedance_scale(&self, base_mva: f64) -> f64 {
        base_mva / self.rated_mva
    }
}

/// A two-terminal element on system base: a line, cable, two-winding
/// transformer, or one leg of a three-winding transformer.
#[derive(Debug, Clone)]
pub struct BranchModel {
    pub element: ElementRef,
    /// Unique label for reporting (`T1:secondary` for star legs)
    pub label: String,
    pub kind: BranchKind,
    pub from: usize,
    pub to: usize,
    pub z_series: Complex64,
    pub charging_b: f64,
    pub tap: f64,
    pub shift_rad: f64,
    pub rating_mva: Option<f64>,
    pub interrupting_rating_ka: Option<f64>,
    pub zero_sequence: ZeroSequencePath,
}

impl BranchModel {
    pub fn y_series(&self) -> Complex64 {
        self.z_series.inv()
    }

    /// Positive-sequence π-model stamp.
    pub fn stamp(&self) -> BranchStamp {
        BranchStamp::pi_model(
            self.from,
            self.to,
            self.y_series(),
            self.charging_b,
            self.tap,
            self.shift_rad,
        )
    }
}

/// Network compiled to per-unit arrays.
#[derive(Debug, Clone)]
pub struct SystemModel {
    pub base_mva: f64,
    pub base_hz: f64,
    pub buses: Vec<BusModel>,
    pub loads: Vec<LoadData>,
    pub generators: Vec<GeneratorData>,
    pub branches: Vec<BranchModel>,
    bus_index: HashMap<BusId, usize>,
    pub diagnostics: Diagnostics,
}

impl SystemModel {
    /// Validate `network` and compile it.
    pub fn compile(network: &Network) -> VoltaResult<Self> {
        let diagnostics = network.validate()?;
        let base_mva = network.base.base_mva;
        let base_hz = network.base.base_hz;
        let delta_f = network
            .settings
            .system_frequency_hz
            .map(|f| (f - base_hz) / base_hz)
            .unwrap_or(0.0);

        let mut buses: Vec<BusModel> = network
            .buses()
            .into_iter()
            .map(|bus| bus_model(bus, network.base.base_kv.value()))
            .collect();
        // Deterministic matrix ordering independent of insertion order
        buses.sort_by(|a, b| a.id.cmp(&b.id));
        let mut bus_index: HashMap<BusId, usize> = buses
            .iter()
            .enumerate()
            .map(|(i, bus)| (bus.id.clone(), i))
            .collect();

        let mut loads = Vec::new();
        for load in network.loads() {
            if !load.status {
                continue;
            }
            let (fp, fq) = load.model.frequency_factors(delta_f);
            loads.push(LoadData {
                id: load.id.clone(),
                bus: bus_index[&load.bus],
                p_pu: load.active_power.to_per_unit(base_mva) * fp,
                q_pu: load.reactive_power.to_per_unit(base_mva) * fq,
                model: load.model,
                harmonics: load.harmonics.clone(),
                demand_current_pu: load.demand_current_pu,
            });
        }

        let generators: Vec<GeneratorData> = network
            .generators()
            .into_iter()
            .filter(|g| g.status)
            .map(|g| generator_data(g, bus_index[&g.bus], base_mva))
            .collect();

        let mut branches = Vec::new();
        for branch in network.branches() {
            if !branch.status {
                continue;
            }
            let zero_sequence = match (branch.kind, branch.zero_sequence) {
                (_, Some(z0)) => ZeroSequencePath::Series {
                    z0: Complex64::new(z0.r0, z0.x0),
                    b0: z0.b0,
                },
                (BranchKind::Transformer, None) => ZeroSequencePath::Open,
                _ => ZeroSequencePath::Unknown,
            };
            branches.push(BranchModel {
                element: ElementRef::Branch(branch.id.clone()),
                label: branch.id.to_string(),
                kind: branch.kind,
                from: bus_index[&branch.from_bus],
                to: bus_index[&branch.to_bus],
                z_series: branch.impedance(),
                charging_b: branch.charging_b,
                tap: branch.tap_ratio,
                shift_rad: branch.phase_shift.to_radians().value(),
                rating_mva: branch.rating_mva.map(|r| r.value()),
                interrupting_rating_ka: branch.interrupting_rating_ka.map(|r| r.value()),
                zero_sequence,
            });
        }

        for tx in network.transformers() {
            if !tx.status {
                continue;
            }
            match &tx.tertiary {
                None => branches.push(two_winding(tx, &buses, &bus_index, base_mva)),
                Some(_) => {
                    let star = buses.len();
                    let star_id = BusId::new(format!("{}#star", tx.id));
                    buses.push(BusModel {
                        id: star_id.clone(),
                        bus_type: BusType::Pq,
                        base_kv: tx.hv_kv.value(),
                        shunt: Complex64::new(0.0, 0.0),
                        initial_voltage: 1.0,
                        initial_angle_rad: 0.0,
                        vmin_pu: None,
                        vmax_pu: None,
                        short_circuit_rating_ka: None,
                        auxiliary: true,
                    });
                    bus_index.insert(star_id, star);
                    branches.extend(three_winding(tx, star, &buses, &bus_index, base_mva));
                }
            }
        }

        debug!(
            buses = buses.len(),
            branches = branches.len(),
            loads = loads.len(),
            generators = generators.len(),
            "compiled system model"
        );

        Ok(Self {
            base_mva,
            base_hz,
            buses,
            loads,
            generators,
            branches,
            bus_index,
            diagnostics,
        })
    }

    pub fn n_bus(&self) -> usize {
        self.buses.len()
    }

    pub fn bus_index(&self, id: &BusId) -> Option<usize> {
        self.bus_index.get(id).copied()
    }

    /// Buses that appear in reports (star points excluded).
    pub fn reported_buses(&self) -> impl Iterator<Item = (usize, &BusModel)> {
        self.buses.iter().enumerate().filter(|(_, b)| !b.auxiliary)
    }

    pub fn loads_at(&self, bus: usize) -> impl Iterator<Item = &LoadData> {
        self.loads.iter().filter(move |l| l.bus == bus)
    }

    pub fn generators_at(&self, bus: usize) -> impl Iterator<Item = &GeneratorData> {
        self.generators.iter().filter(move |g| g.bus == bus)
    }

    /// Bus type used by the power flow: PV buses without a running
    /// generator are solved as PQ.
    pub fn effective_bus_types(&self) -> Vec<BusType> {
        self.buses
            .iter()
            .enumerate()
            .map(|(i, bus)| match bus.bus_type {
                BusType::Pv if self.generators_at(i).next().is_none() => {
                    warn!(bus = %bus.id, "PV bus has no in-service generator; solving as PQ");
                    BusType::Pq
                }
                other => other,
            })
            .collect()
    }
}

fn bus_model(bus: &Bus, fallback_kv: f64) -> BusModel {
    let base_kv = if bus.nominal_kv.value() > 0.0 {
        bus.nominal_kv.value()
    } else {
        fallback_kv
    };
    BusModel {
        id: bus.id.clone(),
        bus_type: bus.bus_type,
        base_kv,
        shunt: bus.shunt_admittance(),
        initial_voltage: bus.voltage_pu.value(),
        initial_angle_rad: bus.angle_deg.to_radians().value(),
        vmin_pu: bus.vmin_pu.map(|v| v.value()),
        vmax_pu: bus.vmax_pu.map(|v| v.value()),
        short_circuit_rating_ka: bus.short_circuit_rating_ka.map(|r| r.value()),
        auxiliary: false,
    }
}

fn generator_data(g: &Generator, bus: usize, base_mva: f64) -> GeneratorData {
    GeneratorData {
        id: g.id.clone(),
        bus,
        kind: g.kind,
        rated_mva: g.rated_mva.value(),
        p_pu: g.active_power.to_per_unit(base_mva),
        q_pu: g.reactive_power.to_per_unit(base_mva),
        qmin_pu: g
            .qmin
            .map_or(f64::NEG_INFINITY, |q| q.to_per_unit(base_mva)),
        qmax_pu: g.qmax.map_or(f64::INFINITY, |q| q.to_per_unit(base_mva)),
        voltage_setpoint: g.voltage_setpoint.map(|v| v.value()),
        reactances: g.reactances,
        grounding: g.grounding,
        fault_current_limit_pu: g.fault_current_limit_pu,
    }
}

/// Zero-sequence path through a winding pair, `zn` the transformer's one
/// neutral grounding impedance, seen as 3·Zn in every grounded path.
fn winding_zero_path(
    from: WindingConnection,
    to: WindingConnection,
    z: Complex64,
    zn: Complex64,
) -> ZeroSequencePath {
    use WindingConnection::{Delta, WyeGrounded};
    match (from, to) {
        (WyeGrounded, WyeGrounded) => ZeroSequencePath::Series {
            z0: z + zn * 3.0,
            b0: 0.0,
        },
        (WyeGrounded, Delta) => ZeroSequencePath::ShuntFrom(z + zn * 3.0),
        (Delta, WyeGrounded) => ZeroSequencePath::ShuntTo(z + zn * 3.0),
        _ => ZeroSequencePath::Open,
    }
}

fn neutral_impedance(tx: &Transformer, base_mva: f64) -> Complex64 {
    tx.grounding_impedance
        .map(|z| z.to_complex() * (base_mva / tx.rated_mva.value()))
        .unwrap_or_default()
}

fn two_winding(
    tx: &Transformer,
    buses: &[BusModel],
    bus_index: &HashMap<BusId, usize>,
    base_mva: f64,
) -> BranchModel {
    let from = bus_index[&tx.from_bus];
    let to = bus_index[&tx.to_bus];
    let kv_from = buses[from].base_kv;
    let kv_to = buses[to].base_kv;
    let lv_ratio = tx.lv_kv.value() / kv_to;
    let z = tx.impedance() * (base_mva / tx.rated_mva.value()) * lv_ratio * lv_ratio;
    let tap = tx.tap_ratio() * (tx.hv_kv.value() / kv_from) / lv_ratio;
    BranchModel {
        element: ElementRef::Transformer(tx.id.clone()),
        label: tx.id.to_string(),
        kind: BranchKind::Transformer,
        from,
        to,
        z_series: z,
        charging_b: 0.0,
        tap,
        shift_rad: tx.phase_shift.to_radians().value(),
        rating_mva: Some(tx.rated_mva.value()),
        interrupting_rating_ka: tx.through_fault_rating_ka.map(|r| r.value()),
        zero_sequence: winding_zero_path(
            tx.from_connection,
            tx.to_connection,
            z,
            neutral_impedance(tx, base_mva),
        ),
    }
}

/// Star equivalent of a three-winding transformer. Each leg runs from its
/// winding bus to the star point with the off-nominal ratio on the winding
/// side; the star point behaves as a grounded wye for zero sequence.
fn three_winding(
    tx: &Transformer,
    star: usize,
    buses: &[BusModel],
    bus_index: &HashMap<BusId, usize>,
    base_mva: f64,
) -> Vec<BranchModel> {
    let Some(tertiary) = &tx.tertiary else {
        return Vec::new();
    };
    let scale = base_mva / tx.rated_mva.value();
    let z_ps = tx.impedance();
    let z_pt = tertiary.primary_tertiary.to_complex();
    let z_st = tertiary.secondary_tertiary.to_complex();
    let legs = [
        (
            "primary",
            &tx.from_bus,
            (z_ps + z_pt - z_st) / 2.0,
            tx.hv_kv.value(),
            tx.tap_ratio(),
            tx.from_connection,
        ),
        (
            "secondary",
            &tx.to_bus,
            (z_ps + z_st - z_pt) / 2.0,
            tx.lv_kv.value(),
            1.0,
            tx.to_connection,
        ),
        (
            "tertiary",
            &tertiary.bus,
            (z_pt + z_st - z_ps) / 2.0,
            tertiary.rated_kv.value(),
            1.0,
            tertiary.connection,
        ),
    ];
    let zn = neutral_impedance(tx, base_mva);

    legs.into_iter()
        .map(|(name, bus, z_leg, winding_kv, tap_ratio, connection)| {
            let from = bus_index[bus];
            let z = z_leg * scale;
            let zero_sequence = match connection {
                WindingConnection::WyeGrounded => ZeroSequencePath::Series {
                    z0: z + zn * 3.0,
                    b0: 0.0,
                },
                WindingConnection::Delta => ZeroSequencePath::ShuntTo(z),
                WindingConnection::Wye => ZeroSequencePath::Open,
            };
            BranchModel {
                element: ElementRef::Transformer(tx.id.clone()),
                label: format!("{}:{}", tx.id, name),
                kind: BranchKind::Transformer,
                from,
                to: star,
                z_series: z,
                charging_b: 0.0,
                tap: tap_ratio * winding_kv / buses[from].base_kv,
                shift_rad: 0.0,
                rating_mva: Some(tx.rated_mva.value()),
                interrupting_rating_ka: tx.through_fault_rating_ka.map(|r| r.value()),
                zero_sequence,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use volta_core::{Branch, Impedance, Kilovolts, Load, TertiaryWinding};

    fn substation() -> Network {
        let mut network = Network::new();
        network.add_bus(Bus::new("HV", BusType::Slack, Kilovolts(69.0)));
        network.add_bus(Bus::new("LV", BusType::Pq, Kilovolts(13.8)));
        network
            .add_transformer(
                Transformer::new("T1", "HV", "LV", 20.0, 69.0, 13.8, 0.005, 0.08)
                    .with_connections(WindingConnection::Delta, WindingConnection::WyeGrounded),
            )
            .unwrap();
        network.add_load(Load::new("LD", "LV", 10.0, 3.0));
        network
    }

    #[test]
    fn transformer_impedance_on_system_base() {
        let model = SystemModel::compile(&substation()).unwrap();
        let tx = &model.branches[0];
        // 0.08 pu on 20 MVA -> 0.4 pu on 100 MVA
        assert!((tx.z_series.im - 0.4).abs() < 1e-12);
        assert!((tx.tap - 1.0).abs() < 1e-12);
        assert!(matches!(tx.zero_sequence, ZeroSequencePath::ShuntTo(_)));
    }

    #[test]
    fn grounded_wye_pair_adds_three_neutral_impedances() {
        let mut network = Network::new();
        network.add_bus(Bus::new("HV", BusType::Slack, Kilovolts(69.0)));
        network.add_bus(Bus::new("LV", BusType::Pq, Kilovolts(13.8)));
        network
            .add_transformer(
                Transformer::new("T1", "HV", "LV", 20.0, 69.0, 13.8, 0.005, 0.08)
                    .with_connections(
                        WindingConnection::WyeGrounded,
                        WindingConnection::WyeGrounded,
                    )
                    .with_grounding_impedance(0.0, 0.05),
            )
            .unwrap();
        let model = SystemModel::compile(&network).unwrap();
        let tx = &model.branches[0];
        // 0.05 pu on 20 MVA -> 0.25 pu on 100 MVA, three times in the path
        let ZeroSequencePath::Series { z0, .. } = tx.zero_sequence else {
            panic!("expected a series path, got {:?}", tx.zero_sequence);
        };
        assert!((z0 - (tx.z_series + Complex64::new(0.0, 0.75))).norm() < 1e-12);
    }

    #[test]
    fn off_nominal_winding_voltage_becomes_tap() {
        let mut network = substation();
        network.bus_mut(&BusId::new("LV")).unwrap().nominal_kv = Kilovolts(13.2);
        let model = SystemModel::compile(&network).unwrap();
        let tx = &model.branches[0];
        assert!((tx.tap - 13.2 / 13.8).abs() < 1e-12);
        let ratio: f64 = 13.8 / 13.2;
        assert!((tx.z_series.im - 0.4 * ratio * ratio).abs() < 1e-12);
    }

    #[test]
    fn loads_are_per_unit() {
        let model = SystemModel::compile(&substation()).unwrap();
        let lv = model.bus_index(&BusId::new("LV")).unwrap();
        let load = model.loads_at(lv).next().unwrap();
        assert!((load.p_pu - 0.1).abs() < 1e-12);
        assert_eq!(load.power_at(1.0), (0.1, 0.03));
    }

    #[test]
    fn frequency_deviation_scales_loads() {
        let mut network = substation();
        network.settings.system_frequency_hz = Some(59.4);
        for node in network.graph.node_weights_mut() {
            if let volta_core::Node::Load(load) = node {
                load.model.kpf = 2.0;
            }
        }
        let model = SystemModel::compile(&network).unwrap();
        // Δf = -0.01 pu, P scales by 1 - 0.02
        assert!((model.loads[0].p_pu - 0.098).abs() < 1e-12);
    }

    #[test]
    fn three_winding_expands_to_star() {
        let mut network = substation();
        network.add_bus(Bus::new("TV", BusType::Pq, Kilovolts(4.16)));
        network.graph.clear_edges();
        network
            .add_transformer(
                Transformer::new("T3", "HV", "LV", 20.0, 69.0, 13.8, 0.0, 0.10)
                    .with_connections(
                        WindingConnection::WyeGrounded,
                        WindingConnection::WyeGrounded,
                    )
                    .with_tertiary(TertiaryWinding {
                        bus: BusId::new("TV"),
                        rated_kv: Kilovolts(4.16),
                        connection: WindingConnection::Delta,
                        primary_tertiary: Impedance::new(0.0, 0.12),
                        secondary_tertiary: Impedance::new(0.0, 0.08),
                    }),
            )
            .unwrap();
        let model = SystemModel::compile(&network).unwrap();
        assert_eq!(model.n_bus(), 4);
        assert!(model.buses[3].auxiliary);
        assert_eq!(model.reported_buses().count(), 3);
        assert_eq!(model.branches.len(), 3);
        // Zp = (0.10 + 0.12 - 0.08)/2 = 0.07 on 20 MVA -> 0.35 on 100 MVA
        assert!((model.branches[0].z_series.im - 0.35).abs() < 1e-12);
        assert!(matches!(model.branches[2].zero_sequence, ZeroSequencePath::ShuntTo(_)));
    }

    #[test]
    fn line_without_zero_sequence_is_unknown() {
        let mut network = substation();
        network.add_bus(Bus::new("FAR", BusType::Pq, Kilovolts(13.8)));
        network.add_branch(Branch::new("L1", "LV", "FAR", 0.01, 0.04)).unwrap();
        let model = SystemModel::compile(&network).unwrap();
        let line = model.branches.iter().find(|b| b.label == "L1").unwrap();
        assert_eq!(line.zero_sequence, ZeroSequencePath::Unknown);
    }
}
