//! # volta-core: Electrical Network Model
//!
//! Data structures shared by every volta analysis: the network graph, its
//! elements, per-unit bases, analysis settings, validation and the numeric
//! primitives the solvers build on.
//!
//! ## Design
//!
//! A network is an **undirected multigraph** used as an arena:
//! - **Nodes**: buses, generators, loads and protective devices
//! - **Edges**: branches (lines, cables) and transformers between buses
//!
//! Generators, loads and devices sit in the graph as unconnected nodes and
//! refer to their bus (or protected element) by string id. Every cross
//! reference in the model is an id, never a pointer, so the whole network
//! serializes to JSON as-is and solvers resolve ids to matrix indices once
//! per analysis.
//!
//! ## Quick Start
//!
//! ```rust
//! use volta_core::*;
//!
//! let mut network = Network::new();
//! network.add_bus(Bus::new("SRC", BusType::Slack, Kilovolts(13.8)));
//! network.add_bus(Bus::new("LOAD", BusType::Pq, Kilovolts(13.8)));
//! network
//!     .add_branch(Branch::new("L1", "SRC", "LOAD", 0.02, 0.08).with_rating(10.0))
//!     .unwrap();
//! network.add_load(Load::new("LD1", "LOAD", 50.0, 20.0));
//!
//! assert!(network.validate().is_ok());
//! ```
//!
//! ## Modules
//!
//! - [`diagnostics`] - Validation issue collection
//! - [`graph_utils`] - Bus-level connectivity, islands and reachability
//! - [`phasor`] - Phasor helpers and symmetrical components
//! - [`solver`] - Dense linear-system backends
//! - [`units`] - Engineering unit newtypes
//! - [`cancel`] - Cooperative cancellation for long analyses

use std::fmt;

use num_complex::Complex64;
use petgraph::{prelude::*, Undirected};
use serde::{Deserialize, Serialize};

pub mod cancel;
pub mod diagnostics;
pub mod error;
pub mod graph_utils;
pub mod phasor;
pub mod solver;
pub mod units;
mod validate;

pub use cancel::CancellationToken;
pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{VoltaError, VoltaResult};
pub use graph_utils::BusGraph;
pub use petgraph::graph::{EdgeIndex, NodeIndex};
pub use phasor::{polar_deg, PhaseComponents, PhasorExt, SequenceComponents};
pub use solver::*;
pub use units::{
    base_current_ka, CurrentPu, Degrees, Kiloamperes, Kilovolts, Megavars, MegavoltAmperes,
    Megawatts, PerUnit, Radians,
};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[inline]
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }

        impl From<&$name> for $name {
            fn from(value: &$name) -> Self {
                value.clone()
            }
        }
    };
}

string_id!(
    /// Bus identifier
    BusId
);
string_id!(
    /// Line or cable identifier
    BranchId
);
string_id!(LoadId);
string_id!(GeneratorId);
string_id!(TransformerId);
string_id!(
    /// Protective device identifier
    DeviceId
);

/// Reference to a network element that can be taken out of service or
/// carries a protective device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ElementRef {
    Bus(BusId),
    Branch(BranchId),
    Transformer(TransformerId),
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementRef::Bus(id) => write!(f, "bus {id}"),
            ElementRef::Branch(id) => write!(f, "branch {id}"),
            ElementRef::Transformer(id) => write!(f, "transformer {id}"),
        }
    }
}

/// Series impedance in per-unit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Impedance {
    pub r: f64,
    pub x: f64,
}

impl Impedance {
    pub const fn new(r: f64, x: f64) -> Self {
        Self { r, x }
    }

    #[inline]
    pub fn to_complex(self) -> Complex64 {
        Complex64::new(self.r, self.x)
    }
}

// =============================================================================
// Buses
// =============================================================================

/// Power-flow classification of a bus.
///
/// ```text
/// ┌────────────────────────────────────────────────────┐
/// │  TYPE   │  SPECIFIED   │  SOLVED FOR               │
/// │─────────│──────────────│───────────────────────────│
/// │  slack  │  |V|, θ      │  P, Q   (one per island)  │
/// │  pv     │  P, |V|      │  Q, θ                     │
/// │  pq     │  P, Q        │  |V|, θ                   │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    Slack,
    Pv,
    #[default]
    Pq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    pub bus_type: BusType,
    /// Nominal line-to-line voltage
    pub nominal_kv: Kilovolts,
    /// Voltage magnitude. Setpoint for slack buses, warm-start state otherwise.
    pub voltage_pu: PerUnit,
    /// Voltage angle. Reference angle for slack buses.
    pub angle_deg: Degrees,
    pub vmin_pu: Option<PerUnit>,
    pub vmax_pu: Option<PerUnit>,
    /// Shunt conductance to ground (per-unit on system base)
    pub shunt_g_pu: f64,
    /// Shunt susceptance to ground. Positive is capacitive.
    pub shunt_b_pu: f64,
    /// Switchgear bracing / short-circuit withstand
    pub short_circuit_rating_ka: Option<Kiloamperes>,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            id: BusId::new(""),
            name: String::new(),
            bus_type: BusType::Pq,
            nominal_kv: Kilovolts(0.0),
            voltage_pu: PerUnit(1.0),
            angle_deg: Degrees(0.0),
            vmin_pu: None,
            vmax_pu: None,
            shunt_g_pu: 0.0,
            shunt_b_pu: 0.0,
            short_circuit_rating_ka: None,
        }
    }
}

impl Bus {
    pub fn new(id: impl Into<BusId>, bus_type: BusType, nominal_kv: Kilovolts) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            bus_type,
            nominal_kv,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Voltage magnitude and angle (setpoint for slack, initial guess otherwise).
    pub fn with_voltage(mut self, voltage_pu: f64, angle_deg: f64) -> Self {
        self.voltage_pu = PerUnit(voltage_pu);
        self.angle_deg = Degrees(angle_deg);
        self
    }

    pub fn with_limits(mut self, vmin_pu: f64, vmax_pu: f64) -> Self {
        self.vmin_pu = Some(PerUnit(vmin_pu));
        self.vmax_pu = Some(PerUnit(vmax_pu));
        self
    }

    pub fn with_shunt(mut self, g_pu: f64, b_pu: f64) -> Self {
        self.shunt_g_pu = g_pu;
        self.shunt_b_pu = b_pu;
        self
    }

    pub fn with_short_circuit_rating(mut self, ka: f64) -> Self {
        self.short_circuit_rating_ka = Some(Kiloamperes(ka));
        self
    }

    pub fn shunt_admittance(&self) -> Complex64 {
        Complex64::new(self.shunt_g_pu, self.shunt_b_pu)
    }
}

// =============================================================================
// Branches
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    #[default]
    Line,
    Cable,
    /// Two-winding transformer given directly on system base, without
    /// winding data. Use [`Transformer`] when connections matter.
    Transformer,
}

/// Zero-sequence series impedance and charging for lines and cables.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ZeroSequenceData {
    pub r0: f64,
    pub x0: f64,
    #[serde(default)]
    pub b0: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub kind: BranchKind,
    pub from_bus: BusId,
    pub to_bus: BusId,
    /// Series resistance (per-unit on system base)
    pub resistance: f64,
    /// Series reactance (per-unit on system base)
    pub reactance: f64,
    /// Total line charging susceptance, split half at each end
    pub charging_b: f64,
    /// Thermal rating
    pub rating_mva: Option<MegavoltAmperes>,
    /// Off-nominal tap magnitude on the from side
    pub tap_ratio: f64,
    pub phase_shift: Degrees,
    pub status: bool,
    pub zero_sequence: Option<ZeroSequenceData>,
    /// Interrupting rating of the breaker switching this branch
    pub interrupting_rating_ka: Option<Kiloamperes>,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            id: BranchId::new(""),
            name: String::new(),
            kind: BranchKind::Line,
            from_bus: BusId::new(""),
            to_bus: BusId::new(""),
            resistance: 0.0,
            reactance: 0.0,
            charging_b: 0.0,
            rating_mva: None,
            tap_ratio: 1.0,
            phase_shift: Degrees(0.0),
            status: true,
            zero_sequence: None,
            interrupting_rating_ka: None,
        }
    }
}

impl Branch {
    pub fn new(
        id: impl Into<BranchId>,
        from_bus: impl Into<BusId>,
        to_bus: impl Into<BusId>,
        resistance: f64,
        reactance: f64,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            from_bus: from_bus.into(),
            to_bus: to_bus.into(),
            resistance,
            reactance,
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: BranchKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_charging(mut self, b_pu: f64) -> Self {
        self.charging_b = b_pu;
        self
    }

    pub fn with_rating(mut self, mva: f64) -> Self {
        self.rating_mva = Some(MegavoltAmperes(mva));
        self
    }

    pub fn with_tap(mut self, ratio: f64, shift_deg: f64) -> Self {
        self.tap_ratio = ratio;
        self.phase_shift = Degrees(shift_deg);
        self
    }

    pub fn with_zero_sequence(mut self, r0: f64, x0: f64) -> Self {
        self.zero_sequence = Some(ZeroSequenceData { r0, x0, b0: 0.0 });
        self
    }

    pub fn with_interrupting_rating(mut self, ka: f64) -> Self {
        self.interrupting_rating_ka = Some(Kiloamperes(ka));
        self
    }

    pub fn out_of_service(mut self) -> Self {
        self.status = false;
        self
    }

    pub fn impedance(&self) -> Complex64 {
        Complex64::new(self.resistance, self.reactance)
    }

    /// Series admittance 1/(r + jx), `None` for a zero-impedance branch.
    pub fn admittance(&self) -> Option<Complex64> {
        let z = self.impedance();
        (z.norm() > 1e-12).then(|| z.inv())
    }

    pub fn is_line_or_cable(&self) -> bool {
        matches!(self.kind, BranchKind::Line | BranchKind::Cable)
    }
}

// =============================================================================
// Loads
// =============================================================================

/// Voltage and frequency dependence of a load.
///
/// By default a load splits into constant-power, constant-current and
/// constant-impedance portions (ZIP), given as percentages summing to 100:
///
/// ```text
/// P(V) = P0 · (%P + %I·V + %Z·V²) / 100
/// ```
///
/// Setting `exponent_p` (or `exponent_q`) replaces the ZIP split for that
/// component with the exponential model `P(V) = P0 · V^np`. Frequency
/// dependence scales by `(1 + kpf·Δf)` with Δf in per-unit of base frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadModel {
    pub constant_power_pct: f64,
    pub constant_current_pct: f64,
    pub constant_impedance_pct: f64,
    pub exponent_p: Option<f64>,
    pub exponent_q: Option<f64>,
    pub kpf: f64,
    pub kqf: f64,
}

impl Default for LoadModel {
    fn default() -> Self {
        Self {
            constant_power_pct: 100.0,
            constant_current_pct: 0.0,
            constant_impedance_pct: 0.0,
            exponent_p: None,
            exponent_q: None,
            kpf: 0.0,
            kqf: 0.0,
        }
    }
}

impl LoadModel {
    pub fn zip(power_pct: f64, current_pct: f64, impedance_pct: f64) -> Self {
        Self {
            constant_power_pct: power_pct,
            constant_current_pct: current_pct,
            constant_impedance_pct: impedance_pct,
            ..Self::default()
        }
    }

    pub fn exponential(np: f64, nq: f64) -> Self {
        Self {
            exponent_p: Some(np),
            exponent_q: Some(nq),
            ..Self::default()
        }
    }

    pub fn fraction_sum(&self) -> f64 {
        self.constant_power_pct + self.constant_current_pct + self.constant_impedance_pct
    }

    pub fn fractions_valid(&self) -> bool {
        (self.fraction_sum() - 100.0).abs() <= 0.01
    }

    /// True when anything other than constant power is present.
    pub fn is_voltage_dependent(&self) -> bool {
        self.exponent_p.is_some_and(|n| n != 0.0)
            || self.exponent_q.is_some_and(|n| n != 0.0)
            || self.constant_current_pct.abs() > 0.0
            || self.constant_impedance_pct.abs() > 0.0
    }

    fn zip_factor(&self, v: f64) -> (f64, f64) {
        let p = self.constant_power_pct / 100.0;
        let i = self.constant_current_pct / 100.0;
        let z = self.constant_impedance_pct / 100.0;
        (p + i * v + z * v * v, i + 2.0 * z * v)
    }

    fn factor(&self, exponent: Option<f64>, v: f64) -> (f64, f64) {
        match exponent {
            Some(n) => (v.powf(n), n * v.powf(n - 1.0)),
            None => self.zip_factor(v),
        }
    }

    /// Active-power multiplier and its derivative with respect to |V|.
    pub fn p_factor(&self, v: f64) -> (f64, f64) {
        self.factor(self.exponent_p, v)
    }

    /// Reactive-power multiplier and its derivative with respect to |V|.
    pub fn q_factor(&self, v: f64) -> (f64, f64) {
        self.factor(self.exponent_q, v)
    }

    /// Frequency multipliers `(P, Q)` for a per-unit frequency deviation.
    pub fn frequency_factors(&self, delta_f_pu: f64) -> (f64, f64) {
        (1.0 + self.kpf * delta_f_pu, 1.0 + self.kqf * delta_f_pu)
    }
}

/// One harmonic current component, relative to the fundamental.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicComponent {
    pub order: u32,
    /// Magnitude in percent of the fundamental current
    pub magnitude_pct: f64,
    #[serde(default)]
    pub angle_deg: f64,
}

/// Harmonic current spectrum of a non-linear load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HarmonicSpectrum {
    pub components: Vec<HarmonicComponent>,
}

impl HarmonicSpectrum {
    pub fn new(components: Vec<HarmonicComponent>) -> Self {
        Self { components }
    }

    /// Build from `(order, magnitude_pct)` pairs with zero angles.
    pub fn from_magnitudes(pairs: &[(u32, f64)]) -> Self {
        Self {
            components: pairs
                .iter()
                .map(|&(order, magnitude_pct)| HarmonicComponent {
                    order,
                    magnitude_pct,
                    angle_deg: 0.0,
                })
                .collect(),
        }
    }

    /// Idealized six-pulse rectifier: orders 6k±1 at 100/h percent, up to 25.
    pub fn six_pulse() -> Self {
        let pairs: Vec<(u32, f64)> = (1..=4)
            .flat_map(|k| [6 * k - 1, 6 * k + 1])
            .map(|h| (h, 100.0 / h as f64))
            .collect();
        Self::from_magnitudes(&pairs)
    }

    pub fn component(&self, order: u32) -> Option<&HarmonicComponent> {
        self.components.iter().find(|c| c.order == order)
    }

    /// Current THD implied by the spectrum alone, in percent.
    pub fn thd_pct(&self) -> f64 {
        self.components
            .iter()
            .filter(|c| c.order >= 2)
            .map(|c| c.magnitude_pct * c.magnitude_pct)
            .sum::<f64>()
            .sqrt()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Load {
    pub id: LoadId,
    pub name: String,
    pub bus: BusId,
    /// Active power demand at nominal voltage
    pub active_power: Megawatts,
    /// Reactive power demand at nominal voltage
    pub reactive_power: Megavars,
    pub model: LoadModel,
    /// Harmonic current spectrum; `None` for a linear load
    pub harmonics: Option<HarmonicSpectrum>,
    /// Maximum demand current I_L for TDD (per-unit). Defaults to nominal |S|.
    pub demand_current_pu: Option<f64>,
    pub status: bool,
}

impl Default for Load {
    fn default() -> Self {
        Self {
            id: LoadId::new(""),
            name: String::new(),
            bus: BusId::new(""),
            active_power: Megawatts(0.0),
            reactive_power: Megavars(0.0),
            model: LoadModel::default(),
            harmonics: None,
            demand_current_pu: None,
            status: true,
        }
    }
}

impl Load {
    pub fn new(id: impl Into<LoadId>, bus: impl Into<BusId>, p_mw: f64, q_mvar: f64) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            bus: bus.into(),
            active_power: Megawatts(p_mw),
            reactive_power: Megavars(q_mvar),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: LoadModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_harmonics(mut self, spectrum: HarmonicSpectrum) -> Self {
        self.harmonics = Some(spectrum);
        self
    }

    pub fn with_demand_current(mut self, i_pu: f64) -> Self {
        self.demand_current_pu = Some(i_pu);
        self
    }

    pub fn is_nonlinear(&self) -> bool {
        self.harmonics
            .as_ref()
            .is_some_and(|h| h.components.iter().any(|c| c.magnitude_pct > 0.0))
    }
}

// =============================================================================
// Generators
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    #[default]
    Synchronous,
    Induction,
    Inverter,
    Pv,
    Wind,
}

impl GeneratorKind {
    /// Power-electronic interface: current-limited, positive sequence only.
    pub fn is_inverter_based(self) -> bool {
        matches!(self, GeneratorKind::Inverter | GeneratorKind::Pv)
    }
}

/// Machine reactances in per-unit on the machine's own MVA base.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineReactances {
    pub xd: f64,
    pub xq: f64,
    pub xd_prime: f64,
    pub xq_prime: f64,
    pub xd_double_prime: f64,
    pub xq_double_prime: f64,
    /// Leakage reactance
    pub xl: f64,
    /// Negative-sequence reactance, defaults to (x''d + x''q)/2
    #[serde(default)]
    pub x2: Option<f64>,
    /// Zero-sequence reactance, defaults to the leakage reactance
    #[serde(default)]
    pub x0: Option<f64>,
    /// Armature resistance
    #[serde(default)]
    pub ra: f64,
}

impl MachineReactances {
    /// Round-rotor set with equal d- and q-axis values.
    pub fn round_rotor(xd: f64, xd_prime: f64, xd_double_prime: f64, xl: f64) -> Self {
        Self {
            xd,
            xq: xd,
            xd_prime,
            xq_prime: xd_prime,
            xd_double_prime,
            xq_double_prime: xd_double_prime,
            xl,
            x2: None,
            x0: None,
            ra: 0.0,
        }
    }

    pub fn negative_sequence(&self) -> f64 {
        self.x2
            .unwrap_or((self.xd_double_prime + self.xq_double_prime) / 2.0)
    }

    pub fn zero_sequence(&self) -> f64 {
        self.x0.unwrap_or(self.xl)
    }
}

/// Neutral grounding of a generator or wye winding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Grounding {
    #[default]
    Solid,
    Impedance { r: f64, x: f64 },
    Ungrounded,
}

impl Grounding {
    /// Neutral impedance Zn, `None` when the neutral floats.
    pub fn neutral_impedance(&self) -> Option<Complex64> {
        match self {
            Grounding::Solid => Some(Complex64::new(0.0, 0.0)),
            Grounding::Impedance { r, x } => Some(Complex64::new(*r, *x)),
            Grounding::Ungrounded => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Generator {
    pub id: GeneratorId,
    pub name: String,
    pub bus: BusId,
    pub kind: GeneratorKind,
    /// Machine MVA base for the reactances
    pub rated_mva: MegavoltAmperes,
    pub active_power: Megawatts,
    /// Scheduled reactive output (used when the bus is PQ)
    pub reactive_power: Megavars,
    pub voltage_setpoint: Option<PerUnit>,
    /// Reactive limits; `None` leaves that side unlimited
    pub qmin: Option<Megavars>,
    pub qmax: Option<Megavars>,
    pub status: bool,
    pub reactances: Option<MachineReactances>,
    pub grounding: Grounding,
    /// Fault current ceiling for inverter-based units, per-unit of rating
    pub fault_current_limit_pu: Option<f64>,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            id: GeneratorId::new(""),
            name: String::new(),
            bus: BusId::new(""),
            kind: GeneratorKind::Synchronous,
            rated_mva: MegavoltAmperes(100.0),
            active_power: Megawatts(0.0),
            reactive_power: Megavars(0.0),
            voltage_setpoint: None,
            qmin: None,
            qmax: None,
            status: true,
            reactances: None,
            grounding: Grounding::Solid,
            fault_current_limit_pu: None,
        }
    }
}

impl Generator {
    pub fn new(id: impl Into<GeneratorId>, bus: impl Into<BusId>, kind: GeneratorKind) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            bus: bus.into(),
            kind,
            ..Self::default()
        }
    }

    pub fn with_output(mut self, p_mw: f64, q_mvar: f64) -> Self {
        self.active_power = Megawatts(p_mw);
        self.reactive_power = Megavars(q_mvar);
        self
    }

    pub fn with_voltage_setpoint(mut self, v_pu: f64) -> Self {
        self.voltage_setpoint = Some(PerUnit(v_pu));
        self
    }

    pub fn with_q_limits(mut self, qmin: f64, qmax: f64) -> Self {
        self.qmin = Some(Megavars(qmin));
        self.qmax = Some(Megavars(qmax));
        self
    }

    pub fn with_rating(mut self, mva: f64) -> Self {
        self.rated_mva = MegavoltAmperes(mva);
        self
    }

    pub fn with_reactances(mut self, reactances: MachineReactances) -> Self {
        self.reactances = Some(reactances);
        self
    }

    pub fn with_grounding(mut self, grounding: Grounding) -> Self {
        self.grounding = grounding;
        self
    }

    pub fn with_fault_current_limit(mut self, limit_pu: f64) -> Self {
        self.fault_current_limit_pu = Some(limit_pu);
        self
    }

    /// True if the unit contributes fault current.
    pub fn has_short_circuit_data(&self) -> bool {
        self.reactances.is_some() || self.kind.is_inverter_based()
    }
}

// =============================================================================
// Transformers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindingConnection {
    #[default]
    WyeGrounded,
    Wye,
    Delta,
}

impl WindingConnection {
    pub fn is_grounded_wye(self) -> bool {
        matches!(self, WindingConnection::WyeGrounded)
    }
}

/// Third winding of a three-winding transformer.
///
/// Pairwise impedances are per-unit on the transformer's own MVA base;
/// the primary-secondary pair is the transformer's own `resistance`/`reactance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TertiaryWinding {
    pub bus: BusId,
    pub rated_kv: Kilovolts,
    pub connection: WindingConnection,
    pub primary_tertiary: Impedance,
    pub secondary_tertiary: Impedance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Transformer {
    pub id: TransformerId,
    pub name: String,
    /// High-voltage (tapped) side
    pub from_bus: BusId,
    pub to_bus: BusId,
    pub tertiary: Option<TertiaryWinding>,
    pub rated_mva: MegavoltAmperes,
    pub hv_kv: Kilovolts,
    pub lv_kv: Kilovolts,
    /// Series resistance, per-unit on own base
    pub resistance: f64,
    /// Series reactance, per-unit on own base
    pub reactance: f64,
    pub tap_position: i32,
    pub tap_min: i32,
    pub tap_max: i32,
    /// Voltage change per tap step, percent
    pub tap_step_pct: f64,
    pub phase_shift: Degrees,
    pub from_connection: WindingConnection,
    pub to_connection: WindingConnection,
    /// Neutral grounding impedance of the wye windings (zero sequence only)
    pub grounding_impedance: Option<Impedance>,
    pub through_fault_rating_ka: Option<Kiloamperes>,
    pub status: bool,
}

impl Default for Transformer {
    fn default() -> Self {
        Self {
            id: TransformerId::new(""),
            name: String::new(),
            from_bus: BusId::new(""),
            to_bus: BusId::new(""),
            tertiary: None,
            rated_mva: MegavoltAmperes(1.0),
            hv_kv: Kilovolts(0.0),
            lv_kv: Kilovolts(0.0),
            resistance: 0.0,
            reactance: 0.0,
            tap_position: 0,
            tap_min: -16,
            tap_max: 16,
            tap_step_pct: 0.625,
            phase_shift: Degrees(0.0),
            from_connection: WindingConnection::Delta,
            to_connection: WindingConnection::WyeGrounded,
            grounding_impedance: None,
            through_fault_rating_ka: None,
            status: true,
        }
    }
}

impl Transformer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<TransformerId>,
        from_bus: impl Into<BusId>,
        to_bus: impl Into<BusId>,
        rated_mva: f64,
        hv_kv: f64,
        lv_kv: f64,
        resistance: f64,
        reactance: f64,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            from_bus: from_bus.into(),
            to_bus: to_bus.into(),
            rated_mva: MegavoltAmperes(rated_mva),
            hv_kv: Kilovolts(hv_kv),
            lv_kv: Kilovolts(lv_kv),
            resistance,
            reactance,
            ..Self::default()
        }
    }

    pub fn with_connections(mut self, from: WindingConnection, to: WindingConnection) -> Self {
        self.from_connection = from;
        self.to_connection = to;
        self
    }

    pub fn with_tap(mut self, position: i32, step_pct: f64) -> Self {
        self.tap_position = position;
        self.tap_step_pct = step_pct;
        self
    }

    pub fn with_tap_range(mut self, min: i32, max: i32) -> Self {
        self.tap_min = min;
        self.tap_max = max;
        self
    }

    pub fn with_phase_shift(mut self, deg: f64) -> Self {
        self.phase_shift = Degrees(deg);
        self
    }

    pub fn with_grounding_impedance(mut self, r: f64, x: f64) -> Self {
        self.grounding_impedance = Some(Impedance::new(r, x));
        self
    }

    pub fn with_tertiary(mut self, tertiary: TertiaryWinding) -> Self {
        self.tertiary = Some(tertiary);
        self
    }

    pub fn with_through_fault_rating(mut self, ka: f64) -> Self {
        self.through_fault_rating_ka = Some(Kiloamperes(ka));
        self
    }

    /// Tap magnitude from the tap position, before any kV mismatch.
    pub fn tap_ratio(&self) -> f64 {
        1.0 + self.tap_position as f64 * self.tap_step_pct / 100.0
    }

    pub fn impedance(&self) -> Complex64 {
        Complex64::new(self.resistance, self.reactance)
    }

    /// Buses the transformer touches (two or three).
    pub fn buses(&self) -> Vec<&BusId> {
        let mut buses = vec![&self.from_bus, &self.to_bus];
        if let Some(t) = &self.tertiary {
            buses.push(&t.bus);
        }
        buses
    }
}

// =============================================================================
// Protection
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Relay,
    Breaker,
    Fuse,
}

/// Time-current characteristic (IEEE C37.112 inverse-time families).
///
/// ```text
/// t(M) = TD · ( A / (M^p − 1) + B ),   M = I / I_pickup
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TripCurve {
    #[default]
    IeeeModeratelyInverse,
    IeeeVeryInverse,
    IeeeExtremelyInverse,
    DefiniteTime {
        seconds: f64,
    },
}

impl TripCurve {
    /// Operating time in seconds, `None` below pickup.
    pub fn operating_time(&self, multiple: f64, time_dial: f64) -> Option<f64> {
        if multiple.is_nan() || multiple <= 1.0 {
            return None;
        }
        let (a, b, p) = match *self {
            TripCurve::IeeeModeratelyInverse => (0.0515, 0.1140, 0.02),
            TripCurve::IeeeVeryInverse => (19.61, 0.491, 2.0),
            TripCurve::IeeeExtremelyInverse => (28.2, 0.1217, 2.0),
            TripCurve::DefiniteTime { seconds } => return Some(seconds),
        };
        Some(time_dial * (a / (multiple.powf(p) - 1.0) + b))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectiveDevice {
    pub id: DeviceId,
    pub name: String,
    /// Protected branch or transformer
    pub location: ElementRef,
    pub kind: DeviceKind,
    pub curve: TripCurve,
    /// Pickup current in primary amperes
    pub pickup_a: f64,
    pub time_dial: f64,
    /// Instantaneous element pickup in primary amperes
    pub instantaneous_a: Option<f64>,
    pub instantaneous_time_s: f64,
    /// Backup device that must operate after this one
    pub upstream: Option<DeviceId>,
    pub interrupting_rating_ka: Option<Kiloamperes>,
    pub status: bool,
}

impl Default for ProtectiveDevice {
    fn default() -> Self {
        Self {
            id: DeviceId::new(""),
            name: String::new(),
            location: ElementRef::Branch(BranchId::new("")),
            kind: DeviceKind::Relay,
            curve: TripCurve::IeeeModeratelyInverse,
            pickup_a: 0.0,
            time_dial: 1.0,
            instantaneous_a: None,
            instantaneous_time_s: 0.05,
            upstream: None,
            interrupting_rating_ka: None,
            status: true,
        }
    }
}

impl ProtectiveDevice {
    pub fn new(id: impl Into<DeviceId>, location: ElementRef, curve: TripCurve, pickup_a: f64) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            location,
            curve,
            pickup_a,
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_time_dial(mut self, time_dial: f64) -> Self {
        self.time_dial = time_dial;
        self
    }

    pub fn with_instantaneous(mut self, pickup_a: f64, time_s: f64) -> Self {
        self.instantaneous_a = Some(pickup_a);
        self.instantaneous_time_s = time_s;
        self
    }

    pub fn with_upstream(mut self, upstream: impl Into<DeviceId>) -> Self {
        self.upstream = Some(upstream.into());
        self
    }

    pub fn with_interrupting_rating(mut self, ka: f64) -> Self {
        self.interrupting_rating_ka = Some(Kiloamperes(ka));
        self
    }

    /// Clearing time for a given primary current, `None` if the device
    /// does not pick up.
    pub fn operating_time(&self, current_a: f64) -> Option<f64> {
        if self.pickup_a <= 0.0 {
            return None;
        }
        let timed = self
            .curve
            .operating_time(current_a / self.pickup_a, self.time_dial);
        match self.instantaneous_a {
            Some(inst) if current_a >= inst => Some(
                timed.map_or(self.instantaneous_time_s, |t| t.min(self.instantaneous_time_s)),
            ),
            _ => timed,
        }
    }
}

// =============================================================================
// Network
// =============================================================================

/// Per-unit system bases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseValues {
    pub base_mva: f64,
    /// Fallback voltage base for buses without a nominal voltage
    pub base_kv: Kilovolts,
    pub base_hz: f64,
}

impl Default for BaseValues {
    fn default() -> Self {
        Self {
            base_mva: 100.0,
            base_kv: Kilovolts(13.8),
            base_hz: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    ThreePhase,
    LineToGround,
    LineToLine,
    LineToLineToGround,
}

impl FaultType {
    pub const ALL: [FaultType; 4] = [
        FaultType::ThreePhase,
        FaultType::LineToGround,
        FaultType::LineToLine,
        FaultType::LineToLineToGround,
    ];

    /// Faults with a path to ground need the zero-sequence network.
    pub fn involves_ground(self) -> bool {
        matches!(self, FaultType::LineToGround | FaultType::LineToLineToGround)
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FaultType::ThreePhase => "three_phase",
            FaultType::LineToGround => "line_to_ground",
            FaultType::LineToLine => "line_to_line",
            FaultType::LineToLineToGround => "line_to_line_to_ground",
        };
        f.write_str(label)
    }
}

/// Study settings carried with the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Largest acceptable per-unit power mismatch
    pub convergence_tolerance: f64,
    pub max_iterations: usize,
    /// Scale applied to each Newton correction (1.0 = plain Newton)
    pub acceleration_factor: f64,
    pub harmonic_orders: Vec<u32>,
    pub fault_types: Vec<FaultType>,
    /// Ignore stored bus voltages and start from 1.0∠0
    pub flat_start: bool,
    /// Band for buses without their own limits, ahead of the engine default
    pub voltage_limits: Option<(PerUnit, PerUnit)>,
    /// Operating frequency when it differs from `base_hz`
    pub system_frequency_hz: Option<f64>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            convergence_tolerance: 1e-6,
            max_iterations: 20,
            acceleration_factor: 1.0,
            harmonic_orders: vec![3, 5, 7, 9, 11, 13],
            fault_types: FaultType::ALL.to_vec(),
            flat_start: true,
            voltage_limits: None,
            system_frequency_hz: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Bus(Bus),
    Generator(Generator),
    Load(Load),
    Device(ProtectiveDevice),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Edge {
    Branch(Branch),
    Transformer(Transformer),
}

/// The electrical network: element graph plus bases and study settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    pub graph: Graph<Node, Edge, Undirected>,
    #[serde(default)]
    pub base: BaseValues,
    #[serde(default)]
    pub settings: AnalysisSettings,
}

/// Elements attached to one bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusConnections {
    pub branches: Vec<BranchId>,
    pub transformers: Vec<TransformerId>,
    pub loads: Vec<LoadId>,
    pub generators: Vec<GeneratorId>,
}

impl Network {
    pub fn new() -> Self {
        Self {
            graph: Graph::new_undirected(),
            base: BaseValues::default(),
            settings: AnalysisSettings::default(),
        }
    }

    pub fn with_base(mut self, base: BaseValues) -> Self {
        self.base = base;
        self
    }

    pub fn with_settings(mut self, settings: AnalysisSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn from_json(json: &str) -> VoltaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> VoltaResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn add_bus(&mut self, bus: Bus) -> NodeIndex {
        self.graph.add_node(Node::Bus(bus))
    }

    pub fn add_load(&mut self, load: Load) -> NodeIndex {
        self.graph.add_node(Node::Load(load))
    }

    pub fn add_generator(&mut self, generator: Generator) -> NodeIndex {
        self.graph.add_node(Node::Generator(generator))
    }

    pub fn add_device(&mut self, device: ProtectiveDevice) -> NodeIndex {
        self.graph.add_node(Node::Device(device))
    }

    /// Add a line or cable between two existing buses.
    pub fn add_branch(&mut self, branch: Branch) -> VoltaResult<EdgeIndex> {
        let from = self.require_bus_node(&branch.from_bus, branch.id.as_str())?;
        let to = self.require_bus_node(&branch.to_bus, branch.id.as_str())?;
        Ok(self.graph.add_edge(from, to, Edge::Branch(branch)))
    }

    /// Add a transformer between existing buses. A tertiary bus is checked
    /// but not represented as a graph edge.
    pub fn add_transformer(&mut self, transformer: Transformer) -> VoltaResult<EdgeIndex> {
        let from = self.require_bus_node(&transformer.from_bus, transformer.id.as_str())?;
        let to = self.require_bus_node(&transformer.to_bus, transformer.id.as_str())?;
        if let Some(tertiary) = &transformer.tertiary {
            self.require_bus_node(&tertiary.bus, transformer.id.as_str())?;
        }
        Ok(self.graph.add_edge(from, to, Edge::Transformer(transformer)))
    }

    fn require_bus_node(&self, bus: &BusId, owner: &str) -> VoltaResult<NodeIndex> {
        self.bus_node(bus).ok_or_else(|| {
            VoltaError::Validation(format!("{owner} references unknown bus '{bus}'"))
        })
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    pub fn bus_node(&self, id: &BusId) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&idx| matches!(&self.graph[idx], Node::Bus(b) if &b.id == id))
    }

    pub fn bus(&self, id: &BusId) -> Option<&Bus> {
        self.graph.node_weights().find_map(|n| match n {
            Node::Bus(b) if &b.id == id => Some(b),
            _ => None,
        })
    }

    pub fn bus_mut(&mut self, id: &BusId) -> Option<&mut Bus> {
        self.graph.node_weights_mut().find_map(|n| match n {
            Node::Bus(b) if &b.id == id => Some(b),
            _ => None,
        })
    }

    pub fn buses(&self) -> Vec<&Bus> {
        self.graph
            .node_weights()
            .filter_map(|n| match n {
                Node::Bus(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn slack_buses(&self) -> Vec<&Bus> {
        self.buses()
            .into_iter()
            .filter(|b| b.bus_type == BusType::Slack)
            .collect()
    }

    pub fn branches(&self) -> Vec<&Branch> {
        self.graph
            .edge_weights()
            .filter_map(|e| match e {
                Edge::Branch(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn branch(&self, id: &BranchId) -> Option<&Branch> {
        self.branches().into_iter().find(|b| &b.id == id)
    }

    pub fn transformers(&self) -> Vec<&Transformer> {
        self.graph
            .edge_weights()
            .filter_map(|e| match e {
                Edge::Transformer(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn transformer(&self, id: &TransformerId) -> Option<&Transformer> {
        self.transformers().into_iter().find(|t| &t.id == id)
    }

    pub fn loads(&self) -> Vec<&Load> {
        self.graph
            .node_weights()
            .filter_map(|n| match n {
                Node::Load(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    pub fn generators(&self) -> Vec<&Generator> {
        self.graph
            .node_weights()
            .filter_map(|n| match n {
                Node::Generator(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    pub fn devices(&self) -> Vec<&ProtectiveDevice> {
        self.graph
            .node_weights()
            .filter_map(|n| match n {
                Node::Device(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn loads_at_bus(&self, bus_id: &BusId) -> Vec<&Load> {
        self.loads()
            .into_iter()
            .filter(|l| &l.bus == bus_id)
            .collect()
    }

    pub fn generators_at_bus(&self, bus_id: &BusId) -> Vec<&Generator> {
        self.generators()
            .into_iter()
            .filter(|g| &g.bus == bus_id)
            .collect()
    }

    /// Every element attached to a bus, in graph order.
    pub fn connections(&self, bus_id: &BusId) -> BusConnections {
        let mut connections = BusConnections::default();
        for edge in self.graph.edge_weights() {
            match edge {
                Edge::Branch(b) if &b.from_bus == bus_id || &b.to_bus == bus_id => {
                    connections.branches.push(b.id.clone());
                }
                Edge::Transformer(t) if t.buses().contains(&bus_id) => {
                    connections.transformers.push(t.id.clone());
                }
                _ => {}
            }
        }
        for node in self.graph.node_weights() {
            match node {
                Node::Load(l) if &l.bus == bus_id => connections.loads.push(l.id.clone()),
                Node::Generator(g) if &g.bus == bus_id => {
                    connections.generators.push(g.id.clone())
                }
                _ => {}
            }
        }
        connections
    }

    /// Apply a mutation to the branch or transformer named by `element`.
    /// Returns false when no such element exists.
    pub fn set_in_service(&mut self, element: &ElementRef, in_service: bool) -> bool {
        for edge in self.graph.edge_weights_mut() {
            match (edge, element) {
                (Edge::Branch(b), ElementRef::Branch(id)) if &b.id == id => {
                    b.status = in_service;
                    return true;
                }
                (Edge::Transformer(t), ElementRef::Transformer(id)) if &t.id == id => {
                    t.status = in_service;
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats::default();
        for node in self.graph.node_weights() {
            match node {
                Node::Bus(_) => stats.num_buses += 1,
                Node::Generator(g) => {
                    stats.num_generators += 1;
                    if g.status {
                        stats.total_generation_mw += g.active_power.value();
                    }
                }
                Node::Load(l) => {
                    stats.num_loads += 1;
                    if l.status {
                        stats.total_load_mw += l.active_power.value();
                        stats.total_load_mvar += l.reactive_power.value();
                    }
                }
                Node::Device(_) => stats.num_devices += 1,
            }
        }
        for edge in self.graph.edge_weights() {
            match edge {
                Edge::Branch(_) => stats.num_branches += 1,
                Edge::Transformer(_) => stats.num_transformers += 1,
            }
        }
        stats
    }
}

/// Statistics about a network's size and loading
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkStats {
    pub num_buses: usize,
    pub num_branches: usize,
    pub num_transformers: usize,
    pub num_generators: usize,
    pub num_loads: usize,
    pub num_devices: usize,
    pub total_load_mw: f64,
    pub total_load_mvar: f64,
    pub total_generation_mw: f64,
}

impl fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} buses, {} branches, {} transformers, {} generators, {} loads ({:.1} MW)",
            self.num_buses,
            self.num_branches,
            self.num_transformers,
            self.num_generators,
            self.num_loads,
            self.total_load_mw
        )
    }
}

impl Node {
    pub fn label(&self) -> &str {
        match self {
            Node::Bus(bus) => &bus.name,
            Node::Generator(gen) => &gen.name,
            Node::Load(load) => &load.name,
            Node::Device(device) => &device.name,
        }
    }
}

impl Edge {
    pub fn label(&self) -> &str {
        match self {
            Edge::Branch(branch) => &branch.name,
            Edge::Transformer(tx) => &tx.name,
        }
    }

    pub fn element_ref(&self) -> ElementRef {
        match self {
            Edge::Branch(b) => ElementRef::Branch(b.id.clone()),
            Edge::Transformer(t) => ElementRef::Transformer(t.id.clone()),
        }
    }

    pub fn in_service(&self) -> bool {
        match self {
            Edge::Branch(b) => b.status,
            Edge::Transformer(t) => t.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bus() -> Network {
        let mut network = Network::new();
        network.add_bus(Bus::new("B1", BusType::Slack, Kilovolts(13.8)));
        network.add_bus(Bus::new("B2", BusType::Pq, Kilovolts(13.8)));
        network
            .add_branch(Branch::new("L12", "B1", "B2", 0.01, 0.1).with_rating(50.0))
            .unwrap();
        network.add_generator(Generator::new("G1", "B1", GeneratorKind::Synchronous));
        network.add_load(Load::new("LD2", "B2", 50.0, 10.0));
        network
    }

    #[test]
    fn test_network_creation() {
        let network = two_bus();
        assert_eq!(network.graph.node_count(), 4);
        assert_eq!(network.graph.edge_count(), 1);
        assert_eq!(network.bus(&BusId::new("B1")).unwrap().name, "B1");
        assert_eq!(network.slack_buses().len(), 1);
    }

    #[test]
    fn test_add_branch_rejects_unknown_bus() {
        let mut network = two_bus();
        let err = network
            .add_branch(Branch::new("L13", "B1", "B3", 0.01, 0.1))
            .unwrap_err();
        assert!(matches!(err, VoltaError::Validation(_)));
        assert!(err.to_string().contains("B3"));
    }

    #[test]
    fn test_network_stats() {
        let stats = two_bus().stats();
        assert_eq!(stats.num_buses, 2);
        assert_eq!(stats.num_generators, 1);
        assert_eq!(stats.num_loads, 1);
        assert_eq!(stats.num_branches, 1);
        assert!((stats.total_load_mw - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_connections() {
        let network = two_bus();
        let c = network.connections(&BusId::new("B2"));
        assert_eq!(c.branches, vec![BranchId::new("L12")]);
        assert_eq!(c.loads, vec![LoadId::new("LD2")]);
        assert!(c.generators.is_empty());
    }

    #[test]
    fn test_set_in_service() {
        let mut network = two_bus();
        let element = ElementRef::Branch(BranchId::new("L12"));
        assert!(network.set_in_service(&element, false));
        assert!(!network.branches()[0].status);
        assert!(!network.set_in_service(&ElementRef::Branch(BranchId::new("nope")), false));
    }

    #[test]
    fn test_branch_admittance() {
        let branch = Branch::new("L", "A", "B", 0.0, 0.05);
        let y = branch.admittance().unwrap();
        assert!((y.im + 20.0).abs() < 1e-9);
        assert!(Branch::new("Z", "A", "B", 0.0, 0.0).admittance().is_none());
    }

    #[test]
    fn test_zip_load_factors() {
        let model = LoadModel::zip(50.0, 30.0, 20.0);
        assert!(model.fractions_valid());
        assert!(model.is_voltage_dependent());
        let (p, dp) = model.p_factor(0.9);
        assert!((p - (0.5 + 0.3 * 0.9 + 0.2 * 0.81)).abs() < 1e-12);
        assert!((dp - (0.3 + 0.4 * 0.9)).abs() < 1e-12);
        assert!(!LoadModel::default().is_voltage_dependent());
        assert!(!LoadModel::zip(50.0, 30.0, 10.0).fractions_valid());
    }

    #[test]
    fn test_exponential_load_factors() {
        let model = LoadModel::exponential(2.0, 2.0);
        let (q, dq) = model.q_factor(0.95);
        assert!((q - 0.9025).abs() < 1e-12);
        assert!((dq - 1.9).abs() < 1e-12);
    }

    #[test]
    fn test_six_pulse_spectrum() {
        let spectrum = HarmonicSpectrum::six_pulse();
        assert_eq!(spectrum.components.len(), 8);
        assert!((spectrum.component(5).unwrap().magnitude_pct - 20.0).abs() < 1e-12);
        assert!(spectrum.thd_pct() > 25.0);
    }

    #[test]
    fn test_machine_sequence_defaults() {
        let x = MachineReactances::round_rotor(1.8, 0.3, 0.2, 0.12);
        assert!((x.negative_sequence() - 0.2).abs() < 1e-12);
        assert!((x.zero_sequence() - 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_transformer_tap_ratio() {
        let tx = Transformer::new("T1", "HV", "LV", 10.0, 69.0, 13.8, 0.005, 0.08).with_tap(2, 1.25);
        assert!((tx.tap_ratio() - 1.025).abs() < 1e-12);
        assert_eq!(tx.buses().len(), 2);
    }

    #[test]
    fn test_trip_curves() {
        // Very inverse, TD=1, M=10: 19.61/99 + 0.491
        let t = TripCurve::IeeeVeryInverse.operating_time(10.0, 1.0).unwrap();
        assert!((t - (19.61 / 99.0 + 0.491)).abs() < 1e-9);
        assert!(TripCurve::IeeeVeryInverse.operating_time(0.8, 1.0).is_none());

        let relay = ProtectiveDevice::new(
            "R1",
            ElementRef::Branch(BranchId::new("L1")),
            TripCurve::IeeeExtremelyInverse,
            400.0,
        )
        .with_instantaneous(8000.0, 0.03);
        assert_eq!(relay.operating_time(10_000.0), Some(0.03));
        assert!(relay.operating_time(300.0).is_none());
    }

    #[test]
    fn test_json_roundtrip_preserves_topology() {
        let network = two_bus();
        let json = network.to_json().unwrap();
        let restored = Network::from_json(&json).unwrap();
        assert_eq!(restored.stats(), network.stats());
        assert!(restored.bus_node(&BusId::new("B2")).is_some());

        // G1 has no reactive limits; unlimited must survive the trip
        let g1 = restored.generators()[0];
        assert_eq!(g1.id, GeneratorId::new("G1"));
        assert!(g1.qmin.is_none() && g1.qmax.is_none());
    }

    #[test]
    fn test_json_roundtrip_keeps_reactive_limits() {
        let mut network = two_bus();
        network.add_generator(
            Generator::new("G2", "B2", GeneratorKind::Synchronous).with_q_limits(-20.0, 25.0),
        );
        let restored = Network::from_json(&network.to_json().unwrap()).unwrap();
        let g2 = restored
            .generators()
            .into_iter()
            .find(|g| g.id == GeneratorId::new("G2"))
            .unwrap();
        assert_eq!(g2.qmin, Some(Megavars(-20.0)));
        assert_eq!(g2.qmax, Some(Megavars(25.0)));
    }
}
