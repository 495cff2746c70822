//! # Harmonic Analysis
//!
//! Frequency-domain harmonic penetration: one linear network solve per
//! harmonic order, linearized around the fundamental load flow.
//!
//! ```text
//! Y_h · V_h = I_h        for each order h
//!
//! THD_V = √(Σ_h |V_h|²) / |V_1| × 100
//! TDD   = √(Σ_h |I_h|²) / I_L   × 100
//! ```
//!
//! Orders are independent and run on the rayon pool when parallel execution
//! is enabled. Results are then checked against IEEE 519 (see [`ieee519`]).

pub mod ieee519;
pub mod network;

pub use ieee519::{ComplianceKind, ComplianceViolation, ViolationSeverity};
pub use network::FundamentalState;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use volta_core::{
    BusId, BusType, CancellationToken, LinearSystemBackend, Network, VoltaError, VoltaResult,
};

use crate::config::EngineConfig;
use crate::model::SystemModel;
use crate::power_flow::{AcPowerFlowSolver, LoadFlowOptions};
use crate::short_circuit::{solver::OPEN_CIRCUIT_IMPEDANCE, SequenceNetworks};
use crate::sparse::SparseYBus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicVoltage {
    pub order: u32,
    pub magnitude_pu: f64,
    pub angle_deg: f64,
    /// Percent of the fundamental bus voltage
    pub individual_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicCurrent {
    pub order: u32,
    pub magnitude_pu: f64,
    /// Percent of the bus demand current
    pub pct_of_demand: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusHarmonics {
    pub bus: BusId,
    pub nominal_kv: f64,
    pub fundamental_pu: f64,
    pub voltages: Vec<HarmonicVoltage>,
    pub thd_v_pct: f64,
    /// Injections from non-linear loads at this bus
    pub currents: Vec<HarmonicCurrent>,
    pub thd_i_pct: Option<f64>,
    pub tdd_pct: Option<f64>,
    /// Isc / IL where both are known
    pub short_circuit_ratio: Option<f64>,
}

impl BusHarmonics {
    pub fn voltage(&self, order: u32) -> Option<&HarmonicVoltage> {
        self.voltages.iter().find(|v| v.order == order)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicAnalysisResult {
    /// Orders actually solved, ascending
    pub orders: Vec<u32>,
    pub fundamental_converged: bool,
    pub buses: Vec<BusHarmonics>,
    /// Worst bus voltage THD
    pub system_thd_pct: f64,
    pub worst_bus: Option<BusId>,
    /// Aggregate non-linear load current over aggregate demand current
    pub system_tdd_pct: Option<f64>,
    pub pcc_bus: Option<BusId>,
    pub violations: Vec<ComplianceViolation>,
    pub ieee519_compliant: bool,
}

impl HarmonicAnalysisResult {
    pub fn bus(&self, id: &BusId) -> Option<&BusHarmonics> {
        self.buses.iter().find(|b| &b.bus == id)
    }
}

/// Sort and deduplicate harmonic orders; orders below 2 are rejected.
pub fn normalize_orders(orders: &[u32]) -> VoltaResult<Vec<u32>> {
    if let Some(bad) = orders.iter().find(|&&h| h < 2) {
        return Err(VoltaError::Parameter(format!(
            "harmonic order {bad} is not above the fundamental"
        )));
    }
    let mut orders = orders.to_vec();
    orders.sort_unstable();
    orders.dedup();
    Ok(orders)
}

fn rss(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

pub struct HarmonicAnalyzer<'a> {
    config: &'a EngineConfig,
    power_flow: &'a AcPowerFlowSolver,
    cancel: Option<CancellationToken>,
}

impl<'a> HarmonicAnalyzer<'a> {
    pub fn new(config: &'a EngineConfig, power_flow: &'a AcPowerFlowSolver) -> Self {
        Self {
            config,
            power_flow,
            cancel: None,
        }
    }

    /// Checked during the fundamental solve and before every order.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check_cancelled(&self) -> VoltaResult<()> {
        self.cancel.as_ref().map_or(Ok(()), CancellationToken::check)
    }

    pub fn analyze(&self, network: &Network) -> VoltaResult<HarmonicAnalysisResult> {
        let orders = normalize_orders(&network.settings.harmonic_orders)?;
        let model = SystemModel::compile(network)?;
        let ybus = SparseYBus::from_model(&model)?;
        let options = LoadFlowOptions {
            cancel: self.cancel.clone(),
            ..LoadFlowOptions::default()
        };
        let state = self.power_flow.solve_state(&model, &ybus, &options)?;
        if !state.converged {
            warn!(
                iterations = state.iterations,
                "fundamental load flow did not converge; harmonics use the last iterate"
            );
        }
        let fundamental = FundamentalState::new(&model, state.voltages());
        let stiff = network::stiff_buses(&model);
        let backend = self.config.power_flow.linear_solver.build_solver();

        let solved = crate::map_cases(&orders, self.config.parallel, |&h| {
            self.check_cancelled()?;
            network::solve_order(&model, &fundamental, &stiff, h, backend.as_ref())
        });
        let solved: Vec<(Vec<Complex64>, Vec<Complex64>)> =
            solved.into_iter().collect::<VoltaResult<_>>()?;

        let short_circuit = ShortCircuitLevels::new(&model, backend.as_ref());
        let harmonics = &self.config.harmonics;

        let pcc = harmonics
            .pcc_bus
            .clone()
            .filter(|id| model.bus_index(id).is_some())
            .or_else(|| {
                model
                    .buses
                    .iter()
                    .find(|b| b.bus_type == BusType::Slack)
                    .map(|b| b.id.clone())
            });

        let mut buses = Vec::new();
        let mut violations = Vec::new();
        let mut total_demand = 0.0;

        for (k, bus) in model.reported_buses() {
            let v1 = fundamental.voltages[k].norm();
            let voltages: Vec<HarmonicVoltage> = orders
                .iter()
                .zip(&solved)
                .map(|(&order, (v, _))| HarmonicVoltage {
                    order,
                    magnitude_pu: v[k].norm(),
                    angle_deg: v[k].arg().to_degrees(),
                    individual_pct: if v1 > 0.0 { v[k].norm() / v1 * 100.0 } else { 0.0 },
                })
                .collect();
            let thd_v_pct = if v1 > 0.0 {
                rss(voltages.iter().map(|v| v.magnitude_pu)) / v1 * 100.0
            } else {
                0.0
            };

            let nonlinear: Vec<usize> = model
                .loads
                .iter()
                .enumerate()
                .filter(|(_, l)| l.bus == k && l.harmonics.is_some())
                .map(|(i, _)| i)
                .collect();
            let (currents, thd_i_pct, tdd_pct, short_circuit_ratio) = if nonlinear.is_empty() {
                (Vec::new(), None, None, None)
            } else {
                let i1: Complex64 = nonlinear.iter().map(|&i| fundamental.load_currents[i]).sum();
                let demand: f64 = nonlinear
                    .iter()
                    .map(|&i| {
                        model.loads[i]
                            .demand_current_pu
                            .unwrap_or_else(|| fundamental.load_currents[i].norm())
                    })
                    .sum();
                total_demand += demand;
                let currents: Vec<HarmonicCurrent> = orders
                    .iter()
                    .zip(&solved)
                    .map(|(&order, (_, injection))| HarmonicCurrent {
                        order,
                        magnitude_pu: injection[k].norm(),
                        pct_of_demand: if demand > 0.0 {
                            injection[k].norm() / demand * 100.0
                        } else {
                            0.0
                        },
                    })
                    .collect();
                let harmonic_rss = rss(currents.iter().map(|c| c.magnitude_pu));
                let thd_i = (i1.norm() > 0.0).then(|| harmonic_rss / i1.norm() * 100.0);
                let tdd = (demand > 0.0).then(|| harmonic_rss / demand * 100.0);
                let ratio = short_circuit
                    .isc_pu(k, v1)
                    .filter(|_| demand > 0.0)
                    .map(|isc| isc / demand);
                (currents, thd_i, tdd, ratio)
            };

            let individual: Vec<(u32, f64)> =
                voltages.iter().map(|v| (v.order, v.individual_pct)).collect();
            violations.extend(ieee519::check_voltage(
                harmonics,
                &bus.id,
                bus.base_kv,
                &individual,
                thd_v_pct,
            ));
            if let (Some(tdd), false) = (tdd_pct, pcc.as_ref() == Some(&bus.id)) {
                let individual: Vec<(u32, f64)> =
                    currents.iter().map(|c| (c.order, c.pct_of_demand)).collect();
                violations.extend(ieee519::check_current(
                    harmonics,
                    &bus.id,
                    short_circuit_ratio,
                    &individual,
                    tdd,
                ));
            }

            buses.push(BusHarmonics {
                bus: bus.id.clone(),
                nominal_kv: bus.base_kv,
                fundamental_pu: v1,
                voltages,
                thd_v_pct,
                currents,
                thd_i_pct,
                tdd_pct,
                short_circuit_ratio,
            });
        }

        // Aggregate current distortion seen at the point of common coupling
        let aggregate: Vec<(u32, f64)> = orders
            .iter()
            .zip(&solved)
            .map(|(&order, (_, injection))| {
                let total: Complex64 = injection.iter().sum();
                (order, total.norm())
            })
            .collect();
        let system_tdd_pct = (total_demand > 0.0)
            .then(|| rss(aggregate.iter().map(|(_, i)| *i)) / total_demand * 100.0);
        if let (Some(tdd), Some(pcc_id)) = (system_tdd_pct, pcc.as_ref()) {
            let ratio = model.bus_index(pcc_id).and_then(|k| {
                short_circuit
                    .isc_pu(k, fundamental.voltages[k].norm())
                    .map(|isc| isc / total_demand)
            });
            let individual: Vec<(u32, f64)> = aggregate
                .iter()
                .map(|&(order, i)| (order, i / total_demand * 100.0))
                .collect();
            violations.extend(ieee519::check_current(
                harmonics,
                pcc_id,
                ratio,
                &individual,
                tdd,
            ));
        }

        let worst = buses
            .iter()
            .max_by(|a, b| a.thd_v_pct.total_cmp(&b.thd_v_pct));
        let system_thd_pct = worst.map_or(0.0, |b| b.thd_v_pct);
        let worst_bus = worst.filter(|b| b.thd_v_pct > 0.0).map(|b| b.bus.clone());

        info!(
            orders = orders.len(),
            system_thd_pct,
            violations = violations.len(),
            "harmonic analysis complete"
        );

        Ok(HarmonicAnalysisResult {
            orders,
            fundamental_converged: state.converged,
            buses,
            system_thd_pct,
            worst_bus,
            system_tdd_pct,
            pcc_bus: pcc,
            ieee519_compliant: violations.is_empty(),
            violations,
        })
    }
}

/// Three-phase short-circuit level from the positive-sequence network, used
/// for the Isc/IL ratio.
struct ShortCircuitLevels<'a> {
    positive: Option<Vec<Vec<Complex64>>>,
    backend: &'a dyn LinearSystemBackend,
}

impl<'a> ShortCircuitLevels<'a> {
    fn new(model: &SystemModel, backend: &'a dyn LinearSystemBackend) -> Self {
        let positive = match SequenceNetworks::build(model) {
            Ok(networks) if networks.positive_sources > 0 => Some(networks.positive.to_dense()),
            Ok(_) => None,
            Err(err) => {
                debug!(%err, "no short-circuit levels for harmonic limits");
                None
            }
        };
        Self { positive, backend }
    }

    fn isc_pu(&self, bus: usize, v: f64) -> Option<f64> {
        let y = self.positive.as_ref()?;
        let mut e = vec![Complex64::new(0.0, 0.0); y.len()];
        e[bus] = Complex64::new(1.0, 0.0);
        let z = self.backend.solve_complex(y, &e).ok()?[bus];
        (z.norm() < OPEN_CIRCUIT_IMPEDANCE && z.norm() > 0.0).then(|| v / z.norm())
    }
}
