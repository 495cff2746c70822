//! # AC Power Flow with Newton-Raphson
//!
//! Full polar Newton-Raphson with PV→PQ switching on generator reactive
//! limits and voltage-dependent (ZIP / exponential) loads.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  NEWTON-RAPHSON ITERATION                                                │
//! │                                                                           │
//! │  1. Mismatch    ΔP = P_gen − P_load(V) − P_calc(V, θ)   (non-slack)      │
//! │                 ΔQ = Q_gen − Q_load(V) − Q_calc(V, θ)   (PQ only)        │
//! │  2. Jacobian    J = ∂(P_calc + P_load, Q_calc + Q_load)/∂(θ, V)           │
//! │  3. Solve       J × [Δθ, ΔV]ᵀ = [ΔP, ΔQ]ᵀ                                 │
//! │  4. Update      x ← x + α·Δx     (α = acceleration factor)                │
//! │  5. Stop        max |mismatch| < tolerance                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Voltage-dependent loads only touch the diagonal of the ∂/∂V blocks, since
//! a load's demand depends on its own bus voltage alone.
//!
//! ## Q-limit enforcement
//!
//! After each converged inner solve the reactive output at every PV bus is
//! compared with the sum of its generators' limits. A violating bus becomes
//! PQ with Q pinned at the violated limit and the solve resumes from the
//! current voltages. A switched bus stays PQ for the rest of the run.
//!
//! ## References
//!
//! - **Tinney & Hart (1967)**: "Power Flow Solution by Newton's Method"
//!   IEEE Trans. PAS, 86(11), 1449-1460.
//!   DOI: [10.1109/TPAS.1967.291823](https://doi.org/10.1109/TPAS.1967.291823)

use std::collections::HashMap;

use num_complex::Complex64;
use tracing::{debug, info, warn};
use volta_core::{
    BusId, BusType, CancellationToken, LinearSystemBackend, SolverKind, VoltaError, VoltaResult,
};

use super::results::{BranchFlow, BusResult, GeneratorResult, LoadFlowResult, VoltageProfile};
use crate::model::SystemModel;
use crate::sparse::SparseYBus;

/// Per-call options for a load flow.
#[derive(Debug, Clone, Default)]
pub struct LoadFlowOptions {
    /// Seed unknown voltages from a prior result
    pub warm_start: Option<LoadFlowResult>,
    pub cancel: Option<CancellationToken>,
}

impl LoadFlowOptions {
    pub fn with_warm_start(mut self, prior: LoadFlowResult) -> Self {
        self.warm_start = Some(prior);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Which reactive limit a switched bus is pinned at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QLimit {
    Min,
    Max,
}

/// Raw solver state over all model buses, star points included.
#[derive(Debug, Clone)]
pub struct PowerFlowState {
    pub converged: bool,
    pub iterations: usize,
    pub max_mismatch: f64,
    pub v_mag: Vec<f64>,
    pub v_ang: Vec<f64>,
    pub bus_types: Vec<BusType>,
    pub pv_to_pq: Vec<BusId>,
    q_limited: Vec<Option<QLimit>>,
}

impl PowerFlowState {
    /// Complex bus voltages.
    pub fn voltages(&self) -> Vec<Complex64> {
        self.v_mag
            .iter()
            .zip(&self.v_ang)
            .map(|(&v, &a)| Complex64::from_polar(v, a))
            .collect()
    }
}

/// AC power flow solver configuration
#[derive(Debug, Clone)]
pub struct AcPowerFlowSolver {
    /// Convergence tolerance for power mismatches (pu)
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Scale applied to each Newton correction
    pub acceleration_factor: f64,
    /// Whether to enforce generator Q limits (PV-PQ switching)
    pub enforce_q_limits: bool,
    /// Maximum outer iterations for Q-limit enforcement
    pub max_q_iterations: usize,
    /// Start unknowns at 1.0∠0 instead of the stored bus voltages
    pub flat_start: bool,
    pub linear_solver: SolverKind,
    /// Voltage band for buses without their own limits
    pub voltage_band: (f64, f64),
}

impl Default for AcPowerFlowSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AcPowerFlowSolver {
    pub fn new() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 20,
            acceleration_factor: 1.0,
            enforce_q_limits: true,
            max_q_iterations: 10,
            flat_start: true,
            linear_solver: SolverKind::default(),
            voltage_band: (0.95, 1.05),
        }
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    pub fn with_acceleration_factor(mut self, alpha: f64) -> Self {
        self.acceleration_factor = alpha;
        self
    }

    pub fn with_q_limit_enforcement(mut self, enable: bool) -> Self {
        self.enforce_q_limits = enable;
        self
    }

    pub fn with_linear_solver(mut self, kind: SolverKind) -> Self {
        self.linear_solver = kind;
        self
    }

    pub fn with_voltage_band(mut self, vmin: f64, vmax: f64) -> Self {
        self.voltage_band = (vmin, vmax);
        self
    }

    fn check_parameters(&self) -> VoltaResult<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(VoltaError::Parameter(format!(
                "convergence tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(VoltaError::Parameter(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !(self.acceleration_factor > 0.0 && self.acceleration_factor <= 2.0) {
            return Err(VoltaError::Parameter(format!(
                "acceleration factor must lie in (0, 2], got {}",
                self.acceleration_factor
            )));
        }
        Ok(())
    }

    /// Solve and assemble the full report.
    pub fn solve(&self, model: &SystemModel, options: &LoadFlowOptions) -> VoltaResult<LoadFlowResult> {
        let ybus = SparseYBus::from_model(model)?;
        let state = self.solve_state(model, &ybus, options)?;
        Ok(self.build_result(model, &ybus, &state))
    }

    /// Run the iteration and return raw voltages.
    pub fn solve_state(
        &self,
        model: &SystemModel,
        ybus: &SparseYBus,
        options: &LoadFlowOptions,
    ) -> VoltaResult<PowerFlowState> {
        self.check_parameters()?;
        let backend = self.linear_solver.build_solver();
        let n = model.n_bus();
        let mut bus_types = model.effective_bus_types();
        let (mut v_mag, mut v_ang) = self.initial_state(model, &bus_types, options);

        let mut p_gen = vec![0.0; n];
        let mut q_gen = vec![0.0; n];
        for gen in &model.generators {
            p_gen[gen.bus] += gen.p_pu;
            q_gen[gen.bus] += gen.q_pu;
        }
        let mut q_limited: Vec<Option<QLimit>> = vec![None; n];
        let mut pv_to_pq = Vec::new();
        let rows: Vec<Vec<(usize, Complex64)>> = (0..n).map(|i| ybus.row_entries(i)).collect();

        let mut total_iterations = 0;
        let mut q_iter = 0;
        loop {
            let nr = self.newton_raphson(
                model,
                &rows,
                &bus_types,
                &p_gen,
                &q_gen,
                &mut v_mag,
                &mut v_ang,
                backend.as_ref(),
                options.cancel.as_ref(),
            )?;
            total_iterations += nr.iterations;

            if !nr.converged {
                warn!(
                    iterations = total_iterations,
                    max_mismatch = nr.max_mismatch,
                    "power flow did not converge"
                );
                return Ok(PowerFlowState {
                    converged: false,
                    iterations: total_iterations,
                    max_mismatch: nr.max_mismatch,
                    v_mag,
                    v_ang,
                    bus_types,
                    pv_to_pq,
                    q_limited,
                });
            }

            if !self.enforce_q_limits || q_iter >= self.max_q_iterations {
                info!(
                    iterations = total_iterations,
                    max_mismatch = nr.max_mismatch,
                    "power flow converged"
                );
                return Ok(PowerFlowState {
                    converged: true,
                    iterations: total_iterations,
                    max_mismatch: nr.max_mismatch,
                    v_mag,
                    v_ang,
                    bus_types,
                    pv_to_pq,
                    q_limited,
                });
            }

            let (_, q_calc) = compute_power(&rows, &v_mag, &v_ang);
            let mut switched = false;
            for i in 0..n {
                if bus_types[i] != BusType::Pv {
                    continue;
                }
                let (_, q_load) = bus_load(model, i, v_mag[i]);
                let q_needed = q_calc[i] + q_load;
                let (qmin, qmax) = model
                    .generators_at(i)
                    .fold((0.0, 0.0), |(lo, hi), g| (lo + g.qmin_pu, hi + g.qmax_pu));
                let limit = if q_needed > qmax {
                    Some((QLimit::Max, qmax))
                } else if q_needed < qmin {
                    Some((QLimit::Min, qmin))
                } else {
                    None
                };
                if let Some((which, q_pinned)) = limit {
                    info!(
                        bus = %model.buses[i].id,
                        q_required_pu = q_needed,
                        q_limit_pu = q_pinned,
                        "generator reactive limit reached, switching PV -> PQ"
                    );
                    bus_types[i] = BusType::Pq;
                    q_gen[i] = q_pinned;
                    q_limited[i] = Some(which);
                    pv_to_pq.push(model.buses[i].id.clone());
                    switched = true;
                }
            }
            if !switched {
                info!(
                    iterations = total_iterations,
                    max_mismatch = nr.max_mismatch,
                    "power flow converged"
                );
                return Ok(PowerFlowState {
                    converged: true,
                    iterations: total_iterations,
                    max_mismatch: nr.max_mismatch,
                    v_mag,
                    v_ang,
                    bus_types,
                    pv_to_pq,
                    q_limited,
                });
            }
            q_iter += 1;
            debug!(q_iteration = q_iter, "re-solving after PV -> PQ switching");
        }
    }

    fn initial_state(
        &self,
        model: &SystemModel,
        bus_types: &[BusType],
        options: &LoadFlowOptions,
    ) -> (Vec<f64>, Vec<f64>) {
        let n = model.n_bus();
        let mut v_mag = vec![1.0; n];
        let mut v_ang = vec![0.0; n];
        let warm: HashMap<&BusId, (f64, f64)> = options
            .warm_start
            .as_ref()
            .map(|prior| {
                prior
                    .buses
                    .iter()
                    .map(|b| (&b.id, (b.voltage_pu, b.angle_deg.to_radians())))
                    .collect()
            })
            .unwrap_or_default();

        for (i, bus) in model.buses.iter().enumerate() {
            let setpoint = model.generators_at(i).find_map(|g| g.voltage_setpoint);
            match bus_types[i] {
                BusType::Slack => {
                    v_mag[i] = setpoint.unwrap_or(bus.initial_voltage);
                    v_ang[i] = bus.initial_angle_rad;
                    continue;
                }
                BusType::Pv => v_mag[i] = setpoint.unwrap_or(bus.initial_voltage),
                BusType::Pq if !self.flat_start => v_mag[i] = bus.initial_voltage,
                BusType::Pq => {}
            }
            if !self.flat_start {
                v_ang[i] = bus.initial_angle_rad;
            }
            if let Some(&(v, a)) = warm.get(&bus.id) {
                if bus_types[i] == BusType::Pq {
                    v_mag[i] = v;
                }
                v_ang[i] = a;
            }
        }
        (v_mag, v_ang)
    }

    #[allow(clippy::too_many_arguments)]
    fn newton_raphson(
        &self,
        model: &SystemModel,
        rows: &[Vec<(usize, Complex64)>],
        bus_types: &[BusType],
        p_gen: &[f64],
        q_gen: &[f64],
        v_mag: &mut [f64],
        v_ang: &mut [f64],
        backend: &dyn LinearSystemBackend,
        cancel: Option<&CancellationToken>,
    ) -> VoltaResult<NrOutcome> {
        let n = v_mag.len();
        let p_buses: Vec<usize> = (0..n).filter(|&i| bus_types[i] != BusType::Slack).collect();
        let q_buses: Vec<usize> = (0..n).filter(|&i| bus_types[i] == BusType::Pq).collect();
        let n_p = p_buses.len();
        let n_vars = n_p + q_buses.len();

        let mut p_pos = vec![None; n];
        let mut q_pos = vec![None; n];
        for (k, &i) in p_buses.iter().enumerate() {
            p_pos[i] = Some(k);
        }
        for (k, &i) in q_buses.iter().enumerate() {
            q_pos[i] = Some(n_p + k);
        }

        for iter in 0..self.max_iterations {
            if let Some(token) = cancel {
                token.check()?;
            }

            let (p_calc, q_calc) = compute_power(rows, v_mag, v_ang);
            let mut mismatch = vec![0.0; n_vars];
            let mut max_mismatch: f64 = 0.0;
            for (k, &i) in p_buses.iter().enumerate() {
                let (p_load, _) = bus_load(model, i, v_mag[i]);
                mismatch[k] = p_gen[i] - p_load - p_calc[i];
                max_mismatch = f64::max(max_mismatch, mismatch[k].abs());
            }
            for (k, &i) in q_buses.iter().enumerate() {
                let (_, q_load) = bus_load(model, i, v_mag[i]);
                mismatch[n_p + k] = q_gen[i] - q_load - q_calc[i];
                max_mismatch = f64::max(max_mismatch, mismatch[n_p + k].abs());
            }

            debug!(iteration = iter, max_mismatch, "newton-raphson mismatch");
            if !max_mismatch.is_finite() {
                return Ok(NrOutcome {
                    converged: false,
                    iterations: iter,
                    max_mismatch,
                });
            }
            if max_mismatch < self.tolerance {
                return Ok(NrOutcome {
                    converged: true,
                    iterations: iter,
                    max_mismatch,
                });
            }

            let jacobian = build_jacobian(
                model, rows, v_mag, v_ang, &p_calc, &q_calc, &p_buses, &q_buses, &p_pos, &q_pos,
            );
            let delta = backend.solve(&jacobian, &mismatch).map_err(|err| match err {
                VoltaError::Numerical(msg) => VoltaError::Numerical(format!(
                    "singular Jacobian at iteration {}: {}",
                    iter + 1,
                    msg
                )),
                other => other,
            })?;

            let alpha = self.acceleration_factor;
            for (k, &i) in p_buses.iter().enumerate() {
                v_ang[i] += alpha * delta[k];
            }
            for (k, &i) in q_buses.iter().enumerate() {
                v_mag[i] += alpha * delta[n_p + k];
            }
        }

        // Mismatch after the final correction
        let (p_calc, q_calc) = compute_power(rows, v_mag, v_ang);
        let final_mismatch = p_buses
            .iter()
            .map(|&i| (p_gen[i] - bus_load(model, i, v_mag[i]).0 - p_calc[i]).abs())
            .chain(
                q_buses
                    .iter()
                    .map(|&i| (q_gen[i] - bus_load(model, i, v_mag[i]).1 - q_calc[i]).abs()),
            )
            .fold(0.0, f64::max);
        if final_mismatch < self.tolerance {
            return Ok(NrOutcome {
                converged: true,
                iterations: self.max_iterations,
                max_mismatch: final_mismatch,
            });
        }
        Ok(NrOutcome {
            converged: false,
            iterations: self.max_iterations,
            max_mismatch: final_mismatch,
        })
    }

    /// Assemble the reported result from a solved state.
    pub fn build_result(
        &self,
        model: &SystemModel,
        ybus: &SparseYBus,
        state: &PowerFlowState,
    ) -> LoadFlowResult {
        let base = model.base_mva;
        let rows: Vec<Vec<(usize, Complex64)>> =
            (0..model.n_bus()).map(|i| ybus.row_entries(i)).collect();
        let (p_calc, q_calc) = compute_power(&rows, &state.v_mag, &state.v_ang);
        let voltages = state.voltages();

        let mut generators = Vec::with_capacity(model.generators.len());
        // Slack and PV buses without a generator element still supply power
        let mut unassigned = Complex64::new(0.0, 0.0);
        for (i, bus) in model.buses.iter().enumerate() {
            let gens: Vec<_> = model.generators_at(i).collect();
            let (p_load, q_load) = bus_load(model, i, state.v_mag[i]);
            if gens.is_empty() {
                match state.bus_types[i] {
                    BusType::Slack => {
                        unassigned += Complex64::new(p_calc[i] + p_load, q_calc[i] + q_load)
                    }
                    BusType::Pv => unassigned.im += q_calc[i] + q_load,
                    BusType::Pq => {}
                }
                continue;
            }
            let rated_total: f64 = gens.iter().map(|g| g.rated_mva).sum();
            let share = |rated: f64| {
                if rated_total > 0.0 {
                    rated / rated_total
                } else {
                    1.0 / gens.len() as f64
                }
            };
            for g in &gens {
                let p = match state.bus_types[i] {
                    BusType::Slack => (p_calc[i] + p_load) * share(g.rated_mva),
                    _ => g.p_pu,
                };
                let (q, at_limit) = match (state.bus_types[i], state.q_limited[i]) {
                    (_, Some(QLimit::Max)) => (g.qmax_pu, true),
                    (_, Some(QLimit::Min)) => (g.qmin_pu, true),
                    (BusType::Pq, None) => (g.q_pu, false),
                    _ => ((q_calc[i] + q_load) * share(g.rated_mva), false),
                };
                generators.push(GeneratorResult {
                    id: g.id.clone(),
                    bus: bus.id.clone(),
                    p_mw: p * base,
                    q_mvar: q * base,
                    at_q_limit: at_limit,
                });
            }
        }

        let mut buses = Vec::new();
        let mut total_load = Complex64::new(0.0, 0.0);
        let mut total_shunt_mw = 0.0;
        for (i, bus) in model.buses.iter().enumerate() {
            let (p_load, q_load) = bus_load(model, i, state.v_mag[i]);
            total_load += Complex64::new(p_load, q_load);
            total_shunt_mw += state.v_mag[i] * state.v_mag[i] * bus.shunt.re * base;
            if bus.auxiliary {
                continue;
            }
            buses.push(BusResult {
                id: bus.id.clone(),
                bus_type: state.bus_types[i],
                voltage_pu: state.v_mag[i],
                angle_deg: state.v_ang[i].to_degrees(),
                voltage_kv: state.v_mag[i] * bus.base_kv,
                p_injection_mw: p_calc[i] * base,
                q_injection_mvar: q_calc[i] * base,
                load_mw: p_load * base,
                load_mvar: q_load * base,
            });
        }

        let mut branches = Vec::with_capacity(model.branches.len());
        let mut losses = Complex64::new(0.0, 0.0);
        for branch in &model.branches {
            let stamp = branch.stamp();
            let i_from = stamp.from_current(&voltages);
            let i_to = stamp.to_current(&voltages);
            let s_from = voltages[branch.from] * i_from.conj();
            let s_to = voltages[branch.to] * i_to.conj();
            let loss = s_from + s_to;
            losses += loss;
            let current_pu = i_from.norm().max(i_to.norm());
            branches.push(BranchFlow {
                element: branch.element.clone(),
                label: branch.label.clone(),
                from_bus: model.buses[branch.from].id.clone(),
                to_bus: model.buses[branch.to].id.clone(),
                p_from_mw: s_from.re * base,
                q_from_mvar: s_from.im * base,
                p_to_mw: s_to.re * base,
                q_to_mvar: s_to.im * base,
                losses_mw: loss.re * base,
                losses_mvar: loss.im * base,
                current_pu,
                loading_pct: branch
                    .rating_mva
                    .filter(|r| *r > 0.0)
                    .map(|r| current_pu / (r / base) * 100.0),
            });
        }

        let limits: Vec<(&BusId, f64, (f64, f64))> = model
            .reported_buses()
            .map(|(i, bus)| {
                let band = (
                    bus.vmin_pu.unwrap_or(self.voltage_band.0),
                    bus.vmax_pu.unwrap_or(self.voltage_band.1),
                );
                (&bus.id, state.v_mag[i], band)
            })
            .collect();
        let voltage_profile = VoltageProfile::from_voltages(limits);

        let total_generation_mw =
            generators.iter().map(|g| g.p_mw).sum::<f64>() + unassigned.re * base;
        let total_generation_mvar =
            generators.iter().map(|g| g.q_mvar).sum::<f64>() + unassigned.im * base;

        LoadFlowResult {
            converged: state.converged,
            iterations: state.iterations,
            max_mismatch: state.max_mismatch,
            buses,
            generators,
            branches,
            total_generation_mw,
            total_generation_mvar,
            total_load_mw: total_load.re * base,
            total_load_mvar: total_load.im * base,
            total_losses_mw: losses.re * base,
            total_losses_mvar: losses.im * base,
            total_shunt_mw,
            voltage_profile,
            pv_to_pq: state.pv_to_pq.clone(),
        }
    }
}

/// Newton-Raphson iteration result
struct NrOutcome {
    converged: bool,
    iterations: usize,
    max_mismatch: f64,
}

/// Total load (P, Q) at bus `i` for voltage magnitude `v`.
fn bus_load(model: &SystemModel, i: usize, v: f64) -> (f64, f64) {
    model
        .loads_at(i)
        .map(|l| l.power_at(v))
        .fold((0.0, 0.0), |(p, q), (lp, lq)| (p + lp, q + lq))
}

/// P and Q injections from the current voltage state.
pub(crate) fn compute_power(
    rows: &[Vec<(usize, Complex64)>],
    v_mag: &[f64],
    v_ang: &[f64],
) -> (Vec<f64>, Vec<f64>) {
    let n = v_mag.len();
    let mut p = vec![0.0; n];
    let mut q = vec![0.0; n];
    for (i, row) in rows.iter().enumerate() {
        for &(j, y) in row {
            let theta_ij = v_ang[i] - v_ang[j];
            let (sin, cos) = theta_ij.sin_cos();
            // P_i = Σ V_i V_j (G_ij cos θ_ij + B_ij sin θ_ij)
            p[i] += v_mag[i] * v_mag[j] * (y.re * cos + y.im * sin);
            // Q_i = Σ V_i V_j (G_ij sin θ_ij − B_ij cos θ_ij)
            q[i] += v_mag[i] * v_mag[j] * (y.re * sin - y.im * cos);
        }
    }
    (p, q)
}

/// Dense Jacobian assembled from sparse Y-bus rows.
#[allow(clippy::too_many_arguments)]
fn build_jacobian(
    model: &SystemModel,
    rows: &[Vec<(usize, Complex64)>],
    v_mag: &[f64],
    v_ang: &[f64],
    p_calc: &[f64],
    q_calc: &[f64],
    p_buses: &[usize],
    q_buses: &[usize],
    p_pos: &[Option<usize>],
    q_pos: &[Option<usize>],
) -> Vec<Vec<f64>> {
    let n_vars = p_buses.len() + q_buses.len();
    let mut jacobian = vec![vec![0.0; n_vars]; n_vars];

    for &i in p_buses {
        let row_p = p_pos[i];
        let row_q = q_pos[i];
        for &(j, y) in &rows[i] {
            let (g, b) = (y.re, y.im);
            let (dp_dtheta, dp_dv, dq_dtheta, dq_dv) = if i == j {
                (
                    -q_calc[i] - b * v_mag[i] * v_mag[i],
                    p_calc[i] / v_mag[i] + g * v_mag[i],
                    p_calc[i] - g * v_mag[i] * v_mag[i],
                    q_calc[i] / v_mag[i] - b * v_mag[i],
                )
            } else {
                let (sin, cos) = (v_ang[i] - v_ang[j]).sin_cos();
                (
                    v_mag[i] * v_mag[j] * (g * sin - b * cos),
                    v_mag[i] * (g * cos + b * sin),
                    -v_mag[i] * v_mag[j] * (g * cos + b * sin),
                    v_mag[i] * (g * sin - b * cos),
                )
            };
            if let (Some(r), Some(c)) = (row_p, p_pos[j]) {
                jacobian[r][c] = dp_dtheta;
            }
            if let (Some(r), Some(c)) = (row_p, q_pos[j]) {
                jacobian[r][c] = dp_dv;
            }
            if let (Some(r), Some(c)) = (row_q, p_pos[j]) {
                jacobian[r][c] = dq_dtheta;
            }
            if let (Some(r), Some(c)) = (row_q, q_pos[j]) {
                jacobian[r][c] = dq_dv;
            }
        }

        // Load sensitivity on the diagonal of the ∂/∂V blocks
        if let Some(c) = q_pos[i] {
            let (dp, dq) = model
                .loads_at(i)
                .map(|l| l.sensitivity_at(v_mag[i]))
                .fold((0.0, 0.0), |(p, q), (lp, lq)| (p + lp, q + lq));
            if let Some(r) = row_p {
                jacobian[r][c] += dp;
            }
            jacobian[c][c] += dq;
        }
    }
    jacobian
}

#[cfg(test)]
mod tests {
    use super::*;
    use volta_core::{
        Branch, Bus, Generator, GeneratorKind, Kilovolts, Load, LoadModel, Network,
    };

    fn two_bus(load: Load) -> Network {
        let mut network = Network::new();
        network.add_bus(Bus::new("A", BusType::Slack, Kilovolts(13.8)));
        network.add_bus(Bus::new("B", BusType::Pq, Kilovolts(13.8)));
        network.add_branch(Branch::new("L1", "A", "B", 0.02, 0.08)).unwrap();
        network.add_generator(Generator::new("G1", "A", GeneratorKind::Synchronous));
        network.add_load(load);
        network
    }

    fn solve(network: &Network) -> LoadFlowResult {
        let model = SystemModel::compile(network).unwrap();
        AcPowerFlowSolver::new()
            .solve(&model, &LoadFlowOptions::default())
            .unwrap()
    }

    #[test]
    fn test_two_bus_converges() {
        let result = solve(&two_bus(Load::new("LD", "B", 50.0, 20.0)));
        assert!(result.converged);
        assert!(result.iterations <= 10);
        let vb = result.bus(&BusId::new("B")).unwrap().voltage_pu;
        assert!(vb > 0.90 && vb < 0.98, "|V_B| = {vb}");
        assert!(result.power_balance_error_mw().abs() < 1e-3);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let network = two_bus(Load::new("LD", "B", 50.0, 20.0));
        let model = SystemModel::compile(&network).unwrap();
        let ybus = SparseYBus::from_model(&model).unwrap();
        let rows: Vec<_> = (0..2).map(|i| ybus.row_entries(i)).collect();
        let v_mag = vec![1.0, 0.97];
        let v_ang = vec![0.0, -0.05];
        let (p, q) = compute_power(&rows, &v_mag, &v_ang);
        let jac = build_jacobian(
            &model, &rows, &v_mag, &v_ang, &p, &q, &[1], &[1], &[None, Some(0)], &[None, Some(1)],
        );

        let h = 1e-7;
        let (p_t, q_t) = compute_power(&rows, &v_mag, &[0.0, -0.05 + h]);
        assert!((jac[0][0] - (p_t[1] - p[1]) / h).abs() < 1e-4);
        assert!((jac[1][0] - (q_t[1] - q[1]) / h).abs() < 1e-4);
        let (p_v, q_v) = compute_power(&rows, &[1.0, 0.97 + h], &v_ang);
        assert!((jac[0][1] - (p_v[1] - p[1]) / h).abs() < 1e-4);
        assert!((jac[1][1] - (q_v[1] - q[1]) / h).abs() < 1e-4);
    }

    #[test]
    fn test_constant_impedance_load_draws_less_at_low_voltage() {
        let constant_power = solve(&two_bus(Load::new("LD", "B", 50.0, 20.0)));
        let constant_z = solve(&two_bus(
            Load::new("LD", "B", 50.0, 20.0).with_model(LoadModel::zip(0.0, 0.0, 100.0)),
        ));
        assert!(constant_z.converged);
        assert!(constant_z.total_load_mw < constant_power.total_load_mw);
        let vb = constant_z.bus(&BusId::new("B")).unwrap().voltage_pu;
        let expected = 50.0 * vb * vb;
        assert!((constant_z.total_load_mw - expected).abs() < 1e-4);
    }

    #[test]
    fn test_iteration_limit_reports_non_convergence() {
        let network = two_bus(Load::new("LD", "B", 50.0, 20.0));
        let model = SystemModel::compile(&network).unwrap();
        let result = AcPowerFlowSolver::new()
            .with_max_iterations(1)
            .solve(&model, &LoadFlowOptions::default())
            .unwrap();
        assert!(!result.converged);
        assert!(result.max_mismatch > 1e-6);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let network = two_bus(Load::new("LD", "B", 50.0, 20.0));
        let model = SystemModel::compile(&network).unwrap();
        let err = AcPowerFlowSolver::new()
            .with_tolerance(0.0)
            .solve(&model, &LoadFlowOptions::default())
            .unwrap_err();
        assert!(matches!(err, VoltaError::Parameter(_)));
        let err = AcPowerFlowSolver::new()
            .with_acceleration_factor(3.0)
            .solve(&model, &LoadFlowOptions::default())
            .unwrap_err();
        assert!(matches!(err, VoltaError::Parameter(_)));
    }

    #[test]
    fn test_acceleration_factor_still_converges() {
        let network = two_bus(Load::new("LD", "B", 50.0, 20.0));
        let model = SystemModel::compile(&network).unwrap();
        let plain = AcPowerFlowSolver::new()
            .solve(&model, &LoadFlowOptions::default())
            .unwrap();
        let damped = AcPowerFlowSolver::new()
            .with_acceleration_factor(0.8)
            .with_max_iterations(60)
            .solve(&model, &LoadFlowOptions::default())
            .unwrap();
        assert!(damped.converged);
        assert!(damped.iterations > plain.iterations);
        let vb = |r: &LoadFlowResult| r.bus(&BusId::new("B")).unwrap().voltage_pu;
        assert!((vb(&plain) - vb(&damped)).abs() < 1e-5);
    }
}
