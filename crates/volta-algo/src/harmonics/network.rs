//! Network admittance and current injections at a harmonic order.
//!
//! | Element            | Model at order h                         |
//! |--------------------|------------------------------------------|
//! | Series branch      | r + j·h·x, tap kept, phase shift dropped |
//! | Line charging      | j·h·b                                    |
//! | Capacitive shunt   | j·h·b                                    |
//! | Inductive shunt    | j·b / h                                  |
//! | Machine            | 1 / (ra + j·h·x''d) on system base       |
//! | Linear load        | G − j·B/h from solved P, Q and |V|       |
//! | Non-linear load    | current source I1·m_h ∠(φ_h + h·θ1)      |
//!
//! Inverter-based sources are open at harmonic frequencies. A slack bus
//! with no machine data behind it is an ideal source and is held at zero
//! harmonic voltage.

use num_complex::Complex64;
use volta_core::{BusType, LinearSystemBackend, VoltaResult};

use crate::model::SystemModel;
use crate::short_circuit::sequence::GROUND_LEAK;
use crate::sparse::BranchStamp;

/// Fundamental operating point the harmonic models are linearized around.
#[derive(Debug, Clone)]
pub struct FundamentalState {
    pub voltages: Vec<Complex64>,
    /// Fundamental current drawn by each load, aligned with `model.loads`
    pub load_currents: Vec<Complex64>,
}

impl FundamentalState {
    pub fn new(model: &SystemModel, voltages: Vec<Complex64>) -> Self {
        let load_currents = model
            .loads
            .iter()
            .map(|load| {
                let v = voltages[load.bus];
                let (p, q) = load.power_at(v.norm());
                if v.norm() > 1e-9 {
                    (Complex64::new(p, q) / v).conj()
                } else {
                    Complex64::new(0.0, 0.0)
                }
            })
            .collect();
        Self {
            voltages,
            load_currents,
        }
    }
}

/// Buses held at zero harmonic voltage.
pub fn stiff_buses(model: &SystemModel) -> Vec<bool> {
    (0..model.n_bus())
        .map(|i| {
            model.buses[i].bus_type == BusType::Slack
                && !model
                    .generators_at(i)
                    .any(|g| g.reactances.is_some() && !g.kind.is_inverter_based())
        })
        .collect()
}

/// Dense bus admittance at order `h`.
pub fn harmonic_admittance(
    model: &SystemModel,
    state: &FundamentalState,
    order: u32,
) -> Vec<Vec<Complex64>> {
    let n = model.n_bus();
    let h = f64::from(order);
    let mut y = vec![vec![Complex64::new(0.0, 0.0); n]; n];

    for branch in &model.branches {
        let z = Complex64::new(branch.z_series.re, branch.z_series.im * h);
        if z.norm() < 1e-12 {
            continue;
        }
        let stamp = BranchStamp::pi_model(
            branch.from,
            branch.to,
            z.inv(),
            branch.charging_b * h,
            branch.tap,
            0.0,
        );
        y[stamp.from][stamp.from] += stamp.y_ff;
        y[stamp.from][stamp.to] += stamp.y_ft;
        y[stamp.to][stamp.from] += stamp.y_tf;
        y[stamp.to][stamp.to] += stamp.y_tt;
    }

    for (i, bus) in model.buses.iter().enumerate() {
        let b = if bus.shunt.im >= 0.0 {
            bus.shunt.im * h
        } else {
            bus.shunt.im / h
        };
        y[i][i] += Complex64::new(bus.shunt.re + GROUND_LEAK, b);
    }

    for gen in &model.generators {
        if gen.kind.is_inverter_based() {
            continue;
        }
        let Some(x) = gen.reactances else {
            continue;
        };
        let z = Complex64::new(x.ra, x.xd_double_prime * h) * gen.impedance_scale(model.base_mva);
        if z.norm() > 1e-12 {
            y[gen.bus][gen.bus] += z.inv();
        }
    }

    for load in model.loads.iter().filter(|l| l.harmonics.is_none()) {
        let v = state.voltages[load.bus].norm();
        if v < 1e-9 {
            continue;
        }
        let (p, q) = load.power_at(v);
        let v2 = v * v;
        y[load.bus][load.bus] += Complex64::new(p / v2, -q / v2 / h);
    }

    y
}

/// Harmonic current injected at each bus by non-linear loads.
pub fn harmonic_injections(
    model: &SystemModel,
    state: &FundamentalState,
    order: u32,
) -> Vec<Complex64> {
    let mut injection = vec![Complex64::new(0.0, 0.0); model.n_bus()];
    for (load, i1) in model.loads.iter().zip(&state.load_currents) {
        if let Some(i_h) = load_harmonic_current(load.harmonics.as_ref(), *i1, order) {
            injection[load.bus] += i_h;
        }
    }
    injection
}

/// I_h = |I1|·m_h/100 ∠(φ_h + h·θ1) for one load.
pub fn load_harmonic_current(
    spectrum: Option<&volta_core::HarmonicSpectrum>,
    fundamental: Complex64,
    order: u32,
) -> Option<Complex64> {
    let component = spectrum?.component(order)?;
    let angle = component.angle_deg.to_radians() + f64::from(order) * fundamental.arg();
    Some(Complex64::from_polar(
        fundamental.norm() * component.magnitude_pct / 100.0,
        angle,
    ))
}

/// Solve Y_h·V_h = I_h with stiff buses pinned to zero.
pub fn solve_order(
    model: &SystemModel,
    state: &FundamentalState,
    stiff: &[bool],
    order: u32,
    backend: &dyn LinearSystemBackend,
) -> VoltaResult<(Vec<Complex64>, Vec<Complex64>)> {
    let mut y = harmonic_admittance(model, state, order);
    let injection = harmonic_injections(model, state, order);
    let mut rhs = injection.clone();
    let zero = Complex64::new(0.0, 0.0);
    for (k, _) in stiff.iter().enumerate().filter(|(_, &s)| s) {
        for row in y.iter_mut() {
            row[k] = zero;
        }
        y[k].iter_mut().for_each(|entry| *entry = zero);
        y[k][k] = Complex64::new(1.0, 0.0);
        rhs[k] = zero;
    }
    let voltages = backend.solve_complex(&y, &rhs)?;
    Ok((voltages, injection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use volta_core::{
        Branch, Bus, BusType, HarmonicSpectrum, Kilovolts, Load, Network, SolverKind,
    };

    fn feeder(harmonic_load: bool) -> (SystemModel, FundamentalState) {
        let mut network = Network::new();
        network.add_bus(Bus::new("S", BusType::Slack, Kilovolts(13.8)));
        network.add_bus(Bus::new("L", BusType::Pq, Kilovolts(13.8)).with_shunt(0.0, 0.05));
        network.add_branch(Branch::new("F1", "S", "L", 0.01, 0.1)).unwrap();
        let mut load = Load::new("LD", "L", 10.0, 0.0);
        if harmonic_load {
            load = load.with_harmonics(HarmonicSpectrum::from_magnitudes(&[(5, 20.0)]));
        }
        network.add_load(load);
        let model = SystemModel::compile(&network).unwrap();
        let voltages = vec![Complex64::new(1.0, 0.0); model.n_bus()];
        let state = FundamentalState::new(&model, voltages);
        (model, state)
    }

    #[test]
    fn reactances_scale_with_order() {
        let (model, state) = feeder(false);
        let y5 = harmonic_admittance(&model, &state, 5);
        let l = model.bus_index(&"L".into()).unwrap();
        let s = model.bus_index(&"S".into()).unwrap();
        let expected = -Complex64::new(0.01, 0.5).inv();
        assert!((y5[l][s] - expected).norm() < 1e-9);
        // Capacitor 0.05 pu scales up, linear load 0.1 pu stays resistive
        let diag = y5[l][l] + y5[l][s];
        assert!((diag.im - 0.25).abs() < 1e-9);
        assert!((diag.re - 0.1).abs() < 1e-6);
    }

    #[test]
    fn slack_without_machine_data_is_stiff() {
        let (model, state) = feeder(true);
        let stiff = stiff_buses(&model);
        let s = model.bus_index(&"S".into()).unwrap();
        assert!(stiff[s]);

        let backend = SolverKind::Gauss.build_solver();
        let (v, i) = solve_order(&model, &state, &stiff, 5, backend.as_ref()).unwrap();
        assert_eq!(v[s], Complex64::new(0.0, 0.0));
        let l = model.bus_index(&"L".into()).unwrap();
        // 20 % of 0.1 pu
        assert!((i[l].norm() - 0.02).abs() < 1e-9);
        assert!(v[l].norm() > 0.0);
    }

    #[test]
    fn linear_loads_inject_nothing() {
        let (model, state) = feeder(false);
        assert!(harmonic_injections(&model, &state, 5)
            .iter()
            .all(|i| i.norm() == 0.0));
    }
}
