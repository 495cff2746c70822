use volta_algo::{
    perform_load_flow, perform_load_flow_with, LoadFlowOptions, SparseYBus, SystemModel,
};
use volta_core::{
    Branch, Bus, BusId, BusType, CancellationToken, Generator, GeneratorKind, Kilovolts, Load,
    Network, Transformer, VoltaError,
};

/// Slack at A (1.0∠0°), 0.5 + j0.2 pu load at B through 0.02 + j0.08 pu.
fn two_bus() -> Network {
    let mut network = Network::new();
    network.add_bus(Bus::new("A", BusType::Slack, Kilovolts(13.8)));
    network.add_bus(Bus::new("B", BusType::Pq, Kilovolts(13.8)));
    network.add_generator(Generator::new("G1", "A", GeneratorKind::Synchronous));
    network
        .add_branch(Branch::new("L1", "A", "B", 0.02, 0.08))
        .unwrap();
    network.add_load(Load::new("LD", "B", 50.0, 20.0));
    network
}

/// Meshed 69/13.8 kV system with line charging, a capacitor bank and a
/// second machine.
fn meshed() -> Network {
    let mut network = Network::new();
    network.add_bus(Bus::new("SUB", BusType::Slack, Kilovolts(69.0)));
    network.add_bus(Bus::new("N1", BusType::Pq, Kilovolts(69.0)));
    network.add_bus(Bus::new("N2", BusType::Pv, Kilovolts(69.0)));
    network.add_bus(Bus::new("N3", BusType::Pq, Kilovolts(69.0)).with_shunt(0.0, 0.05));
    network.add_bus(Bus::new("F1", BusType::Pq, Kilovolts(13.8)));

    network.add_generator(Generator::new("G1", "SUB", GeneratorKind::Synchronous));
    network.add_generator(
        Generator::new("G2", "N2", GeneratorKind::Synchronous)
            .with_output(40.0, 0.0)
            .with_voltage_setpoint(1.01)
            .with_q_limits(-30.0, 30.0),
    );

    for (id, from, to) in [
        ("L1", "SUB", "N1"),
        ("L2", "N1", "N2"),
        ("L3", "N2", "N3"),
        ("L4", "N3", "SUB"),
        ("L5", "N1", "N3"),
    ] {
        network
            .add_branch(
                Branch::new(id, from, to, 0.01, 0.06)
                    .with_charging(0.02)
                    .with_rating(120.0),
            )
            .unwrap();
    }
    network
        .add_transformer(Transformer::new(
            "T1", "N1", "F1", 30.0, 69.0, 13.8, 0.005, 0.08,
        ))
        .unwrap();

    network.add_load(Load::new("LD1", "N1", 30.0, 10.0));
    network.add_load(Load::new("LD3", "N3", 45.0, 15.0));
    network.add_load(Load::new("LDF", "F1", 12.0, 4.0));
    network
}

#[test]
fn test_two_bus_scenario() {
    let result = perform_load_flow(&two_bus()).unwrap();
    assert!(result.converged);
    assert!(result.iterations <= 10, "iterations = {}", result.iterations);
    let vb = result.bus(&BusId::new("B")).unwrap().voltage_pu;
    assert!(vb > 0.90 && vb < 0.98, "|V_B| = {vb}");

    let slack = result.bus(&BusId::new("A")).unwrap();
    assert!((slack.voltage_pu - 1.0).abs() < 1e-12);
    assert!(slack.angle_deg.abs() < 1e-12);
}

#[test]
fn test_power_balance() {
    for network in [two_bus(), meshed()] {
        let result = perform_load_flow(&network).unwrap();
        assert!(result.converged);
        let tolerance_mw = network.settings.convergence_tolerance * network.base.base_mva;
        // One mismatch per bus at most
        let bound = tolerance_mw * network.buses().len() as f64;
        assert!(
            result.power_balance_error_mw().abs() <= bound,
            "balance error {} MW",
            result.power_balance_error_mw()
        );
        assert!(result.total_losses_mw > 0.0);
    }
}

#[test]
fn test_repeated_solves_are_identical() {
    let network = meshed();
    let first = perform_load_flow(&network).unwrap();
    let second = perform_load_flow(&network).unwrap();
    assert_eq!(first.iterations, second.iterations);
    for (a, b) in first.buses.iter().zip(&second.buses) {
        assert_eq!(a.id, b.id);
        assert!((a.voltage_pu - b.voltage_pu).abs() < 1e-12);
        assert!((a.angle_deg - b.angle_deg).abs() < 1e-12);
    }
}

#[test]
fn test_warm_start_needs_fewer_iterations() {
    let network = meshed();
    let cold = perform_load_flow(&network).unwrap();
    assert!(cold.iterations >= 2);

    let options = LoadFlowOptions::default().with_warm_start(cold.clone());
    let warm = perform_load_flow_with(&network, &options).unwrap();
    assert!(warm.converged);
    assert!(warm.iterations < cold.iterations);
    for (a, b) in cold.buses.iter().zip(&warm.buses) {
        assert!((a.voltage_pu - b.voltage_pu).abs() < 1e-6);
    }
}

#[test]
fn test_cancelled_solve_returns_cancelled() {
    let token = CancellationToken::new();
    token.cancel();
    let options = LoadFlowOptions::default().with_cancellation(token);
    let err = perform_load_flow_with(&meshed(), &options).unwrap_err();
    assert!(matches!(err, VoltaError::Cancelled));
}

#[test]
fn test_ybus_symmetric_and_rows_sum_to_shunts() {
    let model = SystemModel::compile(&meshed()).unwrap();
    let ybus = SparseYBus::from_model(&model).unwrap();
    assert!(ybus.is_symmetric(1e-12));
    assert!(ybus.check_row_sums(1e-9));

    // Capacitor bank plus half the charging of L3, L4 and L5
    let n3 = model.bus_index(&BusId::new("N3")).unwrap();
    let shunt = ybus.shunt_admittance(n3);
    assert!((shunt.im - (0.05 + 3.0 * 0.01)).abs() < 1e-12);
}

#[test]
fn test_input_network_is_untouched() {
    let network = meshed();
    let before = network.to_json().unwrap();
    perform_load_flow(&network).unwrap();
    assert_eq!(network.to_json().unwrap(), before);
}

#[test]
fn test_structural_errors_are_validation_errors() {
    let mut no_slack = Network::new();
    no_slack.add_bus(Bus::new("A", BusType::Pq, Kilovolts(13.8)));
    no_slack.add_bus(Bus::new("B", BusType::Pq, Kilovolts(13.8)));
    no_slack
        .add_branch(Branch::new("L1", "A", "B", 0.01, 0.05))
        .unwrap();
    let err = perform_load_flow(&no_slack).unwrap_err();
    assert!(matches!(err, VoltaError::Validation(_)), "{err}");

    let mut zero_impedance = two_bus();
    zero_impedance
        .add_branch(Branch::new("L2", "A", "B", 0.0, 0.0))
        .unwrap();
    let err = perform_load_flow(&zero_impedance).unwrap_err();
    assert!(err.is_input_error(), "{err}");

    assert!(perform_load_flow(&Network::new()).is_err());
}

#[test]
fn test_slack_without_generator_element_balances() {
    // A bare slack bus is a valid source; its injection counts as generation
    let mut network = Network::new();
    network.add_bus(Bus::new("A", BusType::Slack, Kilovolts(13.8)));
    network.add_bus(Bus::new("B", BusType::Pq, Kilovolts(13.8)));
    network
        .add_branch(Branch::new("L1", "A", "B", 0.02, 0.08))
        .unwrap();
    network.add_load(Load::new("LD", "B", 50.0, 20.0));

    let result = perform_load_flow(&network).unwrap();
    assert!(result.converged);
    assert!(result.generators.is_empty());
    assert!(
        result.power_balance_error_mw().abs() < 1e-3,
        "balance error {} MW",
        result.power_balance_error_mw()
    );
    assert!(
        (result.total_generation_mw - result.total_load_mw - result.total_losses_mw).abs() < 1e-3
    );
    assert!(result.total_generation_mw > 50.0);
    assert!(result.total_generation_mvar > 20.0);
}

#[test]
fn test_singular_jacobian_is_numerical_error() {
    // Equal and opposite reactances in parallel cancel: B has no electrical tie
    let mut network = Network::new();
    network.add_bus(Bus::new("A", BusType::Slack, Kilovolts(13.8)));
    network.add_bus(Bus::new("B", BusType::Pq, Kilovolts(13.8)));
    network.add_generator(Generator::new("G1", "A", GeneratorKind::Synchronous));
    network
        .add_branch(Branch::new("L1", "A", "B", 0.0, 0.1))
        .unwrap();
    network
        .add_branch(Branch::new("L2", "A", "B", 0.0, -0.1))
        .unwrap();
    network.add_load(Load::new("LD", "B", 10.0, 2.0));

    let err = perform_load_flow(&network).unwrap_err();
    assert!(matches!(err, VoltaError::Numerical(_)), "{err}");
    assert!(!err.is_input_error());
}
