use volta_algo::config::PrefaultMode;
use volta_algo::short_circuit::{CoordinationSeverity, StressedEquipment};
use volta_algo::{perform_short_circuit_analysis, AnalysisEngine, EngineConfig};
use volta_core::{
    Branch, Bus, BusId, BusType, ElementRef, FaultType, Generator, GeneratorKind, Kilovolts, Load,
    MachineReactances, Network, ProtectiveDevice, Transformer, TripCurve, WindingConnection,
};

/// 100 MVA machine with x''d = 0.05 pu at the slack bus A, radial feeder
/// A-B-C with zero-sequence data on every line.
fn radial_feeder() -> Network {
    let mut network = Network::new();
    network.add_bus(Bus::new("A", BusType::Slack, Kilovolts(13.8)));
    network.add_bus(Bus::new("B", BusType::Pq, Kilovolts(13.8)));
    network.add_bus(Bus::new("C", BusType::Pq, Kilovolts(13.8)));
    network.add_generator(
        Generator::new("G1", "A", GeneratorKind::Synchronous)
            .with_rating(100.0)
            .with_reactances(MachineReactances::round_rotor(1.8, 0.25, 0.05, 0.1)),
    );
    network
        .add_branch(Branch::new("L1", "A", "B", 0.01, 0.05).with_zero_sequence(0.03, 0.15))
        .unwrap();
    network
        .add_branch(Branch::new("L2", "B", "C", 0.01, 0.05).with_zero_sequence(0.03, 0.15))
        .unwrap();
    network
}

fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_three_phase_fault_at_slack_is_twenty_pu() {
    let result =
        perform_short_circuit_analysis(&radial_feeder(), &BusId::new("A"), FaultType::ThreePhase)
            .unwrap();
    let fault = &result.fault;
    assert_close(fault.thevenin.z1.norm(), 0.05, 1e-6);
    assert_close(fault.prefault_voltage.norm(), 1.0, 1e-9);
    assert_close(fault.fault_current_pu, 20.0, 1e-4);
    for phase in fault.phase_currents_pu {
        assert_close(phase, 20.0, 1e-4);
    }
    // 100 MVA at 13.8 kV
    assert_close(fault.base_current_ka, 4.1837, 1e-3);
    assert_close(fault.fault_current_ka, 20.0 * fault.base_current_ka, 1e-3);
}

#[test]
fn test_three_phase_current_is_prefault_over_thevenin() {
    let mut network = radial_feeder();
    network.add_load(Load::new("LD", "C", 8.0, 3.0));
    let result =
        perform_short_circuit_analysis(&network, &BusId::new("C"), FaultType::ThreePhase).unwrap();
    let fault = &result.fault;

    assert_eq!(fault.prefault_source, PrefaultMode::LoadFlow);
    assert!(fault.prefault_voltage.norm() < 1.0, "loaded feeder sags");
    // Source reactance plus both line sections
    assert_close(fault.thevenin.z1.re, 0.02, 1e-6);
    assert_close(fault.thevenin.z1.im, 0.15, 1e-6);
    let expected = fault.prefault_voltage.norm() / fault.thevenin.z1.norm();
    assert_close(fault.fault_current_pu, expected, 1e-6);

    // Faulted bus collapses; the machine terminal divides the voltage with
    // the two line sections, about 0.10 / 0.15
    assert!(result.bus_voltage(&BusId::new("C")).unwrap().phase_pu[0] < 1e-6);
    let at_source = result.bus_voltage(&BusId::new("A")).unwrap().phase_pu[0];
    assert!(at_source > 0.6 && at_source < 0.75, "|V_A| = {at_source}");
}

#[test]
fn test_line_to_ground_uses_all_three_sequences() {
    let result =
        perform_short_circuit_analysis(&radial_feeder(), &BusId::new("A"), FaultType::LineToGround)
            .unwrap();
    let fault = &result.fault;
    // Z1 = Z2 = j0.05, Z0 = x_l = j0.1, solidly grounded
    assert_close(fault.thevenin.z2.norm(), 0.05, 1e-6);
    assert_close(fault.thevenin.z0.norm(), 0.1, 1e-6);
    assert_close(fault.phase_currents_pu[0], 3.0 / 0.2, 1e-4);
    assert!(fault.phase_currents_pu[1] < 1e-6);
    assert!(fault.phase_currents_pu[2] < 1e-6);
}

#[test]
fn test_study_skips_ground_faults_behind_delta_windings() {
    let mut network = radial_feeder();
    network.add_bus(Bus::new("F", BusType::Pq, Kilovolts(4.16)));
    network
        .add_transformer(
            Transformer::new("T1", "C", "F", 10.0, 13.8, 4.16, 0.01, 0.06)
                .with_connections(WindingConnection::Delta, WindingConnection::Delta),
        )
        .unwrap();

    let engine = AnalysisEngine::default();
    let study = engine.perform_short_circuit_study(&network).unwrap();

    let f = BusId::new("F");
    assert!(study.result(&f, FaultType::ThreePhase).is_some());
    assert!(study.result(&f, FaultType::LineToLine).is_some());
    for ground in [FaultType::LineToGround, FaultType::LineToLineToGround] {
        assert!(study.result(&f, ground).is_none());
        assert!(study
            .skipped
            .iter()
            .any(|s| s.bus == f && s.fault_type == ground));
    }
    // Ground faults on the 13.8 kV side still solve
    assert!(study
        .result(&BusId::new("A"), FaultType::LineToGround)
        .is_some());
    assert!(study.max_fault_current_ka(&f).unwrap() > 0.0);
}

#[test]
fn test_flat_prefault_from_config() {
    let mut network = radial_feeder();
    network.add_load(Load::new("LD", "C", 8.0, 3.0));
    let mut config = EngineConfig::default();
    config.short_circuit.prefault = PrefaultMode::Flat;
    let engine = AnalysisEngine::new(config).unwrap();
    let result = engine
        .perform_short_circuit_analysis(&network, &BusId::new("C"), FaultType::ThreePhase)
        .unwrap();
    assert_eq!(result.fault.prefault_source, PrefaultMode::Flat);
    assert_close(
        result.fault.fault_current_pu,
        1.0 / result.fault.thevenin.z1.norm(),
        1e-6,
    );
}

#[test]
fn test_underrated_breaker_is_overstressed() {
    let mut network = radial_feeder();
    network.add_device(
        ProtectiveDevice::new(
            "BKR1",
            ElementRef::Branch("L1".into()),
            TripCurve::IeeeVeryInverse,
            600.0,
        )
        .with_interrupting_rating(25.0),
    );
    let result =
        perform_short_circuit_analysis(&network, &BusId::new("B"), FaultType::ThreePhase).unwrap();

    let breaker = result
        .equipment_stress
        .iter()
        .find(|s| s.equipment == "BKR1")
        .unwrap();
    assert_eq!(breaker.kind, StressedEquipment::ProtectiveDevice);
    // About 1/|0.01 + j0.10| ≈ 9.95 pu ≈ 41.6 kA through L1
    assert!(breaker.fault_current_ka > 40.0);
    assert!(!breaker.within_rating);
    assert!(result.overstressed().any(|s| s.equipment == "BKR1"));
}

#[test]
fn test_protection_coordination() {
    let relays = |upstream_dial: f64| {
        let mut network = radial_feeder();
        network.add_device(
            ProtectiveDevice::new(
                "R-DOWN",
                ElementRef::Branch("L2".into()),
                TripCurve::IeeeVeryInverse,
                400.0,
            )
            .with_upstream("R-UP"),
        );
        network.add_device(
            ProtectiveDevice::new(
                "R-UP",
                ElementRef::Branch("L1".into()),
                TripCurve::IeeeVeryInverse,
                400.0,
            )
            .with_time_dial(upstream_dial),
        );
        perform_short_circuit_analysis(&network, &BusId::new("C"), FaultType::ThreePhase).unwrap()
    };

    // Same settings on both relays: no time separation at all
    let miscoordinated = relays(1.0).protection;
    assert!(!miscoordinated.coordinated);
    assert_eq!(miscoordinated.fatal_count(), 1);
    assert_eq!(
        miscoordinated.problems[0].severity,
        CoordinationSeverity::Fatal
    );

    let coordinated = relays(5.0).protection;
    assert!(coordinated.coordinated, "{:?}", coordinated.problems);
    assert_eq!(coordinated.pairs.len(), 1);
    assert!(coordinated.pairs[0].margin_s.unwrap() > 0.3);
}

#[test]
fn test_unknown_fault_bus_is_rejected() {
    let err = perform_short_circuit_analysis(
        &radial_feeder(),
        &BusId::new("NOPE"),
        FaultType::ThreePhase,
    )
    .unwrap_err();
    assert!(err.is_input_error());
}

/// Machine on a 69 kV bus feeding a loaded 13.8 kV bus through T1.
fn step_down(shift_deg: f64) -> Network {
    let mut network = Network::new();
    network.add_bus(Bus::new("HV", BusType::Slack, Kilovolts(69.0)));
    network.add_bus(Bus::new("LV", BusType::Pq, Kilovolts(13.8)));
    network.add_generator(
        Generator::new("G1", "HV", GeneratorKind::Synchronous)
            .with_rating(100.0)
            .with_reactances(MachineReactances::round_rotor(1.8, 0.25, 0.1, 0.1)),
    );
    network
        .add_transformer(
            Transformer::new("T1", "HV", "LV", 20.0, 69.0, 13.8, 0.005, 0.04)
                .with_phase_shift(shift_deg),
        )
        .unwrap();
    network.add_load(Load::new("LD", "LV", 8.0, 3.0));
    network
}

#[test]
fn test_phase_shift_does_not_change_fault_voltages() {
    for prefault in [PrefaultMode::LoadFlow, PrefaultMode::Flat] {
        let mut config = EngineConfig::default();
        config.short_circuit.prefault = prefault;
        let engine = AnalysisEngine::new(config).unwrap();
        let solve = |shift: f64| {
            engine
                .perform_short_circuit_analysis(
                    &step_down(shift),
                    &BusId::new("LV"),
                    FaultType::ThreePhase,
                )
                .unwrap()
        };
        let plain = solve(0.0);
        let shifted = solve(-30.0);
        assert_eq!(shifted.fault.prefault_source, prefault);

        assert_close(
            shifted.fault.fault_current_pu,
            plain.fault.fault_current_pu,
            1e-5,
        );
        for bus in ["HV", "LV"] {
            let id = BusId::new(bus);
            let a = plain.bus_voltage(&id).unwrap().phase_pu;
            let b = shifted.bus_voltage(&id).unwrap().phase_pu;
            for (va, vb) in a.iter().zip(b.iter()) {
                assert_close(*vb, *va, 1e-5);
            }
        }
        // The machine terminal holds part of the voltage, the faulted bus none
        let hv = shifted.bus_voltage(&BusId::new("HV")).unwrap().phase_pu[0];
        assert!(hv > 0.1 && hv < 0.9, "|V_HV| = {hv}");
        assert!(shifted.bus_voltage(&BusId::new("LV")).unwrap().phase_pu[0] < 1e-6);
    }
}
