//! Q-limit enforcement tests (PV→PQ switching).

#[cfg(test)]
mod tests {
    use crate::model::SystemModel;
    use crate::power_flow::{AcPowerFlowSolver, LoadFlowOptions, LoadFlowResult};
    use volta_core::{
        Branch, Bus, BusId, BusType, Generator, GeneratorId, GeneratorKind, Kilovolts, Load,
        Network,
    };

    /// Slack bus with an unlimited machine; PV bus whose generator can only
    /// supply 10 Mvar against a 50 Mvar local load.
    fn create_q_limit_test_network() -> Network {
        let mut network = Network::new();
        network.add_bus(Bus::new("1", BusType::Slack, Kilovolts(138.0)));
        network.add_bus(Bus::new("2", BusType::Pv, Kilovolts(138.0)));
        network.add_generator(Generator::new("G1", "1", GeneratorKind::Synchronous));
        network.add_generator(
            Generator::new("G2", "2", GeneratorKind::Synchronous)
                .with_output(50.0, 0.0)
                .with_voltage_setpoint(1.02)
                .with_q_limits(0.0, 10.0),
        );
        network.add_load(Load::new("LD", "2", 40.0, 50.0));
        network
            .add_branch(Branch::new("Line1", "1", "2", 0.01, 0.1))
            .unwrap();
        network
    }

    fn solve(enforce: bool) -> LoadFlowResult {
        let model = SystemModel::compile(&create_q_limit_test_network()).unwrap();
        AcPowerFlowSolver::new()
            .with_q_limit_enforcement(enforce)
            .solve(&model, &LoadFlowOptions::default())
            .unwrap()
    }

    #[test]
    fn test_q_clamped_at_limit() {
        let result = solve(true);
        assert!(result.converged);
        let g2 = result.generator(&GeneratorId::new("G2")).unwrap();
        assert!((g2.q_mvar - 10.0).abs() < 1e-9, "G2 Q = {}", g2.q_mvar);
        assert!(g2.at_q_limit);
    }

    #[test]
    fn test_pv_to_pq_switching() {
        let result = solve(true);
        let bus2 = result.bus(&BusId::new("2")).unwrap();
        assert_eq!(bus2.bus_type, BusType::Pq);
        assert_eq!(result.pv_to_pq, vec![BusId::new("2")]);
        // Voltage is no longer held at the setpoint
        assert!(bus2.voltage_pu < 1.02);
    }

    #[test]
    fn test_q_limit_not_enforced() {
        let result = solve(false);
        assert!(result.converged);
        let bus2 = result.bus(&BusId::new("2")).unwrap();
        assert_eq!(bus2.bus_type, BusType::Pv);
        assert!((bus2.voltage_pu - 1.02).abs() < 1e-9);
        let g2 = result.generator(&GeneratorId::new("G2")).unwrap();
        assert!(g2.q_mvar > 10.0);
        assert!(result.pv_to_pq.is_empty());
    }
}
