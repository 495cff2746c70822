//! Exhaustive N-1 screening with full AC re-solves.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use volta_core::{
    BusGraph, BusId, CancellationToken, Edge, ElementRef, Network, Node, VoltaError, VoltaResult,
};

use crate::model::SystemModel;
use crate::power_flow::{AcPowerFlowSolver, LoadFlowOptions, VoltageViolation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchLoading {
    pub label: String,
    pub loading_pct: f64,
}

/// Post-contingency state for one outaged element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyOutcome {
    pub element: ElementRef,
    /// Buses cut off from every slack bus
    pub islanded_buses: Vec<BusId>,
    pub stranded_load_mw: f64,
    pub converged: bool,
    pub max_loading_pct: Option<f64>,
    pub min_voltage_pu: Option<f64>,
    pub violations: Vec<VoltageViolation>,
    pub overloaded: Vec<BranchLoading>,
    /// Set when the re-solve could not be attempted or failed numerically
    pub error: Option<String>,
}

impl ContingencyOutcome {
    /// Converged, nothing islanded, no violations.
    pub fn is_secure(&self) -> bool {
        self.converged
            && self.error.is_none()
            && self.islanded_buses.is_empty()
            && self.violations.is_empty()
            && self.overloaded.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContingencyReport {
    pub outcomes: Vec<ContingencyOutcome>,
}

impl ContingencyReport {
    pub fn insecure(&self) -> impl Iterator<Item = &ContingencyOutcome> {
        self.outcomes.iter().filter(|o| !o.is_secure())
    }

    pub fn outcome(&self, element: &ElementRef) -> Option<&ContingencyOutcome> {
        self.outcomes.iter().find(|o| &o.element == element)
    }

    pub fn summary(&self) -> String {
        let insecure = self.insecure().count();
        format!(
            "N-1: {}/{} contingencies secure",
            self.outcomes.len() - insecure,
            self.outcomes.len()
        )
    }
}

/// Removes each in-service branch and transformer in turn and re-solves.
pub struct ContingencyAnalyzer<'a> {
    power_flow: &'a AcPowerFlowSolver,
    loading_limit_pct: f64,
    parallel: bool,
    cancel: Option<CancellationToken>,
}

impl<'a> ContingencyAnalyzer<'a> {
    pub fn new(power_flow: &'a AcPowerFlowSolver, loading_limit_pct: f64) -> Self {
        Self {
            power_flow,
            loading_limit_pct,
            parallel: true,
            cancel: None,
        }
    }

    /// Checked before each contingency and inside every re-solve.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// In-service two-terminal elements, in graph order.
    pub fn candidates(network: &Network) -> Vec<ElementRef> {
        network
            .graph
            .edge_weights()
            .filter(|e| e.in_service())
            .map(Edge::element_ref)
            .collect()
    }

    pub fn analyze(&self, network: &Network) -> VoltaResult<ContingencyReport> {
        let candidates = Self::candidates(network);
        let graph = BusGraph::from_network(network);
        let slack: Vec<BusId> = network.slack_buses().iter().map(|b| b.id.clone()).collect();

        let outcomes = crate::map_cases(&candidates, self.parallel, |element| {
            self.evaluate(network, &graph, &slack, element)
        });
        let outcomes = outcomes.into_iter().collect::<VoltaResult<Vec<_>>>()?;
        let report = ContingencyReport { outcomes };
        info!("{}", report.summary());
        Ok(report)
    }

    fn evaluate(
        &self,
        network: &Network,
        graph: &BusGraph,
        slack: &[BusId],
        element: &ElementRef,
    ) -> VoltaResult<ContingencyOutcome> {
        if let Some(token) = &self.cancel {
            token.check()?;
        }
        let reached = graph.reachable_without(slack, Some(element));
        let mut islanded_buses: Vec<BusId> = network
            .buses()
            .into_iter()
            .map(|b| b.id.clone())
            .filter(|id| !reached.contains(id))
            .collect();
        islanded_buses.sort();
        let stranded_load_mw = network
            .loads()
            .iter()
            .filter(|l| l.status && !reached.contains(&l.bus))
            .map(|l| l.active_power.value())
            .sum();

        let mut outcome = ContingencyOutcome {
            element: element.clone(),
            islanded_buses,
            stranded_load_mw,
            converged: false,
            max_loading_pct: None,
            min_voltage_pu: None,
            violations: Vec::new(),
            overloaded: Vec::new(),
            error: None,
        };

        let post = outage_network(network, element, &reached)?;
        let options = LoadFlowOptions {
            cancel: self.cancel.clone(),
            ..LoadFlowOptions::default()
        };
        let solved = SystemModel::compile(&post)
            .and_then(|model| self.power_flow.solve(&model, &options));
        match solved {
            Ok(result) => {
                outcome.converged = result.converged;
                outcome.max_loading_pct = result.max_loading_pct();
                outcome.min_voltage_pu = Some(result.voltage_profile.min_pu);
                outcome.violations = result.voltage_profile.violations.clone();
                outcome.overloaded = result
                    .overloaded_branches(self.loading_limit_pct)
                    .map(|b| BranchLoading {
                        label: b.label.clone(),
                        loading_pct: b.loading_pct.unwrap_or(0.0),
                    })
                    .collect();
            }
            Err(VoltaError::Cancelled) => return Err(VoltaError::Cancelled),
            Err(err) => {
                debug!(element = %element, %err, "post-contingency solve failed");
                outcome.error = Some(err.to_string());
            }
        }
        Ok(outcome)
    }
}

/// Copy of `network` with `element` out of service and everything outside
/// `energized` dropped.
pub fn outage_network(
    network: &Network,
    element: &ElementRef,
    energized: &HashSet<BusId>,
) -> VoltaResult<Network> {
    let mut post = Network::new()
        .with_base(network.base)
        .with_settings(network.settings.clone());
    for node in network.graph.node_weights() {
        match node {
            Node::Bus(bus) if energized.contains(&bus.id) => {
                post.add_bus(bus.clone());
            }
            Node::Load(load) if energized.contains(&load.bus) => {
                post.add_load(load.clone());
            }
            Node::Generator(gen) if energized.contains(&gen.bus) => {
                post.add_generator(gen.clone());
            }
            _ => {}
        }
    }
    for edge in network.graph.edge_weights() {
        if &edge.element_ref() == element {
            continue;
        }
        match edge {
            Edge::Branch(b) if energized.contains(&b.from_bus) && energized.contains(&b.to_bus) => {
                post.add_branch(b.clone())?;
            }
            Edge::Transformer(t) if t.buses().iter().all(|bus| energized.contains(*bus)) => {
                post.add_transformer(t.clone())?;
            }
            _ => {}
        }
    }
    Ok(post)
}

#[cfg(test)]
mod tests {
    use super::*;
    use volta_core::{Branch, Bus, BusType, Generator, GeneratorKind, Kilovolts, Load};

    /// Slack feeding a ring A-B-C plus a radial spur C-D.
    fn ring_with_spur() -> Network {
        let mut network = Network::new();
        network.add_bus(Bus::new("A", BusType::Slack, Kilovolts(69.0)));
        for id in ["B", "C", "D"] {
            network.add_bus(Bus::new(id, BusType::Pq, Kilovolts(69.0)));
        }
        network.add_generator(Generator::new("G", "A", GeneratorKind::Synchronous));
        network.add_branch(Branch::new("AB", "A", "B", 0.01, 0.05).with_rating(100.0)).unwrap();
        network.add_branch(Branch::new("BC", "B", "C", 0.01, 0.05).with_rating(100.0)).unwrap();
        network.add_branch(Branch::new("CA", "C", "A", 0.01, 0.05).with_rating(100.0)).unwrap();
        network.add_branch(Branch::new("CD", "C", "D", 0.01, 0.05).with_rating(100.0)).unwrap();
        network.add_load(Load::new("LB", "B", 20.0, 5.0));
        network.add_load(Load::new("LD", "D", 15.0, 5.0));
        network
    }

    #[test]
    fn ring_outages_are_secure_and_spur_outage_strands_load() {
        let network = ring_with_spur();
        let solver = AcPowerFlowSolver::new();
        let report = ContingencyAnalyzer::new(&solver, 100.0)
            .with_parallel(false)
            .analyze(&network)
            .unwrap();
        assert_eq!(report.outcomes.len(), 4);

        let ab = report.outcome(&ElementRef::Branch("AB".into())).unwrap();
        assert!(ab.converged);
        assert!(ab.islanded_buses.is_empty());

        let cd = report.outcome(&ElementRef::Branch("CD".into())).unwrap();
        assert_eq!(cd.islanded_buses, vec![BusId::new("D")]);
        assert!((cd.stranded_load_mw - 15.0).abs() < 1e-12);
        assert!(cd.converged, "remaining network still solves");
        assert!(!cd.is_secure());
    }

    #[test]
    fn cancelled_screen_stops_with_cancelled() {
        let network = ring_with_spur();
        let solver = AcPowerFlowSolver::new();
        let token = CancellationToken::new();
        token.cancel();
        let err = ContingencyAnalyzer::new(&solver, 100.0)
            .with_parallel(false)
            .with_cancellation(token)
            .analyze(&network)
            .unwrap_err();
        assert!(matches!(err, VoltaError::Cancelled));
    }

    #[test]
    fn outage_network_drops_dead_buses() {
        let network = ring_with_spur();
        let energized: HashSet<BusId> = ["A", "B", "C"].into_iter().map(BusId::new).collect();
        let post = outage_network(&network, &ElementRef::Branch("CD".into()), &energized).unwrap();
        assert_eq!(post.buses().len(), 3);
        assert_eq!(post.branches().len(), 3);
        assert_eq!(post.loads().len(), 1);
    }
}
