//! Single points of failure by outage-and-reachability.
//!
//! Every in-service branch and transformer, and every bus that is not a
//! slack bus, is removed in turn. A breadth-first search from the slack
//! buses over what remains finds the buses still energized; any bus that
//! was energized before the outage and is not afterwards is stranded.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;
use volta_core::{BusGraph, BusId, BusType, ElementRef, Network};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinglePointOfFailure {
    pub element: ElementRef,
    /// Buses de-energized by the outage (excluding a removed bus itself)
    pub stranded_buses: Vec<BusId>,
    pub stranded_load_mw: f64,
    pub stranded_generation_mw: f64,
}

/// Elements whose loss de-energizes at least one other bus.
pub fn find_single_points_of_failure(network: &Network) -> Vec<SinglePointOfFailure> {
    let graph = BusGraph::from_network(network);
    let slack: Vec<BusId> = network.slack_buses().iter().map(|b| b.id.clone()).collect();
    let energized = graph.reachable_without(&slack, None);

    let mut spofs: Vec<SinglePointOfFailure> = outage_candidates(network)
        .into_iter()
        .filter_map(|element| {
            let reached = graph.reachable_without(&slack, Some(&element));
            stranding(network, &energized, &reached, element)
        })
        .collect();
    spofs.sort_by(|a, b| {
        b.stranded_load_mw
            .total_cmp(&a.stranded_load_mw)
            .then_with(|| a.element.cmp(&b.element))
    });
    debug!(count = spofs.len(), "single points of failure");
    spofs
}

/// In-service branches and transformers, then non-slack buses.
pub fn outage_candidates(network: &Network) -> Vec<ElementRef> {
    let mut candidates: Vec<ElementRef> = network
        .graph
        .edge_weights()
        .filter(|e| e.in_service())
        .map(|e| e.element_ref())
        .collect();
    candidates.extend(
        network
            .buses()
            .into_iter()
            .filter(|b| b.bus_type != BusType::Slack)
            .map(|b| ElementRef::Bus(b.id.clone())),
    );
    candidates
}

fn stranding(
    network: &Network,
    energized: &HashSet<BusId>,
    reached: &HashSet<BusId>,
    element: ElementRef,
) -> Option<SinglePointOfFailure> {
    let removed_bus = match &element {
        ElementRef::Bus(id) => Some(id),
        _ => None,
    };
    let is_stranded =
        |bus: &BusId| energized.contains(bus) && !reached.contains(bus) && Some(bus) != removed_bus;

    let mut stranded_buses: Vec<BusId> = energized.iter().filter(|b| is_stranded(b)).cloned().collect();
    if stranded_buses.is_empty() {
        return None;
    }
    stranded_buses.sort();

    let stranded_load_mw = network
        .loads()
        .iter()
        .filter(|l| l.status && is_stranded(&l.bus))
        .map(|l| l.active_power.value())
        .sum();
    let stranded_generation_mw = network
        .generators()
        .iter()
        .filter(|g| g.status && is_stranded(&g.bus))
        .map(|g| g.active_power.value())
        .sum();

    Some(SinglePointOfFailure {
        element,
        stranded_buses,
        stranded_load_mw,
        stranded_generation_mw,
    })
}

/// Share of outage candidates that strand nothing, in percent.
pub fn redundancy_pct(candidates: usize, spofs: usize) -> f64 {
    if candidates == 0 {
        100.0
    } else {
        (candidates - spofs.min(candidates)) as f64 / candidates as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volta_core::{Branch, Bus, Generator, GeneratorKind, Kilovolts, Load};

    #[test]
    fn radial_line_to_generator_is_flagged() {
        let mut network = Network::new();
        network.add_bus(Bus::new("SLACK", BusType::Slack, Kilovolts(69.0)));
        network.add_bus(Bus::new("MID", BusType::Pq, Kilovolts(69.0)));
        network.add_bus(Bus::new("GEN", BusType::Pv, Kilovolts(69.0)));
        network.add_branch(Branch::new("L1", "SLACK", "MID", 0.01, 0.05)).unwrap();
        network.add_branch(Branch::new("L2", "SLACK", "MID", 0.01, 0.05)).unwrap();
        network.add_branch(Branch::new("L3", "MID", "GEN", 0.01, 0.05)).unwrap();
        network.add_generator(Generator::new("G2", "GEN", GeneratorKind::Synchronous).with_output(30.0, 0.0));
        network.add_load(Load::new("LD", "MID", 40.0, 10.0));

        let spofs = find_single_points_of_failure(&network);
        let elements: Vec<&ElementRef> = spofs.iter().map(|s| &s.element).collect();
        assert!(elements.contains(&&ElementRef::Branch("L3".into())));
        assert!(elements.contains(&&ElementRef::Bus("MID".into())));
        // Parallel lines back each other up
        assert!(!elements.contains(&&ElementRef::Branch("L1".into())));

        let l3 = spofs
            .iter()
            .find(|s| s.element == ElementRef::Branch("L3".into()))
            .unwrap();
        assert_eq!(l3.stranded_buses, vec![BusId::new("GEN")]);
        assert_eq!(l3.stranded_generation_mw, 30.0);
        assert_eq!(l3.stranded_load_mw, 0.0);
    }

    #[test]
    fn redundancy_share() {
        assert_eq!(redundancy_pct(0, 0), 100.0);
        assert_eq!(redundancy_pct(4, 1), 75.0);
    }
}
