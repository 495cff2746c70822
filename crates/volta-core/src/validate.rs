//! Structural validation run before every analysis.

use std::collections::HashSet;

use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::error::VoltaResult;
use crate::graph_utils::BusGraph;
use crate::{BusId, BusType, Edge, ElementRef, Network, Node};

impl Network {
    /// Check the network and fail with every structural error found.
    ///
    /// On success the returned diagnostics carry any warnings.
    pub fn validate(&self) -> VoltaResult<Diagnostics> {
        let mut diag = Diagnostics::new();
        self.validate_into(&mut diag);
        debug!(summary = %diag.summary(), "network validation finished");
        diag.into_result()
    }

    /// Record structural problems into `diag` without failing.
    pub fn validate_into(&self, diag: &mut Diagnostics) {
        if !(self.base.base_mva > 0.0 && self.base.base_mva.is_finite()) {
            diag.add_error(
                "parameter",
                &format!("base MVA must be positive, got {}", self.base.base_mva),
            );
        }

        let buses = self.buses();
        if buses.is_empty() {
            diag.add_error("structure", "Network has no buses");
            return;
        }

        let mut bus_ids: HashSet<&BusId> = HashSet::new();
        for bus in &buses {
            if !bus_ids.insert(&bus.id) {
                diag.add_error_with_entity("structure", "Duplicate bus id", bus.id.as_str());
            }
            if bus.nominal_kv.value() <= 0.0 && self.base.base_kv.value() <= 0.0 {
                diag.add_error_with_entity(
                    "parameter",
                    "Bus has no nominal voltage and no base kV fallback",
                    bus.id.as_str(),
                );
            }
            if let (Some(lo), Some(hi)) = (bus.vmin_pu, bus.vmax_pu) {
                if lo.value() > hi.value() {
                    diag.add_error_with_entity(
                        "parameter",
                        "Bus vmin exceeds vmax",
                        bus.id.as_str(),
                    );
                }
            }
        }

        let mut seen_edges: HashSet<String> = HashSet::new();
        for edge in self.graph.edge_weights() {
            let key = edge.element_ref().to_string();
            if !seen_edges.insert(key.clone()) {
                diag.add_error_with_entity("structure", "Duplicate element id", &key);
            }
            match edge {
                Edge::Branch(branch) => {
                    let id = branch.id.as_str();
                    for bus in [&branch.from_bus, &branch.to_bus] {
                        if !bus_ids.contains(bus) {
                            diag.add_error_with_entity(
                                "reference",
                                &format!("Branch references unknown bus '{bus}'"),
                                id,
                            );
                        }
                    }
                    if branch.from_bus == branch.to_bus {
                        diag.add_error_with_entity("structure", "Branch is a self-loop", id);
                    }
                    if branch.admittance().is_none() {
                        diag.add_error_with_entity(
                            "parameter",
                            "Branch has zero series impedance",
                            id,
                        );
                    }
                    if branch.tap_ratio <= 0.0 {
                        diag.add_error_with_entity(
                            "parameter",
                            "Branch tap ratio must be positive",
                            id,
                        );
                    }
                    if branch.status && branch.rating_mva.is_none() {
                        diag.add_warning_with_entity(
                            "parameter",
                            "Branch has no thermal rating; loading not checked",
                            id,
                        );
                    }
                }
                Edge::Transformer(tx) => {
                    let id = tx.id.as_str();
                    for bus in tx.buses() {
                        if !bus_ids.contains(bus) {
                            diag.add_error_with_entity(
                                "reference",
                                &format!("Transformer references unknown bus '{bus}'"),
                                id,
                            );
                        }
                    }
                    if tx.impedance().norm() <= 1e-12 {
                        diag.add_error_with_entity(
                            "parameter",
                            "Transformer has zero series impedance",
                            id,
                        );
                    }
                    if tx.rated_mva.value() <= 0.0 {
                        diag.add_error_with_entity(
                            "parameter",
                            "Transformer rating must be positive",
                            id,
                        );
                    }
                    if tx.hv_kv.value() <= 0.0 || tx.lv_kv.value() <= 0.0 {
                        diag.add_error_with_entity(
                            "parameter",
                            "Transformer winding voltages must be positive",
                            id,
                        );
                    }
                    if tx.tap_position < tx.tap_min || tx.tap_position > tx.tap_max {
                        diag.add_error_with_entity(
                            "parameter",
                            &format!(
                                "Tap position {} outside range [{}, {}]",
                                tx.tap_position, tx.tap_min, tx.tap_max
                            ),
                            id,
                        );
                    }
                    if tx.tap_ratio() <= 0.0 {
                        diag.add_error_with_entity("parameter", "Tap ratio must be positive", id);
                    }
                }
            }
        }

        let mut seen_nodes: HashSet<String> = HashSet::new();
        let mut has_load = false;
        let mut has_generation = false;
        for node in self.graph.node_weights() {
            match node {
                Node::Bus(_) => {}
                Node::Load(load) => {
                    has_load = true;
                    let id = load.id.as_str();
                    if !seen_nodes.insert(format!("load {id}")) {
                        diag.add_error_with_entity("structure", "Duplicate load id", id);
                    }
                    if !bus_ids.contains(&load.bus) {
                        diag.add_error_with_entity(
                            "reference",
                            &format!("Load references unknown bus '{}'", load.bus),
                            id,
                        );
                    }
                    if !load.model.fractions_valid() {
                        diag.add_error_with_entity(
                            "parameter",
                            &format!(
                                "Load model percentages sum to {:.2}, expected 100",
                                load.model.fraction_sum()
                            ),
                            id,
                        );
                    }
                    if let Some(spectrum) = &load.harmonics {
                        if spectrum
                            .components
                            .iter()
                            .any(|c| c.order < 2 || c.magnitude_pct < 0.0)
                        {
                            diag.add_error_with_entity(
                                "parameter",
                                "Harmonic spectrum needs orders >= 2 and non-negative magnitudes",
                                id,
                            );
                        }
                    }
                }
                Node::Generator(gen) => {
                    has_generation = true;
                    let id = gen.id.as_str();
                    if !seen_nodes.insert(format!("generator {id}")) {
                        diag.add_error_with_entity("structure", "Duplicate generator id", id);
                    }
                    if !bus_ids.contains(&gen.bus) {
                        diag.add_error_with_entity(
                            "reference",
                            &format!("Generator references unknown bus '{}'", gen.bus),
                            id,
                        );
                    }
                    if let (Some(qmin), Some(qmax)) = (gen.qmin, gen.qmax) {
                        if qmin.value() > qmax.value() {
                            diag.add_error_with_entity(
                                "parameter",
                                "Generator qmin exceeds qmax",
                                id,
                            );
                        }
                    }
                    if gen.rated_mva.value() <= 0.0 {
                        diag.add_error_with_entity(
                            "parameter",
                            "Generator rating must be positive",
                            id,
                        );
                    }
                }
                Node::Device(device) => {
                    let id = device.id.as_str();
                    if !seen_nodes.insert(format!("device {id}")) {
                        diag.add_error_with_entity("structure", "Duplicate device id", id);
                    }
                    let located = match &device.location {
                        ElementRef::Bus(bus) => bus_ids.contains(bus),
                        other => seen_edges.contains(&other.to_string()),
                    };
                    if !located {
                        diag.add_error_with_entity(
                            "reference",
                            &format!("Device location {} does not exist", device.location),
                            id,
                        );
                    }
                    if device.pickup_a <= 0.0 {
                        diag.add_error_with_entity(
                            "parameter",
                            "Device pickup current must be positive",
                            id,
                        );
                    }
                }
            }
        }
        for device in self.devices() {
            if let Some(upstream) = &device.upstream {
                if !seen_nodes.contains(&format!("device {upstream}")) {
                    diag.add_error_with_entity(
                        "reference",
                        &format!("Upstream device '{upstream}' does not exist"),
                        device.id.as_str(),
                    );
                }
            }
        }

        if !has_load {
            diag.add_warning("structure", "Network has no loads");
        }
        if !has_generation && self.slack_buses().is_empty() {
            diag.add_warning("structure", "Network has no generators");
        }

        for island in BusGraph::from_network(self).islands() {
            let slack_count = island
                .iter()
                .filter(|id| {
                    self.bus(id)
                        .is_some_and(|bus| bus.bus_type == BusType::Slack)
                })
                .count();
            let label = island
                .iter()
                .map(BusId::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            match slack_count {
                0 => diag.add_error_with_entity(
                    "topology",
                    "Island has no slack bus",
                    &label,
                ),
                1 => {}
                n => diag.add_error_with_entity(
                    "topology",
                    &format!("Island has {n} slack buses"),
                    &label,
                ),
            }
        }
    }
}
