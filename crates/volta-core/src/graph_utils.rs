//! Bus-level connectivity.
//!
//! The element graph in [`Network`] keeps loads and generators as floating
//! nodes and draws a transformer as one edge even when it has a tertiary
//! winding. Topology questions (islands, reachability after an outage) need
//! buses only, so [`BusGraph`] projects the network onto an undirected graph
//! of buses joined by in-service branches and transformer windings.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::graph::{EdgeReference, NodeIndex, UnGraph};
use petgraph::visit::{Bfs, EdgeFiltered, EdgeRef};

use crate::{BusId, Edge, ElementRef, Network, Node};

#[derive(Debug, Clone)]
pub struct BusGraph {
    pub graph: UnGraph<BusId, ElementRef>,
    index: HashMap<BusId, NodeIndex>,
}

impl BusGraph {
    /// Project the in-service part of `network` onto its buses.
    pub fn from_network(network: &Network) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut index = HashMap::new();
        for node in network.graph.node_weights() {
            if let Node::Bus(bus) = node {
                index
                    .entry(bus.id.clone())
                    .or_insert_with(|| graph.add_node(bus.id.clone()));
            }
        }

        let connect = |graph: &mut UnGraph<BusId, ElementRef>, a: &BusId, b: &BusId, e: ElementRef| {
            if let (Some(&ia), Some(&ib)) = (index.get(a), index.get(b)) {
                graph.add_edge(ia, ib, e);
            }
        };

        for edge in network.graph.edge_weights() {
            if !edge.in_service() {
                continue;
            }
            let element = edge.element_ref();
            match edge {
                Edge::Branch(branch) => {
                    connect(&mut graph, &branch.from_bus, &branch.to_bus, element);
                }
                Edge::Transformer(tx) => {
                    connect(&mut graph, &tx.from_bus, &tx.to_bus, element.clone());
                    if let Some(tertiary) = &tx.tertiary {
                        connect(&mut graph, &tx.from_bus, &tertiary.bus, element.clone());
                        connect(&mut graph, &tx.to_bus, &tertiary.bus, element);
                    }
                }
            }
        }

        Self { graph, index }
    }

    pub fn node(&self, bus: &BusId) -> Option<NodeIndex> {
        self.index.get(bus).copied()
    }

    /// Connected groups of buses, each sorted, ordered by their first bus.
    pub fn islands(&self) -> Vec<Vec<BusId>> {
        let mut visited = HashSet::new();
        let mut islands = Vec::new();
        for start in self.graph.node_indices() {
            if visited.contains(&start) {
                continue;
            }
            let mut members = BTreeSet::new();
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(node) = bfs.next(&self.graph) {
                visited.insert(node);
                members.insert(self.graph[node].clone());
            }
            islands.push(members.into_iter().collect::<Vec<_>>());
        }
        islands.sort();
        islands
    }

    /// Buses reachable from any of `sources` with one element removed.
    ///
    /// Removing a bus removes every edge touching it; the removed bus is
    /// never reported as reachable.
    pub fn reachable_without(
        &self,
        sources: &[BusId],
        removed: Option<&ElementRef>,
    ) -> HashSet<BusId> {
        let removed_node = match removed {
            Some(ElementRef::Bus(bus)) => self.node(bus),
            _ => None,
        };
        let filtered = EdgeFiltered::from_fn(&self.graph, |edge: EdgeReference<'_, ElementRef>| {
            if Some(edge.weight()) == removed {
                return false;
            }
            match removed_node {
                Some(n) => edge.source() != n && edge.target() != n,
                None => true,
            }
        });

        let mut reached = HashSet::new();
        for source in sources {
            let Some(start) = self.node(source) else {
                continue;
            };
            if Some(start) == removed_node || reached.contains(source) {
                continue;
            }
            let mut bfs = Bfs::new(&filtered, start);
            while let Some(node) = bfs.next(&filtered) {
                reached.insert(self.graph[node].clone());
            }
        }
        reached
    }

    /// Elements incident to a bus (deduplicated, sorted).
    pub fn incident_elements(&self, bus: &BusId) -> Vec<ElementRef> {
        let Some(node) = self.node(bus) else {
            return Vec::new();
        };
        let set: BTreeSet<ElementRef> = self
            .graph
            .edges(node)
            .map(|edge| edge.weight().clone())
            .collect();
        set.into_iter().collect()
    }
}
