//! # volta-algo: Electrical Network Analysis
//!
//! Steady-state studies over a [`volta_core::Network`]:
//!
//! | Study | Entry point | Method |
//! |-------|-------------|--------|
//! | Load flow | [`perform_load_flow`] | Polar Newton-Raphson with Q-limits and ZIP loads |
//! | Short circuit | [`perform_short_circuit_analysis`] | Symmetrical components, Thevenin Z-bus columns |
//! | Harmonics | [`perform_harmonic_analysis`] | Per-order linear penetration, IEEE 519 checks |
//! | Topology | [`optimize_network_topology`] | Outage reachability, ranked upgrades |
//!
//! N-1 contingency screening ([`contingency`]) and full fault studies
//! ([`AnalysisEngine::perform_short_circuit_study`]) are available on
//! [`AnalysisEngine`].
//!
//! ## Architecture
//!
//! Every study starts by compiling the network into a [`model::SystemModel`]:
//! buses sorted into matrix order, elements converted to per-unit on the
//! system base, three-winding transformers expanded to a star. Solvers only
//! ever see the compiled model, and results refer back to elements by id.
//!
//! - **[`sparse`]**: Y-bus assembly (CSR via `sprs`)
//! - **[`power_flow`]**: Newton-Raphson solver and load-flow results
//! - **[`short_circuit`]**: sequence networks, fault solver, equipment duty,
//!   protection coordination
//! - **[`harmonics`]**: harmonic network models and IEEE 519 compliance
//! - **[`contingency`]**: N-1 AC screening
//! - **[`topology`]**: single points of failure and recommendations
//! - **[`config`]**: TOML engine configuration
//!
//! ## Example
//!
//! ```rust
//! use volta_core::*;
//!
//! let mut network = Network::new();
//! network.add_bus(Bus::new("SRC", BusType::Slack, Kilovolts(13.8)));
//! network.add_bus(Bus::new("LOAD", BusType::Pq, Kilovolts(13.8)));
//! network
//!     .add_branch(Branch::new("L1", "SRC", "LOAD", 0.01, 0.05))
//!     .unwrap();
//! network.add_load(Load::new("LD1", "LOAD", 20.0, 5.0));
//!
//! let result = volta_algo::perform_load_flow(&network).unwrap();
//! assert!(result.converged);
//! assert!(result.bus(&"LOAD".into()).unwrap().voltage_pu < 1.0);
//! // The slack bus supplies the load and the losses
//! assert!(result.power_balance_error_mw().abs() < 1e-3);
//! ```

pub mod config;
pub mod contingency;
pub mod engine;
pub mod harmonics;
pub mod model;
pub mod power_flow;
pub mod short_circuit;
pub mod sparse;
pub mod topology;

pub use config::EngineConfig;
pub use contingency::{ContingencyAnalyzer, ContingencyOutcome, ContingencyReport};
pub use engine::AnalysisEngine;
pub use harmonics::{ComplianceViolation, HarmonicAnalysisResult, ViolationSeverity};
pub use model::SystemModel;
pub use power_flow::*;
pub use short_circuit::{
    CoordinationProblem, EquipmentStress, ProtectionCoordination, SequenceNetworks,
    ShortCircuitResult, ShortCircuitStudy,
};
pub use sparse::{BranchStamp, SparseYBus, YBusError};
pub use topology::{Priority, Recommendation, RecommendationKind, TopologyOptimization};

use volta_core::{BusId, FaultType, Network, VoltaResult};

/// Newton-Raphson load flow with the default engine configuration.
pub fn perform_load_flow(network: &Network) -> VoltaResult<LoadFlowResult> {
    AnalysisEngine::default().perform_load_flow(network)
}

/// Load flow with a warm start or cancellation token.
pub fn perform_load_flow_with(
    network: &Network,
    options: &LoadFlowOptions,
) -> VoltaResult<LoadFlowResult> {
    AnalysisEngine::default().perform_load_flow_with(network, options)
}

pub fn perform_short_circuit_analysis(
    network: &Network,
    fault_bus: &BusId,
    fault_type: FaultType,
) -> VoltaResult<ShortCircuitResult> {
    AnalysisEngine::default().perform_short_circuit_analysis(network, fault_bus, fault_type)
}

pub fn perform_harmonic_analysis(network: &Network) -> VoltaResult<HarmonicAnalysisResult> {
    AnalysisEngine::default().perform_harmonic_analysis(network)
}

pub fn optimize_network_topology(network: &Network) -> VoltaResult<TopologyOptimization> {
    AnalysisEngine::default().optimize_network_topology(network)
}

/// Map `f` over independent cases, on the rayon pool when `parallel`.
#[cfg(feature = "parallel")]
pub(crate) fn map_cases<T, R, F>(items: &[T], parallel: bool, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    use rayon::prelude::*;
    if parallel {
        items.par_iter().map(f).collect()
    } else {
        items.iter().map(f).collect()
    }
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn map_cases<T, R, F>(items: &[T], _parallel: bool, f: F) -> Vec<R>
where
    F: Fn(&T) -> R,
{
    items.iter().map(f).collect()
}
