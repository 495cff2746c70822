//! Analysis engine facade.
//!
//! [`AnalysisEngine`] binds an [`EngineConfig`] to the four studies. Each
//! entry point is a pure function of the network it is given: it compiles
//! the network, runs, and returns a result object without touching the
//! input. The free functions at the crate root use the default
//! configuration.

use std::path::Path;

use tracing::{info, warn};
use volta_core::{BusId, CancellationToken, FaultType, Network, VoltaResult};

use crate::config::EngineConfig;
use crate::contingency::{ContingencyAnalyzer, ContingencyReport};
use crate::harmonics::{HarmonicAnalysisResult, HarmonicAnalyzer};
use crate::model::SystemModel;
use crate::power_flow::{AcPowerFlowSolver, LoadFlowOptions, LoadFlowResult};
use crate::short_circuit::{ShortCircuitAnalyzer, ShortCircuitResult, ShortCircuitStudy};
use crate::topology::{TopologyAnalyzer, TopologyInputs, TopologyOptimization};

#[derive(Debug, Clone, Default)]
pub struct AnalysisEngine {
    config: EngineConfig,
}

impl AnalysisEngine {
    pub fn new(config: EngineConfig) -> VoltaResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Engine configured from a TOML file.
    pub fn from_config_file(path: impl AsRef<Path>) -> VoltaResult<Self> {
        Ok(Self {
            config: EngineConfig::load(path)?,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Power-flow solver for `network`: numerical settings come from the
    /// network, solver policy from the engine configuration.
    pub fn power_flow_solver(&self, network: &Network) -> AcPowerFlowSolver {
        let settings = &network.settings;
        let pf = &self.config.power_flow;
        let band = settings
            .voltage_limits
            .map(|(lo, hi)| (lo.value(), hi.value()))
            .unwrap_or((self.config.voltage.min_pu, self.config.voltage.max_pu));
        let mut solver = AcPowerFlowSolver::new()
            .with_tolerance(settings.convergence_tolerance)
            .with_max_iterations(settings.max_iterations)
            .with_acceleration_factor(settings.acceleration_factor)
            .with_q_limit_enforcement(pf.enforce_q_limits)
            .with_linear_solver(pf.linear_solver)
            .with_voltage_band(band.0, band.1);
        solver.max_q_iterations = pf.max_q_iterations;
        solver.flat_start = settings.flat_start;
        solver
    }

    pub fn perform_load_flow(&self, network: &Network) -> VoltaResult<LoadFlowResult> {
        self.perform_load_flow_with(network, &LoadFlowOptions::default())
    }

    /// Load flow with a warm start or cancellation token.
    pub fn perform_load_flow_with(
        &self,
        network: &Network,
        options: &LoadFlowOptions,
    ) -> VoltaResult<LoadFlowResult> {
        let model = SystemModel::compile(network)?;
        self.power_flow_solver(network).solve(&model, options)
    }

    pub fn perform_short_circuit_analysis(
        &self,
        network: &Network,
        fault_bus: &BusId,
        fault_type: FaultType,
    ) -> VoltaResult<ShortCircuitResult> {
        let solver = self.power_flow_solver(network);
        ShortCircuitAnalyzer::new(network, &self.config, &solver)?.analyze(fault_bus, fault_type)
    }

    /// Every fault type in the network settings at every bus.
    pub fn perform_short_circuit_study(&self, network: &Network) -> VoltaResult<ShortCircuitStudy> {
        let solver = self.power_flow_solver(network);
        ShortCircuitAnalyzer::new(network, &self.config, &solver)?
            .study(&network.settings.fault_types)
    }

    pub fn perform_harmonic_analysis(&self, network: &Network) -> VoltaResult<HarmonicAnalysisResult> {
        self.perform_harmonic_analysis_with(network, None)
    }

    /// Harmonic analysis that stops with `Cancelled` once `cancel` is set.
    pub fn perform_harmonic_analysis_with(
        &self,
        network: &Network,
        cancel: Option<&CancellationToken>,
    ) -> VoltaResult<HarmonicAnalysisResult> {
        let solver = self.power_flow_solver(network);
        let mut analyzer = HarmonicAnalyzer::new(&self.config, &solver);
        if let Some(token) = cancel {
            analyzer = analyzer.with_cancellation(token.clone());
        }
        analyzer.analyze(network)
    }

    pub fn perform_contingency_analysis(&self, network: &Network) -> VoltaResult<ContingencyReport> {
        self.perform_contingency_analysis_with(network, None)
    }

    /// N-1 screen that stops with `Cancelled` once `cancel` is set.
    pub fn perform_contingency_analysis_with(
        &self,
        network: &Network,
        cancel: Option<&CancellationToken>,
    ) -> VoltaResult<ContingencyReport> {
        network.validate()?;
        let solver = self.power_flow_solver(network);
        let mut analyzer = ContingencyAnalyzer::new(&solver, self.config.topology.loading_limit_pct)
            .with_parallel(self.config.parallel);
        if let Some(token) = cancel {
            analyzer = analyzer.with_cancellation(token.clone());
        }
        analyzer.analyze(network)
    }

    /// Run the base-case load flow plus whichever optional studies the
    /// network has data for, then rank upgrades.
    ///
    /// A failed optional study is logged and left out; only the load flow
    /// is required.
    pub fn optimize_network_topology(&self, network: &Network) -> VoltaResult<TopologyOptimization> {
        let model = SystemModel::compile(network)?;
        let solver = self.power_flow_solver(network);
        let load_flow = solver.solve(&model, &LoadFlowOptions::default())?;

        let short_circuit = if network.generators().iter().any(|g| g.has_short_circuit_data()) {
            optional(
                "short-circuit",
                ShortCircuitAnalyzer::new(network, &self.config, &solver)
                    .and_then(|sc| sc.study(&network.settings.fault_types)),
            )
        } else {
            None
        };
        let harmonics = if network.loads().iter().any(|l| l.is_nonlinear()) {
            optional(
                "harmonic",
                HarmonicAnalyzer::new(&self.config, &solver).analyze(network),
            )
        } else {
            None
        };
        let contingencies = if self.config.topology.screen_contingencies {
            optional("contingency", self.perform_contingency_analysis(network))
        } else {
            None
        };

        let inputs = TopologyInputs {
            load_flow: &load_flow,
            short_circuit: short_circuit.as_ref(),
            harmonics: harmonics.as_ref(),
            contingencies: contingencies.as_ref(),
        };
        let backend = self.config.power_flow.linear_solver.build_solver();
        let result =
            TopologyAnalyzer::new(&self.config.topology, backend.as_ref()).analyze(network, &model, inputs);
        info!(
            recommendations = result.recommendations.len(),
            cost = result.cost_estimate,
            "topology optimization complete"
        );
        Ok(result)
    }
}

fn optional<T>(study: &str, outcome: VoltaResult<T>) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(study, %err, "optional study failed; continuing without it");
            None
        }
    }
}
