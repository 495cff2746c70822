//! Engine configuration.
//!
//! [`EngineConfig`] holds the knobs that are properties of the study rather
//! than of the network: solver policy, default voltage band, protection
//! margins, the IEEE-519 limit tables and the recommendation cost model.
//! Per-network settings (tolerance, iterations, harmonic orders, fault types)
//! live on [`volta_core::AnalysisSettings`] and take precedence.
//!
//! Configuration is TOML and every section is optional:
//!
//! ```toml
//! [power_flow]
//! enforce_q_limits = false
//!
//! [voltage]
//! min_pu = 0.97
//! ```

use std::cmp::Ordering;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use volta_core::{BusId, Impedance, SolverKind, VoltaError, VoltaResult};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub power_flow: PowerFlowConfig,
    pub voltage: VoltageBandConfig,
    pub short_circuit: ShortCircuitConfig,
    pub protection: ProtectionConfig,
    pub harmonics: HarmonicsConfig,
    pub topology: TopologyConfig,
    /// Run harmonic orders and contingencies on the rayon pool.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            power_flow: PowerFlowConfig::default(),
            voltage: VoltageBandConfig::default(),
            short_circuit: ShortCircuitConfig::default(),
            protection: ProtectionConfig::default(),
            harmonics: HarmonicsConfig::default(),
            topology: TopologyConfig::default(),
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerFlowConfig {
    /// Switch PV buses to PQ when their generators hit a reactive limit.
    pub enforce_q_limits: bool,
    /// Outer passes allowed for PV→PQ switching.
    pub max_q_iterations: usize,
    pub linear_solver: SolverKind,
}

impl Default for PowerFlowConfig {
    fn default() -> Self {
        Self {
            enforce_q_limits: true,
            max_q_iterations: 10,
            linear_solver: SolverKind::Faer,
        }
    }
}

/// Fallback voltage band for buses without their own limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoltageBandConfig {
    pub min_pu: f64,
    pub max_pu: f64,
}

impl Default for VoltageBandConfig {
    fn default() -> Self {
        Self {
            min_pu: 0.95,
            max_pu: 1.05,
        }
    }
}

/// Source of pre-fault voltages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrefaultMode {
    /// Solved load flow, falling back to flat if it does not converge
    #[default]
    LoadFlow,
    /// 1.0∠0 at every bus
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ShortCircuitConfig {
    /// Fault impedance Zf (per-unit on system base)
    pub fault_impedance: Impedance,
    pub prefault: PrefaultMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Margins below this are reported as warnings.
    pub min_coordination_margin_s: f64,
    /// Margins at or below this (or negative) are fatal.
    pub fatal_margin_s: f64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            min_coordination_margin_s: 0.3,
            fatal_margin_s: 0.1,
        }
    }
}

/// Voltage distortion limits for one bus-voltage class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageDistortionLimit {
    /// Upper bound of the class, inclusive
    pub max_kv: f64,
    pub individual_pct: f64,
    pub thd_pct: f64,
}

/// Current distortion limits for one Isc/IL row.
///
/// Odd-harmonic limits by order band; even harmonics are held to
/// `even_fraction` of the band they fall in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentDistortionLimit {
    /// Upper bound of the Isc/IL ratio for this row, exclusive
    pub max_isc_il: f64,
    /// Limits for 3≤h<11, 11≤h<17, 17≤h<23, 23≤h<35, 35≤h≤50 (percent of I_L)
    pub band_pct: [f64; 5],
    pub tdd_pct: f64,
}

impl CurrentDistortionLimit {
    pub fn individual_limit(&self, order: u32, even_fraction: f64) -> f64 {
        let band = match order {
            0..=10 => 0,
            11..=16 => 1,
            17..=22 => 2,
            23..=34 => 3,
            _ => 4,
        };
        let limit = self.band_pct[band];
        if order % 2 == 0 {
            limit * even_fraction
        } else {
            limit
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonicsConfig {
    /// Sorted by `max_kv`
    pub voltage_limits: Vec<VoltageDistortionLimit>,
    /// Sorted by `max_isc_il`; the first row is the most restrictive
    pub current_limits: Vec<CurrentDistortionLimit>,
    pub even_harmonic_fraction: f64,
    /// Point of common coupling; defaults to the slack bus
    pub pcc_bus: Option<BusId>,
}

impl Default for HarmonicsConfig {
    // IEEE 519-2014 Tables 1 and 2
    fn default() -> Self {
        let v = |max_kv, individual_pct, thd_pct| VoltageDistortionLimit {
            max_kv,
            individual_pct,
            thd_pct,
        };
        let i = |max_isc_il, band_pct, tdd_pct| CurrentDistortionLimit {
            max_isc_il,
            band_pct,
            tdd_pct,
        };
        Self {
            voltage_limits: vec![
                v(1.0, 5.0, 8.0),
                v(69.0, 3.0, 5.0),
                v(161.0, 1.5, 2.5),
                v(f64::INFINITY, 1.0, 1.5),
            ],
            current_limits: vec![
                i(20.0, [4.0, 2.0, 1.5, 0.6, 0.3], 5.0),
                i(50.0, [7.0, 3.5, 2.5, 1.0, 0.5], 8.0),
                i(100.0, [10.0, 4.5, 4.0, 1.5, 0.7], 12.0),
                i(1000.0, [12.0, 5.5, 5.0, 2.0, 1.0], 15.0),
                i(f64::INFINITY, [15.0, 7.0, 6.0, 2.5, 1.4], 20.0),
            ],
            even_harmonic_fraction: 0.25,
            pcc_bus: None,
        }
    }
}

impl HarmonicsConfig {
    /// Voltage class for a bus of the given nominal voltage.
    pub fn voltage_limit_for(&self, kv: f64) -> Option<&VoltageDistortionLimit> {
        self.voltage_limits
            .iter()
            .find(|limit| kv <= limit.max_kv)
            .or_else(|| self.voltage_limits.last())
    }

    /// Current row for an Isc/IL ratio; unknown ratios get the strictest row.
    pub fn current_limit_for(&self, isc_il: Option<f64>) -> Option<&CurrentDistortionLimit> {
        match isc_il {
            Some(ratio) => self
                .current_limits
                .iter()
                .find(|limit| ratio < limit.max_isc_il)
                .or_else(|| self.current_limits.last()),
            None => self.current_limits.first(),
        }
    }
}

/// Cost model for topology recommendations (currency units are the caller's).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub loading_limit_pct: f64,
    pub redundant_path_base_cost: f64,
    pub redundant_path_cost_per_mva: f64,
    pub voltage_support_cost_per_mvar: f64,
    pub capacity_upgrade_cost_per_mva: f64,
    pub harmonic_filter_cost_per_kvar: f64,
    pub equipment_upgrade_cost: f64,
    /// Include stranded-load N-1 screening in topology studies
    pub screen_contingencies: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            loading_limit_pct: 100.0,
            redundant_path_base_cost: 75_000.0,
            redundant_path_cost_per_mva: 1_500.0,
            voltage_support_cost_per_mvar: 25_000.0,
            capacity_upgrade_cost_per_mva: 20_000.0,
            harmonic_filter_cost_per_kvar: 60.0,
            equipment_upgrade_cost: 40_000.0,
            screen_contingencies: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> VoltaResult<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| VoltaError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> VoltaResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> VoltaResult<String> {
        toml::to_string_pretty(self).map_err(|e| VoltaError::Config(e.to_string()))
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> VoltaResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("writing engine config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> VoltaResult<()> {
        if self.voltage.min_pu.partial_cmp(&self.voltage.max_pu) != Some(Ordering::Less) {
            return Err(VoltaError::Config(format!(
                "voltage band min {} must be below max {}",
                self.voltage.min_pu, self.voltage.max_pu
            )));
        }
        if self.protection.fatal_margin_s > self.protection.min_coordination_margin_s {
            return Err(VoltaError::Config(
                "protection fatal margin exceeds the minimum coordination margin".into(),
            ));
        }
        if self.harmonics.voltage_limits.is_empty() || self.harmonics.current_limits.is_empty() {
            return Err(VoltaError::Config(
                "harmonic limit tables must not be empty".into(),
            ));
        }
        if self.power_flow.max_q_iterations == 0 {
            return Err(VoltaError::Config("max_q_iterations must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.power_flow.enforce_q_limits);
        assert_eq!(config.voltage.min_pu, 0.95);
        assert_eq!(config.harmonics.current_limits.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_parsing() {
        let toml = r#"
            parallel = false

            [power_flow]
            linear_solver = "gauss"

            [short_circuit]
            prefault = "flat"
            fault_impedance = { r = 0.0, x = 0.01 }
        "#;

        let config = EngineConfig::from_toml_str(toml).unwrap();
        assert!(!config.parallel);
        assert_eq!(config.power_flow.linear_solver, SolverKind::Gauss);
        assert_eq!(config.short_circuit.prefault, PrefaultMode::Flat);
        assert_eq!(config.short_circuit.fault_impedance.x, 0.01);
        // Unset sections keep defaults
        assert!(config.power_flow.enforce_q_limits);
        assert_eq!(config.protection.min_coordination_margin_s, 0.3);
    }

    #[test]
    fn test_invalid_band_rejected() {
        let err = EngineConfig::from_toml_str("[voltage]\nmin_pu = 1.1\nmax_pu = 1.0\n").unwrap_err();
        assert!(matches!(err, VoltaError::Config(_)));
    }

    #[test]
    fn test_save_and_load() {
        let file = NamedTempFile::new().unwrap();
        let mut config = EngineConfig::default();
        config.topology.loading_limit_pct = 90.0;
        config.save_to(file.path()).unwrap();

        let loaded = EngineConfig::load(file.path()).unwrap();
        assert_eq!(loaded.topology.loading_limit_pct, 90.0);
        assert_eq!(loaded.harmonics.voltage_limits, config.harmonics.voltage_limits);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(EngineConfig::load("/nonexistent/volta.toml").is_err());
    }

    #[test]
    fn test_ieee519_lookup() {
        let h = HarmonicsConfig::default();
        assert_eq!(h.voltage_limit_for(0.48).unwrap().thd_pct, 8.0);
        assert_eq!(h.voltage_limit_for(13.8).unwrap().thd_pct, 5.0);
        assert_eq!(h.voltage_limit_for(230.0).unwrap().thd_pct, 1.5);

        let row = h.current_limit_for(Some(35.0)).unwrap();
        assert_eq!(row.tdd_pct, 8.0);
        assert_eq!(row.individual_limit(5, 0.25), 7.0);
        assert_eq!(row.individual_limit(13, 0.25), 3.5);
        assert_eq!(row.individual_limit(4, 0.25), 1.75);

        assert_eq!(h.current_limit_for(None).unwrap().tdd_pct, 5.0);
        assert_eq!(h.current_limit_for(Some(5000.0)).unwrap().tdd_pct, 20.0);
    }
}
