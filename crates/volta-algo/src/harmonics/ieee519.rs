//! IEEE 519-2014 voltage and current distortion limits.
//!
//! Voltage limits depend on the bus voltage class. Current limits depend on
//! the short-circuit ratio Isc/IL at the point of evaluation; when Isc is
//! unknown the most restrictive row applies.

use serde::{Deserialize, Serialize};
use volta_core::BusId;

use crate::config::HarmonicsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ViolationSeverity {
    /// Classify by how far the measurement exceeds its limit.
    pub fn from_ratio(measured_over_limit: f64) -> Self {
        if measured_over_limit <= 1.25 {
            ViolationSeverity::Low
        } else if measured_over_limit <= 1.5 {
            ViolationSeverity::Medium
        } else if measured_over_limit <= 2.0 {
            ViolationSeverity::High
        } else {
            ViolationSeverity::Critical
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceKind {
    IndividualVoltage,
    VoltageThd,
    IndividualCurrent,
    Tdd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub bus: BusId,
    pub kind: ComplianceKind,
    /// Harmonic order for individual limits
    pub order: Option<u32>,
    pub measured_pct: f64,
    pub limit_pct: f64,
    pub severity: ViolationSeverity,
}

impl ComplianceViolation {
    fn check(
        bus: &BusId,
        kind: ComplianceKind,
        order: Option<u32>,
        measured_pct: f64,
        limit_pct: f64,
    ) -> Option<Self> {
        (measured_pct > limit_pct).then(|| ComplianceViolation {
            bus: bus.clone(),
            kind,
            order,
            measured_pct,
            limit_pct,
            severity: ViolationSeverity::from_ratio(measured_pct / limit_pct),
        })
    }
}

/// Voltage distortion at one bus: `(order, percent of fundamental)` pairs
/// plus the total.
pub fn check_voltage(
    config: &HarmonicsConfig,
    bus: &BusId,
    nominal_kv: f64,
    individual_pct: &[(u32, f64)],
    thd_pct: f64,
) -> Vec<ComplianceViolation> {
    let Some(limit) = config.voltage_limit_for(nominal_kv) else {
        return Vec::new();
    };
    individual_pct
        .iter()
        .filter_map(|&(order, pct)| {
            ComplianceViolation::check(
                bus,
                ComplianceKind::IndividualVoltage,
                Some(order),
                pct,
                limit.individual_pct,
            )
        })
        .chain(ComplianceViolation::check(
            bus,
            ComplianceKind::VoltageThd,
            None,
            thd_pct,
            limit.thd_pct,
        ))
        .collect()
}

/// Current distortion relative to demand current: `(order, percent of I_L)`
/// pairs plus TDD.
pub fn check_current(
    config: &HarmonicsConfig,
    bus: &BusId,
    isc_il: Option<f64>,
    individual_pct: &[(u32, f64)],
    tdd_pct: f64,
) -> Vec<ComplianceViolation> {
    let Some(row) = config.current_limit_for(isc_il) else {
        return Vec::new();
    };
    individual_pct
        .iter()
        .filter_map(|&(order, pct)| {
            ComplianceViolation::check(
                bus,
                ComplianceKind::IndividualCurrent,
                Some(order),
                pct,
                row.individual_limit(order, config.even_harmonic_fraction),
            )
        })
        .chain(ComplianceViolation::check(
            bus,
            ComplianceKind::Tdd,
            None,
            tdd_pct,
            row.tdd_pct,
        ))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bands() {
        assert_eq!(ViolationSeverity::from_ratio(1.1), ViolationSeverity::Low);
        assert_eq!(ViolationSeverity::from_ratio(1.25), ViolationSeverity::Low);
        assert_eq!(ViolationSeverity::from_ratio(1.4), ViolationSeverity::Medium);
        assert_eq!(ViolationSeverity::from_ratio(2.0), ViolationSeverity::High);
        assert_eq!(ViolationSeverity::from_ratio(3.0), ViolationSeverity::Critical);
    }

    #[test]
    fn medium_voltage_bus_limits() {
        let config = HarmonicsConfig::default();
        let bus = BusId::new("B1");
        // 13.8 kV: 3 % individual, 5 % THD
        let violations = check_voltage(&config, &bus, 13.8, &[(5, 4.2), (7, 2.0)], 4.6);
        assert_eq!(violations.len(), 1);
        let v = &violations[0];
        assert_eq!(v.kind, ComplianceKind::IndividualVoltage);
        assert_eq!(v.order, Some(5));
        assert_eq!(v.severity, ViolationSeverity::Medium);

        let violations = check_voltage(&config, &bus, 13.8, &[(5, 2.0)], 11.0);
        assert_eq!(violations[0].kind, ComplianceKind::VoltageThd);
        assert_eq!(violations[0].severity, ViolationSeverity::Critical);
    }

    #[test]
    fn unknown_short_circuit_ratio_uses_strictest_row() {
        let config = HarmonicsConfig::default();
        let bus = BusId::new("PCC");
        let strict = check_current(&config, &bus, None, &[(5, 5.0)], 5.0);
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].limit_pct, 4.0);

        let stiff = check_current(&config, &bus, Some(500.0), &[(5, 5.0)], 5.0);
        assert!(stiff.is_empty());
    }

    #[test]
    fn even_orders_get_a_quarter_of_the_odd_limit() {
        let config = HarmonicsConfig::default();
        let bus = BusId::new("PCC");
        let violations = check_current(&config, &bus, Some(10.0), &[(4, 1.2)], 1.2);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].limit_pct, 1.0);
        assert_eq!(violations[0].severity, ViolationSeverity::Low);
    }
}
