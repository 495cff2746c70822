//! Power Flow
//!
//! - [`ac_pf`]: Newton-Raphson AC power flow with Q-limit enforcement and
//!   voltage-dependent loads
//! - [`results`]: bus, generator and branch results, voltage profile
//!
//! ## Q-Limit Enforcement
//!
//! Generators that exceed their reactive limits have their buses converted
//! from PV (voltage-controlled) to PQ, fixing Q at the limit and letting the
//! voltage float. Every switch is logged and listed in
//! [`LoadFlowResult::pv_to_pq`].

pub mod ac_pf;
pub mod results;

#[cfg(test)]
mod q_limits;

pub use ac_pf::{AcPowerFlowSolver, LoadFlowOptions, PowerFlowState};
pub use results::{
    BranchFlow, BusResult, GeneratorResult, LoadFlowResult, VoltageProfile, VoltageViolation,
    ViolationKind,
};
