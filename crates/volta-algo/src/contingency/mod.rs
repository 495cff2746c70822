//! N-1 contingency analysis.
//!
//! Each in-service branch and transformer is removed in turn. Buses that
//! lose every path to a slack bus are reported as islanded and dropped; the
//! rest of the network is re-solved with the full AC power flow and checked
//! for voltage and loading violations.
//!
//! Contingencies are independent and run on the rayon pool when parallel
//! execution is enabled.

pub mod n1;

pub use n1::{
    outage_network, BranchLoading, ContingencyAnalyzer, ContingencyOutcome, ContingencyReport,
};
