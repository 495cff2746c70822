//! Dense linear solvers used by the analysis crates.
//!
//! Sparse structure lives in the Y-bus; the systems solved here (Newton
//! updates, sequence and harmonic nodal equations) are small enough per
//! study to factor densely.

mod backend;
mod registry;

pub use backend::{FaerSolver, GaussSolver, LinearSystemBackend};
pub use registry::SolverKind;
