//! # Sparse admittance matrices
//!
//! Distribution and industrial networks are sparse: each bus touches a
//! handful of branches, so the admittance matrix holds a few non-zeros per
//! row. [`SparseYBus`] stores it in CSR form with the real (G) and
//! imaginary (B) parts kept apart, which is what the Newton-Raphson
//! Jacobian reads row by row.
//!
//! The same builder serves the positive-sequence network used by the power
//! flow and the sequence and harmonic networks used by fault and harmonic
//! studies: callers describe each two-terminal element as a
//! [`BranchStamp`] and hand the list over together with bus shunts.

pub mod ybus;

pub use ybus::{BranchStamp, SparseYBus, YBusError};
