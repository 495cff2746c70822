//! Sparse Y-bus (admittance) matrix.
//!
//! The Y-bus relates injected currents to bus voltages:
//! ```text
//! I = Y × V
//!
//! where Y[i,j] = G[i,j] + jB[i,j] (conductance + j×susceptance)
//! ```
//!
//! Every two-terminal element contributes a 2×2 block. For the π-model with
//! an off-nominal tap τ∠φ on the from side:
//! ```text
//! Y_ff = y/τ² + jb/2      Y_ft = -y/(τ·e^{-jφ})
//! Y_tf = -y/(τ·e^{jφ})    Y_tt = y + jb/2
//! ```

use num_complex::Complex64;
use sprs::{CsMat, TriMat};
use thiserror::Error;
use volta_core::VoltaError;

use crate::model::SystemModel;

/// Errors from Y-bus matrix operations
#[derive(Debug, Error)]
pub enum YBusError {
    #[error("No buses found in network")]
    NoBuses,

    #[error("Branch {0} has zero impedance")]
    ZeroImpedance(String),

    #[error("Unknown bus index: {0}")]
    UnknownBus(usize),
}

impl From<YBusError> for VoltaError {
    fn from(err: YBusError) -> Self {
        match err {
            YBusError::NoBuses | YBusError::ZeroImpedance(_) => {
                VoltaError::Validation(err.to_string())
            }
            YBusError::UnknownBus(_) => VoltaError::Numerical(err.to_string()),
        }
    }
}

/// Admittance block contributed by one two-terminal element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchStamp {
    pub from: usize,
    pub to: usize,
    pub y_ff: Complex64,
    pub y_ft: Complex64,
    pub y_tf: Complex64,
    pub y_tt: Complex64,
    /// Total line charging, split equally between the terminals
    pub charging_b: f64,
}

impl BranchStamp {
    /// π-model with total charging `charging_b` and tap `tap∠shift_rad` on
    /// the from side.
    pub fn pi_model(
        from: usize,
        to: usize,
        y_series: Complex64,
        charging_b: f64,
        tap: f64,
        shift_rad: f64,
    ) -> Self {
        let shift = Complex64::from_polar(1.0, -shift_rad);
        let y_half = Complex64::new(0.0, charging_b / 2.0);
        Self {
            from,
            to,
            y_ff: y_series / (tap * tap) + y_half,
            y_ft: -y_series / tap * shift.conj(),
            y_tf: -y_series / tap * shift,
            y_tt: y_series + y_half,
            charging_b,
        }
    }

    /// Plain series admittance between two buses.
    pub fn series(from: usize, to: usize, y: Complex64) -> Self {
        Self::pi_model(from, to, y, 0.0, 1.0, 0.0)
    }

    /// Admittance to ground at a single bus, expressed as a stamp so sequence
    /// networks can treat it like any other element.
    pub fn shunt(bus: usize, y: Complex64) -> Self {
        let zero = Complex64::new(0.0, 0.0);
        Self {
            from: bus,
            to: bus,
            y_ff: y,
            y_ft: zero,
            y_tf: zero,
            y_tt: zero,
            charging_b: 0.0,
        }
    }

    /// Current entering the element at the from terminal.
    pub fn from_current(&self, v: &[Complex64]) -> Complex64 {
        self.y_ff * v[self.from] + self.y_ft * v[self.to]
    }

    /// Current entering the element at the to terminal.
    pub fn to_current(&self, v: &[Complex64]) -> Complex64 {
        self.y_tf * v[self.from] + self.y_tt * v[self.to]
    }
}

/// Sparse Y-bus matrix in CSR format.
///
/// Stores G (conductance) and B (susceptance) matrices separately for
/// efficient access to real and imaginary parts.
#[derive(Debug, Clone)]
pub struct SparseYBus {
    n_bus: usize,
    g_matrix: CsMat<f64>,
    b_matrix: CsMat<f64>,
    /// Bus shunt plus half the charging of every incident element
    shunt: Vec<Complex64>,
}

impl SparseYBus {
    /// Assemble from element stamps and per-bus shunt admittances.
    pub fn from_stamps(
        n_bus: usize,
        stamps: &[BranchStamp],
        shunts: &[(usize, Complex64)],
    ) -> Result<Self, YBusError> {
        if n_bus == 0 {
            return Err(YBusError::NoBuses);
        }

        let mut g_triplet = TriMat::new((n_bus, n_bus));
        let mut b_triplet = TriMat::new((n_bus, n_bus));
        let mut shunt = vec![Complex64::new(0.0, 0.0); n_bus];
        let mut add = |i: usize, j: usize, y: Complex64| {
            g_triplet.add_triplet(i, j, y.re);
            b_triplet.add_triplet(i, j, y.im);
        };

        for stamp in stamps {
            for idx in [stamp.from, stamp.to] {
                if idx >= n_bus {
                    return Err(YBusError::UnknownBus(idx));
                }
            }
            if stamp.from == stamp.to {
                add(stamp.from, stamp.from, stamp.y_ff);
                shunt[stamp.from] += stamp.y_ff;
                continue;
            }
            add(stamp.from, stamp.from, stamp.y_ff);
            add(stamp.to, stamp.to, stamp.y_tt);
            add(stamp.from, stamp.to, stamp.y_ft);
            add(stamp.to, stamp.from, stamp.y_tf);
            let half = Complex64::new(0.0, stamp.charging_b / 2.0);
            shunt[stamp.from] += half;
            shunt[stamp.to] += half;
        }

        for &(bus, y) in shunts {
            if bus >= n_bus {
                return Err(YBusError::UnknownBus(bus));
            }
            add(bus, bus, y);
            shunt[bus] += y;
        }

        Ok(Self {
            n_bus,
            g_matrix: g_triplet.to_csr(),
            b_matrix: b_triplet.to_csr(),
            shunt,
        })
    }

    /// Positive-sequence Y-bus of a compiled network, as used by the power
    /// flow: every in-service element with charging, taps and bus shunts.
    pub fn from_model(model: &SystemModel) -> Result<Self, YBusError> {
        let mut stamps = Vec::with_capacity(model.branches.len());
        for branch in &model.branches {
            if branch.z_series.norm() < 1e-12 {
                return Err(YBusError::ZeroImpedance(branch.label.clone()));
            }
            stamps.push(branch.stamp());
        }
        let shunts: Vec<(usize, Complex64)> = model
            .buses
            .iter()
            .enumerate()
            .filter(|(_, bus)| bus.shunt.norm() > 0.0)
            .map(|(i, bus)| (i, bus.shunt))
            .collect();
        Self::from_stamps(model.n_bus(), &stamps, &shunts)
    }

    /// Number of buses
    pub fn n_bus(&self) -> usize {
        self.n_bus
    }

    /// Get G[i,j] (conductance)
    pub fn g(&self, i: usize, j: usize) -> f64 {
        self.g_matrix.get(i, j).copied().unwrap_or(0.0)
    }

    /// Get B[i,j] (susceptance)
    pub fn b(&self, i: usize, j: usize) -> f64 {
        self.b_matrix.get(i, j).copied().unwrap_or(0.0)
    }

    /// Get complex Y[i,j] = G[i,j] + jB[i,j]
    pub fn y(&self, i: usize, j: usize) -> Complex64 {
        Complex64::new(self.g(i, j), self.b(i, j))
    }

    /// Total non-zeros (G + B)
    pub fn nnz(&self) -> usize {
        self.g_matrix.nnz() + self.b_matrix.nnz()
    }

    /// Iterate over non-zero entries in row i of G matrix (zero-allocation).
    pub fn g_row_iter(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let indptr = self.g_matrix.indptr();
        let start = indptr.index(i);
        let end = indptr.index(i + 1);
        let indices = &self.g_matrix.indices()[start..end];
        let data = &self.g_matrix.data()[start..end];
        indices.iter().zip(data.iter()).map(|(&j, &v)| (j, v))
    }

    /// Iterate over non-zero entries in row i of B matrix (zero-allocation).
    pub fn b_row_iter(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let indptr = self.b_matrix.indptr();
        let start = indptr.index(i);
        let end = indptr.index(i + 1);
        let indices = &self.b_matrix.indices()[start..end];
        let data = &self.b_matrix.data()[start..end];
        indices.iter().zip(data.iter()).map(|(&j, &v)| (j, v))
    }

    /// Non-zero Y[i,j] entries of row i.
    pub fn row_entries(&self, i: usize) -> Vec<(usize, Complex64)> {
        let mut entries: Vec<(usize, Complex64)> = self
            .g_row_iter(i)
            .map(|(j, g)| (j, Complex64::new(g, 0.0)))
            .collect();
        for (j, b) in self.b_row_iter(i) {
            match entries.iter_mut().find(|(k, _)| *k == j) {
                Some((_, y)) => y.im += b,
                None => entries.push((j, Complex64::new(0.0, b))),
            }
        }
        entries
    }

    /// Injected current I_i = Σ_j Y_ij·V_j.
    pub fn current_injection(&self, i: usize, v: &[Complex64]) -> Complex64 {
        let mut current = Complex64::new(0.0, 0.0);
        for (j, g) in self.g_row_iter(i) {
            current += v[j] * g;
        }
        for (j, b) in self.b_row_iter(i) {
            current += v[j] * Complex64::new(0.0, b);
        }
        current
    }

    /// Σ_j Y_ij
    pub fn row_sum(&self, i: usize) -> Complex64 {
        let g: f64 = self.g_row_iter(i).map(|(_, v)| v).sum();
        let b: f64 = self.b_row_iter(i).map(|(_, v)| v).sum();
        Complex64::new(g, b)
    }

    /// Admittance from bus `i` to ground: bus shunt plus half the charging of
    /// each element ending at the bus.
    pub fn shunt_admittance(&self, i: usize) -> Complex64 {
        self.shunt[i]
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        (0..self.n_bus).all(|i| {
            self.g_row_iter(i)
                .all(|(j, g)| (g - self.g(j, i)).abs() <= tol)
                && self
                    .b_row_iter(i)
                    .all(|(j, b)| (b - self.b(j, i)).abs() <= tol)
        })
    }

    /// Largest deviation between a row sum and the shunt admittance at that
    /// bus. Zero (to rounding) when no element carries an off-nominal tap.
    pub fn max_row_sum_error(&self) -> f64 {
        (0..self.n_bus)
            .map(|i| (self.row_sum(i) - self.shunt[i]).norm())
            .fold(0.0, f64::max)
    }

    pub fn check_row_sums(&self, tol: f64) -> bool {
        self.max_row_sum_error() <= tol
    }

    /// Dense copy for direct factorization.
    pub fn to_dense(&self) -> Vec<Vec<Complex64>> {
        let mut dense = vec![vec![Complex64::new(0.0, 0.0); self.n_bus]; self.n_bus];
        for (i, row) in dense.iter_mut().enumerate() {
            for (j, g) in self.g_row_iter(i) {
                row[j].re += g;
            }
            for (j, b) in self.b_row_iter(i) {
                row[j].im += b;
            }
        }
        dense
    }
}
