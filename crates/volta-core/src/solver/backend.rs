use faer::{prelude::*, solvers::PartialPivLu, Mat};
use num_complex::Complex64;

use crate::error::{VoltaError, VoltaResult};

/// Trait for solving dense linear systems (Ax = b).
///
/// Implementations report a singular or ill-conditioned matrix as
/// [`VoltaError::Numerical`]; they never return non-finite values.
pub trait LinearSystemBackend: Send + Sync {
    /// Solve the real system Ax = b
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> VoltaResult<Vec<f64>>;

    /// Solve a complex system through its real expansion
    ///
    /// ```text
    /// ┌ G  -B ┐ ┌ x_re ┐   ┌ b_re ┐
    /// └ B   G ┘ └ x_im ┘ = └ b_im ┘
    /// ```
    fn solve_complex(
        &self,
        matrix: &[Vec<Complex64>],
        rhs: &[Complex64],
    ) -> VoltaResult<Vec<Complex64>> {
        let n = matrix.len();
        check_dimensions(n, rhs.len(), matrix.iter().map(Vec::len))?;

        let mut real = vec![vec![0.0; 2 * n]; 2 * n];
        for (i, row) in matrix.iter().enumerate() {
            for (j, a) in row.iter().enumerate() {
                real[i][j] = a.re;
                real[i][j + n] = -a.im;
                real[i + n][j] = a.im;
                real[i + n][j + n] = a.re;
            }
        }
        let mut b = Vec::with_capacity(2 * n);
        b.extend(rhs.iter().map(|v| v.re));
        b.extend(rhs.iter().map(|v| v.im));

        let x = self.solve(&real, &b)?;
        Ok((0..n).map(|i| Complex64::new(x[i], x[i + n])).collect())
    }
}

fn check_dimensions(
    n: usize,
    rhs_len: usize,
    mut row_lengths: impl Iterator<Item = usize>,
) -> VoltaResult<()> {
    if rhs_len != n {
        return Err(VoltaError::Numerical(format!(
            "rhs length ({rhs_len}) does not match matrix dimension {n}"
        )));
    }
    if row_lengths.any(|len| len != n) {
        return Err(VoltaError::Numerical("matrix must be square".into()));
    }
    Ok(())
}

/// Gaussian elimination with partial pivoting.
#[derive(Debug, Clone, Default)]
pub struct GaussSolver;

impl LinearSystemBackend for GaussSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> VoltaResult<Vec<f64>> {
        let n = matrix.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        check_dimensions(n, rhs.len(), matrix.iter().map(Vec::len))?;

        let scale = matrix
            .iter()
            .flat_map(|row| row.iter())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
            .max(1.0);
        let mut a = matrix.to_vec();
        let mut b = rhs.to_vec();

        for i in 0..n {
            let pivot = (i..n)
                .max_by(|&r1, &r2| a[r1][i].abs().total_cmp(&a[r2][i].abs()))
                .unwrap_or(i);
            if pivot != i {
                a.swap(i, pivot);
                b.swap(i, pivot);
            }

            let diag = a[i][i];
            if diag.abs() < 1e-12 * scale {
                return Err(VoltaError::Numerical(format!(
                    "singular matrix (zero pivot in column {i})"
                )));
            }

            for row in i + 1..n {
                let factor = a[row][i] / diag;
                if factor == 0.0 {
                    continue;
                }
                for col in i..n {
                    a[row][col] -= factor * a[i][col];
                }
                b[row] -= factor * b[i];
            }
        }

        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let tail: f64 = (i + 1..n).map(|j| a[i][j] * x[j]).sum();
            x[i] = (b[i] - tail) / a[i][i];
        }
        Ok(x)
    }
}

/// LU factorization with partial pivoting from `faer`.
#[derive(Debug, Clone, Default)]
pub struct FaerSolver;

impl LinearSystemBackend for FaerSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> VoltaResult<Vec<f64>> {
        let n = matrix.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        check_dimensions(n, rhs.len(), matrix.iter().map(Vec::len))?;

        let mat = Mat::from_fn(n, n, |i, j| matrix[i][j]);
        let rhs_mat = Mat::from_fn(n, 1, |i, _| rhs[i]);
        let lu = PartialPivLu::new(mat.as_ref());
        let sol = lu.solve(&rhs_mat);

        let solution: Vec<f64> = (0..n).map(|i| sol.read(i, 0)).collect();
        // faer does not report rank deficiency; a singular factor shows up
        // as inf/NaN in the solution.
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(VoltaError::Numerical(
                "singular matrix (non-finite solution)".into(),
            ));
        }
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauss_solves_pivoted_system() {
        let matrix = vec![vec![0.0, 2.0], vec![3.0, 1.0]];
        let x = GaussSolver.solve(&matrix, &[4.0, 5.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn singular_matrix_is_numerical_error() {
        let matrix = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        for solver in [&GaussSolver as &dyn LinearSystemBackend, &FaerSolver] {
            let err = solver.solve(&matrix, &[1.0, 1.0]).unwrap_err();
            assert!(matches!(err, VoltaError::Numerical(_)));
        }
    }

    #[test]
    fn complex_solve_matches_division() {
        // (0 + j0.05) · I = 1  =>  I = -j20
        let z = vec![vec![Complex64::new(0.0, 0.05)]];
        let i = FaerSolver
            .solve_complex(&z, &[Complex64::new(1.0, 0.0)])
            .unwrap();
        assert!((i[0] - Complex64::new(0.0, -20.0)).norm() < 1e-9);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let err = GaussSolver
            .solve(&[vec![1.0, 0.0], vec![0.0, 1.0]], &[1.0])
            .unwrap_err();
        assert!(err.to_string().contains("rhs length"));
    }
}
