//! Result verification
//!
//! The machine has no runtime mechanism to detect a wrong computation;
//! correctness is established after the fact by comparing gathered
//! results against a host-computed reference. A numeric mismatch is a
//! diagnostic, not an error: checking never aborts anything, it returns
//! a structured [`CheckReport`] that the CLI prints and the test suite
//! asserts on.
//!
//! The tolerance law: relative error against the reference with
//! threshold [`REL_TOLERANCE`], falling back to the absolute threshold
//! [`ZERO_TOLERANCE`] when the reference is exactly zero.

use crate::error::{MeshError, Result};
use crate::host::HostMatrix;

/// Relative error allowed against a nonzero reference value.
pub const REL_TOLERANCE: f32 = 0.02;

/// Absolute error allowed when the reference value is exactly zero.
pub const ZERO_TOLERANCE: f32 = 1e-15;

/// Host reference for the mesh product: the true dot product
/// `Σₖ a[i][k]·b[k][j]`, accumulated in full precision.
///
/// Not `Σₖ b[i][j]·a[k][j]` — collapsing the row index of the left
/// operand makes the sum a column-sum scaling, which agrees with the
/// real product on just enough inputs (identity-like operands) to look
/// plausible while being wrong in general. The test suite pins a
/// witness input where the two disagree.
///
/// # Errors
///
/// Returns [`MeshError::ShapeMismatch`] if the operands differ in size.
pub fn reference_product(a: &HostMatrix, b: &HostMatrix) -> Result<HostMatrix> {
    if a.n() != b.n() {
        return Err(MeshError::ShapeMismatch {
            expected: a.n() * a.n(),
            actual: b.n() * b.n(),
        });
    }
    let n = a.n();
    Ok(HostMatrix::from_fn(n, |i, j| {
        (0..n).map(|k| a.get(i, k) * b.get(k, j)).sum()
    }))
}

/// One cell that missed the tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    /// Cell row.
    pub row: usize,
    /// Cell column.
    pub col: usize,
    /// Value the mesh produced.
    pub actual: f32,
    /// Host reference value.
    pub expected: f32,
}

/// Outcome of comparing one gathered matrix against its reference.
#[derive(Debug, Clone)]
pub struct CheckReport {
    label: String,
    cells: usize,
    mismatches: Vec<Mismatch>,
}

impl CheckReport {
    /// Name of the checked phase.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// True when every cell met the tolerance.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Cells that missed the tolerance.
    #[must_use]
    pub fn mismatches(&self) -> &[Mismatch] {
        &self.mismatches
    }

    /// One-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.passed() {
            format!("{}: OK ({} cells)", self.label, self.cells)
        } else {
            format!(
                "{}: {} of {} cells off tolerance",
                self.label,
                self.mismatches.len(),
                self.cells
            )
        }
    }
}

/// Compare a gathered matrix against its reference.
///
/// # Errors
///
/// Returns [`MeshError::ShapeMismatch`] if the matrices differ in size.
pub fn check_matrix(label: &str, actual: &HostMatrix, expected: &HostMatrix) -> Result<CheckReport> {
    if actual.n() != expected.n() {
        return Err(MeshError::ShapeMismatch {
            expected: expected.n() * expected.n(),
            actual: actual.n() * actual.n(),
        });
    }
    let n = actual.n();
    let mut mismatches = Vec::new();
    for row in 0..n {
        for col in 0..n {
            let got = actual.get(row, col);
            let want = expected.get(row, col);
            let off = if want == 0.0 {
                got.abs() > ZERO_TOLERANCE
            } else {
                ((got - want) / want).abs() > REL_TOLERANCE
            };
            if off {
                mismatches.push(Mismatch { row, col, actual: got, expected: want });
            }
        }
    }
    Ok(CheckReport {
        label: label.to_string(),
        cells: n * n,
        mismatches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reference_is_the_true_dot_product() {
        let a = HostMatrix::from_fn(2, |r, c| [[1.0, 2.0], [3.0, 4.0]][r][c]);
        let b = HostMatrix::from_fn(2, |r, c| [[5.0, 6.0], [7.0, 8.0]][r][c]);
        let p = reference_product(&a, &b).unwrap();
        assert_relative_eq!(p.get(0, 0), 19.0);
        assert_relative_eq!(p.get(0, 1), 22.0);
        assert_relative_eq!(p.get(1, 0), 43.0);
        assert_relative_eq!(p.get(1, 1), 50.0);
    }

    #[test]
    fn reference_rejects_the_column_sum_formula() {
        // Witness input where Σₖ b[i][j]·a[k][j] — the broken check
        // formula — disagrees with the real product. Guards against that
        // defect ever becoming the reference again.
        let a = HostMatrix::from_fn(2, |r, c| [[1.0, 2.0], [3.0, 4.0]][r][c]);
        let b = HostMatrix::from_fn(2, |r, c| [[5.0, 6.0], [7.0, 8.0]][r][c]);
        let p = reference_product(&a, &b).unwrap();
        let broken = HostMatrix::from_fn(2, |i, j| {
            (0..2).map(|k| b.get(i, j) * a.get(k, j)).sum()
        });
        let mut differs = false;
        for r in 0..2 {
            for c in 0..2 {
                differs |= (p.get(r, c) - broken.get(r, c)).abs() > 1e-6;
            }
        }
        assert!(differs, "witness input failed to separate the formulas");
    }

    #[test]
    fn relative_tolerance_accepts_two_percent() {
        let expected = HostMatrix::filled(2, 100.0);
        let mut actual = expected.clone();
        actual.set(0, 0, 101.9); // +1.9%
        actual.set(1, 1, 103.0); // +3.0%
        let report = check_matrix("tolerance", &actual, &expected).unwrap();
        assert!(!report.passed());
        assert_eq!(report.mismatches().len(), 1);
        assert_eq!(report.mismatches()[0].row, 1);
    }

    #[test]
    fn zero_reference_uses_the_absolute_threshold() {
        let expected = HostMatrix::zeros(2);
        let mut actual = HostMatrix::zeros(2);
        let ok = check_matrix("zero-ok", &actual, &expected).unwrap();
        assert!(ok.passed());
        actual.set(0, 1, 1e-10);
        let bad = check_matrix("zero-bad", &actual, &expected).unwrap();
        assert!(!bad.passed());
    }

    #[test]
    fn shape_mismatch_is_an_error_not_a_report() {
        let err = check_matrix("shape", &HostMatrix::zeros(2), &HostMatrix::zeros(3)).unwrap_err();
        assert!(matches!(err, MeshError::ShapeMismatch { .. }));
        assert!(reference_product(&HostMatrix::zeros(2), &HostMatrix::zeros(3)).is_err());
    }

    #[test]
    fn summary_counts_cells() {
        let report =
            check_matrix("demo", &HostMatrix::zeros(3), &HostMatrix::zeros(3)).unwrap();
        assert_eq!(report.summary(), "demo: OK (9 cells)");
        assert_eq!(report.label(), "demo");
    }
}
