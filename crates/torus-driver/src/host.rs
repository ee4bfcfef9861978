//! Host buffer manager
//!
//! Owns dense row-major `f32` matrices in host memory and converts them
//! to and from the mesh's 16-bit per-cell words. The host side keeps
//! full precision; narrowing happens exactly once per upload and
//! widening exactly once per download.

use crate::error::{MeshError, Result};
use torus_chip::approx::Approx;

/// A square N×N host matrix, row-major, full precision.
#[derive(Debug, Clone, PartialEq)]
pub struct HostMatrix {
    n: usize,
    data: Vec<f32>,
}

impl HostMatrix {
    /// All-zero matrix.
    #[must_use]
    pub fn zeros(n: usize) -> Self {
        Self { n, data: vec![0.0; n * n] }
    }

    /// Matrix with every element set to `value`.
    #[must_use]
    pub fn filled(n: usize, value: f32) -> Self {
        Self { n, data: vec![value; n * n] }
    }

    /// Build element-wise from `f(row, col)`.
    #[must_use]
    pub fn from_fn(n: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut m = Self::zeros(n);
        for row in 0..n {
            for col in 0..n {
                m.data[row * n + col] = f(row, col);
            }
        }
        m
    }

    /// Side length.
    #[must_use]
    pub const fn n(&self) -> usize {
        self.n
    }

    /// Element at (row, col).
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.n + col]
    }

    /// Set the element at (row, col).
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.n + col] = value;
    }

    /// Row-major backing storage.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Narrow to mesh words, row-major, one word per PE.
    #[must_use]
    pub fn encode(&self) -> Vec<u16> {
        self.data.iter().map(|&v| Approx::from_f32(v).to_bits()).collect()
    }

    /// Widen mesh words back to a host matrix.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::ShapeMismatch`] if `words` is not exactly
    /// N×N.
    pub fn decode(n: usize, words: &[u16]) -> Result<Self> {
        if words.len() != n * n {
            return Err(MeshError::ShapeMismatch {
                expected: n * n,
                actual: words.len(),
            });
        }
        Ok(Self {
            n,
            data: words.iter().map(|&w| Approx::from_bits(w).to_f32()).collect(),
        })
    }

    /// The matrix as the mesh will actually see it: every element passed
    /// through the 16-bit encoding once. Reference computations start
    /// from this so they share the upload rounding.
    #[must_use]
    pub fn quantized(&self) -> Self {
        Self {
            n: self.n,
            data: self
                .data
                .iter()
                .map(|&v| Approx::from_f32(v).to_f32())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let m = HostMatrix::from_fn(4, |r, c| (r + c) as f32);
        let back = HostMatrix::decode(4, &m.encode()).unwrap();
        // Small integers are exact in the encoding.
        assert_eq!(m, back);
    }

    #[test]
    fn decode_checks_shape() {
        let err = HostMatrix::decode(4, &[0u16; 15]).unwrap_err();
        assert!(matches!(err, MeshError::ShapeMismatch { expected: 16, actual: 15 }));
    }

    #[test]
    fn quantized_matches_encoding() {
        let m = HostMatrix::filled(3, 0.1);
        let q = m.quantized();
        assert_eq!(q.get(0, 0), Approx::from_f32(0.1).to_f32());
        // Quantizing twice changes nothing.
        assert_eq!(q.quantized(), q);
    }

    #[test]
    fn from_fn_is_row_major() {
        let m = HostMatrix::from_fn(3, |r, c| (10 * r + c) as f32);
        assert_eq!(m.data()[5], 12.0);
        assert_eq!(m.get(1, 2), 12.0);
    }
}
