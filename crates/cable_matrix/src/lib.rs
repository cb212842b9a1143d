#![forbid(unsafe_code)]

//! Tridiagonal-on-a-tree linear system with in-place Hines solve.
//!
//! The matrix has non-zeros only on the diagonal and at the `(i, p[i])`,
//! `(p[i], i)` pairs given by a parent-index tree in which every child has a
//! higher index than its parent. Under that ordering a single reverse sweep
//! eliminates all off-diagonal entries below the diagonal and a forward
//! sweep back-substitutes, so the solve is O(N).

use cable_core::CvIndex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NumericalError {
    #[error("zero pivot on row {}", row.0)]
    ZeroPivot { row: CvIndex },
    #[error("non-finite pivot on row {}", row.0)]
    NonFinitePivot { row: CvIndex },
}

/// Storage layout, for parent `j = p[i]` (so `j < i`):
///
/// - `d[i]` is the diagonal entry at `(i, i)`,
/// - `l[i]` is the entry at `(i, j)`,
/// - `u[i]` is the entry at `(j, i)`,
/// - `l[0]` and `u[0]` are unused.
///
/// The caller assembles `d`, `l`, `u` and `rhs` directly; `solve` overwrites
/// `rhs` with the solution.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeMatrix {
    parent_index: Vec<CvIndex>,
    pub d: Vec<f64>,
    pub l: Vec<f64>,
    pub u: Vec<f64>,
    pub rhs: Vec<f64>,
}

impl TreeMatrix {
    pub fn new(parent_index: Vec<CvIndex>) -> Self {
        let size = parent_index.len();
        let mut matrix = Self {
            parent_index: Vec::new(),
            d: vec![0.0; size],
            l: vec![0.0; size],
            u: vec![0.0; size],
            rhs: vec![0.0; size],
        };
        matrix.reset(parent_index);
        matrix
    }

    /// Replaces the tree structure, reallocating the coefficient vectors.
    pub fn reset(&mut self, parent_index: Vec<CvIndex>) {
        assert!(
            parent_index.first().map_or(true, |&p| p == CvIndex(0)),
            "root must be its own parent"
        );
        assert!(
            parent_index
                .iter()
                .enumerate()
                .skip(1)
                .all(|(i, &p)| p.0 < i),
            "children must have higher indices than their parents"
        );
        let size = parent_index.len();
        self.parent_index = parent_index;
        self.d = vec![0.0; size];
        self.l = vec![0.0; size];
        self.u = vec![0.0; size];
        self.rhs = vec![0.0; size];
    }

    pub fn size(&self) -> usize {
        self.parent_index.len()
    }

    pub fn parent_index(&self) -> &[CvIndex] {
        &self.parent_index
    }

    /// Solves `M · x = rhs` in place, leaving the solution in `rhs`.
    ///
    /// The coefficient vectors are consumed by the elimination, so the
    /// caller reassembles them before every solve.
    pub fn solve(&mut self) -> Result<(), NumericalError> {
        let size = self.size();

        for row in (1..size).rev() {
            let pivot = self.d[row];
            check_pivot(pivot, row)?;
            let factor = self.u[row] / pivot;
            let parent = self.parent_index[row].0;
            self.d[parent] -= factor * self.l[row];
            self.rhs[parent] -= factor * self.rhs[row];
        }

        if size > 0 {
            check_pivot(self.d[0], 0)?;
            self.rhs[0] /= self.d[0];
        }

        for row in 1..size {
            let parent = self.parent_index[row].0;
            self.rhs[row] = (self.rhs[row] - self.l[row] * self.rhs[parent]) / self.d[row];
        }

        Ok(())
    }
}

fn check_pivot(pivot: f64, row: usize) -> Result<(), NumericalError> {
    if pivot == 0.0 {
        Err(NumericalError::ZeroPivot { row: CvIndex(row) })
    } else if !pivot.is_finite() {
        Err(NumericalError::NonFinitePivot { row: CvIndex(row) })
    } else {
        Ok(())
    }
}
