//! Linear-index iteration over a shape with skip dimensions.

use crate::array::strides_of;
use crate::{Error, Result};

/// Produces the linear (row-major) index of every combination of the
/// non-skipped dimensions of `shape`, holding skipped dimensions at index 0.
///
/// Used to walk a representative slice of a higher-rank structure without
/// materializing it, e.g. applying a per-row kernel while varying only the
/// batch axes. The iterator is finite and single-pass; re-instantiate it to
/// restart.
///
/// # Example
///
/// ```rust
/// use ndstride::MatrixBufferIterator;
///
/// // Walk the first column of a [2, 3] matrix by skipping dimension 1.
/// let indices: Vec<usize> = MatrixBufferIterator::new(&[2, 3], &[1])
///     .unwrap()
///     .collect();
/// assert_eq!(indices, vec![0, 3]);
/// ```
#[derive(Debug)]
pub struct MatrixBufferIterator {
    shape: Vec<usize>,
    strides: Vec<usize>,
    skip: Vec<bool>,
    current: Vec<usize>,
    done: bool,
}

impl MatrixBufferIterator {
    /// Create an iterator over `shape` with the given dimension indices
    /// excluded from iteration.
    pub fn new(shape: &[usize], skip_dims: &[usize]) -> Result<Self> {
        let rank = shape.len();
        let mut skip = vec![false; rank];
        for &d in skip_dims {
            if d >= rank {
                return Err(Error::InvalidAxis { axis: d, rank });
            }
            skip[d] = true;
        }
        // A zero-length dimension that is iterated makes the sequence empty.
        let empty = shape
            .iter()
            .zip(&skip)
            .any(|(&n, &s)| !s && n == 0);
        Ok(Self {
            strides: strides_of(shape),
            shape: shape.to_vec(),
            skip,
            current: vec![0; rank],
            done: empty,
        })
    }

    fn linear(&self) -> usize {
        self.current
            .iter()
            .zip(&self.strides)
            .map(|(&i, &s)| i * s)
            .sum()
    }

    /// Row-major odometer step over the non-skipped dimensions.
    fn advance(&mut self) {
        for d in (0..self.shape.len()).rev() {
            if self.skip[d] {
                continue;
            }
            self.current[d] += 1;
            if self.current[d] < self.shape[d] {
                return;
            }
            self.current[d] = 0;
        }
        self.done = true;
    }
}

impl Iterator for MatrixBufferIterator {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.done {
            return None;
        }
        let index = self.linear();
        self.advance();
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_iteration_row_major() {
        let indices: Vec<usize> = MatrixBufferIterator::new(&[2, 3], &[]).unwrap().collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_skip_inner_dimension() {
        // [2, 3, 4] skipping dim 1: vary dims 0 and 2, dim 1 pinned at 0.
        let indices: Vec<usize> = MatrixBufferIterator::new(&[2, 3, 4], &[1])
            .unwrap()
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 12, 13, 14, 15]);
    }

    #[test]
    fn test_skip_outer_dimension() {
        let indices: Vec<usize> = MatrixBufferIterator::new(&[2, 3], &[0]).unwrap().collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_skip_all_yields_single_origin() {
        let indices: Vec<usize> = MatrixBufferIterator::new(&[2, 3], &[0, 1])
            .unwrap()
            .collect();
        assert_eq!(indices, vec![0]);
    }

    #[test]
    fn test_invalid_skip_dim() {
        let err = MatrixBufferIterator::new(&[2, 3], &[2]).unwrap_err();
        assert!(matches!(err, Error::InvalidAxis { axis: 2, rank: 2 }));
    }

    #[test]
    fn test_restart_by_reinstantiation() {
        let first: Vec<usize> = MatrixBufferIterator::new(&[4], &[]).unwrap().collect();
        let second: Vec<usize> = MatrixBufferIterator::new(&[4], &[]).unwrap().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_length_dimension() {
        let indices: Vec<usize> = MatrixBufferIterator::new(&[0, 3], &[]).unwrap().collect();
        assert!(indices.is_empty());
    }
}
