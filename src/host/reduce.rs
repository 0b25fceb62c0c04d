//! Reductions with optional axis.
//!
//! An axis reduction collapses exactly one axis and preserves the others in
//! their original order, matching row-major flattening: the input is viewed
//! as `(m, n, k)` where `m` is the product of the dimensions before the axis,
//! `n` the reduced length and `k` the product of the dimensions after it.

use super::{numeric_dispatch, typed_window, HostMath};
use crate::buffer::{Buffer, Element, NumElement};
use crate::iterator::MatrixBufferIterator;
use crate::{Error, NDArray, Result};
use std::cmp::Ordering;
use std::sync::Arc;

fn out_shape(shape: &[usize], axis: usize) -> Vec<usize> {
    let mut out: Vec<usize> = shape.to_vec();
    out.remove(axis);
    out
}

/// Shape to fold over, axis to collapse, and the resulting shape.
fn fold_plan(x: &NDArray, axis: Option<usize>) -> Result<(Vec<usize>, usize, Vec<usize>)> {
    match axis {
        Some(a) => {
            if a >= x.ndim() {
                return Err(Error::InvalidAxis {
                    axis: a,
                    rank: x.ndim(),
                });
            }
            Ok((x.shape().to_vec(), a, out_shape(x.shape(), a)))
        }
        None => Ok((vec![x.size()], 0, vec![])),
    }
}

/// Fold the reduced axis for every lane of the remaining dimensions.
///
/// Lanes come from a skip-dims iteration: every base index with the reduced
/// axis pinned at 0, in row-major order over the kept dimensions.
fn fold_axis<T: Copy, A, F: Fn(A, T, usize) -> A, I: Fn() -> A>(
    data: &[T],
    shape: &[usize],
    axis: usize,
    init: I,
    fold: F,
) -> Result<Vec<A>> {
    let n = shape[axis];
    let stride: usize = shape[axis + 1..].iter().product();
    let mut out = Vec::new();
    for base in MatrixBufferIterator::new(shape, &[axis])? {
        let mut acc = init();
        for j in 0..n {
            acc = fold(acc, data[base + j * stride], j);
        }
        out.push(acc);
    }
    Ok(out)
}

fn require_nonempty(x: &NDArray, op: &'static str) -> Result<()> {
    if x.size() == 0 {
        return Err(Error::InvalidArgument(format!(
            "{op} over a zero-size array"
        )));
    }
    Ok(())
}

fn reject_complex(x: &NDArray, op: &'static str) -> Result<()> {
    if x.dtype().is_complex() {
        return Err(Error::UnsupportedDtype {
            op,
            dtype: x.dtype(),
        });
    }
    Ok(())
}

/// Extremum selection rule.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Pick {
    /// Highest signed value.
    Max,
    /// Lowest signed value.
    Min,
    /// Largest absolute magnitude.
    AbsMax,
    /// Smallest absolute magnitude.
    AbsMin,
}

impl Pick {
    /// Whether `candidate` strictly beats `best`. Ties keep the earlier
    /// occurrence.
    fn beats<T: NumElement>(self, candidate: T, best: T) -> bool {
        match self {
            Pick::Max => candidate.try_cmp(best) == Some(Ordering::Greater),
            Pick::Min => candidate.try_cmp(best) == Some(Ordering::Less),
            Pick::AbsMax => candidate.abs_mag() > best.abs_mag(),
            Pick::AbsMin => candidate.abs_mag() < best.abs_mag(),
        }
    }

    fn ordered(self) -> bool {
        matches!(self, Pick::Max | Pick::Min)
    }
}

impl HostMath {
    /// Sum over one axis, or over the whole array with `axis = None`.
    pub fn sum(&self, x: &NDArray, axis: Option<usize>) -> Result<NDArray> {
        self.sum_mapped(x, axis, false)
    }

    /// Sum of absolute magnitudes.
    pub fn asum(&self, x: &NDArray, axis: Option<usize>) -> Result<NDArray> {
        self.sum_mapped(x, axis, true)
    }

    /// Arithmetic mean; float and complex dtypes only.
    pub fn mean(&self, x: &NDArray, axis: Option<usize>) -> Result<NDArray> {
        if !x.dtype().is_float() && !x.dtype().is_complex() {
            return Err(Error::UnsupportedDtype {
                op: "mean",
                dtype: x.dtype(),
            });
        }
        require_nonempty(x, "mean")?;
        let n = match axis {
            Some(a) => fold_plan(x, axis)?.0[a],
            None => x.size(),
        };
        let total = self.sum(x, axis)?;
        numeric_dispatch!(x.dtype(), "mean", T => {
            let sums: Vec<T> = typed_window(&total)?;
            let divisor = T::from_f64(n as f64);
            let mut out: Vec<T> = Vec::with_capacity(sums.len());
            for s in sums {
                out.push(s.div(divisor)?);
            }
            NDArray::from_buffer(Arc::new(Buffer::from_vec(out)), total.shape(), 0)
        })
    }

    /// Highest signed value.
    pub fn max(&self, x: &NDArray, axis: Option<usize>) -> Result<NDArray> {
        self.extremum_value(x, axis, Pick::Max, "max")
    }

    /// Lowest signed value.
    pub fn min(&self, x: &NDArray, axis: Option<usize>) -> Result<NDArray> {
        self.extremum_value(x, axis, Pick::Min, "min")
    }

    /// Value of largest absolute magnitude.
    ///
    /// On an absolute-magnitude tie between values of opposite sign the first
    /// occurrence in row-major order wins and its original signed value is
    /// returned, so `amax([-3, 3]) == -3` while `max([-3, 3]) == 3`.
    pub fn amax(&self, x: &NDArray, axis: Option<usize>) -> Result<NDArray> {
        self.extremum_value(x, axis, Pick::AbsMax, "amax")
    }

    /// Value of smallest absolute magnitude; first occurrence wins on ties.
    pub fn amin(&self, x: &NDArray, axis: Option<usize>) -> Result<NDArray> {
        self.extremum_value(x, axis, Pick::AbsMin, "amin")
    }

    /// Index of the highest signed value (first occurrence on ties).
    pub fn argmax(&self, x: &NDArray, axis: Option<usize>) -> Result<NDArray> {
        self.extremum_index(x, axis, Pick::Max, "argmax")
    }

    /// Index of the lowest signed value (first occurrence on ties).
    pub fn argmin(&self, x: &NDArray, axis: Option<usize>) -> Result<NDArray> {
        self.extremum_index(x, axis, Pick::Min, "argmin")
    }

    fn sum_mapped(&self, x: &NDArray, axis: Option<usize>, absolute: bool) -> Result<NDArray> {
        if absolute {
            reject_complex(x, "asum")?;
        }
        let (fold_shape, fold_axis_idx, shape) = fold_plan(x, axis)?;
        numeric_dispatch!(x.dtype(), "sum", T => {
            let data: Vec<T> = typed_window(x)?;
            let out = fold_axis(&data, &fold_shape, fold_axis_idx, T::zero, |acc: T, v, _| {
                if absolute {
                    acc.add(T::from_f64(v.abs_mag()))
                } else {
                    acc.add(v)
                }
            })?;
            NDArray::from_buffer(Arc::new(Buffer::from_vec(out)), &shape, 0)
        })
    }

    fn extremum_value(
        &self,
        x: &NDArray,
        axis: Option<usize>,
        pick: Pick,
        op: &'static str,
    ) -> Result<NDArray> {
        if pick.ordered() {
            reject_complex(x, op)?;
        }
        require_nonempty(x, op)?;
        let (fold_shape, fold_axis_idx, shape) = fold_plan(x, axis)?;
        numeric_dispatch!(x.dtype(), "extremum", T => {
            let data: Vec<T> = typed_window(x)?;
            let out = fold_axis(&data, &fold_shape, fold_axis_idx, || None::<T>, |acc, v, _| match acc {
                None => Some(v),
                Some(best) if pick.beats(v, best) => Some(v),
                keep => keep,
            })?;
            let mut values: Vec<T> = Vec::with_capacity(out.len());
            for slot in out {
                values.push(slot.ok_or_else(|| {
                    Error::InvalidArgument(format!("{op} over a zero-size axis"))
                })?);
            }
            NDArray::from_buffer(Arc::new(Buffer::from_vec(values)), &shape, 0)
        })
    }

    fn extremum_index(
        &self,
        x: &NDArray,
        axis: Option<usize>,
        pick: Pick,
        op: &'static str,
    ) -> Result<NDArray> {
        reject_complex(x, op)?;
        require_nonempty(x, op)?;
        let (fold_shape, fold_axis_idx, shape) = fold_plan(x, axis)?;
        numeric_dispatch!(x.dtype(), "arg extremum", T => {
            let data: Vec<T> = typed_window(x)?;
            let out = fold_axis(
                &data,
                &fold_shape,
                fold_axis_idx,
                || None::<(T, usize)>,
                |acc, v, j| match acc {
                    None => Some((v, j)),
                    Some((best, _)) if pick.beats(v, best) => Some((v, j)),
                    keep => keep,
                },
            )?;
            let mut indices: Vec<i32> = Vec::with_capacity(out.len());
            for slot in out {
                let (_, j) = slot.ok_or_else(|| {
                    Error::InvalidArgument(format!("{op} over a zero-size axis"))
                })?;
                indices.push(j as i32);
            }
            NDArray::from_buffer(Arc::new(Buffer::from_vec(indices)), &shape, 0)
        })
    }
}
