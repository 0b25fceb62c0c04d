//! Elementwise arithmetic and comparison with broadcasting.
//!
//! Shapes broadcast by the NumPy rule: right-align the two shapes, pad the
//! shorter with leading 1s, and stretch size-1 dimensions. A smaller trailing
//! shape therefore repeats across the larger leading batch dimensions.

use super::{numeric_dispatch, typed_window, HostMath};
use crate::buffer::{Buffer, NumElement};
use crate::dtype::{promote, DType, Scalar};
use crate::{Error, NDArray, Result};
use std::cmp::Ordering;
use std::sync::Arc;

/// Binary elementwise operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ElemOp {
    /// Comparison operators produce bool arrays.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            ElemOp::Eq | ElemOp::Ne | ElemOp::Gt | ElemOp::Ge | ElemOp::Lt | ElemOp::Le
        )
    }
}

/// Broadcast two shapes right-aligned, stretching size-1 dimensions.
pub(crate) fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![1usize; rank];
    for d in 0..rank {
        let da = if d < rank - a.len() { 1 } else { a[d - (rank - a.len())] };
        let db = if d < rank - b.len() { 1 } else { b[d - (rank - b.len())] };
        out[d] = if da == db || db == 1 {
            da
        } else if da == 1 {
            db
        } else {
            return Err(Error::ShapeMismatch(a.to_vec(), b.to_vec()));
        };
    }
    Ok(out)
}

/// Element strides of `shape` within a broadcast `target`, with stride 0 for
/// stretched dimensions. `shape` is right-aligned within `target`.
pub(crate) fn broadcast_strides(shape: &[usize], target: &[usize]) -> Vec<usize> {
    let rank = target.len();
    let lead = rank - shape.len();
    let mut strides = vec![0usize; rank];
    let mut acc = 1usize;
    for d in (0..shape.len()).rev() {
        strides[lead + d] = if shape[d] == 1 { 0 } else { acc };
        acc *= shape[d];
    }
    strides
}

/// Row-major odometer over `shape`, tracking an offset per stride set.
pub(crate) struct BroadcastIter {
    shape: Vec<usize>,
    coords: Vec<usize>,
    remaining: usize,
}

impl BroadcastIter {
    pub(crate) fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            coords: vec![0; shape.len()],
            remaining: shape.iter().product(),
        }
    }

    /// Advance and return the per-operand offsets for the next position.
    pub(crate) fn next_offsets(&mut self, strides: &[&[usize]], out: &mut [usize]) -> bool {
        if self.remaining == 0 {
            return false;
        }
        for (slot, s) in out.iter_mut().zip(strides) {
            *slot = self
                .coords
                .iter()
                .zip(*s)
                .map(|(&c, &st)| c * st)
                .sum();
        }
        self.remaining -= 1;
        for d in (0..self.shape.len()).rev() {
            self.coords[d] += 1;
            if self.coords[d] < self.shape[d] {
                break;
            }
            self.coords[d] = 0;
        }
        true
    }
}

fn arithmetic<T: NumElement>(op: ElemOp, a: T, b: T) -> Result<T> {
    Ok(match op {
        ElemOp::Add => a.add(b),
        ElemOp::Sub => a.sub(b),
        ElemOp::Mul => a.mul(b),
        ElemOp::Div => a.div(b)?,
        ElemOp::Rem => a.rem(b)?,
        ElemOp::Pow => a.pow(b)?,
        _ => {
            return Err(Error::InvalidArgument(
                "comparison operator in arithmetic kernel".into(),
            ))
        }
    })
}

fn compare<T: NumElement>(op: ElemOp, a: T, b: T) -> Result<bool> {
    if matches!(op, ElemOp::Eq) {
        return Ok(a == b);
    }
    if matches!(op, ElemOp::Ne) {
        return Ok(a != b);
    }
    let ord = a.try_cmp(b).ok_or(Error::UnsupportedDtype {
        op: "ordered comparison",
        dtype: T::DTYPE,
    })?;
    Ok(match op {
        ElemOp::Gt => ord == Ordering::Greater,
        ElemOp::Ge => ord != Ordering::Less,
        ElemOp::Lt => ord == Ordering::Less,
        ElemOp::Le => ord != Ordering::Greater,
        _ => unreachable!(),
    })
}

impl HostMath {
    /// Elementwise `x op y` with broadcasting.
    ///
    /// The output dtype comes from the promotion lattice (comparisons yield
    /// bool); operands are cast to the promoted dtype before the kernel runs.
    pub fn op(&self, x: &NDArray, op: ElemOp, y: &NDArray) -> Result<NDArray> {
        let dtype = promote(x.dtype(), y.dtype());
        if dtype == DType::Bool && !op.is_comparison() {
            return Err(Error::UnsupportedDtype {
                op: "arithmetic",
                dtype: DType::Bool,
            });
        }
        let out_shape = broadcast_shapes(x.shape(), y.shape())?;
        let x = self.cast_for_kernel(x, dtype)?;
        let y = self.cast_for_kernel(y, dtype)?;
        let sx = broadcast_strides(x.shape(), &out_shape);
        let sy = broadcast_strides(y.shape(), &out_shape);
        let total: usize = out_shape.iter().product();

        numeric_dispatch!(dtype, "elementwise", T => {
            let xs: Vec<T> = typed_window(&x)?;
            let ys: Vec<T> = typed_window(&y)?;
            let mut iter = BroadcastIter::new(&out_shape);
            let mut offs = [0usize; 2];
            if op.is_comparison() {
                let mut out = Vec::with_capacity(total);
                while iter.next_offsets(&[&sx, &sy], &mut offs) {
                    out.push(compare(op, xs[offs[0]], ys[offs[1]])?);
                }
                NDArray::from_buffer(Arc::new(Buffer::from_vec(out)), &out_shape, 0)
            } else {
                let mut out: Vec<T> = Vec::with_capacity(total);
                while iter.next_offsets(&[&sx, &sy], &mut offs) {
                    out.push(arithmetic(op, xs[offs[0]], ys[offs[1]])?);
                }
                NDArray::from_buffer(Arc::new(Buffer::from_vec(out)), &out_shape, 0)
            }
        })
    }

    /// Elementwise `x op scalar`.
    ///
    /// A float64 scalar literal promotes an integer or float32 array to
    /// float32; only a float64 (or complex128) array keeps the result at
    /// double precision.
    pub fn op_scalar(&self, x: &NDArray, op: ElemOp, value: Scalar) -> Result<NDArray> {
        let literal = self.literal_dtype(x.dtype(), value);
        let value = value.cast_to(literal)?;
        self.op(x, op, &NDArray::scalar(value))
    }

    /// Elementwise `scalar op x` (for the non-commutative operators).
    pub fn scalar_op(&self, value: Scalar, op: ElemOp, x: &NDArray) -> Result<NDArray> {
        let literal = self.literal_dtype(x.dtype(), value);
        let value = value.cast_to(literal)?;
        self.op(&NDArray::scalar(value), op, x)
    }

    /// Negate every element.
    pub fn neg(&self, x: &NDArray) -> Result<NDArray> {
        numeric_dispatch!(x.dtype(), "negate", T => {
            let xs: Vec<T> = typed_window(x)?;
            let out: Vec<T> = xs.into_iter().map(|v| v.neg()).collect();
            NDArray::from_buffer(Arc::new(Buffer::from_vec(out)), x.shape(), 0)
        })
    }

    fn cast_for_kernel(&self, x: &NDArray, dtype: DType) -> Result<NDArray> {
        if x.dtype() == dtype {
            Ok(x.clone())
        } else {
            self.astype(x, dtype)
        }
    }

    /// Scalar literals of f64 width count as float32 against non-f64 arrays.
    fn literal_dtype(&self, array_dtype: DType, value: Scalar) -> DType {
        match value.dtype() {
            DType::Float64
                if !matches!(array_dtype, DType::Float64 | DType::Complex128) =>
            {
                DType::Float32
            }
            other => other,
        }
    }
}
