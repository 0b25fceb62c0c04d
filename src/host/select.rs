//! Indexed gather and scatter kernels.
//!
//! `select` gathers at integer coordinates, supporting simultaneous index
//! arrays over the leading axes aligned by broadcasting. `update` is the
//! scatter-side compound assignment; repeated coordinates accumulate on each
//! visit, in document order. That accumulation rule is intentional and load
//! bearing for the scatter-add path, even though it differs from NumPy's
//! last-write-wins fancy indexing.

use super::elementwise::{broadcast_shapes, broadcast_strides, BroadcastIter};
use super::{numeric_dispatch, typed_window, HostMath};
use crate::array::strides_of;
use crate::buffer::{Element, NumElement};
use crate::dtype::DType;
use crate::{Error, NDArray, Result};

/// Compound assignment operator applied by [`HostMath::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

fn apply<T: NumElement>(op: AssignOp, cur: T, v: T) -> Result<T> {
    Ok(match op {
        AssignOp::Assign => v,
        AssignOp::Add => cur.add(v),
        AssignOp::Sub => cur.sub(v),
        AssignOp::Mul => cur.mul(v),
        AssignOp::Div => cur.div(v)?,
        AssignOp::Rem => cur.rem(v)?,
        AssignOp::Pow => cur.pow(v)?,
    })
}

/// Materialize an integer index array, broadcast to `target`, as a flat
/// coordinate list validated against `dim`.
fn gather_coords(ix: &NDArray, target: &[usize], dim: usize) -> Result<Vec<usize>> {
    if !ix.dtype().is_integer() {
        return Err(Error::UnsupportedDtype {
            op: "index array",
            dtype: ix.dtype(),
        });
    }
    let strides = broadcast_strides(ix.shape(), target);
    let mut it = BroadcastIter::new(target);
    let mut off = [0usize];
    let mut out = Vec::with_capacity(target.iter().product());
    while it.next_offsets(&[&strides], &mut off) {
        let raw = ix.get_flat(off[0])?.to_i64()?;
        if raw < 0 || raw as usize >= dim {
            return Err(Error::IndexOutOfRange {
                index: raw.max(0) as usize,
                len: dim,
            });
        }
        out.push(raw as usize);
    }
    Ok(out)
}

/// Resolve the common broadcast shape of a set of index arrays and the
/// coordinate lists for each indexed axis.
fn resolve_axes(
    x: &NDArray,
    indices: &[&NDArray],
) -> Result<(Vec<usize>, Vec<Vec<usize>>)> {
    if indices.is_empty() || indices.len() > x.ndim() {
        return Err(Error::InvalidArgument(format!(
            "{} index arrays for rank {} input",
            indices.len(),
            x.ndim()
        )));
    }
    let mut common: Vec<usize> = indices[0].shape().to_vec();
    for ix in &indices[1..] {
        common = broadcast_shapes(&common, ix.shape())?;
    }
    let mut coords = Vec::with_capacity(indices.len());
    for (axis, ix) in indices.iter().enumerate() {
        coords.push(gather_coords(ix, &common, x.shape()[axis])?);
    }
    Ok((common, coords))
}

impl HostMath {
    /// Flattened values of `x` at every true position of `mask`.
    pub fn masked_select(&self, x: &NDArray, mask: &NDArray) -> Result<NDArray> {
        if mask.dtype() != DType::Bool {
            return Err(Error::UnsupportedDtype {
                op: "masked_select",
                dtype: mask.dtype(),
            });
        }
        if mask.shape() != x.shape() {
            return Err(Error::ShapeMismatch(
                x.shape().to_vec(),
                mask.shape().to_vec(),
            ));
        }
        let keep: Vec<bool> = typed_window(mask)?;
        let count = keep.iter().filter(|&&b| b).count();
        let out = NDArray::alloc(&[count], x.dtype());
        let mut slot = 0;
        for (i, &k) in keep.iter().enumerate() {
            if k {
                out.set_flat(slot, x.get_flat(i)?)?;
                slot += 1;
            }
        }
        Ok(out)
    }

    /// Gather elements of `x` at integer coordinates.
    ///
    /// The n index arrays address the first n axes and broadcast to a common
    /// shape S; the result has shape `S ++ x.shape()[n..]`.
    pub fn select(&self, x: &NDArray, indices: &[&NDArray]) -> Result<NDArray> {
        let n = indices.len();
        let (common, coords) = resolve_axes(x, indices)?;
        let tail = &x.shape()[n..];
        let tail_size: usize = tail.iter().product();
        let strides = strides_of(x.shape());

        let mut out_shape = common.clone();
        out_shape.extend_from_slice(tail);
        let out = NDArray::alloc(&out_shape, x.dtype());

        let positions: usize = common.iter().product();
        for p in 0..positions {
            let base: usize = coords
                .iter()
                .enumerate()
                .map(|(axis, c)| c[p] * strides[axis])
                .sum();
            for t in 0..tail_size {
                out.set_flat(p * tail_size + t, x.get_flat(base + t)?)?;
            }
        }
        Ok(out)
    }

    /// Scatter-style compound assignment at the addressed positions.
    ///
    /// `operand` broadcasts over `S ++ x.shape()[n..]`; positions addressed
    /// more than once apply the operator once per visit, in document order.
    pub fn update(
        &self,
        x: &NDArray,
        op: AssignOp,
        operand: &NDArray,
        indices: &[&NDArray],
    ) -> Result<()> {
        let n = indices.len();
        let (common, coords) = resolve_axes(x, indices)?;
        let tail = &x.shape()[n..];
        let tail_size: usize = tail.iter().product();
        let strides = strides_of(x.shape());

        let mut full = common.clone();
        full.extend_from_slice(tail);
        if broadcast_shapes(operand.shape(), &full)? != full {
            return Err(Error::ShapeMismatch(
                operand.shape().to_vec(),
                full,
            ));
        }
        let operand = if operand.dtype() == x.dtype() {
            operand.clone()
        } else {
            self.astype(operand, x.dtype())?
        };
        let ostrides = broadcast_strides(operand.shape(), &full);

        numeric_dispatch!(x.dtype(), "update", T => {
            let ow: Vec<T> = typed_window(&operand)?;
            let mut it = BroadcastIter::new(&full);
            let mut off = [0usize];
            let positions: usize = common.iter().product();
            for p in 0..positions {
                let base: usize = coords
                    .iter()
                    .enumerate()
                    .map(|(axis, c)| c[p] * strides[axis])
                    .sum();
                for t in 0..tail_size {
                    if !it.next_offsets(&[&ostrides], &mut off) {
                        break;
                    }
                    let target = base + t;
                    let cur = T::from_scalar(x.get_flat(target)?)?;
                    let next = apply(op, cur, ow[off[0]])?;
                    x.set_flat(target, next.to_scalar())?;
                }
            }
            Ok(())
        })
    }

    /// `accum[indices[i], ...] += updates[i, ...]` for each row i.
    ///
    /// Overlapping target indices accumulate every contribution. Float64 is
    /// gated by the backend fp64 capability flag.
    pub fn scatter_add(
        &self,
        indices: &NDArray,
        updates: &NDArray,
        accum: &NDArray,
    ) -> Result<()> {
        if indices.ndim() != 1 {
            return Err(Error::InvalidArgument(format!(
                "scatter_add indices must be rank 1, got {:?}",
                indices.shape()
            )));
        }
        let dtype = accum.dtype();
        if dtype.is_complex() || dtype == DType::Bool {
            return Err(Error::UnsupportedDtype {
                op: "scatter_add",
                dtype,
            });
        }
        if dtype == DType::Float64 && !self.capabilities().fp64 {
            return Err(Error::Unsupported(
                "fp64 scatter_add is not supported by this backend".into(),
            ));
        }
        if accum.ndim() == 0 || updates.ndim() == 0 {
            return Err(Error::InvalidArgument(
                "scatter_add operands must have at least one dimension".into(),
            ));
        }
        let rows = indices.shape()[0];
        if updates.shape()[0] != rows || updates.shape()[1..] != accum.shape()[1..] {
            return Err(Error::ShapeMismatch(
                updates.shape().to_vec(),
                accum.shape().to_vec(),
            ));
        }
        let coords = gather_coords(indices, &[rows], accum.shape()[0])?;
        let tail_size: usize = accum.shape()[1..].iter().product();

        let updates = if updates.dtype() == dtype {
            updates.clone()
        } else {
            self.astype(updates, dtype)?
        };

        numeric_dispatch!(dtype, "scatter_add", T => {
            // Snapshot updates first so an aliasing accumulator stays sound.
            let uw: Vec<T> = typed_window(&updates)?;
            for (i, &row) in coords.iter().enumerate() {
                for t in 0..tail_size {
                    let target = row * tail_size + t;
                    let cur = T::from_scalar(accum.get_flat(target)?)?;
                    accum.set_flat(target, cur.add(uw[i * tail_size + t]).to_scalar())?;
                }
            }
            Ok(())
        })
    }
}
