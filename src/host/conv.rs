//! Convolution windowing kernels: `im2col` extraction and `col2im`
//! overlap-add back-projection.
//!
//! Images are channels-first `[N, C, H, W]`; the column tensor is
//! `[N, out_h, out_w, C, kh, kw]`. `col2im` sums contributions into
//! overlapping receptive fields rather than overwriting, so the
//! im2col/col2im round trip reproduces the overlap-sum of the image, not the
//! image itself, except when stride and dilation keep the windows disjoint.

use super::{numeric_dispatch, typed_window, write_window, HostMath};
use crate::buffer::{Buffer, Element, NumElement};
use crate::{Error, NDArray, Result};
use std::sync::Arc;

/// Output length and leading pad for one spatial axis.
///
/// Same-padding totals `(out-1)*stride + (k-1)*dilation + 1 - in`, split with
/// the smaller half on the leading edge (the trailing edge takes the extra
/// element when the total is odd).
fn axis_geometry(
    input: usize,
    k: usize,
    stride: usize,
    dilation: usize,
    padding: bool,
) -> Result<(usize, usize)> {
    if k == 0 || stride == 0 || dilation == 0 {
        return Err(Error::InvalidArgument(
            "kernel, stride and dilation must be greater than 0".into(),
        ));
    }
    let span = (k - 1) * dilation + 1;
    if padding {
        let out = input.div_ceil(stride);
        let total = ((out - 1) * stride + span).saturating_sub(input);
        Ok((out, total / 2))
    } else {
        if input < span {
            return Err(Error::InvalidArgument(format!(
                "kernel span {span} exceeds input extent {input}"
            )));
        }
        Ok(((input - span) / stride + 1, 0))
    }
}

fn image_dims(images: &NDArray) -> Result<(usize, usize, usize, usize)> {
    if images.ndim() != 4 {
        return Err(Error::InvalidArgument(format!(
            "expected channels-first [N, C, H, W] images, got {:?}",
            images.shape()
        )));
    }
    let s = images.shape();
    Ok((s[0], s[1], s[2], s[3]))
}

impl HostMath {
    /// Extract sliding kernel windows into a column tensor.
    ///
    /// Padded positions read as zero.
    pub fn im2col(
        &self,
        images: &NDArray,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: bool,
        dilation: (usize, usize),
    ) -> Result<NDArray> {
        let (n, c, h, w) = image_dims(images)?;
        let (kh, kw) = kernel;
        let (out_h, pad_h) = axis_geometry(h, kh, stride.0, dilation.0, padding)?;
        let (out_w, pad_w) = axis_geometry(w, kw, stride.1, dilation.1, padding)?;
        let out_shape = [n, out_h, out_w, c, kh, kw];

        numeric_dispatch!(images.dtype(), "im2col", T => {
            let iw: Vec<T> = typed_window(images)?;
            let mut cols = vec![T::zero(); out_shape.iter().product()];
            let mut slot = 0;
            for b in 0..n {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        for ch in 0..c {
                            for ki in 0..kh {
                                for kj in 0..kw {
                                    let ih = (oh * stride.0 + ki * dilation.0) as isize
                                        - pad_h as isize;
                                    let jw = (ow * stride.1 + kj * dilation.1) as isize
                                        - pad_w as isize;
                                    if ih >= 0
                                        && (ih as usize) < h
                                        && jw >= 0
                                        && (jw as usize) < w
                                    {
                                        let src = ((b * c + ch) * h + ih as usize) * w
                                            + jw as usize;
                                        cols[slot] = iw[src];
                                    }
                                    slot += 1;
                                }
                            }
                        }
                    }
                }
            }
            NDArray::from_buffer(Arc::new(Buffer::from_vec(cols)), &out_shape, 0)
        })
    }

    /// Back-project a column tensor into `images`, summing contributions
    /// into overlapping receptive fields. Padded positions are dropped.
    pub fn col2im(
        &self,
        cols: &NDArray,
        images: &NDArray,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: bool,
        dilation: (usize, usize),
    ) -> Result<()> {
        let (n, c, h, w) = image_dims(images)?;
        let (kh, kw) = kernel;
        let (out_h, pad_h) = axis_geometry(h, kh, stride.0, dilation.0, padding)?;
        let (out_w, pad_w) = axis_geometry(w, kw, stride.1, dilation.1, padding)?;
        let expected = [n, out_h, out_w, c, kh, kw];
        if cols.shape() != expected {
            return Err(Error::ShapeMismatch(
                cols.shape().to_vec(),
                expected.to_vec(),
            ));
        }
        if cols.dtype() != images.dtype() {
            return Err(Error::InvalidArgument(format!(
                "column dtype {} does not match image dtype {}",
                cols.dtype(),
                images.dtype()
            )));
        }

        numeric_dispatch!(images.dtype(), "col2im", T => {
            let cw: Vec<T> = typed_window(cols)?;
            let mut iw: Vec<T> = typed_window(images)?;
            let mut slot = 0;
            for b in 0..n {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        for ch in 0..c {
                            for ki in 0..kh {
                                for kj in 0..kw {
                                    let ih = (oh * stride.0 + ki * dilation.0) as isize
                                        - pad_h as isize;
                                    let jw = (ow * stride.1 + kj * dilation.1) as isize
                                        - pad_w as isize;
                                    if ih >= 0
                                        && (ih as usize) < h
                                        && jw >= 0
                                        && (jw as usize) < w
                                    {
                                        let dst = ((b * c + ch) * h + ih as usize) * w
                                            + jw as usize;
                                        iw[dst] = iw[dst].add(cw[slot]);
                                    }
                                    slot += 1;
                                }
                            }
                        }
                    }
                }
            }
            write_window(images, &iw)
        })
    }
}
