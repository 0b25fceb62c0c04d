//! Strided array views over shared buffers.
//!
//! An [`NDArray`] is `{ buffer, shape, offset }`; it owns no memory. Views
//! created by [`NDArray::reshape`], [`NDArray::index`] and [`NDArray::range`]
//! share the buffer, so mutation through one view is visible through every
//! aliasing view. [`NDArray::copy`] is the only operation that materializes a
//! new buffer.

use crate::buffer::{Buffer, Element};
use crate::dtype::{promote, DType, Scalar};
use crate::{Error, Result};
use std::ops::Range;
use std::sync::Arc;

/// Row-major strides of a contiguous shape.
pub(crate) fn strides_of(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Nested host-side value tree, the ingestion and materialization format for
/// array literals.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Scalar(Scalar),
    List(Vec<ArrayData>),
}

impl ArrayData {
    /// Scalar payload, if this node is a leaf.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            ArrayData::Scalar(s) => Some(*s),
            ArrayData::List(_) => None,
        }
    }

    /// Leaf value as f64 (`None` for lists).
    pub fn as_f64(&self) -> Option<f64> {
        self.as_scalar().map(|s| s.to_f64())
    }

    /// Build a leaf row from a flat slice.
    pub fn row<T: Element>(values: &[T]) -> ArrayData {
        ArrayData::List(
            values
                .iter()
                .map(|&v| ArrayData::Scalar(v.to_scalar()))
                .collect(),
        )
    }

    /// Derive the shape of the tree, validating that every branch at each
    /// depth has the same length.
    fn shape(&self) -> Result<Vec<usize>> {
        let mut shape = Vec::new();
        let mut node = self;
        loop {
            match node {
                ArrayData::Scalar(_) => break,
                ArrayData::List(items) => {
                    shape.push(items.len());
                    match items.first() {
                        Some(first) => node = first,
                        None => break,
                    }
                }
            }
        }
        self.check_shape(&shape)?;
        Ok(shape)
    }

    fn check_shape(&self, expect: &[usize]) -> Result<()> {
        match self {
            ArrayData::Scalar(_) => {
                if expect.is_empty() {
                    Ok(())
                } else {
                    Err(Error::BrokenShape)
                }
            }
            ArrayData::List(items) => {
                let (&head, rest) = expect.split_first().ok_or(Error::BrokenShape)?;
                if items.len() != head {
                    return Err(Error::BrokenShape);
                }
                for item in items {
                    item.check_shape(rest)?;
                }
                Ok(())
            }
        }
    }

    fn collect_scalars(&self, out: &mut Vec<Scalar>) {
        match self {
            ArrayData::Scalar(s) => out.push(*s),
            ArrayData::List(items) => {
                for item in items {
                    item.collect_scalars(out);
                }
            }
        }
    }
}

/// Serialization framing for [`NDArray::serialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializeMode {
    /// Dtype-native packed body; compact, dtype known out of band.
    Linear,
    /// Self-describing stream carrying dtype, shape and byte order; safe to
    /// exchange between different backend implementations.
    #[default]
    Portable,
}

/// A shape + offset view over a shared [`Buffer`].
#[derive(Debug, Clone)]
pub struct NDArray {
    buffer: Arc<Buffer>,
    shape: Vec<usize>,
    offset: usize,
    serialize_mode: SerializeMode,
}

impl NDArray {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Zero-filled array of the given shape and dtype.
    pub fn alloc(shape: &[usize], dtype: DType) -> Self {
        let size: usize = shape.iter().product();
        Self {
            buffer: Arc::new(Buffer::alloc(size, dtype)),
            shape: shape.to_vec(),
            offset: 0,
            serialize_mode: SerializeMode::default(),
        }
    }

    /// Alias of [`NDArray::alloc`].
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        Self::alloc(shape, dtype)
    }

    /// Array filled with a single value converted to `dtype`.
    pub fn full(shape: &[usize], value: Scalar, dtype: DType) -> Result<Self> {
        let out = Self::alloc(shape, dtype);
        out.fill(value)?;
        Ok(out)
    }

    /// Array of ones.
    pub fn ones(shape: &[usize], dtype: DType) -> Result<Self> {
        Self::full(shape, Scalar::F64(1.0), dtype)
    }

    /// Rank-0 array holding one scalar.
    pub fn scalar(value: Scalar) -> Self {
        let buffer = Buffer::alloc(1, value.dtype());
        // Freshly allocated length-1 buffer, index 0 is in range.
        let _ = buffer.set(0, value);
        Self {
            buffer: Arc::new(buffer),
            shape: vec![],
            offset: 0,
            serialize_mode: SerializeMode::default(),
        }
    }

    /// Wrap a flat typed vector into the given shape.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let size: usize = shape.iter().product();
        if size != data.len() {
            return Err(Error::InvalidArgument(format!(
                "data length {} does not match shape {:?}",
                data.len(),
                shape
            )));
        }
        Ok(Self {
            buffer: Arc::new(Buffer::from_vec(data)),
            shape: shape.to_vec(),
            offset: 0,
            serialize_mode: SerializeMode::default(),
        })
    }

    /// Ingest a nested value tree, validating uniform sub-lengths per
    /// dimension.
    ///
    /// With `dtype = None` the element dtype is resolved by folding the
    /// promotion lattice over the leaves; an empty tree defaults to float32.
    pub fn from_nested(data: &ArrayData, dtype: Option<DType>) -> Result<Self> {
        let shape = data.shape()?;
        let mut scalars = Vec::new();
        data.collect_scalars(&mut scalars);
        let dtype = match dtype {
            Some(d) => d,
            None => scalars
                .iter()
                .map(|s| s.dtype())
                .reduce(promote)
                .unwrap_or(DType::Float32),
        };
        let buffer = Buffer::alloc(scalars.len(), dtype);
        for (i, s) in scalars.iter().enumerate() {
            buffer.set(i, *s)?;
        }
        Ok(Self {
            buffer: Arc::new(buffer),
            shape,
            offset: 0,
            serialize_mode: SerializeMode::default(),
        })
    }

    /// View an existing buffer through a shape + offset window.
    pub fn from_buffer(buffer: Arc<Buffer>, shape: &[usize], offset: usize) -> Result<Self> {
        let size: usize = shape.iter().product();
        if offset + size > buffer.count() {
            return Err(Error::InvalidArgument(format!(
                "shape {:?} at offset {offset} exceeds buffer length {}",
                shape,
                buffer.count()
            )));
        }
        Ok(Self {
            buffer,
            shape: shape.to_vec(),
            offset,
            serialize_mode: SerializeMode::default(),
        })
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Product of the shape; a rank-0 array has size 1.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Whether two views alias the same buffer.
    pub fn shares_buffer(&self, other: &NDArray) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    pub fn serialize_mode(&self) -> SerializeMode {
        self.serialize_mode
    }

    /// Select the framing used by [`NDArray::serialize`]; per-array, not
    /// global state.
    pub fn set_serialize_mode(&mut self, mode: SerializeMode) {
        self.serialize_mode = mode;
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Reinterpret the view under a new shape sharing the buffer.
    pub fn reshape(&self, new_shape: &[usize]) -> Result<NDArray> {
        let new_size: usize = new_shape.iter().product();
        if new_size != self.size() {
            return Err(Error::ShapeMismatch(
                self.shape.clone(),
                new_shape.to_vec(),
            ));
        }
        Ok(NDArray {
            buffer: Arc::clone(&self.buffer),
            shape: new_shape.to_vec(),
            offset: self.offset,
            serialize_mode: self.serialize_mode,
        })
    }

    /// Sub-view narrowing the first dimension to one index.
    pub fn index(&self, i: usize) -> Result<NDArray> {
        let (&head, rest) = self.shape.split_first().ok_or_else(|| {
            Error::Unsupported("cannot index a rank-0 array".into())
        })?;
        if i >= head {
            return Err(Error::IndexOutOfRange { index: i, len: head });
        }
        let stride: usize = rest.iter().product();
        Ok(NDArray {
            buffer: Arc::clone(&self.buffer),
            shape: rest.to_vec(),
            offset: self.offset + i * stride,
            serialize_mode: self.serialize_mode,
        })
    }

    /// Sub-view over a contiguous span of the first dimension.
    ///
    /// Degenerate (`start >= end`) and out-of-bounds ranges are rejected with
    /// an out-of-range error.
    pub fn range(&self, range: Range<usize>) -> Result<NDArray> {
        let (&head, rest) = self.shape.split_first().ok_or_else(|| {
            Error::Unsupported("cannot slice a rank-0 array".into())
        })?;
        if range.start >= range.end || range.end > head {
            return Err(Error::RangeOutOfRange {
                start: range.start,
                end: range.end,
                len: head,
            });
        }
        let stride: usize = rest.iter().product();
        let mut shape = vec![range.end - range.start];
        shape.extend_from_slice(rest);
        Ok(NDArray {
            buffer: Arc::clone(&self.buffer),
            shape,
            offset: self.offset + range.start * stride,
            serialize_mode: self.serialize_mode,
        })
    }

    // ------------------------------------------------------------------
    // Element access
    // ------------------------------------------------------------------

    fn linear_index(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.ndim() {
            return Err(Error::InvalidArgument(format!(
                "index rank {} does not match array rank {}",
                index.len(),
                self.ndim()
            )));
        }
        let strides = strides_of(&self.shape);
        let mut linear = self.offset;
        for (d, (&i, &n)) in index.iter().zip(&self.shape).enumerate() {
            if i >= n {
                return Err(Error::IndexOutOfRange { index: i, len: n });
            }
            linear += i * strides[d];
        }
        Ok(linear)
    }

    /// Read one element by multi-index (empty index for rank-0 arrays).
    pub fn get(&self, index: &[usize]) -> Result<Scalar> {
        self.buffer.get(self.linear_index(index)?)
    }

    /// Write one element through the shared buffer.
    pub fn set(&self, index: &[usize], value: Scalar) -> Result<()> {
        self.buffer.set(self.linear_index(index)?, value)
    }

    /// Read the `i`-th element of the flattened view window.
    pub fn get_flat(&self, i: usize) -> Result<Scalar> {
        if i >= self.size() {
            return Err(Error::IndexOutOfRange {
                index: i,
                len: self.size(),
            });
        }
        self.buffer.get(self.offset + i)
    }

    /// Write the `i`-th element of the flattened view window.
    pub fn set_flat(&self, i: usize, value: Scalar) -> Result<()> {
        if i >= self.size() {
            return Err(Error::IndexOutOfRange {
                index: i,
                len: self.size(),
            });
        }
        self.buffer.set(self.offset + i, value)
    }

    /// Replace the values of the sub-view at first-dimension index `i` with
    /// the values of `src`.
    ///
    /// This writes through the shared buffer (all aliasing views observe the
    /// change); it never rebinds the view itself.
    pub fn set_array(&self, i: usize, src: &NDArray) -> Result<()> {
        let dst = self.index(i)?;
        if dst.shape() != src.shape() {
            return Err(Error::ShapeMismatch(
                dst.shape().to_vec(),
                src.shape().to_vec(),
            ));
        }
        for k in 0..src.size() {
            dst.set_flat(k, src.get_flat(k)?)?;
        }
        Ok(())
    }

    /// Fill the view window with one value.
    pub fn fill(&self, value: Scalar) -> Result<()> {
        let cast = value.cast_to(self.dtype())?;
        for i in 0..self.size() {
            self.set_flat(i, cast)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Materialization
    // ------------------------------------------------------------------

    /// Deep copy into a fresh buffer, breaking aliasing.
    pub fn copy(&self) -> NDArray {
        let data = self.buffer.read().slice_range(self.offset, self.size());
        NDArray {
            buffer: Arc::new(Buffer::from_typed(data)),
            shape: self.shape.clone(),
            offset: 0,
            serialize_mode: self.serialize_mode,
        }
    }

    /// Materialize the nested value tree of this view.
    pub fn to_nested(&self) -> ArrayData {
        fn build(arr: &NDArray, shape: &[usize], base: usize) -> ArrayData {
            match shape.split_first() {
                None => ArrayData::Scalar(
                    arr.buffer
                        .get(base)
                        .unwrap_or(Scalar::F64(f64::NAN)),
                ),
                Some((&head, rest)) => {
                    let stride: usize = rest.iter().product();
                    ArrayData::List(
                        (0..head)
                            .map(|i| build(arr, rest, base + i * stride))
                            .collect(),
                    )
                }
            }
        }
        build(self, &self.shape, self.offset)
    }

    /// Materialize the flattened window as a typed vector.
    pub fn as_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype() {
            return Err(Error::UnsupportedDtype {
                op: "as_vec",
                dtype: self.dtype(),
            });
        }
        let cells = self.buffer.read();
        let slice = T::slice(&cells).ok_or(Error::UnsupportedDtype {
            op: "as_vec",
            dtype: self.dtype(),
        })?;
        Ok(slice[self.offset..self.offset + self.size()].to_vec())
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Encode shape + data using the array's [`SerializeMode`].
    pub fn serialize(&self) -> Vec<u8> {
        let body = match self.serialize_mode {
            SerializeMode::Linear => self.copy().buffer.to_linear(),
            SerializeMode::Portable => self.copy().buffer.to_portable(),
        };
        let mut out = Vec::with_capacity(4 + self.ndim() * 8 + body.len());
        out.extend_from_slice(&(self.ndim() as u32).to_le_bytes());
        for &d in &self.shape {
            out.extend_from_slice(&(d as u64).to_le_bytes());
        }
        out.extend_from_slice(&body);
        out
    }

    /// Decode a portable-mode [`NDArray::serialize`] stream.
    pub fn deserialize(bytes: &[u8]) -> Result<NDArray> {
        let (shape, body) = Self::split_shape_header(bytes)?;
        let buffer = Buffer::from_portable(body)?;
        NDArray::from_buffer(Arc::new(buffer), &shape, 0)
    }

    /// Decode a linear-mode stream; the caller supplies the dtype the
    /// producer used.
    pub fn deserialize_linear(bytes: &[u8], dtype: DType) -> Result<NDArray> {
        let (shape, body) = Self::split_shape_header(bytes)?;
        let buffer = Buffer::from_linear(body, dtype)?;
        let mut out = NDArray::from_buffer(Arc::new(buffer), &shape, 0)?;
        out.set_serialize_mode(SerializeMode::Linear);
        Ok(out)
    }

    fn split_shape_header(bytes: &[u8]) -> Result<(Vec<usize>, &[u8])> {
        if bytes.len() < 4 {
            return Err(Error::Format("serialized array truncated".into()));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        let ndim = u32::from_le_bytes(raw) as usize;
        let header = 4 + ndim * 8;
        if bytes.len() < header {
            return Err(Error::Format("serialized array shape truncated".into()));
        }
        let mut shape = Vec::with_capacity(ndim);
        for d in 0..ndim {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[4 + d * 8..4 + (d + 1) * 8]);
            shape.push(u64::from_le_bytes(raw) as usize);
        }
        Ok((shape, &bytes[header..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn nested_2x3() -> ArrayData {
        ArrayData::List(vec![
            ArrayData::row(&[1.0f32, 2.0, 3.0]),
            ArrayData::row(&[4.0f32, 5.0, 6.0]),
        ])
    }

    #[test]
    fn test_from_nested_shape_and_values() {
        let a = NDArray::from_nested(&nested_2x3(), None).unwrap();
        assert_eq!(a.shape(), &[2, 3]);
        assert_eq!(a.dtype(), DType::Float32);
        assert_eq!(a.get(&[1, 2]).unwrap(), Scalar::F32(6.0));
    }

    #[test]
    fn test_from_nested_broken_shape() {
        let bad = ArrayData::List(vec![
            ArrayData::row(&[1.0f32, 2.0, 3.0]),
            ArrayData::row(&[4.0f32, 5.0]),
        ]);
        let err = NDArray::from_nested(&bad, None).unwrap_err();
        assert!(matches!(err, Error::BrokenShape));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_scalar_array() {
        let a = NDArray::scalar(Scalar::F64(2.5));
        assert_eq!(a.shape(), &[] as &[usize]);
        assert_eq!(a.size(), 1);
        assert_eq!(a.get(&[]).unwrap(), Scalar::F64(2.5));
    }

    #[test]
    fn test_reshape_shares_buffer() {
        let a = NDArray::from_vec(vec![0i32, 1, 2, 3, 4, 5], &[6]).unwrap();
        let b = a.reshape(&[2, 3]).unwrap();
        assert!(a.shares_buffer(&b));
        b.set(&[0, 1], Scalar::I32(99)).unwrap();
        assert_eq!(a.get(&[1]).unwrap(), Scalar::I32(99));
        assert!(a.reshape(&[4]).is_err());
    }

    #[test]
    fn test_copy_breaks_buffer_identity() {
        let a = NDArray::from_vec(vec![1.0f64, 2.0, 3.0], &[3]).unwrap();
        let b = a.copy();
        assert!(!a.shares_buffer(&b));
        b.set(&[0], Scalar::F64(-1.0)).unwrap();
        assert_eq!(a.get(&[0]).unwrap(), Scalar::F64(1.0));
    }

    #[test]
    fn test_index_and_range_views() {
        let a = NDArray::from_vec((0..12).collect::<Vec<i64>>(), &[4, 3]).unwrap();
        let row = a.index(2).unwrap();
        assert_eq!(row.shape(), &[3]);
        assert_eq!(row.offset(), 6);
        assert_eq!(row.get(&[1]).unwrap(), Scalar::I64(7));

        let span = a.range(1..3).unwrap();
        assert_eq!(span.shape(), &[2, 3]);
        assert_eq!(span.offset(), 3);
        // Mutation through the range view is visible through the parent.
        span.set(&[0, 0], Scalar::I64(-5)).unwrap();
        assert_eq!(a.get(&[1, 0]).unwrap(), Scalar::I64(-5));
    }

    #[test]
    fn test_range_rejects_degenerate_and_oob() {
        let a = NDArray::from_vec(vec![0u8; 8], &[4, 2]).unwrap();
        assert_eq!(a.range(2..2).unwrap_err().kind(), ErrorKind::OutOfRange);
        assert_eq!(a.range(3..2).unwrap_err().kind(), ErrorKind::OutOfRange);
        assert_eq!(a.range(0..5).unwrap_err().kind(), ErrorKind::OutOfRange);
        assert_eq!(a.index(4).unwrap_err().kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn test_from_buffer_window_validation() {
        let buf = Arc::new(Buffer::alloc(6, DType::Float32));
        assert!(NDArray::from_buffer(Arc::clone(&buf), &[2, 2], 2).is_ok());
        let err = NDArray::from_buffer(buf, &[2, 3], 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_set_array_writes_through() {
        let a = NDArray::from_vec(vec![0.0f32; 6], &[2, 3]).unwrap();
        let row = NDArray::from_vec(vec![7.0f32, 8.0, 9.0], &[3]).unwrap();
        a.set_array(1, &row).unwrap();
        assert_eq!(a.get(&[1, 2]).unwrap(), Scalar::F32(9.0));
        // Source stays independent.
        row.set(&[0], Scalar::F32(0.0)).unwrap();
        assert_eq!(a.get(&[1, 0]).unwrap(), Scalar::F32(7.0));
    }

    #[test]
    fn test_to_nested_round_trip() {
        let a = NDArray::from_nested(&nested_2x3(), None).unwrap();
        assert_eq!(a.to_nested(), nested_2x3());
    }

    #[test]
    fn test_serialize_portable_round_trip() {
        let a = NDArray::from_vec(vec![1.5f64, -2.5, 3.5, 0.0], &[2, 2]).unwrap();
        let bytes = a.serialize();
        let b = NDArray::deserialize(&bytes).unwrap();
        assert_eq!(b.shape(), a.shape());
        assert_eq!(b.dtype(), a.dtype());
        assert_eq!(b.to_nested(), a.to_nested());
    }

    #[test]
    fn test_serialize_linear_round_trip() {
        let mut a = NDArray::from_vec(vec![1i16, -2, 3], &[3]).unwrap();
        a.set_serialize_mode(SerializeMode::Linear);
        let bytes = a.serialize();
        let b = NDArray::deserialize_linear(&bytes, DType::Int16).unwrap();
        assert_eq!(b.to_nested(), a.to_nested());
    }
}
