//! Strided N-dimensional array runtime with pluggable compute backends.
//!
//! This crate provides a dense tensor engine built from three layers:
//!
//! - [`Buffer`]: flat, dtype-tagged, fixed-length storage. A buffer owns raw
//!   memory and is never aware of shape.
//! - [`NDArray`]: a view of a shape + offset over a shared buffer. Multiple
//!   views may alias one buffer (row slices, reshapes); mutating through one
//!   view is visible through all of them. An explicit [`NDArray::copy`]
//!   materializes a new buffer.
//! - Compute backends: [`HostMath`] executes kernels on host buffers with an
//!   internal switch between a pure-Rust implementation and a native
//!   linear-algebra library; [`DeviceMath`] mirrors the same semantics over
//!   device-resident buffers with event-based synchronization and multiple
//!   numbered kernel modes per operation.
//!
//! # Example
//!
//! ```rust
//! use ndstride::{HostMath, NDArray};
//!
//! let la = HostMath::new();
//! let x = NDArray::from_vec(vec![1.0f32, 2.0, -3.0, -4.0, 5.0, -6.0], &[6]).unwrap();
//! let total = la.sum(&x, None).unwrap();
//! assert_eq!(total.get(&[]).unwrap().to_f64(), -5.0);
//! ```
//!
//! # Broadcasting Example
//!
//! ```rust
//! use ndstride::{ElemOp, HostMath, NDArray};
//!
//! let la = HostMath::new();
//! // [2, 3] + [3] broadcasts the row vector across both rows.
//! let a = NDArray::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
//! let b = NDArray::from_vec(vec![10.0f32, 20.0, 30.0], &[3]).unwrap();
//! let c = la.op(&a, ElemOp::Add, &b).unwrap();
//! assert_eq!(c.shape(), &[2, 3]);
//! ```

pub mod array;
pub mod backend;
pub mod buffer;
pub mod device;
pub mod dtype;
pub mod host;
pub mod iterator;

// ============================================================================
// Core data model
// ============================================================================
pub use array::{ArrayData, NDArray, SerializeMode};
pub use buffer::Buffer;
pub use dtype::{promote, DType, Scalar};
pub use iterator::MatrixBufferIterator;

// ============================================================================
// Backends
// ============================================================================
pub use backend::{accelerated, Capabilities, DeviceType};
pub use device::{
    DeviceArray, DeviceBuffer, DeviceMath, DeviceOutput, Event, EventList, EventStatus,
};
pub use host::{AssignOp, ComputeMode, ElemOp, HostMath, Uplo};

/// Coarse classification of [`Error`] values.
///
/// Callers use this to distinguish addressing bugs ([`ErrorKind::OutOfRange`])
/// from shape/configuration bugs ([`ErrorKind::InvalidArgument`]) and from
/// structurally nonsensical requests ([`ErrorKind::Unsupported`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Shape mismatches, out-of-bounds buffer windows, invalid axes,
    /// malformed nested input, unsupported mode/dtype combinations.
    InvalidArgument,
    /// Index or slice addressing beyond bounds.
    OutOfRange,
    /// Structurally nonsensical or unavailable operations.
    Unsupported,
}

/// Errors produced by the array runtime and both compute backends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Nested input rows have inconsistent lengths for some dimension.
    #[error("shape of dimension is broken")]
    BrokenShape,

    /// Two shapes are incompatible for the requested operation.
    #[error("shape mismatch: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// Invalid axis index for the given array rank.
    #[error("invalid axis {axis} for rank {rank}")]
    InvalidAxis { axis: usize, rank: usize },

    /// A BLAS matrix window (offset + leading dimension) exceeds its buffer.
    #[error("matrix specification too large for buffer {which}")]
    MatrixOverBuffer { which: char },

    /// Catch-all for invalid call configuration; the message names the
    /// offending argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed serialized buffer stream.
    #[error("serialization format error: {0}")]
    Format(String),

    /// Element index beyond the addressed length.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Degenerate or out-of-bounds range over the first dimension.
    #[error("range {start}..{end} out of range for length {len}")]
    RangeOutOfRange { start: usize, end: usize, len: usize },

    /// The dtype cannot participate in this operation.
    #[error("dtype {dtype} unsupported for {op}")]
    UnsupportedDtype { op: &'static str, dtype: dtype::DType },

    /// Kernel mode number outside the registered table for the operation.
    #[error("unknown kernel mode {mode} for {op}")]
    UnknownMode { op: &'static str, mode: usize },

    /// Structurally nonsensical or unavailable request.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A device kernel or transfer failed with a vendor error code.
    #[error("device error {code}")]
    Device { code: i32 },
}

impl Error {
    /// Classify this error into the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BrokenShape
            | Error::ShapeMismatch(_, _)
            | Error::InvalidAxis { .. }
            | Error::MatrixOverBuffer { .. }
            | Error::InvalidArgument(_)
            | Error::Format(_)
            | Error::UnsupportedDtype { .. }
            | Error::UnknownMode { .. } => ErrorKind::InvalidArgument,
            Error::IndexOutOfRange { .. } | Error::RangeOutOfRange { .. } => ErrorKind::OutOfRange,
            Error::Unsupported(_) | Error::Device { .. } => ErrorKind::Unsupported,
        }
    }
}

/// Result type for array runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
