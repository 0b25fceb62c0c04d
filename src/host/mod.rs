//! Host compute backend.
//!
//! [`HostMath`] implements the linear-algebra and array kernels over host
//! buffers. Each operation has a pure-Rust implementation and, where a native
//! library covers it, a native implementation selected by [`ComputeMode`];
//! both produce identical observable results.

mod blas;
mod conv;
mod elementwise;
mod reduce;
mod select;

pub use blas::Uplo;
pub use elementwise::ElemOp;
pub use select::AssignOp;

use crate::backend::{capabilities, Capabilities};
use crate::buffer::Element;
use crate::dtype::DType;
use crate::{Error, NDArray, Result};
use tracing::debug;

/// Implementation switch for the host backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComputeMode {
    /// Native where available, pure otherwise.
    #[default]
    Auto,
    /// Pure-Rust kernels only.
    ForcePure,
    /// Native library only; construction fails when it is not compiled in.
    ForceNative,
}

/// Host compute backend over [`crate::Buffer`] storage.
#[derive(Debug, Clone)]
pub struct HostMath {
    mode: ComputeMode,
    caps: Capabilities,
}

impl Default for HostMath {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMath {
    /// Auto-selecting backend: native kernels where compiled in.
    pub fn new() -> Self {
        let caps = capabilities();
        debug!(native_blas = caps.native_blas, "host backend selected");
        Self {
            mode: ComputeMode::Auto,
            caps,
        }
    }

    /// Backend restricted to the pure-Rust kernels.
    pub fn force_pure() -> Self {
        Self {
            mode: ComputeMode::ForcePure,
            caps: capabilities(),
        }
    }

    /// Backend restricted to the native library kernels.
    ///
    /// Fails fast when the native library is not compiled in, so callers
    /// never discover the absence mid-dispatch.
    pub fn force_native() -> Result<Self> {
        let caps = capabilities();
        if !caps.native_blas {
            return Err(Error::Unsupported(
                "native BLAS implementation is not compiled in".into(),
            ));
        }
        Ok(Self {
            mode: ComputeMode::ForceNative,
            caps,
        })
    }

    pub fn mode(&self) -> ComputeMode {
        self.mode
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Whether a native-covered operation should take the native path.
    pub(crate) fn use_native(&self) -> bool {
        match self.mode {
            ComputeMode::Auto => self.caps.native_blas,
            ComputeMode::ForcePure => false,
            ComputeMode::ForceNative => true,
        }
    }

    /// Cast every element of `x` into a fresh array of `dtype`.
    pub fn astype(&self, x: &NDArray, dtype: DType) -> Result<NDArray> {
        if x.dtype() == dtype {
            return Ok(x.copy());
        }
        let out = NDArray::alloc(x.shape(), dtype);
        for i in 0..x.size() {
            out.set_flat(i, x.get_flat(i)?)?;
        }
        Ok(out)
    }
}

/// Dispatch a generic kernel body over the numeric dtypes.
///
/// `$T` is bound to the concrete element type inside `$body`; bool is
/// rejected with [`Error::UnsupportedDtype`].
macro_rules! numeric_dispatch {
    ($dtype:expr, $op:expr, $T:ident => $body:block) => {{
        use num_complex::{Complex32, Complex64};
        match $dtype {
            $crate::DType::Int8 => {
                type $T = i8;
                $body
            }
            $crate::DType::Int16 => {
                type $T = i16;
                $body
            }
            $crate::DType::Int32 => {
                type $T = i32;
                $body
            }
            $crate::DType::Int64 => {
                type $T = i64;
                $body
            }
            $crate::DType::UInt8 => {
                type $T = u8;
                $body
            }
            $crate::DType::UInt16 => {
                type $T = u16;
                $body
            }
            $crate::DType::UInt32 => {
                type $T = u32;
                $body
            }
            $crate::DType::UInt64 => {
                type $T = u64;
                $body
            }
            $crate::DType::Float32 => {
                type $T = f32;
                $body
            }
            $crate::DType::Float64 => {
                type $T = f64;
                $body
            }
            $crate::DType::Complex64 => {
                type $T = Complex32;
                $body
            }
            $crate::DType::Complex128 => {
                type $T = Complex64;
                $body
            }
            $crate::DType::Bool => {
                return Err($crate::Error::UnsupportedDtype {
                    op: $op,
                    dtype: $crate::DType::Bool,
                })
            }
        }
    }};
}
pub(crate) use numeric_dispatch;

/// Typed window of an array: the contiguous `[offset, offset + size)` slice.
pub(crate) fn typed_window<T: Element>(x: &NDArray) -> Result<Vec<T>> {
    let cells = x.buffer().read();
    let slice = T::slice(&cells).ok_or(Error::UnsupportedDtype {
        op: "kernel dispatch",
        dtype: x.dtype(),
    })?;
    Ok(slice[x.offset()..x.offset() + x.size()].to_vec())
}

/// Write a typed vector back over an array's window.
pub(crate) fn write_window<T: Element>(x: &NDArray, data: &[T]) -> Result<()> {
    let mut cells = x.buffer().write();
    let slice = T::slice_mut(&mut cells).ok_or(Error::UnsupportedDtype {
        op: "kernel dispatch",
        dtype: x.dtype(),
    })?;
    slice[x.offset()..x.offset() + data.len()].copy_from_slice(data);
    Ok(())
}
