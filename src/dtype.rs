//! Dtype tags, the static promotion lattice, and host scalar values.
//!
//! The promotion lattice is consulted once before kernel dispatch; it is a
//! pure function of the two operand dtypes and never inspects values.

use crate::{Error, Result};
use num_complex::{Complex32, Complex64};
use std::fmt;

/// Element type tag carried by every [`crate::Buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Complex of paired f32 components.
    Complex64,
    /// Complex of paired f64 components.
    Complex128,
}

impl DType {
    /// Bytes per element (complex counts both components).
    pub fn size_of(self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 | DType::Complex64 => 8,
            DType::Complex128 => 16,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Int8
                | DType::Int16
                | DType::Int32
                | DType::Int64
                | DType::UInt8
                | DType::UInt16
                | DType::UInt32
                | DType::UInt64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DType::Int8
                | DType::Int16
                | DType::Int32
                | DType::Int64
                | DType::Float32
                | DType::Float64
                | DType::Complex64
                | DType::Complex128
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DType::Complex64 | DType::Complex128)
    }

    /// Stable tag used by the portable serialization format.
    pub fn code(self) -> u8 {
        match self {
            DType::Bool => 0,
            DType::Int8 => 1,
            DType::Int16 => 2,
            DType::Int32 => 3,
            DType::Int64 => 4,
            DType::UInt8 => 5,
            DType::UInt16 => 6,
            DType::UInt32 => 7,
            DType::UInt64 => 8,
            DType::Float32 => 9,
            DType::Float64 => 10,
            DType::Complex64 => 11,
            DType::Complex128 => 12,
        }
    }

    /// Inverse of [`DType::code`].
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => DType::Bool,
            1 => DType::Int8,
            2 => DType::Int16,
            3 => DType::Int32,
            4 => DType::Int64,
            5 => DType::UInt8,
            6 => DType::UInt16,
            7 => DType::UInt32,
            8 => DType::UInt64,
            9 => DType::Float32,
            10 => DType::Float64,
            11 => DType::Complex64,
            12 => DType::Complex128,
            other => return Err(Error::Format(format!("unknown dtype code {other}"))),
        })
    }

    /// Integer width in bytes, `None` for non-integer dtypes.
    fn int_width(self) -> Option<usize> {
        match self {
            DType::Int8 | DType::UInt8 => Some(1),
            DType::Int16 | DType::UInt16 => Some(2),
            DType::Int32 | DType::UInt32 => Some(4),
            DType::Int64 | DType::UInt64 => Some(8),
            _ => None,
        }
    }

    fn signed_of_width(width: usize) -> DType {
        match width {
            1 => DType::Int8,
            2 => DType::Int16,
            4 => DType::Int32,
            _ => DType::Int64,
        }
    }

    fn unsigned_of_width(width: usize) -> DType {
        match width {
            1 => DType::UInt8,
            2 => DType::UInt16,
            4 => DType::UInt32,
            _ => DType::UInt64,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        };
        write!(f, "{name}")
    }
}

/// Resolve the output dtype of a binary operation.
///
/// The lattice, per dimension of the operand pair:
/// - equal dtypes keep that dtype;
/// - bool promotes to the other operand;
/// - mixed integers take the maximum width; if either side is signed the
///   result is signed;
/// - integer + float takes the float operand's dtype;
/// - float32 + float64 = float64;
/// - complex absorbs floats and integers: the result precision is the wider
///   of the complex precision and the other operand's float precision.
pub fn promote(a: DType, b: DType) -> DType {
    if a == b {
        return a;
    }
    if a == DType::Bool {
        return b;
    }
    if b == DType::Bool {
        return a;
    }

    // Complex absorbs everything else.
    if a.is_complex() || b.is_complex() {
        let wide = |d: DType| matches!(d, DType::Complex128 | DType::Float64 | DType::Int64 | DType::UInt64);
        return if wide(a) || wide(b) {
            DType::Complex128
        } else {
            DType::Complex64
        };
    }

    match (a.int_width(), b.int_width()) {
        (Some(wa), Some(wb)) => {
            let width = wa.max(wb);
            if a.is_signed() || b.is_signed() {
                DType::signed_of_width(width)
            } else {
                DType::unsigned_of_width(width)
            }
        }
        (Some(_), None) => b,
        (None, Some(_)) => a,
        (None, None) => {
            // Both are floats of different precision.
            DType::Float64
        }
    }
}

/// One host scalar of any dtype.
///
/// Complex values display as `a+bi` / `a-bi`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    C64(Complex32),
    C128(Complex64),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::I8(_) => DType::Int8,
            Scalar::I16(_) => DType::Int16,
            Scalar::I32(_) => DType::Int32,
            Scalar::I64(_) => DType::Int64,
            Scalar::U8(_) => DType::UInt8,
            Scalar::U16(_) => DType::UInt16,
            Scalar::U32(_) => DType::UInt32,
            Scalar::U64(_) => DType::UInt64,
            Scalar::F32(_) => DType::Float32,
            Scalar::F64(_) => DType::Float64,
            Scalar::C64(_) => DType::Complex64,
            Scalar::C128(_) => DType::Complex128,
        }
    }

    /// Real-axis value as f64 (complex values yield their real component).
    pub fn to_f64(&self) -> f64 {
        match *self {
            Scalar::Bool(v) => v as u8 as f64,
            Scalar::I8(v) => v as f64,
            Scalar::I16(v) => v as f64,
            Scalar::I32(v) => v as f64,
            Scalar::I64(v) => v as f64,
            Scalar::U8(v) => v as f64,
            Scalar::U16(v) => v as f64,
            Scalar::U32(v) => v as f64,
            Scalar::U64(v) => v as f64,
            Scalar::F32(v) => v as f64,
            Scalar::F64(v) => v,
            Scalar::C64(v) => v.re as f64,
            Scalar::C128(v) => v.re,
        }
    }

    /// Truncating conversion to i64; fails for complex values.
    pub fn to_i64(&self) -> Result<i64> {
        match *self {
            Scalar::Bool(v) => Ok(v as i64),
            Scalar::I8(v) => Ok(v as i64),
            Scalar::I16(v) => Ok(v as i64),
            Scalar::I32(v) => Ok(v as i64),
            Scalar::I64(v) => Ok(v),
            Scalar::U8(v) => Ok(v as i64),
            Scalar::U16(v) => Ok(v as i64),
            Scalar::U32(v) => Ok(v as i64),
            Scalar::U64(v) => Ok(v as i64),
            Scalar::F32(v) => Ok(v as i64),
            Scalar::F64(v) => Ok(v as i64),
            Scalar::C64(_) | Scalar::C128(_) => Err(Error::UnsupportedDtype {
                op: "to_i64",
                dtype: self.dtype(),
            }),
        }
    }

    /// Full-precision complex view of the value.
    pub fn to_complex(&self) -> Complex64 {
        match *self {
            Scalar::C64(v) => Complex64::new(v.re as f64, v.im as f64),
            Scalar::C128(v) => v,
            other => Complex64::new(other.to_f64(), 0.0),
        }
    }

    /// Convert to the given dtype, truncating where the target is narrower.
    ///
    /// Complex to non-complex conversion fails (the imaginary component would
    /// be silently dropped).
    pub fn cast_to(&self, dtype: DType) -> Result<Scalar> {
        if self.dtype() == dtype {
            return Ok(*self);
        }
        if self.dtype().is_complex() && !dtype.is_complex() {
            return Err(Error::UnsupportedDtype {
                op: "cast from complex",
                dtype,
            });
        }
        Ok(match dtype {
            DType::Bool => Scalar::Bool(self.to_f64() != 0.0),
            DType::Int8 => Scalar::I8(self.to_i64()? as i8),
            DType::Int16 => Scalar::I16(self.to_i64()? as i16),
            DType::Int32 => Scalar::I32(self.to_i64()? as i32),
            DType::Int64 => Scalar::I64(self.to_i64()?),
            DType::UInt8 => Scalar::U8(self.to_i64()? as u8),
            DType::UInt16 => Scalar::U16(self.to_i64()? as u16),
            DType::UInt32 => Scalar::U32(self.to_i64()? as u32),
            DType::UInt64 => Scalar::U64(self.to_i64()? as u64),
            DType::Float32 => Scalar::F32(self.to_f64() as f32),
            DType::Float64 => Scalar::F64(self.to_f64()),
            DType::Complex64 => {
                let c = self.to_complex();
                Scalar::C64(Complex32::new(c.re as f32, c.im as f32))
            }
            DType::Complex128 => Scalar::C128(self.to_complex()),
        })
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn complex(f: &mut fmt::Formatter<'_>, re: f64, im: f64) -> fmt::Result {
            if im.is_sign_negative() {
                write!(f, "{re}-{}i", -im)
            } else {
                write!(f, "{re}+{im}i")
            }
        }
        match *self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::I8(v) => write!(f, "{v}"),
            Scalar::I16(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}"),
            Scalar::I64(v) => write!(f, "{v}"),
            Scalar::U8(v) => write!(f, "{v}"),
            Scalar::U16(v) => write!(f, "{v}"),
            Scalar::U32(v) => write!(f, "{v}"),
            Scalar::U64(v) => write!(f, "{v}"),
            Scalar::F32(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v}"),
            Scalar::C64(v) => complex(f, v.re as f64, v.im as f64),
            Scalar::C128(v) => complex(f, v.re, v.im),
        }
    }
}

macro_rules! impl_scalar_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Scalar {
            fn from(v: $t) -> Self {
                Scalar::$variant(v)
            }
        })*
    };
}

impl_scalar_from!(
    bool => Bool, i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64, Complex32 => C64, Complex64 => C128,
);
