//! Flat, dtype-tagged, fixed-length storage.
//!
//! A [`Buffer`] owns raw memory for one dtype and is never aware of shape.
//! Views ([`crate::NDArray`]) share a buffer through `Arc` and write through
//! it; the interior `RwLock` makes that aliasing safe without giving any view
//! ownership of the memory.

use crate::dtype::{DType, Scalar};
use crate::{Error, Result};
use num_complex::{Complex32, Complex64};
use std::cmp::Ordering;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Storage for one dtype, one `Vec` variant per element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedVec {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    C64(Vec<Complex32>),
    C128(Vec<Complex64>),
}

macro_rules! typed_vec_each {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            TypedVec::Bool($v) => $body,
            TypedVec::I8($v) => $body,
            TypedVec::I16($v) => $body,
            TypedVec::I32($v) => $body,
            TypedVec::I64($v) => $body,
            TypedVec::U8($v) => $body,
            TypedVec::U16($v) => $body,
            TypedVec::U32($v) => $body,
            TypedVec::U64($v) => $body,
            TypedVec::F32($v) => $body,
            TypedVec::F64($v) => $body,
            TypedVec::C64($v) => $body,
            TypedVec::C128($v) => $body,
        }
    };
}

impl TypedVec {
    /// Zero-filled storage of the given dtype.
    pub fn zeros(dtype: DType, count: usize) -> Self {
        match dtype {
            DType::Bool => TypedVec::Bool(vec![false; count]),
            DType::Int8 => TypedVec::I8(vec![0; count]),
            DType::Int16 => TypedVec::I16(vec![0; count]),
            DType::Int32 => TypedVec::I32(vec![0; count]),
            DType::Int64 => TypedVec::I64(vec![0; count]),
            DType::UInt8 => TypedVec::U8(vec![0; count]),
            DType::UInt16 => TypedVec::U16(vec![0; count]),
            DType::UInt32 => TypedVec::U32(vec![0; count]),
            DType::UInt64 => TypedVec::U64(vec![0; count]),
            DType::Float32 => TypedVec::F32(vec![0.0; count]),
            DType::Float64 => TypedVec::F64(vec![0.0; count]),
            DType::Complex64 => TypedVec::C64(vec![Complex32::new(0.0, 0.0); count]),
            DType::Complex128 => TypedVec::C128(vec![Complex64::new(0.0, 0.0); count]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TypedVec::Bool(_) => DType::Bool,
            TypedVec::I8(_) => DType::Int8,
            TypedVec::I16(_) => DType::Int16,
            TypedVec::I32(_) => DType::Int32,
            TypedVec::I64(_) => DType::Int64,
            TypedVec::U8(_) => DType::UInt8,
            TypedVec::U16(_) => DType::UInt16,
            TypedVec::U32(_) => DType::UInt32,
            TypedVec::U64(_) => DType::UInt64,
            TypedVec::F32(_) => DType::Float32,
            TypedVec::F64(_) => DType::Float64,
            TypedVec::C64(_) => DType::Complex64,
            TypedVec::C128(_) => DType::Complex128,
        }
    }

    pub fn len(&self) -> usize {
        typed_vec_each!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Scalar {
        match self {
            TypedVec::Bool(v) => Scalar::Bool(v[i]),
            TypedVec::I8(v) => Scalar::I8(v[i]),
            TypedVec::I16(v) => Scalar::I16(v[i]),
            TypedVec::I32(v) => Scalar::I32(v[i]),
            TypedVec::I64(v) => Scalar::I64(v[i]),
            TypedVec::U8(v) => Scalar::U8(v[i]),
            TypedVec::U16(v) => Scalar::U16(v[i]),
            TypedVec::U32(v) => Scalar::U32(v[i]),
            TypedVec::U64(v) => Scalar::U64(v[i]),
            TypedVec::F32(v) => Scalar::F32(v[i]),
            TypedVec::F64(v) => Scalar::F64(v[i]),
            TypedVec::C64(v) => Scalar::C64(v[i]),
            TypedVec::C128(v) => Scalar::C128(v[i]),
        }
    }

    /// Clone `len` elements starting at `start` into new storage of the same
    /// dtype.
    pub fn slice_range(&self, start: usize, len: usize) -> TypedVec {
        match self {
            TypedVec::Bool(v) => TypedVec::Bool(v[start..start + len].to_vec()),
            TypedVec::I8(v) => TypedVec::I8(v[start..start + len].to_vec()),
            TypedVec::I16(v) => TypedVec::I16(v[start..start + len].to_vec()),
            TypedVec::I32(v) => TypedVec::I32(v[start..start + len].to_vec()),
            TypedVec::I64(v) => TypedVec::I64(v[start..start + len].to_vec()),
            TypedVec::U8(v) => TypedVec::U8(v[start..start + len].to_vec()),
            TypedVec::U16(v) => TypedVec::U16(v[start..start + len].to_vec()),
            TypedVec::U32(v) => TypedVec::U32(v[start..start + len].to_vec()),
            TypedVec::U64(v) => TypedVec::U64(v[start..start + len].to_vec()),
            TypedVec::F32(v) => TypedVec::F32(v[start..start + len].to_vec()),
            TypedVec::F64(v) => TypedVec::F64(v[start..start + len].to_vec()),
            TypedVec::C64(v) => TypedVec::C64(v[start..start + len].to_vec()),
            TypedVec::C128(v) => TypedVec::C128(v[start..start + len].to_vec()),
        }
    }

    /// Store `value` at `i`, converting to the storage dtype first.
    pub fn set(&mut self, i: usize, value: Scalar) -> Result<()> {
        let cast = value.cast_to(self.dtype())?;
        match (self, cast) {
            (TypedVec::Bool(v), Scalar::Bool(x)) => v[i] = x,
            (TypedVec::I8(v), Scalar::I8(x)) => v[i] = x,
            (TypedVec::I16(v), Scalar::I16(x)) => v[i] = x,
            (TypedVec::I32(v), Scalar::I32(x)) => v[i] = x,
            (TypedVec::I64(v), Scalar::I64(x)) => v[i] = x,
            (TypedVec::U8(v), Scalar::U8(x)) => v[i] = x,
            (TypedVec::U16(v), Scalar::U16(x)) => v[i] = x,
            (TypedVec::U32(v), Scalar::U32(x)) => v[i] = x,
            (TypedVec::U64(v), Scalar::U64(x)) => v[i] = x,
            (TypedVec::F32(v), Scalar::F32(x)) => v[i] = x,
            (TypedVec::F64(v), Scalar::F64(x)) => v[i] = x,
            (TypedVec::C64(v), Scalar::C64(x)) => v[i] = x,
            (TypedVec::C128(v), Scalar::C128(x)) => v[i] = x,
            _ => unreachable!("cast_to returned a mismatched variant"),
        }
        Ok(())
    }
}

/// Rust scalar types that map onto a [`DType`] and can live in a [`TypedVec`].
pub trait Element: Copy + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    const DTYPE: DType;

    fn zero() -> Self;
    fn one() -> Self;
    fn to_scalar(self) -> Scalar;
    fn from_scalar(s: Scalar) -> Result<Self>;
    fn wrap(data: Vec<Self>) -> TypedVec;
    fn slice(tv: &TypedVec) -> Option<&[Self]>;
    fn slice_mut(tv: &mut TypedVec) -> Option<&mut [Self]>;
}

/// Elements supporting arithmetic kernels.
///
/// Integer arithmetic wraps on overflow; integer division by zero is an
/// [`Error::InvalidArgument`]. Complex elements have no order: `try_cmp`
/// returns `None` and order-dependent kernels reject the dtype.
pub trait NumElement: Element {
    fn add(self, o: Self) -> Self;
    fn sub(self, o: Self) -> Self;
    fn mul(self, o: Self) -> Self;
    fn div(self, o: Self) -> Result<Self>;
    fn rem(self, o: Self) -> Result<Self>;
    fn pow(self, o: Self) -> Result<Self>;
    fn neg(self) -> Self;
    fn try_cmp(self, o: Self) -> Option<Ordering>;
    /// Absolute magnitude used by `asum`/`amax`/`amin`.
    fn abs_mag(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident, $dtype:expr, $zero:expr, $one:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;

            fn zero() -> Self {
                $zero
            }
            fn one() -> Self {
                $one
            }
            fn to_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }
            fn from_scalar(s: Scalar) -> Result<Self> {
                match s.cast_to($dtype)? {
                    Scalar::$variant(v) => Ok(v),
                    _ => unreachable!("cast_to returned a mismatched variant"),
                }
            }
            fn wrap(data: Vec<Self>) -> TypedVec {
                TypedVec::$variant(data)
            }
            fn slice(tv: &TypedVec) -> Option<&[Self]> {
                match tv {
                    TypedVec::$variant(v) => Some(v),
                    _ => None,
                }
            }
            fn slice_mut(tv: &mut TypedVec) -> Option<&mut [Self]> {
                match tv {
                    TypedVec::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(bool, Bool, DType::Bool, false, true);
impl_element!(i8, I8, DType::Int8, 0, 1);
impl_element!(i16, I16, DType::Int16, 0, 1);
impl_element!(i32, I32, DType::Int32, 0, 1);
impl_element!(i64, I64, DType::Int64, 0, 1);
impl_element!(u8, U8, DType::UInt8, 0, 1);
impl_element!(u16, U16, DType::UInt16, 0, 1);
impl_element!(u32, U32, DType::UInt32, 0, 1);
impl_element!(u64, U64, DType::UInt64, 0, 1);
impl_element!(f32, F32, DType::Float32, 0.0, 1.0);
impl_element!(f64, F64, DType::Float64, 0.0, 1.0);
impl_element!(
    Complex32,
    C64,
    DType::Complex64,
    Complex32::new(0.0, 0.0),
    Complex32::new(1.0, 0.0)
);
impl_element!(
    Complex64,
    C128,
    DType::Complex128,
    Complex64::new(0.0, 0.0),
    Complex64::new(1.0, 0.0)
);

macro_rules! impl_num_element_int {
    ($t:ty) => {
        impl NumElement for $t {
            fn add(self, o: Self) -> Self {
                self.wrapping_add(o)
            }
            fn sub(self, o: Self) -> Self {
                self.wrapping_sub(o)
            }
            fn mul(self, o: Self) -> Self {
                self.wrapping_mul(o)
            }
            fn div(self, o: Self) -> Result<Self> {
                self.checked_div(o)
                    .ok_or_else(|| Error::InvalidArgument("integer division by zero".into()))
            }
            fn rem(self, o: Self) -> Result<Self> {
                self.checked_rem(o)
                    .ok_or_else(|| Error::InvalidArgument("integer modulo by zero".into()))
            }
            fn pow(self, o: Self) -> Result<Self> {
                let exp = o.to_f64();
                if exp < 0.0 {
                    return Err(Error::InvalidArgument(
                        "negative exponent for integer power".into(),
                    ));
                }
                Ok(self.wrapping_pow(exp as u32))
            }
            fn neg(self) -> Self {
                self.wrapping_neg()
            }
            fn try_cmp(self, o: Self) -> Option<Ordering> {
                Some(Ord::cmp(&self, &o))
            }
            fn abs_mag(self) -> f64 {
                (self.to_f64()).abs()
            }
            fn from_f64(v: f64) -> Self {
                v as $t
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_num_element_int!(i8);
impl_num_element_int!(i16);
impl_num_element_int!(i32);
impl_num_element_int!(i64);
impl_num_element_int!(u8);
impl_num_element_int!(u16);
impl_num_element_int!(u32);
impl_num_element_int!(u64);

macro_rules! impl_num_element_float {
    ($t:ty) => {
        impl NumElement for $t {
            fn add(self, o: Self) -> Self {
                self + o
            }
            fn sub(self, o: Self) -> Self {
                self - o
            }
            fn mul(self, o: Self) -> Self {
                self * o
            }
            fn div(self, o: Self) -> Result<Self> {
                Ok(self / o)
            }
            fn rem(self, o: Self) -> Result<Self> {
                Ok(self % o)
            }
            fn pow(self, o: Self) -> Result<Self> {
                Ok(self.powf(o))
            }
            fn neg(self) -> Self {
                -self
            }
            fn try_cmp(self, o: Self) -> Option<Ordering> {
                self.partial_cmp(&o)
            }
            fn abs_mag(self) -> f64 {
                (self as f64).abs()
            }
            fn from_f64(v: f64) -> Self {
                v as $t
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_num_element_float!(f32);
impl_num_element_float!(f64);

macro_rules! impl_num_element_complex {
    ($t:ty, $f:ty) => {
        impl NumElement for $t {
            fn add(self, o: Self) -> Self {
                self + o
            }
            fn sub(self, o: Self) -> Self {
                self - o
            }
            fn mul(self, o: Self) -> Self {
                self * o
            }
            fn div(self, o: Self) -> Result<Self> {
                Ok(self / o)
            }
            fn rem(self, _o: Self) -> Result<Self> {
                Err(Error::UnsupportedDtype {
                    op: "modulo",
                    dtype: <$t as Element>::DTYPE,
                })
            }
            fn pow(self, o: Self) -> Result<Self> {
                Ok(self.powc(o))
            }
            fn neg(self) -> Self {
                -self
            }
            fn try_cmp(self, _o: Self) -> Option<Ordering> {
                None
            }
            fn abs_mag(self) -> f64 {
                self.norm() as f64
            }
            fn from_f64(v: f64) -> Self {
                <$t>::new(v as $f, 0.0)
            }
            fn to_f64(self) -> f64 {
                self.re as f64
            }
        }
    };
}

impl_num_element_complex!(Complex32, f32);
impl_num_element_complex!(Complex64, f64);

/// Flat fixed-size typed storage shared between aliasing views.
#[derive(Debug)]
pub struct Buffer {
    dtype: DType,
    count: usize,
    cells: RwLock<TypedVec>,
}

impl Buffer {
    /// Zero-filled storage of `count` elements.
    pub fn alloc(count: usize, dtype: DType) -> Self {
        Self {
            dtype,
            count,
            cells: RwLock::new(TypedVec::zeros(dtype, count)),
        }
    }

    /// Wrap existing typed data.
    pub fn from_typed(data: TypedVec) -> Self {
        Self {
            dtype: data.dtype(),
            count: data.len(),
            cells: RwLock::new(data),
        }
    }

    /// Wrap a flat vector of one element type.
    pub fn from_vec<T: Element>(data: Vec<T>) -> Self {
        Self::from_typed(T::wrap(data))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Bounds-checked element read.
    pub fn get(&self, i: usize) -> Result<Scalar> {
        if i >= self.count {
            return Err(Error::IndexOutOfRange {
                index: i,
                len: self.count,
            });
        }
        Ok(self.read().get(i))
    }

    /// Bounds-checked element write; the value is converted to the buffer
    /// dtype first.
    pub fn set(&self, i: usize, value: Scalar) -> Result<()> {
        if i >= self.count {
            return Err(Error::IndexOutOfRange {
                index: i,
                len: self.count,
            });
        }
        self.write().set(i, value)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, TypedVec> {
        self.cells.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, TypedVec> {
        self.cells.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the storage (used by `copy` and device upload).
    pub(crate) fn clone_data(&self) -> TypedVec {
        self.read().clone()
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Dtype-native packed encoding: the raw little-endian element bytes with
    /// no header. Compact but not self-describing; the consumer must know the
    /// dtype out of band.
    pub fn to_linear(&self) -> Vec<u8> {
        let cells = self.read();
        match &*cells {
            TypedVec::Bool(v) => v.iter().map(|&b| b as u8).collect(),
            TypedVec::I8(v) => bytemuck::cast_slice(v).to_vec(),
            TypedVec::I16(v) => bytemuck::cast_slice(v).to_vec(),
            TypedVec::I32(v) => bytemuck::cast_slice(v).to_vec(),
            TypedVec::I64(v) => bytemuck::cast_slice(v).to_vec(),
            TypedVec::U8(v) => v.clone(),
            TypedVec::U16(v) => bytemuck::cast_slice(v).to_vec(),
            TypedVec::U32(v) => bytemuck::cast_slice(v).to_vec(),
            TypedVec::U64(v) => bytemuck::cast_slice(v).to_vec(),
            TypedVec::F32(v) => bytemuck::cast_slice(v).to_vec(),
            TypedVec::F64(v) => bytemuck::cast_slice(v).to_vec(),
            TypedVec::C64(v) => {
                let mut out = Vec::with_capacity(v.len() * 8);
                for c in v {
                    out.extend_from_slice(&c.re.to_le_bytes());
                    out.extend_from_slice(&c.im.to_le_bytes());
                }
                out
            }
            TypedVec::C128(v) => {
                let mut out = Vec::with_capacity(v.len() * 16);
                for c in v {
                    out.extend_from_slice(&c.re.to_le_bytes());
                    out.extend_from_slice(&c.im.to_le_bytes());
                }
                out
            }
        }
    }

    /// Decode a [`Buffer::to_linear`] stream; the caller supplies the dtype.
    pub fn from_linear(bytes: &[u8], dtype: DType) -> Result<Self> {
        let elem = dtype.size_of();
        if bytes.len() % elem != 0 {
            return Err(Error::Format(format!(
                "linear stream length {} is not a multiple of element size {elem}",
                bytes.len()
            )));
        }
        let count = bytes.len() / elem;
        decode_elements(bytes, dtype, count)
    }

    /// Self-describing portable encoding: magic, format version, dtype code,
    /// element count, then canonical little-endian elements. Round-trips
    /// across backend implementations regardless of their native layout.
    pub fn to_portable(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PORTABLE_HEADER_LEN + self.count * self.dtype.size_of());
        out.extend_from_slice(PORTABLE_MAGIC);
        out.push(PORTABLE_VERSION);
        out.push(self.dtype.code());
        out.extend_from_slice(&(self.count as u64).to_le_bytes());
        out.extend_from_slice(&self.to_linear());
        out
    }

    /// Decode a [`Buffer::to_portable`] stream.
    pub fn from_portable(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PORTABLE_HEADER_LEN {
            return Err(Error::Format("portable stream truncated header".into()));
        }
        if &bytes[..4] != PORTABLE_MAGIC {
            return Err(Error::Format("bad portable magic".into()));
        }
        if bytes[4] != PORTABLE_VERSION {
            return Err(Error::Format(format!(
                "unsupported portable version {}",
                bytes[4]
            )));
        }
        let dtype = DType::from_code(bytes[5])?;
        let mut count_raw = [0u8; 8];
        count_raw.copy_from_slice(&bytes[6..14]);
        let count = u64::from_le_bytes(count_raw) as usize;
        let body = &bytes[PORTABLE_HEADER_LEN..];
        if body.len() != count * dtype.size_of() {
            return Err(Error::Format(format!(
                "portable body length {} does not match count {count} of {dtype}",
                body.len()
            )));
        }
        decode_elements(body, dtype, count)
    }
}

const PORTABLE_MAGIC: &[u8; 4] = b"NDSB";
const PORTABLE_VERSION: u8 = 1;
const PORTABLE_HEADER_LEN: usize = 4 + 1 + 1 + 8;

fn decode_elements(bytes: &[u8], dtype: DType, count: usize) -> Result<Buffer> {
    fn chunks<const N: usize>(bytes: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
        bytes.chunks_exact(N).map(|c| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(c);
            raw
        })
    }

    let data = match dtype {
        DType::Bool => TypedVec::Bool(bytes.iter().map(|&b| b != 0).collect()),
        DType::Int8 => TypedVec::I8(bytes.iter().map(|&b| b as i8).collect()),
        DType::Int16 => TypedVec::I16(chunks::<2>(bytes).map(i16::from_le_bytes).collect()),
        DType::Int32 => TypedVec::I32(chunks::<4>(bytes).map(i32::from_le_bytes).collect()),
        DType::Int64 => TypedVec::I64(chunks::<8>(bytes).map(i64::from_le_bytes).collect()),
        DType::UInt8 => TypedVec::U8(bytes.to_vec()),
        DType::UInt16 => TypedVec::U16(chunks::<2>(bytes).map(u16::from_le_bytes).collect()),
        DType::UInt32 => TypedVec::U32(chunks::<4>(bytes).map(u32::from_le_bytes).collect()),
        DType::UInt64 => TypedVec::U64(chunks::<8>(bytes).map(u64::from_le_bytes).collect()),
        DType::Float32 => TypedVec::F32(chunks::<4>(bytes).map(f32::from_le_bytes).collect()),
        DType::Float64 => TypedVec::F64(chunks::<8>(bytes).map(f64::from_le_bytes).collect()),
        DType::Complex64 => TypedVec::C64(
            chunks::<8>(bytes)
                .map(|raw| {
                    let mut re = [0u8; 4];
                    let mut im = [0u8; 4];
                    re.copy_from_slice(&raw[..4]);
                    im.copy_from_slice(&raw[4..]);
                    Complex32::new(f32::from_le_bytes(re), f32::from_le_bytes(im))
                })
                .collect(),
        ),
        DType::Complex128 => TypedVec::C128(
            chunks::<16>(bytes)
                .map(|raw| {
                    let mut re = [0u8; 8];
                    let mut im = [0u8; 8];
                    re.copy_from_slice(&raw[..8]);
                    im.copy_from_slice(&raw[8..]);
                    Complex64::new(f64::from_le_bytes(re), f64::from_le_bytes(im))
                })
                .collect(),
        ),
    };
    if data.len() != count {
        return Err(Error::Format(format!(
            "decoded {} elements, expected {count}",
            data.len()
        )));
    }
    Ok(Buffer::from_typed(data))
}
