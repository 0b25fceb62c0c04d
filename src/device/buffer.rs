//! Device-resident storage.
//!
//! [`DeviceBuffer`] models a device allocation: dtype-tagged cells that host
//! code never touches directly. Access goes through [`crate::DeviceMath`]
//! transfers and kernels, each signaled by an [`super::Event`].

use crate::buffer::TypedVec;
use crate::dtype::DType;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Flat device-resident storage of one dtype.
#[derive(Debug)]
pub struct DeviceBuffer {
    dtype: DType,
    count: usize,
    cells: Mutex<TypedVec>,
}

impl DeviceBuffer {
    pub(crate) fn zeros(dtype: DType, count: usize) -> Self {
        Self {
            dtype,
            count,
            cells: Mutex::new(TypedVec::zeros(dtype, count)),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TypedVec> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shape over a device-resident buffer.
///
/// Contents are only meaningful once the producing command's event has
/// signaled completion.
#[derive(Debug, Clone)]
pub struct DeviceArray {
    buffer: Arc<DeviceBuffer>,
    shape: Vec<usize>,
}

impl DeviceArray {
    pub(crate) fn new(buffer: Arc<DeviceBuffer>, shape: Vec<usize>) -> Self {
        Self { buffer, shape }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    pub(crate) fn buffer(&self) -> &Arc<DeviceBuffer> {
        &self.buffer
    }
}
