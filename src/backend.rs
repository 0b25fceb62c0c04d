//! Backend capability probing and selection.
//!
//! Backend availability is resolved once, at selection time: forcing an
//! unavailable native implementation or requesting an unknown accelerated
//! backend fails fast here, never deep inside kernel dispatch.

use crate::device::DeviceMath;
use crate::{Error, Result};
use tracing::{debug, info};

/// Device class requested for an accelerated backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// Whatever the platform considers its default device.
    #[default]
    Default,
    Gpu,
    Cpu,
}

/// What the compiled crate can actually run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Native linear-algebra library available for the host backend.
    pub native_blas: bool,
    /// Work-stealing parallelism available to the pure host kernels.
    pub parallel: bool,
    /// Double-precision scatter/accumulate support.
    pub fp64: bool,
    /// Names of the registered accelerated backends.
    pub accelerated_backends: Vec<&'static str>,
}

/// Names of accelerated backends this build knows how to construct.
const ACCELERATED: &[&str] = &["clblast"];

/// Probe what this build supports.
pub fn capabilities() -> Capabilities {
    Capabilities {
        native_blas: cfg!(feature = "faer"),
        parallel: cfg!(feature = "parallel"),
        fp64: true,
        accelerated_backends: ACCELERATED.to_vec(),
    }
}

/// Construct an accelerated backend by name and device type.
///
/// Unknown names and unavailable device types are rejected here so callers
/// fail before committing to a backend.
pub fn accelerated(name: &str, device_type: DeviceType) -> Result<DeviceMath> {
    if !ACCELERATED.contains(&name) {
        return Err(Error::Unsupported(format!(
            "accelerated backend \"{name}\" is not available (known: {ACCELERATED:?})"
        )));
    }
    debug!(backend = name, ?device_type, "selecting accelerated backend");
    let math = DeviceMath::new(device_type)?;
    info!(backend = name, "accelerated backend ready");
    Ok(math)
}
