//! Simulated OpenCL/CLBlast device backend.
//!
//! The device is an in-process simulation: a dedicated worker thread plays
//! the command queue, executing kernels in submission order, so the
//! event-synchronization contract is exercised for real without a driver.
//! Host code interacts only through [`DeviceMath`] transfers and kernels and
//! the [`Event`]s they signal.

mod buffer;
mod event;
mod math;
mod queue;

pub use buffer::{DeviceArray, DeviceBuffer};
pub use event::{Event, EventList, EventStatus};
pub use math::{DeviceMath, DeviceOutput, WORK_GROUP_SIZE};
