//! Device compute backend.
//!
//! [`DeviceMath`] mirrors the host backend semantics over device-resident
//! buffers. Every operation exposes numbered kernel modes: alternate
//! parallel-decomposition strategies for the same computation (naive loop,
//! two-pass work-group reduction, pairwise tree). All modes of an operation
//! are numerically equivalent for all valid inputs; picking the fastest for
//! a problem size is a tuning harness's job, not ours.
//!
//! Commands execute asynchronously on the queue worker. Results are only
//! meaningful once the returned [`Event`] signals; ordering between calls
//! exists solely through caller wait-lists, the `blocking` flag, or
//! [`DeviceMath::finish`].

use super::buffer::{DeviceArray, DeviceBuffer};
use super::event::{Event, EventList};
use super::queue::{CommandQueue, Job};
use crate::backend::DeviceType;
use crate::buffer::{Element, NumElement};
use crate::dtype::{DType, Scalar};
use crate::host::numeric_dispatch;
use crate::{Error, NDArray, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Simulated device work-group width; reduction modes tile by it.
pub const WORK_GROUP_SIZE: usize = 256;

const SUM_MODES: usize = 3;
const REDUCE_MODES: usize = 3;
const SOFTMAX_MODES: usize = 3;
const SCATTER_ADD_MODES: usize = 5;

/// Vendor code a kernel reports for a dtype it cannot slice.
const BAD_KERNEL_ARGS: i32 = -30;
/// Vendor code for an out-of-range scatter index caught at execution time.
const BAD_SCATTER_INDEX: i32 = -5;

/// Result of a device operation that may collapse to one element.
#[derive(Debug, Clone)]
pub enum DeviceOutput {
    Array(DeviceArray),
    Scalar(Scalar),
}

/// Simulated OpenCL/CLBlast compute backend.
#[derive(Debug)]
pub struct DeviceMath {
    queue: CommandQueue,
    device_type: DeviceType,
    blocking: bool,
    scalar_numeric: bool,
    fp64: bool,
}

fn check_mode(op: &'static str, mode: usize, table: usize) -> Result<()> {
    if mode >= table {
        return Err(Error::UnknownMode { op, mode });
    }
    Ok(())
}

fn reject_dtype(op: &'static str, dtype: DType, allow_complex: bool) -> Result<()> {
    if dtype == DType::Bool || (!allow_complex && dtype.is_complex()) {
        return Err(Error::UnsupportedDtype { op, dtype });
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Mode-indexed reduction strategies
// ----------------------------------------------------------------------

fn pairwise_sum<T: NumElement>(vals: &[T]) -> T {
    if vals.is_empty() {
        return T::zero();
    }
    let mut cur = vals.to_vec();
    while cur.len() > 1 {
        let half = cur.len() / 2;
        let mut next: Vec<T> = (0..half).map(|i| cur[2 * i].add(cur[2 * i + 1])).collect();
        if cur.len() % 2 == 1 {
            next.push(cur[cur.len() - 1]);
        }
        cur = next;
    }
    cur[0]
}

fn fold_sum<T: NumElement>(vals: &[T], mode: usize) -> T {
    match mode {
        // Single work-item loop.
        0 => vals.iter().fold(T::zero(), |a, &b| a.add(b)),
        // Two-pass: per-work-group partials, then a final pass.
        1 => {
            let partials: Vec<T> = vals
                .chunks(WORK_GROUP_SIZE)
                .map(|c| c.iter().fold(T::zero(), |a, &b| a.add(b)))
                .collect();
            partials.iter().fold(T::zero(), |a, &b| a.add(b))
        }
        // Pairwise tree.
        _ => pairwise_sum(vals),
    }
}

/// First-occurrence argmax of a value run, under the selected strategy.
fn fold_max<T: NumElement>(vals: &[T], mode: usize) -> (usize, T) {
    let beats = |challenger: T, champion: T| {
        matches!(challenger.try_cmp(champion), Some(std::cmp::Ordering::Greater))
    };
    match mode {
        0 => {
            let mut best = (0usize, vals[0]);
            for (i, &v) in vals.iter().enumerate().skip(1) {
                if beats(v, best.1) {
                    best = (i, v);
                }
            }
            best
        }
        1 => {
            let mut best: Option<(usize, T)> = None;
            for (g, chunk) in vals.chunks(WORK_GROUP_SIZE).enumerate() {
                let mut local = (0usize, chunk[0]);
                for (i, &v) in chunk.iter().enumerate().skip(1) {
                    if beats(v, local.1) {
                        local = (i, v);
                    }
                }
                let cand = (g * WORK_GROUP_SIZE + local.0, local.1);
                best = match best {
                    Some(b) if !beats(cand.1, b.1) => Some(b),
                    _ => Some(cand),
                };
            }
            best.unwrap_or((0, vals[0]))
        }
        _ => {
            let mut cur: Vec<(usize, T)> =
                vals.iter().copied().enumerate().collect();
            while cur.len() > 1 {
                let half = cur.len() / 2;
                let mut next: Vec<(usize, T)> = (0..half)
                    .map(|i| {
                        let (a, b) = (cur[2 * i], cur[2 * i + 1]);
                        if beats(b.1, a.1) {
                            b
                        } else {
                            a
                        }
                    })
                    .collect();
                if cur.len() % 2 == 1 {
                    next.push(cur[cur.len() - 1]);
                }
                cur = next;
            }
            cur[0]
        }
    }
}

impl DeviceMath {
    pub fn new(device_type: DeviceType) -> Result<Self> {
        info!(?device_type, "device backend initialized");
        Ok(Self {
            queue: CommandQueue::new(),
            device_type,
            blocking: false,
            scalar_numeric: false,
            fp64: true,
        })
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Force a synchronous finish after every call.
    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    pub fn blocking(&self) -> bool {
        self.blocking
    }

    /// Unwrap single-element results to a host [`Scalar`].
    pub fn set_scalar_numeric(&mut self, scalar_numeric: bool) {
        self.scalar_numeric = scalar_numeric;
    }

    pub fn scalar_numeric(&self) -> bool {
        self.scalar_numeric
    }

    /// Whether this device supports double-precision accumulation.
    pub fn fp64(&self) -> bool {
        self.fp64
    }

    /// Synchronization barrier draining all outstanding commands.
    pub fn finish(&self) -> Result<()> {
        self.queue.finish()
    }

    fn submit(&self, wait: &EventList, job: Job) -> Result<Event> {
        let event = self.queue.enqueue(wait.clone(), job)?;
        if self.blocking {
            event.wait()?;
        }
        Ok(event)
    }

    // ------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------

    /// Upload a host array window to a fresh device allocation.
    pub fn to_device(
        &self,
        host: &NDArray,
        wait: &EventList,
    ) -> Result<(DeviceArray, Event)> {
        // Host memory is snapshotted at enqueue, like a blocking write.
        let snapshot = host
            .buffer()
            .clone_data()
            .slice_range(host.offset(), host.size());
        let dev = Arc::new(DeviceBuffer::zeros(host.dtype(), host.size()));
        let dst = Arc::clone(&dev);
        debug!(count = host.size(), dtype = %host.dtype(), "to_device");
        let event = self.submit(
            wait,
            Box::new(move || {
                *dst.lock() = snapshot;
                Ok(())
            }),
        )?;
        Ok((DeviceArray::new(dev, host.shape().to_vec()), event))
    }

    /// Download a device array into a fresh host array.
    ///
    /// The host contents are valid once the returned event completes.
    pub fn read(&self, dev: &DeviceArray, wait: &EventList) -> Result<(NDArray, Event)> {
        let out = NDArray::alloc(dev.shape(), dev.dtype());
        let src = Arc::clone(dev.buffer());
        let dst = Arc::clone(out.buffer());
        let event = self.submit(
            wait,
            Box::new(move || {
                *dst.write() = src.lock().clone();
                Ok(())
            }),
        )?;
        Ok((out, event))
    }

    // ------------------------------------------------------------------
    // Reductions
    // ------------------------------------------------------------------

    /// Full sum of a device array.
    ///
    /// Modes: 0 single loop, 1 two-pass work-group partials, 2 pairwise
    /// tree. With `scalar_numeric` the single-element result is unwrapped to
    /// a host scalar (which synchronizes on the event).
    pub fn sum(
        &self,
        mode: usize,
        x: &DeviceArray,
        wait: &EventList,
    ) -> Result<(DeviceOutput, Event)> {
        check_mode("sum", mode, SUM_MODES)?;
        reject_dtype("sum", x.dtype(), true)?;
        let dtype = x.dtype();
        let out = Arc::new(DeviceBuffer::zeros(dtype, 1));
        let src = Arc::clone(x.buffer());
        let dst = Arc::clone(&out);
        let job: Job = numeric_dispatch!(dtype, "sum", T => {
            Box::new(move || {
                let cells = src.lock();
                let xs = T::slice(&cells).ok_or(BAD_KERNEL_ARGS)?;
                let total = fold_sum(xs, mode);
                drop(cells);
                let mut o = dst.lock();
                let os = T::slice_mut(&mut o).ok_or(BAD_KERNEL_ARGS)?;
                os[0] = total;
                Ok(())
            })
        });
        let event = self.submit(wait, job)?;
        if self.scalar_numeric {
            event.wait()?;
            let value = out.lock().get(0);
            return Ok((DeviceOutput::Scalar(value), event));
        }
        Ok((
            DeviceOutput::Array(DeviceArray::new(out, vec![1])),
            event,
        ))
    }

    /// Axis sum over the `(m, n, k)` decomposition: m rows before the
    /// reduced axis, n the reduced length, k elements after it. Output is
    /// `[m, k]`.
    pub fn reduce_sum(
        &self,
        mode: usize,
        x: &DeviceArray,
        m: usize,
        n: usize,
        k: usize,
        wait: &EventList,
    ) -> Result<(DeviceArray, Event)> {
        check_mode("reduce_sum", mode, REDUCE_MODES)?;
        reject_dtype("reduce_sum", x.dtype(), true)?;
        self.check_mnk(x, m, n, k)?;
        let dtype = x.dtype();
        let out = Arc::new(DeviceBuffer::zeros(dtype, m * k));
        let src = Arc::clone(x.buffer());
        let dst = Arc::clone(&out);
        let job: Job = numeric_dispatch!(dtype, "reduce_sum", T => {
            Box::new(move || {
                let cells = src.lock();
                let xs = T::slice(&cells).ok_or(BAD_KERNEL_ARGS)?;
                let mut sums = vec![T::zero(); m * k];
                let mut run = vec![T::zero(); n];
                for row in 0..m {
                    for col in 0..k {
                        for (j, slot) in run.iter_mut().enumerate() {
                            *slot = xs[(row * n + j) * k + col];
                        }
                        sums[row * k + col] = fold_sum(&run, mode);
                    }
                }
                drop(cells);
                let mut o = dst.lock();
                let os = T::slice_mut(&mut o).ok_or(BAD_KERNEL_ARGS)?;
                os.copy_from_slice(&sums);
                Ok(())
            })
        });
        let event = self.submit(wait, job)?;
        Ok((DeviceArray::new(out, vec![m, k]), event))
    }

    /// Axis max over the `(m, n, k)` decomposition; first occurrence wins
    /// ties in every mode.
    pub fn reduce_max(
        &self,
        mode: usize,
        x: &DeviceArray,
        m: usize,
        n: usize,
        k: usize,
        wait: &EventList,
    ) -> Result<(DeviceArray, Event)> {
        check_mode("reduce_max", mode, REDUCE_MODES)?;
        reject_dtype("reduce_max", x.dtype(), false)?;
        self.check_mnk_nonempty(x, m, n, k)?;
        let dtype = x.dtype();
        let out = Arc::new(DeviceBuffer::zeros(dtype, m * k));
        let src = Arc::clone(x.buffer());
        let dst = Arc::clone(&out);
        let job: Job = numeric_dispatch!(dtype, "reduce_max", T => {
            Box::new(move || {
                let cells = src.lock();
                let xs = T::slice(&cells).ok_or(BAD_KERNEL_ARGS)?;
                let mut maxes = vec![T::zero(); m * k];
                let mut run = vec![T::zero(); n];
                for row in 0..m {
                    for col in 0..k {
                        for (j, slot) in run.iter_mut().enumerate() {
                            *slot = xs[(row * n + j) * k + col];
                        }
                        maxes[row * k + col] = fold_max(&run, mode).1;
                    }
                }
                drop(cells);
                let mut o = dst.lock();
                let os = T::slice_mut(&mut o).ok_or(BAD_KERNEL_ARGS)?;
                os.copy_from_slice(&maxes);
                Ok(())
            })
        });
        let event = self.submit(wait, job)?;
        Ok((DeviceArray::new(out, vec![m, k]), event))
    }

    /// Axis argmax over the `(m, n, k)` decomposition; `Int32` indices into
    /// the reduced axis, first occurrence on ties.
    pub fn reduce_argmax(
        &self,
        mode: usize,
        x: &DeviceArray,
        m: usize,
        n: usize,
        k: usize,
        wait: &EventList,
    ) -> Result<(DeviceArray, Event)> {
        check_mode("reduce_argmax", mode, REDUCE_MODES)?;
        reject_dtype("reduce_argmax", x.dtype(), false)?;
        self.check_mnk_nonempty(x, m, n, k)?;
        let dtype = x.dtype();
        let out = Arc::new(DeviceBuffer::zeros(DType::Int32, m * k));
        let src = Arc::clone(x.buffer());
        let dst = Arc::clone(&out);
        let job: Job = numeric_dispatch!(dtype, "reduce_argmax", T => {
            Box::new(move || {
                let cells = src.lock();
                let xs = T::slice(&cells).ok_or(BAD_KERNEL_ARGS)?;
                let mut args = vec![0i32; m * k];
                let mut run = vec![T::zero(); n];
                for row in 0..m {
                    for col in 0..k {
                        for (j, slot) in run.iter_mut().enumerate() {
                            *slot = xs[(row * n + j) * k + col];
                        }
                        args[row * k + col] = fold_max(&run, mode).0 as i32;
                    }
                }
                drop(cells);
                let mut o = dst.lock();
                let os = i32::slice_mut(&mut o).ok_or(BAD_KERNEL_ARGS)?;
                os.copy_from_slice(&args);
                Ok(())
            })
        });
        let event = self.submit(wait, job)?;
        Ok((DeviceArray::new(out, vec![m, k]), event))
    }

    /// Row-wise softmax over a 2-D float array, stabilized by max
    /// subtraction. Modes select the reduction strategy for the row max and
    /// the exponential sum.
    pub fn softmax(
        &self,
        mode: usize,
        x: &DeviceArray,
        wait: &EventList,
    ) -> Result<(DeviceArray, Event)> {
        check_mode("softmax", mode, SOFTMAX_MODES)?;
        if !x.dtype().is_float() {
            return Err(Error::UnsupportedDtype {
                op: "softmax",
                dtype: x.dtype(),
            });
        }
        if x.ndim() != 2 || x.shape()[1] == 0 {
            return Err(Error::InvalidArgument(format!(
                "softmax expects a non-empty 2-D array, got {:?}",
                x.shape()
            )));
        }
        let (rows, cols) = (x.shape()[0], x.shape()[1]);
        let dtype = x.dtype();
        let out = Arc::new(DeviceBuffer::zeros(dtype, rows * cols));
        let src = Arc::clone(x.buffer());
        let dst = Arc::clone(&out);
        let job: Job = numeric_dispatch!(dtype, "softmax", T => {
            Box::new(move || {
                let cells = src.lock();
                let xs = T::slice(&cells).ok_or(BAD_KERNEL_ARGS)?;
                let mut result = vec![T::zero(); rows * cols];
                for r in 0..rows {
                    let row = &xs[r * cols..(r + 1) * cols];
                    let peak = fold_max(row, mode).1;
                    let exps: Vec<T> = row
                        .iter()
                        .map(|v| T::from_f64((v.to_f64() - peak.to_f64()).exp()))
                        .collect();
                    let denom = fold_sum(&exps, mode);
                    for (c, e) in exps.into_iter().enumerate() {
                        // denom >= exp(0) = 1 for the max element, never 0.
                        result[r * cols + c] =
                            T::from_f64(e.to_f64() / denom.to_f64());
                    }
                }
                drop(cells);
                let mut o = dst.lock();
                let os = T::slice_mut(&mut o).ok_or(BAD_KERNEL_ARGS)?;
                os.copy_from_slice(&result);
                Ok(())
            })
        });
        let event = self.submit(wait, job)?;
        Ok((DeviceArray::new(out, vec![rows, cols]), event))
    }

    /// `accum[indices[i], ...] += updates[i, ...]`; overlapping indices
    /// accumulate every contribution in every mode.
    ///
    /// Modes reorder the accumulation: 0 row loop, 1 work-group row tiles,
    /// 2 column-major, 3 per-target bucketing then add, 4 reversed rows.
    pub fn scatter_add(
        &self,
        mode: usize,
        indices: &DeviceArray,
        updates: &DeviceArray,
        accum: &DeviceArray,
        wait: &EventList,
    ) -> Result<Event> {
        check_mode("scatter_add", mode, SCATTER_ADD_MODES)?;
        let dtype = accum.dtype();
        reject_dtype("scatter_add", dtype, false)?;
        if dtype == DType::Float64 && !self.fp64 {
            return Err(Error::Unsupported(
                "fp64 scatter_add is not supported by this device".into(),
            ));
        }
        if !indices.dtype().is_integer() || indices.ndim() != 1 {
            return Err(Error::InvalidArgument(
                "scatter_add indices must be a rank-1 integer array".into(),
            ));
        }
        if updates.dtype() != dtype {
            return Err(Error::UnsupportedDtype {
                op: "scatter_add",
                dtype: updates.dtype(),
            });
        }
        if accum.ndim() == 0
            || updates.ndim() == 0
            || updates.shape()[0] != indices.shape()[0]
            || updates.shape()[1..] != accum.shape()[1..]
        {
            return Err(Error::ShapeMismatch(
                updates.shape().to_vec(),
                accum.shape().to_vec(),
            ));
        }
        let rows = indices.shape()[0];
        let targets = accum.shape()[0];
        let tail: usize = accum.shape()[1..].iter().product();

        let idx_buf = Arc::clone(indices.buffer());
        let upd_buf = Arc::clone(updates.buffer());
        let acc_buf = Arc::clone(accum.buffer());
        let job: Job = numeric_dispatch!(dtype, "scatter_add", T => {
            Box::new(move || {
                let coords: Vec<usize> = {
                    let cells = idx_buf.lock();
                    (0..rows)
                        .map(|i| {
                            let raw = cells.get(i).to_i64().map_err(|_| BAD_KERNEL_ARGS)?;
                            if raw < 0 || raw as usize >= targets {
                                return Err(BAD_SCATTER_INDEX);
                            }
                            Ok(raw as usize)
                        })
                        .collect::<std::result::Result<_, i32>>()?
                };
                let upd: Vec<T> = {
                    let cells = upd_buf.lock();
                    T::slice(&cells).ok_or(BAD_KERNEL_ARGS)?.to_vec()
                };
                let mut o = acc_buf.lock();
                let acc = T::slice_mut(&mut o).ok_or(BAD_KERNEL_ARGS)?;
                let add_row = |acc: &mut [T], i: usize| {
                    for t in 0..tail {
                        let dst = coords[i] * tail + t;
                        acc[dst] = acc[dst].add(upd[i * tail + t]);
                    }
                };
                match mode {
                    0 => (0..rows).for_each(|i| add_row(acc, i)),
                    1 => {
                        for tile in (0..rows).collect::<Vec<_>>().chunks(WORK_GROUP_SIZE) {
                            for &i in tile {
                                add_row(acc, i);
                            }
                        }
                    }
                    2 => {
                        for t in 0..tail {
                            for (i, &c) in coords.iter().enumerate() {
                                let dst = c * tail + t;
                                acc[dst] = acc[dst].add(upd[i * tail + t]);
                            }
                        }
                    }
                    3 => {
                        let mut buckets = vec![T::zero(); targets * tail];
                        for (i, &c) in coords.iter().enumerate() {
                            for t in 0..tail {
                                let dst = c * tail + t;
                                buckets[dst] = buckets[dst].add(upd[i * tail + t]);
                            }
                        }
                        for (slot, add) in acc.iter_mut().zip(&buckets) {
                            *slot = slot.add(*add);
                        }
                    }
                    _ => (0..rows).rev().for_each(|i| add_row(acc, i)),
                }
                Ok(())
            })
        });
        self.submit(wait, job)
    }

    fn check_mnk(&self, x: &DeviceArray, m: usize, n: usize, k: usize) -> Result<()> {
        if m * n * k != x.size() {
            return Err(Error::InvalidArgument(format!(
                "(m, n, k) = ({m}, {n}, {k}) does not cover {} elements",
                x.size()
            )));
        }
        Ok(())
    }

    fn check_mnk_nonempty(
        &self,
        x: &DeviceArray,
        m: usize,
        n: usize,
        k: usize,
    ) -> Result<()> {
        self.check_mnk(x, m, n, k)?;
        if n == 0 {
            return Err(Error::InvalidArgument(
                "cannot reduce an empty axis".into(),
            ));
        }
        Ok(())
    }
}
