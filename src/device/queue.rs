//! In-order command queue backed by a dedicated worker thread.
//!
//! Commands execute in submission order on the worker; each carries a
//! caller-supplied wait-list honored before the command starts, and signals
//! its own [`Event`] on completion. `finish()` is the synchronization
//! barrier draining every outstanding command.

use super::event::{Event, EventList};
use crate::{Error, Result};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Vendor code reported when a command's wait-list contains a failure.
const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;

pub(crate) type Job = Box<dyn FnOnce() -> std::result::Result<(), i32> + Send + 'static>;

struct Command {
    job: Job,
    wait: EventList,
    event: Event,
}

#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    drained: Condvar,
}

/// In-order device command queue.
#[derive(Debug)]
pub(crate) struct CommandQueue {
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    pending: Arc<Pending>,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = channel::<Command>();
        let pending = Arc::new(Pending::default());
        let worker_pending = Arc::clone(&pending);
        let worker = thread::spawn(move || {
            while let Ok(cmd) = receiver.recv() {
                if cmd.wait.wait().is_err() {
                    cmd.event
                        .set_error(EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
                } else {
                    cmd.event.set_running();
                    match (cmd.job)() {
                        Ok(()) => cmd.event.set_complete(),
                        Err(code) => cmd.event.set_error(code),
                    }
                }
                let mut count = match worker_pending.count.lock() {
                    Ok(g) => g,
                    Err(p) => p.into_inner(),
                };
                *count -= 1;
                worker_pending.drained.notify_all();
            }
        });
        Self {
            sender: Some(sender),
            worker: Some(worker),
            pending,
        }
    }

    /// Submit a command; it starts after its wait-list completes.
    pub(crate) fn enqueue(&self, wait: EventList, job: Job) -> Result<Event> {
        let event = Event::new();
        {
            let mut count = match self.pending.count.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            *count += 1;
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::Unsupported("command queue is shut down".into()))?;
        debug!(waits = wait.len(), "device command enqueued");
        sender
            .send(Command {
                job,
                wait,
                event: event.clone(),
            })
            .map_err(|_| Error::Unsupported("command queue worker is gone".into()))?;
        Ok(event)
    }

    /// Barrier: block until every submitted command has finished.
    pub(crate) fn finish(&self) -> Result<()> {
        let mut count = match self.pending.count.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        while *count > 0 {
            count = match self.pending.drained.wait(count) {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
        }
        Ok(())
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
