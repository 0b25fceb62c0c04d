//! Simulated OpenCL-style events.
//!
//! An [`Event`] is the completion handle of one enqueued device command. In a
//! real backend it would wrap `cl_event`; here it carries a condvar-signaled
//! status so the synchronization contract is testable without a driver.
//! Ordering between commands exists only through caller-supplied
//! [`EventList`] wait-lists or an explicit queue `finish()`.

use crate::{Error, Result};
use std::sync::{Arc, Condvar, Mutex};

/// Execution status of an enqueued device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Enqueued but not started.
    Queued,
    /// Currently executing on the device.
    Running,
    /// Completed successfully.
    Complete,
    /// Failed with a vendor error code.
    Error(i32),
}

#[derive(Debug)]
struct EventInner {
    status: Mutex<EventStatus>,
    done: Condvar,
}

/// Completion handle for one enqueued device command.
#[derive(Debug, Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(EventInner {
                status: Mutex::new(EventStatus::Queued),
                done: Condvar::new(),
            }),
        }
    }

    /// Current status.
    pub fn status(&self) -> EventStatus {
        match self.inner.status.lock() {
            Ok(g) => *g,
            Err(p) => *p.into_inner(),
        }
    }

    /// Whether the event reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self.status(), EventStatus::Complete | EventStatus::Error(_))
    }

    /// Block until the command finishes; failures surface the device code.
    pub fn wait(&self) -> Result<()> {
        let mut status = match self.inner.status.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        while matches!(*status, EventStatus::Queued | EventStatus::Running) {
            status = match self.inner.done.wait(status) {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
        }
        match *status {
            EventStatus::Error(code) => Err(Error::Device { code }),
            _ => Ok(()),
        }
    }

    fn transition(&self, next: EventStatus) {
        let mut status = match self.inner.status.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        *status = next;
        self.inner.done.notify_all();
    }

    pub(crate) fn set_running(&self) {
        self.transition(EventStatus::Running);
    }

    pub(crate) fn set_complete(&self) {
        self.transition(EventStatus::Complete);
    }

    pub(crate) fn set_error(&self, code: i32) {
        self.transition(EventStatus::Error(code));
    }
}

/// Caller-supplied wait-list: the commands an enqueue depends on.
#[derive(Debug, Clone, Default)]
pub struct EventList {
    events: Vec<Event>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Block until every listed event finishes; the first failure wins.
    pub fn wait(&self) -> Result<()> {
        for ev in &self.events {
            ev.wait()?;
        }
        Ok(())
    }
}

impl From<Event> for EventList {
    fn from(event: Event) -> Self {
        Self {
            events: vec![event],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_new_event_is_queued() {
        let ev = Event::new();
        assert_eq!(ev.status(), EventStatus::Queued);
        assert!(!ev.is_finished());
    }

    #[test]
    fn test_wait_unblocks_on_complete() {
        let ev = Event::new();
        let waiter = ev.clone();
        let handle = thread::spawn(move || waiter.wait());
        thread::sleep(Duration::from_millis(5));
        ev.set_running();
        ev.set_complete();
        handle.join().unwrap().unwrap();
        assert_eq!(ev.status(), EventStatus::Complete);
    }

    #[test]
    fn test_wait_surfaces_device_code() {
        let ev = Event::new();
        ev.set_error(-42);
        let err = ev.wait().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(ev.status(), EventStatus::Error(-42));
    }

    #[test]
    fn test_event_list_waits_for_all() {
        let a = Event::new();
        let b = Event::new();
        let mut list = EventList::new();
        list.push(a.clone());
        list.push(b.clone());
        assert_eq!(list.len(), 2);
        a.set_complete();
        b.set_complete();
        list.wait().unwrap();
    }
}
