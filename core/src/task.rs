//! Completion handles for background work, polled from the scheduler.
//!
//! The engine never blocks on I/O: external collaborators hand back a
//! [`TaskHandle`] which the scheduler polls once per tick. A handle is
//! backed either by a worker thread (with a `Weak` drop-check so a worker
//! that died without answering is detected) or by an already-complete value
//! for synchronous implementations and test fakes.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, PartialEq, Eq)]
pub enum TaskPoll<T> {
    /// Still running, poll again next tick.
    Pending,
    Ready(T),
    /// The worker went away without producing a value.
    Gone,
}

pub struct TaskHandle<T> {
    receiver: Receiver<T>,
    dropcheck: Weak<()>,
    ready_sync: bool,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Runs `work` on a worker thread; the result is delivered through the
    /// handle on a later poll.
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let alive = Arc::new(());
        let dropcheck = Arc::downgrade(&alive);
        thread::spawn(move || {
            let _alive = alive;
            let _ = sender.send(work());
        });
        Self {
            receiver,
            dropcheck,
            ready_sync: false,
        }
    }

    /// Wraps an already-computed value. The first poll returns it.
    pub fn ready(value: T) -> Self {
        let (sender, receiver) = mpsc::channel();
        let _ = sender.send(value);
        Self {
            receiver,
            dropcheck: Weak::new(),
            ready_sync: true,
        }
    }

    /// Non-blocking check. After `Ready` or `Gone` the handle is spent and
    /// must not be polled again.
    pub fn poll(&mut self) -> TaskPoll<T> {
        match self.receiver.try_recv() {
            Ok(value) => TaskPoll::Ready(value),
            Err(TryRecvError::Empty) => {
                if !self.ready_sync && self.dropcheck.upgrade().is_none() {
                    // Worker finished; the value (if any) would have been
                    // in the channel already.
                    TaskPoll::Gone
                } else {
                    TaskPoll::Pending
                }
            }
            Err(TryRecvError::Disconnected) => TaskPoll::Gone,
        }
    }
}

/// Millisecond budget for one frame's slice of main-thread work.
///
/// `consumed` checks wall time against the budget; a zero or negative
/// budget means "one step per frame" (the first check already reports
/// exhausted, but callers always perform at least one step before asking).
#[derive(Debug, Copy, Clone)]
pub struct FrameBudget {
    started: Instant,
    limit: Duration,
}

impl FrameBudget {
    pub fn start(limit_ms: f32) -> Self {
        Self {
            started: Instant::now(),
            limit: Duration::from_secs_f32(limit_ms.max(0.0) / 1000.0),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    pub fn elapsed_ms(&self) -> f32 {
        self.started.elapsed().as_secs_f32() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_handle_resolves_on_first_poll() {
        let mut handle = TaskHandle::ready(7u32);
        assert_eq!(handle.poll(), TaskPoll::Ready(7));
    }

    #[test]
    fn spawned_handle_eventually_resolves() {
        let mut handle = TaskHandle::spawn(|| 21 * 2);
        loop {
            match handle.poll() {
                TaskPoll::Pending => thread::yield_now(),
                TaskPoll::Ready(v) => {
                    assert_eq!(v, 42);
                    break;
                }
                TaskPoll::Gone => panic!("worker vanished"),
            }
        }
    }

    #[test]
    fn panicked_worker_reports_gone() {
        let mut handle: TaskHandle<u32> = TaskHandle::spawn(|| panic!("worker died"));
        loop {
            match handle.poll() {
                TaskPoll::Pending => thread::yield_now(),
                TaskPoll::Gone => break,
                TaskPoll::Ready(_) => panic!("value from a panicked worker"),
            }
        }
    }

    #[test]
    fn zero_budget_is_immediately_exhausted() {
        let budget = FrameBudget::start(0.0);
        assert!(budget.exhausted());
    }
}
