//! Cancellation and deadline scope for a request execution.
//!
//! A `Context` is cheap to clone and never changes once built; deriving a
//! child (`with_timeout`, `with_cancel`, ...) returns a new value that
//! observes all of its parent's signals plus its own. Cancellation is a
//! channel disconnect: the only sender sits in a slot shared by the
//! `CancelHandle` and the contexts derived from it, and `cancel` empties
//! the slot, waking every waiter. Dropping the handle does not cancel.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Select, Sender, TryRecvError};

use crate::error::RequestError;

type Slot = Arc<Mutex<Option<Sender<()>>>>;

#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    done: Vec<Receiver<()>>,
    // Keeps each sender alive until its handle cancels.
    slots: Vec<Slot>,
}

/// Cancels the context it was created with, and every context derived from
/// it. Clones cancel the same contexts.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    slot: Slot,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context; the earlier of the parent's deadline and `deadline` wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            done: self.done.clone(),
            slots: self.slots.clone(),
        }
    }

    /// Child context that ends when the returned handle's `cancel` is
    /// called.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = bounded(0);
        let slot: Slot = Arc::new(Mutex::new(Some(tx)));
        let mut child = self.clone();
        child.done.push(rx);
        child.slots.push(Arc::clone(&slot));
        (child, CancelHandle { slot })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether this context can ever end before the work it guards.
    pub fn is_bounded(&self) -> bool {
        self.deadline.is_some() || !self.done.is_empty()
    }

    /// The reason this context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<RequestError> {
        let cancelled = self
            .done
            .iter()
            .any(|rx| matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
        if cancelled {
            return Some(RequestError::Canceled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(RequestError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Block until `rx` yields a value or the context ends, whichever is
    /// first. `Ok(None)` means the sender went away without sending.
    pub(crate) fn wait<T>(&self, rx: &Receiver<T>) -> Result<Option<T>, RequestError> {
        let mut sel = Select::new();
        let value_idx = sel.recv(rx);
        for done in &self.done {
            sel.recv(done);
        }

        let oper = match self.deadline {
            Some(deadline) => match sel.select_deadline(deadline) {
                Ok(oper) => oper,
                Err(_) => return Err(RequestError::DeadlineExceeded),
            },
            None => sel.select(),
        };

        let idx = oper.index();
        if idx == value_idx {
            return Ok(oper.recv(rx).ok());
        }
        // Only disconnects ever complete a `done` receiver.
        let _ = oper.recv(&self.done[idx - 1]);
        Err(RequestError::Canceled)
    }
}
