//! Single-use rendezvous pairing one blocked caller with one completion.
//!
//! `pair()` hands out exactly one [`Signal`] and one [`Waiter`]; neither is
//! `Clone` and both are consumed by use. Dropping an unused `Signal`
//! releases the waiter with [`Outcome::Abandoned`], so every exit path of
//! the signalling side unblocks the caller.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Signaled(T),
    /// The signal was dropped without a value.
    Abandoned,
    TimedOut,
}

impl<T> Outcome<T> {
    pub fn is_signaled(&self) -> bool {
        matches!(self, Outcome::Signaled(_))
    }
}

enum Completion<T> {
    Signaled(T),
    Abandoned,
}

struct Slot<T> {
    completion: Mutex<Option<Completion<T>>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn complete(&self, completion: Completion<T>) {
        let mut guard = self.completion.lock();
        if guard.is_none() {
            *guard = Some(completion);
        }
        self.ready.notify_one();
    }
}

pub struct Signal<T> {
    slot: Option<Arc<Slot<T>>>,
}

pub struct Waiter<T> {
    slot: Arc<Slot<T>>,
}

pub fn pair<T>() -> (Signal<T>, Waiter<T>) {
    let slot = Arc::new(Slot {
        completion: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        Signal {
            slot: Some(slot.clone()),
        },
        Waiter { slot },
    )
}

impl<T> Signal<T> {
    pub fn signal(mut self, value: T) {
        if let Some(slot) = self.slot.take() {
            slot.complete(Completion::Signaled(value));
        }
    }
}

impl<T> Drop for Signal<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.complete(Completion::Abandoned);
        }
    }
}

impl<T> Waiter<T> {
    /// Parks until signaled, abandoned, or `timeout` elapses. Spurious wakeups are absorbed.
    pub fn wait(self, timeout: Duration) -> Outcome<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.slot.completion.lock();
        loop {
            if let Some(completion) = guard.take() {
                return completion.into_outcome();
            }
            match deadline {
                Some(deadline) => {
                    if self.slot.ready.wait_until(&mut guard, deadline).timed_out() {
                        return guard
                            .take()
                            .map(Completion::into_outcome)
                            .unwrap_or(Outcome::TimedOut);
                    }
                }
                None => self.slot.ready.wait(&mut guard),
            }
        }
    }
}

impl<T> Completion<T> {
    fn into_outcome(self) -> Outcome<T> {
        match self {
            Completion::Signaled(value) => Outcome::Signaled(value),
            Completion::Abandoned => Outcome::Abandoned,
        }
    }
}
