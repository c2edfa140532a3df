mod ring;
mod signal;

pub use ring::RingBuffer;
pub use signal::Signal;

use crate::error::{Error, Result};
use std::sync::Mutex;
use std::time::Duration;

/// A bounded multi-producer, single-consumer queue: a ring buffer behind a mutex plus
/// a counting signal so the consumer can block efficiently instead of spinning.
///
/// Producer operations (`try_send`) never block; they fail with `QueueFull` instead
/// of growing the ring. Consumer operations (`recv`) may block up to a timeout.
pub struct Mailbox<T> {
    ring: Mutex<RingBuffer<T>>,
    signal: Signal,
}

impl<T> Mailbox<T> {
    pub fn new(capacity: usize) -> Self {
        Mailbox {
            ring: Mutex::new(RingBuffer::new(capacity)),
            signal: Signal::new(),
        }
    }

    pub fn try_send(&self, item: T) -> Result<()> {
        let mut ring = self.ring.lock().expect("mailbox mutex poisoned");
        match ring.push(item) {
            Ok(()) => {
                drop(ring);
                self.signal.notify();
                Ok(())
            }
            Err(_rejected) => Err(Error::QueueFull),
        }
    }

    /// Pops one item if present, without waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.ring.lock().expect("mailbox mutex poisoned").pop()
    }

    /// Waits up to `timeout` for an item, then pops and returns whatever is present
    /// (there may be more than one; the caller should keep draining with
    /// `try_recv` until it returns `None` before waiting again).
    pub fn recv(&self, timeout: Duration) -> Option<T> {
        if let Some(item) = self.try_recv() {
            return Some(item);
        }
        if self.signal.wait_timeout(timeout) {
            self.try_recv()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().expect("mailbox mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().expect("mailbox mutex poisoned").capacity()
    }
}
