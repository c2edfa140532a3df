use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A counting "items available" signal. Producers bump the count; the consumer waits
/// (with a timeout) for it to become non-zero and then drains it down to zero again,
/// matching a semaphore used purely for "is there anything to look at" notification.
pub struct Signal {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Signal {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        let mut count = self.count.lock().expect("signal mutex poisoned");
        *count += 1;
        self.condvar.notify_one();
    }

    /// Blocks until the count is non-zero or `timeout` elapses. Returns `true` if
    /// woken by a notification, draining the count back to zero either way it found
    /// work (the caller is expected to drain the whole ring before waiting again).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let count = self.count.lock().expect("signal mutex poisoned");
        if *count > 0 {
            let mut count = count;
            *count = 0;
            return true;
        }
        let (mut count, result) = self
            .condvar
            .wait_timeout(count, timeout)
            .expect("signal condvar poisoned");
        if *count > 0 {
            *count = 0;
            true
        } else {
            let _ = result;
            false
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn wait_returns_immediately_once_notified() {
        let signal = Signal::new();
        signal.notify();
        assert!(signal.wait_timeout(Duration::from_millis(50)));
    }

    #[test]
    fn wait_times_out_with_no_notification() {
        let signal = Signal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn notification_from_another_thread_wakes_waiter() {
        let signal = Arc::new(Signal::new());
        let producer = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.notify();
        });
        assert!(signal.wait_timeout(Duration::from_secs(1)));
        handle.join().unwrap();
    }
}
