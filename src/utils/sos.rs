use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Stop handle shared by the dispatch loop and everything that may end it.
///
/// Every call to [`SignalOfStop::cancel`] is counted, but only the first one
/// flips the flag and wakes the waiters.
#[derive(Debug)]
pub struct SignalOfStop {
    // Shared state between clones
    shared: Arc<SharedState>,
}

#[derive(Debug)]
struct SharedState {
    closing: AtomicBool,
    requests: AtomicU64,
    mutex: Mutex<()>,
    condvar: Condvar,
    notify: Notify,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop {
            shared: Arc::new(SharedState {
                closing: AtomicBool::new(false),
                requests: AtomicU64::new(0),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Request a stop. Returns `true` for the request that actually stopped.
    pub fn cancel(&self) -> bool {
        self.shared.requests.fetch_add(1, Ordering::Relaxed);

        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return false;
        }

        // Lock briefly to synchronize with waiting threads
        let _guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared.condvar.notify_all();
        self.shared.notify.notify_waiters();
        true
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    /// How many times a stop was requested, duplicates included.
    pub fn requests(&self) -> u64 {
        self.shared.requests.load(Ordering::Relaxed)
    }

    pub fn wait_cancellation(&self) {
        let mut guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while !self.cancelled() {
            guard = self
                .shared
                .condvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks up to `timeout`; returns whether the stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (_guard, _) = self
            .shared
            .condvar
            .wait_timeout_while(guard, timeout, |_| !self.cancelled())
            .unwrap_or_else(PoisonError::into_inner);
        self.cancelled()
    }

    /// Resolves once a stop was requested.
    pub async fn cancelled_async(&self) {
        loop {
            let notified = self.shared.notify.notified();
            if self.cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for SignalOfStop {
    fn default() -> Self {
        Self::new()
    }
}

// Implementing the Clone trait
impl Clone for SignalOfStop {
    fn clone(&self) -> SignalOfStop {
        SignalOfStop {
            shared: Arc::clone(&self.shared),
        }
    }
}
