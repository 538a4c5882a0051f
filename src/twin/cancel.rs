//! Process-wide cancellation signal
//!
//! One [`CancellationSource`] fires the signal exactly once. Tasks hold
//! [`CancellationToken`] clones, check it at the top of every iteration and
//! sleep through [`CancellationToken::sleep`], which returns as soon as the
//! signal fires instead of waiting out the whole period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

/// Owner side of the signal
#[derive(Debug)]
pub struct CancellationSource {
    flag: Arc<AtomicBool>,
    // Dropping the sender disconnects every receiver, waking sleepers
    wake: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// Observer side of the signal
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    rx: Receiver<()>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            wake: Mutex::new(Some(tx)),
            rx,
        }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            flag: Arc::clone(&self.flag),
            rx: self.rx.clone(),
        }
    }

    /// Fire the signal. Later calls are no-ops.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        self.wake.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for `period` or until cancelled. Returns `true` when cancelled.
    pub fn sleep(&self, period: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            // Nothing is ever sent; any other outcome means the sender is gone
            _ => true,
        }
    }
}
