//! Small shared helpers: byte-key arithmetic and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{CarrelError, Result};

/// Return the smallest byte key strictly greater than every key with the
/// given prefix, or `None` when no such key exists (all bytes were 0xFF).
///
/// Used to turn a prefix into an exclusive upper bound for range scans:
/// the keys matching prefix `p` are exactly `[p, increment_key(p))`.
pub fn increment_key(key: &[u8]) -> Option<Vec<u8>> {
    let mut out = key.to_vec();
    while let Some(last) = out.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(out);
        }
        out.pop();
    }
    None
}

/// Cooperative cancellation token with an optional deadline.
///
/// Cloned freely; all clones share one flag. Long-running phases (sorted-run
/// merges, the commit merge pass, merge-join loops) call [`CancelToken::check`]
/// periodically and abort with `Cancelled` or `Timeout`.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Create a token that never expires.
    pub fn new() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Create a token that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Request cancellation. All clones observe the flag.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested (ignores the deadline).
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Return an error if the token was cancelled or the deadline passed.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.flag.load(Ordering::Relaxed) {
            return Err(CarrelError::cancelled(what.to_string()));
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(CarrelError::timeout(what.to_string()));
        }
        Ok(())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}
