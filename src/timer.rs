//! Correlation timer
//!
//! End-to-end request/response matching. Every outbound request that
//! expects a response registers its correlation id here together with a
//! deadline; the response resumes through [`Timer::add_response`], and a
//! deadline that elapses first resolves the slot with
//! [`RoutingError::Timeout`]. A slot is fulfilled exactly once.

use crate::error::RoutingError;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Callback fulfilled with the response payload or a timeout
pub type ResponseCallback = Box<dyn FnOnce(Result<Vec<u8>, RoutingError>) + Send>;

struct PendingEntry {
    callback: ResponseCallback,
    timer: JoinHandle<()>,
}

struct Inner {
    next_id: u32,
    pending: HashMap<u32, PendingEntry>,
}

/// Registry of outstanding request correlations
pub struct Timer {
    inner: Arc<Mutex<Inner>>,
}

impl Timer {
    /// Create an empty registry with a randomly-seeded id counter
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: rand::thread_rng().gen(),
                pending: HashMap::new(),
            })),
        }
    }

    /// A fresh correlation id: monotonic within this instance, never zero
    pub fn new_request_id(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.wrapping_add(1);
        if inner.next_id == 0 {
            inner.next_id = 1;
        }
        inner.next_id
    }

    /// Register a pending request.
    ///
    /// `callback` fires at most once: with the payload handed to
    /// [`Self::add_response`], or with [`RoutingError::Timeout`] when the
    /// deadline elapses first.
    pub fn add_request(&self, id: u32, deadline: Duration, callback: ResponseCallback) {
        let inner_handle = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let expired = inner_handle.lock().pending.remove(&id);
            if let Some(entry) = expired {
                debug!(id, "Request deadline elapsed");
                (entry.callback)(Err(RoutingError::Timeout));
            }
        });

        let stale = {
            let mut inner = self.inner.lock();
            inner.pending.insert(id, PendingEntry { callback, timer })
        };
        if let Some(entry) = stale {
            // An id collision can only come from the caller reusing ids
            entry.timer.abort();
            (entry.callback)(Err(RoutingError::Cancelled));
        }
    }

    /// Fulfil a pending request with `payload`.
    ///
    /// Unknown ids are dropped with a diagnostic; duplicate responses land
    /// here too, since the first one consumed the slot.
    pub fn add_response(&self, id: u32, payload: Vec<u8>) {
        let entry = self.inner.lock().pending.remove(&id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                (entry.callback)(Ok(payload));
            }
            None => {
                debug!(id, "Response for unknown correlation id dropped");
            }
        }
    }

    /// Cancel every pending request without fulfilling it
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock();
        for (_, entry) in inner.pending.drain() {
            entry.timer.abort();
        }
    }

    /// Number of outstanding requests
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
