//! Acknowledgement engine
//!
//! Per-hop reliable delivery. Every outbound message that needs an ack is
//! snapshotted here under a fresh ack id; if the adjacent peer does not
//! confirm receipt before the deadline, the registered handler retransmits
//! and the entry's attempt counter climbs. After `max_attempts` expiries the
//! entry is evicted silently — the layer above uses correlation timeouts as
//! its failure signal, not this engine.
//!
//! Retransmissions re-enter through [`Acknowledgement::add`] with the same
//! ack id, which is what advances the attempt counter. Each (re)arm spawns a
//! fresh timer task carrying the entry's generation number, so a timer that
//! lost a race with an ack or a re-arm observes the stale generation and
//! exits without touching the entry.

use crate::id::NodeId;
use crate::protocol::{self, WireMessage};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Per-hop acknowledgement token
pub type AckId = u32;

/// Continuation run when an ack deadline expires (a retransmit, in practice)
pub type AckHandler = Arc<dyn Fn() + Send + Sync>;

struct AckEntry {
    ack_id: AckId,
    handler: AckHandler,
    attempts: u8,
    generation: u64,
    timer: JoinHandle<()>,
}

struct Inner {
    next_id: u32,
    entries: Vec<AckEntry>,
}

/// Tracks outstanding per-hop acknowledgements and drives retransmission
pub struct Acknowledgement {
    max_attempts: u8,
    inner: Arc<Mutex<Inner>>,
}

impl Acknowledgement {
    /// Create an engine giving up after `max_attempts` unanswered deadlines
    pub fn new(max_attempts: u8) -> Self {
        Self {
            max_attempts,
            inner: Arc::new(Mutex::new(Inner {
                next_id: rand::thread_rng().gen(),
                entries: Vec::new(),
            })),
        }
    }

    /// A fresh ack id: monotonic within this instance, randomly seeded at
    /// construction, never zero
    pub fn new_ack_id(&self) -> AckId {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.wrapping_add(1);
        if inner.next_id == 0 {
            inner.next_id = 1;
        }
        inner.next_id
    }

    /// Register `message` for per-hop confirmation, arming a deadline of
    /// `timeout`.
    ///
    /// First registration of an ack id arms the retransmit handler. A repeat
    /// registration with the same id is the retransmit path: it bumps the
    /// attempt counter and re-arms, switching the continuation to eviction
    /// once the final attempt is in flight.
    pub fn add(&self, message: &WireMessage, handler: AckHandler, timeout: Duration) {
        let ack_id = message.ack_token();
        if ack_id == 0 {
            warn!("Refusing to track a message without an ack id");
            return;
        }

        let mut inner = self.inner.lock();
        match inner.entries.iter().position(|e| e.ack_id == ack_id) {
            None => {
                let generation = 0;
                let timer = self.arm_retry(ack_id, generation, Arc::clone(&handler), timeout);
                inner.entries.push(AckEntry {
                    ack_id,
                    handler,
                    attempts: 0,
                    generation,
                    timer,
                });
                debug!(ack_id, "Tracking message for acknowledgement");
            }
            Some(pos) => {
                let entry = &mut inner.entries[pos];
                entry.attempts += 1;
                entry.generation += 1;
                entry.timer.abort();
                debug!(ack_id, attempts = entry.attempts, "Re-arming ack deadline");
                let attempts = entry.attempts;
                let generation = entry.generation;
                let retry_handler = Arc::clone(&entry.handler);
                entry.timer = if attempts >= self.max_attempts {
                    self.arm_eviction(ack_id, generation, timeout)
                } else {
                    self.arm_retry(ack_id, generation, retry_handler, timeout)
                };
            }
        }
    }

    /// Drop the entry for `ack_id` and cancel its timer; silent if unknown
    pub fn remove(&self, ack_id: AckId) {
        let mut inner = self.inner.lock();
        match inner.entries.iter().position(|e| e.ack_id == ack_id) {
            Some(pos) => {
                let entry = inner.entries.remove(pos);
                entry.timer.abort();
                debug!(ack_id, outstanding = inner.entries.len(), "Cleared ack entry");
            }
            None => {
                debug!(ack_id, "No ack entry to clear");
            }
        }
    }

    /// Process an inbound ack carrier
    pub fn handle_ack_message(&self, ack_id: AckId) {
        if ack_id == 0 {
            warn!("Dropping ack carrier without an ack id");
            return;
        }
        self.remove(ack_id);
    }

    /// Whether `message` requires per-hop confirmation.
    ///
    /// Ack carriers, close-list broadcasts, responses already on their relay
    /// hop, and messages without a source never take an ack.
    pub fn needs_ack(&self, message: &WireMessage) -> bool {
        if protocol::is_ack_message(message) || protocol::is_group_update(message) {
            return false;
        }
        let destination = message.destination_id.as_deref().unwrap_or_default();
        let relay = message.relay_id.as_deref().unwrap_or_default();
        if message.is_response() && destination == relay {
            return false;
        }
        if message.source_missing() || message.source().map_or(true, |id| id.is_zero()) {
            return false;
        }
        true
    }

    /// Cancel every outstanding entry
    pub fn remove_all(&self) {
        let mut inner = self.inner.lock();
        for entry in inner.entries.drain(..) {
            entry.timer.abort();
        }
    }

    /// Number of live entries
    pub fn outstanding(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Attempt count of a live entry
    pub fn attempts(&self, ack_id: AckId) -> Option<u8> {
        self.inner
            .lock()
            .entries
            .iter()
            .find(|e| e.ack_id == ack_id)
            .map(|e| e.attempts)
    }

    fn arm_retry(
        &self,
        ack_id: AckId,
        generation: u64,
        handler: AckHandler,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let live = {
                let guard = inner.lock();
                guard
                    .entries
                    .iter()
                    .any(|e| e.ack_id == ack_id && e.generation == generation)
            };
            if live {
                handler();
            }
        })
    }

    fn arm_eviction(&self, ack_id: AckId, generation: u64, timeout: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut guard = inner.lock();
            if let Some(pos) = guard
                .entries
                .iter()
                .position(|e| e.ack_id == ack_id && e.generation == generation)
            {
                guard.entries.remove(pos);
                debug!(ack_id, "Ack attempts exhausted, evicting entry");
            }
        })
    }
}

impl Drop for Acknowledgement {
    fn drop(&mut self) {
        self.remove_all();
    }
}

/// Build the ack carrier confirming receipt of `message`, addressed back to
/// the adjacent sender
pub fn build_ack_carrier(message: &WireMessage, own_id: NodeId) -> WireMessage {
    WireMessage {
        msg_type: Some(crate::protocol::MessageType::Acknowledgement as i32),
        request: Some(false),
        direct: Some(true),
        source_id: Some(own_id.to_vec()),
        destination_id: message.last_id.clone().or_else(|| message.source_id.clone()),
        ack_id: Some(message.ack_token()),
        hops_to_live: Some(1),
        ..WireMessage::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tracked_message(ack_id: AckId) -> WireMessage {
        WireMessage {
            msg_type: Some(MessageType::NodeLevel as i32),
            request: Some(true),
            direct: Some(true),
            source_id: Some(NodeId::random().to_vec()),
            destination_id: Some(NodeId::random().to_vec()),
            id: Some(1),
            ack_id: Some(ack_id),
            hops_to_live: Some(10),
            ..WireMessage::default()
        }
    }

    #[test]
    fn ack_ids_are_monotonic_and_nonzero() {
        let engine = Acknowledgement::new(3);
        let first = engine.new_ack_id();
        let second = engine.new_ack_id();
        assert_ne!(first, 0);
        assert_ne!(second, 0);
        assert_eq!(second, first.wrapping_add(1).max(1));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_handler_and_readd_counts_attempts() {
        let engine = Acknowledgement::new(3);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let handler: AckHandler = Arc::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        let message = tracked_message(7);
        engine.add(&message, Arc::clone(&handler), Duration::from_secs(1));
        assert_eq!(engine.attempts(7), Some(0));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // The retransmit path re-adds under the same id
        engine.add(&message, Arc::clone(&handler), Duration::from_secs(1));
        assert_eq!(engine.attempts(7), Some(1));
        assert_eq!(engine.outstanding(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_receipt_cancels_the_timer() {
        let engine = Acknowledgement::new(3);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let handler: AckHandler = Arc::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        engine.add(&tracked_message(9), handler, Duration::from_secs(1));
        engine.handle_ack_message(9);
        assert_eq!(engine.outstanding(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn final_attempt_evicts_instead_of_retrying() {
        let engine = Acknowledgement::new(2);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let handler: AckHandler = Arc::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        let message = tracked_message(11);
        engine.add(&message, Arc::clone(&handler), Duration::from_secs(1));
        engine.add(&message, Arc::clone(&handler), Duration::from_secs(1));
        // Third add reaches max_attempts: the continuation becomes eviction
        engine.add(&message, Arc::clone(&handler), Duration::from_secs(1));
        assert_eq!(engine.attempts(11), Some(2));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(engine.outstanding(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn needs_ack_exclusions() {
        let engine = Acknowledgement::new(3);

        let mut message = tracked_message(1);
        assert!(engine.needs_ack(&message));

        message.msg_type = Some(MessageType::Acknowledgement as i32);
        assert!(!engine.needs_ack(&message));

        message.msg_type = Some(MessageType::ClosestNodesUpdate as i32);
        assert!(!engine.needs_ack(&message));

        // Response on its relay hop
        let mut relayed = tracked_message(2);
        relayed.request = Some(false);
        relayed.relay_id = relayed.destination_id.clone();
        assert!(!engine.needs_ack(&relayed));

        // No source id
        let mut anonymous = tracked_message(3);
        anonymous.source_id = None;
        assert!(!engine.needs_ack(&anonymous));
        anonymous.source_id = Some(NodeId::zero().to_vec());
        assert!(!engine.needs_ack(&anonymous));
    }
}
