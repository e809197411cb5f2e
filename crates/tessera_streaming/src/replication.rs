//! # Replication Hub
//!
//! Fan-out of tile payloads from the authority to remote viewers, and the
//! inbox through which viewers ask for tiles.
//!
//! ```text
//!                    ┌───────────────────┐
//!  StreamingService ─│ broadcast/send_to │──▶ subscriber inbox (one per viewer)
//!                    │                   │
//!  StreamingService ◀│ try_recv_request  │◀── shared request channel
//!                    └───────────────────┘
//! ```
//!
//! The subscriber list is the only structure shared between threads; it is
//! guarded by a `parking_lot::Mutex` and never held across a tile build.

use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::protocol::{SubscriberId, TileMessage, TilePayload, ViewerMessage};

struct Subscriber {
    id: SubscriberId,
    sender: Sender<TileMessage>,
}

/// Handles held by one remote viewer.
#[derive(Debug)]
pub struct Subscription {
    /// Assigned id.
    pub id: SubscriberId,
    /// Payloads from the authority.
    pub inbox: Receiver<TileMessage>,
    /// Requests to the authority.
    pub outbox: Sender<ViewerMessage>,
}

/// Authority-side subscriber registry.
pub struct ReplicationHub {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU32,
    request_tx: Sender<ViewerMessage>,
    request_rx: Receiver<ViewerMessage>,
}

impl ReplicationHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        let (request_tx, request_rx) = unbounded();
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            request_tx,
            request_rx,
        }
    }

    /// Registers a new remote viewer.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, inbox) = unbounded();
        self.subscribers.lock().push(Subscriber { id, sender });
        tracing::info!("Viewer subscribed (id: {})", id);
        Subscription {
            id,
            inbox,
            outbox: self.request_tx.clone(),
        }
    }

    /// Removes a viewer. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if removed {
            tracing::info!("Viewer unsubscribed (id: {})", id);
        }
        removed
    }

    /// Sends a payload to every viewer. Viewers whose inbox was dropped are
    /// removed. Returns the number of deliveries.
    pub fn broadcast(&self, payload: &TilePayload) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| {
            let delivered = s.sender.send(TileMessage::Payload(payload.clone())).is_ok();
            if !delivered {
                tracing::debug!("Dropping disconnected viewer {}", s.id);
            }
            delivered
        });
        subscribers.len()
    }

    /// Sends a payload to one viewer.
    pub fn send_to(&self, id: SubscriberId, payload: &TilePayload) -> bool {
        let subscribers = self.subscribers.lock();
        subscribers
            .iter()
            .find(|s| s.id == id)
            .is_some_and(|s| s.sender.send(TileMessage::Payload(payload.clone())).is_ok())
    }

    /// Number of subscribed viewers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Next pending viewer request, if any.
    #[must_use]
    pub fn try_recv_request(&self) -> Option<ViewerMessage> {
        self.request_rx.try_recv().ok()
    }
}

impl Default for ReplicationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplicationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationHub")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
