//! Fan-out of relay/mode snapshots to push subscribers.
//!
//! Every accepted change is published as a full [`RelaySnapshot`], never a
//! delta, so a subscriber that lags or drops a message converges on the next
//! one. Publishing an unchanged snapshot is a no-op.

use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

use crate::relay::RelaySnapshot;

pub struct StateBroadcaster {
    tx: broadcast::Sender<RelaySnapshot>,
    last: Mutex<Option<RelaySnapshot>>,
}

impl StateBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            last: Mutex::new(None),
        }
    }

    /// Publish `snapshot` to every subscriber unless it equals the last one
    /// published. Returns whether it was sent.
    pub fn push_if_changed(&self, snapshot: &RelaySnapshot) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(snapshot) {
            return false;
        }
        *last = Some(snapshot.clone());

        // No receivers is fine: the snapshot is still kept for late joiners.
        let receivers = self.tx.send(snapshot.clone()).unwrap_or(0);
        debug!(receivers, mode = %snapshot.mode, "relay snapshot published");
        true
    }

    /// Register a subscriber. Returns the snapshot it should be sent first
    /// (if anything has been published yet) and its receiver for later ones.
    /// Taken under the same lock as publishing, so nothing falls in between.
    pub fn subscribe(&self) -> (Option<RelaySnapshot>, broadcast::Receiver<RelaySnapshot>) {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        (last.clone(), self.tx.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
