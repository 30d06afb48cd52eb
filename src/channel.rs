//! Per-frontend event channels
//!
//! Each connected frontend (a browser tab or the extension popup) holds an
//! event stream keyed by its target id. A target is available while at
//! least one stream for it is open.

use crate::router::{EventSink, OutboundEvent, RouterError};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Buffered events per target before a slow reader starts lagging
const TARGET_CAPACITY: usize = 1024;

#[derive(Default)]
pub struct TargetRegistry {
    senders: Mutex<HashMap<String, broadcast::Sender<OutboundEvent>>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an event stream for `target`
    pub fn subscribe(&self, target: &str) -> broadcast::Receiver<OutboundEvent> {
        let mut senders = self.senders.lock();
        senders.retain(|_, sender| sender.receiver_count() > 0);
        senders
            .entry(target.to_string())
            .or_insert_with(|| broadcast::channel(TARGET_CAPACITY).0)
            .subscribe()
    }

    /// Number of targets with an open stream
    pub fn connected(&self) -> usize {
        self.senders
            .lock()
            .values()
            .filter(|sender| sender.receiver_count() > 0)
            .count()
    }
}

impl EventSink for TargetRegistry {
    fn is_available(&self, target: &str) -> bool {
        self.senders
            .lock()
            .get(target)
            .is_some_and(|sender| sender.receiver_count() > 0)
    }

    fn deliver(&self, target: &str, event: OutboundEvent) -> Result<(), RouterError> {
        let senders = self.senders.lock();
        let sender = senders.get(target).ok_or(RouterError::TargetUnavailable)?;
        sender
            .send(event)
            .map(|_| ())
            .map_err(|_| RouterError::TargetUnavailable)
    }
}
