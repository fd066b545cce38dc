// ABOUTME: Live per-session fan-out of appended events to current subscribers
// ABOUTME: Bounded broadcast channels; slow subscribers lag instead of blocking publishers

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::types::Event;

/// Per-subscriber buffer when none is configured
pub const DEFAULT_BUFFER: usize = 256;

pub struct EventBus {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Deliver an event to everyone currently subscribed to the session.
    /// Never waits on subscribers. Returns how many received it.
    pub async fn publish(&self, session_id: &str, event: Event) -> usize {
        let channels = self.channels.read().await;
        match channels.get(session_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Receive events published from now on
    pub async fn subscribe(&self, session_id: &str) -> broadcast::Receiver<Event> {
        let mut channels = self.channels.write().await;
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Creating event channel for session {}", session_id);
                broadcast::channel(self.capacity).0
            })
            .subscribe()
    }

    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(session_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drop the session's channel; subscribers drain what they have and then end
    pub async fn close(&self, session_id: &str) {
        let mut channels = self.channels.write().await;
        if channels.remove(session_id).is_some() {
            debug!("Closed event channel for session {}", session_id);
        }
    }
}
