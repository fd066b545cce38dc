// ABOUTME: Session event hub combining the durable log with live fan-out
// ABOUTME: Records events in order and serves gap-free catch-up streams to late subscribers

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use crate::bus::EventBus;
use crate::error::Result;
use crate::locks::SessionLocks;
use crate::log::EventLog;
use crate::types::{Event, EventPayload};

pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

pub struct EventHub {
    log: Arc<dyn EventLog>,
    bus: EventBus,
    sessions: SessionLocks,
}

impl EventHub {
    pub fn new(log: Arc<dyn EventLog>, bus: EventBus) -> Self {
        Self {
            log,
            bus,
            sessions: SessionLocks::default(),
        }
    }

    /// Persist an event and then publish it. Events of one session are
    /// published in the same order their sequence numbers were assigned.
    pub async fn record(&self, session_id: &str, payload: EventPayload) -> Result<Event> {
        let _guard = self.sessions.lock(session_id).await;
        let event = self.log.append(session_id, &payload).await?;
        self.bus.publish(session_id, event.clone()).await;
        Ok(event)
    }

    pub async fn replay(&self, session_id: &str) -> Result<Vec<Event>> {
        self.log.replay(session_id).await
    }

    /// Full history followed by live events, each event exactly once in seq order.
    ///
    /// The live subscription is opened before the history is read, so an event
    /// appended in between shows up in one of the two and is deduplicated by seq.
    /// A subscriber that falls behind the live buffer is refilled from the log.
    pub async fn stream(&self, session_id: &str) -> Result<EventStream> {
        let mut live = self.bus.subscribe(session_id).await;
        let history = self.log.replay(session_id).await?;

        let log = self.log.clone();
        let session_id = session_id.to_string();

        let stream = async_stream::stream! {
            let mut last_seq = 0u64;
            for event in history {
                last_seq = event.seq;
                yield event;
            }

            loop {
                match live.recv().await {
                    Ok(event) => {
                        if event.seq > last_seq {
                            last_seq = event.seq;
                            yield event;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Subscriber for session {} lagged by {} events, refilling from log",
                            session_id, skipped
                        );
                        match log.replay_after(&session_id, last_seq).await {
                            Ok(missed) => {
                                for event in missed {
                                    last_seq = event.seq;
                                    yield event;
                                }
                            }
                            Err(e) => {
                                error!("Failed to refill events for session {}: {}", session_id, e);
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Start a fresh history for the session
    pub async fn reset(&self, session_id: &str) -> Result<()> {
        let _guard = self.sessions.lock(session_id).await;
        self.log.clear(session_id).await
    }

    /// End live streams for the session; history stays in the log
    pub async fn close(&self, session_id: &str) {
        self.bus.close(session_id).await;
    }

    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        self.bus.subscriber_count(session_id).await
    }
}
