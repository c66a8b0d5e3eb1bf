//! In-memory broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::{BrokerHandler, MessageBroker};
use crate::shared::error::AppError;

/// Attempts per subscriber before a message is given up on.
const MAX_ATTEMPTS: usize = 3;

/// Broker that delivers inline to the subscribers of the same process.
///
/// `publish` runs every handler of the topic before returning, retrying a
/// failed handler a few times the way a stream broker would redeliver an
/// unacknowledged entry. Only a count of publishes is kept unless the
/// broker was built with [`MemoryBroker::recording`].
#[derive(Default)]
pub struct MemoryBroker {
    subscribers: DashMap<String, Vec<BrokerHandler>>,
    publishes: AtomicUsize,
    recorded: Option<Recorded>,
}

struct Recorded {
    limit: usize,
    log: Mutex<VecDeque<(String, Vec<u8>)>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that also keeps the latest `limit` published messages for
    /// [`MemoryBroker::published`]; older ones are evicted first.
    pub fn recording(limit: usize) -> Self {
        Self {
            recorded: Some(Recorded {
                limit,
                log: Mutex::new(VecDeque::with_capacity(limit)),
            }),
            ..Self::default()
        }
    }

    /// Recorded messages published to `topic`, oldest first. Always empty
    /// when the broker is not recording.
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        let Some(recorded) = &self.recorded else {
            return Vec::new();
        };
        recorded
            .log
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Total number of publishes across all topics.
    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::Relaxed)
    }

    fn record(&self, topic: &str, payload: &[u8]) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
        let Some(recorded) = &self.recorded else {
            return;
        };
        if recorded.limit == 0 {
            return;
        }
        let mut log = recorded.log.lock();
        if log.len() == recorded.limit {
            log.pop_front();
        }
        log.push_back((topic.to_string(), payload.to_vec()));
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), AppError> {
        self.record(topic, &payload);

        // Clone out so no map guard is held while handlers run
        let handlers = self
            .subscribers
            .get(topic)
            .map(|h| h.value().clone())
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(topic = %topic, "Published to a topic without subscribers");
        }

        for handler in handlers {
            let mut attempt = 1;
            loop {
                match handler(payload.clone()).await {
                    Ok(()) => break,
                    Err(e) if attempt < MAX_ATTEMPTS => {
                        debug!(topic = %topic, attempt, error = %e, "Redelivering message");
                        attempt += 1;
                    }
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "Message dropped after {} attempts", MAX_ATTEMPTS);
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: BrokerHandler) -> Result<(), AppError> {
        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        debug!(topic = %topic, "Subscribed to topic");
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("topics", &self.subscribers.len())
            .field("published", &self.publish_count())
            .field("recording", &self.recorded.is_some())
            .finish()
    }
}
