//! Redis Streams broker.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::PAYLOAD_FIELD;
use crate::config::BrokerSettings;
use crate::domain::{BrokerHandler, MessageBroker};
use crate::shared::error::AppError;

/// Read position for entries delivered to this consumer but never acked.
const PENDING: &str = "0";
/// Read position for entries never delivered to the group.
const NEW: &str = ">";

/// Message broker over Redis Streams.
///
/// `publish` appends with `XADD` (capped with an approximate `MAXLEN`).
/// `subscribe` joins the configured consumer group on the topic and spawns
/// a poll task that stops when the shutdown token is cancelled.
pub struct RedisStreamBroker {
    conn: ConnectionManager,
    settings: BrokerSettings,
    /// Consumer name inside the group; the pod id.
    consumer: String,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisStreamBroker {
    pub fn new(
        conn: ConnectionManager,
        settings: BrokerSettings,
        consumer: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            conn,
            settings,
            consumer: consumer.into(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Stop every poll task and wait for them to finish.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Broker poll task ended abnormally");
            }
        }
    }

    async fn ensure_group(&self, topic: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(topic, &self.settings.group, "0")
            .await;

        match created {
            Ok(()) => {
                info!(topic = %topic, group = %self.settings.group, "Consumer group created");
                Ok(())
            }
            // Group already exists from a previous run
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MessageBroker for RedisStreamBroker {
    #[instrument(skip(self, payload), fields(bytes = payload.len()), level = "debug")]
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd_maxlen(
                topic,
                StreamMaxlen::Approx(self.settings.max_len),
                "*",
                &[(PAYLOAD_FIELD, payload)],
            )
            .await
            .map_err(|e| AppError::Broker(format!("publish to {} failed: {}", topic, e)))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: BrokerHandler) -> Result<(), AppError> {
        self.ensure_group(topic)
            .await
            .map_err(|e| AppError::Broker(format!("subscribe to {} failed: {}", topic, e)))?;

        let poller = Poller {
            conn: self.conn.clone(),
            topic: topic.to_string(),
            group: self.settings.group.clone(),
            consumer: self.consumer.clone(),
            batch_size: self.settings.batch_size.max(1),
            handler,
        };
        let interval = self.settings.poll_interval();
        let cancel = self.shutdown.child_token();

        let task = tokio::spawn(async move { poller.run(interval, cancel).await });
        self.tasks.lock().push(task);

        info!(topic = %topic, consumer = %self.consumer, "Subscribed to topic");
        Ok(())
    }
}

impl std::fmt::Debug for RedisStreamBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamBroker")
            .field("group", &self.settings.group)
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

/// Poll loop state for one subscribed topic.
struct Poller {
    conn: ConnectionManager,
    topic: String,
    group: String,
    consumer: String,
    batch_size: usize,
    handler: BrokerHandler,
}

impl Poller {
    async fn run(mut self, interval: std::time::Duration, cancel: CancellationToken) {
        // Entries left unacked by a previous run of this pod come first
        let mut retry_pending = true;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if retry_pending {
                retry_pending = match self.read(PENDING).await {
                    Ok(entries) => self.process(entries).await > 0,
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "Pending read failed");
                        true
                    }
                };
            }

            let mut full_batch = false;
            match self.read(NEW).await {
                Ok(entries) => {
                    full_batch = entries.len() >= self.batch_size;
                    if self.process(entries).await > 0 {
                        retry_pending = true;
                    }
                }
                Err(e) => warn!(topic = %self.topic, error = %e, "Stream read failed"),
            }

            if full_batch {
                continue;
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        debug!(topic = %self.topic, "Broker poll task stopped");
    }

    async fn read(&mut self, position: &str) -> Result<Vec<StreamId>, redis::RedisError> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch_size);

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[self.topic.as_str()], &[position], &options)
            .await?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }

    /// Run the handler on each entry and ack the ones it accepted.
    /// Returns how many entries were left pending.
    async fn process(&mut self, entries: Vec<StreamId>) -> usize {
        let mut failed = 0;

        for entry in entries {
            let payload: Option<Vec<u8>> = entry.get(PAYLOAD_FIELD);
            let accepted = match payload {
                Some(bytes) => match (self.handler)(bytes).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(topic = %self.topic, entry = %entry.id, error = %e, "Handler failed, entry stays pending");
                        false
                    }
                },
                None => {
                    // Nothing to deliver; acking stops it from looping forever
                    error!(topic = %self.topic, entry = %entry.id, "Stream entry without payload dropped");
                    true
                }
            };

            if !accepted {
                failed += 1;
                continue;
            }

            let acked: Result<i64, redis::RedisError> = self
                .conn
                .xack(&self.topic, &self.group, &[entry.id.as_str()])
                .await;
            if let Err(e) = acked {
                warn!(topic = %self.topic, entry = %entry.id, error = %e, "XACK failed");
                failed += 1;
            }
        }

        failed
    }
}
