//! Sender
//!
//! Cross-pod delivery. Looks a user up in the presence directory, hands the
//! message to the local hub for this pod and publishes it to the topic of
//! every other pod listed.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::{debug, instrument, warn};

use super::hub::Hub;
use crate::domain::{BrokerHandler, Envelope, MessageBroker, MessageSender, PresenceRegistry};
use crate::infrastructure::cache::keys;
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// `MessageSender` for one pod.
pub struct PodSender {
    pod_id: String,
    topic_prefix: String,
    presence: Arc<dyn PresenceRegistry>,
    broker: Arc<dyn MessageBroker>,
    hub: Arc<Hub>,
}

impl PodSender {
    /// Build the sender and subscribe to this pod's own topic.
    ///
    /// The subscription is made exactly once, here; a failure is a startup
    /// error.
    pub async fn start(
        pod_id: impl Into<String>,
        topic_prefix: impl Into<String>,
        presence: Arc<dyn PresenceRegistry>,
        broker: Arc<dyn MessageBroker>,
        hub: Arc<Hub>,
    ) -> Result<Self, AppError> {
        let sender = Self {
            pod_id: pod_id.into(),
            topic_prefix: topic_prefix.into(),
            presence,
            broker,
            hub,
        };

        let topic = sender.topic_for(&sender.pod_id);
        sender
            .broker
            .subscribe(&topic, delivery_handler(sender.hub.clone()))
            .await?;
        debug!(pod_id = %sender.pod_id, topic = %topic, "Sender subscribed");

        Ok(sender)
    }

    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    /// Topic consumed by `pod_id`.
    pub fn topic_for(&self, pod_id: &str) -> String {
        keys::pod_topic(&self.topic_prefix, pod_id)
    }
}

#[async_trait]
impl MessageSender for PodSender {
    /// Deliver to every pod holding the user.
    ///
    /// `message` must be an envelope addressed to `user_id`, since remote
    /// pods route by the envelope's own target. A lookup failure means
    /// delivery failed, not that the user is offline. A failed publish does
    /// not stop the remaining pods; the first error is returned once all
    /// were tried.
    #[instrument(skip(self, message), fields(pod_id = %self.pod_id))]
    async fn send_to_user(&self, user_id: &str, message: &[u8]) -> Result<(), AppError> {
        let envelope = Envelope::from_slice(message)
            .map_err(|e| AppError::BadRequest(format!("undeliverable message: {}", e)))?;
        if envelope.target_user() != Some(user_id) {
            return Err(AppError::BadRequest(format!(
                "message is not addressed to user {}",
                user_id
            )));
        }

        let pods = self.presence.get_user_pods(user_id).await?;
        if pods.is_empty() {
            debug!("User has no active connection");
            return Ok(());
        }

        let mut first_error = None;
        for pod in pods {
            if pod == self.pod_id {
                self.hub.send_local(user_id, Bytes::copy_from_slice(message));
                continue;
            }

            let topic = self.topic_for(&pod);
            match self.broker.publish(&topic, message.to_vec()).await {
                Ok(()) => metrics::record_remote_delivery(),
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Publish to pod failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Handler for this pod's topic: decode and hand to the local hub.
///
/// Messages that cannot be delivered by any retry (undecodable, no target
/// user) are logged and accepted so the broker stops redelivering them.
fn delivery_handler(hub: Arc<Hub>) -> BrokerHandler {
    Arc::new(move |raw: Vec<u8>| -> BoxFuture<'static, Result<(), AppError>> {
        let hub = hub.clone();
        Box::pin(async move {
            let envelope = match Envelope::from_slice(&raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable broker message");
                    return Ok(());
                }
            };

            match envelope.target_user() {
                Some(user_id) => {
                    let delivered = hub.send_local(user_id, Bytes::from(raw.clone()));
                    debug!(user_id = %user_id, delivered, "Broker message delivered locally");
                }
                None => warn!(kind = %envelope.kind, "Dropping broker message without user_id"),
            }
            Ok(())
        })
    })
}
