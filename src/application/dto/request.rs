//! Request DTOs
//!
//! Data structures for API request bodies.

use serde::Deserialize;
use validator::Validate;

use crate::domain::{now_millis, Envelope};

/// Server push request
#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 64, message = "type must be 1-64 characters"))]
    pub kind: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    /// Retain until the client acknowledges it
    #[serde(default, rename = "requiresAck")]
    pub requires_ack: bool,

    /// Message id; generated when an acknowledged message has none
    #[validate(length(min = 1, max = 128, message = "id must be 1-128 characters"))]
    pub id: Option<String>,

    /// Seconds until the retained copy expires
    #[serde(rename = "ttlSecs")]
    #[validate(range(min = 1, max = 86400, message = "ttlSecs must be between 1 and 86400"))]
    pub ttl_secs: Option<u64>,
}

impl SendMessageRequest {
    /// Build the envelope to deliver. The target user is stamped by the
    /// gateway.
    pub fn into_envelope(self) -> Envelope {
        let mut envelope = Envelope::new(self.kind, self.payload);
        envelope.id = self.id;

        if self.requires_ack {
            let id = envelope
                .id
                .take()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            envelope = envelope.with_ack(id);
        }

        if let Some(ttl) = self.ttl_secs {
            envelope = envelope.with_expiry(now_millis() + (ttl as i64) * 1000);
        }

        envelope
    }
}
