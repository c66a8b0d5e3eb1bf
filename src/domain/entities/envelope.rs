//! Envelope entity.
//!
//! The typed wire message exchanged over client sockets and between pods
//! over the broker. The payload is kept as an opaque JSON value and is only
//! decoded by the handler registered for the envelope's `type`.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::shared::error::AppError;
use crate::shared::validation;

/// Message types reserved by the gateway.
pub mod kinds {
    /// Client acknowledgement of a `requiresAck` message (`{"id": string}`).
    pub const ACK: &str = "ack";
    /// Client request to replay pending messages (`{"since": int64}`).
    pub const RESTORE: &str = "restore";
    /// Server-to-client error notice with a free-form payload.
    pub const ERROR: &str = "error";
}

/// Payload of the restore reply sent when nothing is pending.
pub const NO_MESSAGE: &str = "no message";

/// Wire message.
///
/// ```json
/// { "user_id": "u1", "type": "chat", "payload": {...}, "id": "m1",
///   "requiresAck": true, "expiresAt": 1700000000000 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_ack_id"))]
pub struct Envelope {
    /// Target user; optional on inbound frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Discriminator used by the router.
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "type must not be empty"))]
    pub kind: String,

    /// Opaque payload, decoded by the handler.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Message identifier; required when an acknowledgement is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, rename = "requiresAck", skip_serializing_if = "is_false")]
    pub requires_ack: bool,

    /// Absolute deadline in epoch milliseconds.
    #[serde(default, rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn validate_ack_id(envelope: &Envelope) -> Result<(), ValidationError> {
    if envelope.requires_ack && envelope.message_id().is_none() {
        return Err(ValidationError::new("ack_requires_id")
            .with_message("id is required when requiresAck is set".into()));
    }
    Ok(())
}

impl Envelope {
    /// Create an envelope of the given type carrying `payload`.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            user_id: None,
            kind: kind.into(),
            payload,
            id: None,
            requires_ack: false,
            expires_at: None,
        }
    }

    /// Server-to-client `"error"` notice.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(kinds::ERROR, serde_json::Value::String(message.into()))
    }

    /// Restore reply telling the client that nothing is pending.
    pub fn no_message() -> Self {
        Self::new(
            kinds::RESTORE,
            serde_json::Value::String(NO_MESSAGE.to_string()),
        )
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Request an acknowledgement for this message under `id`.
    pub fn with_ack(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self.requires_ack = true;
        self
    }

    pub fn with_expiry(mut self, expires_at_ms: i64) -> Self {
        self.expires_at = Some(expires_at_ms);
        self
    }

    /// Non-empty message identifier, if any.
    pub fn message_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Target user, treating an empty string as absent.
    pub fn target_user(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Effective deadline; zero or negative values mean "no expiry".
    pub fn deadline(&self) -> Option<i64> {
        self.expires_at.filter(|at| *at > 0)
    }

    /// Whether the deadline has passed at `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.deadline().is_some_and(|at| now_ms > at)
    }

    /// Check envelope invariants.
    pub fn validate_envelope(&self) -> Result<(), AppError> {
        validation::validate(self)
    }

    /// Serialize to the JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the JSON wire form.
    pub fn from_slice(raw: &[u8]) -> Result<Self, AppError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Body of an `"ack"` message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AckRequest {
    pub id: String,
}

/// Body of a `"restore"` message.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RestoreRequest {
    /// Lower bound (epoch ms) on the `expiresAt` of replayed entries; 0 replays all.
    #[serde(default)]
    pub since: i64,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let env = Envelope::new("chat", json!({"text": "hi"}))
            .with_user("u1")
            .with_ack("m1")
            .with_expiry(1_700_000_000_000);

        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "user_id": "u1",
                "type": "chat",
                "payload": {"text": "hi"},
                "id": "m1",
                "requiresAck": true,
                "expiresAt": 1_700_000_000_000_i64
            })
        );
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let value = serde_json::to_value(Envelope::error("boom")).unwrap();
        assert_eq!(value, json!({"type": "error", "payload": "boom"}));
    }

    #[test]
    fn test_inbound_without_optional_fields() {
        let env = Envelope::from_slice(br#"{"type":"ping"}"#).unwrap();
        assert_eq!(env.kind, "ping");
        assert!(env.payload.is_null());
        assert!(env.user_id.is_none());
        assert!(!env.requires_ack);
    }

    #[test]
    fn test_requires_ack_without_id_is_rejected() {
        let mut env = Envelope::new("chat", json!(null));
        env.requires_ack = true;
        assert!(matches!(env.validate_envelope(), Err(AppError::Validation(_))));

        env.id = Some(String::new());
        assert!(env.validate_envelope().is_err());

        env.id = Some("m1".into());
        assert!(env.validate_envelope().is_ok());
    }

    #[test]
    fn test_empty_type_is_rejected() {
        let env = Envelope::new("", json!(null));
        assert!(env.validate_envelope().is_err());
    }

    #[test]
    fn test_expiry() {
        let env = Envelope::new("chat", json!(null)).with_expiry(1_000);
        assert!(!env.is_expired(1_000));
        assert!(env.is_expired(1_001));

        let zero = Envelope::new("chat", json!(null)).with_expiry(0);
        assert!(zero.deadline().is_none());
        assert!(!zero.is_expired(i64::MAX));
    }

    #[test]
    fn test_restore_request_defaults_since() {
        let req: RestoreRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(req.since, 0);
    }
}
