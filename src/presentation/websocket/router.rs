//! Message Router
//!
//! Maps an inbound envelope's `type` to the handler for it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::Connection;
use crate::shared::error::AppError;

type Handler = Arc<dyn Fn(Arc<Connection>, Value) -> BoxFuture<'static, Result<(), AppError>> + Send + Sync>;

/// Routing table for inbound messages.
///
/// Built once at startup and then only read. Registering a type twice
/// replaces the earlier handler.
#[derive(Clone, Default)]
pub struct MessageRouter {
    routes: HashMap<String, Handler>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that receives the payload decoded as `T`.
    ///
    /// A payload that does not decode is answered with
    /// [`AppError::BadRequest`] without calling the handler.
    pub fn register<T, F, Fut>(self, kind: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Arc<Connection>, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register_raw(kind, move |conn, payload| {
            let handler = handler.clone();
            async move {
                let body = serde_json::from_value::<T>(payload)
                    .map_err(|e| AppError::BadRequest(format!("invalid payload: {}", e)))?;
                handler(conn, body).await
            }
        })
    }

    /// Register a handler that receives the payload as raw JSON.
    pub fn register_raw<F, Fut>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<Connection>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let kind = kind.into();
        let route: Handler = Arc::new(
            move |conn: Arc<Connection>, payload: Value| -> BoxFuture<'static, Result<(), AppError>> {
                Box::pin(handler(conn, payload))
            },
        );
        if self.routes.insert(kind.clone(), route).is_some() {
            tracing::debug!(kind = %kind, "Message handler replaced");
        }
        self
    }

    /// Run the handler for `kind`.
    ///
    /// Unknown types are logged and dropped so clients on a newer protocol
    /// revision keep working.
    pub async fn dispatch(&self, kind: &str, payload: Value, conn: Arc<Connection>) -> Result<(), AppError> {
        match self.routes.get(kind) {
            Some(handler) => handler(conn, payload).await,
            None => {
                tracing::debug!(kind = %kind, user_id = %conn.user_id(), "No handler for message type");
                Ok(())
            }
        }
    }

    /// Registered message types, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("kinds", &self.kinds())
            .finish()
    }
}
