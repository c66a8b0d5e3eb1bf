//! Common Test Utilities
//!
//! Pods that share one in-memory store and broker, a driver for client
//! connections, and token helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::ws::Message, Router};
use futures::{channel::mpsc, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ws_fanout::config::Settings;
use ws_fanout::domain::{Envelope, KeyValueStore, PresenceRegistry};
use ws_fanout::infrastructure::broker::MemoryBroker;
use ws_fanout::infrastructure::cache::{keys, MemoryStore};
use ws_fanout::presentation::middleware::issue_token;
use ws_fanout::presentation::websocket::{Gateway, MessageRouter};
use ws_fanout::startup::{build_router, build_state, AppState};

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn settings() -> Settings {
    Settings::from_defaults(JWT_SECRET).expect("default settings")
}

/// Bearer token for `user_id`
pub fn token(user_id: &str) -> String {
    issue_token(JWT_SECRET, user_id, Duration::from_secs(3600)).expect("token")
}

/// Broker messages kept for assertions.
const RECORDED_PUBLISHES: usize = 256;

/// Pods wired to the same store and broker, as if they shared one Redis.
pub struct Cluster {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<MemoryBroker>,
    pub shutdown: CancellationToken,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            broker: Arc::new(MemoryBroker::recording(RECORDED_PUBLISHES)),
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn pod(&self, pod_id: &str) -> TestPod {
        self.pod_with(pod_id, settings(), MessageRouter::new()).await
    }

    pub async fn pod_with(&self, pod_id: &str, settings: Settings, router: MessageRouter) -> TestPod {
        let state = build_state(
            settings,
            pod_id,
            self.store.clone(),
            self.broker.clone(),
            router,
            self.shutdown.child_token(),
        )
        .await
        .expect("pod state");

        TestPod {
            pod_id: pod_id.to_string(),
            state,
        }
    }

    /// Whether an outbox entry exists for the message.
    pub async fn has_pending(&self, user_id: &str, message_id: &str) -> bool {
        let settings = settings();
        self.store
            .get(&keys::ack(&settings.ack.prefix, user_id, message_id))
            .await
            .expect("store get")
            .is_some()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub struct TestPod {
    pub pod_id: String,
    pub state: AppState,
}

impl TestPod {
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.state.gateway
    }

    /// HTTP router with the full middleware stack
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Open a connection for `user_id` and wait until it is registered and
    /// announced in presence.
    pub async fn connect(&self, user_id: &str) -> TestClient {
        let gateway = self.gateway().clone();
        let before = gateway.hub().user_connection_count(user_id);

        let (to_server, inbound) = mpsc::unbounded::<Result<Message, std::io::Error>>();
        let (outbound, from_server) = mpsc::unbounded::<Message>();
        let serving = gateway.clone();
        let user = user_id.to_string();
        let task = tokio::spawn(async move { serving.serve_split(outbound, inbound, user).await });

        let presence = self.state.presence.clone();
        tokio::time::timeout(WAIT, async {
            loop {
                let pods = presence.get_user_pods(user_id).await.unwrap_or_default();
                if gateway.hub().user_connection_count(user_id) > before && pods.contains(&self.pod_id) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client registered");

        TestClient {
            to_server,
            from_server,
            task,
        }
    }
}

/// Client end of a connection served by [`Gateway::serve_split`].
pub struct TestClient {
    to_server: mpsc::UnboundedSender<Result<Message, std::io::Error>>,
    from_server: mpsc::UnboundedReceiver<Message>,
    task: JoinHandle<()>,
}

impl TestClient {
    pub fn send_text(&self, text: &str) {
        self.to_server
            .unbounded_send(Ok(Message::Text(text.into())))
            .expect("connection open");
    }

    pub fn send(&self, envelope: &Envelope) {
        let text = serde_json::to_string(envelope).expect("encode");
        self.send_text(&text);
    }

    /// Next text frame, decoded
    pub async fn recv(&mut self) -> Envelope {
        self.recv_within(WAIT).await.expect("message within deadline")
    }

    /// Next text frame if one arrives within `wait`
    pub async fn recv_within(&mut self, wait: Duration) -> Option<Envelope> {
        tokio::time::timeout(wait, async {
            while let Some(message) = self.from_server.next().await {
                if let Message::Text(text) = message {
                    return Some(serde_json::from_str(text.as_str()).expect("envelope"));
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Close from the client side and wait for the server to tear down.
    pub async fn close(self) {
        let _ = self.to_server.unbounded_send(Ok(Message::Close(None)));
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("teardown within deadline")
            .expect("serve task");
    }
}
