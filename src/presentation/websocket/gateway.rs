//! WebSocket Gateway
//!
//! Drives each client socket through its lifecycle: registration, the read
//! and write loops, and teardown. Also the pod's entry point for pushing a
//! message to a user.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::router::MessageRouter;
use crate::application::services::{AckStore, Hub};
use crate::config::Settings;
use crate::domain::{
    kinds, AckRequest, Connection, ConnectionState, Envelope, MessageSender, PresenceRegistry,
    RateLimiter, RestoreRequest,
};
use crate::infrastructure::metrics::{self, DropReason};
use crate::shared::error::AppError;

/// Per-pod connection parameters.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub pod_id: String,
    pub send_buffer: usize,
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub presence_refresh: Duration,
}

impl GatewayConfig {
    pub fn from_settings(settings: &Settings, pod_id: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            send_buffer: settings.websocket.send_buffer,
            ping_interval: settings.websocket.ping_interval(),
            read_timeout: settings.websocket.read_timeout(),
            write_timeout: settings.websocket.write_timeout(),
            presence_refresh: settings.presence.refresh_interval(),
        }
    }
}

/// Collaborators the gateway drives.
pub struct GatewayParts {
    pub hub: Arc<Hub>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub sender: Arc<dyn MessageSender>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// `None` disables the outbox and the `ack` / `restore` messages.
    pub acks: Option<Arc<AckStore>>,
}

/// Connection orchestrator for one pod.
pub struct Gateway {
    config: GatewayConfig,
    hub: Arc<Hub>,
    presence: Arc<dyn PresenceRegistry>,
    sender: Arc<dyn MessageSender>,
    rate_limiter: Arc<dyn RateLimiter>,
    acks: Option<Arc<AckStore>>,
    router: MessageRouter,
    shutdown: CancellationToken,
    /// Open connections and their helper tasks, waited on at shutdown.
    tasks: TaskTracker,
}

impl Gateway {
    /// Create the gateway.
    ///
    /// The `ack` and `restore` handlers are added to `router` when the
    /// outbox is enabled, replacing any application handler of the same
    /// type. `shutdown` is the pod-wide token; every connection gets a
    /// child of it.
    pub fn new(
        config: GatewayConfig,
        parts: GatewayParts,
        router: MessageRouter,
        shutdown: CancellationToken,
    ) -> Self {
        let router = match &parts.acks {
            Some(acks) => {
                let on_ack = acks.clone();
                let on_restore = acks.clone();
                router
                    .register::<AckRequest, _, _>(kinds::ACK, move |conn, request| {
                        let acks = on_ack.clone();
                        async move { acks.handle_ack(&conn, request).await }
                    })
                    .register::<RestoreRequest, _, _>(kinds::RESTORE, move |conn, request| {
                        let acks = on_restore.clone();
                        async move { acks.handle_restore(&conn, request).await }
                    })
            }
            None => router,
        };

        Self {
            config,
            hub: parts.hub,
            presence: parts.presence,
            sender: parts.sender,
            rate_limiter: parts.rate_limiter,
            acks: parts.acks,
            router,
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    pub fn pod_id(&self) -> &str {
        &self.config.pod_id
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn connection_count(&self) -> usize {
        self.hub.connection_count()
    }

    /// Serve an upgraded socket for `user_id` until it closes.
    pub async fn serve(&self, socket: WebSocket, user_id: String) {
        let (sink, stream) = socket.split();
        self.serve_split(sink, stream, user_id).await;
    }

    /// Serve a connection given as separate outbound sink and inbound
    /// stream.
    ///
    /// Registers the connection, runs the write loop on its own task and
    /// the read loop on the caller's, then tears down once either ends.
    /// [`Gateway::shutdown`] waits for this to return.
    pub async fn serve_split<S, R, E>(&self, sink: S, stream: R, user_id: String)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: Display + Send,
    {
        let _tracked = self.tasks.token();
        let (conn, outbound) = Connection::new(
            user_id,
            self.config.send_buffer,
            self.shutdown.child_token(),
        );

        self.register(&conn).await;

        let writer = self.tasks.spawn(write_loop(
            sink,
            outbound,
            conn.clone(),
            self.config.ping_interval,
            self.config.write_timeout,
        ));

        self.read_loop(stream, &conn).await;

        conn.close();
        if let Err(e) = writer.await {
            warn!(conn_id = %conn.id(), error = %e, "Write loop ended abnormally");
        }
        self.teardown(&conn).await;
    }

    /// Add to the hub, announce presence and replay the outbox.
    async fn register(&self, conn: &Arc<Connection>) {
        self.hub.add(conn.clone());
        conn.advance(ConnectionState::Registered);

        // The connection still works locally; the refresh task retries
        if let Err(e) = self.presence.mark_online(conn.user_id(), self.pod_id()).await {
            warn!(user_id = %conn.user_id(), error = %e, "Failed to mark user online");
        }

        if let Some(acks) = &self.acks {
            let acks = acks.clone();
            let conn = conn.clone();
            self.tasks.spawn(async move {
                if let Err(e) = acks.sweep(&conn).await {
                    warn!(user_id = %conn.user_id(), error = %e, "Outbox sweep failed");
                }
            });
        }

        info!(
            user_id = %conn.user_id(),
            conn_id = %conn.id(),
            pod_id = %self.pod_id(),
            "Connection registered"
        );
    }

    async fn read_loop<R, E>(&self, mut stream: R, conn: &Arc<Connection>)
    where
        R: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: Display + Send,
    {
        let cancel = conn.cancellation().clone();

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                next = timeout(self.config.read_timeout, stream.next()) => next,
            };

            let message = match next {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => {
                    debug!(conn_id = %conn.id(), error = %e, "Socket read failed");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(conn_id = %conn.id(), "Read deadline exceeded");
                    break;
                }
            };

            conn.touch();
            match message {
                Message::Text(text) => self.handle_frame(conn, text.as_str().as_bytes()).await,
                Message::Binary(data) => self.handle_frame(conn, &data).await,
                Message::Close(_) => break,
                // Pings are answered by the socket layer; both only refresh the deadline
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }

    /// Gate, decode and dispatch one inbound frame.
    async fn handle_frame(&self, conn: &Arc<Connection>, raw: &[u8]) {
        if !self.rate_limiter.allow(conn.user_id()).await {
            metrics::record_drop(DropReason::RateLimited);
            debug!(user_id = %conn.user_id(), "Inbound message rate limited");
            return;
        }

        let envelope = match Envelope::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::record_drop(DropReason::Malformed);
                warn!(user_id = %conn.user_id(), error = %e, "Malformed inbound message");
                self.reply(conn, Envelope::error(format!("malformed message: {}", e)));
                return;
            }
        };

        if let Err(e) = envelope.validate_envelope() {
            self.reply(conn, Envelope::error(e.to_string()));
            return;
        }

        if envelope.target_user().is_some_and(|user| user != conn.user_id()) {
            warn!(user_id = %conn.user_id(), "Inbound message names another user");
            self.reply(conn, Envelope::error("unauthorized"));
            return;
        }

        let kind = envelope.kind;
        if let Err(e) = self.router.dispatch(&kind, envelope.payload, conn.clone()).await {
            if e.is_client_error() {
                debug!(kind = %kind, error = %e, "Handler rejected message");
                self.reply(conn, Envelope::error(e.to_string()));
            } else {
                error!(kind = %kind, error = %e, "Handler failed");
                self.reply(conn, Envelope::error("internal error"));
            }
        }
    }

    fn reply(&self, conn: &Connection, envelope: Envelope) {
        if let Err(e) = conn.reply(&envelope) {
            debug!(conn_id = %conn.id(), error = %e, "Reply dropped");
        }
    }

    /// Remove the connection and withdraw presence if it was the user's
    /// last one here. Safe to call more than once.
    async fn teardown(&self, conn: &Connection) {
        if !conn.advance(ConnectionState::Closing) {
            return;
        }
        conn.close();

        if self.hub.remove(conn) {
            if let Err(e) = self.presence.mark_offline(conn.user_id(), self.pod_id()).await {
                warn!(user_id = %conn.user_id(), error = %e, "Failed to mark user offline");
            }
            // A new connection may have registered while we were withdrawing
            if self.hub.user_connection_count(conn.user_id()) > 0 {
                if let Err(e) = self.presence.mark_online(conn.user_id(), self.pod_id()).await {
                    warn!(user_id = %conn.user_id(), error = %e, "Failed to restore presence");
                }
            }
        }

        conn.advance(ConnectionState::Closed);
        info!(user_id = %conn.user_id(), conn_id = %conn.id(), "Connection closed");
    }

    /// Push `envelope` to `user_id` wherever they are connected.
    ///
    /// Messages requesting an acknowledgement are stored in the outbox
    /// first, so a user who is offline now receives them on reconnect.
    pub async fn send_to_user(&self, user_id: &str, mut envelope: Envelope) -> Result<(), AppError> {
        envelope.user_id = Some(user_id.to_string());
        envelope.validate_envelope()?;
        let frame = envelope.to_bytes()?;

        if envelope.requires_ack {
            match (&self.acks, envelope.message_id()) {
                (Some(acks), Some(message_id)) => acks.save(user_id, message_id, &frame).await?,
                _ => debug!(user_id = %user_id, "Outbox disabled, sending without retention"),
            }
        }

        self.sender.send_to_user(user_id, &frame).await
    }

    /// Re-announce every local user so presence outlives its TTL.
    pub async fn refresh_presence(&self) {
        for user_id in self.hub.users() {
            if let Err(e) = self.presence.mark_online(&user_id, self.pod_id()).await {
                warn!(user_id = %user_id, error = %e, "Presence refresh failed");
            }
        }
    }

    /// Spawn the periodic presence refresh, stopped by the shutdown token.
    pub fn spawn_presence_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = self.clone();
        let cancel = self.shutdown.child_token();
        let period = self.config.presence_refresh;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => gateway.refresh_presence().await,
                }
            }
            debug!("Presence refresh stopped");
        })
    }

    /// Close every connection and wait up to `grace` for their teardown,
    /// presence withdrawal included.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        self.tasks.close();

        if timeout(grace, self.tasks.wait()).await.is_err() {
            warn!(
                remaining = self.tasks.len(),
                "Shutdown grace period elapsed with connections still closing"
            );
        }
    }
}

/// Drain the outbound buffer to the socket and keep it alive with pings.
async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Bytes>,
    conn: Arc<Connection>,
    ping_interval: Duration,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let cancel = conn.cancellation().clone();
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => into_message(frame),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn_id = %conn.id(), error = %e, "Socket write failed");
                break;
            }
            Err(_) => {
                warn!(conn_id = %conn.id(), "Socket write timed out");
                break;
            }
        }
    }

    conn.close();
    let _ = timeout(write_timeout, sink.send(Message::Close(None))).await;
    let _ = timeout(write_timeout, sink.close()).await;
}

fn into_message(frame: Bytes) -> Message {
    match std::str::from_utf8(&frame) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(frame),
    }
}
