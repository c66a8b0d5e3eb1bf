//! Application Startup
//!
//! Application building and server initialization.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::services::{AckStore, Hub, PodSender, StorePresenceRegistry, StoreRateLimiter};
use crate::config::Settings;
use crate::domain::{KeyValueStore, MessageBroker, PresenceRegistry};
use crate::infrastructure::broker::RedisStreamBroker;
use crate::infrastructure::cache::{self, RedisStore};
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::{Gateway, GatewayConfig, GatewayParts, MessageRouter};
use crate::shared::error::AppError;

/// How long shutdown waits for connections to tear down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Predicate deciding whether a peer may open a WebSocket.
pub type IpFilter = Arc<dyn Fn(IpAddr) -> bool + Send + Sync>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub store: Arc<dyn KeyValueStore>,
    pub settings: Arc<Settings>,
    pub ip_filter: Option<IpFilter>,
}

impl AppState {
    pub fn with_ip_filter(mut self, filter: impl Fn(IpAddr) -> bool + Send + Sync + 'static) -> Self {
        self.ip_filter = Some(Arc::new(filter));
        self
    }
}

/// Wire the fan-out services for one pod over `store` and `broker`.
///
/// Subscribes the pod to its own topic, so the broker must be live.
pub async fn build_state(
    settings: Settings,
    pod_id: &str,
    store: Arc<dyn KeyValueStore>,
    broker: Arc<dyn MessageBroker>,
    router: MessageRouter,
    shutdown: CancellationToken,
) -> Result<AppState, AppError> {
    let hub = Arc::new(Hub::new());
    let presence: Arc<dyn PresenceRegistry> =
        Arc::new(StorePresenceRegistry::new(store.clone(), &settings.presence));
    let rate_limiter = Arc::new(StoreRateLimiter::new(store.clone(), &settings.rate_limit));
    let acks = settings
        .ack
        .enabled
        .then(|| Arc::new(AckStore::new(store.clone(), &settings.ack)));

    let sender = PodSender::start(
        pod_id,
        settings.broker.topic_prefix.clone(),
        presence.clone(),
        broker,
        hub.clone(),
    )
    .await?;

    let gateway = Gateway::new(
        GatewayConfig::from_settings(&settings, pod_id),
        GatewayParts {
            hub,
            presence: presence.clone(),
            sender: Arc::new(sender),
            rate_limiter,
            acks,
        },
        router,
        shutdown,
    );

    Ok(AppState {
        gateway: Arc::new(gateway),
        presence,
        store,
        settings: Arc::new(settings),
        ip_filter: None,
    })
}

/// Router with the HTTP middleware stack applied
pub fn build_router(state: AppState) -> Router {
    let cors = cors::create_cors_layer(&state.settings.cors);
    routes::create_router(state)
        .layer(logging::create_trace_layer())
        .layer(cors)
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    gateway: Arc<Gateway>,
    broker: Arc<RedisStreamBroker>,
    refresh: JoinHandle<()>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        Self::build_with_router(settings, MessageRouter::new()).await
    }

    /// Build the application with the given inbound message handlers
    pub async fn build_with_router(settings: Settings, router: MessageRouter) -> Result<Self> {
        health::init_server_start();

        let pod_id = settings.pod_id();
        let shutdown = CancellationToken::new();

        let redis = cache::create_redis_client(&settings.redis).await?;
        let store: Arc<dyn KeyValueStore> = Arc::new(RedisStore::new(redis.clone()));
        let broker = Arc::new(RedisStreamBroker::new(
            redis,
            settings.broker.clone(),
            pod_id.clone(),
            shutdown.child_token(),
        ));

        let state = build_state(
            settings.clone(),
            &pod_id,
            store,
            broker.clone(),
            router,
            shutdown,
        )
        .await?;
        tracing::info!(pod_id = %pod_id, "Gateway ready");

        let gateway = state.gateway.clone();
        let refresh = gateway.spawn_presence_refresh();
        let router = build_router(state);

        let addr = settings.server_addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            gateway,
            broker,
            refresh,
        })
    }

    /// Run the server until a shutdown signal, then drain connections
    pub async fn run_until_stopped(self) -> Result<()> {
        let gateway = self.gateway.clone();

        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            gateway.shutdown(SHUTDOWN_GRACE).await;
        })
        .await?;

        self.broker.close().await;
        if let Err(e) = self.refresh.await {
            tracing::warn!(error = %e, "Presence refresh task ended abnormally");
        }
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
