//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Redis configuration (presence store and broker)
    pub redis: RedisSettings,

    /// JWT authentication settings
    pub jwt: JwtSettings,

    /// Identity of this pod
    #[serde(default)]
    pub pod: PodSettings,

    /// Presence directory configuration
    pub presence: PresenceSettings,

    /// Acknowledgement outbox configuration
    pub ack: AckSettings,

    /// Inbound rate limiting configuration
    pub rate_limit: RateLimitSettings,

    /// Cross-pod broker configuration
    pub broker: BrokerSettings,

    /// WebSocket configuration
    pub websocket: WebSocketSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

/// JWT authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key used to verify tokens
    pub secret: String,
}

/// Pod identity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodSettings {
    /// Explicit pod identifier; falls back to `HOSTNAME`, then a random id
    pub id: Option<String>,
}

/// Presence directory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceSettings {
    /// Key namespace (keys look like `<namespace>:user:<user_id>`)
    pub namespace: String,

    /// TTL of a user's presence set in seconds
    pub ttl_secs: u64,

    /// How often this pod re-announces its local users, in seconds
    pub refresh_interval_secs: u64,
}

/// Acknowledgement outbox configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AckSettings {
    /// Enable the outbox and the `ack` / `restore` message types
    pub enabled: bool,

    /// Key prefix (keys look like `<prefix>:<user_id>:<message_id>`)
    pub prefix: String,

    /// Lifetime of an unacknowledged entry in seconds
    pub ttl_secs: u64,
}

/// Inbound rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Enable per-user throttling of inbound frames
    pub enabled: bool,

    /// Key prefix (keys look like `<prefix>:<user_id>`)
    pub prefix: String,

    /// Maximum messages per window
    pub limit: u32,

    /// Window length in seconds
    pub window_secs: u64,
}

/// Cross-pod broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    /// Topic prefix; each pod consumes `<topic_prefix>.<pod_id>`
    pub topic_prefix: String,

    /// Consumer group name used on every pod topic
    pub group: String,

    /// Idle poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Maximum entries fetched per poll
    pub batch_size: usize,

    /// Approximate cap on the length of each pod topic
    pub max_len: usize,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Capacity of each connection's outbound buffer
    pub send_buffer: usize,

    /// Interval between server pings in seconds
    pub ping_interval_secs: u64,

    /// Read deadline in seconds, refreshed by every received frame
    pub read_timeout_secs: u64,

    /// Deadline for a single socket write in seconds
    pub write_timeout_secs: u64,

    /// Allowed `Origin` values for the upgrade (empty allows all)
    pub allowed_origins: Vec<String>,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Self::builder(&environment)?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .set_override_option("pod.id", std::env::var("POD_ID").ok())?
            .build()?
            .try_deserialize()
            .and_then(Self::validate)
    }

    /// Built-in defaults only, ignoring files and the environment.
    ///
    /// Used to assemble pods in-process, e.g. for tests.
    pub fn from_defaults(jwt_secret: &str) -> Result<Self, ConfigError> {
        Self::builder("test")?
            .set_override("jwt.secret", jwt_secret)?
            .build()?
            .try_deserialize()
            .and_then(Self::validate)
    }

    /// Builder pre-populated with every default value.
    fn builder(
        environment: &str,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", environment)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("presence.namespace", "ws")?
            .set_default("presence.ttl_secs", 24 * 60 * 60)?
            .set_default("presence.refresh_interval_secs", 60)?
            .set_default("ack.enabled", true)?
            .set_default("ack.prefix", "ws:ack")?
            .set_default("ack.ttl_secs", 10 * 60)?
            .set_default("rate_limit.enabled", true)?
            .set_default("rate_limit.prefix", "ws:rl")?
            .set_default("rate_limit.limit", 20)?
            .set_default("rate_limit.window_secs", 10)?
            .set_default("broker.topic_prefix", "ws.send")?
            .set_default("broker.group", "ws-fanout")?
            .set_default("broker.poll_interval_ms", 50)?
            .set_default("broker.batch_size", 64)?
            .set_default("broker.max_len", 10_000)?
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.send_buffer", 64)?
            .set_default("websocket.ping_interval_secs", 10)?
            .set_default("websocket.read_timeout_secs", 30)?
            .set_default("websocket.write_timeout_secs", 10)?
            .set_default("websocket.allowed_origins", Vec::<String>::new())?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])
    }

    fn validate(settings: Self) -> Result<Self, ConfigError> {
        // Validate JWT secret length for security
        if settings.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                settings.jwt.secret.len()
            )));
        }
        if settings.rate_limit.enabled && settings.rate_limit.window_secs == 0 {
            return Err(ConfigError::Message(
                "rate_limit.window_secs must be greater than zero".into(),
            ));
        }
        if settings.websocket.send_buffer == 0 {
            return Err(ConfigError::Message(
                "websocket.send_buffer must be greater than zero".into(),
            ));
        }
        if settings.websocket.ping_interval_secs == 0 || settings.websocket.write_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "websocket.ping_interval_secs and websocket.write_timeout_secs must be greater than zero"
                    .into(),
            ));
        }
        // A client only answering pings must still beat the read deadline
        if settings.websocket.ping_interval_secs >= settings.websocket.read_timeout_secs {
            return Err(ConfigError::Message(format!(
                "websocket.ping_interval_secs ({}) must be shorter than websocket.read_timeout_secs ({})",
                settings.websocket.ping_interval_secs, settings.websocket.read_timeout_secs
            )));
        }
        Ok(settings)
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Identifier of this pod.
    pub fn pod_id(&self) -> String {
        self.pod
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| format!("pod-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl PresenceSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl AckSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl BrokerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl WebSocketSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}
