//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_API_URL` - Base URL of the cart/favorites REST API
//!
//! ## Optional
//! - `STOREFRONT_EVENTS_URL` - Push event endpoint (default: `<api>/events`)
//! - `STOREFRONT_API_TOKEN` - Bearer token for the authenticated session
//! - `STOREFRONT_STATE_PATH` - Durable state file (default: `.storefront-sync/state.json`)
//! - `STOREFRONT_REQUEST_TIMEOUT_MS` - Per-request timeout for REST calls (default: 10000)
//! - `STOREFRONT_RECONNECT_DELAY_MS` - Fixed delay between reconnects (default: 5000)
//! - `STOREFRONT_HEARTBEAT_OUTGOING_MS` - Client heartbeat interval (default: 4000)
//! - `STOREFRONT_HEARTBEAT_INCOMING_MS` - Silence before the stream is declared dead (default: 10000)
//! - `STOREFRONT_NOTIFY_DEDUP_MS` - Duplicate price toast suppression window (default: 2000)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const DEFAULT_STATE_PATH: &str = ".storefront-sync/state.json";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
const DEFAULT_HEARTBEAT_OUTGOING_MS: u64 = 4_000;
const DEFAULT_HEARTBEAT_INCOMING_MS: u64 = 10_000;
const DEFAULT_NOTIFY_DEDUP_MS: u64 = 2_000;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront sync client configuration.
///
/// Implements `Debug` manually to redact the API token.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API
    pub api_url: Url,
    /// Push event stream endpoint
    pub events_url: Url,
    /// Bearer token, when the session is authenticated
    pub api_token: Option<SecretString>,
    /// File backing the durable key-value store
    pub state_path: PathBuf,
    /// Upper bound on a single REST round-trip. The event stream GET is exempt.
    pub request_timeout: Duration,
    /// Price event bus timings
    pub bus: BusConfig,
    /// View-level tuning
    pub tuning: SyncTuning,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url.as_str())
            .field("events_url", &self.events_url.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("state_path", &self.state_path)
            .field("request_timeout", &self.request_timeout)
            .field("bus", &self.bus)
            .field("tuning", &self.tuning)
            .field("sentry_dsn", &self.sentry_dsn)
            .finish()
    }
}

/// Connection timings for the price event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Constant delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// How often the client sends a heartbeat.
    pub heartbeat_outgoing: Duration,
    /// Maximum silence (no frame, no server heartbeat) before reconnecting.
    pub heartbeat_incoming: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            heartbeat_outgoing: Duration::from_millis(DEFAULT_HEARTBEAT_OUTGOING_MS),
            heartbeat_incoming: Duration::from_millis(DEFAULT_HEARTBEAT_INCOMING_MS),
        }
    }
}

/// Tuning for view synchronizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTuning {
    /// Window in which a repeated (product, price) notification is suppressed.
    pub notify_dedup_window: Duration,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            notify_dedup_window: Duration::from_millis(DEFAULT_NOTIFY_DEDUP_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = parse_url(
            "STOREFRONT_API_URL",
            &lookup("STOREFRONT_API_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("STOREFRONT_API_URL".to_string()))?,
        )?;
        let events_url = match lookup("STOREFRONT_EVENTS_URL") {
            Some(raw) => parse_url("STOREFRONT_EVENTS_URL", &raw)?,
            None => api_url.join("events/").map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_API_URL".to_string(), e.to_string())
            })?,
        };
        let api_token = lookup("STOREFRONT_API_TOKEN")
            .filter(|token| !token.is_empty())
            .map(SecretString::from);
        let state_path = PathBuf::from(
            lookup("STOREFRONT_STATE_PATH").unwrap_or_else(|| DEFAULT_STATE_PATH.to_string()),
        );

        let request_timeout = get_millis(
            &lookup,
            "STOREFRONT_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
        )?;

        let bus = BusConfig {
            reconnect_delay: get_millis(
                &lookup,
                "STOREFRONT_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY_MS,
            )?,
            heartbeat_outgoing: get_millis(
                &lookup,
                "STOREFRONT_HEARTBEAT_OUTGOING_MS",
                DEFAULT_HEARTBEAT_OUTGOING_MS,
            )?,
            heartbeat_incoming: get_millis(
                &lookup,
                "STOREFRONT_HEARTBEAT_INCOMING_MS",
                DEFAULT_HEARTBEAT_INCOMING_MS,
            )?,
        };
        if bus.heartbeat_incoming <= bus.heartbeat_outgoing {
            return Err(ConfigError::InvalidEnvVar(
                "STOREFRONT_HEARTBEAT_INCOMING_MS".to_string(),
                "must be greater than STOREFRONT_HEARTBEAT_OUTGOING_MS".to_string(),
            ));
        }

        let tuning = SyncTuning {
            notify_dedup_window: get_millis(
                &lookup,
                "STOREFRONT_NOTIFY_DEDUP_MS",
                DEFAULT_NOTIFY_DEDUP_MS,
            )?,
        };

        Ok(Self {
            api_url,
            events_url,
            api_token,
            state_path,
            request_timeout,
            bus,
            tuning,
            sentry_dsn: lookup("SENTRY_DSN").filter(|dsn| !dsn.is_empty()),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    // Without a trailing slash `join` would replace the last path segment
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Read a millisecond duration with a default.
fn get_millis<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(Duration::from_millis(default));
    };
    let millis = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if millis == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_millis(millis))
}
