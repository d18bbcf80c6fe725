//! Service configuration from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use actors::DEFAULT_ORIGIN_BASE_URL;
use cache_core::QueueConfig;
use db::DbConfig;
use storage::{StorageConfig, StorageError};

use crate::broadcaster::BroadcasterConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_WS_PATH: &str = "/ws/cache";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// Path the WebSocket endpoint is mounted on.
    pub ws_path: String,
    pub broadcaster: BroadcasterConfig,
    pub queue: QueueConfig,
    pub origin_base_url: String,
    pub origin_timeout: Duration,
    pub db: DbConfig,
    pub storage: StorageConfig,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_grace: Duration,
}

impl Default for ServiceConfig {
    /// In-memory backends, suitable for tests and local runs.
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            ws_path: DEFAULT_WS_PATH.to_string(),
            broadcaster: BroadcasterConfig::default(),
            queue: QueueConfig::default(),
            origin_base_url: DEFAULT_ORIGIN_BASE_URL.to_string(),
            origin_timeout: Duration::from_secs(20),
            db: DbConfig::memory(),
            storage: StorageConfig::memory(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ServiceConfig {
    /// Read the process environment. See `from_vars` for the variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage = StorageConfig::from_env()?;
        Self::from_vars(|name| std::env::var(name).ok(), storage)
    }

    /// Build from a variable lookup.
    ///
    /// - `BIND_ADDR` (default `0.0.0.0:3001`), `CACHE_WS_PATH` (default `/ws/cache`)
    /// - `CACHE_HEARTBEAT_SECS`, `CACHE_CONCURRENCY`, `CACHE_MAX_ATTEMPTS`,
    ///   `CACHE_JOB_TIMEOUT_SECS`, `CACHE_RETRY_BACKOFF_MS`, `CACHE_MAX_PENDING`
    /// - `TMDB_IMAGE_BASE_URL`, `ORIGIN_TIMEOUT_SECS`
    /// - `DATABASE_URL` (default in-memory), `DATABASE_NAMESPACE`, `DATABASE_NAME`,
    ///   `DATABASE_USER` + `DATABASE_PASS`
    /// - `CACHE_SHUTDOWN_GRACE_SECS`
    pub fn from_vars(
        get: impl Fn(&str) -> Option<String>,
        storage: StorageConfig,
    ) -> Result<Self, ConfigError> {
        let lookup = |name: &str| get(name).and_then(non_empty);
        let defaults = Self::default();
        let queue_defaults = QueueConfig::default();

        let bind_addr = parse_or(&lookup, "BIND_ADDR", DEFAULT_BIND_ADDR.parse().ok())?
            .unwrap_or(defaults.bind_addr);

        let ws_path = lookup("CACHE_WS_PATH").unwrap_or(defaults.ws_path);
        if !ws_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                var: "CACHE_WS_PATH",
                value: ws_path,
                reason: "must start with '/'".into(),
            });
        }

        let heartbeat_secs: u64 = parse_or(&lookup, "CACHE_HEARTBEAT_SECS", Some(30))?.unwrap_or(30);
        if heartbeat_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "CACHE_HEARTBEAT_SECS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let concurrency: usize =
            parse_or(&lookup, "CACHE_CONCURRENCY", Some(queue_defaults.concurrency))?
                .unwrap_or(queue_defaults.concurrency);
        let max_attempts: u32 =
            parse_or(&lookup, "CACHE_MAX_ATTEMPTS", Some(queue_defaults.max_attempts))?
                .unwrap_or(queue_defaults.max_attempts);
        if concurrency == 0 || max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: if concurrency == 0 { "CACHE_CONCURRENCY" } else { "CACHE_MAX_ATTEMPTS" },
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let job_timeout_secs: u64 = parse_or(
            &lookup,
            "CACHE_JOB_TIMEOUT_SECS",
            Some(queue_defaults.job_timeout_secs),
        )?
        .unwrap_or(queue_defaults.job_timeout_secs);
        if job_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "CACHE_JOB_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let queue = QueueConfig {
            concurrency,
            max_attempts,
            job_timeout_secs,
            retry_backoff_ms: parse_or(
                &lookup,
                "CACHE_RETRY_BACKOFF_MS",
                Some(queue_defaults.retry_backoff_ms),
            )?
            .unwrap_or(queue_defaults.retry_backoff_ms),
            max_pending: parse_or(&lookup, "CACHE_MAX_PENDING", queue_defaults.max_pending)?,
            ..queue_defaults
        };

        let mut db = match lookup("DATABASE_URL") {
            Some(url) => DbConfig::endpoint(url),
            None => DbConfig::memory(),
        };
        if let Some(namespace) = lookup("DATABASE_NAMESPACE") {
            db = db.with_namespace(namespace);
        }
        if let Some(database) = lookup("DATABASE_NAME") {
            db = db.with_database(database);
        }
        match (lookup("DATABASE_USER"), lookup("DATABASE_PASS")) {
            (Some(user), Some(pass)) => db = db.with_credentials(user, pass),
            (None, None) => {}
            (user, _) => {
                return Err(ConfigError::Invalid {
                    var: if user.is_some() { "DATABASE_PASS" } else { "DATABASE_USER" },
                    value: String::new(),
                    reason: "DATABASE_USER and DATABASE_PASS must be set together".into(),
                });
            }
        }

        let origin_timeout_secs: u64 =
            parse_or(&lookup, "ORIGIN_TIMEOUT_SECS", Some(20))?.unwrap_or(20);
        let grace_secs: u64 = parse_or(&lookup, "CACHE_SHUTDOWN_GRACE_SECS", Some(10))?.unwrap_or(10);

        Ok(Self {
            bind_addr,
            ws_path,
            broadcaster: BroadcasterConfig {
                heartbeat: Duration::from_secs(heartbeat_secs),
                ..defaults.broadcaster
            },
            queue,
            origin_base_url: lookup("TMDB_IMAGE_BASE_URL").unwrap_or(defaults.origin_base_url),
            origin_timeout: Duration::from_secs(origin_timeout_secs),
            db,
            storage,
            shutdown_grace: Duration::from_secs(grace_secs),
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse `var` if set, otherwise return `default`.
fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Option<T>,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        None => Ok(default),
    }
}
