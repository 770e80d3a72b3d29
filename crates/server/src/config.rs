// Chat server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The database pool reads its own tuning vars in db/pool.rs;
// this module covers the core server settings.

use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_PERSIST_TIMEOUT_MS: u64 = 5_000;

/// Core chat server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string for the durable message store.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `commune_server=debug`).
    pub log_filter: String,
    /// Upper bound on one message append before the publish is failed.
    pub persist_timeout: Duration,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `COMMUNE_SERVER_HOST` | `0.0.0.0` |
    /// | `COMMUNE_SERVER_PORT` | `8080` |
    /// | `COMMUNE_SERVER_DATABASE_URL` | *(none)* |
    /// | `COMMUNE_SERVER_CORS_ORIGINS` | *(none — cors.rs uses dev defaults)* |
    /// | `COMMUNE_SERVER_LOG_FILTER` | `info` |
    /// | `COMMUNE_SERVER_PERSIST_TIMEOUT_MS` | `5000` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("COMMUNE_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("COMMUNE_SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let database_url = env("COMMUNE_SERVER_DATABASE_URL").ok();
        let cors_origins = env("COMMUNE_SERVER_CORS_ORIGINS").ok();

        let log_filter =
            env("COMMUNE_SERVER_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let persist_timeout_ms = env("COMMUNE_SERVER_PERSIST_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_PERSIST_TIMEOUT_MS);

        Self {
            listen_addr,
            database_url,
            cors_origins,
            log_filter,
            persist_timeout: Duration::from_millis(persist_timeout_ms),
        }
    }
}
