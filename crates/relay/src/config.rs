// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The PostgreSQL pool reads its own sizing variables in
// `db::pool`.

use std::{net::SocketAddr, path::PathBuf};

pub(crate) const DEV_JWT_SECRET: &str = "coedit_local_development_jwt_secret_must_be_32_chars";
pub(crate) const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_PORT: u16 = 5000;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Shared secret for verifying access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string. `None` selects the in-memory document store.
    pub database_url: Option<String>,
    /// JSON seed for the in-memory document store (ignored with a database).
    pub memory_seed_path: Option<PathBuf>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `coedit_relay=debug`).
    pub log_filter: String,
    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,
    /// Largest inbound WebSocket frame accepted.
    pub max_frame_bytes: usize,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `COEDIT_RELAY_HOST` | `0.0.0.0` |
    /// | `COEDIT_RELAY_PORT` | `5000` |
    /// | `COEDIT_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `COEDIT_RELAY_DATABASE_URL` | *(none, in-memory store)* |
    /// | `COEDIT_RELAY_MEMORY_SEED` | *(none)* |
    /// | `COEDIT_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `COEDIT_RELAY_LOG_FILTER` | `info` |
    /// | `COEDIT_RELAY_LOG_FORMAT` | `text` (`json` for JSON lines) |
    /// | `COEDIT_RELAY_MAX_FRAME_BYTES` | `4194304` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("COEDIT_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("COEDIT_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("COEDIT_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let database_url = env("COEDIT_RELAY_DATABASE_URL").ok().filter(|url| !url.is_empty());
        let memory_seed_path = env("COEDIT_RELAY_MEMORY_SEED")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        let cors_origins = env("COEDIT_RELAY_CORS_ORIGINS").ok();

        let log_filter = env("COEDIT_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_json = env("COEDIT_RELAY_LOG_FORMAT")
            .map(|format| format.trim().eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let max_frame_bytes = env("COEDIT_RELAY_MAX_FRAME_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|bytes| *bytes > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_BYTES);

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            memory_seed_path,
            cors_origins,
            log_filter,
            log_json,
            max_frame_bytes,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
