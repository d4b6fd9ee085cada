//! Network configuration types for the assertion server.

use std::time::Duration;

/// Top-level network configuration for the server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Use the first `X-Forwarded-For` hop as the rate-limit identity. Only
    /// safe behind a proxy that overwrites the header.
    pub trust_forwarded: bool,
    /// Deployment environment reported by `GET /`.
    pub environment: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            trust_forwarded: false,
            environment: "development".to_string(),
        }
    }
}

impl NetworkConfig {
    /// Parses a comma-separated origin list, as read from `CORS_ORIGINS`.
    #[must_use]
    pub fn parse_origins(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }
}
