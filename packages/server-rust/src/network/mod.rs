//! HTTP transport: configuration, API-key auth, handlers, and server lifecycle.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;

pub use auth::ApiKeyAuth;
pub use config::NetworkConfig;
pub use handlers::{ApiError, AppState};
pub use module::{build_router, NetworkModule};
