//! Assertion server binary.
//!
//! Serves the cue-word lexicon model over HTTP. Configuration comes from
//! flags with environment fallbacks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use assertion_server::engine::LexiconModel;
use assertion_core::ValidationConfig;
use assertion_server::network::{ApiKeyAuth, NetworkConfig, NetworkModule};
use assertion_server::service::config::{BatchConfig, RateLimitConfig};
use assertion_server::service::{AssertionService, ServerConfig};
use assertion_server::system::{PressureLimits, SystemMonitor};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Clinical assertion classification server", long_about = None)]
struct Args {
    /// Bind address for the HTTP server
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port for the HTTP server
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Log level used when `RUST_LOG` is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Deployment environment name (development, test, production)
    #[arg(long, env = "ENVIRONMENT", default_value = "development")]
    environment: String,

    /// Enable per-client rate limiting
    #[arg(long, env = "ENABLE_RATE_LIMITING", default_value_t = true, action = clap::ArgAction::Set)]
    enable_rate_limiting: bool,

    /// Requests per minute allowed per client
    #[arg(long, env = "RATE_LIMIT_RPM", default_value_t = 100)]
    rate_limit_rpm: u32,

    /// Maximum number of texts in one batch request
    #[arg(long, env = "MAX_BATCH_SIZE", default_value_t = 100)]
    max_batch_size: usize,

    /// Maximum characters in one sentence
    #[arg(long, env = "MAX_SENTENCE_LENGTH", default_value_t = 1000)]
    max_sentence_length: usize,

    /// Comma-separated accepted API keys; empty disables auth
    #[arg(long, env = "API_KEYS", default_value = "", hide_env_values = true)]
    api_keys: String,

    /// Comma-separated allowed CORS origins
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    cors_origins: String,

    /// Key rate limits on the first X-Forwarded-For hop (only behind a trusted proxy)
    #[arg(long, env = "TRUST_FORWARDED", default_value_t = false, action = clap::ArgAction::Set)]
    trust_forwarded: bool,

    /// Host memory usage (percent) above which health reports DEGRADED
    #[arg(long, env = "MAX_MEMORY_PERCENT", default_value_t = 90.0)]
    max_memory_percent: f64,

    /// Host CPU usage (percent) above which health reports DEGRADED
    #[arg(long, env = "MAX_CPU_PERCENT", default_value_t = 90.0)]
    max_cpu_percent: f64,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            rate_limit: RateLimitConfig {
                enabled: self.enable_rate_limiting,
                ..RateLimitConfig::per_minute(self.rate_limit_rpm)
            },
            batch: BatchConfig {
                max_batch_size: self.max_batch_size,
                ..defaults.batch
            },
            validation: ValidationConfig {
                max_chars: self.max_sentence_length,
                ..defaults.validation
            },
            ..defaults
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: NetworkConfig::parse_origins(&self.cors_origins),
            trust_forwarded: self.trust_forwarded,
            environment: self.environment.clone(),
            ..NetworkConfig::default()
        }
    }

    fn pressure_limits(&self) -> PressureLimits {
        PressureLimits {
            max_memory_percent: self.max_memory_percent,
            max_cpu_percent: self.max_cpu_percent,
        }
    }
}

fn init_tracing(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(args.environment != "production");
    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = args.server_config();
    info!(
        environment = %args.environment,
        rate_limiting = config.rate_limit.enabled,
        requests_per_minute = args.rate_limit_rpm,
        max_batch_size = config.batch.max_batch_size,
        trust_forwarded = args.trust_forwarded,
        "Starting assertion server"
    );

    let service = Arc::new(AssertionService::new(
        Arc::new(LexiconModel::new()),
        Arc::new(SystemMonitor::new(args.pressure_limits())),
        config,
    ));
    let mut network = NetworkModule::new(
        args.network_config(),
        Arc::clone(&service),
        ApiKeyAuth::from_csv(&args.api_keys),
    );
    let port = network.start().await.context("binding HTTP listener")?;
    info!(port, "Listening");

    // Probes report unready until the load finishes.
    let _load = service.spawn_model_load();

    network.serve(shutdown_signal()).await?;

    tokio::time::timeout(Duration::from_secs(10), service.shutdown())
        .await
        .context("service shutdown timed out")?;
    Ok(())
}
