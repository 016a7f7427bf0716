//! Logging setup for the server binary plus the structured events it emits
//! while starting up.

use std::net::SocketAddr;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{non_empty_var, parse_bool, AppConfig};
use crate::network::EndpointSet;
use crate::price::MIN_PRICE_REFRESH_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Some(level) = non_empty_var("GASWATCH_LOG_LEVEL") {
        config.level = level;
    }
    // Unparseable values keep the defaults.
    if let Some(format) =
        non_empty_var("GASWATCH_LOG_FORMAT").and_then(|raw| parse_log_format(&raw))
    {
        config.format = format;
    }
    if let Some(include_target) =
        non_empty_var("GASWATCH_LOG_TARGET").and_then(|raw| parse_bool(&raw))
    {
        config.include_target = include_target;
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "gaswatch_server",
        event = "app.start",
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

/// The wallet address itself is never logged, only whether one is set.
pub fn log_app_config(config: &AppConfig) {
    info!(
        component = "gaswatch_server",
        event = "app.config",
        addr = %config.addr,
        auto_refresh = config.auto_refresh,
        refresh_interval_ms = config.refresh_interval_ms,
        wallet_connected = config.wallet_address.is_some(),
        swap_rate = config.swap_rate,
        price_url = %config.price_url
    );
}

pub fn log_monitor_configured(
    endpoints: &[EndpointSet],
    auto_refresh: bool,
    refresh_interval_ms: u64,
) {
    let networks = endpoints
        .iter()
        .map(|set| set.network().as_str())
        .collect::<Vec<_>>()
        .join(",");
    let endpoint_count: usize = endpoints.iter().map(EndpointSet::len).sum();
    info!(
        component = "gaswatch_server",
        event = "monitor.configured",
        networks = %networks,
        endpoints = endpoint_count,
        auto_refresh,
        refresh_interval_ms,
        price_refresh_ms = MIN_PRICE_REFRESH_MS
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "gaswatch_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        dashboard_url = %format!("http://{bound_addr}/dashboard")
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}
