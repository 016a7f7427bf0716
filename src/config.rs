//! Server configuration read from the environment.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;

use crate::monitor::{DEFAULT_REFRESH_INTERVAL_MS, MIN_REFRESH_INTERVAL_MS};
use crate::price::COINGECKO_ETH_USD_URL;
use crate::token::is_address_shaped;

pub const DEFAULT_SWAP_RATE: f64 = 0.001;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub addr: SocketAddr,
    pub refresh_interval_ms: u64,
    pub auto_refresh: bool,
    pub wallet_address: Option<String>,
    pub swap_rate: f64,
    pub price_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            auto_refresh: true,
            wallet_address: None,
            swap_rate: DEFAULT_SWAP_RATE,
            price_url: COINGECKO_ETH_USD_URL.to_string(),
        }
    }
}

pub fn app_config_from_env() -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::default();

    if let Some(raw) = non_empty_var("GASWATCH_ADDR") {
        config.addr = raw.parse().map_err(|_| invalid("GASWATCH_ADDR", &raw))?;
    }

    if let Some(raw) = non_empty_var("GASWATCH_REFRESH_MS") {
        config.refresh_interval_ms = raw
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms >= MIN_REFRESH_INTERVAL_MS)
            .ok_or_else(|| invalid("GASWATCH_REFRESH_MS", &raw))?;
    }

    if let Some(raw) = non_empty_var("GASWATCH_AUTO_REFRESH") {
        config.auto_refresh =
            parse_bool(&raw).ok_or_else(|| invalid("GASWATCH_AUTO_REFRESH", &raw))?;
    }

    if let Some(raw) = non_empty_var("GASWATCH_WALLET_ADDRESS") {
        if !is_address_shaped(&raw) {
            return Err(invalid("GASWATCH_WALLET_ADDRESS", &raw));
        }
        config.wallet_address = Some(raw);
    }

    if let Some(raw) = non_empty_var("GASWATCH_SWAP_RATE") {
        config.swap_rate = raw
            .parse::<f64>()
            .ok()
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .ok_or_else(|| invalid("GASWATCH_SWAP_RATE", &raw))?;
    }

    if let Some(raw) = non_empty_var("GASWATCH_PRICE_URL") {
        config.price_url = raw;
    }

    Ok(config)
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_env {
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    pub(crate) fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| ((*key).to_string(), env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::test_env::with_env_vars;
    use super::*;

    const ALL_KEYS: [&str; 6] = [
        "GASWATCH_ADDR",
        "GASWATCH_REFRESH_MS",
        "GASWATCH_AUTO_REFRESH",
        "GASWATCH_WALLET_ADDRESS",
        "GASWATCH_SWAP_RATE",
        "GASWATCH_PRICE_URL",
    ];

    fn with_only(set: &[(&'static str, &'static str)]) -> Result<AppConfig, ConfigError> {
        let vars: Vec<(&str, Option<&str>)> = ALL_KEYS
            .iter()
            .map(|key| {
                let value = set.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
                (*key, value)
            })
            .collect();
        with_env_vars(&vars, app_config_from_env)
    }

    #[test]
    fn defaults_when_env_missing() {
        assert_eq!(with_only(&[]).unwrap(), AppConfig::default());
    }

    #[test]
    fn parses_all_overrides() {
        let cfg = with_only(&[
            ("GASWATCH_ADDR", "0.0.0.0:9000"),
            ("GASWATCH_REFRESH_MS", "15000"),
            ("GASWATCH_AUTO_REFRESH", "off"),
            (
                "GASWATCH_WALLET_ADDRESS",
                "0x2222222222222222222222222222222222222222",
            ),
            ("GASWATCH_SWAP_RATE", "0.002"),
        ])
        .unwrap();

        assert_eq!(cfg.addr.port(), 9000);
        assert_eq!(cfg.refresh_interval_ms, 15_000);
        assert!(!cfg.auto_refresh);
        assert!(cfg.wallet_address.is_some());
        assert_eq!(cfg.swap_rate, 0.002);
    }

    #[test]
    fn rejects_invalid_values() {
        assert_eq!(
            with_only(&[("GASWATCH_REFRESH_MS", "0")]).unwrap_err(),
            ConfigError::InvalidValue {
                key: "GASWATCH_REFRESH_MS",
                value: "0".to_string()
            }
        );
        assert!(with_only(&[("GASWATCH_REFRESH_MS", "500")]).is_err());
        assert_eq!(
            with_only(&[("GASWATCH_REFRESH_MS", "1000")])
                .unwrap()
                .refresh_interval_ms,
            MIN_REFRESH_INTERVAL_MS
        );
        assert!(with_only(&[("GASWATCH_WALLET_ADDRESS", "0x12")]).is_err());
        assert!(with_only(&[("GASWATCH_SWAP_RATE", "-1")]).is_err());
        assert!(with_only(&[("GASWATCH_AUTO_REFRESH", "maybe")]).is_err());
    }
}
