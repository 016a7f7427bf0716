//! USD quote for the fee currency, polled on its own slower cadence.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

pub const COINGECKO_ETH_USD_URL: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=ethereum&vs_currencies=usd";
pub const MIN_PRICE_REFRESH_MS: i64 = 60_000;
pub const PRICE_FETCH_ERROR: &str = "Failed to fetch ETH price";

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("price request failed: {0}")]
    Request(String),
    #[error("Invalid price data")]
    InvalidPayload,
}

#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
    async fn fetch_usd(&self) -> Result<f64, PriceError>;
}

pub struct CoinGeckoPriceSource {
    client: reqwest::Client,
    url: String,
}

impl CoinGeckoPriceSource {
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> Result<Self, PriceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| PriceError::Request(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PriceSource for CoinGeckoPriceSource {
    async fn fetch_usd(&self) -> Result<f64, PriceError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| PriceError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PriceError::Request(format!("unexpected HTTP status {status}")));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|err| PriceError::Request(err.to_string()))?;
        parse_eth_usd(&payload)
    }
}

pub fn parse_eth_usd(payload: &Value) -> Result<f64, PriceError> {
    payload
        .get("ethereum")
        .and_then(|eth| eth.get("usd"))
        .and_then(Value::as_f64)
        .filter(|usd| *usd > 0.0)
        .ok_or(PriceError::InvalidPayload)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsdQuote {
    pub usd: f64,
    pub last_update_ms: i64,
    /// Start of the most recent request, successful or not.
    pub last_attempt_ms: i64,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for UsdQuote {
    fn default() -> Self {
        Self {
            usd: 0.0,
            last_update_ms: 0,
            last_attempt_ms: 0,
            loading: false,
            error: None,
        }
    }
}

#[derive(Default)]
struct PriceState {
    quote: UsdQuote,
    last_attempt: Option<Instant>,
}

impl PriceState {
    fn is_due(&self, now: Instant) -> bool {
        self.last_attempt.map_or(true, |attempt| {
            now.duration_since(attempt) >= Duration::from_millis(MIN_PRICE_REFRESH_MS as u64)
        })
    }

    fn begin(&mut self, now: Instant) {
        self.last_attempt = Some(now);
        self.quote.last_attempt_ms = Utc::now().timestamp_millis();
        self.quote.loading = true;
        self.quote.error = None;
    }
}

/// Attempts are spaced at least [`MIN_PRICE_REFRESH_MS`] apart by
/// `refresh_if_stale`, failures included, and never overlap.
#[derive(Clone)]
pub struct PriceTracker {
    source: Arc<dyn PriceSource>,
    state: Arc<RwLock<PriceState>>,
}

impl PriceTracker {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            state: Arc::new(RwLock::new(PriceState::default())),
        }
    }

    pub fn quote(&self) -> UsdQuote {
        self.state
            .read()
            .expect("price lock should not be poisoned")
            .quote
            .clone()
    }

    pub fn is_stale(&self) -> bool {
        let state = self.state.read().expect("price lock should not be poisoned");
        !state.quote.loading && state.is_due(Instant::now())
    }

    /// Unconditional refresh; still measured by the spacing of later ticks.
    pub async fn refresh(&self) {
        self.state
            .write()
            .expect("price lock should not be poisoned")
            .begin(Instant::now());
        self.complete().await;
    }

    pub async fn refresh_if_stale(&self) -> bool {
        {
            let mut state = self.state.write().expect("price lock should not be poisoned");
            let now = Instant::now();
            if state.quote.loading || !state.is_due(now) {
                return false;
            }
            state.begin(now);
        }
        self.complete().await;
        true
    }

    async fn complete(&self) {
        let result = self.source.fetch_usd().await;

        let mut state = self.state.write().expect("price lock should not be poisoned");
        state.quote.loading = false;
        match result {
            Ok(usd) => {
                state.quote.usd = usd;
                state.quote.last_update_ms = Utc::now().timestamp_millis();
                info!(component = "price", event = "price.updated", usd);
            }
            Err(err) => {
                warn!(component = "price", event = "price.failed", error = %err);
                state.quote.error = Some(PRICE_FETCH_ERROR.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedPrice {
        usd: Option<f64>,
        delay_ms: u64,
        calls: AtomicUsize,
    }

    impl FixedPrice {
        fn new(usd: Option<f64>) -> Self {
            Self {
                usd,
                delay_ms: 0,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PriceSource for FixedPrice {
        async fn fetch_usd(&self) -> Result<f64, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.usd.ok_or(PriceError::InvalidPayload)
        }
    }

    #[test]
    fn parses_coingecko_payload() {
        assert_eq!(parse_eth_usd(&json!({ "ethereum": { "usd": 3150.5 } })).unwrap(), 3150.5);
        assert!(parse_eth_usd(&json!({ "bitcoin": { "usd": 1.0 } })).is_err());
        assert!(parse_eth_usd(&json!({ "ethereum": { "usd": 0 } })).is_err());
    }

    #[tokio::test]
    async fn successful_refresh_sets_quote_and_skips_until_stale() {
        let source = Arc::new(FixedPrice::new(Some(2_500.0)));
        let tracker = PriceTracker::new(source.clone());

        assert!(tracker.refresh_if_stale().await);
        assert_eq!(tracker.quote().usd, 2_500.0);
        assert!(!tracker.quote().loading);

        assert!(!tracker.refresh_if_stale().await);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_value() {
        let tracker = PriceTracker::new(Arc::new(FixedPrice::new(None)));
        tracker.refresh().await;

        let quote = tracker.quote();
        assert_eq!(quote.usd, 0.0);
        assert_eq!(quote.error.as_deref(), Some(PRICE_FETCH_ERROR));
        assert!(!quote.loading);
        assert!(quote.last_attempt_ms > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_waits_a_full_interval_before_retrying() {
        let source = Arc::new(FixedPrice::new(None));
        let tracker = PriceTracker::new(source.clone());

        assert!(tracker.refresh_if_stale().await);
        tokio::time::sleep(Duration::from_millis(59_000)).await;
        assert!(!tracker.is_stale());
        assert!(!tracker.refresh_if_stale().await);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(tracker.refresh_if_stale().await);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refreshes_issue_a_single_request() {
        let source = Arc::new(FixedPrice {
            delay_ms: 5_000,
            ..FixedPrice::new(Some(3_000.0))
        });
        let tracker = PriceTracker::new(source.clone());

        let first = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.refresh_if_stale().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tracker.quote().loading);
        assert!(!tracker.refresh_if_stale().await);

        assert!(first.await.unwrap());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.quote().usd, 3_000.0);
    }
}
