//! Refresh scheduling: drives failover fetches for every configured network
//! and applies each result to the snapshot store and history buffer.
//!
//! Networks are refreshed concurrently and each result is applied as soon as
//! it arrives. A network whose previous attempt sequence is still in flight is
//! skipped for that cycle. Stopping the timer never cancels in-flight fetches;
//! they run to completion and apply their result. Because writes are
//! freshest-write-wins without a sequence guard, a slow result may land after
//! a newer one under rare reordering. That tolerance is accepted for display.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::fetcher::{fetch_with_failover, FailoverConfig, FeeTransport};
use crate::history::{HistoryBuffer, HistoryPoint};
use crate::metrics::wei_to_gwei;
use crate::network::{EndpointSet, NetworkId};
use crate::price::{PriceTracker, UsdQuote};
use crate::snapshot::{FeeSnapshot, SnapshotStore};

pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 8_000;
/// Shortest accepted auto-refresh period.
pub const MIN_REFRESH_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub refresh_interval_ms: u64,
    pub failover: FailoverConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            failover: FailoverConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Updated {
        network: NetworkId,
        endpoint_index: usize,
    },
    Failed {
        network: NetworkId,
        error: String,
    },
    Skipped {
        network: NetworkId,
    },
}

struct MonitorInner {
    endpoints: Vec<EndpointSet>,
    transport: Arc<dyn FeeTransport>,
    failover: FailoverConfig,
    store: SnapshotStore,
    history: HistoryBuffer,
    price: Option<PriceTracker>,
}

struct Timer {
    handle: JoinHandle<()>,
    interval_ms: u64,
}

/// Owned polling service. Callers hold a reference; there is no ambient state.
pub struct FeeMonitor {
    inner: Arc<MonitorInner>,
    default_interval_ms: u64,
    timer: Mutex<Option<Timer>>,
}

impl FeeMonitor {
    pub fn new(
        endpoints: Vec<EndpointSet>,
        transport: Arc<dyn FeeTransport>,
        cfg: MonitorConfig,
    ) -> Self {
        Self::build(endpoints, transport, cfg, None)
    }

    pub fn with_price(
        endpoints: Vec<EndpointSet>,
        transport: Arc<dyn FeeTransport>,
        cfg: MonitorConfig,
        price: PriceTracker,
    ) -> Self {
        Self::build(endpoints, transport, cfg, Some(price))
    }

    fn build(
        endpoints: Vec<EndpointSet>,
        transport: Arc<dyn FeeTransport>,
        cfg: MonitorConfig,
        price: Option<PriceTracker>,
    ) -> Self {
        let networks: Vec<NetworkId> = endpoints.iter().map(EndpointSet::network).collect();
        Self {
            inner: Arc::new(MonitorInner {
                endpoints,
                transport,
                failover: cfg.failover,
                store: SnapshotStore::new(&networks),
                history: HistoryBuffer::new(),
                price,
            }),
            default_interval_ms: cfg.refresh_interval_ms,
            timer: Mutex::new(None),
        }
    }

    pub fn networks(&self) -> Vec<NetworkId> {
        self.inner.endpoints.iter().map(EndpointSet::network).collect()
    }

    pub fn snapshot(&self, network: NetworkId) -> Option<FeeSnapshot> {
        self.inner.store.get(network)
    }

    pub fn history(&self, network: NetworkId) -> Vec<HistoryPoint> {
        self.inner.history.snapshot(network)
    }

    pub fn price_quote(&self) -> Option<UsdQuote> {
        self.inner.price.as_ref().map(PriceTracker::quote)
    }

    /// Runs one refresh cycle and waits for every network to apply its result.
    /// Dropping the returned future does not cancel the per-network fetches.
    pub async fn refresh_now(&self) -> Vec<CycleOutcome> {
        let handles = spawn_cycle(&self.inner);
        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(self.networks())
            .map(|(joined, network)| {
                joined.unwrap_or_else(|err| CycleOutcome::Failed {
                    network,
                    error: format!("refresh task aborted: {err}"),
                })
            })
            .collect()
    }

    pub async fn refresh_price(&self) {
        if let Some(price) = &self.inner.price {
            price.refresh().await;
        }
    }

    /// Starts (or restarts) the fixed-interval timer. The first cycle runs
    /// immediately. Periods below [`MIN_REFRESH_INTERVAL_MS`] are raised to
    /// it. Must be called inside a tokio runtime.
    pub fn start(&self, interval_ms: u64) {
        let interval_ms = interval_ms.max(MIN_REFRESH_INTERVAL_MS);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = spawn_cycle(&inner);
                if let Some(price) = inner.price.clone() {
                    tokio::spawn(async move {
                        price.refresh_if_stale().await;
                    });
                }
            }
        });

        let previous = self
            .timer
            .lock()
            .expect("timer lock should not be poisoned")
            .replace(Timer {
                handle,
                interval_ms,
            });
        if let Some(previous) = previous {
            previous.handle.abort();
        }

        info!(
            component = "monitor",
            event = "monitor.start",
            interval_ms,
            networks = self.inner.endpoints.len()
        );
    }

    /// Cancels future cycles. In-flight fetches still complete and apply.
    pub fn stop(&self) {
        let previous = self
            .timer
            .lock()
            .expect("timer lock should not be poisoned")
            .take();
        if let Some(timer) = previous {
            timer.handle.abort();
            info!(component = "monitor", event = "monitor.stop");
        }
    }

    pub fn set_auto_refresh(&self, enabled: bool, interval_ms: Option<u64>) {
        if enabled {
            self.start(interval_ms.unwrap_or(self.default_interval_ms));
        } else {
            self.stop();
        }
    }

    pub fn auto_refresh_interval_ms(&self) -> Option<u64> {
        self.timer
            .lock()
            .expect("timer lock should not be poisoned")
            .as_ref()
            .map(|timer| timer.interval_ms)
    }

    pub fn is_running(&self) -> bool {
        self.auto_refresh_interval_ms().is_some()
    }
}

impl Drop for FeeMonitor {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(timer) = timer.take() {
                timer.handle.abort();
            }
        }
    }
}

fn spawn_cycle(inner: &Arc<MonitorInner>) -> Vec<JoinHandle<CycleOutcome>> {
    debug!(
        component = "monitor",
        event = "refresh.cycle.start",
        networks = inner.endpoints.len()
    );

    inner
        .endpoints
        .iter()
        .map(|endpoints| {
            let inner = Arc::clone(inner);
            let endpoints = endpoints.clone();
            tokio::spawn(async move { refresh_network(&inner, &endpoints).await })
        })
        .collect()
}

async fn refresh_network(inner: &MonitorInner, endpoints: &EndpointSet) -> CycleOutcome {
    let network = endpoints.network();
    if !inner.store.try_begin(network) {
        debug!(
            component = "monitor",
            event = "refresh.skip.in_flight",
            network = %network
        );
        return CycleOutcome::Skipped { network };
    }

    match fetch_with_failover(inner.transport.as_ref(), endpoints, &inner.failover).await {
        Ok(success) => {
            let now_ms = Utc::now().timestamp_millis();
            inner.store.apply_success(network, &success.reading, now_ms);
            inner.history.append(
                network,
                wei_to_gwei(success.reading.effective_price),
                now_ms,
            );
            CycleOutcome::Updated {
                network,
                endpoint_index: success.endpoint_index,
            }
        }
        Err(err) => {
            let error = err.to_string();
            inner.store.apply_failure(network, error.clone());
            CycleOutcome::Failed { network, error }
        }
    }
}
