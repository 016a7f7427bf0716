use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gaswatch::{
    CycleOutcome, Endpoint, EndpointSet, FeeMonitor, FeeReading, FeeTransport, MonitorConfig,
    NetworkId, PriceError, PriceSource, PriceTracker, TransportError, DEFAULT_PRIORITY_FEE_WEI,
    HISTORY_CAPACITY,
};

const SEPOLIA_A: &str = "http://sepolia-a.test";
const SEPOLIA_B: &str = "http://sepolia-b.test";
const LISK_C: &str = "http://lisk-c.test";

#[derive(Clone)]
enum Behavior {
    Ok(FeeReading),
    Fail(TransportError),
    Delayed(u64, FeeReading),
}

#[derive(Default)]
struct FakeTransport {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn set(&self, url: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    fn calls_to(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == url)
            .count()
    }
}

#[async_trait]
impl FeeTransport for FakeTransport {
    async fn attempt(
        &self,
        _network: NetworkId,
        endpoint: &Endpoint,
    ) -> Result<FeeReading, TransportError> {
        self.calls.lock().unwrap().push(endpoint.url.clone());
        let behavior = self.behaviors.lock().unwrap().get(&endpoint.url).cloned();
        match behavior {
            Some(Behavior::Ok(reading)) => Ok(reading),
            Some(Behavior::Fail(err)) => Err(err),
            Some(Behavior::Delayed(ms, reading)) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(reading)
            }
            None => Err(TransportError::Connection("unscripted endpoint".to_string())),
        }
    }
}

struct FixedPrice(f64);

#[async_trait]
impl PriceSource for FixedPrice {
    async fn fetch_usd(&self) -> Result<f64, PriceError> {
        Ok(self.0)
    }
}

#[derive(Default)]
struct DownPrice {
    calls: AtomicUsize,
}

#[async_trait]
impl PriceSource for DownPrice {
    async fn fetch_usd(&self) -> Result<f64, PriceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PriceError::Request("503".to_string()))
    }
}

fn gwei(value: u64) -> u64 {
    value * 1_000_000_000
}

fn reading(price_wei: u64, block_height: u64) -> FeeReading {
    FeeReading {
        effective_price: price_wei,
        base_fee: Some(price_wei),
        priority_fee: None,
        block_height,
        block_timestamp: Some(1_700_000_000),
    }
}

fn endpoint_sets() -> Vec<EndpointSet> {
    vec![
        EndpointSet::from_urls(NetworkId::Sepolia, [SEPOLIA_A, SEPOLIA_B]).unwrap(),
        EndpointSet::from_urls(NetworkId::LiskSepolia, [LISK_C]).unwrap(),
    ]
}

fn monitor_with(transport: &Arc<FakeTransport>) -> FeeMonitor {
    let transport: Arc<dyn FeeTransport> = transport.clone();
    FeeMonitor::new(endpoint_sets(), transport, MonitorConfig::default())
}

#[tokio::test]
async fn failing_primary_falls_through_to_next_endpoint() {
    let transport = Arc::new(FakeTransport::default());
    transport.set(
        SEPOLIA_A,
        Behavior::Fail(TransportError::Connection("refused".to_string())),
    );
    transport.set(SEPOLIA_B, Behavior::Ok(reading(gwei(12), 500)));
    transport.set(LISK_C, Behavior::Ok(reading(gwei(1), 900)));
    let monitor = monitor_with(&transport);

    let outcomes = monitor.refresh_now().await;

    assert_eq!(
        outcomes,
        vec![
            CycleOutcome::Updated {
                network: NetworkId::Sepolia,
                endpoint_index: 1
            },
            CycleOutcome::Updated {
                network: NetworkId::LiskSepolia,
                endpoint_index: 0
            },
        ]
    );

    let sepolia = monitor.snapshot(NetworkId::Sepolia).unwrap();
    assert_eq!(sepolia.effective_price, Some(gwei(12)));
    assert_eq!(sepolia.priority_fee, Some(DEFAULT_PRIORITY_FEE_WEI));
    assert_eq!(sepolia.block_height, Some(500));
    assert!(!sepolia.is_loading);
    assert_eq!(sepolia.last_error, None);

    let history = monitor.history(NetworkId::Sepolia);
    assert_eq!(history.len(), 1);
    assert!((history[0].value - 12.0).abs() < 1e-9);
    assert_eq!(transport.calls_to(SEPOLIA_A), 1);
    assert_eq!(transport.calls_to(SEPOLIA_B), 1);
}

#[tokio::test]
async fn exhausted_endpoints_keep_previous_values_and_record_error() {
    let transport = Arc::new(FakeTransport::default());
    transport.set(SEPOLIA_A, Behavior::Ok(reading(gwei(3), 10)));
    transport.set(LISK_C, Behavior::Ok(reading(gwei(1), 20)));
    let monitor = monitor_with(&transport);
    monitor.refresh_now().await;

    transport.set(
        SEPOLIA_A,
        Behavior::Fail(TransportError::Connection("refused".to_string())),
    );
    transport.set(
        SEPOLIA_B,
        Behavior::Fail(TransportError::Connection("down".to_string())),
    );
    let outcomes = monitor.refresh_now().await;

    assert!(matches!(
        outcomes[0],
        CycleOutcome::Failed {
            network: NetworkId::Sepolia,
            ..
        }
    ));

    let sepolia = monitor.snapshot(NetworkId::Sepolia).unwrap();
    assert_eq!(sepolia.effective_price, Some(gwei(3)));
    assert_eq!(sepolia.block_height, Some(10));
    assert!(!sepolia.is_loading);
    assert_eq!(
        sepolia.last_error.as_deref(),
        Some("All RPC endpoints failed. Last error: connection failed: down")
    );
    assert_eq!(monitor.history(NetworkId::Sepolia).len(), 1);
    assert_eq!(monitor.history(NetworkId::LiskSepolia).len(), 2);
}

#[tokio::test]
async fn next_success_clears_previous_error() {
    let transport = Arc::new(FakeTransport::default());
    transport.set(LISK_C, Behavior::Ok(reading(gwei(1), 20)));
    let monitor = monitor_with(&transport);

    monitor.refresh_now().await;
    assert!(monitor
        .snapshot(NetworkId::Sepolia)
        .unwrap()
        .last_error
        .is_some());

    transport.set(SEPOLIA_B, Behavior::Ok(reading(gwei(2), 30)));
    monitor.refresh_now().await;

    let sepolia = monitor.snapshot(NetworkId::Sepolia).unwrap();
    assert_eq!(sepolia.last_error, None);
    assert_eq!(sepolia.effective_price, Some(gwei(2)));
}

#[tokio::test(start_paused = true)]
async fn networks_refresh_in_parallel() {
    let transport = Arc::new(FakeTransport::default());
    transport.set(SEPOLIA_A, Behavior::Delayed(3_000, reading(gwei(2), 1)));
    transport.set(LISK_C, Behavior::Delayed(3_000, reading(gwei(1), 2)));
    let monitor = monitor_with(&transport);

    let started = tokio::time::Instant::now();
    let outcomes = monitor.refresh_now().await;
    let elapsed = started.elapsed();

    assert_eq!(outcomes.len(), 2);
    assert!(elapsed >= Duration::from_millis(3_000));
    assert!(elapsed < Duration::from_millis(6_000));
}

#[tokio::test(start_paused = true)]
async fn in_flight_network_is_skipped_by_overlapping_cycle() {
    let transport = Arc::new(FakeTransport::default());
    transport.set(SEPOLIA_A, Behavior::Delayed(3_000, reading(gwei(2), 1)));
    transport.set(LISK_C, Behavior::Ok(reading(gwei(1), 2)));
    let monitor = Arc::new(monitor_with(&transport));

    let first = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.refresh_now().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(monitor.snapshot(NetworkId::Sepolia).unwrap().is_loading);

    let second = monitor.refresh_now().await;
    assert!(second.contains(&CycleOutcome::Skipped {
        network: NetworkId::Sepolia
    }));

    let first = first.await.unwrap();
    assert!(first.contains(&CycleOutcome::Updated {
        network: NetworkId::Sepolia,
        endpoint_index: 0
    }));
    assert_eq!(transport.calls_to(SEPOLIA_A), 1);
    assert!(!monitor.snapshot(NetworkId::Sepolia).unwrap().is_loading);
}

#[tokio::test(start_paused = true)]
async fn timer_runs_cycles_until_stopped() {
    let transport = Arc::new(FakeTransport::default());
    transport.set(SEPOLIA_A, Behavior::Ok(reading(gwei(2), 1)));
    transport.set(LISK_C, Behavior::Ok(reading(gwei(1), 2)));
    let monitor = monitor_with(&transport);

    monitor.start(1_000);
    assert!(monitor.is_running());
    assert_eq!(monitor.auto_refresh_interval_ms(), Some(1_000));

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(transport.calls_to(LISK_C), 3);

    monitor.stop();
    assert!(!monitor.is_running());
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(transport.calls_to(LISK_C), 3);

    monitor.set_auto_refresh(true, None);
    assert_eq!(monitor.auto_refresh_interval_ms(), Some(8_000));
    monitor.set_auto_refresh(false, None);
    assert!(!monitor.is_running());
}

#[tokio::test(start_paused = true)]
async fn stop_lets_in_flight_fetches_apply() {
    let transport = Arc::new(FakeTransport::default());
    transport.set(SEPOLIA_A, Behavior::Delayed(3_000, reading(gwei(4), 42)));
    transport.set(LISK_C, Behavior::Ok(reading(gwei(1), 2)));
    let monitor = monitor_with(&transport);

    monitor.start(8_000);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(monitor.snapshot(NetworkId::Sepolia).unwrap().is_loading);

    monitor.stop();
    tokio::time::sleep(Duration::from_millis(5_000)).await;

    let sepolia = monitor.snapshot(NetworkId::Sepolia).unwrap();
    assert_eq!(sepolia.effective_price, Some(gwei(4)));
    assert_eq!(sepolia.block_height, Some(42));
    assert!(!sepolia.is_loading);
    assert_eq!(monitor.history(NetworkId::Sepolia).len(), 1);
    assert_eq!(transport.calls_to(SEPOLIA_A), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_price_is_retried_once_per_minute_by_the_timer() {
    let transport: Arc<dyn FeeTransport> = Arc::new(FakeTransport::default());
    let price = Arc::new(DownPrice::default());
    let monitor = FeeMonitor::with_price(
        endpoint_sets(),
        transport,
        MonitorConfig::default(),
        PriceTracker::new(price.clone()),
    );

    monitor.start(8_000);
    tokio::time::sleep(Duration::from_millis(59_000)).await;
    assert_eq!(price.calls.load(Ordering::SeqCst), 1);
    assert!(monitor.price_quote().unwrap().error.is_some());

    tokio::time::sleep(Duration::from_millis(6_000)).await;
    assert_eq!(price.calls.load(Ordering::SeqCst), 2);
    monitor.stop();
}

#[tokio::test]
async fn history_is_capped_and_keeps_newest_values() {
    let transport = Arc::new(FakeTransport::default());
    transport.set(LISK_C, Behavior::Ok(reading(gwei(1), 2)));
    let monitor = monitor_with(&transport);

    for step in 1..=25u64 {
        transport.set(SEPOLIA_A, Behavior::Ok(reading(gwei(step), step)));
        monitor.refresh_now().await;
    }

    let history = monitor.history(NetworkId::Sepolia);
    assert_eq!(history.len(), HISTORY_CAPACITY);
    assert!((history[0].value - 6.0).abs() < 1e-9);
    assert!((history[HISTORY_CAPACITY - 1].value - 25.0).abs() < 1e-9);
}

#[tokio::test]
async fn price_quote_is_refreshed_on_demand() {
    let transport: Arc<dyn FeeTransport> = Arc::new(FakeTransport::default());
    let monitor = FeeMonitor::with_price(
        endpoint_sets(),
        transport,
        MonitorConfig::default(),
        PriceTracker::new(Arc::new(FixedPrice(2_500.0))),
    );

    assert_eq!(monitor.price_quote().unwrap().usd, 0.0);
    monitor.refresh_price().await;

    let quote = monitor.price_quote().unwrap();
    assert_eq!(quote.usd, 2_500.0);
    assert_eq!(quote.error, None);
    assert!(!quote.loading);
}
