//! Latest applied fee snapshot per network.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::fetcher::FeeReading;
use crate::network::NetworkId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSnapshot {
    pub base_fee: Option<u64>,
    pub priority_fee: Option<u64>,
    pub effective_price: Option<u64>,
    pub block_height: Option<u64>,
    pub block_timestamp: Option<i64>,
    pub is_loading: bool,
    pub last_error: Option<String>,
    pub captured_at: i64,
}

impl FeeSnapshot {
    pub fn empty(captured_at: i64) -> Self {
        Self {
            base_fee: None,
            priority_fee: None,
            effective_price: None,
            block_height: None,
            block_timestamp: None,
            is_loading: false,
            last_error: None,
            captured_at,
        }
    }

    pub fn has_data(&self) -> bool {
        self.effective_price.is_some()
    }
}

/// Shared, cheaply cloneable store. Writers are the refresh cycle only.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<RwLock<BTreeMap<NetworkId, FeeSnapshot>>>,
}

impl SnapshotStore {
    pub fn new(networks: &[NetworkId]) -> Self {
        let now_ms = Utc::now().timestamp_millis();
        let map = networks
            .iter()
            .map(|network| (*network, FeeSnapshot::empty(now_ms)))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn get(&self, network: NetworkId) -> Option<FeeSnapshot> {
        self.inner
            .read()
            .expect("snapshot lock should not be poisoned")
            .get(&network)
            .cloned()
    }

    pub fn all(&self) -> BTreeMap<NetworkId, FeeSnapshot> {
        self.inner
            .read()
            .expect("snapshot lock should not be poisoned")
            .clone()
    }

    /// Marks the start of an attempt sequence. Returns `false` when one is
    /// already in flight for this network, in which case nothing changes.
    pub fn try_begin(&self, network: NetworkId) -> bool {
        let mut guard = self
            .inner
            .write()
            .expect("snapshot lock should not be poisoned");
        let now_ms = Utc::now().timestamp_millis();
        let entry = guard
            .entry(network)
            .or_insert_with(|| FeeSnapshot::empty(now_ms));
        if entry.is_loading {
            return false;
        }
        entry.is_loading = true;
        entry.last_error = None;
        true
    }

    pub fn apply_success(&self, network: NetworkId, reading: &FeeReading, captured_at: i64) {
        let mut guard = self
            .inner
            .write()
            .expect("snapshot lock should not be poisoned");
        guard.insert(
            network,
            FeeSnapshot {
                base_fee: reading.base_fee,
                priority_fee: reading.priority_fee,
                effective_price: Some(reading.effective_price),
                block_height: Some(reading.block_height),
                block_timestamp: reading.block_timestamp,
                is_loading: false,
                last_error: None,
                captured_at,
            },
        );
    }

    /// Fee fields and `captured_at` keep the previous cycle's values.
    pub fn apply_failure(&self, network: NetworkId, message: impl Into<String>) {
        let mut guard = self
            .inner
            .write()
            .expect("snapshot lock should not be poisoned");
        let now_ms = Utc::now().timestamp_millis();
        let entry = guard
            .entry(network)
            .or_insert_with(|| FeeSnapshot::empty(now_ms));
        entry.is_loading = false;
        entry.last_error = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(price: u64) -> FeeReading {
        FeeReading {
            effective_price: price,
            base_fee: Some(price - 1),
            priority_fee: Some(1),
            block_height: 100,
            block_timestamp: Some(1_700_000_000),
        }
    }

    #[test]
    fn new_store_starts_idle_without_data() {
        let store = SnapshotStore::new(&[NetworkId::Sepolia]);
        let snapshot = store.get(NetworkId::Sepolia).unwrap();
        assert!(!snapshot.is_loading);
        assert!(!snapshot.has_data());
        assert!(snapshot.last_error.is_none());
    }

    #[test]
    fn begin_clears_error_and_blocks_a_second_sequence() {
        let store = SnapshotStore::new(&[NetworkId::Sepolia]);
        store.apply_failure(NetworkId::Sepolia, "boom");

        assert!(store.try_begin(NetworkId::Sepolia));
        let snapshot = store.get(NetworkId::Sepolia).unwrap();
        assert!(snapshot.is_loading);
        assert!(snapshot.last_error.is_none());

        assert!(!store.try_begin(NetworkId::Sepolia));
    }

    #[test]
    fn failure_keeps_previous_fee_fields() {
        let store = SnapshotStore::new(&[NetworkId::LiskSepolia]);
        store.try_begin(NetworkId::LiskSepolia);
        store.apply_success(NetworkId::LiskSepolia, &reading(12), 1_000);

        store.try_begin(NetworkId::LiskSepolia);
        store.apply_failure(NetworkId::LiskSepolia, "All RPC endpoints failed");

        let snapshot = store.get(NetworkId::LiskSepolia).unwrap();
        assert_eq!(snapshot.effective_price, Some(12));
        assert_eq!(snapshot.base_fee, Some(11));
        assert_eq!(snapshot.captured_at, 1_000);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.last_error.as_deref(), Some("All RPC endpoints failed"));
    }
}
