//! Fixed-capacity fee trend history per network.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::network::NetworkId;

pub const HISTORY_CAPACITY: usize = 20;
pub const MIN_BAR_HEIGHT_PCT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// Insertion-ordered ring per network; the oldest point is evicted first.
#[derive(Clone, Default)]
pub struct HistoryBuffer {
    inner: Arc<RwLock<BTreeMap<NetworkId, VecDeque<HistoryPoint>>>>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, network: NetworkId, value: f64, timestamp: i64) {
        let mut guard = self
            .inner
            .write()
            .expect("history lock should not be poisoned");
        let points = guard
            .entry(network)
            .or_insert_with(|| VecDeque::with_capacity(HISTORY_CAPACITY));
        while points.len() >= HISTORY_CAPACITY {
            points.pop_front();
        }
        points.push_back(HistoryPoint { timestamp, value });
    }

    pub fn snapshot(&self, network: NetworkId) -> Vec<HistoryPoint> {
        self.inner
            .read()
            .expect("history lock should not be poisoned")
            .get(&network)
            .map(|points| points.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, network: NetworkId) -> usize {
        self.inner
            .read()
            .expect("history lock should not be poisoned")
            .get(&network)
            .map_or(0, VecDeque::len)
    }
}

/// Bar heights in percent of the buffer maximum, floored at
/// [`MIN_BAR_HEIGHT_PCT`]. `None` when fewer than two points exist.
pub fn trend_heights(points: &[HistoryPoint]) -> Option<Vec<f64>> {
    if points.len() < 2 {
        return None;
    }

    let max = points
        .iter()
        .map(|point| point.value)
        .fold(f64::NEG_INFINITY, f64::max);

    let heights = points
        .iter()
        .map(|point| {
            let raw = if max > 0.0 {
                point.value / max * 100.0
            } else {
                0.0
            };
            raw.max(MIN_BAR_HEIGHT_PCT)
        })
        .collect();

    Some(heights)
}
