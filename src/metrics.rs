//! Pure derivations over fee snapshots used by the dashboard.

use serde::{Deserialize, Serialize};

use crate::network::NetworkId;

pub const WEI_PER_GWEI: f64 = 1e9;
pub const WEI_PER_ETH: f64 = 1e18;
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl FeeLevel {
    pub fn classify(price_wei: Option<u64>) -> Self {
        let Some(price) = price_wei else {
            return Self::Unknown;
        };
        let gwei = wei_to_gwei(price);
        if gwei < 1.0 {
            Self::Low
        } else if gwei < 5.0 {
            Self::Medium
        } else {
            Self::High
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Unknown => "unknown",
        }
    }
}

pub fn wei_to_gwei(wei: u64) -> f64 {
    wei as f64 / WEI_PER_GWEI
}

pub fn format_gwei(price_wei: Option<u64>) -> String {
    match price_wei {
        Some(price) => format!("{:.3} Gwei", wei_to_gwei(price)),
        None => "N/A".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasCost {
    pub eth: String,
    pub usd: String,
}

/// Cost of a plain transfer at `price_wei`. USD is `"0"` until a quote exists.
pub fn transfer_cost(price_wei: Option<u64>, usd_per_eth: f64) -> GasCost {
    let Some(price) = price_wei else {
        return GasCost {
            eth: "0".to_string(),
            usd: "0".to_string(),
        };
    };

    let cost_eth = price as f64 * TRANSFER_GAS_LIMIT as f64 / WEI_PER_ETH;
    let usd = if usd_per_eth > 0.0 {
        format!("{:.4}", cost_eth * usd_per_eth)
    } else {
        "0".to_string()
    };

    GasCost {
        eth: format!("{:.6}", cost_eth),
        usd,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkComparison {
    pub cheaper: NetworkId,
    pub difference_gwei: f64,
    pub percentage: f64,
}

/// Ties resolve to `b`.
pub fn compare_networks(
    a: (NetworkId, Option<u64>),
    b: (NetworkId, Option<u64>),
) -> Option<NetworkComparison> {
    let a_gwei = wei_to_gwei(a.1?);
    let b_gwei = wei_to_gwei(b.1?);
    let difference = (a_gwei - b_gwei).abs();
    let larger = a_gwei.max(b_gwei);
    let percentage = if larger > 0.0 {
        difference / larger * 100.0
    } else {
        0.0
    };

    Some(NetworkComparison {
        cheaper: if a_gwei < b_gwei { a.0 } else { b.0 },
        difference_gwei: difference,
        percentage,
    })
}

pub fn time_since_update(now_ms: i64, timestamp_ms: i64) -> String {
    let seconds = (now_ms - timestamp_ms).max(0) / 1_000;
    if seconds < 60 {
        format!("{seconds}s ago")
    } else {
        format!("{}m ago", seconds / 60)
    }
}
