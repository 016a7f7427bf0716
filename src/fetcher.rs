//! Ordered endpoint failover for fee metrics.
//!
//! Every invocation starts at the primary endpoint. The first endpoint that
//! answers wins; later endpoints are never consulted once one succeeds. Each
//! attempt is wrapped in an outer deadline that is independent of whatever
//! timeout the transport applies itself.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::network::{Endpoint, EndpointSet, NetworkId};

/// 1.5 gwei. Endpoints do not report a priority fee, so this estimate is used.
pub const DEFAULT_PRIORITY_FEE_WEI: u64 = 1_500_000_000;
pub const DEFAULT_OUTER_DEADLINE_MS: u64 = 10_000;

/// Raw metrics returned by a single successful endpoint attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeReading {
    pub effective_price: u64,
    pub base_fee: Option<u64>,
    pub priority_fee: Option<u64>,
    pub block_height: u64,
    pub block_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timeout")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One request/response exchange against a single endpoint.
///
/// Implementations own their low-level timeout and retry policy.
#[async_trait]
pub trait FeeTransport: Send + Sync + 'static {
    async fn attempt(
        &self,
        network: NetworkId,
        endpoint: &Endpoint,
    ) -> Result<FeeReading, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverConfig {
    pub outer_deadline_ms: u64,
    pub default_priority_fee_wei: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            outer_deadline_ms: DEFAULT_OUTER_DEADLINE_MS,
            default_priority_fee_wei: DEFAULT_PRIORITY_FEE_WEI,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("no endpoints configured for {0}")]
    NoEndpoints(NetworkId),
    #[error("All RPC endpoints failed. Last error: {last_error}")]
    AllEndpointsFailed {
        network: NetworkId,
        attempts: usize,
        last_error: String,
    },
}

/// Successful outcome of a failover sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSuccess {
    pub reading: FeeReading,
    pub endpoint_index: usize,
    pub endpoint_url: String,
}

pub async fn fetch_with_failover(
    transport: &dyn FeeTransport,
    endpoints: &EndpointSet,
    cfg: &FailoverConfig,
) -> Result<FetchSuccess, FetchError> {
    let network = endpoints.network();
    if endpoints.is_empty() {
        return Err(FetchError::NoEndpoints(network));
    }

    let deadline = Duration::from_millis(cfg.outer_deadline_ms);
    let mut last_error = String::from("Unknown error");

    for (index, endpoint) in endpoints.endpoints().iter().enumerate() {
        debug!(
            component = "fetcher",
            event = "fetch.attempt",
            network = %network,
            endpoint = %endpoint.url,
            endpoint_index = index
        );

        let started = Instant::now();
        let outcome = match tokio::time::timeout(deadline, transport.attempt(network, endpoint))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        match outcome {
            Ok(mut reading) => {
                if reading.priority_fee.is_none() {
                    reading.priority_fee = Some(cfg.default_priority_fee_wei);
                }
                info!(
                    component = "fetcher",
                    event = "fetch.success",
                    network = %network,
                    endpoint = %endpoint.url,
                    endpoint_index = index,
                    block_height = reading.block_height,
                    elapsed_ms = started.elapsed().as_millis() as u64
                );
                return Ok(FetchSuccess {
                    reading,
                    endpoint_index: index,
                    endpoint_url: endpoint.url.clone(),
                });
            }
            Err(err) => {
                warn!(
                    component = "fetcher",
                    event = "fetch.endpoint.failed",
                    network = %network,
                    endpoint = %endpoint.url,
                    endpoint_index = index,
                    error = %err
                );
                last_error = err.to_string();
            }
        }
    }

    warn!(
        component = "fetcher",
        event = "fetch.exhausted",
        network = %network,
        attempts = endpoints.len(),
        last_error = %last_error
    );

    Err(FetchError::AllEndpointsFailed {
        network,
        attempts: endpoints.len(),
        last_error,
    })
}
