//! Network identifiers and their ordered RPC endpoint lists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 8_000;

pub const SEPOLIA_RPC_URLS: [&str; 5] = [
    "https://ethereum-sepolia-rpc.publicnode.com",
    "https://sepolia.gateway.tenderly.co",
    "https://rpc2.sepolia.org",
    "https://ethereum-sepolia.blockpi.network/v1/rpc/public",
    "https://sepolia.drpc.org",
];

pub const LISK_SEPOLIA_RPC_URLS: [&str; 1] = ["https://rpc.sepolia-api.lisk.com"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NetworkId {
    #[serde(rename = "sepolia")]
    Sepolia,
    #[serde(rename = "lisk")]
    LiskSepolia,
}

pub const ALL_NETWORKS: [NetworkId; 2] = [NetworkId::Sepolia, NetworkId::LiskSepolia];

impl NetworkId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sepolia => "sepolia",
            Self::LiskSepolia => "lisk",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Sepolia => "Ethereum Sepolia",
            Self::LiskSepolia => "Lisk Sepolia",
        }
    }

    pub fn chain_id(self) -> u64 {
        match self {
            Self::Sepolia => 11_155_111,
            Self::LiskSepolia => 4_202,
        }
    }

    pub fn explorer_url(self) -> &'static str {
        match self {
            Self::Sepolia => "https://sepolia.etherscan.io",
            Self::LiskSepolia => "https://sepolia-blockscout.lisk.com",
        }
    }

    pub fn default_rpc_urls(self) -> &'static [&'static str] {
        match self {
            Self::Sepolia => &SEPOLIA_RPC_URLS,
            Self::LiskSepolia => &LISK_SEPOLIA_RPC_URLS,
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint list must contain at least one endpoint")]
    Empty,
    #[error("unsupported network '{0}'")]
    UnknownNetwork(String),
}

impl FromStr for NetworkId {
    type Err = EndpointError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sepolia" | "ethereum-sepolia" => Ok(Self::Sepolia),
            "lisk" | "lisk-sepolia" => Ok(Self::LiskSepolia),
            _ => Err(EndpointError::UnknownNetwork(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub connect_timeout_ms: u64,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout_ms: u64) -> Self {
        self.connect_timeout_ms = connect_timeout_ms;
        self
    }
}

/// Ordered, non-empty endpoint list for one network. Index 0 is the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    network: NetworkId,
    endpoints: Vec<Endpoint>,
}

impl EndpointSet {
    pub fn new(network: NetworkId, endpoints: Vec<Endpoint>) -> Result<Self, EndpointError> {
        if endpoints.is_empty() {
            return Err(EndpointError::Empty);
        }
        Ok(Self { network, endpoints })
    }

    pub fn from_urls<I, S>(network: NetworkId, urls: I) -> Result<Self, EndpointError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(network, urls.into_iter().map(Endpoint::new).collect())
    }

    pub fn defaults_for(network: NetworkId) -> Self {
        Self {
            network,
            endpoints: network
                .default_rpc_urls()
                .iter()
                .map(|url| Endpoint::new(*url))
                .collect(),
        }
    }

    pub fn network(&self) -> NetworkId {
        self.network
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn primary(&self) -> &Endpoint {
        &self.endpoints[0]
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

pub fn default_endpoint_sets() -> Vec<EndpointSet> {
    ALL_NETWORKS
        .iter()
        .map(|network| EndpointSet::defaults_for(*network))
        .collect()
}
