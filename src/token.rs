//! Collateral token lookup with latest-call-wins semantics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::fetcher::TransportError;

pub const UNKNOWN_TOKEN_ERROR: &str = "Could not fetch token information";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("ABI decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: u128,
}

#[async_trait]
pub trait TokenMetadataSource: Send + Sync + 'static {
    async fn metadata(&self, address: &str) -> Result<TokenMetadata, TokenError>;
    async fn balance_of(&self, token: &str, holder: &str) -> Result<u128, TokenError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: String,
    pub balance: String,
    pub valid: bool,
    pub error: Option<String>,
}

impl TokenSnapshot {
    pub fn unknown(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: "Unknown Token".to_string(),
            symbol: "UNKNOWN".to_string(),
            decimals: 18,
            total_supply: "0".to_string(),
            balance: "0".to_string(),
            valid: false,
            error: Some(UNKNOWN_TOKEN_ERROR.to_string()),
        }
    }
}

/// Returns true for a `0x`-prefixed, 20-byte hex address.
pub fn is_address_shaped(raw: &str) -> bool {
    raw.len() == 42
        && raw
            .strip_prefix("0x")
            .is_some_and(|digits| digits.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Renders a raw integer amount with `decimals` fractional digits, trimming
/// trailing zeros.
pub fn format_units(raw: u128, decimals: u8) -> String {
    let digits = raw.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }

    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Resolved(TokenSnapshot),
    /// A newer lookup started before this one finished; its result was dropped.
    Superseded,
    /// Input was empty or not address-shaped; the current token was discarded.
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLookupState {
    pub pending: bool,
    pub token: Option<TokenSnapshot>,
}

#[derive(Default)]
struct LookupSlot {
    pending_generation: Option<u64>,
    token: Option<TokenSnapshot>,
}

/// Clears the pending marker if the lookup future is dropped mid-flight,
/// unless a newer lookup has taken the slot over.
struct PendingGuard<'a> {
    slot: &'a RwLock<LookupSlot>,
    generation: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self
            .slot
            .write()
            .expect("token lookup lock should not be poisoned");
        if slot.pending_generation == Some(self.generation) {
            slot.pending_generation = None;
        }
    }
}

/// One logical search box. Only the most recent call's result is retained.
#[derive(Clone)]
pub struct TokenLookup {
    source: Arc<dyn TokenMetadataSource>,
    generation: Arc<AtomicU64>,
    slot: Arc<RwLock<LookupSlot>>,
}

impl TokenLookup {
    pub fn new(source: Arc<dyn TokenMetadataSource>) -> Self {
        Self {
            source,
            generation: Arc::new(AtomicU64::new(0)),
            slot: Arc::new(RwLock::new(LookupSlot::default())),
        }
    }

    pub fn state(&self) -> TokenLookupState {
        let slot = self.slot.read().expect("token lookup lock should not be poisoned");
        TokenLookupState {
            pending: slot.pending_generation.is_some(),
            token: slot.token.clone(),
        }
    }

    pub fn current(&self) -> Option<TokenSnapshot> {
        self.state().token
    }

    pub async fn lookup(&self, address: &str, holder: Option<&str>) -> LookupOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let address = address.trim();

        if !is_address_shaped(address) {
            let mut slot = self.slot.write().expect("token lookup lock should not be poisoned");
            slot.pending_generation = None;
            slot.token = None;
            return LookupOutcome::Cleared;
        }

        {
            let mut slot = self.slot.write().expect("token lookup lock should not be poisoned");
            slot.pending_generation = Some(generation);
            slot.token = None;
        }
        let _pending = PendingGuard {
            slot: &self.slot,
            generation,
        };

        let snapshot = self.resolve(address, holder).await;

        let mut slot = self.slot.write().expect("token lookup lock should not be poisoned");
        if self.generation.load(Ordering::SeqCst) != generation {
            return LookupOutcome::Superseded;
        }
        slot.pending_generation = None;
        slot.token = Some(snapshot.clone());
        LookupOutcome::Resolved(snapshot)
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.slot.write().expect("token lookup lock should not be poisoned");
        slot.pending_generation = None;
        slot.token = None;
    }

    async fn resolve(&self, address: &str, holder: Option<&str>) -> TokenSnapshot {
        let metadata = match self.source.metadata(address).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(
                    component = "token_lookup",
                    event = "token.lookup.failed",
                    address,
                    error = %err
                );
                return TokenSnapshot::unknown(address);
            }
        };

        let mut balance = "0".to_string();
        if let Some(holder) = holder {
            match self.source.balance_of(address, holder).await {
                Ok(raw) => balance = format_units(raw, metadata.decimals),
                Err(err) => warn!(
                    component = "token_lookup",
                    event = "token.balance.failed",
                    address,
                    holder,
                    error = %err
                ),
            }
        }

        info!(
            component = "token_lookup",
            event = "token.lookup.resolved",
            address,
            symbol = %metadata.symbol
        );

        TokenSnapshot {
            address: address.to_string(),
            total_supply: format_units(metadata.total_supply, metadata.decimals),
            name: metadata.name,
            symbol: metadata.symbol,
            decimals: metadata.decimals,
            balance,
            valid: true,
            error: None,
        }
    }
}
