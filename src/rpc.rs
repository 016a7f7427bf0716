//! JSON-RPC over HTTP transport for fee metrics and ERC-20 metadata reads.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::fetcher::{FeeReading, FeeTransport, TransportError};
use crate::network::{Endpoint, NetworkId};
use crate::token::{TokenError, TokenMetadata, TokenMetadataSource};

const SELECTOR_NAME: &str = "0x06fdde03";
const SELECTOR_SYMBOL: &str = "0x95d89b41";
const SELECTOR_DECIMALS: &str = "0x313ce567";
const SELECTOR_TOTAL_SUPPLY: &str = "0x18160ddd";
const SELECTOR_BALANCE_OF: &str = "0x70a08231";
const WORD_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcTransportConfig {
    pub request_timeout_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl Default for RpcTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 8_000,
            retry_count: 1,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// One pooled `reqwest::Client` per endpoint URL, each built with that
/// endpoint's connect timeout.
pub struct JsonRpcTransport {
    cfg: RpcTransportConfig,
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl JsonRpcTransport {
    pub fn new(cfg: RpcTransportConfig) -> Self {
        Self {
            cfg,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, endpoint: &Endpoint) -> Result<reqwest::Client, TransportError> {
        let mut clients = self
            .clients
            .lock()
            .expect("rpc client cache lock should not be poisoned");
        if let Some(client) = clients.get(&endpoint.url) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(endpoint.connect_timeout_ms))
            .timeout(Duration::from_millis(self.cfg.request_timeout_ms))
            .build()
            .map_err(|err| TransportError::Connection(err.to_string()))?;
        clients.insert(endpoint.url.clone(), client.clone());
        Ok(client)
    }

    pub async fn call(
        &self,
        endpoint: &Endpoint,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        let client = self.client_for(endpoint)?;
        let mut attempt: u32 = 0;

        loop {
            match call_once(&client, &endpoint.url, method, &params).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.cfg.retry_count || !is_retryable(&err) => {
                    return Err(err)
                }
                Err(err) => {
                    attempt += 1;
                    debug!(
                        component = "rpc",
                        event = "rpc.retry",
                        endpoint = %endpoint.url,
                        method,
                        attempt,
                        error = %err
                    );
                    tokio::time::sleep(Duration::from_millis(self.cfg.retry_delay_ms)).await;
                }
            }
        }
    }

    async fn eth_call(
        &self,
        endpoint: &Endpoint,
        to: &str,
        data: String,
    ) -> Result<Vec<u8>, TransportError> {
        let value = self
            .call(endpoint, "eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        let raw = value
            .as_str()
            .ok_or_else(|| TransportError::Malformed("eth_call result is not a string".to_string()))?;
        decode_hex_bytes(raw)
    }
}

impl Default for JsonRpcTransport {
    fn default() -> Self {
        Self::new(RpcTransportConfig::default())
    }
}

#[async_trait]
impl FeeTransport for JsonRpcTransport {
    async fn attempt(
        &self,
        _network: NetworkId,
        endpoint: &Endpoint,
    ) -> Result<FeeReading, TransportError> {
        let (gas_price, block) = tokio::try_join!(
            self.call(endpoint, "eth_gasPrice", json!([])),
            self.call(endpoint, "eth_getBlockByNumber", json!(["latest", false])),
        )?;

        parse_fee_reading(&gas_price, &block)
    }
}

/// ERC-20 reads against a single endpoint.
pub struct JsonRpcTokenSource {
    transport: JsonRpcTransport,
    endpoint: Endpoint,
}

impl JsonRpcTokenSource {
    pub fn new(transport: JsonRpcTransport, endpoint: Endpoint) -> Self {
        Self {
            transport,
            endpoint,
        }
    }
}

#[async_trait]
impl TokenMetadataSource for JsonRpcTokenSource {
    async fn metadata(&self, address: &str) -> Result<TokenMetadata, TokenError> {
        let endpoint = &self.endpoint;
        let (name, symbol, decimals, total_supply) = tokio::try_join!(
            self.transport.eth_call(endpoint, address, SELECTOR_NAME.to_string()),
            self.transport.eth_call(endpoint, address, SELECTOR_SYMBOL.to_string()),
            self.transport.eth_call(endpoint, address, SELECTOR_DECIMALS.to_string()),
            self.transport.eth_call(endpoint, address, SELECTOR_TOTAL_SUPPLY.to_string()),
        )?;

        let decimals = decode_uint(&decimals)?;
        Ok(TokenMetadata {
            name: decode_string(&name)?,
            symbol: decode_string(&symbol)?,
            decimals: u8::try_from(decimals)
                .map_err(|_| TokenError::Decode(format!("decimals out of range: {decimals}")))?,
            total_supply: decode_uint(&total_supply)?,
        })
    }

    async fn balance_of(&self, token: &str, holder: &str) -> Result<u128, TokenError> {
        let data = encode_balance_of(holder)?;
        let raw = self.transport.eth_call(&self.endpoint, token, data).await?;
        decode_uint(&raw)
    }
}

async fn call_once(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: &Value,
) -> Result<Value, TransportError> {
    let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
    let response = client
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(classify_reqwest_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }

    let parsed: RpcResponse = response.json().await.map_err(classify_reqwest_error)?;
    if let Some(error) = parsed.error {
        return Err(TransportError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    parsed
        .result
        .filter(|value| !value.is_null())
        .ok_or_else(|| TransportError::Malformed(format!("{method} returned no result")))
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::Malformed(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

fn is_retryable(err: &TransportError) -> bool {
    match err {
        TransportError::Timeout | TransportError::Connection(_) => true,
        TransportError::Status(code) => *code == 429 || *code >= 500,
        TransportError::Rpc { .. } | TransportError::Malformed(_) => false,
    }
}

pub fn parse_fee_reading(gas_price: &Value, block: &Value) -> Result<FeeReading, TransportError> {
    let effective_price = parse_quantity(gas_price, "gasPrice")?;
    let block_height = parse_quantity(
        block
            .get("number")
            .ok_or_else(|| TransportError::Malformed("block has no number".to_string()))?,
        "number",
    )?;

    let base_fee = block
        .get("baseFeePerGas")
        .filter(|value| !value.is_null())
        .map(|value| parse_quantity(value, "baseFeePerGas"))
        .transpose()?;

    let block_timestamp = block
        .get("timestamp")
        .filter(|value| !value.is_null())
        .map(|value| parse_quantity(value, "timestamp"))
        .transpose()?
        .map(|ts| ts as i64);

    Ok(FeeReading {
        effective_price,
        base_fee,
        priority_fee: None,
        block_height,
        block_timestamp,
    })
}

pub fn parse_quantity(value: &Value, field: &str) -> Result<u64, TransportError> {
    let raw = value
        .as_str()
        .ok_or_else(|| TransportError::Malformed(format!("{field} is not a hex string")))?;
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| TransportError::Malformed(format!("{field} lacks 0x prefix: {raw}")))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|_| TransportError::Malformed(format!("{field} is not a valid quantity: {raw}")))
}

fn decode_hex_bytes(raw: &str) -> Result<Vec<u8>, TransportError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits).map_err(|err| TransportError::Malformed(format!("invalid hex data: {err}")))
}

fn encode_balance_of(holder: &str) -> Result<String, TokenError> {
    let digits = holder
        .strip_prefix("0x")
        .filter(|digits| digits.len() == 40)
        .ok_or_else(|| TokenError::InvalidAddress(holder.to_string()))?;
    Ok(format!(
        "{SELECTOR_BALANCE_OF}{:0>64}",
        digits.to_ascii_lowercase()
    ))
}

pub fn decode_uint(data: &[u8]) -> Result<u128, TokenError> {
    if data.len() < WORD_LEN {
        return Err(TokenError::Decode(format!(
            "expected a {WORD_LEN}-byte word, got {} bytes",
            data.len()
        )));
    }
    let word = &data[..WORD_LEN];
    if word[..16].iter().any(|byte| *byte != 0) {
        return Err(TokenError::Decode("integer exceeds 128 bits".to_string()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Decodes an ABI `string` return value, falling back to a zero-padded
/// `bytes32` for tokens that predate the string convention.
pub fn decode_string(data: &[u8]) -> Result<String, TokenError> {
    if data.len() == WORD_LEN {
        let trimmed: Vec<u8> = data.iter().copied().take_while(|byte| *byte != 0).collect();
        return Ok(String::from_utf8_lossy(&trimmed).into_owned());
    }

    let offset = usize::try_from(decode_uint(data)?)
        .map_err(|_| TokenError::Decode("string offset out of range".to_string()))?;
    let len_end = offset
        .checked_add(WORD_LEN)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| TokenError::Decode("string length word out of bounds".to_string()))?;
    let len = usize::try_from(decode_uint(&data[offset..len_end])?)
        .map_err(|_| TokenError::Decode("string length out of range".to_string()))?;
    let bytes = data
        .get(len_end..len_end.saturating_add(len))
        .ok_or_else(|| TokenError::Decode("string body out of bounds".to_string()))?;

    Ok(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(value: u128) -> Vec<u8> {
        let mut out = vec![0u8; 16];
        out.extend_from_slice(&value.to_be_bytes());
        out
    }

    #[test]
    fn parses_gas_price_and_latest_block() {
        let reading = parse_fee_reading(
            &json!("0x3b9aca00"),
            &json!({ "number": "0x10", "baseFeePerGas": "0x7", "timestamp": "0x65000000" }),
        )
        .unwrap();

        assert_eq!(reading.effective_price, 1_000_000_000);
        assert_eq!(reading.block_height, 16);
        assert_eq!(reading.base_fee, Some(7));
        assert_eq!(reading.block_timestamp, Some(0x6500_0000));
        assert_eq!(reading.priority_fee, None);
    }

    #[test]
    fn pre_london_block_has_no_base_fee() {
        let reading =
            parse_fee_reading(&json!("0x1"), &json!({ "number": "0x1", "baseFeePerGas": null }))
                .unwrap();
        assert_eq!(reading.base_fee, None);
        assert_eq!(reading.block_timestamp, None);
    }

    #[test]
    fn malformed_quantities_are_rejected() {
        assert!(matches!(
            parse_quantity(&json!(12), "gasPrice"),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(
            parse_quantity(&json!("12"), "gasPrice"),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(
            parse_fee_reading(&json!("0x1"), &json!({})),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn decodes_abi_string() {
        let mut data = word(32);
        data.extend(word(4));
        let mut body = b"USDC".to_vec();
        body.resize(32, 0);
        data.extend(body);

        assert_eq!(decode_string(&data).unwrap(), "USDC");
    }

    #[test]
    fn decodes_bytes32_string_fallback() {
        let mut data = b"MKR".to_vec();
        data.resize(32, 0);
        assert_eq!(decode_string(&data).unwrap(), "MKR");
    }

    #[test]
    fn uint_overflowing_128_bits_is_an_error() {
        let data = vec![0xffu8; 32];
        assert!(decode_uint(&data).is_err());
        assert_eq!(decode_uint(&word(18)).unwrap(), 18);
    }

    #[test]
    fn balance_of_call_data_pads_address() {
        let data = encode_balance_of("0x3eede3fe85f32d013e368d02db07c0662390eadd").unwrap();
        assert_eq!(data.len(), 10 + 64);
        assert!(data.starts_with("0x70a08231000000000000000000000000"));
        assert!(encode_balance_of("0x1234").is_err());
    }

    #[test]
    fn only_transient_errors_are_retried() {
        assert!(is_retryable(&TransportError::Timeout));
        assert!(is_retryable(&TransportError::Status(503)));
        assert!(!is_retryable(&TransportError::Status(400)));
        assert!(!is_retryable(&TransportError::Malformed("x".to_string())));
    }
}
