// src/chain/client.rs
//
// Thin JSON-RPC client for the EVM log source. Only the three calls the
// engine needs: eth_blockNumber, eth_getBlockByNumber (timestamps) and
// eth_getLogs for the fixed factory address.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::error::LadderbotError;

/// JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A raw log record exactly as returned by eth_getLogs. Quantities stay as
/// hex strings until a consumer asks for them, so a malformed record can be
/// carried around and dropped at decode time instead of failing the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    pub log_index: String,
}

impl RawLog {
    pub fn block_number(&self) -> Option<u64> {
        parse_hex_quantity(&self.block_number)
    }

    pub fn log_index(&self) -> Option<u64> {
        parse_hex_quantity(&self.log_index)
    }

    /// Dedup key: lowercase tx hash plus log index.
    pub fn delivery_key(&self) -> Option<(String, u64)> {
        Some((self.transaction_hash.to_lowercase(), self.log_index()?))
    }
}

/// Parse an 0x-prefixed hex quantity ("0x1a4") into a u64.
pub fn parse_hex_quantity(value: &str) -> Option<u64> {
    let stripped = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))?;
    if stripped.is_empty() || stripped.len() > 16 {
        return None;
    }
    u64::from_str_radix(stripped, 16).ok()
}

/// The slice of chain access the engine depends on. `EvmRpcClient` is the
/// production implementation; tests substitute fakes.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;
    async fn block_timestamp(&self, number: u64) -> Result<DateTime<Utc>>;
    async fn fetch_logs(&self, address: &str, from_block: u64, to_block: u64)
        -> Result<Vec<RawLog>>;
}

#[derive(Debug, Clone)]
pub struct EvmRpcClient {
    client: Client,
    rpc_url: String,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    timestamp: String,
}

impl EvmRpcClient {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build RPC HTTP client")?;
        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
        })
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<R> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .context(format!("RPC request failed: {}", method))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LadderbotError::RpcError(format!(
                "{} returned HTTP {}",
                method, status
            ))
            .into());
        }

        let body: JsonRpcResponse<R> = response
            .json()
            .await
            .context(format!("Failed to deserialize {} response", method))?;

        if let Some(err) = body.error {
            return Err(LadderbotError::RpcError(format!(
                "{} error {}: {}",
                method, err.code, err.message
            ))
            .into());
        }

        body.result
            .ok_or_else(|| anyhow!(LadderbotError::RpcError(format!("{} returned no result", method))))
    }
}

#[async_trait]
impl LogSource for EvmRpcClient {
    async fn latest_block(&self) -> Result<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_quantity(&raw)
            .ok_or_else(|| anyhow!(LadderbotError::RpcError(format!("Bad block number: {}", raw))))
    }

    async fn block_timestamp(&self, number: u64) -> Result<DateTime<Utc>> {
        let header: BlockHeader = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("0x{:x}", number), false]),
            )
            .await?;
        let secs = parse_hex_quantity(&header.timestamp).ok_or_else(|| {
            anyhow!(LadderbotError::RpcError(format!(
                "Bad block timestamp: {}",
                header.timestamp
            )))
        })?;
        Utc.timestamp_opt(secs as i64, 0).single().ok_or_else(|| {
            anyhow!(LadderbotError::RpcError(format!(
                "Out-of-range block timestamp: {}",
                secs
            )))
        })
    }

    async fn fetch_logs(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>> {
        debug!(
            "eth_getLogs for {} in [{}, {}]",
            address, from_block, to_block
        );
        let filter = json!([{
            "address": address,
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        }]);
        self.call("eth_getLogs", filter).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_quantity("0x0"), Some(0));
        assert_eq!(parse_hex_quantity("0x1a4"), Some(420));
        assert_eq!(parse_hex_quantity("0X10"), Some(16));
        assert_eq!(parse_hex_quantity("0x"), None);
        assert_eq!(parse_hex_quantity("1a4"), None);
        assert_eq!(parse_hex_quantity("0xzz"), None);
        // 17 hex digits overflows u64
        assert_eq!(parse_hex_quantity("0x10000000000000000"), None);
    }

    #[test]
    fn test_raw_log_accessors() {
        let log = RawLog {
            address: "0xfac7".to_string(),
            topics: vec![],
            data: "0x".to_string(),
            block_number: "0x64".to_string(),
            transaction_hash: "0xABCD".to_string(),
            log_index: "0x2".to_string(),
        };
        assert_eq!(log.block_number(), Some(100));
        assert_eq!(log.log_index(), Some(2));
        assert_eq!(log.delivery_key(), Some(("0xabcd".to_string(), 2)));
    }

    #[tokio::test]
    async fn test_latest_block_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1b4"}"#)
            .create_async()
            .await;

        let client = EvmRpcClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let latest = client.latest_block().await.unwrap();
        assert_eq!(latest, 436);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_logs_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{"jsonrpc":"2.0","id":1,"result":[{
            "address":"0xfac70000000000000000000000000000000000001",
            "topics":["0xaaaa"],
            "data":"0x",
            "blockNumber":"0x10",
            "transactionHash":"0xdead",
            "logIndex":"0x0"
        }]}"#;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let client = EvmRpcClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let logs = client.fetch_logs("0xfac7", 0, 100).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number(), Some(16));
    }

    #[tokio::test]
    async fn test_rpc_error_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"range too wide"}}"#)
            .create_async()
            .await;

        let client = EvmRpcClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = client.latest_block().await.unwrap_err();
        assert!(err.to_string().contains("range too wide"));
    }
}
