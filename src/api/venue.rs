// src/api/venue.rs
//
// Execution gateway: the single seam through which every buy and sell goes.
// Exactly one concrete adapter per venue; config picks which one is wired
// in. The dry-run adapter fabricates deterministic fills with no network
// access so the whole pipeline above it runs offline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::LadderbotError;

// ============================================================================
// ORDER AND FILL SHAPES
// ============================================================================

#[derive(Debug, Clone)]
pub struct BuyOrder {
    pub token_address: String,
    pub eth_amount_in: f64,
}

#[derive(Debug, Clone)]
pub struct SellOrder {
    pub token_address: String,
    pub token_amount_in: f64,
}

/// Shared fill shape for buys and sells. `success == false` is a venue-level
/// rejection (slippage, liquidity) as opposed to a transport error.
#[derive(Debug, Clone)]
pub struct TradeFill {
    pub success: bool,
    pub amount_out: Option<f64>,
    pub tx_ref: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn buy(&self, order: &BuyOrder) -> Result<TradeFill>;
    async fn sell(&self, order: &SellOrder) -> Result<TradeFill>;
    /// The venue's own quoting path: ETH out for selling `token_amount` now.
    async fn quote_sell(&self, token_address: &str, token_amount: f64) -> Result<f64>;
}

// ============================================================================
// HTTP VENUE ADAPTER
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest<'a> {
    token_address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    eth_amount_in: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_amount_in: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signer_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    success: bool,
    amount_out: Option<f64>,
    tx_ref: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    amount_out: f64,
}

/// Adapter for a self-hosted execution relay speaking the venue's REST API.
#[derive(Debug, Clone)]
pub struct HttpVenueGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    signer_key: Option<String>,
}

impl HttpVenueGateway {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        signer_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build venue HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            signer_key,
        })
    }

    async fn submit_order(&self, path: &str, request: &OrderRequest<'_>) -> Result<TradeFill> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-KEY", key);
        }

        let response = builder
            .send()
            .await
            .context(format!("Venue request failed: {}", path))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LadderbotError::ExecutionError(format!(
                "{} returned HTTP {}",
                path, status
            ))
            .into());
        }

        let body: OrderResponse = response
            .json()
            .await
            .context(format!("Failed to deserialize {} response", path))?;

        Ok(TradeFill {
            success: body.success,
            amount_out: body.amount_out,
            tx_ref: body.tx_ref,
            error: body.error,
        })
    }
}

#[async_trait]
impl ExecutionGateway for HttpVenueGateway {
    async fn buy(&self, order: &BuyOrder) -> Result<TradeFill> {
        let request = OrderRequest {
            token_address: &order.token_address,
            eth_amount_in: Some(order.eth_amount_in),
            token_amount_in: None,
            signer_key: self.signer_key.as_deref(),
        };
        self.submit_order("/v1/orders/buy", &request).await
    }

    async fn sell(&self, order: &SellOrder) -> Result<TradeFill> {
        let request = OrderRequest {
            token_address: &order.token_address,
            eth_amount_in: None,
            token_amount_in: Some(order.token_amount_in),
            signer_key: self.signer_key.as_deref(),
        };
        self.submit_order("/v1/orders/sell", &request).await
    }

    async fn quote_sell(&self, token_address: &str, token_amount: f64) -> Result<f64> {
        let url = format!("{}/v1/quote", self.base_url);
        let mut builder = self
            .client
            .get(&url)
            .query(&[("tokenAddress", token_address)])
            .query(&[("tokenAmountIn", token_amount.to_string())]);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-KEY", key);
        }

        let response = builder.send().await.context("Venue quote request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(LadderbotError::ExecutionError(format!(
                "/v1/quote returned HTTP {}",
                status
            ))
            .into());
        }

        let body: QuoteResponse = response
            .json()
            .await
            .context("Failed to deserialize quote response")?;
        Ok(body.amount_out)
    }
}

// ============================================================================
// SIMULATED MARKET (dry run)
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct SimTokenState {
    price: f64,
    step: u64,
    seed: u64,
}

/// Deterministic per-token price paths for dry-run mode. Every quantity is
/// derived from the token address and the step counter, so a run with the
/// same inputs reproduces the same fills and the same ladder decisions.
#[derive(Debug, Default)]
pub struct SimulatedMarket {
    tokens: RwLock<HashMap<String, SimTokenState>>,
}

fn token_seed(token_address: &str) -> u64 {
    // FNV-1a; only needs to be stable, not cryptographic.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token_address.to_lowercase().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl SimulatedMarket {
    pub fn new() -> Self {
        Self::default()
    }

    fn initial_state(token_address: &str) -> SimTokenState {
        let seed = token_seed(token_address);
        // Launch prices land in the usual freshly-bonded range.
        let price = 1e-6 * (1.0 + (seed % 1000) as f64 / 250.0);
        SimTokenState { price, step: 0, seed }
    }

    /// Current price without advancing the path.
    pub async fn peek(&self, token_address: &str) -> f64 {
        let key = token_address.to_lowercase();
        let mut tokens = self.tokens.write().await;
        tokens
            .entry(key)
            .or_insert_with(|| Self::initial_state(token_address))
            .price
    }

    /// Advance the token's price path one deterministic step and return the
    /// new price. Upward drift keeps ladder levels reachable in dry runs.
    pub async fn step(&self, token_address: &str) -> f64 {
        let key = token_address.to_lowercase();
        let mut tokens = self.tokens.write().await;
        let state = tokens
            .entry(key)
            .or_insert_with(|| Self::initial_state(token_address));
        state.step += 1;
        let mut rng = StdRng::seed_from_u64(state.seed ^ state.step);
        let factor = rng.gen_range(0.90..1.18);
        state.price *= factor;
        state.price
    }
}

// ============================================================================
// DRY-RUN GATEWAY
// ============================================================================

/// Fabricates fills against the simulated market. No network access.
pub struct DryRunGateway {
    market: Arc<SimulatedMarket>,
    fill_counter: AtomicU64,
}

impl DryRunGateway {
    pub fn new(market: Arc<SimulatedMarket>) -> Self {
        Self {
            market,
            fill_counter: AtomicU64::new(0),
        }
    }

    fn next_ref(&self, side: &str) -> String {
        let n = self.fill_counter.fetch_add(1, Ordering::SeqCst);
        format!("dry-{}-{:06}", side, n)
    }
}

#[async_trait]
impl ExecutionGateway for DryRunGateway {
    async fn buy(&self, order: &BuyOrder) -> Result<TradeFill> {
        let price = self.market.peek(&order.token_address).await;
        let amount_out = order.eth_amount_in / price;
        debug!(
            "[DRY RUN] buy {} for {:.6} ETH -> {:.2} tokens",
            order.token_address, order.eth_amount_in, amount_out
        );
        Ok(TradeFill {
            success: true,
            amount_out: Some(amount_out),
            tx_ref: Some(self.next_ref("buy")),
            error: None,
        })
    }

    async fn sell(&self, order: &SellOrder) -> Result<TradeFill> {
        let price = self.market.peek(&order.token_address).await;
        let amount_out = order.token_amount_in * price;
        debug!(
            "[DRY RUN] sell {:.2} {} -> {:.6} ETH",
            order.token_amount_in, order.token_address, amount_out
        );
        Ok(TradeFill {
            success: true,
            amount_out: Some(amount_out),
            tx_ref: Some(self.next_ref("sell")),
            error: None,
        })
    }

    async fn quote_sell(&self, token_address: &str, token_amount: f64) -> Result<f64> {
        Ok(token_amount * self.market.peek(token_address).await)
    }
}

// ============================================================================
// TESTS
// ============================================================================
