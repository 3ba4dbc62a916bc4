// src/api/oracle.rs
//
// Price oracle seam. The production oracle rides the venue's own quoting
// path and degrades to a low-confidence simulated mark when quoting fails;
// the dry-run oracle walks the deterministic simulated market.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::api::venue::{ExecutionGateway, SimulatedMarket};
use crate::error::LadderbotError;

#[derive(Debug, Clone)]
pub struct PriceQuote {
    /// ETH per token unit at the quoted size.
    pub price_eth: f64,
    /// 1.0 for a live venue quote, lower for fallback marks.
    pub confidence: f64,
    pub as_of: DateTime<Utc>,
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Quote the per-unit price for exiting `reference_size` tokens.
    async fn quote(&self, token_address: &str, reference_size: f64) -> Result<PriceQuote>;
}

// ============================================================================
// VENUE-BACKED ORACLE
// ============================================================================

/// Quotes through the execution gateway; a failed quote falls back to the
/// simulated mark rather than stalling the position tick.
pub struct VenueOracle {
    gateway: Arc<dyn ExecutionGateway>,
    fallback: Arc<SimulatedMarket>,
}

impl VenueOracle {
    pub fn new(gateway: Arc<dyn ExecutionGateway>, fallback: Arc<SimulatedMarket>) -> Self {
        Self { gateway, fallback }
    }
}

#[async_trait]
impl PriceOracle for VenueOracle {
    async fn quote(&self, token_address: &str, reference_size: f64) -> Result<PriceQuote> {
        if reference_size <= 0.0 {
            return Err(anyhow!(LadderbotError::OracleError(format!(
                "Non-positive reference size {} for {}",
                reference_size, token_address
            ))));
        }

        match self.gateway.quote_sell(token_address, reference_size).await {
            Ok(eth_out) if eth_out.is_finite() && eth_out >= 0.0 => Ok(PriceQuote {
                price_eth: eth_out / reference_size,
                confidence: 1.0,
                as_of: Utc::now(),
            }),
            Ok(eth_out) => Err(anyhow!(LadderbotError::OracleError(format!(
                "Venue quoted nonsense amount {} for {}",
                eth_out, token_address
            )))),
            Err(e) => {
                warn!(
                    "Venue quote failed for {}: {:?}. Using simulated mark.",
                    token_address, e
                );
                Ok(PriceQuote {
                    price_eth: self.fallback.peek(token_address).await,
                    confidence: 0.25,
                    as_of: Utc::now(),
                })
            }
        }
    }
}

// ============================================================================
// SIMULATED ORACLE (dry run)
// ============================================================================

/// Drives the deterministic dry-run price path: each quote advances the
/// market one step so positions see movement between ticks.
pub struct SimulatedOracle {
    market: Arc<SimulatedMarket>,
}

impl SimulatedOracle {
    pub fn new(market: Arc<SimulatedMarket>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl PriceOracle for SimulatedOracle {
    async fn quote(&self, token_address: &str, _reference_size: f64) -> Result<PriceQuote> {
        Ok(PriceQuote {
            price_eth: self.market.step(token_address).await,
            confidence: 1.0,
            as_of: Utc::now(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::venue::{BuyOrder, SellOrder, TradeFill};

    const TOKEN: &str = "0xc0ffee254729296a45a3885639ac7e10f9d54979";

    struct BrokenGateway;

    #[async_trait]
    impl ExecutionGateway for BrokenGateway {
        async fn buy(&self, _order: &BuyOrder) -> Result<TradeFill> {
            Err(anyhow!("venue down"))
        }
        async fn sell(&self, _order: &SellOrder) -> Result<TradeFill> {
            Err(anyhow!("venue down"))
        }
        async fn quote_sell(&self, _token_address: &str, _token_amount: f64) -> Result<f64> {
            Err(anyhow!("venue down"))
        }
    }

    struct FixedGateway {
        eth_out: f64,
    }

    #[async_trait]
    impl ExecutionGateway for FixedGateway {
        async fn buy(&self, _order: &BuyOrder) -> Result<TradeFill> {
            unimplemented!("not used")
        }
        async fn sell(&self, _order: &SellOrder) -> Result<TradeFill> {
            unimplemented!("not used")
        }
        async fn quote_sell(&self, _token_address: &str, _token_amount: f64) -> Result<f64> {
            Ok(self.eth_out)
        }
    }

    #[tokio::test]
    async fn test_venue_oracle_uses_gateway_quote() {
        let oracle = VenueOracle::new(
            Arc::new(FixedGateway { eth_out: 0.5 }),
            Arc::new(SimulatedMarket::new()),
        );
        let quote = oracle.quote(TOKEN, 1000.0).await.unwrap();
        assert!((quote.price_eth - 0.0005).abs() < 1e-12);
        assert_eq!(quote.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_venue_oracle_falls_back_when_quote_fails() {
        let market = Arc::new(SimulatedMarket::new());
        let expected = market.peek(TOKEN).await;
        let oracle = VenueOracle::new(Arc::new(BrokenGateway), market);

        let quote = oracle.quote(TOKEN, 1000.0).await.unwrap();
        assert_eq!(quote.price_eth, expected);
        assert!(quote.confidence < 1.0);
    }

    #[tokio::test]
    async fn test_venue_oracle_rejects_non_positive_size() {
        let oracle = VenueOracle::new(
            Arc::new(FixedGateway { eth_out: 0.5 }),
            Arc::new(SimulatedMarket::new()),
        );
        assert!(oracle.quote(TOKEN, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_oracle_advances_the_walk() {
        let market = Arc::new(SimulatedMarket::new());
        let oracle = SimulatedOracle::new(market.clone());
        let q1 = oracle.quote(TOKEN, 1.0).await.unwrap();
        let q2 = oracle.quote(TOKEN, 1.0).await.unwrap();
        // Two steps of the walk are (deterministically) different prices.
        assert_ne!(q1.price_eth, q2.price_eth);
        assert_eq!(market.peek(TOKEN).await, q2.price_eth);
    }
}
