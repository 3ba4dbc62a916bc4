use anyhow::{Context, Result};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod api;
mod chain;
mod config;
mod error;
mod trading;

use crate::api::credibility::{CredibilityGate, HttpCredibilityGate, StaticCredibilityGate};
use crate::api::oracle::{PriceOracle, SimulatedOracle, VenueOracle};
use crate::api::venue::{DryRunGateway, ExecutionGateway, HttpVenueGateway, SimulatedMarket};
use crate::chain::client::{EvmRpcClient, LogSource};
use crate::config::Config;
use crate::trading::engine::Engine;
use crate::trading::evaluator::LadderEvaluator;
use crate::trading::position::{fixed_notional, PositionManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load environment variables
    dotenv().ok();

    // Load configuration and wrap in Arc
    let config = Arc::new(Config::load()?);
    info!("Configuration loaded successfully");

    let timeout = Duration::from_secs(config.request_timeout_secs);

    // Chain log source
    let chain: Arc<dyn LogSource> = Arc::new(EvmRpcClient::new(&config.rpc_url, timeout)?);
    info!("RPC client initialized");

    // The simulated market backs the dry-run adapters and the oracle's
    // degraded fallback in live mode.
    let market = Arc::new(SimulatedMarket::new());

    // One gateway adapter per venue, selected by configuration.
    let (gateway, oracle, gate): (
        Arc<dyn ExecutionGateway>,
        Arc<dyn PriceOracle>,
        Arc<dyn CredibilityGate>,
    ) = if config.dry_run {
        info!("🔍 [DRY RUN] Trades will be simulated, not executed");
        (
            Arc::new(DryRunGateway::new(market.clone())),
            Arc::new(SimulatedOracle::new(market.clone())),
            Arc::new(StaticCredibilityGate { score: Some(75.0) }),
        )
    } else {
        let venue = Arc::new(HttpVenueGateway::new(
            &config.venue_api_url,
            config.venue_api_key.clone(),
            config.wallet_private_key.clone(),
            timeout,
        )?);
        let oracle = Arc::new(VenueOracle::new(venue.clone(), market.clone()));
        let gate = Arc::new(HttpCredibilityGate::new(
            &config.credibility_api_url,
            config.credibility_api_key.clone(),
            timeout,
        )?);
        (venue, oracle, gate)
    };

    let manager = Arc::new(PositionManager::new(
        gateway.clone(),
        config.max_open_positions,
        config.stop_loss_percent,
        config.max_hold_minutes,
    ));
    let evaluator = Arc::new(LadderEvaluator::new(
        config.exit_ladder.clone(),
        config.dust_fraction,
        gateway,
        oracle,
    ));
    let sizing = fixed_notional(config.position_size_eth);

    let engine = Engine::new(config, chain, gate, manager, evaluator, sizing);
    engine.start().await?;

    info!("ladderbot running. Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    engine.stop().await?;

    Ok(())
}
