use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::error::LadderbotError;
use crate::trading::ladder::Ladder;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub rpc_url: String,
    pub factory_address: String,

    pub credibility_api_url: String,
    pub credibility_api_key: Option<String>,
    pub venue_api_url: String,
    pub venue_api_key: Option<String>,
    pub wallet_private_key: Option<String>, // Signing credential handed to the venue adapter

    pub dry_run: bool,

    pub poll_interval_secs: u64,
    pub eval_interval_secs: u64,
    pub request_timeout_secs: u64,

    pub max_block_range: u64,     // Upstream eth_getLogs range cap per call
    pub poll_overlap_blocks: u64, // Re-scanned tail to tolerate provider lag
    pub max_stale_blocks: u64,

    pub min_creator_score: f64,
    pub max_open_positions: usize,
    pub position_size_eth: f64,
    pub stop_loss_percent: f64,
    pub max_hold_minutes: i64,
    pub dust_fraction: f64,

    pub exit_ladder: Ladder,
}

impl Config {
    pub fn load() -> Result<Self> {
        let exit_ladder = Ladder::parse(
            &env::var("EXIT_LADDER").unwrap_or_else(|_| "100:30,200:25,400:25".to_string()),
        )
        .map_err(LadderbotError::ConfigError)
        .context("Invalid EXIT_LADDER")?;

        Ok(Self {
            rpc_url: env::var("RPC_URL").context("RPC_URL not set in environment")?,
            factory_address: env::var("FACTORY_ADDRESS")
                .context("FACTORY_ADDRESS not set in environment")?
                .to_lowercase(),

            credibility_api_url: env::var("CREDIBILITY_API_URL")
                .unwrap_or_else(|_| "https://api.credibility.example".to_string()),
            credibility_api_key: env::var("CREDIBILITY_API_KEY").ok(), // Optional in dry run
            venue_api_url: env::var("VENUE_API_URL")
                .unwrap_or_else(|_| "https://api.venue.example".to_string()),
            venue_api_key: env::var("VENUE_API_KEY").ok(), // Optional in dry run
            wallet_private_key: env::var("WALLET_PRIVATE_KEY").ok(),

            dry_run: env::var("DRY_RUN")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(true), // Default to dry run

            poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            eval_interval_secs: env::var("EVAL_INTERVAL_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .unwrap_or(15),
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            max_block_range: env::var("MAX_BLOCK_RANGE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .unwrap_or(500),
            poll_overlap_blocks: env::var("POLL_OVERLAP_BLOCKS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            max_stale_blocks: env::var("MAX_STALE_BLOCKS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            min_creator_score: env::var("MIN_CREATOR_SCORE")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60.0),
            max_open_positions: env::var("MAX_OPEN_POSITIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            position_size_eth: env::var("POSITION_SIZE_ETH")
                .unwrap_or_else(|_| "0.01".to_string())
                .parse()
                .unwrap_or(0.01),
            stop_loss_percent: env::var("STOP_LOSS_PERCENT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30.0),
            max_hold_minutes: env::var("MAX_HOLD_MINUTES")
                .unwrap_or_else(|_| "240".to_string())
                .parse()
                .unwrap_or(240),
            dust_fraction: env::var("DUST_FRACTION")
                .unwrap_or_else(|_| "0.001".to_string())
                .parse()
                .unwrap_or(0.001),

            exit_ladder,
        })
    }
}
