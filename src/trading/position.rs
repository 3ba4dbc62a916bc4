// src/trading/position.rs
//
// Open-position bookkeeping. The open set is the only state shared between
// the poll loop and the evaluation loop: an outer map guarded briefly, each
// position behind its own lock so one slow exit never blocks the others.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};
use uuid::Uuid;

use crate::api::venue::{BuyOrder, ExecutionGateway};
use crate::error::LadderbotError;
use crate::trading::launch::LaunchEvent;

/// Why a position left the open set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TimeLimit,
    FullExit,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "STOP_LOSS"),
            Self::TimeLimit => write!(f, "TIME_LIMIT"),
            Self::FullExit => write!(f, "FULL_EXIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub token_address: String, // lowercase
    pub token_name: String,
    pub token_symbol: String,
    /// Total ETH invested at entry; the absolute cost basis every return
    /// percentage is measured against.
    pub entry_cost_eth: f64,
    /// Tokens received at entry.
    pub original_size: f64,
    pub remaining_size: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_tx: String,
    /// ETH per token below which the stop-loss fires (while no ladder level
    /// has fired).
    pub stop_loss_price: f64,
    pub max_hold_deadline: DateTime<Utc>,
    /// Ladder level indexes already fired, in firing order. Grows only.
    pub levels_hit: Vec<usize>,
    /// Tokens sold across all partial exits.
    pub total_sold: f64,
    pub realized_pnl_eth: f64,
    pub status: PositionStatus,
    pub close_reason: Option<CloseReason>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
}

impl Position {
    pub fn entry_price_per_token(&self) -> f64 {
        if self.original_size > 0.0 {
            self.entry_cost_eth / self.original_size
        } else {
            0.0
        }
    }

    /// Cost basis attributed to the tokens still held. Shrinks in proportion
    /// to partial exits so return percentages compose across them.
    pub fn remaining_cost_basis(&self) -> f64 {
        if self.original_size > 0.0 {
            self.entry_cost_eth * (self.remaining_size / self.original_size)
        } else {
            0.0
        }
    }

    pub fn is_dust(&self, dust_fraction: f64) -> bool {
        self.remaining_size < self.original_size * dust_fraction
    }

    pub fn close(&mut self, reason: CloseReason, exit_price: f64, now: DateTime<Utc>) {
        self.status = PositionStatus::Closed;
        self.close_reason = Some(reason);
        self.exit_price = Some(exit_price);
        self.exit_time = Some(now);
    }
}

/// Sizing policy: pure function from a launch to the ETH notional to commit.
pub type SizingPolicy = Arc<dyn Fn(&LaunchEvent) -> f64 + Send + Sync>;

/// The reference strategy: fixed notional per position.
pub fn fixed_notional(amount_eth: f64) -> SizingPolicy {
    Arc::new(move |_event| amount_eth)
}

pub struct PositionManager {
    gateway: Arc<dyn ExecutionGateway>,
    /// Open positions keyed by lowercase token address.
    positions: RwLock<HashMap<String, Arc<Mutex<Position>>>>,
    /// Closed positions, append-only, never mutated again.
    history: RwLock<Vec<Position>>,
    max_open_positions: usize,
    stop_loss_percent: f64,
    max_hold_minutes: i64,
}

impl PositionManager {
    pub fn new(
        gateway: Arc<dyn ExecutionGateway>,
        max_open_positions: usize,
        stop_loss_percent: f64,
        max_hold_minutes: i64,
    ) -> Self {
        Self {
            gateway,
            positions: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            max_open_positions,
            stop_loss_percent,
            max_hold_minutes,
        }
    }

    /// Open a position for a gated launch. `Ok(None)` is an expected skip
    /// (cap reached or token already held); `Err` means the buy failed and
    /// no position state exists. Creation is all-or-nothing.
    ///
    /// Only the launch pipeline calls this, one event at a time, so the
    /// admission checks are not raced by the evaluation loop.
    pub async fn try_open(&self, event: &LaunchEvent, entry_eth: f64) -> Result<Option<Position>> {
        let key = event.token_address.to_lowercase();

        {
            let positions = self.positions.read().await;
            if positions.len() >= self.max_open_positions {
                info!(
                    "Skipping {}: max open positions ({}) reached",
                    event.symbol, self.max_open_positions
                );
                return Ok(None);
            }
            if positions.contains_key(&key) {
                info!(
                    "Skipping {}: already holding a position in {}",
                    event.symbol, key
                );
                return Ok(None);
            }
        }

        if entry_eth <= 0.0 {
            return Err(anyhow!(LadderbotError::PositionError(format!(
                "Sizing policy produced non-positive notional {} for {}",
                entry_eth, event.symbol
            ))));
        }

        let fill = self
            .gateway
            .buy(&BuyOrder {
                token_address: key.clone(),
                eth_amount_in: entry_eth,
            })
            .await
            .map_err(|e| {
                error!(
                    "Buy failed for {} ({:.6} ETH): {:?}",
                    event.symbol, entry_eth, e
                );
                e
            })?;

        if !fill.success {
            let cause = fill.error.unwrap_or_else(|| "venue rejected order".to_string());
            error!(
                "Buy rejected for {} ({:.6} ETH): {}",
                event.symbol, entry_eth, cause
            );
            return Err(anyhow!(LadderbotError::ExecutionError(cause)));
        }

        let original_size = match fill.amount_out {
            Some(amount) if amount > 0.0 => amount,
            _ => {
                error!(
                    "Buy for {} reported success with no fill amount; refusing to track",
                    event.symbol
                );
                return Err(anyhow!(LadderbotError::ExecutionError(format!(
                    "Buy fill for {} had no amount",
                    event.symbol
                ))));
            }
        };

        let now = Utc::now();
        let entry_price = entry_eth / original_size;
        let position = Position {
            id: Uuid::new_v4().to_string(),
            token_address: key.clone(),
            token_name: event.name.clone(),
            token_symbol: event.symbol.clone(),
            entry_cost_eth: entry_eth,
            original_size,
            remaining_size: original_size,
            entry_time: now,
            entry_tx: fill.tx_ref.unwrap_or_default(),
            stop_loss_price: entry_price * (1.0 - self.stop_loss_percent / 100.0),
            max_hold_deadline: now + ChronoDuration::minutes(self.max_hold_minutes),
            levels_hit: Vec::new(),
            total_sold: 0.0,
            realized_pnl_eth: 0.0,
            status: PositionStatus::Open,
            close_reason: None,
            exit_price: None,
            exit_time: None,
        };

        info!(
            "Opened position {}: {} ({}) | {:.6} ETH -> {:.2} tokens @ {:.10} ETH | SL {:.10} | deadline {}",
            position.id,
            position.token_name,
            position.token_symbol,
            entry_eth,
            original_size,
            entry_price,
            position.stop_loss_price,
            position.max_hold_deadline
        );

        let mut positions = self.positions.write().await;
        positions.insert(key, Arc::new(Mutex::new(position.clone())));
        Ok(Some(position))
    }

    pub async fn open_count(&self) -> usize {
        self.positions.read().await.len()
    }

    pub async fn has_open_position(&self, token_address: &str) -> bool {
        self.positions
            .read()
            .await
            .contains_key(&token_address.to_lowercase())
    }

    /// Clone out the per-position handles so the evaluation loop can work
    /// each position under its own lock without holding the map.
    pub async fn open_handles(&self) -> Vec<Arc<Mutex<Position>>> {
        self.positions.read().await.values().cloned().collect()
    }

    /// Move a closed position from the open set into the append-only
    /// history. A no-op for tokens that are not tracked.
    pub async fn retire(&self, token_address: &str) -> Result<()> {
        let key = token_address.to_lowercase();
        let mut positions = self.positions.write().await;

        let is_closed = match positions.get(&key) {
            Some(handle) => handle.lock().await.status == PositionStatus::Closed,
            None => return Ok(()),
        };
        if !is_closed {
            return Err(anyhow!(LadderbotError::PositionError(format!(
                "Refusing to retire open position {}",
                key
            ))));
        }

        let handle = positions.remove(&key);
        drop(positions);

        if let Some(handle) = handle {
            let position = handle.lock().await.clone();
            info!(
                "Retired position {} ({}) | reason {:?} | realized PnL {:.6} ETH",
                position.token_symbol, position.id, position.close_reason, position.realized_pnl_eth
            );
            self.history.write().await.push(position);
        }
        Ok(())
    }

    pub async fn history(&self) -> Vec<Position> {
        self.history.read().await.clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================
