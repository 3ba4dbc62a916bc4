// src/trading/evaluator.rs
//
// Per-tick ladder state machine for one open position. Ticks are
// read-modify-write cycles under the position's own lock; every mutation
// happens only after the corresponding sell actually filled, so a failed
// sell leaves the position exactly as it was and the same exit condition
// re-fires on the next tick.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::oracle::PriceOracle;
use crate::api::venue::{ExecutionGateway, SellOrder};
use crate::trading::ladder::Ladder;
use crate::trading::position::{CloseReason, Position, PositionStatus};

pub struct LadderEvaluator {
    ladder: Ladder,
    dust_fraction: f64,
    gateway: Arc<dyn ExecutionGateway>,
    oracle: Arc<dyn PriceOracle>,
}

impl LadderEvaluator {
    pub fn new(
        ladder: Ladder,
        dust_fraction: f64,
        gateway: Arc<dyn ExecutionGateway>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            ladder,
            dust_fraction,
            gateway,
            oracle,
        }
    }

    /// Run one evaluation tick. Returns `Ok(true)` once the position is
    /// closed and ready to be retired. An `Err` (oracle failure) means this
    /// position's tick was skipped; the caller moves on to the others.
    pub async fn evaluate(&self, position: &mut Position, now: DateTime<Utc>) -> Result<bool> {
        if position.status != PositionStatus::Open {
            return Ok(true);
        }

        let quote = self
            .oracle
            .quote(&position.token_address, position.remaining_size)
            .await?;
        let price = quote.price_eth;

        // Total return against the absolute ETH cost basis of the remaining
        // tranche. The basis shrinks in proportion to partial exits, so this
        // percentage composes correctly across them.
        let basis = position.remaining_cost_basis();
        let total_return_percent = if basis > 0.0 {
            (price * position.remaining_size - basis) / basis * 100.0
        } else {
            0.0
        };
        debug!(
            "Tick {}: price {:.10} ETH, return {:+.1}%, remaining {:.2}",
            position.token_symbol, price, total_return_percent, position.remaining_size
        );

        self.run_ladder(position, price, total_return_percent).await;

        // Any realized ladder profit makes the position immune to stop-loss.
        if position.levels_hit.is_empty() && price <= position.stop_loss_price {
            info!(
                "Stop-loss hit for {}: {:.10} <= {:.10}",
                position.token_symbol, price, position.stop_loss_price
            );
            if self
                .sell_remainder(position, price, now, CloseReason::StopLoss)
                .await
            {
                return Ok(true);
            }
        }

        if position.status == PositionStatus::Open && now >= position.max_hold_deadline {
            info!(
                "Max hold time reached for {}: held since {}",
                position.token_symbol, position.entry_time
            );
            if self
                .sell_remainder(position, price, now, CloseReason::TimeLimit)
                .await
            {
                return Ok(true);
            }
        }

        // The residual below the dust bound is not worth tracking further;
        // larger unsold tails (the moon bag) keep riding until stop-loss or
        // the time limit.
        if position.status == PositionStatus::Open && position.is_dust(self.dust_fraction) {
            info!(
                "Closing {}: remaining {:.6} of {:.6} is dust",
                position.token_symbol, position.remaining_size, position.original_size
            );
            position.close(CloseReason::FullExit, price, now);
            return Ok(true);
        }

        Ok(position.status == PositionStatus::Closed)
    }

    /// Fire every armed ladder level the current return has reached, in
    /// ascending trigger order. A sell failure stops ladder processing for
    /// this tick with all state untouched.
    async fn run_ladder(&self, position: &mut Position, price: f64, total_return_percent: f64) {
        for (index, level) in self.ladder.levels().iter().enumerate() {
            if position.levels_hit.contains(&index) {
                continue;
            }
            if total_return_percent < level.trigger_percent {
                // Triggers are strictly increasing; nothing further can fire.
                break;
            }

            let sell_amount = level.sell_fraction * position.remaining_size;
            if sell_amount <= 0.0 {
                break;
            }

            let fill = match self
                .gateway
                .sell(&SellOrder {
                    token_address: position.token_address.clone(),
                    token_amount_in: sell_amount,
                })
                .await
            {
                Ok(fill) if fill.success => fill,
                Ok(fill) => {
                    warn!(
                        "Ladder sell rejected for {} ({:.2} tokens at level {}): {}. Retrying next tick.",
                        position.token_symbol,
                        sell_amount,
                        index,
                        fill.error.unwrap_or_else(|| "no cause given".to_string())
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        "Ladder sell failed for {} ({:.2} tokens at level {}): {:?}. Retrying next tick.",
                        position.token_symbol, sell_amount, index, e
                    );
                    return;
                }
            };

            let proceeds = fill.amount_out.unwrap_or(sell_amount * price);
            let attributed_cost =
                position.entry_cost_eth * (sell_amount / position.original_size);
            position.realized_pnl_eth += proceeds - attributed_cost;
            position.total_sold += sell_amount;
            position.remaining_size -= sell_amount;
            position.levels_hit.push(index);

            info!(
                "Level {} fired for {} at {:+.1}%: sold {:.2} tokens for {:.6} ETH ({}), {:.2} remaining",
                index,
                position.token_symbol,
                total_return_percent,
                sell_amount,
                proceeds,
                fill.tx_ref.unwrap_or_default(),
                position.remaining_size
            );
        }
    }

    /// Sell 100% of the remaining size and close. Returns false (position
    /// untouched) if the sell did not fill.
    async fn sell_remainder(
        &self,
        position: &mut Position,
        price: f64,
        now: DateTime<Utc>,
        reason: CloseReason,
    ) -> bool {
        let sell_amount = position.remaining_size;
        if sell_amount <= 0.0 {
            position.close(reason, price, now);
            return true;
        }

        let fill = match self
            .gateway
            .sell(&SellOrder {
                token_address: position.token_address.clone(),
                token_amount_in: sell_amount,
            })
            .await
        {
            Ok(fill) if fill.success => fill,
            Ok(fill) => {
                warn!(
                    "{} exit sell rejected for {} ({:.2} tokens): {}. Retrying next tick.",
                    reason,
                    position.token_symbol,
                    sell_amount,
                    fill.error.unwrap_or_else(|| "no cause given".to_string())
                );
                return false;
            }
            Err(e) => {
                warn!(
                    "{} exit sell failed for {} ({:.2} tokens): {:?}. Retrying next tick.",
                    reason, position.token_symbol, sell_amount, e
                );
                return false;
            }
        };

        let proceeds = fill.amount_out.unwrap_or(sell_amount * price);
        position.realized_pnl_eth += proceeds - position.remaining_cost_basis();
        position.total_sold += sell_amount;
        position.remaining_size = 0.0;
        position.close(reason, proceeds / sell_amount, now);

        info!(
            "Closed {} ({}) via {}: sold {:.2} tokens for {:.6} ETH | realized PnL {:.6} ETH",
            position.token_symbol, position.id, reason, sell_amount, proceeds, position.realized_pnl_eth
        );
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================
