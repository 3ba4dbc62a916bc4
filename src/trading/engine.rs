// src/trading/engine.rs
//
// Orchestration: the poll loop (launch pipeline) and the evaluation loop
// (ladder ticks) running as two independent periodic tasks. The open
// position set is the only thing they share.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::credibility::CredibilityGate;
use crate::chain::client::LogSource;
use crate::chain::poller::LogPoller;
use crate::config::Config;
use crate::trading::evaluator::LadderEvaluator;
use crate::trading::freshness::FreshnessFilter;
use crate::trading::launch;
use crate::trading::position::{PositionManager, PositionStatus, SizingPolicy};

// --- Standalone Task Functions ---

/// Resolve a creator to an identity and a reputation score. `Ok(None)`
/// anywhere in the chain means the launch is skipped for good.
pub(crate) async fn creator_reputation(
    gate: &Arc<dyn CredibilityGate>,
    creator_address: &str,
) -> Result<Option<f64>> {
    let Some(profile) = gate.resolve_identity(creator_address).await? else {
        return Ok(None);
    };
    let subject = profile
        .handle
        .clone()
        .unwrap_or_else(|| profile.address.clone());
    gate.score(&subject).await
}

/// One poll-loop iteration: pull fresh factory logs, decode them, and run
/// every candidate through freshness -> credibility -> position opening, in
/// ascending (blockNumber, logIndex) order so the earlier launch wins any
/// contest for the last open slot.
pub(crate) async fn run_launch_cycle(
    poller: &mut LogPoller,
    chain: &Arc<dyn LogSource>,
    freshness: &FreshnessFilter,
    gate: &Arc<dyn CredibilityGate>,
    manager: &Arc<PositionManager>,
    sizing: &SizingPolicy,
    min_creator_score: f64,
) -> Result<()> {
    let batch = poller.poll().await?;
    if batch.logs.is_empty() {
        debug!("No new factory logs this cycle");
        return Ok(());
    }

    for raw in &batch.logs {
        let Some(event) = launch::decode(raw, Utc::now()) else {
            debug!(
                "Dropping undecodable log {}#{}",
                raw.transaction_hash, raw.log_index
            );
            continue;
        };

        let block_timestamp = match chain.block_timestamp(event.block_number).await {
            Ok(ts) => ts,
            Err(e) => {
                debug!(
                    "Skipping {}: no timestamp for block {}: {:?}",
                    event.symbol, event.block_number, e
                );
                continue;
            }
        };

        if !freshness.accept(&event, batch.latest_block, block_timestamp) {
            continue;
        }

        // Credibility gating. Absence and unavailability are both hard,
        // final skips for this launch.
        let score = match creator_reputation(gate, &event.creator).await {
            Ok(Some(score)) => score,
            Ok(None) => {
                info!(
                    "❌ [SKIP] {} ({}): creator {} has no resolvable reputation",
                    event.symbol, event.token_address, event.creator
                );
                continue;
            }
            Err(e) => {
                info!(
                    "❌ [SKIP] {} ({}): credibility gate unavailable: {:?}",
                    event.symbol, event.token_address, e
                );
                continue;
            }
        };

        if score < min_creator_score {
            info!(
                "❌ [SKIP] {} ({}): creator score {:.1} below threshold {:.1}",
                event.symbol, event.token_address, score, min_creator_score
            );
            continue;
        }

        info!(
            "✅ [CANDIDATE] {} ({}) by {} | score {:.1} | block {}",
            event.symbol, event.token_address, event.creator, score, event.block_number
        );

        let entry_eth = (sizing)(&event);
        match manager.try_open(&event, entry_eth).await {
            Ok(Some(position)) => {
                info!(
                    "🎯 Sniped {} with {:.6} ETH (position {})",
                    event.symbol, entry_eth, position.id
                );
            }
            Ok(None) => {} // Skip reason already logged by the manager.
            Err(e) => {
                error!(
                    "Failed to open position for {}: {:?}",
                    event.symbol, e
                );
            }
        }
    }

    Ok(())
}

/// One evaluation-loop iteration: tick every open position concurrently,
/// each under its own lock, then retire the ones that closed.
pub(crate) async fn run_eval_cycle(
    manager: &Arc<PositionManager>,
    evaluator: &Arc<LadderEvaluator>,
) -> Result<()> {
    let handles = manager.open_handles().await;
    if handles.is_empty() {
        debug!("No open positions to evaluate");
        return Ok(());
    }
    debug!("Evaluating {} open positions", handles.len());

    let closed = futures::future::join_all(handles.iter().map(|handle| async move {
        let mut position = handle.lock().await;
        if position.status != PositionStatus::Open {
            // Closed on a previous tick but not yet retired.
            return Some(position.token_address.clone());
        }
        match evaluator.evaluate(&mut position, Utc::now()).await {
            Ok(true) => Some(position.token_address.clone()),
            Ok(false) => None,
            Err(e) => {
                warn!(
                    "Tick skipped for {}: {:?}",
                    position.token_symbol, e
                );
                None
            }
        }
    }))
    .await;

    for token_address in closed.into_iter().flatten() {
        if let Err(e) = manager.retire(&token_address).await {
            error!("Failed to retire {}: {:?}", token_address, e);
        }
    }

    Ok(())
}

// --- Engine ---

pub struct Engine {
    config: Arc<Config>,
    chain: Arc<dyn LogSource>,
    gate: Arc<dyn CredibilityGate>,
    manager: Arc<PositionManager>,
    evaluator: Arc<LadderEvaluator>,
    sizing: SizingPolicy,
    running: Arc<RwLock<bool>>,
    poll_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    eval_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        config: Arc<Config>,
        chain: Arc<dyn LogSource>,
        gate: Arc<dyn CredibilityGate>,
        manager: Arc<PositionManager>,
        evaluator: Arc<LadderEvaluator>,
        sizing: SizingPolicy,
    ) -> Self {
        Self {
            config,
            chain,
            gate,
            manager,
            evaluator,
            sizing,
            running: Arc::new(RwLock::new(false)),
            poll_handle: Mutex::new(None),
            eval_handle: Mutex::new(None),
        }
    }

    /// Capture the startup anchor and spawn both loops.
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Engine start requested but already running");
                return Ok(());
            }
            *running = true;
        }

        let startup_block = self
            .chain
            .latest_block()
            .await
            .context("Failed to read chain head at startup")?;
        let startup_timestamp = self
            .chain
            .block_timestamp(startup_block)
            .await
            .context("Failed to read startup block timestamp")?;

        info!(
            "🚀 Engine starting at block {} ({}), factory {}{}",
            startup_block,
            startup_timestamp,
            self.config.factory_address,
            if self.config.dry_run { " [DRY RUN]" } else { "" }
        );

        let freshness = FreshnessFilter::new(
            startup_block,
            startup_timestamp,
            self.config.max_stale_blocks,
        );
        let mut poller = LogPoller::new(
            self.chain.clone(),
            &self.config.factory_address,
            self.config.max_block_range,
            self.config.poll_overlap_blocks,
            startup_block,
        );

        // Poll loop
        let running = self.running.clone();
        let chain = self.chain.clone();
        let gate = self.gate.clone();
        let manager = self.manager.clone();
        let sizing = self.sizing.clone();
        let min_score = self.config.min_creator_score;
        let poll_interval_secs = self.config.poll_interval_secs;
        let poll_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(poll_interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Poll loop started ({}s interval)", poll_interval_secs);
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    info!("Poll loop stopped");
                    break;
                }
                if let Err(e) = run_launch_cycle(
                    &mut poller,
                    &chain,
                    &freshness,
                    &gate,
                    &manager,
                    &sizing,
                    min_score,
                )
                .await
                {
                    // Abandon this iteration; the same range is retried on
                    // the next tick.
                    error!("Launch cycle failed: {:?}", e);
                }
            }
        });

        // Evaluation loop
        let running = self.running.clone();
        let manager = self.manager.clone();
        let evaluator = self.evaluator.clone();
        let eval_interval_secs = self.config.eval_interval_secs;
        let eval_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(eval_interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Evaluation loop started ({}s interval)", eval_interval_secs);
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    info!("Evaluation loop stopped");
                    break;
                }
                if let Err(e) = run_eval_cycle(&manager, &evaluator).await {
                    error!("Evaluation cycle failed: {:?}", e);
                }
            }
        });

        *self.poll_handle.lock().await = Some(poll_handle);
        *self.eval_handle.lock().await = Some(eval_handle);
        info!("Engine started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                warn!("Engine stop requested but not running");
                return Ok(());
            }
            *running = false;
        }

        if let Some(handle) = self.poll_handle.lock().await.take() {
            handle.await.context("Failed to join poll loop")?;
        }
        if let Some(handle) = self.eval_handle.lock().await.take() {
            handle.await.context("Failed to join evaluation loop")?;
        }

        let history = self.manager.history().await;
        let realized: f64 = history.iter().map(|p| p.realized_pnl_eth).sum();
        info!(
            "Engine stopped | {} open, {} closed, {:.6} ETH realized",
            self.manager.open_count().await,
            history.len(),
            realized
        );
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::credibility::StaticCredibilityGate;
    use crate::api::venue::{DryRunGateway, SimulatedMarket};
    use crate::chain::client::RawLog;
    use crate::trading::ladder::Ladder;
    use crate::trading::launch::testutil::{encode_v1_data, raw_log_at, CURRENCY};
    use crate::trading::launch::TOKEN_LAUNCHED_V1_SELECTOR;
    use crate::trading::position::fixed_notional;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::sync::Mutex as StdMutex;

    struct FakeChain {
        latest: u64,
        logs: StdMutex<Vec<RawLog>>,
        block_time: DateTime<Utc>,
    }

    #[async_trait]
    impl LogSource for FakeChain {
        async fn latest_block(&self) -> Result<u64> {
            Ok(self.latest)
        }
        async fn block_timestamp(&self, _number: u64) -> Result<DateTime<Utc>> {
            Ok(self.block_time)
        }
        async fn fetch_logs(
            &self,
            _address: &str,
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<RawLog>> {
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|log| {
                    log.block_number()
                        .map(|n| n >= from_block && n <= to_block)
                        .unwrap_or(false)
                })
                .cloned()
                .collect())
        }
    }

    struct Pipeline {
        poller: LogPoller,
        chain: Arc<dyn LogSource>,
        freshness: FreshnessFilter,
        gate: Arc<dyn CredibilityGate>,
        manager: Arc<PositionManager>,
        sizing: SizingPolicy,
    }

    fn pipeline(chain: Arc<FakeChain>, score: Option<f64>, max_open: usize) -> Pipeline {
        let startup_ts = chain.block_time - ChronoDuration::seconds(60);
        let gateway = Arc::new(DryRunGateway::new(Arc::new(SimulatedMarket::new())));
        Pipeline {
            poller: LogPoller::new(chain.clone(), "0xfactory", 500, 0, 100),
            chain: chain.clone(),
            freshness: FreshnessFilter::new(100, startup_ts, 10),
            gate: Arc::new(StaticCredibilityGate { score }),
            manager: Arc::new(PositionManager::new(gateway, max_open, 30.0, 240)),
            sizing: fixed_notional(0.01),
        }
    }

    async fn run_cycle(p: &mut Pipeline) {
        run_launch_cycle(
            &mut p.poller,
            &p.chain,
            &p.freshness,
            &p.gate,
            &p.manager,
            &p.sizing,
            60.0,
        )
        .await
        .unwrap();
    }

    fn launch_log(token: &str, block: u64, index: u64) -> RawLog {
        raw_log_at(
            TOKEN_LAUNCHED_V1_SELECTOR,
            encode_v1_data(token, "Moon Rocket", "MOON", CURRENCY),
            block,
            &format!("0xtx{}{}", block, index),
            index,
        )
    }

    fn fake_chain(logs: Vec<RawLog>) -> Arc<FakeChain> {
        Arc::new(FakeChain {
            latest: 106,
            logs: StdMutex::new(logs),
            block_time: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_gated_launch_opens_a_position() {
        let token = "c0ffee254729296a45a3885639ac7e10f9d54979";
        let chain = fake_chain(vec![launch_log(token, 105, 0)]);
        let mut p = pipeline(chain, Some(80.0), 5);

        run_cycle(&mut p).await;
        assert_eq!(p.manager.open_count().await, 1);
        assert!(p.manager.has_open_position(&format!("0x{}", token)).await);
    }

    #[tokio::test]
    async fn test_low_score_launch_is_skipped() {
        let chain = fake_chain(vec![launch_log(
            "c0ffee254729296a45a3885639ac7e10f9d54979",
            105,
            0,
        )]);
        let mut p = pipeline(chain, Some(10.0), 5);

        run_cycle(&mut p).await;
        assert_eq!(p.manager.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_unscored_creator_is_skipped() {
        let chain = fake_chain(vec![launch_log(
            "c0ffee254729296a45a3885639ac7e10f9d54979",
            105,
            0,
        )]);
        let mut p = pipeline(chain, None, 5);

        run_cycle(&mut p).await;
        assert_eq!(p.manager.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_launch_is_skipped() {
        // Block at the startup anchor itself must be rejected.
        let chain = fake_chain(vec![launch_log(
            "c0ffee254729296a45a3885639ac7e10f9d54979",
            100,
            0,
        )]);
        let mut p = pipeline(chain, Some(80.0), 5);
        p.poller = LogPoller::new(p.chain.clone(), "0xfactory", 500, 0, 99);

        run_cycle(&mut p).await;
        assert_eq!(p.manager.open_count().await, 0);
    }

    #[tokio::test]
    async fn test_earlier_launch_wins_last_slot() {
        let first = "aaaa00000000000000000000000000000000000a";
        let second = "bbbb00000000000000000000000000000000000b";
        // Served out of order; the poller re-orders by (block, logIndex).
        let chain = fake_chain(vec![
            launch_log(second, 105, 7),
            launch_log(first, 105, 2),
        ]);
        let mut p = pipeline(chain, Some(80.0), 1);

        run_cycle(&mut p).await;
        assert_eq!(p.manager.open_count().await, 1);
        assert!(p.manager.has_open_position(&format!("0x{}", first)).await);
        assert!(!p.manager.has_open_position(&format!("0x{}", second)).await);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_reaches_gate_once() {
        // Scenario C end to end: the same log served in two overlapping
        // windows opens exactly one position.
        let token = "c0ffee254729296a45a3885639ac7e10f9d54979";
        let chain = fake_chain(vec![launch_log(token, 105, 0)]);
        let mut p = pipeline(chain, Some(80.0), 5);
        p.poller = LogPoller::new(p.chain.clone(), "0xfactory", 500, 5, 100);

        run_cycle(&mut p).await;
        run_cycle(&mut p).await;
        assert_eq!(p.manager.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_eval_cycle_retires_closed_positions() {
        let token = "c0ffee254729296a45a3885639ac7e10f9d54979";
        let chain = fake_chain(vec![launch_log(token, 105, 0)]);
        let mut p = pipeline(chain, Some(80.0), 5);
        run_cycle(&mut p).await;

        let handles = p.manager.open_handles().await;
        handles[0].lock().await.close(
            crate::trading::position::CloseReason::FullExit,
            1e-5,
            Utc::now(),
        );

        let market = Arc::new(SimulatedMarket::new());
        let evaluator = Arc::new(LadderEvaluator::new(
            Ladder::parse("100:30").unwrap(),
            0.001,
            Arc::new(DryRunGateway::new(market.clone())),
            Arc::new(crate::api::oracle::SimulatedOracle::new(market)),
        ));
        run_eval_cycle(&p.manager, &evaluator).await.unwrap();

        assert_eq!(p.manager.open_count().await, 0);
        assert_eq!(p.manager.history().await.len(), 1);
    }
}
