// src/trading/freshness.rs
//
// Startup-anchored freshness gate. Reacting to a stale launch is worse than
// missing a fresh one, so three redundant checks all have to pass: block
// numbers and timestamps can disagree slightly across data sources.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::trading::launch::LaunchEvent;

pub struct FreshnessFilter {
    startup_block: u64,
    startup_timestamp: DateTime<Utc>,
    max_stale_blocks: u64,
}

impl FreshnessFilter {
    pub fn new(startup_block: u64, startup_timestamp: DateTime<Utc>, max_stale_blocks: u64) -> Self {
        Self {
            startup_block,
            startup_timestamp,
            max_stale_blocks,
        }
    }

    /// True only if the event is strictly newer than engine startup and
    /// within the staleness bound of the current head.
    pub fn accept(
        &self,
        event: &LaunchEvent,
        current_block: u64,
        event_block_timestamp: DateTime<Utc>,
    ) -> bool {
        if event.block_number <= self.startup_block {
            debug!(
                "Rejecting {}: block {} at or before startup block {}",
                event.token_address, event.block_number, self.startup_block
            );
            return false;
        }

        if current_block.saturating_sub(event.block_number) > self.max_stale_blocks {
            debug!(
                "Rejecting {}: block {} is {} blocks behind head {}",
                event.token_address,
                event.block_number,
                current_block.saturating_sub(event.block_number),
                current_block
            );
            return false;
        }

        if event_block_timestamp <= self.startup_timestamp {
            debug!(
                "Rejecting {}: block timestamp {} at or before startup {}",
                event.token_address, event_block_timestamp, self.startup_timestamp
            );
            return false;
        }

        true
    }
}

// ============================================================================
// TESTS
// ============================================================================
