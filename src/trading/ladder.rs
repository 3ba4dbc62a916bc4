// src/trading/ladder.rs
//
// Exit ladder configuration: an ordered list of (gain trigger, sell
// fraction) pairs. Validated once at config-load time; immutable after.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LadderLevel {
    /// Total-return threshold that arms this level, in percent.
    pub trigger_percent: f64,
    /// Fraction of the remaining size sold when the level fires, in (0, 1].
    pub sell_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ladder {
    levels: Vec<LadderLevel>,
}

impl Ladder {
    pub fn new(levels: Vec<LadderLevel>) -> Result<Self, String> {
        validate(&levels)?;
        Ok(Self { levels })
    }

    /// Parse the "trigger:sellPercent,trigger:sellPercent,..." config form,
    /// e.g. "100:30,200:25" = sell 30% of remaining at +100%, then 25% of
    /// remaining at +200%.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut levels = Vec::new();
        for (i, part) in text.split(',').enumerate() {
            let part = part.trim();
            let (trigger, fraction) = part
                .split_once(':')
                .ok_or_else(|| format!("Ladder level {} must be trigger:sellPercent, got '{}'", i, part))?;
            let trigger_percent: f64 = trigger
                .trim()
                .parse()
                .map_err(|_| format!("Ladder level {} has a non-numeric trigger '{}'", i, trigger))?;
            let sell_percent: f64 = fraction
                .trim()
                .parse()
                .map_err(|_| format!("Ladder level {} has a non-numeric sell percent '{}'", i, fraction))?;
            levels.push(LadderLevel {
                trigger_percent,
                sell_fraction: sell_percent / 100.0,
            });
        }
        Self::new(levels)
    }

    pub fn levels(&self) -> &[LadderLevel] {
        &self.levels
    }
}

fn validate(levels: &[LadderLevel]) -> Result<(), String> {
    if levels.is_empty() {
        return Err("Ladder must have at least one level".to_string());
    }

    let mut previous: Option<f64> = None;
    for (i, level) in levels.iter().enumerate() {
        if !level.trigger_percent.is_finite() || level.trigger_percent <= 0.0 {
            return Err(format!(
                "Ladder level {} trigger must be a positive percent, got {}",
                i, level.trigger_percent
            ));
        }
        if !level.sell_fraction.is_finite()
            || level.sell_fraction <= 0.0
            || level.sell_fraction > 1.0
        {
            return Err(format!(
                "Ladder level {} sell fraction must be in (0, 1], got {}",
                i, level.sell_fraction
            ));
        }
        if let Some(prev) = previous {
            if level.trigger_percent <= prev {
                return Err(format!(
                    "Ladder triggers must be strictly increasing: level {} ({}) <= level {} ({})",
                    i,
                    level.trigger_percent,
                    i - 1,
                    prev
                ));
            }
        }
        previous = Some(level.trigger_percent);
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
