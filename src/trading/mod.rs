pub mod engine;
pub mod evaluator;
pub mod freshness;
pub mod ladder;
pub mod launch;
pub mod position;

pub use engine::Engine;
pub use evaluator::LadderEvaluator;
pub use ladder::{Ladder, LadderLevel};
pub use launch::LaunchEvent;
pub use position::{CloseReason, Position, PositionManager, PositionStatus};
