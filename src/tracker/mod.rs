//! Event recording and score upkeep.

pub mod state;
pub mod tracker;

pub use state::{ActiveRoster, ActivityCache, ScoreCache};
pub use tracker::{EngagementTracker, LowScoreSignal};
