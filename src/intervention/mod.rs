//! Threshold-triggered contextual help.

pub mod catalog;
pub mod engine;

pub use catalog::{HelpCatalog, HelpMessage, MessageContext, MessageKind, StepContext};
pub use engine::{
    CooldownMap, InterventionEngine, InterventionPolicy, InterventionRecord, PolicySnapshot,
    spawn_low_score_listener,
};
