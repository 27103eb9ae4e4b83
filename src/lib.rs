//! Onboard Pulse: engagement scoring and intervention engine.

pub mod alerts;
pub mod config;
pub mod error;
pub mod events;
pub mod intervention;
pub mod scheduler;
pub mod scoring;
pub mod store;
pub mod tracker;
