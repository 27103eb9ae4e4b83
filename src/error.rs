//! Error types for the engagement engine.

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Engagement error: {0}")]
    Engagement(#[from] EngagementError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Engagement-domain errors.
#[derive(Debug, thiserror::Error)]
pub enum EngagementError {
    #[error("Onboarding session not found: {session_id}")]
    SessionNotFound { session_id: Uuid },
}

/// Alert-delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    #[error("Alert webhook rejected with status {status}")]
    Rejected { status: u16 },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
