//! Persistence layer: libSQL-backed storage for engagement events,
//! interventions, and the onboarding read models.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{EngagementStore, OnboardingSessionRef, StepRecord, UserRole};
