//! Unified `EngagementStore` trait: a single async interface for all
//! persistence the engine touches.
//!
//! Events and interventions are owned by the engine. The onboarding
//! session/step rows and the user role are read models owned by the
//! onboarding subsystem; the engine only reads them (the libsql backend
//! additionally carries inherent write helpers for the embedding
//! application and tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{EngagementEvent, EventPayload};
use crate::intervention::InterventionRecord;

/// The role a user signed up with. Drives help-message selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Developer,
    BusinessUser,
    Admin,
}

impl UserRole {
    /// Parse the stored role string. Unknown values are treated as
    /// "no role on file".
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "developer" => Some(Self::Developer),
            "business_user" => Some(Self::BusinessUser),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Developer => "developer",
            Self::BusinessUser => "business_user",
            Self::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

/// Read-only view of an onboarding session.
#[derive(Debug, Clone)]
pub struct OnboardingSessionRef {
    pub id: Uuid,
    pub user_id: String,
    /// 1-based step the user is currently on.
    pub current_step: u32,
    pub total_steps: u32,
    /// "active", "completed" or "abandoned".
    pub status: String,
    pub started_at: DateTime<Utc>,
}

impl OnboardingSessionRef {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// Per-step progress row for a session.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step_number: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Backend-agnostic store trait covering events, interventions, and the
/// onboarding read models.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Events ──────────────────────────────────────────────────────

    /// Append an engagement event. Returns the id of the new row so the
    /// follow-up score recompute can backfill exactly this event.
    async fn append_event(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        payload: &EventPayload,
        timestamp: DateTime<Utc>,
    ) -> Result<Uuid, StoreError>;

    /// Events for a user at or after `since`, oldest first. When
    /// `session_id` is given, only that session's events are returned.
    async fn events_since(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> Result<Vec<EngagementEvent>, StoreError>;

    /// The most recent event for a user, if any.
    async fn latest_event(&self, user_id: &str)
    -> Result<Option<EngagementEvent>, StoreError>;

    /// Backfill the engagement score onto one event row.
    async fn set_event_score(&self, event_id: Uuid, score: f64) -> Result<(), StoreError>;

    /// Events carrying a backfilled score, newest first, up to `limit`.
    async fn scored_events(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<EngagementEvent>, StoreError>;

    // ── Interventions ───────────────────────────────────────────────

    /// Persist a new intervention record.
    async fn insert_intervention(&self, record: &InterventionRecord) -> Result<(), StoreError>;

    /// Record user feedback on an intervention. Returns `false` when the
    /// id does not exist.
    async fn set_intervention_feedback(
        &self,
        id: Uuid,
        was_helpful: bool,
    ) -> Result<bool, StoreError>;

    /// Interventions for a user, newest first, up to `limit`. When
    /// `session_id` is given, only that session's records are returned.
    async fn interventions_for_user(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<InterventionRecord>, StoreError>;

    /// Number of interventions recorded against a session.
    async fn count_session_interventions(&self, session_id: Uuid) -> Result<u32, StoreError>;

    // ── Onboarding read models ──────────────────────────────────────

    /// Fetch a session by id.
    async fn session(&self, session_id: Uuid)
    -> Result<Option<OnboardingSessionRef>, StoreError>;

    /// The user's active session, if one exists.
    async fn active_session(
        &self,
        user_id: &str,
    ) -> Result<Option<OnboardingSessionRef>, StoreError>;

    /// All step rows for a session, ordered by step number.
    async fn step_records(&self, session_id: Uuid) -> Result<Vec<StepRecord>, StoreError>;

    /// When the given step was started, if recorded.
    async fn step_started_at(
        &self,
        session_id: Uuid,
        step_number: u32,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// The user's role, or `None` when unset or unrecognized.
    async fn user_role(&self, user_id: &str) -> Result<Option<UserRole>, StoreError>;
}
