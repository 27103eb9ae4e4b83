//! libSQL-backed implementation of the `EngagementStore` trait.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{EngagementEvent, EventPayload};
use crate::intervention::InterventionRecord;
use crate::store::migrations;
use crate::store::traits::{EngagementStore, OnboardingSessionRef, StepRecord, UserRole};

/// libSQL store backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Seed helpers ────────────────────────────────────────────────────
//
// The engine only reads the onboarding rows; these writers exist for the
// embedding application (which owns session lifecycle) and for tests.

impl LibSqlBackend {
    /// Insert or update an onboarding session row.
    pub async fn upsert_session(&self, session: &OnboardingSessionRef) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO onboarding_sessions (id, user_id, current_step, total_steps, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (id) DO UPDATE SET current_step = ?3, total_steps = ?4, status = ?5",
                params![
                    session.id.to_string(),
                    session.user_id.as_str(),
                    session.current_step as i64,
                    session.total_steps as i64,
                    session.status.as_str(),
                    session.started_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_session: {e}")))?;
        Ok(())
    }

    /// Record when a step was entered. A step is only started once; later
    /// calls keep the original timestamp.
    pub async fn mark_step_started(
        &self,
        session_id: Uuid,
        step_number: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO onboarding_steps (session_id, step_number, started_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (session_id, step_number)
                 DO UPDATE SET started_at = COALESCE(onboarding_steps.started_at, ?3)",
                params![session_id.to_string(), step_number as i64, at.to_rfc3339()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_step_started: {e}")))?;
        Ok(())
    }

    /// Record a step as completed.
    pub async fn mark_step_completed(
        &self,
        session_id: Uuid,
        step_number: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO onboarding_steps (session_id, step_number, completed_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (session_id, step_number) DO UPDATE SET completed_at = ?3",
                params![session_id.to_string(), step_number as i64, at.to_rfc3339()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_step_completed: {e}")))?;
        Ok(())
    }

    /// Set (or change) a user's role.
    pub async fn set_user_role(&self, user_id: &str, role: UserRole) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO users (id, role) VALUES (?1, ?2)
                 ON CONFLICT (id) DO UPDATE SET role = ?2",
                params![user_id, role.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("set_user_role: {e}")))?;
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output with fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    // Try SQLite datetime() output without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<Uuid>` to a libsql Value.
fn opt_uuid(id: Option<Uuid>) -> libsql::Value {
    match id {
        Some(id) => libsql::Value::Text(id.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<bool>` to a libsql Value (INTEGER column).
fn opt_bool(b: Option<bool>) -> libsql::Value {
    match b {
        Some(b) => libsql::Value::Integer(b as i64),
        None => libsql::Value::Null,
    }
}

fn parse_optional_uuid(s: &Option<String>) -> Option<Uuid> {
    s.as_ref().and_then(|s| Uuid::parse_str(s).ok())
}

const EVENT_COLUMNS: &str =
    "id, user_id, session_id, event_type, event_data, timestamp, engagement_score";

const INTERVENTION_COLUMNS: &str =
    "id, user_id, session_id, intervention_type, message_content, triggered_at, was_helpful";

const SESSION_COLUMNS: &str = "id, user_id, current_step, total_steps, status, started_at";

/// Map a libsql Row to an EngagementEvent. Column order matches EVENT_COLUMNS.
fn row_to_event(row: &libsql::Row) -> Result<EngagementEvent, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("event.id: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| StoreError::Query(format!("event.id parse: {e}")))?;

    let user_id: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("event.user_id: {e}")))?;
    let session_str: Option<String> = row.get(2).ok();
    let event_type: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("event.event_type: {e}")))?;
    let data_str: String = row.get(4).unwrap_or_else(|_| "{}".to_string());
    let timestamp_str: String = row
        .get(5)
        .map_err(|e| StoreError::Query(format!("event.timestamp: {e}")))?;
    let engagement_score: Option<f64> = row.get(6).ok();

    let data = serde_json::from_str(&data_str).unwrap_or(serde_json::Value::Null);

    Ok(EngagementEvent {
        id,
        user_id,
        session_id: parse_optional_uuid(&session_str),
        payload: EventPayload::from_stored(&event_type, data),
        timestamp: parse_datetime(&timestamp_str),
        engagement_score,
    })
}

/// Map a libsql Row to an InterventionRecord. Column order matches
/// INTERVENTION_COLUMNS.
fn row_to_intervention(row: &libsql::Row) -> Result<InterventionRecord, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("intervention.id: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| StoreError::Query(format!("intervention.id parse: {e}")))?;

    let user_id: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("intervention.user_id: {e}")))?;
    let session_str: Option<String> = row.get(2).ok();
    let intervention_type: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("intervention.type: {e}")))?;
    let message_content: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("intervention.message: {e}")))?;
    let triggered_str: String = row
        .get(5)
        .map_err(|e| StoreError::Query(format!("intervention.triggered_at: {e}")))?;
    let was_helpful: Option<i64> = row.get(6).ok();

    Ok(InterventionRecord {
        id,
        user_id,
        session_id: parse_optional_uuid(&session_str),
        intervention_type,
        message_content,
        triggered_at: parse_datetime(&triggered_str),
        was_helpful: was_helpful.map(|v| v != 0),
    })
}

/// Map a libsql Row to an OnboardingSessionRef. Column order matches
/// SESSION_COLUMNS.
fn row_to_session(row: &libsql::Row) -> Result<OnboardingSessionRef, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("session.id: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| StoreError::Query(format!("session.id parse: {e}")))?;

    let user_id: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("session.user_id: {e}")))?;
    let current_step: i64 = row.get(2).unwrap_or(1);
    let total_steps: i64 = row.get(3).unwrap_or(0);
    let status: String = row.get(4).unwrap_or_else(|_| "active".to_string());
    let started_str: String = row
        .get(5)
        .map_err(|e| StoreError::Query(format!("session.started_at: {e}")))?;

    Ok(OnboardingSessionRef {
        id,
        user_id,
        current_step: current_step.max(0) as u32,
        total_steps: total_steps.max(0) as u32,
        status,
        started_at: parse_datetime(&started_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl EngagementStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Events ──────────────────────────────────────────────────────

    async fn append_event(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        payload: &EventPayload,
        timestamp: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO engagement_events (id, user_id, session_id, event_type, event_data, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                user_id,
                opt_uuid(session_id),
                payload.event_type(),
                payload.data().to_string(),
                timestamp.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("append_event: {e}")))?;

        debug!(event_id = %id, user_id, event_type = payload.event_type(), "Event appended");
        Ok(id)
    }

    async fn events_since(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> Result<Vec<EngagementEvent>, StoreError> {
        let conn = self.conn();
        let mut rows = match session_id {
            Some(session) => conn
                .query(
                    &format!(
                        "SELECT {EVENT_COLUMNS} FROM engagement_events
                         WHERE user_id = ?1 AND session_id = ?2 AND timestamp >= ?3
                         ORDER BY timestamp ASC"
                    ),
                    params![user_id, session.to_string(), since.to_rfc3339()],
                )
                .await,
            None => conn
                .query(
                    &format!(
                        "SELECT {EVENT_COLUMNS} FROM engagement_events
                         WHERE user_id = ?1 AND timestamp >= ?2
                         ORDER BY timestamp ASC"
                    ),
                    params![user_id, since.to_rfc3339()],
                )
                .await,
        }
        .map_err(|e| StoreError::Query(format!("events_since: {e}")))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_event(&row) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!("Skipping event row: {e}");
                }
            }
        }
        Ok(events)
    }

    async fn latest_event(
        &self,
        user_id: &str,
    ) -> Result<Option<EngagementEvent>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM engagement_events
                     WHERE user_id = ?1 ORDER BY timestamp DESC LIMIT 1"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("latest_event: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_event(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("latest_event read: {e}"))),
        }
    }

    async fn set_event_score(&self, event_id: Uuid, score: f64) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE engagement_events SET engagement_score = ?1 WHERE id = ?2",
                params![score, event_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("set_event_score: {e}")))?;
        Ok(())
    }

    async fn scored_events(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<EngagementEvent>, StoreError> {
        let conn = self.conn();
        let mut rows = match session_id {
            Some(session) => conn
                .query(
                    &format!(
                        "SELECT {EVENT_COLUMNS} FROM engagement_events
                         WHERE user_id = ?1 AND session_id = ?2 AND engagement_score IS NOT NULL
                         ORDER BY timestamp DESC LIMIT ?3"
                    ),
                    params![user_id, session.to_string(), limit as i64],
                )
                .await,
            None => conn
                .query(
                    &format!(
                        "SELECT {EVENT_COLUMNS} FROM engagement_events
                         WHERE user_id = ?1 AND engagement_score IS NOT NULL
                         ORDER BY timestamp DESC LIMIT ?2"
                    ),
                    params![user_id, limit as i64],
                )
                .await,
        }
        .map_err(|e| StoreError::Query(format!("scored_events: {e}")))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_event(&row) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!("Skipping event row: {e}");
                }
            }
        }
        Ok(events)
    }

    // ── Interventions ───────────────────────────────────────────────

    async fn insert_intervention(&self, record: &InterventionRecord) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO interventions (id, user_id, session_id, intervention_type, message_content, triggered_at, was_helpful)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.to_string(),
                    record.user_id.as_str(),
                    opt_uuid(record.session_id),
                    record.intervention_type.as_str(),
                    record.message_content.as_str(),
                    record.triggered_at.to_rfc3339(),
                    opt_bool(record.was_helpful),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_intervention: {e}")))?;

        debug!(intervention_id = %record.id, user_id = record.user_id.as_str(), "Intervention recorded");
        Ok(())
    }

    async fn set_intervention_feedback(
        &self,
        id: Uuid,
        was_helpful: bool,
    ) -> Result<bool, StoreError> {
        let count = self
            .conn()
            .execute(
                "UPDATE interventions SET was_helpful = ?1 WHERE id = ?2",
                params![was_helpful as i64, id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("set_intervention_feedback: {e}")))?;
        Ok(count > 0)
    }

    async fn interventions_for_user(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<InterventionRecord>, StoreError> {
        let conn = self.conn();
        let mut rows = match session_id {
            Some(session) => conn
                .query(
                    &format!(
                        "SELECT {INTERVENTION_COLUMNS} FROM interventions
                         WHERE user_id = ?1 AND session_id = ?2
                         ORDER BY triggered_at DESC LIMIT ?3"
                    ),
                    params![user_id, session.to_string(), limit as i64],
                )
                .await,
            None => conn
                .query(
                    &format!(
                        "SELECT {INTERVENTION_COLUMNS} FROM interventions
                         WHERE user_id = ?1 ORDER BY triggered_at DESC LIMIT ?2"
                    ),
                    params![user_id, limit as i64],
                )
                .await,
        }
        .map_err(|e| StoreError::Query(format!("interventions_for_user: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_intervention(&row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping intervention row: {e}");
                }
            }
        }
        Ok(records)
    }

    async fn count_session_interventions(&self, session_id: Uuid) -> Result<u32, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM interventions WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("count_session_interventions: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count.max(0) as u32)
            }
            _ => Ok(0),
        }
    }

    // ── Onboarding read models ──────────────────────────────────────

    async fn session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<OnboardingSessionRef>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM onboarding_sessions WHERE id = ?1"),
                params![session_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("session read: {e}"))),
        }
    }

    async fn active_session(
        &self,
        user_id: &str,
    ) -> Result<Option<OnboardingSessionRef>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM onboarding_sessions
                     WHERE user_id = ?1 AND status = 'active'
                     ORDER BY started_at DESC LIMIT 1"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("active_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("active_session read: {e}"))),
        }
    }

    async fn step_records(&self, session_id: Uuid) -> Result<Vec<StepRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT step_number, started_at, completed_at FROM onboarding_steps
                 WHERE session_id = ?1 ORDER BY step_number ASC",
                params![session_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("step_records: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let step_number: i64 = row.get(0).unwrap_or(0);
            let started_str: Option<String> = row.get(1).ok();
            let completed_str: Option<String> = row.get(2).ok();
            records.push(StepRecord {
                step_number: step_number.max(0) as u32,
                started_at: parse_optional_datetime(&started_str),
                completed_at: parse_optional_datetime(&completed_str),
            });
        }
        Ok(records)
    }

    async fn step_started_at(
        &self,
        session_id: Uuid,
        step_number: u32,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT started_at FROM onboarding_steps
                 WHERE session_id = ?1 AND step_number = ?2",
                params![session_id.to_string(), step_number as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("step_started_at: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let started_str: Option<String> = row.get(0).ok();
                Ok(parse_optional_datetime(&started_str))
            }
            _ => Ok(None),
        }
    }

    async fn user_role(&self, user_id: &str) -> Result<Option<UserRole>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT role FROM users WHERE id = ?1", params![user_id])
            .await
            .map_err(|e| StoreError::Query(format!("user_role: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let role_str: Option<String> = row.get(0).ok();
                Ok(role_str.as_deref().and_then(UserRole::parse))
            }
            _ => Ok(None),
        }
    }
}
