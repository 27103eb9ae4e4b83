//! Intervention decisions and persistence.
//!
//! Decides when a struggling user gets a help message (score strictly
//! below threshold, at most once per cooldown window), assembles the
//! step context, and writes the intervention record. Cooldown state
//! lives in memory; a restart clears it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::catalog::{HelpCatalog, HelpMessage, StepContext};
use crate::error::{ConfigError, EngagementError, Result};
use crate::scoring::ScoreCalculator;
use crate::store::EngagementStore;
use crate::tracker::state::ScoreCache;
use crate::tracker::LowScoreSignal;

/// A persisted record of one help message shown to a user. Shares its id
/// with the delivered message so feedback can target it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub intervention_type: String,
    pub message_content: String,
    pub triggered_at: DateTime<Utc>,
    pub was_helpful: Option<bool>,
}

// ── Policy ──────────────────────────────────────────────────────────

/// Current threshold and cooldown, as served to the configuration
/// interface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub threshold: f64,
    pub cooldown_minutes: u32,
}

struct PolicyInner {
    threshold: f64,
    cooldown_minutes: u32,
}

/// Runtime-adjustable intervention policy. Writes are validated; reads
/// take effect on the next decision.
pub struct InterventionPolicy {
    inner: RwLock<PolicyInner>,
}

impl InterventionPolicy {
    pub fn new(threshold: f64, cooldown_minutes: u32) -> std::result::Result<Self, ConfigError> {
        validate_threshold(threshold)?;
        validate_cooldown(cooldown_minutes)?;
        Ok(Self {
            inner: RwLock::new(PolicyInner {
                threshold,
                cooldown_minutes,
            }),
        })
    }

    pub async fn threshold(&self) -> f64 {
        self.inner.read().await.threshold
    }

    pub async fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.inner.read().await.cooldown_minutes))
    }

    pub async fn set_threshold(&self, value: f64) -> std::result::Result<(), ConfigError> {
        validate_threshold(value)?;
        self.inner.write().await.threshold = value;
        Ok(())
    }

    pub async fn set_cooldown_minutes(&self, value: u32) -> std::result::Result<(), ConfigError> {
        validate_cooldown(value)?;
        self.inner.write().await.cooldown_minutes = value;
        Ok(())
    }

    pub async fn snapshot(&self) -> PolicySnapshot {
        let inner = self.inner.read().await;
        PolicySnapshot {
            threshold: inner.threshold,
            cooldown_minutes: inner.cooldown_minutes,
        }
    }
}

fn validate_threshold(value: f64) -> std::result::Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(ConfigError::InvalidValue {
            key: "intervention_threshold".to_string(),
            message: format!("must be between 0 and 100, got {value}"),
        });
    }
    Ok(())
}

fn validate_cooldown(minutes: u32) -> std::result::Result<(), ConfigError> {
    if minutes == 0 {
        return Err(ConfigError::InvalidValue {
            key: "intervention_cooldown_minutes".to_string(),
            message: "must be at least 1 minute".to_string(),
        });
    }
    Ok(())
}

// ── Cooldowns ───────────────────────────────────────────────────────

/// Last-intervention times keyed by user id.
#[derive(Default)]
pub struct CooldownMap {
    inner: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl CooldownMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn last_intervention(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.inner.read().await.get(user_id).copied()
    }

    pub async fn record(&self, user_id: &str, at: DateTime<Utc>) {
        self.inner.write().await.insert(user_id.to_string(), at);
    }
}

/// True when no prior intervention exists, or strictly more than
/// `cooldown` has elapsed since the last one. Exactly the cooldown does
/// not qualify.
fn cooldown_satisfied(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: chrono::Duration,
) -> bool {
    match last {
        None => true,
        Some(last) => now - last > cooldown,
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// Decides, composes, and records interventions.
pub struct InterventionEngine {
    store: Arc<dyn EngagementStore>,
    calculator: Arc<ScoreCalculator>,
    scores: Arc<ScoreCache>,
    policy: Arc<InterventionPolicy>,
    cooldowns: CooldownMap,
    catalog: HelpCatalog,
}

impl InterventionEngine {
    pub fn new(
        store: Arc<dyn EngagementStore>,
        calculator: Arc<ScoreCalculator>,
        scores: Arc<ScoreCache>,
        policy: Arc<InterventionPolicy>,
        catalog: HelpCatalog,
    ) -> Self {
        Self {
            store,
            calculator,
            scores,
            policy,
            cooldowns: CooldownMap::new(),
            catalog,
        }
    }

    /// Whether this score, for this user, warrants help right now.
    pub async fn should_intervene(&self, user_id: &str, score: f64) -> bool {
        if score >= self.policy.threshold().await {
            return false;
        }
        cooldown_satisfied(
            self.cooldowns.last_intervention(user_id).await,
            Utc::now(),
            self.policy.cooldown().await,
        )
    }

    /// Resolve everything message composition needs for a session.
    pub async fn step_context(&self, user_id: &str, session_id: Uuid) -> Result<StepContext> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(EngagementError::SessionNotFound { session_id })?;

        let user_role = self.store.user_role(user_id).await?;
        let step_number = session.current_step;
        let time_on_step_seconds = match self
            .store
            .step_started_at(session_id, step_number)
            .await?
        {
            Some(started) => ((Utc::now() - started).num_milliseconds() as f64 / 1000.0).max(0.0),
            None => 0.0,
        };
        let previous_interventions = self.store.count_session_interventions(session_id).await?;
        let engagement_score = match self.scores.get(user_id).await {
            Some(score) => score,
            None => self.calculator.score(user_id, Some(session_id)).await?,
        };

        Ok(StepContext {
            user_role,
            step_number,
            step_title: self.catalog.step_title(step_number),
            total_steps: session.total_steps,
            time_on_step_seconds,
            previous_interventions,
            engagement_score,
        })
    }

    /// Compose and persist a help message, then start the cooldown.
    /// A failed insert leaves the cooldown untouched so the next pass
    /// can retry.
    pub async fn trigger_help(
        &self,
        user_id: &str,
        ctx: &StepContext,
        session_id: Option<Uuid>,
    ) -> Result<HelpMessage> {
        let message = self.catalog.compose(ctx);
        let record = InterventionRecord {
            id: message.id,
            user_id: user_id.to_string(),
            session_id,
            intervention_type: "low_engagement_help".to_string(),
            message_content: message.content.clone(),
            triggered_at: Utc::now(),
            was_helpful: None,
        };
        self.store.insert_intervention(&record).await?;
        self.cooldowns.record(user_id, record.triggered_at).await;

        info!(
            user_id,
            score = ctx.engagement_score,
            step = ctx.step_number,
            kind = %message.message_type,
            "Triggered low-engagement help"
        );
        Ok(message)
    }

    /// Full evaluation for one user: active session, current score,
    /// threshold and cooldown checks, then help. `Ok(None)` when the user
    /// has no active session or does not qualify.
    pub async fn monitor_engagement(&self, user_id: &str) -> Result<Option<HelpMessage>> {
        let Some(session) = self.store.active_session(user_id).await? else {
            return Ok(None);
        };
        let score = match self.scores.get(user_id).await {
            Some(score) => score,
            None => self.calculator.score(user_id, Some(session.id)).await?,
        };
        self.evaluate(user_id, session.id, score).await
    }

    /// Channel-consumer path: evaluate with the score the tracker already
    /// computed. Resolves the active session when the signal lacks one.
    pub async fn handle_low_score(&self, signal: LowScoreSignal) -> Result<Option<HelpMessage>> {
        let session_id = match signal.session_id {
            Some(id) => Some(id),
            None => self
                .store
                .active_session(&signal.user_id)
                .await?
                .map(|session| session.id),
        };
        let Some(session_id) = session_id else {
            return Ok(None);
        };
        self.evaluate(&signal.user_id, session_id, signal.score).await
    }

    async fn evaluate(
        &self,
        user_id: &str,
        session_id: Uuid,
        score: f64,
    ) -> Result<Option<HelpMessage>> {
        if !self.should_intervene(user_id, score).await {
            return Ok(None);
        }
        let ctx = self.step_context(user_id, session_id).await?;
        let message = self.trigger_help(user_id, &ctx, Some(session_id)).await?;
        Ok(Some(message))
    }

    /// Past interventions for a user, newest first.
    pub async fn get_intervention_history(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<InterventionRecord>> {
        Ok(self
            .store
            .interventions_for_user(user_id, session_id, limit)
            .await?)
    }

    /// Attach user feedback to an intervention. Unknown ids return
    /// `Ok(false)` rather than an error.
    pub async fn mark_intervention_helpful(
        &self,
        intervention_id: Uuid,
        was_helpful: bool,
    ) -> Result<bool> {
        let updated = self
            .store
            .set_intervention_feedback(intervention_id, was_helpful)
            .await?;
        if !updated {
            debug!(intervention_id = %intervention_id, "Feedback for unknown intervention ignored");
        }
        Ok(updated)
    }
}

/// Drain low-score signals from the tracker until the channel closes.
pub fn spawn_low_score_listener(
    engine: Arc<InterventionEngine>,
    mut rx: mpsc::Receiver<LowScoreSignal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            let user_id = signal.user_id.clone();
            match engine.handle_low_score(signal).await {
                Ok(Some(message)) => {
                    debug!(user_id = %user_id, message_id = %message.id, "Low-score signal handled");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to handle low-score signal");
                }
            }
        }
        debug!("Low-score listener stopped");
    })
}
