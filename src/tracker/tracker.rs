//! EngagementTracker, the write-side facade of the engine.
//!
//! Records events, keeps the in-memory state current, and triggers a
//! score recompute after every countable event. The store append always
//! happens first: if it fails, no in-memory state is touched and the
//! error is returned to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerts::{self, Alerter, OpsAlert};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{EventPayload, ScorePoint};
use crate::intervention::InterventionPolicy;
use crate::scoring::{ScoreBreakdown, ScoreCalculator};
use crate::store::EngagementStore;
use crate::tracker::state::{ActivityCache, ActiveRoster, ScoreCache};

/// Sent to the intervention listener whenever a recompute lands below the
/// intervention threshold.
#[derive(Debug, Clone)]
pub struct LowScoreSignal {
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub score: f64,
}

/// Records engagement events and keeps scores current.
pub struct EngagementTracker {
    store: Arc<dyn EngagementStore>,
    calculator: Arc<ScoreCalculator>,
    activity: ActivityCache,
    scores: Arc<ScoreCache>,
    roster: Arc<ActiveRoster>,
    policy: Arc<InterventionPolicy>,
    low_score_tx: mpsc::Sender<LowScoreSignal>,
    alerter: Arc<dyn Alerter>,
    noise_floor_seconds: f64,
    inactivity_threshold: chrono::Duration,
    alert_failure_threshold: u32,
    /// Consecutive score-computation failures per user.
    failure_streaks: RwLock<HashMap<String, u32>>,
}

impl EngagementTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn EngagementStore>,
        calculator: Arc<ScoreCalculator>,
        scores: Arc<ScoreCache>,
        roster: Arc<ActiveRoster>,
        policy: Arc<InterventionPolicy>,
        low_score_tx: mpsc::Sender<LowScoreSignal>,
        alerter: Arc<dyn Alerter>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            calculator,
            activity: ActivityCache::new(),
            scores,
            roster,
            policy,
            low_score_tx,
            alerter,
            noise_floor_seconds: config.noise_floor_seconds,
            inactivity_threshold: chrono::Duration::from_std(config.inactivity_threshold)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            alert_failure_threshold: config.alert_failure_threshold,
            failure_streaks: RwLock::new(HashMap::new()),
        }
    }

    // ── Recording ───────────────────────────────────────────────────

    /// Record a UI interaction and return the recomputed score.
    pub async fn record_interaction(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        kind: &str,
        detail: serde_json::Value,
    ) -> Result<f64> {
        let payload = EventPayload::Interaction {
            kind: kind.to_string(),
            detail,
        };
        self.record(user_id, session_id, payload).await
    }

    /// Record an onboarding step completion and return the recomputed
    /// score.
    pub async fn record_step_completion(
        &self,
        user_id: &str,
        session_id: Uuid,
        step_number: u32,
        time_spent_seconds: f64,
    ) -> Result<f64> {
        let payload = EventPayload::StepCompletion {
            step_number,
            time_spent_seconds,
        };
        self.record(user_id, Some(session_id), payload).await
    }

    /// Record a timed activity span.
    ///
    /// Durations at or below the noise floor are persisted and refresh the
    /// activity record, but skip the score recompute; those return
    /// `Ok(None)`.
    pub async fn record_time_activity(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        activity: &str,
        duration_seconds: f64,
    ) -> Result<Option<f64>> {
        let now = Utc::now();
        let payload = EventPayload::TimedActivity {
            activity: activity.to_string(),
            duration_seconds,
        };
        let event_id = self
            .store
            .append_event(user_id, session_id, &payload, now)
            .await?;
        self.activity.touch(user_id, now).await;

        if duration_seconds <= self.noise_floor_seconds {
            debug!(
                user_id,
                duration_seconds, "Timed activity below noise floor, skipping recompute"
            );
            return Ok(None);
        }

        Ok(Some(self.recompute_after(user_id, session_id, event_id).await))
    }

    /// Check whether the user has gone quiet. A gap strictly longer than
    /// the inactivity threshold appends an `inactivity_detected` event
    /// (which itself counts as the newest activity) and recomputes the
    /// score. Users with no recorded activity at all are left untouched.
    pub async fn detect_inactivity(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
    ) -> Result<bool> {
        let last = match self.activity.last_activity(user_id).await {
            Some(at) => Some(at),
            None => self
                .store
                .latest_event(user_id)
                .await?
                .map(|event| event.timestamp),
        };
        let Some(last) = last else {
            return Ok(false);
        };

        let now = Utc::now();
        let gap = now - last;
        if gap <= self.inactivity_threshold {
            return Ok(false);
        }

        let inactive_seconds = gap.num_milliseconds() as f64 / 1000.0;
        let payload = EventPayload::Inactivity {
            inactive_duration_seconds: inactive_seconds,
        };
        let event_id = self
            .store
            .append_event(user_id, session_id, &payload, now)
            .await?;
        self.activity.touch(user_id, now).await;

        info!(user_id, inactive_seconds, "Inactivity detected");
        self.recompute_after(user_id, session_id, event_id).await;
        Ok(true)
    }

    async fn record(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        payload: EventPayload,
    ) -> Result<f64> {
        let now = Utc::now();
        let event_id = self
            .store
            .append_event(user_id, session_id, &payload, now)
            .await?;
        self.activity.touch(user_id, now).await;
        Ok(self.recompute_after(user_id, session_id, event_id).await)
    }

    /// The post-append contract: refresh the cache, backfill the score
    /// onto the triggering event, mark the user active, and nudge the
    /// intervention listener when the score is below threshold.
    async fn recompute_after(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        event_id: Uuid,
    ) -> f64 {
        let score = self.calculate_score(user_id, session_id).await;

        self.scores.put(user_id, score).await;
        // The event is already durable; a failed backfill only costs the
        // history point, so it is logged rather than raised.
        if let Err(e) = self.store.set_event_score(event_id, score).await {
            warn!(user_id, event_id = %event_id, error = %e, "Failed to backfill event score");
        }
        self.roster.mark(user_id, Utc::now()).await;

        if score < self.policy.threshold().await {
            let signal = LowScoreSignal {
                user_id: user_id.to_string(),
                session_id,
                score,
            };
            // A full channel is fine: the intervention sweep re-covers
            // every active user within a minute.
            if self.low_score_tx.try_send(signal).is_err() {
                debug!(user_id, "Low-score channel full, leaving user to the sweep");
            }
        }

        score
    }

    // ── Scores ──────────────────────────────────────────────────────

    /// Compute the score directly, bypassing the cache. Never fails
    /// outward: a broken store or malformed data degrades to 0.0.
    pub async fn calculate_score(&self, user_id: &str, session_id: Option<Uuid>) -> f64 {
        match self.calculator.score(user_id, session_id).await {
            Ok(score) => {
                self.failure_streaks.write().await.remove(user_id);
                score
            }
            Err(e) => {
                warn!(user_id, error = %e, "Score computation failed, returning 0");
                let streak = {
                    let mut streaks = self.failure_streaks.write().await;
                    let streak = streaks.entry(user_id.to_string()).or_insert(0);
                    *streak += 1;
                    *streak
                };
                if streak == self.alert_failure_threshold {
                    alerts::emit(
                        Arc::clone(&self.alerter),
                        OpsAlert {
                            component: "scoring".into(),
                            message: format!(
                                "{streak} consecutive score failures for user {user_id}"
                            ),
                            detail: serde_json::json!({
                                "user_id": user_id,
                                "consecutive_failures": streak,
                            }),
                        },
                    );
                }
                0.0
            }
        }
    }

    /// Cached score if present, otherwise compute and cache it.
    pub async fn get_current_score(&self, user_id: &str, session_id: Option<Uuid>) -> f64 {
        if let Some(score) = self.scores.get(user_id).await {
            return score;
        }
        let score = self.calculate_score(user_id, session_id).await;
        self.scores.put(user_id, score).await;
        self.roster.mark(user_id, Utc::now()).await;
        score
    }

    /// Sweep entry point: recompute and refresh the cache. Does not
    /// backfill events or remark the roster, so purely idle users still
    /// age out of the sweep set.
    pub async fn refresh_score(&self, user_id: &str) -> f64 {
        let score = self.calculate_score(user_id, None).await;
        self.scores.put(user_id, score).await;
        score
    }

    /// Score history from backfilled events, newest first.
    pub async fn get_score_history(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ScorePoint>> {
        let events = self.store.scored_events(user_id, session_id, limit).await?;
        Ok(events
            .into_iter()
            .filter_map(|event| {
                event.engagement_score.map(|score| ScorePoint {
                    timestamp: event.timestamp,
                    score,
                })
            })
            .collect())
    }

    /// The current sub-metric breakdown for a user.
    pub async fn detailed_metrics(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
    ) -> Result<ScoreBreakdown> {
        self.calculator.breakdown(user_id, session_id).await
    }

    /// The last time real activity was seen for a user, if any is cached.
    pub async fn last_activity(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.activity.last_activity(user_id).await
    }
}
