//! Engagement score computation.
//!
//! A score in [0, 100] is a weighted blend of four sub-metrics over a
//! trailing event window: step completion (40%), time spent (30%),
//! interaction frequency (20%), minus an inactivity penalty (10%). Each
//! sub-metric is clamped to [0, 100] before weighting and the result is
//! clamped again, so the output is always finite and in range.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::events::{EngagementEvent, EventPayload};
use crate::store::EngagementStore;

/// Weight of the step-completion metric.
pub const WEIGHT_STEP_COMPLETION: f64 = 0.40;
/// Weight of the time-spent metric.
pub const WEIGHT_TIME_SPENT: f64 = 0.30;
/// Weight of the interaction-frequency metric.
pub const WEIGHT_INTERACTION: f64 = 0.20;
/// Weight of the inactivity penalty (subtracted).
pub const WEIGHT_INACTIVITY_PENALTY: f64 = 0.10;

/// Seconds of recorded activity that count as a full time-spent score.
const TIME_TARGET_SECONDS: f64 = 1800.0;
/// Interactive events per window that count as a full interaction score.
const INTERACTION_TARGET: f64 = 60.0;
/// Metric points granted per completed step when no session is resolvable
/// (a five-step journey as the baseline).
const STEP_FALLBACK_POINTS: f64 = 20.0;
/// Inactivity penalty: points per five-minute block of observed idleness.
const PENALTY_POINTS_PER_BLOCK: f64 = 10.0;
const PENALTY_BLOCK_MINUTES: f64 = 5.0;
/// Cap on the penalty a single inactivity event can contribute.
const PENALTY_EVENT_CAP: f64 = 20.0;

/// The four sub-metrics plus the blended total, all in [0, 100].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub step_completion: f64,
    pub time_spent: f64,
    pub interaction: f64,
    pub inactivity_penalty: f64,
    pub total: f64,
}

/// Clamp a metric to [0, 100], mapping non-finite values to 0.
fn clamp_metric(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Blend pre-clamped sub-metrics into a final score.
///
/// The three additive weights sum to 1.0; the penalty weight scales a
/// deduction and is independent of that sum.
pub fn combine(step: f64, time: f64, interaction: f64, penalty: f64) -> f64 {
    clamp_metric(
        step * WEIGHT_STEP_COMPLETION
            + time * WEIGHT_TIME_SPENT
            + interaction * WEIGHT_INTERACTION
            - penalty * WEIGHT_INACTIVITY_PENALTY,
    )
}

/// Step metric from real session progress.
fn step_metric_from_progress(completed_steps: u32, total_steps: u32) -> f64 {
    clamp_metric(completed_steps as f64 / total_steps as f64 * 100.0)
}

/// Step metric fallback when no session is resolvable: each completion
/// event is worth a fixed share of a five-step journey.
fn step_metric_fallback(events: &[EngagementEvent]) -> f64 {
    let completions = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::StepCompletion { .. }))
        .count();
    clamp_metric(completions as f64 * STEP_FALLBACK_POINTS)
}

/// Time-spent metric: recorded active seconds against the target.
fn time_spent_metric(events: &[EngagementEvent]) -> f64 {
    let total_seconds: f64 = events
        .iter()
        .map(|e| match &e.payload {
            EventPayload::TimedActivity {
                duration_seconds, ..
            } => *duration_seconds,
            EventPayload::StepCompletion {
                time_spent_seconds, ..
            } => *time_spent_seconds,
            _ => 0.0,
        })
        .sum();
    clamp_metric(total_seconds / TIME_TARGET_SECONDS * 100.0)
}

/// Interaction metric: interactive event count against the target.
fn interaction_metric(events: &[EngagementEvent]) -> f64 {
    let count = events.iter().filter(|e| e.payload.is_interactive()).count();
    clamp_metric(count as f64 / INTERACTION_TARGET * 100.0)
}

/// Inactivity penalty: each observed gap contributes points per
/// five-minute block, capped per event, with the sum clamped to [0, 100].
fn inactivity_penalty(events: &[EngagementEvent]) -> f64 {
    let total: f64 = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Inactivity {
                inactive_duration_seconds,
            } => Some(*inactive_duration_seconds),
            _ => None,
        })
        .map(|seconds| {
            let blocks = (seconds / 60.0) / PENALTY_BLOCK_MINUTES;
            (blocks * PENALTY_POINTS_PER_BLOCK).min(PENALTY_EVENT_CAP)
        })
        .sum();
    clamp_metric(total)
}

/// Computes engagement scores from stored events and session progress.
pub struct ScoreCalculator {
    store: Arc<dyn EngagementStore>,
    window: chrono::Duration,
}

impl ScoreCalculator {
    /// Create a calculator scoring over the given trailing window.
    pub fn new(store: Arc<dyn EngagementStore>, window: Duration) -> Self {
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(24));
        Self { store, window }
    }

    /// Compute the blended score for a user.
    pub async fn score(&self, user_id: &str, session_id: Option<Uuid>) -> Result<f64> {
        Ok(self.breakdown(user_id, session_id).await?.total)
    }

    /// Compute the score with its sub-metrics, for the detailed-metrics
    /// surface and for debugging score movements.
    pub async fn breakdown(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
    ) -> Result<ScoreBreakdown> {
        let since = Utc::now() - self.window;
        let events = self.store.events_since(user_id, session_id, since).await?;

        let step_completion = self.step_metric(user_id, session_id, &events).await?;
        let time_spent = time_spent_metric(&events);
        let interaction = interaction_metric(&events);
        let penalty = inactivity_penalty(&events);

        Ok(ScoreBreakdown {
            step_completion,
            time_spent,
            interaction,
            inactivity_penalty: penalty,
            total: combine(step_completion, time_spent, interaction, penalty),
        })
    }

    /// Step metric: real session progress when a session is resolvable,
    /// otherwise the event-count fallback. A session with zero total
    /// steps also falls back, so there is no division by zero.
    async fn step_metric(
        &self,
        user_id: &str,
        session_id: Option<Uuid>,
        events: &[EngagementEvent],
    ) -> Result<f64> {
        let session = match session_id {
            Some(id) => self.store.session(id).await?,
            None => self.store.active_session(user_id).await?,
        };

        match session {
            Some(session) if session.total_steps > 0 => {
                let steps = self.store.step_records(session.id).await?;
                let completed = steps.iter().filter(|s| s.completed_at.is_some()).count();
                Ok(step_metric_from_progress(completed as u32, session.total_steps))
            }
            _ => Ok(step_metric_fallback(events)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LibSqlBackend, OnboardingSessionRef};

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "expected {b}, got {a}");
    }

    fn event(payload: EventPayload) -> EngagementEvent {
        EngagementEvent {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            session_id: None,
            payload,
            timestamp: Utc::now(),
            engagement_score: None,
        }
    }

    fn clicks(n: usize) -> Vec<EngagementEvent> {
        (0..n)
            .map(|_| {
                event(EventPayload::Interaction {
                    kind: "click".into(),
                    detail: serde_json::Value::Null,
                })
            })
            .collect()
    }

    // ── Combination ─────────────────────────────────────────────────

    #[test]
    fn additive_weights_sum_to_one() {
        approx(
            WEIGHT_STEP_COMPLETION + WEIGHT_TIME_SPENT + WEIGHT_INTERACTION,
            1.0,
        );
    }

    #[test]
    fn combine_is_the_weighted_blend() {
        approx(combine(90.0, 80.0, 70.0, 5.0), 90.0 * 0.4 + 80.0 * 0.3 + 70.0 * 0.2 - 0.5);
        approx(combine(100.0, 100.0, 100.0, 0.0), 90.0);
        approx(combine(0.0, 0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn combine_clamps_at_zero() {
        // A penalty can pull the blend below zero; the score floor is 0.
        assert_eq!(combine(0.0, 0.0, 0.0, 100.0), 0.0);
        assert_eq!(combine(10.0, 0.0, 0.0, 100.0), 0.0);
    }

    #[test]
    fn combine_never_produces_nan() {
        assert_eq!(combine(f64::NAN, 0.0, 0.0, 0.0), 0.0);
        assert_eq!(combine(f64::INFINITY, 100.0, 100.0, 0.0), 0.0);
    }

    // ── Sub-metrics ─────────────────────────────────────────────────

    #[test]
    fn step_fallback_counts_completion_events() {
        let mut events = Vec::new();
        assert_eq!(step_metric_fallback(&events), 0.0);

        for step in 1..=3 {
            events.push(event(EventPayload::StepCompletion {
                step_number: step,
                time_spent_seconds: 30.0,
            }));
        }
        approx(step_metric_fallback(&events), 60.0);

        for step in 4..=8 {
            events.push(event(EventPayload::StepCompletion {
                step_number: step,
                time_spent_seconds: 30.0,
            }));
        }
        // 8 completions would be 160 points; clamped to 100.
        assert_eq!(step_metric_fallback(&events), 100.0);
    }

    #[test]
    fn time_metric_sums_durations_and_step_time() {
        let events = vec![
            event(EventPayload::TimedActivity {
                activity: "video_watch".into(),
                duration_seconds: 600.0,
            }),
            event(EventPayload::StepCompletion {
                step_number: 1,
                time_spent_seconds: 300.0,
            }),
            // Interactions contribute no time
            event(EventPayload::Interaction {
                kind: "click".into(),
                detail: serde_json::Value::Null,
            }),
        ];
        // 900 of 1800 target seconds
        approx(time_spent_metric(&events), 50.0);
    }

    #[test]
    fn time_metric_clamps_at_target() {
        let events = vec![event(EventPayload::TimedActivity {
            activity: "video_watch".into(),
            duration_seconds: 7200.0,
        })];
        assert_eq!(time_spent_metric(&events), 100.0);
    }

    #[test]
    fn interaction_metric_counts_interactive_types() {
        approx(interaction_metric(&clicks(30)), 50.0);
        assert_eq!(interaction_metric(&clicks(60)), 100.0);
        assert_eq!(interaction_metric(&clicks(90)), 100.0);

        // A timed activity with an interactive tag still counts
        let mut events = clicks(29);
        events.push(event(EventPayload::TimedActivity {
            activity: "scroll".into(),
            duration_seconds: 15.0,
        }));
        approx(interaction_metric(&events), 50.0);

        // Opaque and inactivity events do not
        let events = vec![
            event(EventPayload::Opaque {
                event_type: "page_view".into(),
                data: serde_json::Value::Null,
            }),
            event(EventPayload::Inactivity {
                inactive_duration_seconds: 300.0,
            }),
        ];
        assert_eq!(interaction_metric(&events), 0.0);
    }

    #[test]
    fn penalty_per_event_is_capped() {
        // 10 idle minutes = two 5-minute blocks = 20 points (at the cap)
        let events = vec![event(EventPayload::Inactivity {
            inactive_duration_seconds: 600.0,
        })];
        approx(inactivity_penalty(&events), 20.0);

        // 25 idle minutes would be 50 points; the per-event cap holds it at 20
        let events = vec![event(EventPayload::Inactivity {
            inactive_duration_seconds: 1500.0,
        })];
        approx(inactivity_penalty(&events), 20.0);

        // Short gaps accrue fractionally: 6 minutes = 1.2 blocks = 12 points
        let events = vec![event(EventPayload::Inactivity {
            inactive_duration_seconds: 360.0,
        })];
        approx(inactivity_penalty(&events), 12.0);
    }

    #[test]
    fn penalty_accumulates_across_events() {
        let events: Vec<_> = (0..3)
            .map(|_| {
                event(EventPayload::Inactivity {
                    inactive_duration_seconds: 600.0,
                })
            })
            .collect();
        approx(inactivity_penalty(&events), 60.0);

        // Many gaps clamp at 100
        let events: Vec<_> = (0..10)
            .map(|_| {
                event(EventPayload::Inactivity {
                    inactive_duration_seconds: 600.0,
                })
            })
            .collect();
        assert_eq!(inactivity_penalty(&events), 100.0);
    }

    #[test]
    fn metrics_survive_adversarial_magnitudes() {
        let events = vec![
            event(EventPayload::TimedActivity {
                activity: "video_watch".into(),
                duration_seconds: 1e18,
            }),
            event(EventPayload::Inactivity {
                inactive_duration_seconds: f64::INFINITY,
            }),
            event(EventPayload::StepCompletion {
                step_number: u32::MAX,
                time_spent_seconds: f64::NAN,
            }),
        ];
        for metric in [
            time_spent_metric(&events),
            inactivity_penalty(&events),
            interaction_metric(&events),
            step_metric_fallback(&events),
        ] {
            assert!(metric.is_finite());
            assert!((0.0..=100.0).contains(&metric));
        }
    }

    // ── Store-backed scoring ────────────────────────────────────────

    async fn backend() -> Arc<LibSqlBackend> {
        Arc::new(LibSqlBackend::new_memory().await.unwrap())
    }

    fn calculator(store: Arc<LibSqlBackend>) -> ScoreCalculator {
        ScoreCalculator::new(store, Duration::from_secs(24 * 3600))
    }

    #[tokio::test]
    async fn no_events_scores_zero() {
        let store = backend().await;
        let calc = calculator(store);
        assert_eq!(calc.score("ghost", None).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn session_progress_drives_step_metric() {
        let store = backend().await;
        let session = OnboardingSessionRef {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            current_step: 3,
            total_steps: 5,
            status: "active".into(),
            started_at: Utc::now(),
        };
        store.upsert_session(&session).await.unwrap();
        for step in 1..=2 {
            store
                .mark_step_completed(session.id, step, Utc::now())
                .await
                .unwrap();
        }

        let calc = calculator(store);
        let breakdown = calc.breakdown("u1", Some(session.id)).await.unwrap();
        // 2 of 5 steps
        approx(breakdown.step_completion, 40.0);
        approx(breakdown.total, 16.0);
    }

    #[tokio::test]
    async fn zero_total_steps_falls_back_to_event_count() {
        let store = backend().await;
        let session = OnboardingSessionRef {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            current_step: 1,
            total_steps: 0,
            status: "active".into(),
            started_at: Utc::now(),
        };
        store.upsert_session(&session).await.unwrap();
        store
            .append_event(
                "u1",
                Some(session.id),
                &EventPayload::StepCompletion {
                    step_number: 1,
                    time_spent_seconds: 0.0,
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let calc = calculator(store);
        let breakdown = calc.breakdown("u1", Some(session.id)).await.unwrap();
        approx(breakdown.step_completion, 20.0);
        assert!(breakdown.total.is_finite());
    }

    #[tokio::test]
    async fn breakdown_total_matches_combine() {
        let store = backend().await;
        let now = Utc::now();
        for i in 0..10 {
            store
                .append_event(
                    "u1",
                    None,
                    &EventPayload::Interaction {
                        kind: "click".into(),
                        detail: serde_json::Value::Null,
                    },
                    now - chrono::Duration::seconds(i),
                )
                .await
                .unwrap();
        }
        store
            .append_event(
                "u1",
                None,
                &EventPayload::TimedActivity {
                    activity: "form_filling".into(),
                    duration_seconds: 450.0,
                },
                now,
            )
            .await
            .unwrap();

        let calc = calculator(store);
        let breakdown = calc.breakdown("u1", None).await.unwrap();
        approx(
            breakdown.total,
            combine(
                breakdown.step_completion,
                breakdown.time_spent,
                breakdown.interaction,
                breakdown.inactivity_penalty,
            ),
        );
        approx(breakdown.time_spent, 25.0);
    }

    #[tokio::test]
    async fn events_outside_window_are_ignored() {
        let store = backend().await;
        store
            .append_event(
                "u1",
                None,
                &EventPayload::TimedActivity {
                    activity: "video_watch".into(),
                    duration_seconds: 1800.0,
                },
                Utc::now() - chrono::Duration::hours(48),
            )
            .await
            .unwrap();

        let calc = calculator(store);
        assert_eq!(calc.score("u1", None).await.unwrap(), 0.0);
    }
}
