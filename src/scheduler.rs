//! Background sweeps that keep scores and interventions fresh.
//!
//! Three independent interval loops over the active-user roster:
//! inactivity detection (which also evicts long-idle users from the
//! roster), score refresh, and intervention checks. Per-user failures
//! are logged and skipped; the loops themselves only exit on shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::intervention::InterventionEngine;
use crate::tracker::{ActiveRoster, EngagementTracker};

struct Running {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the three sweep loops. `start` is idempotent; `stop` aborts and
/// awaits every loop.
pub struct Scheduler {
    tracker: Arc<EngagementTracker>,
    interventions: Arc<InterventionEngine>,
    roster: Arc<ActiveRoster>,
    config: EngineConfig,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(
        tracker: Arc<EngagementTracker>,
        interventions: Arc<InterventionEngine>,
        roster: Arc<ActiveRoster>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            tracker,
            interventions,
            roster,
            config: config.clone(),
            running: Mutex::new(None),
        }
    }

    /// Spawn the sweep loops. Calling `start` while already running is a
    /// logged no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Sweep scheduler already running");
            return;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(3);

        {
            let tracker = Arc::clone(&self.tracker);
            let roster = Arc::clone(&self.roster);
            let shutdown = Arc::clone(&shutdown);
            let interval = self.config.inactivity_sweep_interval;
            let ttl = self.config.active_user_ttl;
            handles.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tick.tick().await;
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    inactivity_sweep_once(&tracker, &roster, ttl).await;
                }
            }));
        }

        {
            let tracker = Arc::clone(&self.tracker);
            let roster = Arc::clone(&self.roster);
            let shutdown = Arc::clone(&shutdown);
            let interval = self.config.score_refresh_interval;
            handles.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tick.tick().await;
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    refresh_sweep_once(&tracker, &roster).await;
                }
            }));
        }

        {
            let interventions = Arc::clone(&self.interventions);
            let roster = Arc::clone(&self.roster);
            let shutdown = Arc::clone(&shutdown);
            let interval = self.config.intervention_sweep_interval;
            handles.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                loop {
                    tick.tick().await;
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    intervention_sweep_once(&interventions, &roster).await;
                }
            }));
        }

        info!(
            inactivity_secs = self.config.inactivity_sweep_interval.as_secs(),
            refresh_secs = self.config.score_refresh_interval.as_secs(),
            intervention_secs = self.config.intervention_sweep_interval.as_secs(),
            "Sweep scheduler started"
        );
        *running = Some(Running { shutdown, handles });
    }

    /// Stop all loops and wait for them to finish.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            debug!("Sweep scheduler not running");
            return;
        };

        running.shutdown.store(true, Ordering::Relaxed);
        for handle in &running.handles {
            handle.abort();
        }
        let _ = futures::future::join_all(running.handles).await;
        info!("Sweep scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

/// One inactivity pass: age out long-idle roster entries, then check
/// every remaining user for a gap.
async fn inactivity_sweep_once(
    tracker: &EngagementTracker,
    roster: &ActiveRoster,
    ttl: Duration,
) {
    let evicted = roster.evict_idle(ttl).await;
    if evicted > 0 {
        debug!(evicted, "Evicted idle users from the sweep roster");
    }

    for user_id in roster.snapshot().await {
        if let Err(e) = tracker.detect_inactivity(&user_id, None).await {
            warn!(user_id = %user_id, error = %e, "Inactivity check failed");
        }
    }
}

/// One refresh pass: recompute and cache the score for every active user.
async fn refresh_sweep_once(tracker: &EngagementTracker, roster: &ActiveRoster) {
    for user_id in roster.snapshot().await {
        tracker.refresh_score(&user_id).await;
    }
}

/// One intervention pass over every active user.
async fn intervention_sweep_once(interventions: &InterventionEngine, roster: &ActiveRoster) {
    for user_id in roster.snapshot().await {
        if let Err(e) = interventions.monitor_engagement(&user_id).await {
            warn!(user_id = %user_id, error = %e, "Intervention sweep failed for user");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::alerts::LogAlerter;
    use crate::events::EventPayload;
    use crate::intervention::{HelpCatalog, InterventionPolicy};
    use crate::scoring::ScoreCalculator;
    use crate::store::{EngagementStore, LibSqlBackend, OnboardingSessionRef};
    use crate::tracker::ScoreCache;

    struct Rig {
        scheduler: Scheduler,
        tracker: Arc<EngagementTracker>,
        interventions: Arc<InterventionEngine>,
        store: Arc<LibSqlBackend>,
        scores: Arc<ScoreCache>,
        roster: Arc<ActiveRoster>,
    }

    async fn rig(config: EngineConfig) -> Rig {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let dyn_store: Arc<dyn EngagementStore> = store.clone();
        let calculator = Arc::new(ScoreCalculator::new(
            Arc::clone(&dyn_store),
            config.scoring_window,
        ));
        let scores = Arc::new(ScoreCache::new());
        let roster = Arc::new(ActiveRoster::new());
        let policy = Arc::new(
            InterventionPolicy::new(
                config.intervention_threshold,
                config.intervention_cooldown_minutes,
            )
            .unwrap(),
        );
        let (tx, _rx) = mpsc::channel(8);
        let tracker = Arc::new(EngagementTracker::new(
            Arc::clone(&dyn_store),
            Arc::clone(&calculator),
            Arc::clone(&scores),
            Arc::clone(&roster),
            Arc::clone(&policy),
            tx,
            Arc::new(LogAlerter),
            &config,
        ));
        let interventions = Arc::new(InterventionEngine::new(
            dyn_store,
            calculator,
            Arc::clone(&scores),
            policy,
            HelpCatalog::baseline(),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&tracker),
            Arc::clone(&interventions),
            Arc::clone(&roster),
            &config,
        );
        Rig {
            scheduler,
            tracker,
            interventions,
            store,
            scores,
            roster,
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_clears() {
        let rig = rig(EngineConfig::default()).await;

        rig.scheduler.start().await;
        assert!(rig.scheduler.is_running().await);
        rig.scheduler.start().await;
        assert!(rig.scheduler.is_running().await);

        rig.scheduler.stop().await;
        assert!(!rig.scheduler.is_running().await);
        // Stopping again is a no-op
        rig.scheduler.stop().await;
    }

    #[tokio::test]
    async fn refresh_loop_populates_the_cache() {
        let config = EngineConfig {
            score_refresh_interval: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        let rig = rig(config).await;
        rig.roster.mark("u1", Utc::now()).await;

        rig.scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        rig.scheduler.stop().await;

        assert_eq!(rig.scores.get("u1").await, Some(0.0));
    }

    #[tokio::test]
    async fn inactivity_sweep_flags_quiet_users() {
        let rig = rig(EngineConfig::default()).await;

        rig.store
            .append_event(
                "u1",
                None,
                &EventPayload::Interaction {
                    kind: "click".into(),
                    detail: serde_json::Value::Null,
                },
                Utc::now() - chrono::Duration::minutes(20),
            )
            .await
            .unwrap();
        rig.roster.mark("u1", Utc::now()).await;

        inactivity_sweep_once(&rig.tracker, &rig.roster, rig.scheduler.config.active_user_ttl)
            .await;

        let latest = rig.store.latest_event("u1").await.unwrap().unwrap();
        assert!(matches!(latest.payload, EventPayload::Inactivity { .. }));
    }

    #[tokio::test]
    async fn inactivity_sweep_evicts_before_checking() {
        let rig = rig(EngineConfig::default()).await;

        rig.store
            .append_event(
                "stale",
                None,
                &EventPayload::Interaction {
                    kind: "click".into(),
                    detail: serde_json::Value::Null,
                },
                Utc::now() - chrono::Duration::hours(30),
            )
            .await
            .unwrap();
        rig.roster
            .mark("stale", Utc::now() - chrono::Duration::hours(30))
            .await;

        inactivity_sweep_once(&rig.tracker, &rig.roster, rig.scheduler.config.active_user_ttl)
            .await;

        // Evicted before the gap check ran, so no inactivity event landed
        assert_eq!(rig.roster.len().await, 0);
        let latest = rig.store.latest_event("stale").await.unwrap().unwrap();
        assert!(matches!(latest.payload, EventPayload::Interaction { .. }));
    }

    #[tokio::test]
    async fn intervention_sweep_covers_roster_users() {
        let rig = rig(EngineConfig::default()).await;
        let session_id = Uuid::new_v4();
        rig.store
            .upsert_session(&OnboardingSessionRef {
                id: session_id,
                user_id: "u1".into(),
                current_step: 1,
                total_steps: 5,
                status: "active".into(),
                started_at: Utc::now(),
            })
            .await
            .unwrap();
        rig.scores.put("u1", 12.0).await;
        rig.roster.mark("u1", Utc::now()).await;

        intervention_sweep_once(&rig.interventions, &rig.roster).await;

        let records = rig
            .store
            .interventions_for_user("u1", None, 10)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }
}
