use std::sync::Arc;

use anyhow::Context;

use onboard_pulse::alerts::{Alerter, LogAlerter, WebhookAlerter};
use onboard_pulse::config::EngineConfig;
use onboard_pulse::intervention::{
    HelpCatalog, InterventionEngine, InterventionPolicy, spawn_low_score_listener,
};
use onboard_pulse::scheduler::Scheduler;
use onboard_pulse::scoring::ScoreCalculator;
use onboard_pulse::store::{EngagementStore, LibSqlBackend};
use onboard_pulse::tracker::{ActiveRoster, EngagementTracker, ScoreCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env();

    eprintln!("📈 Onboard Pulse v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Intervention: below {} with {}m cooldown",
        config.intervention_threshold, config.intervention_cooldown_minutes
    );
    eprintln!(
        "   Sweeps: inactivity {}s, refresh {}s, intervention {}s",
        config.inactivity_sweep_interval.as_secs(),
        config.score_refresh_interval.as_secs(),
        config.intervention_sweep_interval.as_secs()
    );

    // ── Database ─────────────────────────────────────────────────────
    let db_path =
        std::env::var("PULSE_DB_PATH").unwrap_or_else(|_| "./data/onboard-pulse.db".to_string());
    let store: Arc<dyn EngagementStore> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .with_context(|| format!("Failed to open database at {db_path}"))?,
    );
    eprintln!("   Database: {db_path}");

    // ── Alerts ───────────────────────────────────────────────────────
    let alerter: Arc<dyn Alerter> = match std::env::var("PULSE_ALERT_WEBHOOK_URL") {
        Ok(url) if !url.is_empty() => {
            eprintln!("   Alerts: webhook");
            Arc::new(WebhookAlerter::new(url))
        }
        _ => {
            eprintln!("   Alerts: log only");
            Arc::new(LogAlerter)
        }
    };

    // ── Engine wiring ────────────────────────────────────────────────
    let calculator = Arc::new(ScoreCalculator::new(
        Arc::clone(&store),
        config.scoring_window,
    ));
    let scores = Arc::new(ScoreCache::new());
    let roster = Arc::new(ActiveRoster::new());
    let policy = Arc::new(
        InterventionPolicy::new(
            config.intervention_threshold,
            config.intervention_cooldown_minutes,
        )
        .context("Invalid intervention policy configuration")?,
    );

    let (low_score_tx, low_score_rx) = tokio::sync::mpsc::channel(64);

    let tracker = Arc::new(EngagementTracker::new(
        Arc::clone(&store),
        Arc::clone(&calculator),
        Arc::clone(&scores),
        Arc::clone(&roster),
        Arc::clone(&policy),
        low_score_tx,
        alerter,
        &config,
    ));
    let interventions = Arc::new(InterventionEngine::new(
        Arc::clone(&store),
        calculator,
        scores,
        policy,
        HelpCatalog::baseline(),
    ));

    let listener = spawn_low_score_listener(Arc::clone(&interventions), low_score_rx);

    let scheduler = Scheduler::new(tracker, interventions, roster, &config);
    scheduler.start().await;
    eprintln!("   Engine running. Ctrl-C to stop.\n");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received");
    scheduler.stop().await;
    listener.abort();
    tracing::info!("Shutdown complete");

    Ok(())
}
