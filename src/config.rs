//! Configuration types.

use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Trailing window of events considered when computing a score.
    pub scoring_window: Duration,
    /// Gap since last activity beyond which a user counts as inactive.
    pub inactivity_threshold: Duration,
    /// Timed activities at or below this many seconds update the activity
    /// record but skip the score recompute.
    pub noise_floor_seconds: f64,
    /// Initial intervention threshold (runtime-adjustable on the policy).
    pub intervention_threshold: f64,
    /// Initial intervention cooldown in minutes (runtime-adjustable).
    pub intervention_cooldown_minutes: u32,
    /// Inactivity sweep interval.
    pub inactivity_sweep_interval: Duration,
    /// Score refresh sweep interval.
    pub score_refresh_interval: Duration,
    /// Intervention sweep interval.
    pub intervention_sweep_interval: Duration,
    /// Users with no roster activity for this long are dropped from sweeps.
    pub active_user_ttl: Duration,
    /// Consecutive scoring failures for one user before an ops alert fires.
    pub alert_failure_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scoring_window: Duration::from_secs(24 * 3600), // 24 hours
            inactivity_threshold: Duration::from_secs(300), // 5 minutes
            noise_floor_seconds: 10.0,
            intervention_threshold: 30.0,
            intervention_cooldown_minutes: 5,
            inactivity_sweep_interval: Duration::from_secs(120),
            score_refresh_interval: Duration::from_secs(30),
            intervention_sweep_interval: Duration::from_secs(60),
            active_user_ttl: Duration::from_secs(24 * 3600), // 24 hours
            alert_failure_threshold: 3,
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let secs = |var: &str, default: Duration| -> Duration {
            std::env::var(var)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let noise_floor_seconds: f64 = std::env::var("PULSE_NOISE_FLOOR_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.noise_floor_seconds);

        let intervention_threshold: f64 = std::env::var("PULSE_INTERVENTION_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.intervention_threshold);

        let intervention_cooldown_minutes: u32 = std::env::var("PULSE_INTERVENTION_COOLDOWN_MINS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.intervention_cooldown_minutes);

        let alert_failure_threshold: u32 = std::env::var("PULSE_ALERT_FAILURE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.alert_failure_threshold);

        Self {
            scoring_window: secs("PULSE_SCORING_WINDOW_SECS", defaults.scoring_window),
            inactivity_threshold: secs("PULSE_INACTIVITY_THRESHOLD_SECS", defaults.inactivity_threshold),
            noise_floor_seconds,
            intervention_threshold,
            intervention_cooldown_minutes,
            inactivity_sweep_interval: secs(
                "PULSE_INACTIVITY_SWEEP_SECS",
                defaults.inactivity_sweep_interval,
            ),
            score_refresh_interval: secs(
                "PULSE_SCORE_REFRESH_SECS",
                defaults.score_refresh_interval,
            ),
            intervention_sweep_interval: secs(
                "PULSE_INTERVENTION_SWEEP_SECS",
                defaults.intervention_sweep_interval,
            ),
            active_user_ttl: secs("PULSE_ACTIVE_USER_TTL_SECS", defaults.active_user_ttl),
            alert_failure_threshold,
        }
    }
}
