//! Engagement event model.
//!
//! Every user action the engine cares about is recorded as an
//! [`EngagementEvent`] carrying a typed [`EventPayload`]. Events are
//! append-only; the only later mutation is the score backfill onto the
//! event that triggered a recompute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event types that count toward the interaction-frequency metric.
pub const INTERACTIVE_EVENT_TYPES: [&str; 5] =
    ["click", "scroll", "focus", "input", "button_click"];

/// Typed payload of an engagement event.
///
/// The stored representation is a `(event_type, event_data)` pair; the tag
/// is dynamic for interactions and timed activities, so mapping to and from
/// storage goes through [`EventPayload::event_type`], [`EventPayload::data`]
/// and [`EventPayload::from_stored`] rather than a serde tag.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A UI interaction ("click", "scroll", ...). `detail` is stored
    /// verbatim and ignored by scoring.
    Interaction { kind: String, detail: Value },
    /// An onboarding step was completed.
    StepCompletion {
        step_number: u32,
        time_spent_seconds: f64,
    },
    /// A span of activity with a measured duration ("video_watch",
    /// "form_filling", ...).
    TimedActivity {
        activity: String,
        duration_seconds: f64,
    },
    /// Emitted by the inactivity detector when a gap is observed.
    Inactivity { inactive_duration_seconds: f64 },
    /// Anything else: stored for audit, ignored by scoring.
    Opaque { event_type: String, data: Value },
}

impl EventPayload {
    /// The stored event type tag.
    pub fn event_type(&self) -> &str {
        match self {
            Self::Interaction { kind, .. } => kind,
            Self::StepCompletion { .. } => "step_completion",
            Self::TimedActivity { activity, .. } => activity,
            Self::Inactivity { .. } => "inactivity_detected",
            Self::Opaque { event_type, .. } => event_type,
        }
    }

    /// The stored event data blob.
    pub fn data(&self) -> Value {
        match self {
            Self::Interaction { detail, .. } => detail.clone(),
            Self::StepCompletion {
                step_number,
                time_spent_seconds,
            } => serde_json::json!({
                "step_number": step_number,
                "time_spent_seconds": time_spent_seconds,
            }),
            Self::TimedActivity {
                duration_seconds, ..
            } => serde_json::json!({ "duration_seconds": duration_seconds }),
            Self::Inactivity {
                inactive_duration_seconds,
            } => serde_json::json!({
                "inactive_duration_seconds": inactive_duration_seconds,
            }),
            Self::Opaque { data, .. } => data.clone(),
        }
    }

    /// Rebuild a payload from its stored `(event_type, event_data)` pair.
    ///
    /// Precedence: the two reserved tags first, then any payload carrying a
    /// numeric `duration_seconds`, then a bare interactive tag. Everything
    /// else is `Opaque`.
    pub fn from_stored(event_type: &str, data: Value) -> Self {
        match event_type {
            "step_completion" => Self::StepCompletion {
                step_number: data
                    .get("step_number")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
                time_spent_seconds: data
                    .get("time_spent_seconds")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
            },
            "inactivity_detected" => Self::Inactivity {
                inactive_duration_seconds: data
                    .get("inactive_duration_seconds")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
            },
            _ => {
                if let Some(duration) = data.get("duration_seconds").and_then(Value::as_f64) {
                    Self::TimedActivity {
                        activity: event_type.to_string(),
                        duration_seconds: duration,
                    }
                } else if INTERACTIVE_EVENT_TYPES.contains(&event_type) {
                    Self::Interaction {
                        kind: event_type.to_string(),
                        detail: data,
                    }
                } else {
                    Self::Opaque {
                        event_type: event_type.to_string(),
                        data,
                    }
                }
            }
        }
    }

    /// Whether this payload counts toward the interaction-frequency metric.
    pub fn is_interactive(&self) -> bool {
        match self {
            Self::Interaction { kind, .. } => INTERACTIVE_EVENT_TYPES.contains(&kind.as_str()),
            Self::TimedActivity { activity, .. } => {
                INTERACTIVE_EVENT_TYPES.contains(&activity.as_str())
            }
            _ => false,
        }
    }
}

/// A recorded engagement event.
#[derive(Debug, Clone)]
pub struct EngagementEvent {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    /// Backfilled by the recompute this event triggered; `None` until then
    /// (and permanently for sweep-only users).
    pub engagement_score: Option<f64>,
}

/// One point of score history, newest first in query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorePoint {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_tags() {
        let click = EventPayload::Interaction {
            kind: "click".into(),
            detail: serde_json::json!({"target": "next-button"}),
        };
        assert_eq!(click.event_type(), "click");

        let step = EventPayload::StepCompletion {
            step_number: 2,
            time_spent_seconds: 45.0,
        };
        assert_eq!(step.event_type(), "step_completion");

        let video = EventPayload::TimedActivity {
            activity: "video_watch".into(),
            duration_seconds: 120.0,
        };
        assert_eq!(video.event_type(), "video_watch");

        let idle = EventPayload::Inactivity {
            inactive_duration_seconds: 600.0,
        };
        assert_eq!(idle.event_type(), "inactivity_detected");
    }

    #[test]
    fn from_stored_reserved_tags_win() {
        // A step_completion carrying a duration_seconds key must still
        // decode as StepCompletion, not TimedActivity.
        let payload = EventPayload::from_stored(
            "step_completion",
            serde_json::json!({"step_number": 3, "time_spent_seconds": 90.0, "duration_seconds": 5.0}),
        );
        assert_eq!(
            payload,
            EventPayload::StepCompletion {
                step_number: 3,
                time_spent_seconds: 90.0
            }
        );

        let payload = EventPayload::from_stored(
            "inactivity_detected",
            serde_json::json!({"inactive_duration_seconds": 420.0}),
        );
        assert_eq!(
            payload,
            EventPayload::Inactivity {
                inactive_duration_seconds: 420.0
            }
        );
    }

    #[test]
    fn from_stored_duration_key_beats_interactive_tag() {
        let payload = EventPayload::from_stored(
            "scroll",
            serde_json::json!({"duration_seconds": 30.0}),
        );
        assert_eq!(
            payload,
            EventPayload::TimedActivity {
                activity: "scroll".into(),
                duration_seconds: 30.0
            }
        );
        // Still interactive: the tag is what counts for frequency.
        assert!(payload.is_interactive());
    }

    #[test]
    fn from_stored_interactive_tag() {
        let payload =
            EventPayload::from_stored("button_click", serde_json::json!({"button": "skip"}));
        assert!(matches!(payload, EventPayload::Interaction { .. }));
        assert!(payload.is_interactive());
    }

    #[test]
    fn from_stored_unknown_is_opaque() {
        let payload =
            EventPayload::from_stored("page_view", serde_json::json!({"path": "/setup"}));
        assert_eq!(
            payload,
            EventPayload::Opaque {
                event_type: "page_view".into(),
                data: serde_json::json!({"path": "/setup"}),
            }
        );
        assert!(!payload.is_interactive());
    }

    #[test]
    fn from_stored_handles_missing_fields() {
        let payload = EventPayload::from_stored("step_completion", serde_json::json!({}));
        assert_eq!(
            payload,
            EventPayload::StepCompletion {
                step_number: 0,
                time_spent_seconds: 0.0
            }
        );
    }

    #[test]
    fn storage_pair_roundtrip() {
        let original = EventPayload::TimedActivity {
            activity: "form_filling".into(),
            duration_seconds: 75.5,
        };
        let decoded =
            EventPayload::from_stored(original.event_type(), original.data());
        assert_eq!(decoded, original);
    }

    #[test]
    fn custom_interaction_kind_is_not_interactive() {
        let payload = EventPayload::Interaction {
            kind: "hover".into(),
            detail: Value::Null,
        };
        assert!(!payload.is_interactive());
    }
}
