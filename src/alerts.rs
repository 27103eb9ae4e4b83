//! Operator alerting for engine health problems.
//!
//! Scoring degrades silently (a failed computation returns 0.0), so the
//! engine raises an out-of-band alert when failures repeat. `LogAlerter`
//! is the default sink; `WebhookAlerter` POSTs to a JSON receiver.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::AlertError;

/// A structured alert destined for an operator channel.
#[derive(Debug, Clone, Serialize)]
pub struct OpsAlert {
    pub component: String,
    pub message: String,
    pub detail: serde_json::Value,
}

/// A delivery sink for operator alerts.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send(&self, alert: OpsAlert) -> Result<(), AlertError>;
}

/// Writes alerts to the log at error level.
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn send(&self, alert: OpsAlert) -> Result<(), AlertError> {
        error!(
            component = %alert.component,
            detail = %alert.detail,
            "{}",
            alert.message
        );
        Ok(())
    }
}

/// POSTs each alert as a JSON body to a webhook receiver.
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlerter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn send(&self, alert: OpsAlert) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .json(&alert)
            .send()
            .await
            .map_err(|e| AlertError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AlertError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Deliver an alert without blocking the caller. Delivery failures are
/// logged and dropped; alerting must never take the scoring path down
/// with it.
pub fn emit(alerter: Arc<dyn Alerter>, alert: OpsAlert) {
    tokio::spawn(async move {
        let component = alert.component.clone();
        if let Err(e) = alerter.send(alert).await {
            warn!(component = %component, error = %e, "Failed to deliver ops alert");
        }
    });
}
