use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{ClientEvent, EventStream};

/// How an alert should be rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    #[default]
    Error,
    Warning,
    Success,
}

/// A transient message for the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub message: String,
    pub severity: AlertSeverity,
    pub issued_at: DateTime<Utc>,
}

/// Queue of visible alerts. Each alert removes itself after the configured
/// time to live.
#[derive(Clone)]
pub struct AlertQueue {
    alerts: Arc<RwLock<Vec<Alert>>>,
    ttl: Duration,
    events: EventStream<ClientEvent>,
}

impl AlertQueue {
    pub fn new(ttl: Duration, events: EventStream<ClientEvent>) -> Self {
        Self {
            alerts: Arc::new(RwLock::new(Vec::new())),
            ttl,
            events,
        }
    }

    /// Show `message` until the time to live elapses
    pub async fn issue_alert(&self, message: impl Into<String>, severity: AlertSeverity) -> Alert {
        let alert = Alert {
            id: Uuid::new_v4(),
            message: message.into(),
            severity,
            issued_at: Utc::now(),
        };
        info!(id = %alert.id, severity = ?severity, message = %alert.message, "Alert issued");

        self.alerts.write().await.push(alert.clone());
        self.events
            .publish(ClientEvent::AlertIssued {
                alert: alert.clone(),
            })
            .await;

        let alerts = Arc::clone(&self.alerts);
        let events = self.events.clone();
        let ttl = self.ttl;
        let id = alert.id;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            alerts.write().await.retain(|a| a.id != id);
            debug!(%id, "Alert expired");
            events.publish(ClientEvent::AlertExpired { id }).await;
        });

        alert
    }

    pub async fn error(&self, message: impl Into<String>) -> Alert {
        self.issue_alert(message, AlertSeverity::Error).await
    }

    pub async fn success(&self, message: impl Into<String>) -> Alert {
        self.issue_alert(message, AlertSeverity::Success).await
    }

    /// Alerts currently visible, oldest first
    pub async fn active(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }
}
