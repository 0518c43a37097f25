// libs/slot-cell/src/services/notification.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::Slot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "contact", rename_all = "snake_case")]
pub enum Recipient {
    Client(Uuid),
    Practitioner(Uuid),
    Beneficiary(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Confirmation,
    Cancellation,
    Suspension,
    Reactivation,
    Reminder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub template: TemplateKind,
    pub slot: Slot,
}

impl Notification {
    pub fn new(recipient: Recipient, template: TemplateKind, slot: &Slot) -> Self {
        Self {
            recipient,
            template,
            slot: slot.clone(),
        }
    }

    /// Client, beneficiary (if any) and practitioner of a booked slot.
    pub fn for_parties(template: TemplateKind, slot: &Slot) -> Vec<Self> {
        let mut notices = Vec::new();
        if let Some(client_id) = slot.client_id {
            notices.push(Self::new(Recipient::Client(client_id), template, slot));
        }
        if let Some(email) = &slot.beneficiary_email {
            notices.push(Self::new(Recipient::Beneficiary(email.clone()), template, slot));
        }
        notices.push(Self::new(Recipient::Practitioner(slot.practitioner_id), template, slot));
        notices
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotificationError {
    #[error("notification delivery failed transiently: {0}")]
    Transient(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Writes notices to the log; used when no delivery endpoint is configured.
pub struct TracingNotifier;

#[async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            recipient = ?notification.recipient,
            template = ?notification.template,
            slot_id = %notification.slot.id,
            "Notification dispatched"
        );
        Ok(())
    }
}

/// Posts each notice as JSON to a delivery endpoint (e.g. an edge function).
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotificationError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(NotificationError::Transient(format!("endpoint returned {}", status)));
        }
        if !status.is_success() {
            return Err(NotificationError::Rejected(format!("endpoint returned {}", status)));
        }

        debug!("Webhook accepted {:?} for slot {}", notification.template, notification.slot.id);
        Ok(())
    }
}

/// Fire-and-forget delivery: each notice runs on its own task, bounded and
/// retried once, and never fails or delays the caller.
#[derive(Clone)]
pub struct NotificationService {
    dispatcher: Arc<dyn NotificationDispatcher>,
    timeout: Duration,
    in_flight: Arc<Mutex<JoinSet<bool>>>,
}

impl NotificationService {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            timeout,
            in_flight: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Hands the notice to a background task and returns immediately.
    pub async fn dispatch(&self, notification: Notification) {
        let dispatcher = self.dispatcher.clone();
        let timeout = self.timeout;

        let mut in_flight = self.in_flight.lock().await;
        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                error!("Notification task failed: {}", e);
            }
        }
        in_flight.spawn(async move { deliver(dispatcher.as_ref(), timeout, notification).await });
    }

    /// Dispatches every notice and returns how many were handed off.
    pub async fn dispatch_all(&self, notifications: Vec<Notification>) -> usize {
        let count = notifications.len();
        for notification in notifications {
            self.dispatch(notification).await;
        }
        count
    }

    /// Waits for every notice dispatched so far to finish.
    pub async fn settled(&self) {
        let mut pending = std::mem::take(&mut *self.in_flight.lock().await);
        if !pending.is_empty() {
            debug!("Waiting for {} notification tasks", pending.len());
        }
        while let Some(finished) = pending.join_next().await {
            if let Err(e) = finished {
                error!("Notification task failed: {}", e);
            }
        }
    }
}

/// Returns whether the notice was delivered.
async fn deliver(dispatcher: &dyn NotificationDispatcher, timeout: Duration, notification: Notification) -> bool {
    for attempt in 1..=2 {
        let outcome = tokio::time::timeout(timeout, dispatcher.dispatch(&notification)).await;

        match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(NotificationError::Rejected(e))) => {
                warn!("Notification {:?} for slot {} rejected: {}",
                      notification.template, notification.slot.id, e);
                return false;
            }
            Ok(Err(NotificationError::Transient(e))) => {
                warn!("Notification attempt {} for slot {} failed: {}",
                      attempt, notification.slot.id, e);
            }
            Err(_) => {
                warn!("Notification attempt {} for slot {} timed out after {:?}",
                      attempt, notification.slot.id, timeout);
            }
        }
    }
    false
}
