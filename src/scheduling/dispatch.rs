//! Alert delivery — turns a due reminder into a presented alert.
//!
//! Delivery is fire-and-forget with respect to the timer: the scheduler
//! spawns the dispatch and never blocks a slot on the user. The host UI
//! implements `AlertChannel`; its three response actions come back through
//! the engine as snooze or a terminal outcome.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::clock::Clock;
use super::reminder::ScheduledReminder;
use crate::config::CoreConfig;
use crate::models::{Medicine, Notification, NotificationKind};
use crate::store::RecordStore;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Alert channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Delivery gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Everything the presentation layer needs to show the alert modal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub medicine_id: Uuid,
    pub name: String,
    pub dosage: String,
    pub instructions: Option<String>,
    pub stock: u32,
    pub voice_note_url: Option<String>,
    pub due_at: DateTime<Utc>,
    pub snooze_count: u32,
}

/// Delivery transport implemented by the host (in-app modal, system
/// notification, push relay). Must not block on the user's response.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn deliver(&self, alert: &AlertPayload) -> Result<(), DeliveryError>;
}

pub struct NotificationDispatcher {
    channel: Arc<dyn AlertChannel>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    retry_delay: std::time::Duration,
}

impl NotificationDispatcher {
    pub fn new(
        channel: Arc<dyn AlertChannel>,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            channel,
            store,
            clock,
            max_attempts: config.delivery_max_attempts.max(1),
            retry_delay: config.delivery_retry_delay,
        }
    }

    pub fn payload(medicine: &Medicine, reminder: &ScheduledReminder) -> AlertPayload {
        AlertPayload {
            medicine_id: medicine.id,
            name: medicine.name.clone(),
            dosage: medicine.dosage.clone(),
            instructions: medicine.instructions.clone(),
            stock: medicine.stock,
            voice_note_url: medicine.voice_note_url.clone(),
            due_at: reminder.scheduled_for,
            snooze_count: reminder.snooze_count,
        }
    }

    /// Record the in-app badge entry, then deliver with bounded retry.
    /// Errors only after every attempt failed; the scheduler then resolves
    /// the cycle as missed instead of leaving it pending forever.
    pub async fn dispatch(
        &self,
        medicine: &Medicine,
        reminder: &ScheduledReminder,
    ) -> Result<(), DeliveryError> {
        let badge = Notification::new(
            medicine.patient_id,
            NotificationKind::DoseReminder,
            format!("Time for {}", medicine.name),
            medicine
                .instructions
                .clone()
                .unwrap_or_else(|| format!("Don't forget to take your {}", medicine.name)),
            Some(medicine.id),
            self.clock.now(),
        );
        // The badge row is advisory; a failed insert must not stop the alert.
        if let Err(e) = self.store.create_notification(&badge).await {
            tracing::warn!(medicine_id = %medicine.id, error = %e, "Badge notification write failed");
        }

        let payload = Self::payload(medicine, reminder);
        for attempt in 1..=self.max_attempts {
            match self.channel.deliver(&payload).await {
                Ok(()) => {
                    tracing::debug!(medicine_id = %medicine.id, attempt, "Alert delivered");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        medicine_id = %medicine.id,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Alert delivery failed"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(DeliveryError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}
