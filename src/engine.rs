//! Application facade over the store and the scheduler.
//!
//! The host (UI layer, command handlers) talks to [`ReminderEngine`] only;
//! it owns the store handle, the scheduler, and the clock, and enforces the
//! ordering rules the lower layers rely on, such as cancelling timers before
//! a medicine is deactivated.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::models::{
    enums::Frequency, DoseAction, Medicine, MedicineStatus, Notification, NotificationKind,
    UserRole,
};
use crate::scheduling::adherence::{self, AdherenceSummary};
use crate::scheduling::clock::{Clock, SystemClock};
use crate::scheduling::dispatch::{AlertChannel, NotificationDispatcher};
use crate::scheduling::dose;
use crate::scheduling::error::ScheduleError;
use crate::scheduling::scheduler::{ReminderScheduler, UpcomingDose};
use crate::store::RecordStore;

/// Input for registering a medicine. `time_of_day` is the wall-clock string
/// the caregiver entered (`HH:MM` or `HH:MM:SS`).
#[derive(Debug, Clone)]
pub struct NewMedicine {
    pub name: String,
    pub dosage: String,
    pub time_of_day: String,
    pub frequency: Frequency,
    pub instructions: Option<String>,
    pub stock: u32,
    pub low_stock_threshold: Option<u32>,
    pub patient_id: Uuid,
    pub caregiver_id: Uuid,
    pub voice_note_url: Option<String>,
}

pub struct ReminderEngine {
    store: Arc<dyn RecordStore>,
    scheduler: ReminderScheduler,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl ReminderEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        channel: Arc<dyn AlertChannel>,
        config: CoreConfig,
    ) -> Self {
        Self::with_clock(store, channel, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn RecordStore>,
        channel: Arc<dyn AlertChannel>,
        config: CoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher =
            NotificationDispatcher::new(channel, store.clone(), clock.clone(), &config);
        let scheduler = ReminderScheduler::new(store.clone(), dispatcher, clock.clone());
        Self {
            store,
            scheduler,
            clock,
            config,
        }
    }

    /// Arm reminders for every active medicine of the patient. Called once
    /// at startup and again after a sync brings in remote changes.
    pub async fn start(&self, patient_id: Uuid) -> Result<(), ScheduleError> {
        let medicines = self
            .store
            .list_active_medicines(patient_id, UserRole::Patient)
            .await?;
        tracing::info!(patient_id = %patient_id, count = medicines.len(), "Scheduling active medicines");
        for medicine in medicines {
            self.scheduler.schedule(medicine.id).await?;
        }
        Ok(())
    }

    /// Register a medicine, notify the patient, and arm its first reminder.
    pub async fn add_medicine(&self, input: NewMedicine) -> Result<Medicine, ScheduleError> {
        if input.name.trim().is_empty() {
            return Err(ScheduleError::InvalidSchedule(
                "medicine name is required".into(),
            ));
        }
        if input.dosage.trim().is_empty() {
            return Err(ScheduleError::InvalidSchedule("dosage is required".into()));
        }
        let time_of_day = dose::parse_time_of_day(&input.time_of_day)?;
        dose::validate_frequency(input.frequency)?;

        let medicine = Medicine {
            id: Uuid::new_v4(),
            name: input.name,
            dosage: input.dosage,
            time_of_day,
            frequency: input.frequency,
            instructions: input.instructions,
            stock: input.stock,
            low_stock_threshold: input
                .low_stock_threshold
                .unwrap_or(self.config.default_low_stock_threshold),
            status: MedicineStatus::Active,
            patient_id: input.patient_id,
            caregiver_id: input.caregiver_id,
            voice_note_url: input.voice_note_url,
            last_taken_at: None,
        };
        self.store.insert_medicine(&medicine).await?;
        tracing::info!(medicine_id = %medicine.id, name = %medicine.name, "Medicine added");

        let added = Notification::new(
            medicine.patient_id,
            NotificationKind::MedicineAdded,
            "New Medicine",
            format!(
                "{} has been added to your schedule at {}",
                medicine.name,
                medicine.time_of_day.format("%H:%M")
            ),
            Some(medicine.id),
            self.clock.now(),
        );
        if let Err(e) = self.store.create_notification(&added).await {
            tracing::warn!(medicine_id = %medicine.id, error = %e, "Added-medicine notification write failed");
        }

        self.scheduler.schedule(medicine.id).await?;
        Ok(medicine)
    }

    /// Change the dose time and/or frequency. The pending reminder is
    /// superseded and the next due time recomputed from the new schedule.
    pub async fn update_schedule(
        &self,
        medicine_id: Uuid,
        time_of_day: &str,
        frequency: Frequency,
    ) -> Result<Medicine, ScheduleError> {
        let parsed = dose::parse_time_of_day(time_of_day)?;
        dose::validate_frequency(frequency)?;

        let mut medicine = self.store.get_medicine(medicine_id).await?;
        medicine.time_of_day = parsed;
        medicine.frequency = frequency;
        self.store.update_medicine(&medicine).await?;
        self.scheduler.schedule(medicine_id).await?;
        tracing::info!(medicine_id = %medicine_id, time = %parsed, "Schedule updated");
        Ok(medicine)
    }

    /// Set the stock counter to a freshly counted total. Re-arms the
    /// low-stock trigger once the count climbs back above the threshold.
    pub async fn restock(&self, medicine_id: Uuid, new_stock: u32) -> Result<Medicine, ScheduleError> {
        self.store.get_medicine(medicine_id).await?;
        self.store
            .update_medicine_stock(medicine_id, new_stock, None)
            .await?;
        tracing::info!(medicine_id = %medicine_id, stock = new_stock, "Medicine restocked");
        self.store.get_medicine(medicine_id).await.map_err(Into::into)
    }

    /// Stop reminding without deleting history. The timer is torn down
    /// before the status flips so no alert can slip out in between.
    pub async fn deactivate(&self, medicine_id: Uuid) -> Result<(), ScheduleError> {
        self.scheduler.cancel(medicine_id).await;
        self.store
            .set_medicine_status(medicine_id, MedicineStatus::Inactive)
            .await?;
        tracing::info!(medicine_id = %medicine_id, "Medicine deactivated");
        Ok(())
    }

    /// Record the patient's response to the current alert.
    pub async fn submit_outcome(
        &self,
        medicine_id: Uuid,
        action: DoseAction,
        note: Option<String>,
    ) -> Result<(), ScheduleError> {
        self.scheduler.resolve(medicine_id, action, note).await
    }

    /// Defer the current alert by the configured snooze duration.
    pub async fn snooze(&self, medicine_id: Uuid) -> Result<DateTime<Utc>, ScheduleError> {
        self.scheduler
            .snooze(medicine_id, self.config.snooze_duration)
            .await
    }

    /// Live due times for the patient's medicines, soonest first.
    pub async fn upcoming(&self, patient_id: Uuid) -> Result<Vec<UpcomingDose>, ScheduleError> {
        let ids: HashSet<Uuid> = self
            .store
            .list_active_medicines(patient_id, UserRole::Patient)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();
        Ok(self
            .scheduler
            .upcoming()
            .await
            .into_iter()
            .filter(|u| ids.contains(&u.medicine_id))
            .collect())
    }

    /// Adherence over the configured trailing window.
    pub async fn adherence(&self, patient_id: Uuid) -> Result<AdherenceSummary, ScheduleError> {
        adherence::for_patient(
            self.store.as_ref(),
            patient_id,
            self.config.adherence_window_days,
            self.clock.now(),
        )
        .await
    }

    pub async fn unread_notifications(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Notification>, ScheduleError> {
        Ok(self.store.unread_notifications(user_id).await?)
    }

    pub async fn mark_notification_read(&self, id: Uuid) -> Result<(), ScheduleError> {
        Ok(self.store.mark_notification_read(id).await?)
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
