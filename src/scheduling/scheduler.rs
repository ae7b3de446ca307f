//! Reminder scheduler — owns every pending timer and the dose-cycle state
//! machine behind it.
//!
//! One slot per medicine id, held in a concurrent map; the slot's async mutex
//! is the per-medicine exclusive section, so operations on the same medicine
//! never interleave while different medicines proceed in parallel. There is
//! no global lock. Timers are spawned sleep tasks stamped with the slot's
//! generation; cancellation bumps the generation, and a fire that lost that
//! race is dropped when the stamp no longer matches.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::clock::Clock;
use super::dispatch::NotificationDispatcher;
use super::dose;
use super::error::ScheduleError;
use super::reminder::ScheduledReminder;
use super::stock;
use crate::models::{DoseAction, DoseEvent, Medicine, Notification, NotificationKind};
use crate::store::RecordStore;

/// A live due time, for upcoming-dose views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UpcomingDose {
    pub medicine_id: Uuid,
    pub due_at: DateTime<Utc>,
}

/// Step ledger for an in-flight resolution. Kept on the slot when a
/// persistence write fails so a caller retry resumes where it stopped
/// instead of double-decrementing stock or double-logging.
struct ResolutionProgress {
    outcome: DoseAction,
    note: Option<String>,
    stock_written: bool,
    stock_after: Option<u32>,
    event_id: Option<Uuid>,
}

impl ResolutionProgress {
    fn new(outcome: DoseAction, note: Option<String>) -> Self {
        Self {
            outcome,
            note,
            stock_written: false,
            stock_after: None,
            event_id: None,
        }
    }

    fn partially_applied(&self) -> bool {
        self.stock_written || self.event_id.is_some()
    }
}

#[derive(Default)]
struct Slot {
    reminder: Option<ScheduledReminder>,
    /// Bumped on every new cycle and on cancel; the stale-stamp check.
    generation: u64,
    fire_timer: Option<AbortHandle>,
    /// Armed at fire time for the next cycle's due instant: a cycle still
    /// unresolved by then auto-resolves as missed.
    watchdog: Option<AbortHandle>,
    resolution: Option<ResolutionProgress>,
    last_resolved: Option<(u64, DoseAction)>,
}

impl Slot {
    fn disarm(&mut self) {
        if let Some(timer) = self.fire_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.watchdog.take() {
            timer.abort();
        }
    }
}

struct Inner {
    store: Arc<dyn RecordStore>,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    slots: DashMap<Uuid, Arc<Mutex<Slot>>>,
}

#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        dispatcher: NotificationDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                dispatcher,
                clock,
                slots: DashMap::new(),
            }),
        }
    }

    /// Cancel any existing reminder for the medicine and arm the next cycle.
    /// A fired cycle left unresolved past its own deadline resolves as
    /// missed first; one left unresolved but not yet overdue is superseded
    /// (cancelled) — an edit should not count as a miss.
    pub async fn schedule(&self, medicine_id: Uuid) -> Result<(), ScheduleError> {
        let slot_arc = self.slot(medicine_id);
        let mut slot = slot_arc.lock().await;

        let medicine = self.inner.store.get_medicine(medicine_id).await?;
        dose::validate_frequency(medicine.frequency)?;

        if let Some(reminder) = slot.reminder.clone() {
            if reminder.awaiting_outcome() {
                let deadline = dose::next_due(
                    medicine.time_of_day,
                    medicine.frequency,
                    reminder.scheduled_for + chrono::Duration::seconds(1),
                );
                if self.inner.clock.now() >= deadline {
                    self.apply_outcome(&mut slot, &medicine, DoseAction::Missed, None)
                        .await?;
                }
            }
        }

        slot.disarm();
        if let Some(reminder) = slot.reminder.as_mut() {
            reminder.cancel();
        }
        slot.reminder = None;

        if !medicine.is_active() {
            slot.generation += 1;
            return Ok(());
        }

        self.arm_next(&mut slot, &medicine);
        Ok(())
    }

    /// Invalidate any pending timer for the medicine. Idempotent.
    pub async fn cancel(&self, medicine_id: Uuid) {
        let slot_arc = self.slot(medicine_id);
        let mut slot = slot_arc.lock().await;
        slot.disarm();
        if let Some(reminder) = slot.reminder.as_mut() {
            reminder.cancel();
        }
        slot.reminder = None;
        slot.resolution = None;
        // stale-stamp any fire that already left the gate
        slot.generation += 1;
        tracing::debug!(medicine_id = %medicine_id, "Reminder cancelled");
    }

    /// Defer an alerted cycle by `delay`. The stale timer is cancelled before
    /// the replacement is armed, so back-to-back snoozes leave exactly one
    /// timer. No maximum snooze count is enforced here.
    pub async fn snooze(
        &self,
        medicine_id: Uuid,
        delay: std::time::Duration,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let slot_arc = self.slot(medicine_id);
        let mut slot = slot_arc.lock().await;

        let delay = chrono::Duration::from_std(delay)
            .map_err(|_| ScheduleError::InvalidSchedule("snooze delay out of range".into()))?;
        let fire_at = self.inner.clock.now() + delay;
        let generation = slot.generation;

        let reminder = slot
            .reminder
            .as_mut()
            .ok_or(ScheduleError::NoActiveCycle(medicine_id))?;
        reminder.snooze(fire_at)?;
        let snooze_count = reminder.snooze_count;

        if let Some(timer) = slot.fire_timer.take() {
            timer.abort();
        }
        slot.fire_timer = Some(self.arm_fire_timer(medicine_id, fire_at, generation));
        tracing::info!(
            medicine_id = %medicine_id,
            fire_at = %fire_at,
            snooze_count,
            "Reminder snoozed"
        );
        Ok(fire_at)
    }

    /// Record the cycle's outcome, emit the dose event, and arm the next
    /// cycle. Safe to retry: an already-applied outcome is a no-op, and a
    /// partial failure resumes from the recorded step.
    pub async fn resolve(
        &self,
        medicine_id: Uuid,
        outcome: DoseAction,
        note: Option<String>,
    ) -> Result<(), ScheduleError> {
        self.resolve_with(medicine_id, outcome, note, None).await
    }

    /// Live (pending or snoozed) due times across all medicines.
    pub async fn upcoming(&self) -> Vec<UpcomingDose> {
        let slots: Vec<(Uuid, Arc<Mutex<Slot>>)> = self
            .inner
            .slots
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut out = Vec::new();
        for (medicine_id, slot_arc) in slots {
            let slot = slot_arc.lock().await;
            if let Some(reminder) = &slot.reminder {
                if reminder.is_live() {
                    out.push(UpcomingDose {
                        medicine_id,
                        due_at: reminder.fire_at,
                    });
                }
            }
        }
        out.sort_by_key(|u| u.due_at);
        out
    }

    /// Snapshot of the medicine's current reminder, if any.
    pub async fn current(&self, medicine_id: Uuid) -> Option<ScheduledReminder> {
        let slot_arc = self.slot(medicine_id);
        let slot = slot_arc.lock().await;
        slot.reminder.clone()
    }

    /// Abort every armed timer. Pending cycles are lost, not resolved.
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<Mutex<Slot>>> = self
            .inner
            .slots
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for slot_arc in slots {
            slot_arc.lock().await.disarm();
        }
        tracing::info!("Reminder scheduler shut down");
    }

    fn slot(&self, medicine_id: Uuid) -> Arc<Mutex<Slot>> {
        self.inner
            .slots
            .entry(medicine_id)
            .or_default()
            .clone()
    }

    fn delay_until(&self, at: DateTime<Utc>) -> std::time::Duration {
        (at - self.inner.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    fn arm_fire_timer(
        &self,
        medicine_id: Uuid,
        at: DateTime<Utc>,
        generation: u64,
    ) -> AbortHandle {
        let scheduler = self.clone();
        let delay = self.delay_until(at);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.handle_fire(medicine_id, generation).await;
        })
        .abort_handle()
    }

    fn arm_watchdog(&self, medicine_id: Uuid, at: DateTime<Utc>, generation: u64) -> AbortHandle {
        let scheduler = self.clone();
        let delay = self.delay_until(at);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.handle_deadline(medicine_id, generation).await;
        })
        .abort_handle()
    }

    /// Arm the next cycle. Caller holds the slot lock and has already
    /// resolved or cancelled the previous reminder.
    fn arm_next(&self, slot: &mut Slot, medicine: &Medicine) {
        slot.disarm();
        if slot.reminder.as_ref().is_some_and(|r| r.is_live()) {
            // one live reminder per medicine; reaching this is a logic bug
            tracing::warn!(medicine_id = %medicine.id, "Superseding an unexpectedly live reminder");
        }
        let due = dose::next_due(
            medicine.time_of_day,
            medicine.frequency,
            self.inner.clock.now(),
        );
        slot.generation += 1;
        slot.reminder = Some(ScheduledReminder::pending(medicine.id, due, slot.generation));
        slot.fire_timer = Some(self.arm_fire_timer(medicine.id, due, slot.generation));
        tracing::debug!(
            medicine_id = %medicine.id,
            due = %due,
            generation = slot.generation,
            "Reminder armed"
        );
    }

    /// Timer callback. The generation stamp drops fires that raced a cancel
    /// or a reschedule; a deactivation that raced the timer drops the fire
    /// silently — no alert, no log entry.
    async fn handle_fire(&self, medicine_id: Uuid, generation: u64) {
        let slot_arc = self.slot(medicine_id);
        let mut slot = slot_arc.lock().await;

        if slot.generation != generation
            || !slot.reminder.as_ref().is_some_and(|r| r.is_live())
        {
            tracing::debug!(medicine_id = %medicine_id, generation, "Stale timer fire dropped");
            return;
        }

        let medicine = match self.inner.store.get_medicine(medicine_id).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(medicine_id = %medicine_id, error = %e, "Fire aborted: medicine unavailable");
                return;
            }
        };
        if !medicine.is_active() {
            slot.disarm();
            slot.reminder = None;
            tracing::debug!(medicine_id = %medicine_id, "Fire for deactivated medicine dropped");
            return;
        }

        let fired = {
            let Some(reminder) = slot.reminder.as_mut() else {
                return;
            };
            if reminder.fire().is_err() {
                return;
            }
            reminder.clone()
        };
        slot.fire_timer = None;

        let deadline = dose::next_due(
            medicine.time_of_day,
            medicine.frequency,
            fired.scheduled_for + chrono::Duration::seconds(1),
        );
        slot.watchdog = Some(self.arm_watchdog(medicine_id, deadline, generation));
        drop(slot);

        tracing::info!(medicine_id = %medicine_id, due = %fired.scheduled_for, "Reminder fired");

        // Delivery never holds the slot lock and never blocks the timer path.
        let scheduler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.inner.dispatcher.dispatch(&medicine, &fired).await {
                tracing::warn!(
                    medicine_id = %medicine_id,
                    error = %e,
                    "Delivery exhausted; resolving cycle as missed"
                );
                if let Err(e) = scheduler
                    .resolve_with(medicine_id, DoseAction::Missed, None, Some(generation))
                    .await
                {
                    tracing::debug!(medicine_id = %medicine_id, error = %e, "Missed fallback not applied");
                }
            }
        });
    }

    /// Watchdog callback: a cycle unresolved at the next cycle's due instant
    /// is missed, exactly once.
    async fn handle_deadline(&self, medicine_id: Uuid, generation: u64) {
        if let Err(e) = self
            .resolve_with(medicine_id, DoseAction::Missed, None, Some(generation))
            .await
        {
            tracing::debug!(medicine_id = %medicine_id, error = %e, "Watchdog resolution not applied");
        }
    }

    async fn resolve_with(
        &self,
        medicine_id: Uuid,
        outcome: DoseAction,
        note: Option<String>,
        expected_generation: Option<u64>,
    ) -> Result<(), ScheduleError> {
        let slot_arc = self.slot(medicine_id);
        let mut slot = slot_arc.lock().await;

        if let Some(expected) = expected_generation {
            if slot.generation != expected {
                tracing::debug!(
                    medicine_id = %medicine_id,
                    expected,
                    current = slot.generation,
                    "Stale internal resolution dropped"
                );
                return Ok(());
            }
        }

        let awaiting = slot.reminder.as_ref().is_some_and(|r| r.awaiting_outcome());
        if !awaiting {
            match slot.last_resolved {
                Some((_, previous)) if previous == outcome => {
                    // retried submit of an already-applied outcome
                    tracing::debug!(
                        medicine_id = %medicine_id,
                        outcome = outcome.as_str(),
                        "Duplicate outcome ignored"
                    );
                    return Ok(());
                }
                Some(_) => {
                    tracing::warn!(
                        medicine_id = %medicine_id,
                        outcome = outcome.as_str(),
                        "Outcome for a superseded cycle not applied"
                    );
                    return Err(ScheduleError::StaleResolution {
                        medicine_id,
                        outcome,
                    });
                }
                None => return Err(ScheduleError::NoActiveCycle(medicine_id)),
            }
        }

        let medicine = self.inner.store.get_medicine(medicine_id).await?;
        self.apply_outcome(&mut slot, &medicine, outcome, note).await?;
        if medicine.is_active() {
            self.arm_next(&mut slot, &medicine);
        }
        Ok(())
    }

    /// Persist the outcome for the slot's current cycle. On success the
    /// reminder is consumed; on a persistence failure the step ledger stays
    /// on the slot (once anything was written) so a retry resumes.
    async fn apply_outcome(
        &self,
        slot: &mut Slot,
        medicine: &Medicine,
        outcome: DoseAction,
        note: Option<String>,
    ) -> Result<(), ScheduleError> {
        let Some(reminder) = slot.reminder.clone() else {
            return Err(ScheduleError::NoActiveCycle(medicine.id));
        };

        let mut progress = match slot.resolution.take() {
            Some(p) if p.outcome != outcome => {
                tracing::warn!(
                    medicine_id = %medicine.id,
                    in_flight = p.outcome.as_str(),
                    submitted = outcome.as_str(),
                    "Conflicting outcome for a partially resolved cycle"
                );
                slot.resolution = Some(p);
                return Err(ScheduleError::StaleResolution {
                    medicine_id: medicine.id,
                    outcome,
                });
            }
            Some(p) => p,
            None => ResolutionProgress::new(outcome, note),
        };

        match self.run_resolution(medicine, &reminder, &mut progress).await {
            Ok(()) => {
                slot.disarm();
                slot.last_resolved = Some((slot.generation, outcome));
                slot.resolution = None;
                slot.reminder = None;
                tracing::info!(
                    medicine_id = %medicine.id,
                    outcome = outcome.as_str(),
                    snoozes = reminder.snooze_count,
                    "Dose cycle resolved"
                );
                Ok(())
            }
            Err(e) => {
                if progress.partially_applied() {
                    slot.resolution = Some(progress);
                }
                Err(e)
            }
        }
    }

    async fn run_resolution(
        &self,
        medicine: &Medicine,
        reminder: &ScheduledReminder,
        progress: &mut ResolutionProgress,
    ) -> Result<(), ScheduleError> {
        let now = self.inner.clock.now();
        let store = &self.inner.store;

        if progress.outcome == DoseAction::Taken && !progress.stock_written {
            let decrement = stock::decrement(medicine)?;
            store
                .update_medicine_stock(medicine.id, decrement.new_stock, Some(now))
                .await?;
            progress.stock_written = true;
            progress.stock_after = Some(decrement.new_stock);

            if decrement.low_stock_triggered {
                tracing::info!(
                    medicine_id = %medicine.id,
                    stock = decrement.new_stock,
                    threshold = medicine.low_stock_threshold,
                    "Low-stock threshold crossed"
                );
                let alert = Notification::new(
                    medicine.caregiver_id,
                    NotificationKind::LowStock,
                    "Low Stock Alert",
                    format!(
                        "{} is running low ({} remaining)",
                        medicine.name, decrement.new_stock
                    ),
                    Some(medicine.id),
                    now,
                );
                // advisory; a failed insert must not fail the resolution
                if let Err(e) = store.create_notification(&alert).await {
                    tracing::warn!(medicine_id = %medicine.id, error = %e, "Low-stock notification write failed");
                }
            }
        }

        if progress.event_id.is_none() {
            let event = DoseEvent {
                id: Uuid::new_v4(),
                medicine_id: medicine.id,
                patient_id: medicine.patient_id,
                action: progress.outcome,
                scheduled_at: reminder.scheduled_for,
                recorded_at: now,
                stock_after: progress.stock_after,
                notes: progress.note.clone(),
            };
            let id = store.append_dose_event(&event).await?;
            progress.event_id = Some(id);
        }

        if progress.outcome == DoseAction::Missed {
            let alert = Notification::new(
                medicine.caregiver_id,
                NotificationKind::MissedDose,
                "Missed Dose",
                format!(
                    "{} was not taken as scheduled at {}",
                    medicine.name,
                    reminder.scheduled_for.format("%H:%M")
                ),
                Some(medicine.id),
                now,
            );
            if let Err(e) = store.create_notification(&alert).await {
                tracing::warn!(medicine_id = %medicine.id, error = %e, "Missed-dose notification write failed");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::models::{enums::Frequency, MedicineStatus};
    use crate::scheduling::clock::ManualClock;
    use crate::scheduling::dispatch::{AlertChannel, AlertPayload, DeliveryError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration as StdDuration;
    use tokio::sync::mpsc;

    struct RecordingChannel {
        tx: mpsc::UnboundedSender<AlertPayload>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        async fn deliver(&self, alert: &AlertPayload) -> Result<(), DeliveryError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeliveryError::ChannelUnavailable("display offline".into()));
            }
            let _ = self.tx.send(alert.clone());
            Ok(())
        }
    }

    struct Harness {
        scheduler: ReminderScheduler,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        channel: Arc<RecordingChannel>,
        alerts: mpsc::UnboundedReceiver<AlertPayload>,
    }

    /// Clock pinned to 2024-01-01 08:00 UTC.
    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
        ));
        let (tx, alerts) = mpsc::unbounded_channel();
        let channel = Arc::new(RecordingChannel {
            tx,
            fail: AtomicBool::new(false),
        });
        let dispatcher = NotificationDispatcher::new(
            channel.clone(),
            store.clone(),
            clock.clone(),
            &CoreConfig::default(),
        );
        let scheduler = ReminderScheduler::new(store.clone(), dispatcher, clock.clone());
        Harness {
            scheduler,
            store,
            clock,
            channel,
            alerts,
        }
    }

    async fn insert_daily_nine_am(store: &MemoryStore, stock: u32, threshold: u32) -> Medicine {
        let med = Medicine {
            id: Uuid::new_v4(),
            name: "Metformin".into(),
            dosage: "500mg".into(),
            time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            frequency: Frequency::Daily,
            instructions: Some("With breakfast".into()),
            stock,
            low_stock_threshold: threshold,
            status: MedicineStatus::Active,
            patient_id: Uuid::new_v4(),
            caregiver_id: Uuid::new_v4(),
            voice_note_url: None,
            last_taken_at: None,
        };
        store.insert_medicine(&med).await.unwrap();
        med
    }

    #[tokio::test(start_paused = true)]
    async fn schedules_and_fires_at_due_time() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 10, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();

        let due = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let reminder = h.scheduler.current(med.id).await.unwrap();
        assert!(reminder.is_live());
        assert_eq!(reminder.fire_at, due);

        let alert = h.alerts.recv().await.unwrap();
        assert_eq!(alert.medicine_id, med.id);
        assert_eq!(alert.due_at, due);
        assert_eq!(alert.name, "Metformin");
        assert_eq!(alert.stock, 10);

        let fired = h.scheduler.current(med.id).await.unwrap();
        assert!(fired.awaiting_outcome());
    }

    #[tokio::test(start_paused = true)]
    async fn taken_decrements_stock_logs_event_and_reschedules() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 10, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();
        h.alerts.recv().await.unwrap();

        let responded_at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 5, 0).unwrap();
        h.clock.set(responded_at);
        h.scheduler
            .resolve(med.id, DoseAction::Taken, None)
            .await
            .unwrap();

        let stored = h.store.get_medicine(med.id).await.unwrap();
        assert_eq!(stored.stock, 9);
        assert_eq!(stored.last_taken_at, Some(responded_at));

        let events = h.store.dose_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, DoseAction::Taken);
        assert_eq!(
            events[0].scheduled_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
        );
        assert_eq!(events[0].stock_after, Some(9));

        let next = h.scheduler.current(med.id).await.unwrap();
        assert!(next.is_live());
        assert_eq!(
            next.fire_at,
            Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn low_stock_alerts_caregiver_once_per_crossing() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 6, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();

        // day 1: 6 -> 5 crosses the threshold
        h.alerts.recv().await.unwrap();
        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 9, 5, 0).unwrap());
        h.scheduler.resolve(med.id, DoseAction::Taken, None).await.unwrap();

        // day 2: 5 -> 4 stays inside the range; no repeat alert
        h.alerts.recv().await.unwrap();
        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 2, 9, 5, 0).unwrap());
        h.scheduler.resolve(med.id, DoseAction::Taken, None).await.unwrap();

        let low_stock: Vec<_> = h
            .store
            .notifications()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::LowStock)
            .collect();
        assert_eq!(low_stock.len(), 1);
        assert_eq!(low_stock[0].user_id, med.caregiver_id);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_stock_surfaces_and_skip_still_resolves() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 0, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();
        h.alerts.recv().await.unwrap();

        let err = h
            .scheduler
            .resolve(med.id, DoseAction::Taken, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::OutOfStock(id) if id == med.id));
        assert_eq!(h.store.get_medicine(med.id).await.unwrap().stock, 0);
        assert!(h.store.dose_events().is_empty());

        // the cycle is still open; skipping resolves it
        h.scheduler
            .resolve(med.id, DoseAction::Skipped, Some("pharmacy closed".into()))
            .await
            .unwrap();
        let events = h.store.dose_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, DoseAction::Skipped);
        assert_eq!(events[0].notes.as_deref(), Some("pharmacy closed"));
        assert!(h.scheduler.current(med.id).await.unwrap().is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn double_snooze_leaves_one_armed_timer() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 10, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();
        h.alerts.recv().await.unwrap();

        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 9, 1, 0).unwrap());
        h.scheduler
            .snooze(med.id, StdDuration::from_secs(600))
            .await
            .unwrap();
        h.scheduler
            .snooze(med.id, StdDuration::from_secs(600))
            .await
            .unwrap();

        let snoozed = h.scheduler.current(med.id).await.unwrap();
        assert_eq!(snoozed.snooze_count, 2);

        // exactly one re-delivery; the first snooze timer was cancelled
        let alert = h.alerts.recv().await.unwrap();
        assert_eq!(alert.medicine_id, med.id);
        assert_eq!(alert.snooze_count, 2);
        assert!(h.alerts.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_cycle_auto_misses_once_then_rearms() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 10, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();
        h.alerts.recv().await.unwrap();

        // no response; the watchdog at the next cycle's due instant resolves
        // the cycle as missed and arms a fresh reminder, which fires next
        h.alerts.recv().await.unwrap();

        let events = h.store.dose_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, DoseAction::Missed);
        assert_eq!(
            events[0].scheduled_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
        );

        let missed_alerts: Vec<_> = h
            .store
            .notifications()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::MissedDose)
            .collect();
        assert_eq!(missed_alerts.len(), 1);
        assert_eq!(missed_alerts[0].user_id, med.caregiver_id);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_prevents_fire() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 10, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();
        h.scheduler.cancel(med.id).await;
        h.scheduler.cancel(med.id).await;

        assert!(h.scheduler.current(med.id).await.is_none());
        tokio::time::sleep(StdDuration::from_secs(3 * 24 * 3600)).await;
        assert!(h.alerts.try_recv().is_err());
        assert!(h.store.dose_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deactivation_racing_the_timer_drops_the_fire_silently() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 10, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();

        // the status flips behind the scheduler's back, as when another
        // device deactivates while this timer is already armed
        h.store
            .set_medicine_status(med.id, MedicineStatus::Inactive)
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_secs(2 * 24 * 3600)).await;
        assert!(h.alerts.try_recv().is_err());
        assert!(h.store.dose_events().is_empty());
        assert!(h.scheduler.current(med.id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_outcome_is_noop_and_conflicting_outcome_is_stale() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 10, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();
        h.alerts.recv().await.unwrap();

        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 9, 5, 0).unwrap());
        h.scheduler.resolve(med.id, DoseAction::Taken, None).await.unwrap();

        // double-tap: same outcome again is absorbed
        h.scheduler.resolve(med.id, DoseAction::Taken, None).await.unwrap();
        assert_eq!(h.store.dose_events().len(), 1);
        assert_eq!(h.store.get_medicine(med.id).await.unwrap().stock, 9);

        // a different outcome for the superseded cycle is refused
        let err = h
            .scheduler
            .resolve(med.id, DoseAction::Skipped, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::StaleResolution { .. }));
        assert_eq!(h.store.dose_events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_retry_resumes_without_double_applying() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 10, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();
        h.alerts.recv().await.unwrap();

        h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 9, 5, 0).unwrap());
        h.store.fail_next_event_append();
        assert!(h
            .scheduler
            .resolve(med.id, DoseAction::Taken, None)
            .await
            .is_err());
        // stock write landed before the append failed
        assert_eq!(h.store.get_medicine(med.id).await.unwrap().stock, 9);
        assert!(h.store.dose_events().is_empty());

        h.scheduler.resolve(med.id, DoseAction::Taken, None).await.unwrap();
        assert_eq!(h.store.get_medicine(med.id).await.unwrap().stock, 9);
        let events = h.store.dose_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stock_after, Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_exhaustion_resolves_missed() {
        let h = harness();
        let med = insert_daily_nine_am(&h.store, 10, 5).await;
        h.channel.fail.store(true, Ordering::SeqCst);
        h.scheduler.schedule(med.id).await.unwrap();

        // past the due time plus all retry delays, well short of the next cycle
        tokio::time::sleep(StdDuration::from_secs(3700)).await;

        let events = h.store.dose_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, DoseAction::Missed);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_supersedes_pending_reminder() {
        let mut h = harness();
        let med = insert_daily_nine_am(&h.store, 10, 5).await;
        h.scheduler.schedule(med.id).await.unwrap();

        // edit to 11:00 before the 09:00 fire
        let mut edited = med.clone();
        edited.time_of_day = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        h.store.update_medicine(&edited).await.unwrap();
        h.scheduler.schedule(med.id).await.unwrap();

        let reminder = h.scheduler.current(med.id).await.unwrap();
        assert_eq!(
            reminder.fire_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap()
        );

        let alert = h.alerts.recv().await.unwrap();
        assert_eq!(
            alert.due_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap()
        );
        assert!(h.alerts.try_recv().is_err(), "old timer must not fire");
        assert!(h.store.dose_events().is_empty(), "an edit is not a miss");
    }

    #[tokio::test(start_paused = true)]
    async fn upcoming_lists_live_reminders_in_due_order() {
        let h = harness();
        let morning = insert_daily_nine_am(&h.store, 10, 5).await;
        let mut evening = insert_daily_nine_am(&h.store, 10, 5).await;
        evening.id = Uuid::new_v4();
        evening.time_of_day = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        h.store.insert_medicine(&evening).await.unwrap();

        h.scheduler.schedule(morning.id).await.unwrap();
        h.scheduler.schedule(evening.id).await.unwrap();

        let upcoming = h.scheduler.upcoming().await;
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].medicine_id, morning.id);
        assert_eq!(upcoming[1].medicine_id, evening.id);
        assert!(upcoming[0].due_at < upcoming[1].due_at);

        h.scheduler.shutdown().await;
    }
}
