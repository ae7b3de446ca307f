//! Per-cycle reminder record and its state machine.
//!
//! Transitions: PENDING → FIRED → resolved (terminal, dose event emitted),
//! PENDING → CANCELLED, FIRED → SNOOZED → FIRED (loop), SNOOZED → CANCELLED.
//! The scheduler owns these records exclusively; nothing else mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ScheduleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderState {
    Pending,
    Fired,
    Snoozed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledReminder {
    pub medicine_id: Uuid,
    /// Instant the armed timer will fire; moves forward on snooze.
    pub fire_at: DateTime<Utc>,
    /// The cycle's due instant; stable across snoozes and recorded into the
    /// dose event.
    pub scheduled_for: DateTime<Utc>,
    pub state: ReminderState,
    pub snooze_count: u32,
    /// Cancellation stamp: a timer whose generation no longer matches the
    /// slot's is stale and its fire is dropped.
    pub generation: u64,
}

impl ScheduledReminder {
    pub fn pending(medicine_id: Uuid, due_at: DateTime<Utc>, generation: u64) -> Self {
        Self {
            medicine_id,
            fire_at: due_at,
            scheduled_for: due_at,
            state: ReminderState::Pending,
            snooze_count: 0,
            generation,
        }
    }

    /// True while a timer is armed for this reminder.
    pub fn is_live(&self) -> bool {
        matches!(self.state, ReminderState::Pending | ReminderState::Snoozed)
    }

    /// True once the alert went out but no outcome has been recorded.
    pub fn awaiting_outcome(&self) -> bool {
        matches!(self.state, ReminderState::Fired | ReminderState::Snoozed)
    }

    pub fn fire(&mut self) -> Result<(), ScheduleError> {
        if !self.is_live() {
            return Err(ScheduleError::NoActiveCycle(self.medicine_id));
        }
        self.state = ReminderState::Fired;
        Ok(())
    }

    pub fn snooze(&mut self, new_fire_at: DateTime<Utc>) -> Result<(), ScheduleError> {
        if !self.awaiting_outcome() {
            return Err(ScheduleError::NoActiveCycle(self.medicine_id));
        }
        self.state = ReminderState::Snoozed;
        self.fire_at = new_fire_at;
        self.snooze_count += 1;
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.state = ReminderState::Cancelled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn reminder() -> ScheduledReminder {
        let due = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        ScheduledReminder::pending(Uuid::new_v4(), due, 1)
    }

    #[test]
    fn pending_fires_once() {
        let mut r = reminder();
        r.fire().unwrap();
        assert_eq!(r.state, ReminderState::Fired);
        assert!(r.fire().is_err(), "a fired reminder has no armed timer");
    }

    #[test]
    fn snooze_requires_a_fired_cycle() {
        let mut r = reminder();
        let later = r.fire_at + Duration::minutes(10);
        assert!(r.snooze(later).is_err(), "pending reminders cannot snooze");

        r.fire().unwrap();
        r.snooze(later).unwrap();
        assert_eq!(r.state, ReminderState::Snoozed);
        assert_eq!(r.fire_at, later);
        assert_eq!(r.snooze_count, 1);
    }

    #[test]
    fn snoozed_reminder_fires_again_and_keeps_due_instant() {
        let mut r = reminder();
        let due = r.scheduled_for;
        r.fire().unwrap();
        r.snooze(due + Duration::minutes(10)).unwrap();
        r.fire().unwrap();
        assert_eq!(r.state, ReminderState::Fired);
        assert_eq!(r.scheduled_for, due);
    }

    #[test]
    fn repeated_snooze_increments_count() {
        let mut r = reminder();
        r.fire().unwrap();
        r.snooze(r.fire_at + Duration::minutes(10)).unwrap();
        r.snooze(r.fire_at + Duration::minutes(10)).unwrap();
        assert_eq!(r.snooze_count, 2);
    }

    #[test]
    fn cancelled_reminder_is_inert() {
        let mut r = reminder();
        r.cancel();
        assert!(!r.is_live());
        assert!(!r.awaiting_outcome());
        assert!(r.fire().is_err());
    }
}
