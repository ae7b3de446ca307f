//! Rolling adherence rate derived from the dose-event log. Read-only.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ScheduleError;
use crate::models::{DoseAction, DoseEvent};
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdherenceSummary {
    pub taken: u32,
    pub missed: u32,
    pub skipped: u32,
    /// `taken / (taken + missed + skipped) * 100`; 0.0 when no doses were
    /// scheduled in the window (never NaN).
    pub rate_percent: f64,
}

impl AdherenceSummary {
    pub fn scheduled(&self) -> u32 {
        self.taken + self.missed + self.skipped
    }
}

pub fn summarize(events: &[DoseEvent]) -> AdherenceSummary {
    let mut taken = 0u32;
    let mut missed = 0u32;
    let mut skipped = 0u32;
    for event in events {
        match event.action {
            DoseAction::Taken => taken += 1,
            DoseAction::Missed => missed += 1,
            DoseAction::Skipped => skipped += 1,
        }
    }
    let scheduled = taken + missed + skipped;
    let rate_percent = if scheduled == 0 {
        0.0
    } else {
        f64::from(taken) / f64::from(scheduled) * 100.0
    };
    AdherenceSummary {
        taken,
        missed,
        skipped,
        rate_percent,
    }
}

/// Adherence over the trailing `window_days` ending at `now`, keyed on each
/// event's scheduled (not recorded) time.
pub async fn for_patient(
    store: &dyn RecordStore,
    patient_id: Uuid,
    window_days: u32,
    now: DateTime<Utc>,
) -> Result<AdherenceSummary, ScheduleError> {
    let since = now - Duration::days(i64::from(window_days));
    let events = store.dose_events_for_patient(patient_id, since).await?;
    Ok(summarize(&events))
}
