//! Scheduling-core error types.
//!
//! Separate from `StoreError` so the engine's callers can distinguish domain
//! rejections (bad schedule, empty stock, stale outcome) from persistence
//! failures, which pass through unchanged.

use thiserror::Error;
use uuid::Uuid;

use crate::models::DoseAction;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ScheduleError {
    /// Malformed time-of-day or frequency — rejected at creation/edit time,
    /// never silently defaulted.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Decrement attempted at stock 0. Stock is left unchanged.
    #[error("Medicine {0} is out of stock")]
    OutOfStock(Uuid),

    /// Outcome submitted for a cycle already superseded or resolved with a
    /// different action. Logged and not applied.
    #[error("Stale {} outcome for medicine {medicine_id}", .outcome.as_str())]
    StaleResolution {
        medicine_id: Uuid,
        outcome: DoseAction,
    },

    /// Snooze or outcome arrived while no fired reminder was awaiting one.
    #[error("No fired reminder awaiting a response for medicine {0}")]
    NoActiveCycle(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
