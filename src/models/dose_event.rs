use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::DoseAction;

/// Immutable outcome record for one reminder cycle.
///
/// Append-only: created exactly once per resolved cycle (user action or
/// detected miss) and never mutated afterwards. Adherence is derived from
/// these rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseEvent {
    pub id: Uuid,
    pub medicine_id: Uuid,
    pub patient_id: Uuid,
    pub action: DoseAction,
    /// The cycle's due instant, stable across snoozes.
    pub scheduled_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    /// Remaining stock after a TAKEN event; None for MISSED/SKIPPED.
    pub stock_after: Option<u32>,
    pub notes: Option<String>,
}
