use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Frequency, MedicineStatus};

/// A prescribed item, created by a caregiver and taken by a patient.
///
/// Stock lives here as a non-negative count; the guarded decrement in
/// `scheduling::stock` is the only core path that lowers it. Deactivation is
/// a status flip — rows are never physically removed while dose events
/// reference them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medicine {
    pub id: Uuid,
    pub name: String,
    /// Free-text dosage, e.g. "500mg" or "2 tablets".
    pub dosage: String,
    pub time_of_day: NaiveTime,
    pub frequency: Frequency,
    pub instructions: Option<String>,
    pub stock: u32,
    pub low_stock_threshold: u32,
    pub status: MedicineStatus,
    pub patient_id: Uuid,
    pub caregiver_id: Uuid,
    /// Caregiver-recorded voice instruction, stored by the upload collaborator.
    pub voice_note_url: Option<String>,
    pub last_taken_at: Option<DateTime<Utc>>,
}

impl Medicine {
    pub fn is_active(&self) -> bool {
        self.status == MedicineStatus::Active
    }
}
