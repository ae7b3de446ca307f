//! Persistence collaborator boundary.
//!
//! The scheduling core talks to the record store only through `RecordStore`,
//! so it carries no backend dependency and runs against the in-memory fake
//! under test. `SqliteStore` is the on-device implementation.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{open_database, open_memory_database, SqliteStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{DoseEvent, Medicine, MedicineStatus, Notification, UserRole};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Unreadable {field} value: {value}")]
    Malformed { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Write rejected: {0}")]
    WriteFailed(String),
}

impl StoreError {
    pub fn medicine_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity_type: "Medicine".into(),
            id: id.to_string(),
        }
    }
}

/// Narrow interface over the shared record store.
///
/// Dose events are append-only; notifications mutate only their read flag.
/// Writes are not retried here — failures surface to the caller, and the
/// scheduler's resolution path is safe to retry.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_active_medicines(
        &self,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<Vec<Medicine>, StoreError>;

    async fn get_medicine(&self, id: Uuid) -> Result<Medicine, StoreError>;

    async fn insert_medicine(&self, medicine: &Medicine) -> Result<(), StoreError>;

    async fn update_medicine(&self, medicine: &Medicine) -> Result<(), StoreError>;

    async fn set_medicine_status(
        &self,
        id: Uuid,
        status: MedicineStatus,
    ) -> Result<(), StoreError>;

    async fn update_medicine_stock(
        &self,
        id: Uuid,
        new_stock: u32,
        last_taken_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Append one outcome record; returns its id.
    async fn append_dose_event(&self, event: &DoseEvent) -> Result<Uuid, StoreError>;

    /// Adherence inputs: events for the patient with `scheduled_at >= since`.
    async fn dose_events_for_patient(
        &self,
        patient_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<DoseEvent>, StoreError>;

    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    async fn unread_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, StoreError>;

    async fn mark_notification_read(&self, id: Uuid) -> Result<(), StoreError>;
}
