//! SQLite-backed `RecordStore`.
//!
//! One connection behind an async mutex; queries are short and synchronous.
//! Uuids are stored as text, timestamps as RFC 3339 strings.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RecordStore, StoreError};
use crate::models::{
    DoseAction, DoseEvent, Frequency, Medicine, MedicineStatus, Notification, NotificationKind,
    UserRole,
};

/// Open a SQLite connection to the given path and run migrations
pub fn open_database(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=DELETE;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_current_version(conn);

    let migrations: Vec<(i64, &str)> = vec![(
        1,
        include_str!("../../resources/migrations/001_initial.sql"),
    )];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql).map_err(|e| StoreError::MigrationFailed {
                version,
                reason: e.to_string(),
            })?;
        }
    }

    Ok(())
}

/// Get the current schema version (0 if no schema exists yet)
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, i64>(0)
    })
    .unwrap_or(0)
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn: Mutex::new(conn) }
    }
}

const MEDICINE_COLUMNS: &str = "id, name, dosage, time_of_day, frequency, instructions, stock, \
     low_stock_threshold, status, patient_id, caregiver_id, voice_note_url, last_taken_at";

struct MedicineRow {
    id: String,
    name: String,
    dosage: String,
    time_of_day: String,
    frequency: String,
    instructions: Option<String>,
    stock: u32,
    low_stock_threshold: u32,
    status: String,
    patient_id: String,
    caregiver_id: String,
    voice_note_url: Option<String>,
    last_taken_at: Option<String>,
}

fn medicine_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MedicineRow> {
    Ok(MedicineRow {
        id: row.get(0)?,
        name: row.get(1)?,
        dosage: row.get(2)?,
        time_of_day: row.get(3)?,
        frequency: row.get(4)?,
        instructions: row.get(5)?,
        stock: row.get(6)?,
        low_stock_threshold: row.get(7)?,
        status: row.get(8)?,
        patient_id: row.get(9)?,
        caregiver_id: row.get(10)?,
        voice_note_url: row.get(11)?,
        last_taken_at: row.get(12)?,
    })
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::Malformed {
        field: field.into(),
        value: value.into(),
    })
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Malformed {
            field: field.into(),
            value: value.into(),
        })
}

fn medicine_from_row(row: MedicineRow) -> Result<Medicine, StoreError> {
    let time_of_day =
        NaiveTime::parse_from_str(&row.time_of_day, "%H:%M:%S").map_err(|_| StoreError::Malformed {
            field: "time_of_day".into(),
            value: row.time_of_day.clone(),
        })?;
    let last_taken_at = match &row.last_taken_at {
        Some(s) => Some(parse_timestamp("last_taken_at", s)?),
        None => None,
    };
    Ok(Medicine {
        id: parse_uuid("id", &row.id)?,
        name: row.name,
        dosage: row.dosage,
        time_of_day,
        frequency: Frequency::parse_storage_str(&row.frequency)?,
        instructions: row.instructions,
        stock: row.stock,
        low_stock_threshold: row.low_stock_threshold,
        status: MedicineStatus::from_str(&row.status)?,
        patient_id: parse_uuid("patient_id", &row.patient_id)?,
        caregiver_id: parse_uuid("caregiver_id", &row.caregiver_id)?,
        voice_note_url: row.voice_note_url,
        last_taken_at,
    })
}

struct DoseEventRow {
    id: String,
    medicine_id: String,
    patient_id: String,
    action: String,
    scheduled_at: String,
    recorded_at: String,
    stock_after: Option<u32>,
    notes: Option<String>,
}

fn dose_event_from_row(row: DoseEventRow) -> Result<DoseEvent, StoreError> {
    Ok(DoseEvent {
        id: parse_uuid("id", &row.id)?,
        medicine_id: parse_uuid("medicine_id", &row.medicine_id)?,
        patient_id: parse_uuid("patient_id", &row.patient_id)?,
        action: DoseAction::from_str(&row.action)?,
        scheduled_at: parse_timestamp("scheduled_at", &row.scheduled_at)?,
        recorded_at: parse_timestamp("recorded_at", &row.recorded_at)?,
        stock_after: row.stock_after,
        notes: row.notes,
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn list_active_medicines(
        &self,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<Vec<Medicine>, StoreError> {
        let conn = self.conn.lock().await;
        let filter_column = match role {
            UserRole::Patient => "patient_id",
            UserRole::Caregiver => "caregiver_id",
        };
        let sql = format!(
            "SELECT {MEDICINE_COLUMNS} FROM medicines
             WHERE {filter_column} = ?1 AND status = 'ACTIVE'
             ORDER BY time_of_day ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id.to_string()], |row| Ok(medicine_row(row)))?;

        let mut medicines = Vec::new();
        for row in rows {
            medicines.push(medicine_from_row(row??)?);
        }
        Ok(medicines)
    }

    async fn get_medicine(&self, id: Uuid) -> Result<Medicine, StoreError> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {MEDICINE_COLUMNS} FROM medicines WHERE id = ?1");
        let row = conn
            .query_row(&sql, params![id.to_string()], |row| Ok(medicine_row(row)))
            .optional()?
            .ok_or_else(|| StoreError::medicine_not_found(id))?;
        medicine_from_row(row?)
    }

    async fn insert_medicine(&self, medicine: &Medicine) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO medicines (id, name, dosage, time_of_day, frequency, instructions,
             stock, low_stock_threshold, status, patient_id, caregiver_id, voice_note_url,
             last_taken_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                medicine.id.to_string(),
                medicine.name,
                medicine.dosage,
                medicine.time_of_day.format("%H:%M:%S").to_string(),
                medicine.frequency.as_storage_str(),
                medicine.instructions,
                medicine.stock,
                medicine.low_stock_threshold,
                medicine.status.as_str(),
                medicine.patient_id.to_string(),
                medicine.caregiver_id.to_string(),
                medicine.voice_note_url,
                medicine.last_taken_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn update_medicine(&self, medicine: &Medicine) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE medicines SET name = ?2, dosage = ?3, time_of_day = ?4, frequency = ?5,
             instructions = ?6, stock = ?7, low_stock_threshold = ?8, status = ?9,
             voice_note_url = ?10, last_taken_at = ?11
             WHERE id = ?1",
            params![
                medicine.id.to_string(),
                medicine.name,
                medicine.dosage,
                medicine.time_of_day.format("%H:%M:%S").to_string(),
                medicine.frequency.as_storage_str(),
                medicine.instructions,
                medicine.stock,
                medicine.low_stock_threshold,
                medicine.status.as_str(),
                medicine.voice_note_url,
                medicine.last_taken_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::medicine_not_found(medicine.id));
        }
        Ok(())
    }

    async fn set_medicine_status(
        &self,
        id: Uuid,
        status: MedicineStatus,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE medicines SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::medicine_not_found(id));
        }
        Ok(())
    }

    async fn update_medicine_stock(
        &self,
        id: Uuid,
        new_stock: u32,
        last_taken_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE medicines SET stock = ?2,
             last_taken_at = COALESCE(?3, last_taken_at)
             WHERE id = ?1",
            params![
                id.to_string(),
                new_stock,
                last_taken_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::medicine_not_found(id));
        }
        Ok(())
    }

    async fn append_dose_event(&self, event: &DoseEvent) -> Result<Uuid, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO dose_events (id, medicine_id, patient_id, action, scheduled_at,
             recorded_at, stock_after, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.id.to_string(),
                event.medicine_id.to_string(),
                event.patient_id.to_string(),
                event.action.as_str(),
                event.scheduled_at.to_rfc3339(),
                event.recorded_at.to_rfc3339(),
                event.stock_after,
                event.notes,
            ],
        )?;
        Ok(event.id)
    }

    async fn dose_events_for_patient(
        &self,
        patient_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<DoseEvent>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, medicine_id, patient_id, action, scheduled_at, recorded_at,
             stock_after, notes
             FROM dose_events
             WHERE patient_id = ?1 AND scheduled_at >= ?2
             ORDER BY scheduled_at ASC",
        )?;
        let rows = stmt.query_map(
            params![patient_id.to_string(), since.to_rfc3339()],
            |row| {
                Ok(DoseEventRow {
                    id: row.get(0)?,
                    medicine_id: row.get(1)?,
                    patient_id: row.get(2)?,
                    action: row.get(3)?,
                    scheduled_at: row.get(4)?,
                    recorded_at: row.get(5)?,
                    stock_after: row.get(6)?,
                    notes: row.get(7)?,
                })
            },
        )?;

        let mut events = Vec::new();
        for row in rows {
            events.push(dose_event_from_row(row?)?);
        }
        Ok(events)
    }

    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO notifications (id, user_id, kind, title, message, medicine_id,
             is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                notification.id.to_string(),
                notification.user_id.to_string(),
                notification.kind.as_str(),
                notification.title,
                notification.message,
                notification.medicine_id.map(|id| id.to_string()),
                notification.is_read as i32,
                notification.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn unread_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, title, message, medicine_id, is_read, created_at
             FROM notifications
             WHERE user_id = ?1 AND is_read = 0
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i32>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut notifications = Vec::new();
        for row in rows {
            let (id, user, kind, title, message, medicine_id, is_read, created_at) = row?;
            notifications.push(Notification {
                id: parse_uuid("id", &id)?,
                user_id: parse_uuid("user_id", &user)?,
                kind: NotificationKind::from_str(&kind)?,
                title,
                message,
                medicine_id: match &medicine_id {
                    Some(s) => Some(parse_uuid("medicine_id", s)?),
                    None => None,
                },
                is_read: is_read != 0,
                created_at: parse_timestamp("created_at", &created_at)?,
            });
        }
        Ok(notifications)
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity_type: "Notification".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
