//! In-memory `RecordStore` — the test double, also usable by embedders that
//! keep records elsewhere and only need the scheduling core.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{RecordStore, StoreError};
use crate::models::{DoseEvent, Medicine, MedicineStatus, Notification, UserRole};

#[derive(Default)]
struct Inner {
    medicines: HashMap<Uuid, Medicine>,
    dose_events: Vec<DoseEvent>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_next_stock_write: AtomicBool,
    fail_next_event_append: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `update_medicine_stock` fail once — exercises the
    /// retryable resolution path.
    pub fn fail_next_stock_write(&self) {
        self.fail_next_stock_write.store(true, Ordering::SeqCst);
    }

    /// Make the next `append_dose_event` fail once.
    pub fn fail_next_event_append(&self) {
        self.fail_next_event_append.store(true, Ordering::SeqCst);
    }

    /// Snapshot of all appended dose events, oldest first.
    pub fn dose_events(&self) -> Vec<DoseEvent> {
        self.inner.lock().expect("store lock").dose_events.clone()
    }

    /// Snapshot of all notifications, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().expect("store lock").notifications.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_active_medicines(
        &self,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<Vec<Medicine>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        let mut out: Vec<Medicine> = inner
            .medicines
            .values()
            .filter(|m| m.status == MedicineStatus::Active)
            .filter(|m| match role {
                UserRole::Patient => m.patient_id == user_id,
                UserRole::Caregiver => m.caregiver_id == user_id,
            })
            .cloned()
            .collect();
        out.sort_by_key(|m| m.time_of_day);
        Ok(out)
    }

    async fn get_medicine(&self, id: Uuid) -> Result<Medicine, StoreError> {
        self.inner
            .lock()
            .expect("store lock")
            .medicines
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::medicine_not_found(id))
    }

    async fn insert_medicine(&self, medicine: &Medicine) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("store lock")
            .medicines
            .insert(medicine.id, medicine.clone());
        Ok(())
    }

    async fn update_medicine(&self, medicine: &Medicine) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if !inner.medicines.contains_key(&medicine.id) {
            return Err(StoreError::medicine_not_found(medicine.id));
        }
        inner.medicines.insert(medicine.id, medicine.clone());
        Ok(())
    }

    async fn set_medicine_status(
        &self,
        id: Uuid,
        status: MedicineStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        let medicine = inner
            .medicines
            .get_mut(&id)
            .ok_or_else(|| StoreError::medicine_not_found(id))?;
        medicine.status = status;
        Ok(())
    }

    async fn update_medicine_stock(
        &self,
        id: Uuid,
        new_stock: u32,
        last_taken_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        if self.fail_next_stock_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::WriteFailed("injected stock-write failure".into()));
        }
        let mut inner = self.inner.lock().expect("store lock");
        let medicine = inner
            .medicines
            .get_mut(&id)
            .ok_or_else(|| StoreError::medicine_not_found(id))?;
        medicine.stock = new_stock;
        if last_taken_at.is_some() {
            medicine.last_taken_at = last_taken_at;
        }
        Ok(())
    }

    async fn append_dose_event(&self, event: &DoseEvent) -> Result<Uuid, StoreError> {
        if self.fail_next_event_append.swap(false, Ordering::SeqCst) {
            return Err(StoreError::WriteFailed("injected append failure".into()));
        }
        let mut inner = self.inner.lock().expect("store lock");
        inner.dose_events.push(event.clone());
        Ok(event.id)
    }

    async fn dose_events_for_patient(
        &self,
        patient_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<DoseEvent>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        Ok(inner
            .dose_events
            .iter()
            .filter(|e| e.patient_id == patient_id && e.scheduled_at >= since)
            .cloned()
            .collect())
    }

    async fn create_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        inner.notifications.push(notification.clone());
        Ok(())
    }

    async fn unread_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        let inner = self.inner.lock().expect("store lock");
        let mut out: Vec<Notification> = inner
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        let notification = inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| StoreError::NotFound {
                entity_type: "Notification".into(),
                id: id.to_string(),
            })?;
        notification.is_read = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{enums::Frequency, NotificationKind};
    use chrono::NaiveTime;

    fn sample_medicine(patient_id: Uuid, caregiver_id: Uuid) -> Medicine {
        Medicine {
            id: Uuid::new_v4(),
            name: "Metformin".into(),
            dosage: "500mg".into(),
            time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            frequency: Frequency::Daily,
            instructions: None,
            stock: 30,
            low_stock_threshold: 5,
            status: MedicineStatus::Active,
            patient_id,
            caregiver_id,
            voice_note_url: None,
            last_taken_at: None,
        }
    }

    #[tokio::test]
    async fn lists_only_active_medicines_for_role() {
        let store = MemoryStore::new();
        let patient = Uuid::new_v4();
        let caregiver = Uuid::new_v4();

        let active = sample_medicine(patient, caregiver);
        let mut inactive = sample_medicine(patient, caregiver);
        inactive.status = MedicineStatus::Inactive;
        store.insert_medicine(&active).await.unwrap();
        store.insert_medicine(&inactive).await.unwrap();

        let for_patient = store
            .list_active_medicines(patient, UserRole::Patient)
            .await
            .unwrap();
        assert_eq!(for_patient.len(), 1);
        assert_eq!(for_patient[0].id, active.id);

        let for_other = store
            .list_active_medicines(Uuid::new_v4(), UserRole::Patient)
            .await
            .unwrap();
        assert!(for_other.is_empty());
    }

    #[tokio::test]
    async fn stock_write_failure_is_injected_once() {
        let store = MemoryStore::new();
        let med = sample_medicine(Uuid::new_v4(), Uuid::new_v4());
        store.insert_medicine(&med).await.unwrap();

        store.fail_next_stock_write();
        assert!(store.update_medicine_stock(med.id, 29, None).await.is_err());
        store.update_medicine_stock(med.id, 29, None).await.unwrap();
        assert_eq!(store.get_medicine(med.id).await.unwrap().stock, 29);
    }

    #[tokio::test]
    async fn unread_notifications_exclude_read_ones() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let n = Notification::new(
            user,
            NotificationKind::LowStock,
            "Low Stock Alert",
            "Metformin is running low",
            None,
            Utc::now(),
        );
        store.create_notification(&n).await.unwrap();
        assert_eq!(store.unread_notifications(user).await.unwrap().len(), 1);

        store.mark_notification_read(n.id).await.unwrap();
        assert!(store.unread_notifications(user).await.unwrap().is_empty());
    }
}
