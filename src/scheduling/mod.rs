//! Reminder scheduling: due-time math, the per-medicine timer map, dose
//! outcome resolution, stock accounting, adherence stats, and alert delivery.

pub mod adherence;
pub mod clock;
pub mod dispatch;
pub mod dose;
pub mod error;
pub mod reminder;
pub mod scheduler;
pub mod stock;

pub use adherence::AdherenceSummary;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{AlertChannel, AlertPayload, DeliveryError, NotificationDispatcher};
pub use error::ScheduleError;
pub use reminder::{ReminderState, ScheduledReminder};
pub use scheduler::{ReminderScheduler, UpcomingDose};
pub use stock::StockDecrement;
