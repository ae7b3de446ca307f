pub mod config;
pub mod engine; // Application facade
pub mod models;
pub mod scheduling; // Timers, dose cycles, stock, adherence, delivery
pub mod store; // RecordStore trait + SQLite and in-memory backends

pub use engine::{NewMedicine, ReminderEngine};
pub use scheduling::{
    AdherenceSummary, AlertChannel, AlertPayload, ReminderScheduler, ScheduleError,
    ScheduledReminder, UpcomingDose,
};
pub use store::{MemoryStore, RecordStore, SqliteStore, StoreError};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins when set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
