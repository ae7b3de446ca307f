use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Medtimer";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    format!("{}=info", env!("CARGO_PKG_NAME"))
}

/// Tunables for the scheduling core.
///
/// Defaults match the product configuration: 10-minute snooze, low-stock
/// warning at 5 units, 7-day adherence window.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How far a snoozed reminder is deferred when the caller gives no delay.
    pub snooze_duration: Duration,
    /// Threshold applied to new medicines when the caregiver does not set one.
    pub default_low_stock_threshold: u32,
    /// Alert delivery attempts before the cycle is given up as missed.
    pub delivery_max_attempts: u32,
    /// Pause between delivery attempts.
    pub delivery_retry_delay: Duration,
    /// Trailing window for adherence queries when the caller gives no window.
    pub adherence_window_days: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            snooze_duration: Duration::from_secs(10 * 60),
            default_low_stock_threshold: 5,
            delivery_max_attempts: 3,
            delivery_retry_delay: Duration::from_secs(2),
            adherence_window_days: 7,
        }
    }
}
