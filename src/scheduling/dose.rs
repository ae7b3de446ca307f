//! Next-due computation. Pure and deterministic: re-invoked whenever a
//! medicine's time or frequency changes, and after every resolved cycle.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use super::error::ScheduleError;
use crate::models::Frequency;

/// Earliest instant `>= reference` whose time-of-day matches `time_of_day`
/// and whose date satisfies `frequency`.
///
/// Daily: today's occurrence unless it has already passed, otherwise
/// tomorrow's. `EveryNDays`: the next date whose day-count from the Unix
/// epoch is a multiple of the interval, so the cadence survives restarts and
/// mid-cycle edits.
pub fn next_due(
    time_of_day: NaiveTime,
    frequency: Frequency,
    reference: DateTime<Utc>,
) -> DateTime<Utc> {
    match frequency {
        Frequency::Daily => {
            let candidate = reference.date_naive().and_time(time_of_day).and_utc();
            if candidate >= reference {
                candidate
            } else {
                candidate + Duration::days(1)
            }
        }
        Frequency::EveryNDays { interval } => {
            let interval = i64::from(interval.max(1));
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date");
            let mut date = reference.date_naive();
            let offset = (date - epoch).num_days().rem_euclid(interval);
            if offset != 0 {
                date += Duration::days(interval - offset);
            }
            let candidate = date.and_time(time_of_day).and_utc();
            if candidate >= reference {
                candidate
            } else {
                (date + Duration::days(interval)).and_time(time_of_day).and_utc()
            }
        }
    }
}

/// Parse "HH:MM" (or "HH:MM:SS") into a time-of-day. Malformed input is
/// rejected, never defaulted.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| ScheduleError::InvalidSchedule(format!("unparseable time of day: {s:?}")))
}

pub fn validate_frequency(frequency: Frequency) -> Result<(), ScheduleError> {
    match frequency {
        Frequency::Daily => Ok(()),
        Frequency::EveryNDays { interval: 0 } => Err(ScheduleError::InvalidSchedule(
            "interval must be at least one day".into(),
        )),
        Frequency::EveryNDays { .. } => Ok(()),
    }
}
