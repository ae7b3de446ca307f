use crate::store::StoreError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(StoreError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(MedicineStatus {
    Active => "ACTIVE",
    Inactive => "INACTIVE",
});

str_enum!(DoseAction {
    Taken => "TAKEN",
    Missed => "MISSED",
    Skipped => "SKIPPED",
});

str_enum!(UserRole {
    Patient => "patient",
    Caregiver => "caregiver",
});

str_enum!(NotificationKind {
    MedicineAdded => "medicine_added",
    DoseReminder => "dose_reminder",
    LowStock => "low_stock",
    MissedDose => "missed_dose",
});

/// How often a medicine is due. `EveryNDays` dates are anchored to the Unix
/// epoch so the cadence is stable across edits and restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    EveryNDays { interval: u32 },
}

impl Frequency {
    /// Storage form: "daily" or "every_N_days".
    pub fn as_storage_str(&self) -> String {
        match self {
            Self::Daily => "daily".into(),
            Self::EveryNDays { interval } => format!("every_{interval}_days"),
        }
    }

    pub fn parse_storage_str(s: &str) -> Result<Self, StoreError> {
        if s == "daily" {
            return Ok(Self::Daily);
        }
        let interval = s
            .strip_prefix("every_")
            .and_then(|rest| rest.strip_suffix("_days"))
            .and_then(|n| n.parse::<u32>().ok());
        match interval {
            Some(interval) if interval >= 1 => Ok(Self::EveryNDays { interval }),
            _ => Err(StoreError::InvalidEnum {
                field: "Frequency".into(),
                value: s.into(),
            }),
        }
    }
}
