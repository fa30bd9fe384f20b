use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// Bounds and defaults for every learned profile parameter.
pub mod clamps {
    pub const SLOT_EFFICIENCY: (f64, f64) = (0.0, 1.0);
    pub const SLOT_EFFICIENCY_DEFAULT: f64 = 0.5;
    pub const MAX_CONTINUOUS_MINUTES: (i64, i64) = (20, 90);
    pub const MAX_CONTINUOUS_MINUTES_DEFAULT: i64 = 45;
    pub const IDEAL_BREAK_MINUTES: (i64, i64) = (5, 30);
    pub const IDEAL_BREAK_MINUTES_DEFAULT: i64 = 10;
    pub const EFFICIENCY_DECAY_RATE: (f64, f64) = (0.01, 0.2);
    pub const EFFICIENCY_DECAY_RATE_DEFAULT: f64 = 0.05;
    pub const FATIGUE_FACTOR: (f64, f64) = (0.05, 0.4);
    pub const FATIGUE_FACTOR_DEFAULT: f64 = 0.15;
    pub const RECOVERY_FACTOR: (f64, f64) = (0.05, 0.5);
    pub const RECOVERY_FACTOR_DEFAULT: f64 = 0.2;
    pub const DAY_MULTIPLIER: (f64, f64) = (0.7, 1.3);
    pub const DAY_MULTIPLIER_DEFAULT: f64 = 1.0;
    pub const SOFT_OBLIGATION_BUFFER: (f64, f64) = (10.0, 60.0);
    pub const SOFT_OBLIGATION_BUFFER_DEFAULT: f64 = 30.0;

    pub fn clamp(value: f64, range: (f64, f64)) -> f64 {
        value.clamp(range.0, range.1)
    }
}

/// A maximal contiguous run of high-efficiency hours on one weekday.
/// `end_hour` is exclusive.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PeakWindow {
    pub day: String,
    pub start_hour: u32,
    pub end_hour: u32,
    pub efficiency: f64,
}

/// Per-student behavioral parameter set. Slot keys are "Weekday-Hour"
/// (e.g. "Monday-14"); day multiplier keys are full weekday names.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProductivityProfile {
    pub profile_id: i64,
    pub student_id: i64,
    pub slot_weights: HashMap<String, f64>,
    pub peak_windows: Vec<PeakWindow>,
    pub max_continuous_minutes: i64,
    pub ideal_break_minutes: i64,
    pub efficiency_decay_rate: f64,
    pub fatigue_factor: f64,
    pub recovery_factor: f64,
    pub day_multipliers: HashMap<String, f64>,
    pub soft_obligation_buffer: f64,
    pub retention_rates: HashMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

impl ProductivityProfile {
    /// Fresh default profile for a student with no telemetry yet.
    pub fn defaults(student_id: i64, now: DateTime<Utc>) -> Self {
        let day_multipliers = crate::scheduler::timegrid::WEEKDAY_NAMES
            .iter()
            .map(|day| (day.to_string(), clamps::DAY_MULTIPLIER_DEFAULT))
            .collect();
        Self {
            profile_id: 0,
            student_id,
            slot_weights: HashMap::new(),
            peak_windows: Vec::new(),
            max_continuous_minutes: clamps::MAX_CONTINUOUS_MINUTES_DEFAULT,
            ideal_break_minutes: clamps::IDEAL_BREAK_MINUTES_DEFAULT,
            efficiency_decay_rate: clamps::EFFICIENCY_DECAY_RATE_DEFAULT,
            fatigue_factor: clamps::FATIGUE_FACTOR_DEFAULT,
            recovery_factor: clamps::RECOVERY_FACTOR_DEFAULT,
            day_multipliers,
            soft_obligation_buffer: clamps::SOFT_OBLIGATION_BUFFER_DEFAULT,
            retention_rates: HashMap::new(),
            last_updated: now,
        }
    }
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &'static str,
) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.into(),
        source: Box::new(e),
    })
}

impl<'r> FromRow<'r, SqliteRow> for ProductivityProfile {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ProductivityProfile {
            profile_id: row.try_get("profile_id")?,
            student_id: row.try_get("student_id")?,
            slot_weights: json_column(row, "slot_weights")?,
            peak_windows: json_column(row, "peak_windows")?,
            max_continuous_minutes: row.try_get("max_continuous_minutes")?,
            ideal_break_minutes: row.try_get("ideal_break_minutes")?,
            efficiency_decay_rate: row.try_get("efficiency_decay_rate")?,
            fatigue_factor: row.try_get("fatigue_factor")?,
            recovery_factor: row.try_get("recovery_factor")?,
            day_multipliers: json_column(row, "day_multipliers")?,
            soft_obligation_buffer: row.try_get("soft_obligation_buffer")?,
            retention_rates: json_column(row, "retention_rates")?,
            last_updated: row.try_get("last_updated")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_profile_has_neutral_multipliers() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let profile = ProductivityProfile::defaults(42, now);
        assert_eq!(profile.day_multipliers.len(), 7);
        assert!(profile.day_multipliers.values().all(|m| *m == 1.0));
        assert!(profile.slot_weights.is_empty());
        assert_eq!(profile.max_continuous_minutes, 45);
        assert_eq!(profile.soft_obligation_buffer, 30.0);
    }
}
