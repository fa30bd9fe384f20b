use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// Post-hoc telemetry for one study session. Created when the session
/// starts, finalized when it ends; finalization derives `actual_duration`
/// and triggers a profile refresh.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct SessionEvent {
    pub event_id: i64,
    pub student_id: i64,
    pub task_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Minutes the student expected to need.
    pub estimated_duration: Option<f64>,
    /// Minutes actually spent; None until completed.
    pub actual_duration: Option<f64>,
    pub completed: bool,
    pub self_rating: Option<i64>,
    pub difficulty: Option<i64>,
    pub notes: Option<String>,
}

/// A point-in-time context that may affect productivity: a class,
/// meeting or exam, or a logged signal such as sleep or commute.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContextSignal {
    pub signal_id: i64,
    pub student_id: i64,
    pub event_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub signal_type: String,
    pub signal_value: Option<serde_json::Value>,
}

impl<'r> FromRow<'r, SqliteRow> for ContextSignal {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let signal_value: Option<String> = row.try_get("signal_value")?;
        let signal_value = match signal_value.as_deref() {
            Some(raw) if !raw.is_empty() => {
                Some(serde_json::from_str(raw).map_err(|e| sqlx::Error::ColumnDecode {
                    index: "signal_value".into(),
                    source: Box::new(e),
                })?)
            }
            _ => None,
        };
        Ok(ContextSignal {
            signal_id: row.try_get("signal_id")?,
            student_id: row.try_get("student_id")?,
            event_type: row.try_get("event_type")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            signal_type: row.try_get("signal_type")?,
            signal_value,
        })
    }
}
