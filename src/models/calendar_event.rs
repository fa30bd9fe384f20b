use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// What a calendar event is backed by. The SQL row keeps the original
/// wide layout (string discriminator + four nullable foreign keys, with a
/// CHECK that exactly one is set); in Rust the pair collapses to a tagged
/// variant so illegal combinations are unrepresentable.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    FixedObligation { obligation_id: i64 },
    FlexibleObligation { obligation_id: i64 },
    StudySession { session_id: i64 },
    CourseLecture { course_id: i64 },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::FixedObligation { .. } => "fixed_obligation",
            EventKind::FlexibleObligation { .. } => "flexible_obligation",
            EventKind::StudySession { .. } => "study_session",
            EventKind::CourseLecture { .. } => "course_lecture",
        }
    }

    /// Column values for (fixed_obligation_id, flexible_obligation_id,
    /// study_session_id, course_id).
    pub fn fk_columns(&self) -> (Option<i64>, Option<i64>, Option<i64>, Option<i64>) {
        match *self {
            EventKind::FixedObligation { obligation_id } => (Some(obligation_id), None, None, None),
            EventKind::FlexibleObligation { obligation_id } => {
                (None, Some(obligation_id), None, None)
            }
            EventKind::StudySession { session_id } => (None, None, Some(session_id), None),
            EventKind::CourseLecture { course_id } => (None, None, None, Some(course_id)),
        }
    }

    fn from_columns(
        event_type: &str,
        fixed: Option<i64>,
        flexible: Option<i64>,
        study: Option<i64>,
        course: Option<i64>,
    ) -> Result<Self, String> {
        match (event_type, fixed, flexible, study, course) {
            ("fixed_obligation", Some(id), None, None, None) => {
                Ok(EventKind::FixedObligation { obligation_id: id })
            }
            ("flexible_obligation", None, Some(id), None, None) => {
                Ok(EventKind::FlexibleObligation { obligation_id: id })
            }
            ("study_session", None, None, Some(id), None) => {
                Ok(EventKind::StudySession { session_id: id })
            }
            ("course_lecture", None, None, None, Some(id)) => {
                Ok(EventKind::CourseLecture { course_id: id })
            }
            _ => Err(format!(
                "calendar event row violates the one-variant-ref invariant (event_type={})",
                event_type
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Scheduled => "scheduled",
            EventStatus::Completed => "completed",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "scheduled" => Some(EventStatus::Scheduled),
            "completed" => Some(EventStatus::Completed),
            "cancelled" => Some(EventStatus::Cancelled),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for EventStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for EventStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for EventStatus {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        EventStatus::parse(&raw).ok_or_else(|| format!("invalid event status: {}", raw).into())
    }
}

/// A materialized calendar placement. `start_time < end_time` always;
/// the scheduler guarantees non-overlap across everything it emits.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CalendarEvent {
    pub event_id: i64,
    pub student_id: i64,
    #[serde(flatten)]
    pub kind: EventKind,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub priority: i64,
    pub status: EventStatus,
}

impl CalendarEvent {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

impl<'r> FromRow<'r, SqliteRow> for CalendarEvent {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let event_type: String = row.try_get("event_type")?;
        let kind = EventKind::from_columns(
            &event_type,
            row.try_get("fixed_obligation_id")?,
            row.try_get("flexible_obligation_id")?,
            row.try_get("study_session_id")?,
            row.try_get("course_id")?,
        )
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: "event_type".into(),
            source: e.into(),
        })?;
        Ok(CalendarEvent {
            event_id: row.try_get("event_id")?,
            student_id: row.try_get("student_id")?,
            kind,
            date: row.try_get("date")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_columns() {
        let kinds = [
            EventKind::FixedObligation { obligation_id: 1 },
            EventKind::FlexibleObligation { obligation_id: 2 },
            EventKind::StudySession { session_id: 3 },
            EventKind::CourseLecture { course_id: 4 },
        ];
        for kind in kinds {
            let (a, b, c, d) = kind.fk_columns();
            let back = EventKind::from_columns(kind.event_type(), a, b, c, d).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn two_refs_set_is_rejected() {
        let err = EventKind::from_columns("fixed_obligation", Some(1), Some(2), None, None);
        assert!(err.is_err());
    }

    #[test]
    fn kind_serializes_with_tag() {
        let kind = EventKind::StudySession { session_id: 9 };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"event_type\":\"study_session\""));
        assert!(json.contains("\"session_id\":9"));
    }
}
