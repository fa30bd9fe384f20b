use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Course {
    pub course_id: i64,
    pub course_crn: i64,
    pub course_code: String,
    pub course_name: String,
    pub semester: String,
    pub credits: i64,
    pub actual_enrollment: i64,
    pub max_enrollment: i64,
    pub instructor: Option<String>,
    /// Ordered weekly meeting pattern, as published by the catalog.
    pub timetable: Vec<MeetingTime>,
}

/// One timetable entry. `days` is the catalog's compact letter encoding,
/// one letter per weekday (M T W R F S U), e.g. "MWF".
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MeetingTime {
    pub days: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct StudentCourse {
    pub student_course_id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub registered_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for Course {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let timetable: Option<String> = row.try_get("timetable")?;
        let timetable = match timetable.as_deref() {
            Some(raw) if !raw.is_empty() => {
                serde_json::from_str(raw).map_err(|e| sqlx::Error::ColumnDecode {
                    index: "timetable".into(),
                    source: Box::new(e),
                })?
            }
            _ => Vec::new(),
        };
        Ok(Course {
            course_id: row.try_get("course_id")?,
            course_crn: row.try_get("course_crn")?,
            course_code: row.try_get("course_code")?,
            course_name: row.try_get("course_name")?,
            semester: row.try_get("semester")?,
            credits: row.try_get("credits")?,
            actual_enrollment: row.try_get("actual_enrollment")?,
            max_enrollment: row.try_get("max_enrollment")?,
            instructor: row.try_get("instructor")?,
            timetable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meeting_time_serde_roundtrip() {
        let entry = MeetingTime {
            days: "MWF".to_string(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(9, 50, 0).unwrap(),
            location: Some("Bliss 205".to_string()),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: MeetingTime = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }
}
