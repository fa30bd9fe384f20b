use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Student {
    pub student_id: i64,
    pub email: String,
    pub name: String,
    pub program: Option<String>,
    pub year: Option<i64>,
    pub preferences: StudentPreferences,
    pub created_at: Option<DateTime<Utc>>,
}

/// Free-form preferences column, parsed into the fields the planner
/// understands. Unknown keys are dropped on read and not round-tripped.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct StudentPreferences {
    #[serde(default)]
    pub preferred_study_time: PreferredStudyTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_hours_per_day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_gap_between_sessions: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreferredStudyTime {
    Morning,
    Afternoon,
    Evening,
    #[default]
    None,
}

impl<'r> FromRow<'r, SqliteRow> for Student {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let preferences: Option<String> = row.try_get("preferences")?;
        let preferences = match preferences.as_deref() {
            Some(raw) if !raw.is_empty() => {
                serde_json::from_str(raw).map_err(|e| sqlx::Error::ColumnDecode {
                    index: "preferences".into(),
                    source: Box::new(e),
                })?
            }
            _ => StudentPreferences::default(),
        };
        Ok(Student {
            student_id: row.try_get("student_id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            program: row.try_get("program")?,
            year: row.try_get("year")?,
            preferences,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferences_parse_known_keys() {
        let prefs: StudentPreferences =
            serde_json::from_str(r#"{"preferred_study_time":"evening","max_hours_per_day":4}"#)
                .unwrap();
        assert_eq!(prefs.preferred_study_time, PreferredStudyTime::Evening);
        assert_eq!(prefs.max_hours_per_day, Some(4));
        assert_eq!(prefs.min_gap_between_sessions, None);
    }

    #[test]
    fn missing_preference_defaults_to_none() {
        let prefs: StudentPreferences = serde_json::from_str("{}").unwrap();
        assert_eq!(prefs.preferred_study_time, PreferredStudyTime::None);
    }
}
