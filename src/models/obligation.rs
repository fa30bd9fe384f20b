use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// Recurrence pattern of a fixed obligation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Weekly,
    Biweekly,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Weekly => "weekly",
            Recurrence::Biweekly => "biweekly",
            Recurrence::Monthly => "monthly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "weekly" => Some(Recurrence::Weekly),
            "biweekly" => Some(Recurrence::Biweekly),
            "monthly" => Some(Recurrence::Monthly),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for Recurrence {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for Recurrence {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for Recurrence {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Recurrence::parse(&raw).ok_or_else(|| format!("invalid recurrence: {}", raw).into())
    }
}

/// A recurring immovable commitment (class, meeting, shift).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FixedObligation {
    pub obligation_id: i64,
    pub student_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Full weekday names ("Monday".."Sunday"), stored as a JSON array.
    pub days_of_week: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub recurrence: Recurrence,
    pub priority: i64,
    pub course_id: Option<i64>,
}

impl<'r> FromRow<'r, SqliteRow> for FixedObligation {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let days_raw: String = row.try_get("days_of_week")?;
        let days_of_week =
            serde_json::from_str(&days_raw).map_err(|e| sqlx::Error::ColumnDecode {
                index: "days_of_week".into(),
                source: Box::new(e),
            })?;
        Ok(FixedObligation {
            obligation_id: row.try_get("obligation_id")?,
            student_id: row.try_get("student_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            days_of_week,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            recurrence: row.try_get("recurrence")?,
            priority: row.try_get("priority")?,
            course_id: row.try_get("course_id")?,
        })
    }
}

/// A weekly time-budget commitment placed by the scheduler.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FlexibleObligation {
    pub obligation_id: i64,
    pub student_id: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub weekly_target_hours: f64,
    pub constraints: FlexibleConstraints,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub priority: i64,
}

/// Optional placement constraints stored in the `constraints` JSON column.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct FlexibleConstraints {
    /// Length of one scheduled session, in hours. Defaults to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_hours: Option<f64>,
    /// Full weekday names the obligation may be placed on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<String>>,
    /// Obligation ids whose sessions must all finish first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<i64>,
}

impl<'r> FromRow<'r, SqliteRow> for FlexibleObligation {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let constraints: Option<String> = row.try_get("constraints")?;
        let constraints = match constraints.as_deref() {
            Some(raw) if !raw.is_empty() => {
                serde_json::from_str(raw).map_err(|e| sqlx::Error::ColumnDecode {
                    index: "constraints".into(),
                    source: Box::new(e),
                })?
            }
            _ => FlexibleConstraints::default(),
        };
        Ok(FlexibleObligation {
            obligation_id: row.try_get("obligation_id")?,
            student_id: row.try_get("student_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            weekly_target_hours: row.try_get("weekly_target_hours")?,
            constraints,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            priority: row.try_get("priority")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurrence_serde_roundtrip() {
        let json = serde_json::to_string(&Recurrence::Biweekly).unwrap();
        assert_eq!(json, "\"biweekly\"");
        let parsed: Recurrence = serde_json::from_str("\"monthly\"").unwrap();
        assert_eq!(parsed, Recurrence::Monthly);
        assert!(serde_json::from_str::<Recurrence>("\"daily\"").is_err());
    }

    #[test]
    fn constraints_default_when_fields_absent() {
        let parsed: FlexibleConstraints = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, FlexibleConstraints::default());
        assert!(parsed.dependencies.is_empty());
    }

    #[tokio::test]
    async fn recurrence_sqlx_roundtrip() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let value: Recurrence = sqlx::query_scalar("SELECT ?")
            .bind(Recurrence::Weekly)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value, Recurrence::Weekly);
    }
}
