use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::SqliteExecutor;

use crate::models::{FixedObligation, FlexibleConstraints, FlexibleObligation, Recurrence};

const FIXED_COLUMNS: &str = "obligation_id, student_id, name, description, start_time, end_time, \
                             days_of_week, start_date, end_date, recurrence, priority, course_id";
const FLEX_COLUMNS: &str = "obligation_id, student_id, name, description, weekly_target_hours, \
                            constraints, start_date, end_date, priority";

pub struct NewFixedObligation<'a> {
    pub student_id: i64,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub days_of_week: &'a [String],
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub recurrence: Recurrence,
    pub priority: i64,
    pub course_id: Option<i64>,
}

pub async fn insert_fixed<'e>(
    ex: impl SqliteExecutor<'e>,
    obligation: NewFixedObligation<'_>,
) -> Result<FixedObligation, sqlx::Error> {
    let days = serde_json::to_string(obligation.days_of_week)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, FixedObligation>(&format!(
        "INSERT INTO fixed_obligations (student_id, name, description, start_time, end_time, \
                                        days_of_week, start_date, end_date, recurrence, priority, course_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {FIXED_COLUMNS}"
    ))
    .bind(obligation.student_id)
    .bind(obligation.name)
    .bind(obligation.description)
    .bind(obligation.start_time)
    .bind(obligation.end_time)
    .bind(days)
    .bind(obligation.start_date)
    .bind(obligation.end_date)
    .bind(obligation.recurrence)
    .bind(obligation.priority)
    .bind(obligation.course_id)
    .fetch_one(ex)
    .await
}

pub async fn get_fixed<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    obligation_id: i64,
) -> Result<Option<FixedObligation>, sqlx::Error> {
    sqlx::query_as::<_, FixedObligation>(&format!(
        "SELECT {FIXED_COLUMNS} FROM fixed_obligations WHERE obligation_id = ? AND student_id = ?"
    ))
    .bind(obligation_id)
    .bind(student_id)
    .fetch_optional(ex)
    .await
}

pub async fn list_fixed<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<Vec<FixedObligation>, sqlx::Error> {
    sqlx::query_as::<_, FixedObligation>(&format!(
        "SELECT {FIXED_COLUMNS} FROM fixed_obligations WHERE student_id = ? ORDER BY obligation_id"
    ))
    .bind(student_id)
    .fetch_all(ex)
    .await
}

pub async fn update_fixed<'e>(
    ex: impl SqliteExecutor<'e>,
    obligation: &FixedObligation,
) -> Result<FixedObligation, sqlx::Error> {
    let days = serde_json::to_string(&obligation.days_of_week)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, FixedObligation>(&format!(
        "UPDATE fixed_obligations SET name = ?, description = ?, start_time = ?, end_time = ?, \
             days_of_week = ?, start_date = ?, end_date = ?, recurrence = ?, priority = ?, course_id = ? \
         WHERE obligation_id = ? AND student_id = ? RETURNING {FIXED_COLUMNS}"
    ))
    .bind(&obligation.name)
    .bind(&obligation.description)
    .bind(obligation.start_time)
    .bind(obligation.end_time)
    .bind(days)
    .bind(obligation.start_date)
    .bind(obligation.end_date)
    .bind(obligation.recurrence)
    .bind(obligation.priority)
    .bind(obligation.course_id)
    .bind(obligation.obligation_id)
    .bind(obligation.student_id)
    .fetch_one(ex)
    .await
}

/// Calendar events referencing the obligation cascade with the row.
pub async fn delete_fixed<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    obligation_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM fixed_obligations WHERE obligation_id = ? AND student_id = ?")
        .bind(obligation_id)
        .bind(student_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

pub struct NewFlexibleObligation<'a> {
    pub student_id: i64,
    pub name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub weekly_target_hours: f64,
    pub constraints: FlexibleConstraints,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub priority: i64,
}

pub async fn insert_flexible<'e>(
    ex: impl SqliteExecutor<'e>,
    obligation: NewFlexibleObligation<'_>,
) -> Result<FlexibleObligation, sqlx::Error> {
    let constraints = serde_json::to_string(&obligation.constraints)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, FlexibleObligation>(&format!(
        "INSERT INTO flexible_obligations (student_id, name, description, weekly_target_hours, \
                                           constraints, start_date, end_date, priority) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING {FLEX_COLUMNS}"
    ))
    .bind(obligation.student_id)
    .bind(obligation.name)
    .bind(obligation.description)
    .bind(obligation.weekly_target_hours)
    .bind(constraints)
    .bind(obligation.start_date)
    .bind(obligation.end_date)
    .bind(obligation.priority)
    .fetch_one(ex)
    .await
}

pub async fn get_flexible<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    obligation_id: i64,
) -> Result<Option<FlexibleObligation>, sqlx::Error> {
    sqlx::query_as::<_, FlexibleObligation>(&format!(
        "SELECT {FLEX_COLUMNS} FROM flexible_obligations WHERE obligation_id = ? AND student_id = ?"
    ))
    .bind(obligation_id)
    .bind(student_id)
    .fetch_optional(ex)
    .await
}

pub async fn list_flexible<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<Vec<FlexibleObligation>, sqlx::Error> {
    sqlx::query_as::<_, FlexibleObligation>(&format!(
        "SELECT {FLEX_COLUMNS} FROM flexible_obligations WHERE student_id = ? ORDER BY obligation_id"
    ))
    .bind(student_id)
    .fetch_all(ex)
    .await
}

pub async fn update_flexible<'e>(
    ex: impl SqliteExecutor<'e>,
    obligation: &FlexibleObligation,
) -> Result<FlexibleObligation, sqlx::Error> {
    let constraints = serde_json::to_string(&obligation.constraints)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, FlexibleObligation>(&format!(
        "UPDATE flexible_obligations SET name = ?, description = ?, weekly_target_hours = ?, \
             constraints = ?, start_date = ?, end_date = ?, priority = ? \
         WHERE obligation_id = ? AND student_id = ? RETURNING {FLEX_COLUMNS}"
    ))
    .bind(&obligation.name)
    .bind(&obligation.description)
    .bind(obligation.weekly_target_hours)
    .bind(constraints)
    .bind(obligation.start_date)
    .bind(obligation.end_date)
    .bind(obligation.priority)
    .bind(obligation.obligation_id)
    .bind(obligation.student_id)
    .fetch_one(ex)
    .await
}

pub async fn delete_flexible<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    obligation_id: i64,
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM flexible_obligations WHERE obligation_id = ? AND student_id = ?")
            .bind(obligation_id)
            .bind(student_id)
            .execute(ex)
            .await?;
    Ok(result.rows_affected())
}
