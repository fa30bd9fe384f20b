use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteExecutor;

use crate::models::{CalendarEvent, EventKind, EventStatus};

const COLUMNS: &str = "event_id, student_id, event_type, fixed_obligation_id, \
                       flexible_obligation_id, study_session_id, course_id, date, start_time, \
                       end_time, priority, status";

pub struct NewCalendarEvent {
    pub student_id: i64,
    pub kind: EventKind,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub priority: i64,
    pub status: EventStatus,
}

pub async fn insert<'e>(
    ex: impl SqliteExecutor<'e>,
    event: NewCalendarEvent,
) -> Result<CalendarEvent, sqlx::Error> {
    let (fixed_id, flexible_id, study_id, course_id) = event.kind.fk_columns();
    sqlx::query_as::<_, CalendarEvent>(&format!(
        "INSERT INTO calendar_events (student_id, event_type, fixed_obligation_id, \
             flexible_obligation_id, study_session_id, course_id, date, start_time, end_time, \
             priority, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {COLUMNS}"
    ))
    .bind(event.student_id)
    .bind(event.kind.event_type())
    .bind(fixed_id)
    .bind(flexible_id)
    .bind(study_id)
    .bind(course_id)
    .bind(event.date)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(event.priority)
    .bind(event.status)
    .fetch_one(ex)
    .await
}

pub async fn get<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    event_id: i64,
) -> Result<Option<CalendarEvent>, sqlx::Error> {
    sqlx::query_as::<_, CalendarEvent>(&format!(
        "SELECT {COLUMNS} FROM calendar_events WHERE event_id = ? AND student_id = ?"
    ))
    .bind(event_id)
    .bind(student_id)
    .fetch_optional(ex)
    .await
}

pub async fn list_for_student<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<Vec<CalendarEvent>, sqlx::Error> {
    sqlx::query_as::<_, CalendarEvent>(&format!(
        "SELECT {COLUMNS} FROM calendar_events WHERE student_id = ? ORDER BY start_time, event_id"
    ))
    .bind(student_id)
    .fetch_all(ex)
    .await
}

/// Events overlapping the half-open window [window_start, window_end).
pub async fn list_window<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<CalendarEvent>, sqlx::Error> {
    sqlx::query_as::<_, CalendarEvent>(&format!(
        "SELECT {COLUMNS} FROM calendar_events \
         WHERE student_id = ? AND start_time < ? AND end_time > ? \
         ORDER BY start_time, event_id"
    ))
    .bind(student_id)
    .bind(window_end)
    .bind(window_start)
    .fetch_all(ex)
    .await
}

pub async fn delete_future_for_fixed_obligation<'e>(
    ex: impl SqliteExecutor<'e>,
    obligation_id: i64,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM calendar_events WHERE fixed_obligation_id = ? AND start_time >= ?")
            .bind(obligation_id)
            .bind(now)
            .execute(ex)
            .await?;
    Ok(result.rows_affected())
}

pub async fn delete_for_flexible_obligation<'e>(
    ex: impl SqliteExecutor<'e>,
    obligation_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM calendar_events WHERE flexible_obligation_id = ?")
        .bind(obligation_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

/// Clears every scheduler-owned placement (flexible sessions and study
/// sessions); fixed and lecture events are never touched here.
pub async fn delete_flexible_and_study<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM calendar_events \
         WHERE student_id = ? AND event_type IN ('flexible_obligation', 'study_session')",
    )
    .bind(student_id)
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_study_events<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM calendar_events WHERE student_id = ? AND event_type = 'study_session'",
    )
    .bind(student_id)
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_course_lectures<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    course_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM calendar_events \
         WHERE student_id = ? AND course_id = ? AND event_type = 'course_lecture'",
    )
    .bind(student_id)
    .bind(course_id)
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}
