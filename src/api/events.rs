use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite};

use crate::clock::Clock;
use crate::db::store::events;
use crate::error::ApiError;
use crate::models::CalendarEvent;

/// Calendar events overlapping [start, end); defaults to the seven days
/// starting at today's midnight.
pub async fn list_calendar(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<CalendarEvent>, ApiError> {
    let start = start.unwrap_or_else(|| {
        clock
            .now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc()
    });
    let end = end.unwrap_or(start + Duration::days(7));
    if start >= end {
        return Err(ApiError::validation("Start date must be before end date"));
    }
    Ok(events::list_window(pool, student_id, start, end).await?)
}

pub async fn get_event(
    pool: &Pool<Sqlite>,
    student_id: i64,
    event_id: i64,
) -> Result<CalendarEvent, ApiError> {
    events::get(pool, student_id, event_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Calendar event not found"))
}
