use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite};

use crate::behavior::model::{self, SessionPrediction, SlotRecommendation};
use crate::clock::Clock;
use crate::db::store::behavior as store;
use crate::db::store::behavior::SessionCompletion;
use crate::db::store::students;
use crate::error::ApiError;
use crate::models::{ContextSignal, ProductivityProfile, SessionEvent, StudentPreferences};

/// A profile younger than this is returned as-is unless `force` is set.
const PROFILE_STALE_AFTER_MINUTES: i64 = 60;

async fn ensure_student(pool: &Pool<Sqlite>, student_id: i64) -> Result<(), ApiError> {
    if students::get(pool, student_id).await?.is_none() {
        return Err(ApiError::not_found("Student not found"));
    }
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
pub struct SessionStartInput {
    pub task_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    /// Minutes the student expects to need.
    pub estimated_duration: Option<f64>,
}

pub async fn start_session(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    input: SessionStartInput,
) -> Result<SessionEvent, ApiError> {
    ensure_student(pool, student_id).await?;
    if let Some(estimate) = input.estimated_duration {
        if !estimate.is_finite() || estimate <= 0.0 {
            return Err(ApiError::validation("estimated_duration must be positive"));
        }
    }
    let start_time = input.start_time.unwrap_or_else(|| clock.now());
    Ok(store::insert_session_start(
        pool,
        student_id,
        input.task_id,
        start_time,
        input.estimated_duration,
    )
    .await?)
}

#[derive(Debug, serde::Deserialize)]
pub struct SessionFinalizeInput {
    pub end_time: Option<DateTime<Utc>>,
    pub completed: bool,
    pub self_rating: Option<i64>,
    pub difficulty: Option<i64>,
    pub notes: Option<String>,
}

/// Finalizes a session: derives `actual_duration` from the timestamps
/// and refreshes the productivity profile from the new telemetry.
pub async fn finalize_session(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    event_id: i64,
    input: SessionFinalizeInput,
) -> Result<(SessionEvent, ProductivityProfile), ApiError> {
    for rating in [input.self_rating, input.difficulty].into_iter().flatten() {
        if !(1..=5).contains(&rating) {
            return Err(ApiError::validation("Ratings must be between 1 and 5"));
        }
    }

    let session = store::get_session(pool, student_id, event_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Session event not found"))?;
    let end_time = input.end_time.unwrap_or_else(|| clock.now());
    if end_time <= session.start_time {
        return Err(ApiError::validation("end_time must be after start_time"));
    }
    let actual_duration = (end_time - session.start_time).num_minutes() as f64;

    let session = store::finalize_session(
        pool,
        student_id,
        event_id,
        SessionCompletion {
            end_time,
            actual_duration,
            completed: input.completed,
            self_rating: input.self_rating,
            difficulty: input.difficulty,
            notes: input.notes.as_deref(),
        },
    )
    .await?;

    let profile = model::update(pool, clock, student_id).await?;
    Ok((session, profile))
}

#[derive(Debug, serde::Deserialize)]
pub struct ContextSignalInput {
    /// What the calendar says this is: class, meeting, exam.
    pub event_type: String,
    /// What kind of signal was logged: academic, sleep, exercise, commute.
    pub signal_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub signal_value: Option<serde_json::Value>,
}

pub async fn record_context_signal(
    pool: &Pool<Sqlite>,
    student_id: i64,
    input: ContextSignalInput,
) -> Result<ContextSignal, ApiError> {
    ensure_student(pool, student_id).await?;
    if input.start_time >= input.end_time {
        return Err(ApiError::validation("end_time must be after start_time"));
    }
    if input.event_type.trim().is_empty() || input.signal_type.trim().is_empty() {
        return Err(ApiError::validation("event_type and signal_type are required"));
    }
    Ok(store::insert_context_signal(
        pool,
        student_id,
        &input.event_type,
        &input.signal_type,
        input.start_time,
        input.end_time,
        input.signal_value.as_ref(),
    )
    .await?)
}

pub async fn get_profile(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
) -> Result<ProductivityProfile, ApiError> {
    ensure_student(pool, student_id).await?;
    model::get_or_create(pool, clock, student_id).await
}

/// Re-derives the profile from telemetry. Without `force`, a recently
/// updated profile is returned unchanged.
pub async fn update_profile(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    force: bool,
) -> Result<ProductivityProfile, ApiError> {
    ensure_student(pool, student_id).await?;
    if !force {
        if let Some(existing) = store::get_profile(pool, student_id).await? {
            let age = clock.now() - existing.last_updated;
            if age < Duration::minutes(PROFILE_STALE_AFTER_MINUTES) {
                return Ok(existing);
            }
        }
    }
    model::update(pool, clock, student_id).await
}

/// Seeds the profile for a brand-new student from their survey
/// preferences.
pub async fn cold_start(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    preferences: &StudentPreferences,
) -> Result<ProductivityProfile, ApiError> {
    ensure_student(pool, student_id).await?;
    model::initialize_cold_start(pool, clock, student_id, preferences).await
}

pub async fn predict_session_success(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    start_time: DateTime<Utc>,
    duration_minutes: i64,
) -> Result<SessionPrediction, ApiError> {
    ensure_student(pool, student_id).await?;
    if duration_minutes <= 0 {
        return Err(ApiError::validation("duration_minutes must be positive"));
    }
    model::predict_session_success(pool, clock, student_id, start_time, duration_minutes).await
}

pub async fn recommend_slots(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    task_duration_minutes: i64,
    lookahead_days: Option<i64>,
) -> Result<Vec<SlotRecommendation>, ApiError> {
    ensure_student(pool, student_id).await?;
    if task_duration_minutes <= 0 {
        return Err(ApiError::validation("task_duration_minutes must be positive"));
    }
    let lookahead = lookahead_days.unwrap_or(7);
    if !(1..=30).contains(&lookahead) {
        return Err(ApiError::validation("lookahead_days must be within 1..=30"));
    }
    model::recommend_slots(pool, clock, student_id, task_duration_minutes, lookahead).await
}
