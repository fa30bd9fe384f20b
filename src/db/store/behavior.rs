use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::models::{ContextSignal, ProductivityProfile, SessionEvent};

const SESSION_COLUMNS: &str = "event_id, student_id, task_id, start_time, end_time, \
                               estimated_duration, actual_duration, completed, self_rating, \
                               difficulty, notes";
const SIGNAL_COLUMNS: &str =
    "signal_id, student_id, event_type, start_time, end_time, signal_type, signal_value";
const PROFILE_COLUMNS: &str = "profile_id, student_id, slot_weights, peak_windows, \
                               max_continuous_minutes, ideal_break_minutes, efficiency_decay_rate, \
                               fatigue_factor, recovery_factor, day_multipliers, \
                               soft_obligation_buffer, retention_rates, last_updated";

pub async fn insert_session_start<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    task_id: Option<i64>,
    start_time: DateTime<Utc>,
    estimated_duration: Option<f64>,
) -> Result<SessionEvent, sqlx::Error> {
    sqlx::query_as::<_, SessionEvent>(&format!(
        "INSERT INTO behavior_session_events (student_id, task_id, start_time, estimated_duration) \
         VALUES (?, ?, ?, ?) RETURNING {SESSION_COLUMNS}"
    ))
    .bind(student_id)
    .bind(task_id)
    .bind(start_time)
    .bind(estimated_duration)
    .fetch_one(ex)
    .await
}

pub async fn get_session<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    event_id: i64,
) -> Result<Option<SessionEvent>, sqlx::Error> {
    sqlx::query_as::<_, SessionEvent>(&format!(
        "SELECT {SESSION_COLUMNS} FROM behavior_session_events \
         WHERE event_id = ? AND student_id = ?"
    ))
    .bind(event_id)
    .bind(student_id)
    .fetch_optional(ex)
    .await
}

pub struct SessionCompletion<'a> {
    pub end_time: DateTime<Utc>,
    pub actual_duration: f64,
    pub completed: bool,
    pub self_rating: Option<i64>,
    pub difficulty: Option<i64>,
    pub notes: Option<&'a str>,
}

pub async fn finalize_session<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    event_id: i64,
    completion: SessionCompletion<'_>,
) -> Result<SessionEvent, sqlx::Error> {
    sqlx::query_as::<_, SessionEvent>(&format!(
        "UPDATE behavior_session_events \
         SET end_time = ?, actual_duration = ?, completed = ?, self_rating = ?, difficulty = ?, \
             notes = ? \
         WHERE event_id = ? AND student_id = ? RETURNING {SESSION_COLUMNS}"
    ))
    .bind(completion.end_time)
    .bind(completion.actual_duration)
    .bind(completion.completed)
    .bind(completion.self_rating)
    .bind(completion.difficulty)
    .bind(completion.notes)
    .bind(event_id)
    .bind(student_id)
    .fetch_one(ex)
    .await
}

/// Completed sessions started after the cutoff, oldest first.
pub async fn list_completed_since<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    cutoff: DateTime<Utc>,
) -> Result<Vec<SessionEvent>, sqlx::Error> {
    sqlx::query_as::<_, SessionEvent>(&format!(
        "SELECT {SESSION_COLUMNS} FROM behavior_session_events \
         WHERE student_id = ? AND completed = 1 AND start_time >= ? \
         ORDER BY start_time, event_id"
    ))
    .bind(student_id)
    .bind(cutoff)
    .fetch_all(ex)
    .await
}

/// Completed, rated sessions, oldest first.
pub async fn list_completed_rated<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<Vec<SessionEvent>, sqlx::Error> {
    sqlx::query_as::<_, SessionEvent>(&format!(
        "SELECT {SESSION_COLUMNS} FROM behavior_session_events \
         WHERE student_id = ? AND completed = 1 AND self_rating IS NOT NULL \
         ORDER BY start_time, event_id"
    ))
    .bind(student_id)
    .fetch_all(ex)
    .await
}

/// The most recent `limit` completed rated sessions, newest first.
pub async fn list_completed_rated_recent<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    limit: i64,
) -> Result<Vec<SessionEvent>, sqlx::Error> {
    sqlx::query_as::<_, SessionEvent>(&format!(
        "SELECT {SESSION_COLUMNS} FROM behavior_session_events \
         WHERE student_id = ? AND completed = 1 AND self_rating IS NOT NULL \
         ORDER BY start_time DESC, event_id DESC LIMIT ?"
    ))
    .bind(student_id)
    .bind(limit)
    .fetch_all(ex)
    .await
}

pub async fn insert_context_signal<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    event_type: &str,
    signal_type: &str,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    signal_value: Option<&serde_json::Value>,
) -> Result<ContextSignal, sqlx::Error> {
    let value = signal_value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, ContextSignal>(&format!(
        "INSERT INTO context_signals (student_id, event_type, signal_type, start_time, end_time, signal_value) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING {SIGNAL_COLUMNS}"
    ))
    .bind(student_id)
    .bind(event_type)
    .bind(signal_type)
    .bind(start_time)
    .bind(end_time)
    .bind(value)
    .fetch_one(ex)
    .await
}

pub async fn list_context_signals<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<Vec<ContextSignal>, sqlx::Error> {
    sqlx::query_as::<_, ContextSignal>(&format!(
        "SELECT {SIGNAL_COLUMNS} FROM context_signals WHERE student_id = ? \
         ORDER BY start_time, signal_id"
    ))
    .bind(student_id)
    .fetch_all(ex)
    .await
}

pub async fn get_profile<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<Option<ProductivityProfile>, sqlx::Error> {
    sqlx::query_as::<_, ProductivityProfile>(&format!(
        "SELECT {PROFILE_COLUMNS} FROM behavior_productivity_profiles WHERE student_id = ?"
    ))
    .bind(student_id)
    .fetch_optional(ex)
    .await
}

pub async fn upsert_profile<'e>(
    ex: impl SqliteExecutor<'e>,
    profile: &ProductivityProfile,
) -> Result<ProductivityProfile, sqlx::Error> {
    let slot_weights = serde_json::to_string(&profile.slot_weights)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let peak_windows = serde_json::to_string(&profile.peak_windows)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let day_multipliers = serde_json::to_string(&profile.day_multipliers)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let retention_rates = serde_json::to_string(&profile.retention_rates)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, ProductivityProfile>(&format!(
        "INSERT INTO behavior_productivity_profiles (student_id, slot_weights, peak_windows, \
             max_continuous_minutes, ideal_break_minutes, efficiency_decay_rate, fatigue_factor, \
             recovery_factor, day_multipliers, soft_obligation_buffer, retention_rates, last_updated) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(student_id) DO UPDATE SET \
             slot_weights = excluded.slot_weights, \
             peak_windows = excluded.peak_windows, \
             max_continuous_minutes = excluded.max_continuous_minutes, \
             ideal_break_minutes = excluded.ideal_break_minutes, \
             efficiency_decay_rate = excluded.efficiency_decay_rate, \
             fatigue_factor = excluded.fatigue_factor, \
             recovery_factor = excluded.recovery_factor, \
             day_multipliers = excluded.day_multipliers, \
             soft_obligation_buffer = excluded.soft_obligation_buffer, \
             retention_rates = excluded.retention_rates, \
             last_updated = excluded.last_updated \
         RETURNING {PROFILE_COLUMNS}"
    ))
    .bind(profile.student_id)
    .bind(slot_weights)
    .bind(peak_windows)
    .bind(profile.max_continuous_minutes)
    .bind(profile.ideal_break_minutes)
    .bind(profile.efficiency_decay_rate)
    .bind(profile.fatigue_factor)
    .bind(profile.recovery_factor)
    .bind(day_multipliers)
    .bind(profile.soft_obligation_buffer)
    .bind(retention_rates)
    .bind(profile.last_updated)
    .fetch_one(ex)
    .await
}
