use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{Pool, Sqlite};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::Config;
use crate::db::store::obligations::{self, NewFixedObligation, NewFlexibleObligation};
use crate::error::ApiError;
use crate::models::{FixedObligation, FlexibleConstraints, FlexibleObligation, Recurrence};
use crate::scheduler::coordinator::{self, RescheduleOutcome, RescheduleRequest};
use crate::scheduler::recurrence;
use crate::scheduler::timegrid;

fn validate_priority(priority: i64) -> Result<(), ApiError> {
    if !(1..=5).contains(&priority) {
        return Err(ApiError::validation("Priority must be between 1 and 5"));
    }
    Ok(())
}

fn validate_days_of_week(days: &[String]) -> Result<(), ApiError> {
    if days.is_empty() {
        return Err(ApiError::validation("At least one weekday is required"));
    }
    for day in days {
        if timegrid::weekday_from_name(day).is_none() {
            return Err(ApiError::validation(format!("Invalid day of week: {}", day)));
        }
    }
    Ok(())
}

// ---- Fixed obligations ----

#[derive(Debug, serde::Deserialize)]
pub struct FixedObligationInput {
    pub name: String,
    pub description: Option<String>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub days_of_week: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub recurrence: Recurrence,
    pub priority: Option<i64>,
    pub course_id: Option<i64>,
}

fn validate_fixed(input: &FixedObligationInput) -> Result<(), ApiError> {
    if input.start_time >= input.end_time {
        return Err(ApiError::validation("start_time must be before end_time"));
    }
    validate_days_of_week(&input.days_of_week)?;
    if let Some(end) = input.end_date {
        if end < input.start_date {
            return Err(ApiError::validation("end_date must not precede start_date"));
        }
    }
    validate_priority(input.priority.unwrap_or(3))
}

/// Creates the obligation, materializes its calendar events, then runs a
/// reschedule around them. The recurrence transaction commits before the
/// reschedule starts.
pub async fn create_fixed(
    pool: &Pool<Sqlite>,
    config: &Config,
    clock: &dyn Clock,
    student_id: i64,
    input: FixedObligationInput,
    cancel: &CancellationToken,
) -> Result<(FixedObligation, RescheduleOutcome), ApiError> {
    validate_fixed(&input)?;

    let mut tx = pool.begin().await?;
    let obligation = obligations::insert_fixed(
        &mut *tx,
        NewFixedObligation {
            student_id,
            name: &input.name,
            description: input.description.as_deref(),
            start_time: input.start_time,
            end_time: input.end_time,
            days_of_week: &input.days_of_week,
            start_date: input.start_date,
            end_date: input.end_date,
            recurrence: input.recurrence,
            priority: input.priority.unwrap_or(3),
            course_id: input.course_id,
        },
    )
    .await?;
    recurrence::regenerate_fixed_events(&mut *tx, &obligation, clock.now()).await?;
    tx.commit().await?;

    let outcome = coordinator::reschedule(
        pool,
        config,
        clock,
        RescheduleRequest {
            student_id,
            newly_created_obligation_id: Some(obligation.obligation_id),
            week_start: None,
        },
        cancel,
    )
    .await?;
    Ok((obligation, outcome))
}

pub async fn get_fixed(
    pool: &Pool<Sqlite>,
    student_id: i64,
    obligation_id: i64,
) -> Result<FixedObligation, ApiError> {
    obligations::get_fixed(pool, student_id, obligation_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Fixed obligation not found"))
}

pub async fn list_fixed(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<FixedObligation>, ApiError> {
    Ok(obligations::list_fixed(pool, student_id).await?)
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct FixedObligationPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub days_of_week: Option<Vec<String>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<Option<NaiveDate>>,
    pub recurrence: Option<Recurrence>,
    pub priority: Option<i64>,
}

impl FixedObligationPatch {
    fn touches_schedule(&self) -> bool {
        self.start_time.is_some()
            || self.end_time.is_some()
            || self.days_of_week.is_some()
            || self.start_date.is_some()
            || self.end_date.is_some()
            || self.recurrence.is_some()
    }
}

/// Applies the patch; when a schedule-shaping field changed, future
/// events are regenerated and a reschedule runs.
pub async fn update_fixed(
    pool: &Pool<Sqlite>,
    config: &Config,
    clock: &dyn Clock,
    student_id: i64,
    obligation_id: i64,
    patch: FixedObligationPatch,
    cancel: &CancellationToken,
) -> Result<(FixedObligation, Option<RescheduleOutcome>), ApiError> {
    let mut obligation = get_fixed(pool, student_id, obligation_id).await?;
    let regenerate = patch.touches_schedule();

    if let Some(name) = patch.name {
        obligation.name = name;
    }
    if let Some(description) = patch.description {
        obligation.description = Some(description);
    }
    if let Some(start_time) = patch.start_time {
        obligation.start_time = start_time;
    }
    if let Some(end_time) = patch.end_time {
        obligation.end_time = end_time;
    }
    if let Some(days) = patch.days_of_week {
        obligation.days_of_week = days;
    }
    if let Some(start_date) = patch.start_date {
        obligation.start_date = start_date;
    }
    if let Some(end_date) = patch.end_date {
        obligation.end_date = end_date;
    }
    if let Some(recurrence) = patch.recurrence {
        obligation.recurrence = recurrence;
    }
    if let Some(priority) = patch.priority {
        obligation.priority = priority;
    }

    if obligation.start_time >= obligation.end_time {
        return Err(ApiError::validation("start_time must be before end_time"));
    }
    validate_days_of_week(&obligation.days_of_week)?;
    if let Some(end) = obligation.end_date {
        if end < obligation.start_date {
            return Err(ApiError::validation("end_date must not precede start_date"));
        }
    }
    validate_priority(obligation.priority)?;

    let mut tx = pool.begin().await?;
    let obligation = obligations::update_fixed(&mut *tx, &obligation).await?;
    if regenerate {
        recurrence::regenerate_fixed_events(&mut *tx, &obligation, clock.now()).await?;
    }
    tx.commit().await?;

    let outcome = if regenerate {
        Some(
            coordinator::reschedule(
                pool,
                config,
                clock,
                RescheduleRequest {
                    student_id,
                    newly_created_obligation_id: Some(obligation.obligation_id),
                    week_start: None,
                },
                cancel,
            )
            .await?,
        )
    } else {
        None
    };
    Ok((obligation, outcome))
}

/// Deletes the obligation; its events cascade with it, then the calendar
/// is re-optimized.
pub async fn delete_fixed(
    pool: &Pool<Sqlite>,
    config: &Config,
    clock: &dyn Clock,
    student_id: i64,
    obligation_id: i64,
    cancel: &CancellationToken,
) -> Result<RescheduleOutcome, ApiError> {
    if obligations::delete_fixed(pool, student_id, obligation_id).await? == 0 {
        return Err(ApiError::not_found("Fixed obligation not found"));
    }
    coordinator::reschedule(
        pool,
        config,
        clock,
        RescheduleRequest {
            student_id,
            newly_created_obligation_id: None,
            week_start: None,
        },
        cancel,
    )
    .await
}

// ---- Flexible obligations ----

#[derive(Debug, serde::Deserialize)]
pub struct FlexibleObligationInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub weekly_target_hours: f64,
    #[serde(default)]
    pub constraints: FlexibleConstraints,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub priority: Option<i64>,
}

fn validate_flexible(input: &FlexibleObligationInput) -> Result<(), ApiError> {
    if !(input.weekly_target_hours.is_finite() && input.weekly_target_hours > 0.0) {
        return Err(ApiError::validation("Weekly target hours must be positive"));
    }
    if let (Some(start), Some(end)) = (input.start_date, input.end_date) {
        if end < start {
            return Err(ApiError::validation("end_date must not precede start_date"));
        }
    }
    if let Some(days) = &input.constraints.days_of_week {
        validate_days_of_week(days)?;
    }
    validate_priority(input.priority.unwrap_or(3))
}

/// Creates the obligation and schedules it; only this obligation's
/// events are replaced, existing placements are regrouped.
pub async fn create_flexible(
    pool: &Pool<Sqlite>,
    config: &Config,
    clock: &dyn Clock,
    student_id: i64,
    input: FlexibleObligationInput,
    cancel: &CancellationToken,
) -> Result<(FlexibleObligation, RescheduleOutcome), ApiError> {
    validate_flexible(&input)?;
    let start_date = input.start_date.or_else(|| Some(clock.now()));

    let obligation = obligations::insert_flexible(
        pool,
        NewFlexibleObligation {
            student_id,
            name: input.name.as_deref(),
            description: input.description.as_deref(),
            weekly_target_hours: input.weekly_target_hours,
            constraints: input.constraints,
            start_date,
            end_date: input.end_date,
            priority: input.priority.unwrap_or(3),
        },
    )
    .await?;
    log::info!(
        "created flexible obligation {} for student {}",
        obligation.obligation_id,
        student_id
    );

    let week_start = input.start_date.filter(|start| *start > clock.now());
    let outcome = coordinator::reschedule(
        pool,
        config,
        clock,
        RescheduleRequest {
            student_id,
            newly_created_obligation_id: Some(obligation.obligation_id),
            week_start,
        },
        cancel,
    )
    .await?;
    Ok((obligation, outcome))
}

pub async fn get_flexible(
    pool: &Pool<Sqlite>,
    student_id: i64,
    obligation_id: i64,
) -> Result<FlexibleObligation, ApiError> {
    obligations::get_flexible(pool, student_id, obligation_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Flexible obligation not found"))
}

pub async fn list_flexible(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<FlexibleObligation>, ApiError> {
    Ok(obligations::list_flexible(pool, student_id).await?)
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct FlexibleObligationPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub weekly_target_hours: Option<f64>,
    pub constraints: Option<FlexibleConstraints>,
    pub start_date: Option<Option<DateTime<Utc>>>,
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub priority: Option<i64>,
}

impl FlexibleObligationPatch {
    fn touches_schedule(&self) -> bool {
        self.weekly_target_hours.is_some()
            || self.constraints.is_some()
            || self.start_date.is_some()
            || self.end_date.is_some()
            || self.priority.is_some()
    }
}

pub async fn update_flexible(
    pool: &Pool<Sqlite>,
    config: &Config,
    clock: &dyn Clock,
    student_id: i64,
    obligation_id: i64,
    patch: FlexibleObligationPatch,
    cancel: &CancellationToken,
) -> Result<(FlexibleObligation, Option<RescheduleOutcome>), ApiError> {
    let mut obligation = get_flexible(pool, student_id, obligation_id).await?;
    let resolve = patch.touches_schedule();

    if let Some(name) = patch.name {
        obligation.name = Some(name);
    }
    if let Some(description) = patch.description {
        obligation.description = Some(description);
    }
    if let Some(hours) = patch.weekly_target_hours {
        obligation.weekly_target_hours = hours;
    }
    if let Some(constraints) = patch.constraints {
        obligation.constraints = constraints;
    }
    if let Some(start_date) = patch.start_date {
        obligation.start_date = start_date;
    }
    if let Some(end_date) = patch.end_date {
        obligation.end_date = end_date;
    }
    if let Some(priority) = patch.priority {
        obligation.priority = priority;
    }

    if !(obligation.weekly_target_hours.is_finite() && obligation.weekly_target_hours > 0.0) {
        return Err(ApiError::validation("Weekly target hours must be positive"));
    }
    if let (Some(start), Some(end)) = (obligation.start_date, obligation.end_date) {
        if end < start {
            return Err(ApiError::validation("end_date must not precede start_date"));
        }
    }
    if let Some(days) = &obligation.constraints.days_of_week {
        validate_days_of_week(days)?;
    }
    validate_priority(obligation.priority)?;

    let obligation = obligations::update_flexible(pool, &obligation).await?;

    let outcome = if resolve {
        Some(
            coordinator::reschedule(
                pool,
                config,
                clock,
                RescheduleRequest {
                    student_id,
                    newly_created_obligation_id: Some(obligation.obligation_id),
                    week_start: None,
                },
                cancel,
            )
            .await?,
        )
    } else {
        None
    };
    Ok((obligation, outcome))
}

pub async fn delete_flexible(
    pool: &Pool<Sqlite>,
    config: &Config,
    clock: &dyn Clock,
    student_id: i64,
    obligation_id: i64,
    cancel: &CancellationToken,
) -> Result<RescheduleOutcome, ApiError> {
    if obligations::delete_flexible(pool, student_id, obligation_id).await? == 0 {
        return Err(ApiError::not_found("Flexible obligation not found"));
    }
    coordinator::reschedule(
        pool,
        config,
        clock,
        RescheduleRequest {
            student_id,
            newly_created_obligation_id: None,
            week_start: None,
        },
        cancel,
    )
    .await
}
