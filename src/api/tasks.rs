use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite};

use crate::clock::Clock;
use crate::db::store::{courses, tasks};
use crate::db::store::tasks::NewAcademicTask;
use crate::error::ApiError;
use crate::models::{AcademicTask, TaskStatus, TaskType};

async fn ensure_registered(
    pool: &Pool<Sqlite>,
    student_id: i64,
    course_id: i64,
) -> Result<(), ApiError> {
    if courses::get(pool, course_id).await?.is_none() {
        return Err(ApiError::not_found("Course not found"));
    }
    if !courses::is_registered(pool, student_id, course_id).await? {
        return Err(ApiError::forbidden(
            "Student is not registered for this course",
        ));
    }
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
pub struct AcademicTaskInput {
    pub course_id: i64,
    pub task_type: TaskType,
    pub title: String,
    pub description: Option<String>,
    pub deadline: DateTime<Utc>,
    pub estimated_hours: Option<f64>,
}

pub async fn create_task(
    pool: &Pool<Sqlite>,
    student_id: i64,
    input: AcademicTaskInput,
) -> Result<AcademicTask, ApiError> {
    ensure_registered(pool, student_id, input.course_id).await?;
    if input.title.trim().is_empty() {
        return Err(ApiError::validation("Title must not be empty"));
    }
    if let Some(hours) = input.estimated_hours {
        if !hours.is_finite() || hours < 0.0 {
            return Err(ApiError::validation("estimated_hours must be non-negative"));
        }
    }

    let task = tasks::insert(
        pool,
        NewAcademicTask {
            course_id: input.course_id,
            task_type: input.task_type,
            title: input.title.trim(),
            description: input.description.as_deref(),
            deadline: input.deadline,
            estimated_hours: input.estimated_hours,
        },
    )
    .await?;
    log::info!("created academic task {} ({})", task.task_id, task.title);
    Ok(task)
}

/// Fetches a task, checking the student can see it through a
/// registration.
pub async fn get_task(
    pool: &Pool<Sqlite>,
    student_id: i64,
    task_id: i64,
) -> Result<AcademicTask, ApiError> {
    let task = tasks::get(pool, task_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Academic task not found"))?;
    if !courses::is_registered(pool, student_id, task.course_id).await? {
        return Err(ApiError::forbidden(
            "Student is not registered for this course",
        ));
    }
    Ok(task)
}

/// Upcoming tasks across the student's registered courses, due within
/// `days` of now.
pub async fn list_upcoming(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    days: i64,
) -> Result<Vec<AcademicTask>, ApiError> {
    let now = clock.now();
    let horizon = now + Duration::days(days);
    let all = tasks::list_for_student(pool, student_id).await?;
    Ok(all
        .into_iter()
        .filter(|t| t.deadline >= now && t.deadline <= horizon)
        .collect())
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct AcademicTaskPatch {
    pub task_type: Option<TaskType>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub status: Option<TaskStatus>,
}

pub async fn update_task(
    pool: &Pool<Sqlite>,
    student_id: i64,
    task_id: i64,
    patch: AcademicTaskPatch,
) -> Result<AcademicTask, ApiError> {
    let mut task = get_task(pool, student_id, task_id).await?;

    if let Some(task_type) = patch.task_type {
        task.task_type = task_type;
    }
    if let Some(title) = patch.title {
        if title.trim().is_empty() {
            return Err(ApiError::validation("Title must not be empty"));
        }
        task.title = title;
    }
    if let Some(description) = patch.description {
        task.description = Some(description);
    }
    if let Some(deadline) = patch.deadline {
        task.deadline = deadline;
    }
    if let Some(hours) = patch.estimated_hours {
        if !hours.is_finite() || hours < 0.0 {
            return Err(ApiError::validation("estimated_hours must be non-negative"));
        }
        task.estimated_hours = Some(hours);
    }
    if let Some(status) = patch.status {
        task.status = status;
    }

    Ok(tasks::update(pool, &task).await?)
}

pub async fn delete_task(
    pool: &Pool<Sqlite>,
    student_id: i64,
    task_id: i64,
) -> Result<(), ApiError> {
    let task = get_task(pool, student_id, task_id).await?;
    tasks::delete(pool, task.task_id).await?;
    Ok(())
}

/// Flips pending past-deadline tasks to overdue; returns how many moved.
pub async fn sweep_overdue(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
) -> Result<u64, ApiError> {
    Ok(tasks::mark_overdue(pool, student_id, clock.now()).await?)
}
