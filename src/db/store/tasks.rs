use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::models::{AcademicTask, StudySession, TaskType};

const TASK_COLUMNS: &str =
    "task_id, course_id, task_type, title, description, deadline, estimated_hours, status";
const SESSION_COLUMNS: &str = "session_id, student_id, task_id, description, estimated_hours, \
                               preferred_chunk_size, priority, start_date, end_date";

pub struct NewAcademicTask<'a> {
    pub course_id: i64,
    pub task_type: TaskType,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub deadline: DateTime<Utc>,
    pub estimated_hours: Option<f64>,
}

pub async fn insert<'e>(
    ex: impl SqliteExecutor<'e>,
    task: NewAcademicTask<'_>,
) -> Result<AcademicTask, sqlx::Error> {
    sqlx::query_as::<_, AcademicTask>(&format!(
        "INSERT INTO academic_tasks (course_id, task_type, title, description, deadline, estimated_hours) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING {TASK_COLUMNS}"
    ))
    .bind(task.course_id)
    .bind(task.task_type)
    .bind(task.title)
    .bind(task.description)
    .bind(task.deadline)
    .bind(task.estimated_hours)
    .fetch_one(ex)
    .await
}

pub async fn get<'e>(
    ex: impl SqliteExecutor<'e>,
    task_id: i64,
) -> Result<Option<AcademicTask>, sqlx::Error> {
    sqlx::query_as::<_, AcademicTask>(&format!(
        "SELECT {TASK_COLUMNS} FROM academic_tasks WHERE task_id = ?"
    ))
    .bind(task_id)
    .fetch_optional(ex)
    .await
}

pub async fn list_for_course<'e>(
    ex: impl SqliteExecutor<'e>,
    course_id: i64,
) -> Result<Vec<AcademicTask>, sqlx::Error> {
    sqlx::query_as::<_, AcademicTask>(&format!(
        "SELECT {TASK_COLUMNS} FROM academic_tasks WHERE course_id = ? ORDER BY deadline"
    ))
    .bind(course_id)
    .fetch_all(ex)
    .await
}

/// Tasks of the student's registered courses, earliest deadline first.
pub async fn list_for_student<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<Vec<AcademicTask>, sqlx::Error> {
    sqlx::query_as::<_, AcademicTask>(
        "SELECT t.task_id, t.course_id, t.task_type, t.title, t.description, t.deadline, \
                t.estimated_hours, t.status \
         FROM academic_tasks t \
         JOIN student_courses sc ON sc.course_id = t.course_id \
         WHERE sc.student_id = ? ORDER BY t.deadline, t.task_id",
    )
    .bind(student_id)
    .fetch_all(ex)
    .await
}

pub async fn update<'e>(
    ex: impl SqliteExecutor<'e>,
    task: &AcademicTask,
) -> Result<AcademicTask, sqlx::Error> {
    sqlx::query_as::<_, AcademicTask>(&format!(
        "UPDATE academic_tasks SET task_type = ?, title = ?, description = ?, deadline = ?, \
             estimated_hours = ?, status = ? \
         WHERE task_id = ? RETURNING {TASK_COLUMNS}"
    ))
    .bind(task.task_type)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.deadline)
    .bind(task.estimated_hours)
    .bind(task.status)
    .bind(task.task_id)
    .fetch_one(ex)
    .await
}

pub async fn delete<'e>(ex: impl SqliteExecutor<'e>, task_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM academic_tasks WHERE task_id = ?")
        .bind(task_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

/// Flips pending tasks whose deadline has passed to overdue.
pub async fn mark_overdue<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE academic_tasks SET status = 'overdue' \
         WHERE status = 'pending' AND deadline < ? AND course_id IN \
               (SELECT course_id FROM student_courses WHERE student_id = ?)",
    )
    .bind(now)
    .bind(student_id)
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

/// One scheduling record per (student, task); created lazily by the
/// reschedule coordinator so study-session events have a row to point at.
pub async fn get_or_create_study_session<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    task: &AcademicTask,
) -> Result<StudySession, sqlx::Error> {
    sqlx::query_as::<_, StudySession>(&format!(
        "INSERT INTO study_sessions (student_id, task_id, description, estimated_hours, end_date) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(student_id, task_id) DO UPDATE SET \
             description = excluded.description, \
             estimated_hours = excluded.estimated_hours, \
             end_date = excluded.end_date \
         RETURNING {SESSION_COLUMNS}"
    ))
    .bind(student_id)
    .bind(task.task_id)
    .bind(&task.title)
    .bind(task.estimated_hours)
    .bind(task.deadline)
    .fetch_one(ex)
    .await
}
