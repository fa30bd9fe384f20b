use sqlx::{Pool, Sqlite};

use crate::db::store::students::{self, NewStudent};
use crate::error::ApiError;
use crate::models::{Student, StudentPreferences};

#[derive(Debug, serde::Deserialize)]
pub struct StudentInput {
    pub email: String,
    pub name: String,
    pub program: Option<String>,
    pub year: Option<i64>,
    #[serde(default)]
    pub preferences: StudentPreferences,
}

pub async fn create_student(
    pool: &Pool<Sqlite>,
    input: StudentInput,
) -> Result<Student, ApiError> {
    if input.email.trim().is_empty() || !input.email.contains('@') {
        return Err(ApiError::validation("A valid email is required"));
    }
    if input.name.trim().is_empty() {
        return Err(ApiError::validation("Name must not be empty"));
    }

    // Unique-email violations surface as Conflict via the sqlx mapping.
    let student = students::insert(
        pool,
        NewStudent {
            email: input.email.trim(),
            name: input.name.trim(),
            program: input.program.as_deref(),
            year: input.year,
            preferences: input.preferences,
        },
    )
    .await?;
    log::info!("created student {} ({})", student.student_id, student.email);
    Ok(student)
}

pub async fn get_student(pool: &Pool<Sqlite>, student_id: i64) -> Result<Student, ApiError> {
    students::get(pool, student_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))
}

pub async fn update_preferences(
    pool: &Pool<Sqlite>,
    student_id: i64,
    preferences: StudentPreferences,
) -> Result<Student, ApiError> {
    students::update_preferences(pool, student_id, &preferences)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))
}

/// Deletes the student and, through cascades, every row they own.
pub async fn delete_student(pool: &Pool<Sqlite>, student_id: i64) -> Result<(), ApiError> {
    if students::delete(pool, student_id).await? == 0 {
        return Err(ApiError::not_found("Student not found"));
    }
    Ok(())
}
