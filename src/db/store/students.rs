use sqlx::SqliteExecutor;

use crate::models::{Student, StudentPreferences};

const COLUMNS: &str = "student_id, email, name, program, year, preferences, created_at";

pub struct NewStudent<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub program: Option<&'a str>,
    pub year: Option<i64>,
    pub preferences: StudentPreferences,
}

pub async fn insert<'e>(
    ex: impl SqliteExecutor<'e>,
    student: NewStudent<'_>,
) -> Result<Student, sqlx::Error> {
    let preferences = serde_json::to_string(&student.preferences)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, Student>(&format!(
        "INSERT INTO students (email, name, program, year, preferences) \
         VALUES (?, ?, ?, ?, ?) RETURNING {COLUMNS}"
    ))
    .bind(student.email)
    .bind(student.name)
    .bind(student.program)
    .bind(student.year)
    .bind(preferences)
    .fetch_one(ex)
    .await
}

pub async fn get<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!(
        "SELECT {COLUMNS} FROM students WHERE student_id = ?"
    ))
    .bind(student_id)
    .fetch_optional(ex)
    .await
}

pub async fn get_by_email<'e>(
    ex: impl SqliteExecutor<'e>,
    email: &str,
) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!("SELECT {COLUMNS} FROM students WHERE email = ?"))
        .bind(email)
        .fetch_optional(ex)
        .await
}

pub async fn update_preferences<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    preferences: &StudentPreferences,
) -> Result<Option<Student>, sqlx::Error> {
    let raw = serde_json::to_string(preferences).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, Student>(&format!(
        "UPDATE students SET preferences = ? WHERE student_id = ? RETURNING {COLUMNS}"
    ))
    .bind(raw)
    .bind(student_id)
    .fetch_optional(ex)
    .await
}

/// Removes the student; every owned row goes with it via cascades.
pub async fn delete<'e>(ex: impl SqliteExecutor<'e>, student_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM students WHERE student_id = ?")
        .bind(student_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}
