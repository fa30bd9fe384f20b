use sqlx::SqliteExecutor;

use crate::models::{Course, MeetingTime, StudentCourse};

const COLUMNS: &str = "course_id, course_crn, course_code, course_name, semester, credits, \
                       actual_enrollment, max_enrollment, instructor, timetable";

pub struct CourseUpsert<'a> {
    pub course_crn: i64,
    pub course_code: &'a str,
    pub course_name: &'a str,
    pub semester: &'a str,
    pub credits: i64,
    pub actual_enrollment: i64,
    pub max_enrollment: i64,
    pub instructor: Option<&'a str>,
    pub timetable: Vec<MeetingTime>,
}

/// Catalog sync entry point: insert-or-update keyed by CRN.
pub async fn upsert_by_crn<'e>(
    ex: impl SqliteExecutor<'e>,
    course: CourseUpsert<'_>,
) -> Result<Course, sqlx::Error> {
    let timetable =
        serde_json::to_string(&course.timetable).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query_as::<_, Course>(&format!(
        "INSERT INTO courses (course_crn, course_code, course_name, semester, credits, \
                              actual_enrollment, max_enrollment, instructor, timetable) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(course_crn) DO UPDATE SET \
             course_code = excluded.course_code, \
             course_name = excluded.course_name, \
             semester = excluded.semester, \
             credits = excluded.credits, \
             actual_enrollment = excluded.actual_enrollment, \
             max_enrollment = excluded.max_enrollment, \
             instructor = excluded.instructor, \
             timetable = excluded.timetable \
         RETURNING {COLUMNS}"
    ))
    .bind(course.course_crn)
    .bind(course.course_code)
    .bind(course.course_name)
    .bind(course.semester)
    .bind(course.credits)
    .bind(course.actual_enrollment)
    .bind(course.max_enrollment)
    .bind(course.instructor)
    .bind(timetable)
    .fetch_one(ex)
    .await
}

pub async fn get<'e>(
    ex: impl SqliteExecutor<'e>,
    course_id: i64,
) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(&format!("SELECT {COLUMNS} FROM courses WHERE course_id = ?"))
        .bind(course_id)
        .fetch_optional(ex)
        .await
}

pub async fn list<'e>(ex: impl SqliteExecutor<'e>) -> Result<Vec<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(&format!(
        "SELECT {COLUMNS} FROM courses ORDER BY course_code, course_crn"
    ))
    .fetch_all(ex)
    .await
}

pub async fn register<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    course_id: i64,
) -> Result<StudentCourse, sqlx::Error> {
    sqlx::query_as::<_, StudentCourse>(
        "INSERT INTO student_courses (student_id, course_id) VALUES (?, ?) \
         RETURNING student_course_id, student_id, course_id, registered_at",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(ex)
    .await
}

pub async fn drop_registration<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    course_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM student_courses WHERE student_id = ? AND course_id = ?")
        .bind(student_id)
        .bind(course_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

pub async fn is_registered<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
    course_id: i64,
) -> Result<bool, sqlx::Error> {
    let row: Option<i64> = sqlx::query_scalar(
        "SELECT student_course_id FROM student_courses WHERE student_id = ? AND course_id = ?",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(ex)
    .await?;
    Ok(row.is_some())
}

pub async fn list_registered<'e>(
    ex: impl SqliteExecutor<'e>,
    student_id: i64,
) -> Result<Vec<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        "SELECT c.course_id, c.course_crn, c.course_code, c.course_name, c.semester, c.credits, \
                c.actual_enrollment, c.max_enrollment, c.instructor, c.timetable \
         FROM courses c \
         JOIN student_courses sc ON sc.course_id = c.course_id \
         WHERE sc.student_id = ? ORDER BY c.course_code",
    )
    .bind(student_id)
    .fetch_all(ex)
    .await
}
