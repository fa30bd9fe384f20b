use sqlx::{Pool, Sqlite};

use crate::clock::Clock;
use crate::db::store::courses::{self, CourseUpsert};
use crate::db::store::events;
use crate::error::ApiError;
use crate::models::{Course, MeetingTime, StudentCourse};
use crate::scheduler::recurrence;

#[derive(Debug, serde::Deserialize)]
pub struct CatalogCourseInput {
    pub course_crn: i64,
    pub course_code: String,
    pub course_name: String,
    pub semester: String,
    pub credits: i64,
    pub actual_enrollment: i64,
    pub max_enrollment: i64,
    pub instructor: Option<String>,
    #[serde(default)]
    pub timetable: Vec<MeetingTime>,
}

/// Upsert keyed by CRN; this is what the external catalog sync calls.
pub async fn upsert_catalog_course(
    pool: &Pool<Sqlite>,
    input: CatalogCourseInput,
) -> Result<Course, ApiError> {
    for entry in &input.timetable {
        if entry.start_time >= entry.end_time {
            return Err(ApiError::validation(format!(
                "course {}: timetable entry ends before it starts",
                input.course_crn
            )));
        }
        crate::scheduler::timegrid::expand_day_letters(&entry.days).map_err(|letter| {
            ApiError::validation(format!(
                "course {}: unknown day letter {:?}",
                input.course_crn, letter
            ))
        })?;
    }

    let course = courses::upsert_by_crn(
        pool,
        CourseUpsert {
            course_crn: input.course_crn,
            course_code: &input.course_code,
            course_name: &input.course_name,
            semester: &input.semester,
            credits: input.credits,
            actual_enrollment: input.actual_enrollment,
            max_enrollment: input.max_enrollment,
            instructor: input.instructor.as_deref(),
            timetable: input.timetable,
        },
    )
    .await?;
    log::info!("upserted course {} (CRN {})", course.course_code, course.course_crn);
    Ok(course)
}

pub async fn get_course(pool: &Pool<Sqlite>, course_id: i64) -> Result<Course, ApiError> {
    courses::get(pool, course_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Course not found"))
}

pub async fn list_courses(pool: &Pool<Sqlite>) -> Result<Vec<Course>, ApiError> {
    Ok(courses::list(pool).await?)
}

pub async fn list_registered_courses(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<Course>, ApiError> {
    Ok(courses::list_registered(pool, student_id).await?)
}

/// Registers the student and materializes the course's lecture events in
/// the same transaction.
pub async fn register_course(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    course_id: i64,
) -> Result<StudentCourse, ApiError> {
    let course = get_course(pool, course_id).await?;

    let mut tx = pool.begin().await?;
    let registration = courses::register(&mut *tx, student_id, course_id).await?;
    let lectures = recurrence::materialize_course_lectures(
        &mut *tx,
        student_id,
        &course,
        clock.now().date_naive(),
    )
    .await?;
    tx.commit().await?;

    log::info!(
        "student {} registered for course {} ({} lecture events)",
        student_id,
        course.course_code,
        lectures
    );
    Ok(registration)
}

/// Drops the registration and removes the course's lecture events.
pub async fn drop_course(
    pool: &Pool<Sqlite>,
    student_id: i64,
    course_id: i64,
) -> Result<(), ApiError> {
    let mut tx = pool.begin().await?;
    let dropped = courses::drop_registration(&mut *tx, student_id, course_id).await?;
    if dropped == 0 {
        return Err(ApiError::not_found("Registration not found"));
    }
    events::delete_course_lectures(&mut *tx, student_id, course_id).await?;
    tx.commit().await?;
    Ok(())
}
