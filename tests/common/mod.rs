#![allow(dead_code)] // each test binary uses a different subset

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

use planora::api;
use planora::models::{Student, StudentPreferences};
use planora::{Config, FixedClock};

/// Monday 2024-06-03 00:00 UTC, the anchor for every scenario.
pub fn monday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
}

pub fn clock() -> FixedClock {
    FixedClock(monday())
}

pub fn config() -> Config {
    Config::default()
}

pub async fn pool() -> Pool<Sqlite> {
    let _ = env_logger::builder().is_test(true).try_init();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("enable foreign keys");
    planora::db::migrations::run_migrations(&pool)
        .await
        .expect("run migrations");
    pool
}

pub async fn student(pool: &Pool<Sqlite>, email: &str) -> Student {
    student_with_preferences(pool, email, StudentPreferences::default()).await
}

pub async fn student_with_preferences(
    pool: &Pool<Sqlite>,
    email: &str,
    preferences: StudentPreferences,
) -> Student {
    api::students::create_student(
        pool,
        api::students::StudentInput {
            email: email.to_string(),
            name: "Test Student".to_string(),
            program: Some("CS".to_string()),
            year: Some(3),
            preferences,
        },
    )
    .await
    .expect("create student")
}
