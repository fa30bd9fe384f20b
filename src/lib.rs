//! Planora: a constraint-based academic planner core.
//!
//! The crate places flexible study work and personal obligations around
//! immovable commitments, and maintains a per-student productivity
//! profile derived from session telemetry. External surfaces (HTTP,
//! chat tools, catalog sync) call into [`api`]; everything persists to
//! SQLite via [`db`].

pub mod api;
pub mod behavior;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod scheduler;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{ApiError, ErrorCode};

use sqlx::{Pool, Sqlite};

/// Opens the configured database and brings the schema up to date.
pub async fn init_database(config: &Config) -> Result<Pool<Sqlite>, ApiError> {
    let pool = db::connection::establish_pool(&config.database_url).await?;
    db::migrations::run_migrations(&pool).await?;
    log::info!("database ready at {}", config.database_url);
    Ok(pool)
}
