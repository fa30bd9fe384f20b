use sqlx::{migrate::MigrateError, Pool, Sqlite};

pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), MigrateError> {
    sqlx::migrate!("src/db/migrations").run(pool).await
}
