//! Database migrations using sqlx built-in migration system.
//!
//! Migrations are stored in the `migrations/` directory.
//! Each migration file is named `NNNN_description.sql`.

use sqlx::SqlitePool;
use sqlx::migrate::Migrator;

use crate::errors::BotResult;

// Embed migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run all pending migrations using sqlx migrate
pub async fn run_migrations(pool: &SqlitePool) -> BotResult<()> {
    MIGRATOR.run(pool).await?;

    log::info!("Database migrations completed successfully");
    Ok(())
}
