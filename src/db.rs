//! Delivery cache: maps a submitted YouTube URL to the audio already posted
//! in the channel. Works with raw SQL and primitive types only.

use std::{str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};

use crate::{
    errors::{BotError, BotResult},
    migrations,
};

const MAX_CONNECTIONS: u32 = 5;

/// A row of `audio_files`
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAudio {
    pub source_url: String,
    pub delivery_handle: String,
    pub delivery_link: Option<String>,
    pub display_name: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl CachedAudio {
    fn from_row(row: &SqliteRow) -> Self {
        let created_at: Option<i64> = row.get("created_at");
        Self {
            source_url: row.get("source_url"),
            delivery_handle: row.get("delivery_handle"),
            delivery_link: row.get("delivery_link"),
            display_name: row.get("display_name"),
            created_at: created_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        }
    }
}

/// Outcome of a cache lookup. A storage failure is not a miss.
#[derive(Debug)]
pub enum CacheLookup {
    Hit(CachedAudio),
    Miss,
    Unavailable(BotError),
}

#[derive(Clone)]
pub struct AudioCache {
    pool: Arc<SqlitePool>,
}

impl AudioCache {
    /// Connect to the database (creating the file if needed) and apply migrations
    pub async fn connect(database_url: &str) -> BotResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| BotError::config(format!("invalid DATABASE_URL: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        migrations::run_migrations(&pool).await?;

        Ok(Self::new(Arc::new(pool)))
    }

    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub async fn lookup(&self, source_url: &str) -> CacheLookup {
        match self.get(source_url).await {
            Ok(Some(audio)) => CacheLookup::Hit(audio),
            Ok(None) => CacheLookup::Miss,
            Err(e) => CacheLookup::Unavailable(e),
        }
    }

    pub async fn get(&self, source_url: &str) -> BotResult<Option<CachedAudio>> {
        let row = sqlx::query(
            "SELECT source_url, delivery_handle, delivery_link, display_name, created_at FROM audio_files WHERE source_url = ?",
        )
        .bind(source_url)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.as_ref().map(CachedAudio::from_row))
    }

    /// Insert the row unless `source_url` is already stored. Existing rows are
    /// never overwritten. Returns whether a row was written.
    pub async fn insert_if_absent(&self, audio: &CachedAudio) -> BotResult<bool> {
        let created_at = audio.created_at.unwrap_or_else(Utc::now).timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO audio_files (source_url, delivery_handle, delivery_link, display_name, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(source_url) DO NOTHING
            "#,
        )
        .bind(&audio.source_url)
        .bind(&audio.delivery_handle)
        .bind(&audio.delivery_link)
        .bind(&audio.display_name)
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn count(&self) -> BotResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM audio_files")
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }
}
