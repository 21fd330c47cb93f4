use crate::config::DatabaseConfig;
use crate::metadata::models::{
	FilePrecheck, NewStoredFile, RecordOutcome, StoredFileRow, StudyRow,
};
use crate::metadata::{schema_statements, MetadataError, MetadataResult, MetadataStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &str = include_str!("sqlite_schema.sql");

/// SQLite-backed metadata store for development and tests.
pub struct SqliteStore {
	pool: Pool<Sqlite>,
}

impl SqliteStore {
	pub async fn from_url(url: &str, config: &DatabaseConfig) -> MetadataResult<Self> {
		let opts = SqliteConnectOptions::from_str(url)?
			.create_if_missing(true)
			.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
			.synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
			.foreign_keys(true)
			// Prevents transient "database is locked" errors under concurrent access.
			.busy_timeout(Duration::from_secs(config.acquire_timeout));

		// SQLite permits limited write concurrency; a single connection keeps
		// concurrent upserts serialized instead of failing with lock errors.
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.acquire_timeout(Duration::from_secs(config.acquire_timeout))
			.connect_with(opts)
			.await?;

		Ok(Self { pool })
	}

	/// Fresh in-memory store with the schema applied. Test convenience.
	pub async fn in_memory() -> MetadataResult<Self> {
		let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(opts)
			.await?;
		let store = Self { pool };
		store.migrate().await?;
		Ok(store)
	}
}

#[async_trait]
impl MetadataStore for SqliteStore {
	async fn migrate(&self) -> MetadataResult<()> {
		for statement in schema_statements(SCHEMA) {
			sqlx::query(statement).execute(&self.pool).await?;
		}
		Ok(())
	}

	async fn health_check(&self) -> MetadataResult<()> {
		sqlx::query("SELECT 1").execute(&self.pool).await?;
		Ok(())
	}

	async fn ensure_study(&self, study_id: &str, now: DateTime<Utc>) -> MetadataResult<StudyRow> {
		let inserted = sqlx::query_as::<_, StudyRow>(
			"INSERT INTO studies (study_id, created_at) VALUES (?1, ?2) \
			 ON CONFLICT (study_id) DO NOTHING \
			 RETURNING study_key, study_id, created_at",
		)
		.bind(study_id)
		.bind(now)
		.fetch_optional(&self.pool)
		.await?;

		if let Some(row) = inserted {
			return Ok(row);
		}

		sqlx::query_as::<_, StudyRow>(
			"SELECT study_key, study_id, created_at FROM studies WHERE study_id = ?1",
		)
		.bind(study_id)
		.fetch_one(&self.pool)
		.await
		.map_err(Into::into)
	}

	async fn precheck_file(
		&self,
		study_key: i64,
		digest: &str,
		stored_path: &str,
	) -> MetadataResult<FilePrecheck> {
		if let Some(row) = self.find_file(study_key, digest).await? {
			return Ok(FilePrecheck::Duplicate(row));
		}

		let taken: Option<(i64,)> =
			sqlx::query_as("SELECT file_key FROM stored_files WHERE stored_path = ?1")
				.bind(stored_path)
				.fetch_optional(&self.pool)
				.await?;

		Ok(if taken.is_some() {
			FilePrecheck::PathTaken
		} else {
			FilePrecheck::Clear
		})
	}

	async fn record_file(&self, file: NewStoredFile) -> MetadataResult<RecordOutcome> {
		// Same two-step upsert as the PostgreSQL store: a suppressed conflict
		// followed by a SELECT that tells a duplicate apart from a path clash.
		let inserted = sqlx::query_as::<_, StoredFileRow>(
			"INSERT INTO stored_files \
			 (study_key, filename, stored_path, content_length, content_digest, created_at) \
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
			 ON CONFLICT DO NOTHING \
			 RETURNING file_key, study_key, filename, stored_path, content_length, \
			           content_digest, created_at",
		)
		.bind(file.study_key)
		.bind(&file.filename)
		.bind(&file.stored_path)
		.bind(file.content_length)
		.bind(&file.content_digest)
		.bind(Utc::now())
		.fetch_optional(&self.pool)
		.await?;

		if let Some(row) = inserted {
			return Ok(RecordOutcome::Inserted(row));
		}

		match self.find_file(file.study_key, &file.content_digest).await? {
			Some(row) => Ok(RecordOutcome::Duplicate(row)),
			None => Err(MetadataError::PathConflict(file.stored_path)),
		}
	}

	async fn study_file_count(&self, study_key: i64) -> MetadataResult<i64> {
		let (count,): (i64,) =
			sqlx::query_as("SELECT COUNT(*) FROM stored_files WHERE study_key = ?1")
				.bind(study_key)
				.fetch_one(&self.pool)
				.await?;
		Ok(count)
	}

	async fn find_file(
		&self,
		study_key: i64,
		digest: &str,
	) -> MetadataResult<Option<StoredFileRow>> {
		sqlx::query_as::<_, StoredFileRow>(
			"SELECT file_key, study_key, filename, stored_path, content_length, \
			        content_digest, created_at \
			 FROM stored_files WHERE study_key = ?1 AND content_digest = ?2",
		)
		.bind(study_key)
		.bind(digest)
		.fetch_optional(&self.pool)
		.await
		.map_err(Into::into)
	}
}
