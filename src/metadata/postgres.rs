use crate::config::DatabaseConfig;
use crate::metadata::models::{
	FilePrecheck, NewStoredFile, RecordOutcome, StoredFileRow, StudyRow,
};
use crate::metadata::{schema_statements, MetadataError, MetadataResult, MetadataStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &str = include_str!("postgres_schema.sql");

/// PostgreSQL-backed metadata store. This is the production store.
pub struct PostgresStore {
	pool: Pool<Postgres>,
}

impl PostgresStore {
	pub async fn from_url(url: &str, config: &DatabaseConfig) -> MetadataResult<Self> {
		let opts = PgConnectOptions::from_str(url)?;
		let pool = PgPoolOptions::new()
			.max_connections(config.max_connections)
			.acquire_timeout(Duration::from_secs(config.acquire_timeout))
			.connect_with(opts)
			.await?;
		Ok(Self { pool })
	}
}

#[async_trait]
impl MetadataStore for PostgresStore {
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
			"INSERT INTO studies (study_id, created_at) VALUES ($1, $2) \
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
			"SELECT study_key, study_id, created_at FROM studies WHERE study_id = $1",
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
			sqlx::query_as("SELECT file_key FROM stored_files WHERE stored_path = $1")
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
		// ON CONFLICT DO NOTHING without a target suppresses both unique
		// constraints; the follow-up SELECT disambiguates which one fired.
		let inserted = sqlx::query_as::<_, StoredFileRow>(
			"INSERT INTO stored_files \
			 (study_key, filename, stored_path, content_length, content_digest, created_at) \
			 VALUES ($1, $2, $3, $4, $5, $6) \
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
			sqlx::query_as("SELECT COUNT(*) FROM stored_files WHERE study_key = $1")
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
			 FROM stored_files WHERE study_key = $1 AND content_digest = $2",
		)
		.bind(study_key)
		.bind(digest)
		.fetch_optional(&self.pool)
		.await
		.map_err(Into::into)
	}
}
