pub mod models;
mod postgres;
mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::config::DatabaseConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{FilePrecheck, NewStoredFile, RecordOutcome, StoredFileRow, StudyRow};
use std::sync::Arc;
use thiserror::Error;

pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
	#[error("metadata store unavailable: {0}")]
	Unavailable(sqlx::Error),
	#[error("storage path `{0}` is already recorded with different content")]
	PathConflict(String),
	#[error("not found: {0}")]
	NotFound(String),
	#[error("database error: {0}")]
	Backend(sqlx::Error),
}

impl From<sqlx::Error> for MetadataError {
	fn from(err: sqlx::Error) -> Self {
		match err {
			sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
				Self::Unavailable(err)
			}
			err => Self::Backend(err),
		}
	}
}

/// Durable store for studies and their files.
///
/// Idempotency lives here: `record_file` is an atomic upsert and the unique
/// `(study_key, content_digest)` index is the final arbiter when two
/// identical uploads race. None of these operations retry internally; the
/// caller decides what an `Unavailable` error means for the request.
#[async_trait]
pub trait MetadataStore: Send + Sync {
	/// Executes the embedded schema. Safe to run repeatedly.
	async fn migrate(&self) -> MetadataResult<()>;

	async fn health_check(&self) -> MetadataResult<()>;

	/// Inserts the study if it does not exist yet and returns its row.
	async fn ensure_study(&self, study_id: &str, now: DateTime<Utc>) -> MetadataResult<StudyRow>;

	/// Checks whether a digest or a path is already recorded for a study,
	/// allowing duplicate bytes to be discarded before final placement.
	async fn precheck_file(
		&self,
		study_key: i64,
		digest: &str,
		stored_path: &str,
	) -> MetadataResult<FilePrecheck>;

	/// Atomic upsert keyed on `(study_key, content_digest)`.
	async fn record_file(&self, file: NewStoredFile) -> MetadataResult<RecordOutcome>;

	async fn study_file_count(&self, study_key: i64) -> MetadataResult<i64>;

	async fn find_file(
		&self,
		study_key: i64,
		digest: &str,
	) -> MetadataResult<Option<StoredFileRow>>;
}

/// Connects to the store selected by the connection URL scheme.
pub async fn connect(config: &DatabaseConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
	if config.url.starts_with("sqlite") {
		Ok(Arc::new(SqliteStore::from_url(&config.url, config).await?))
	} else {
		Ok(Arc::new(PostgresStore::from_url(&config.url, config).await?))
	}
}

/// Splits an embedded schema file into executable statements,
/// dropping comment-only fragments.
pub(crate) fn schema_statements(schema: &str) -> Vec<&str> {
	schema
		.split(';')
		.filter_map(|statement| {
			let trimmed = statement.trim();
			if trimmed.is_empty() {
				return None;
			}
			let has_sql = trimmed.lines().any(|line| {
				let line = line.trim();
				!line.is_empty() && !line.starts_with("--")
			});
			has_sql.then_some(trimmed)
		})
		.collect()
}
