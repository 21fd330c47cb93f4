use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A logical grouping of stored files under a shared external identifier.
/// Created implicitly by the first upload that references it.
#[derive(Debug, Clone, FromRow)]
pub struct StudyRow {
	pub study_key: i64,
	pub study_id: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StoredFileRow {
	pub file_key: i64,
	pub study_key: i64,
	pub filename: String,
	pub stored_path: String,
	pub content_length: i64,
	pub content_digest: String,
	pub created_at: DateTime<Utc>,
}

/// Insert payload for a freshly placed file.
#[derive(Debug, Clone)]
pub struct NewStoredFile {
	pub study_key: i64,
	pub filename: String,
	pub stored_path: String,
	pub content_length: i64,
	pub content_digest: String,
}

/// Result of the idempotent upsert in [`super::MetadataStore::record_file`].
#[derive(Debug)]
pub enum RecordOutcome {
	Inserted(StoredFileRow),
	Duplicate(StoredFileRow),
}

/// Fast-path check before any bytes are placed at a final location.
#[derive(Debug)]
pub enum FilePrecheck {
	/// Neither the digest nor the path is known yet.
	Clear,
	/// Identical bytes are already recorded for this study.
	Duplicate(StoredFileRow),
	/// The path is occupied by a file with different content.
	PathTaken,
}
