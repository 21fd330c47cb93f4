use crate::utils::multipart::DicomMultipart;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Per-file outcome of an ingestion request.
///
/// `StoredPendingMetadata` is deliberately distinct from both `Stored` and
/// `Failed`: the bytes are durable on disk, but the metadata row could not be
/// written because the store went away mid-request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileStatus {
	Stored,
	Duplicate,
	Rejected,
	Failed,
	StoredPendingMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
	Success,
	Partial,
	Failed,
}

#[derive(Debug, Serialize)]
pub struct UploadResult {
	pub filename: String,
	pub status: FileStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

impl UploadResult {
	pub fn stored(filename: impl Into<String>) -> Self {
		Self {
			filename: filename.into(),
			status: FileStatus::Stored,
			reason: None,
		}
	}

	pub fn duplicate(filename: impl Into<String>) -> Self {
		Self {
			filename: filename.into(),
			status: FileStatus::Duplicate,
			reason: None,
		}
	}

	pub fn rejected(filename: impl Into<String>, reason: impl Into<String>) -> Self {
		Self {
			filename: filename.into(),
			status: FileStatus::Rejected,
			reason: Some(reason.into()),
		}
	}

	pub fn failed(filename: impl Into<String>, reason: impl Into<String>) -> Self {
		Self {
			filename: filename.into(),
			status: FileStatus::Failed,
			reason: Some(reason.into()),
		}
	}

	pub fn pending_metadata(filename: impl Into<String>, reason: impl Into<String>) -> Self {
		Self {
			filename: filename.into(),
			status: FileStatus::StoredPendingMetadata,
			reason: Some(reason.into()),
		}
	}

	pub const fn succeeded(&self) -> bool {
		matches!(self.status, FileStatus::Stored | FileStatus::Duplicate)
	}
}

#[derive(Debug, Serialize)]
pub struct StoreResponse {
	pub overall_status: OverallStatus,
	pub results: Vec<UploadResult>,
}

impl StoreResponse {
	pub fn from_results(results: Vec<UploadResult>) -> Self {
		let succeeded = results.iter().filter(|result| result.succeeded()).count();
		let overall_status = if !results.is_empty() && succeeded == results.len() {
			OverallStatus::Success
		} else if succeeded > 0 {
			OverallStatus::Partial
		} else {
			OverallStatus::Failed
		};
		Self {
			overall_status,
			results,
		}
	}
}

/// Boundary between the HTTP layer and the ingestion pipeline.
#[async_trait]
pub trait StoreService: Send + Sync {
	async fn store(
		&self,
		study_id: &str,
		multipart: DicomMultipart<'static>,
	) -> Result<StoreResponse, StoreError>;
}

/// Request-level failures. Per-file failures never surface here; they are
/// captured in the corresponding [`UploadResult`] instead.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("invalid study identifier: {0}")]
	InvalidIdentifier(String),
	#[error("multipart form contained no `files` parts")]
	NoFilesProvided,
	#[error("metadata store unavailable: {0}")]
	StorageUnavailable(String),
	#[error("failed to read multipart stream: {0}")]
	Multipart(#[from] multer::Error),
}
