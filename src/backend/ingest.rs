use crate::api::store::{StoreError, StoreResponse, StoreService, UploadResult};
use crate::config::IngestConfig;
use crate::metadata::models::{FilePrecheck, NewStoredFile, RecordOutcome, StudyRow};
use crate::metadata::{MetadataError, MetadataStore};
use crate::storage::path;
use crate::storage::{FileStorage, SpooledUpload, StorageError};
use crate::utils::multipart::DicomMultipart;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Form field that carries uploads; everything else is ignored.
const UPLOAD_FIELD: &str = "files";

/// Preamble (128 bytes) plus the DICM magic.
const PREAMBLE_LEN: usize = 132;

const UNNAMED: &str = "(unnamed)";

/// Coordinates one ingestion request end to end: receives the multipart
/// parts, spools them to disk, places each file and records its metadata.
///
/// Files are processed independently; one file failing never aborts its
/// siblings. The response preserves part order so clients can match results
/// to what they sent.
pub struct IngestionService {
	storage: FileStorage,
	metadata: Arc<dyn MetadataStore>,
	config: IngestConfig,
}

/// A part as it came off the wire. Invalid parts are carried through so the
/// response can report them in their original position.
enum ReceivedPart {
	Spooled {
		filename: String,
		spool: SpooledUpload,
	},
	Rejected {
		filename: String,
		reason: String,
	},
	Failed {
		filename: String,
		reason: String,
	},
}

impl IngestionService {
	pub fn new(
		storage: FileStorage,
		metadata: Arc<dyn MetadataStore>,
		config: IngestConfig,
	) -> Self {
		Self {
			storage,
			metadata,
			config,
		}
	}

	fn accepts(&self, declared: &mime::Mime) -> bool {
		self.config
			.accepted_media_types
			.iter()
			.any(|accepted| accepted.eq_ignore_ascii_case(declared.essence_str()))
	}

	/// Drains the multipart stream, spooling each `files` part to disk while
	/// its digest accumulates. Transport errors abort the request; everything
	/// else becomes a per-part outcome.
	async fn receive(
		&self,
		mut multipart: DicomMultipart<'static>,
	) -> Result<Vec<ReceivedPart>, StoreError> {
		let mut parts = Vec::new();

		while let Some(mut field) = multipart.next_field().await? {
			if field.name() != Some(UPLOAD_FIELD) {
				debug!(field = ?field.name(), "Skipping unrelated form field");
				continue;
			}

			let filename = match field.file_name() {
				Some(name) if !name.is_empty() => name.to_owned(),
				_ => {
					parts.push(ReceivedPart::Rejected {
						filename: UNNAMED.to_owned(),
						reason: "part has no filename".to_owned(),
					});
					continue;
				}
			};

			let declared = field
				.content_type()
				.cloned()
				.unwrap_or(mime::APPLICATION_OCTET_STREAM);
			if !self.accepts(&declared) {
				parts.push(ReceivedPart::Rejected {
					filename,
					reason: format!("unsupported media type `{declared}`"),
				});
				continue;
			}

			let mut writer = match self.storage.create_spool().await {
				Ok(writer) => writer,
				Err(err) => {
					error!(%err, "Failed to open spool file");
					parts.push(ReceivedPart::Failed {
						filename,
						reason: format!("i/o failure: {err}"),
					});
					continue;
				}
			};

			let mut write_error = None;
			loop {
				match field.chunk().await {
					Ok(Some(chunk)) => {
						if let Err(err) = writer.write_chunk(chunk).await {
							write_error = Some(err);
							break;
						}
					}
					Ok(None) => break,
					// A broken transport invalidates the rest of the stream.
					Err(err) => return Err(StoreError::Multipart(err)),
				}
			}

			if let Some(err) = write_error {
				error!(%err, %filename, "Failed to spool upload");
				parts.push(ReceivedPart::Failed {
					filename,
					reason: format!("i/o failure: {err}"),
				});
				continue;
			}

			let spool = match writer.finish().await {
				Ok(spool) => spool,
				Err(err) => {
					error!(%err, %filename, "Failed to sync spool file");
					parts.push(ReceivedPart::Failed {
						filename,
						reason: format!("i/o failure: {err}"),
					});
					continue;
				}
			};

			if spool.len == 0 {
				parts.push(ReceivedPart::Rejected {
					filename,
					reason: "empty file".to_owned(),
				});
				continue;
			}

			if self.config.require_dicom_preamble && !self.sniffs_dicom(&spool).await {
				parts.push(ReceivedPart::Rejected {
					filename,
					reason: "missing DICM preamble".to_owned(),
				});
				continue;
			}

			parts.push(ReceivedPart::Spooled { filename, spool });
		}

		Ok(parts)
	}

	async fn sniffs_dicom(&self, spool: &SpooledUpload) -> bool {
		match self.storage.read_prefix(spool, PREAMBLE_LEN).await {
			Ok(head) => infer::get(&head).is_some_and(|kind| kind.mime_type() == "application/dicom"),
			Err(err) => {
				warn!(%err, "Failed to sniff spooled upload");
				false
			}
		}
	}

	async fn process_part(&self, study: &StudyRow, part: ReceivedPart) -> UploadResult {
		match part {
			ReceivedPart::Rejected { filename, reason } => {
				debug!(%filename, %reason, "Rejected upload part");
				UploadResult::rejected(filename, reason)
			}
			ReceivedPart::Failed { filename, reason } => UploadResult::failed(filename, reason),
			ReceivedPart::Spooled { filename, spool } => {
				let timeout = Duration::from_secs(self.config.io_timeout);
				match tokio::time::timeout(timeout, self.place_and_record(study, &filename, spool))
					.await
				{
					Ok(result) => result,
					Err(_) => {
						warn!(%filename, ?timeout, "Gave up on file after i/o timeout");
						UploadResult::failed(filename, "timed out")
					}
				}
			}
		}
	}

	/// Moves a spooled file into place and records it. The digest was
	/// computed during spooling, so duplicates are discarded before any
	/// final placement happens.
	async fn place_and_record(
		&self,
		study: &StudyRow,
		filename: &str,
		spool: SpooledUpload,
	) -> UploadResult {
		let resolved = match path::resolve(&study.study_id, filename) {
			Ok(resolved) => resolved,
			Err(err) => return UploadResult::rejected(filename, err.to_string()),
		};
		let stored_path = resolved.stored_path();

		match self
			.metadata
			.precheck_file(study.study_key, &spool.digest, &stored_path)
			.await
		{
			Ok(FilePrecheck::Duplicate(_)) => return UploadResult::duplicate(filename),
			Ok(FilePrecheck::PathTaken) => {
				return UploadResult::failed(
					filename,
					format!(
						"`{}` is already stored with different content",
						resolved.filename()
					),
				)
			}
			Ok(FilePrecheck::Clear) => {}
			Err(MetadataError::Unavailable(err)) => {
				warn!(%err, %filename, "Metadata store went away before placement");
				return UploadResult::failed(filename, "metadata store unavailable");
			}
			Err(err) => return UploadResult::failed(filename, err.to_string()),
		}

		// Placed or already present with identical bytes, either way the
		// content is durable at the resolved path from here on.
		match self.storage.promote(&spool, &resolved.relative()).await {
			Ok(_) => {}
			Err(StorageError::Conflict(path)) => {
				return UploadResult::failed(
					filename,
					format!("existing file at `{path}` has different content"),
				)
			}
			Err(StorageError::Io(err)) => {
				error!(%err, %filename, "Failed to place upload");
				return UploadResult::failed(filename, format!("i/o failure: {err}"));
			}
		}

		let record = NewStoredFile {
			study_key: study.study_key,
			filename: resolved.filename().to_owned(),
			stored_path,
			content_length: spool.len as i64,
			content_digest: spool.digest.clone(),
		};

		match self.metadata.record_file(record).await {
			Ok(RecordOutcome::Inserted(_)) => UploadResult::stored(filename),
			// Lost a race against a concurrent identical upload.
			Ok(RecordOutcome::Duplicate(_)) => UploadResult::duplicate(filename),
			Err(MetadataError::Unavailable(err)) => {
				error!(%err, %filename, "Bytes are on disk but metadata recording failed");
				UploadResult::pending_metadata(
					filename,
					"metadata store unavailable; file retained on disk",
				)
			}
			Err(MetadataError::PathConflict(path)) => UploadResult::failed(
				filename,
				format!("`{path}` was recorded concurrently with different content"),
			),
			Err(err) => UploadResult::failed(filename, err.to_string()),
		}
	}
}

#[async_trait]
impl StoreService for IngestionService {
	async fn store(
		&self,
		study_id: &str,
		multipart: DicomMultipart<'static>,
	) -> Result<StoreResponse, StoreError> {
		path::validate_study_id(study_id)
			.map_err(|err| StoreError::InvalidIdentifier(err.to_string()))?;

		// Pre-flight before anything touches disk, so a dead store fails the
		// request cleanly instead of leaving spooled bytes around.
		self.metadata
			.health_check()
			.await
			.map_err(|err| StoreError::StorageUnavailable(err.to_string()))?;

		let parts = self.receive(multipart).await?;
		if parts.is_empty() {
			return Err(StoreError::NoFilesProvided);
		}

		let study = self
			.metadata
			.ensure_study(study_id, Utc::now())
			.await
			.map_err(|err| StoreError::StorageUnavailable(err.to_string()))?;

		let results = futures::stream::iter(
			parts
				.into_iter()
				.map(|part| self.process_part(&study, part)),
		)
		.buffered(self.config.max_parallel_files.max(1))
		.collect::<Vec<_>>()
		.await;

		debug!(
			study_id,
			files = results.len(),
			"Finished processing ingestion request"
		);
		Ok(StoreResponse::from_results(results))
	}
}
