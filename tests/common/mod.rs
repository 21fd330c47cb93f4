//! Shared harness for the HTTP integration tests: a router wired to tempdir
//! file storage and a SQLite metadata store, plus multipart body builders.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request};
use axum::Router;
use chrono::{DateTime, Utc};
use dicom_vault::api::store::StoreService;
use dicom_vault::backend::ingest::IngestionService;
use dicom_vault::config::{
	AppConfig, DatabaseConfig, HttpServerConfig, IngestConfig, ServerConfig, StorageConfig,
	TelemetryConfig,
};
use dicom_vault::metadata::models::{
	FilePrecheck, NewStoredFile, RecordOutcome, StoredFileRow, StudyRow,
};
use dicom_vault::metadata::{MetadataError, MetadataResult, MetadataStore, SqliteStore};
use dicom_vault::storage::FileStorage;
use dicom_vault::{router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const BOUNDARY: &str = "dicom-vault-test-boundary";

pub struct TestApp {
	pub router: Router,
	pub storage_root: PathBuf,
	pub metadata: Arc<dyn MetadataStore>,
	_tmp: TempDir,
}

impl TestApp {
	pub async fn spawn() -> Self {
		Self::spawn_with(|store| store, |_| {}).await
	}

	/// Harness whose metadata store accepts reads but fails every
	/// `record_file` as unavailable, simulating an outage that starts after
	/// the request's pre-flight health check passed.
	#[allow(dead_code)]
	pub async fn spawn_failing_record() -> Self {
		Self::spawn_with(
			|store| Arc::new(FailingRecordStore { inner: store }) as Arc<dyn MetadataStore>,
			|_| {},
		)
		.await
	}

	/// Harness that insists on the 132-byte DICM preamble before storing.
	#[allow(dead_code)]
	pub async fn spawn_sniffing() -> Self {
		Self::spawn_with(|store| store, |ingest| ingest.require_dicom_preamble = true).await
	}

	/// Harness whose metadata store stalls every `record_file` well past the
	/// configured per-file deadline.
	#[allow(dead_code)]
	pub async fn spawn_stalled_record() -> Self {
		Self::spawn_with(
			|store| Arc::new(StalledRecordStore { inner: store }) as Arc<dyn MetadataStore>,
			|ingest| ingest.io_timeout = 1,
		)
		.await
	}

	async fn spawn_with(
		wrap: impl FnOnce(Arc<dyn MetadataStore>) -> Arc<dyn MetadataStore>,
		tweak: impl FnOnce(&mut IngestConfig),
	) -> Self {
		let tmp = tempfile::tempdir().expect("Failed to create temp directory");
		let root = tmp.path().join("storage");
		let db_path = tmp.path().join("metadata.db");
		let mut config = test_config(
			root.clone(),
			format!("sqlite://{}?mode=rwc", db_path.display()),
		);
		tweak(&mut config.ingest);

		let store = SqliteStore::from_url(&config.database.url, &config.database)
			.await
			.expect("Failed to open sqlite store");
		store.migrate().await.expect("Failed to migrate");
		let metadata = wrap(Arc::new(store) as Arc<dyn MetadataStore>);

		let storage = FileStorage::new(root.clone()).expect("Failed to init storage");
		let ingest: Arc<dyn StoreService> = Arc::new(IngestionService::new(
			storage,
			Arc::clone(&metadata),
			config.ingest.clone(),
		));

		let state = AppState {
			config,
			store: ingest,
		};

		Self {
			router: router(state),
			storage_root: root,
			metadata,
			_tmp: tmp,
		}
	}
}

fn test_config(root: PathBuf, db_url: String) -> AppConfig {
	AppConfig {
		telemetry: TelemetryConfig {
			level: tracing::Level::INFO,
			sentry: None,
		},
		server: ServerConfig {
			http: HttpServerConfig {
				interface: [127, 0, 0, 1].into(),
				port: 0,
				max_upload_size: 16 * 1024 * 1024,
				request_timeout: 30,
				graceful_shutdown: false,
			},
		},
		storage: StorageConfig { root },
		database: DatabaseConfig {
			url: db_url,
			max_connections: 1,
			acquire_timeout: 5,
		},
		ingest: IngestConfig {
			max_parallel_files: 4,
			io_timeout: 10,
			accepted_media_types: vec!["application/dicom".to_owned()],
			require_dicom_preamble: false,
		},
	}
}

/// A minimal DICOM Part 10 prefix: 128 preamble bytes, the `DICM` magic,
/// then the payload.
#[allow(dead_code)]
pub fn dicm_bytes(payload: &[u8]) -> Vec<u8> {
	let mut bytes = vec![0u8; 128];
	bytes.extend_from_slice(b"DICM");
	bytes.extend_from_slice(payload);
	bytes
}

/// Builds a `multipart/form-data` body with one `files` part per entry of
/// `(filename, content type, bytes)`.
pub fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
	let mut body = Vec::new();
	for (filename, content_type, bytes) in parts {
		body.extend_from_slice(
			format!(
				"--{BOUNDARY}\r\n\
				 Content-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\n\
				 Content-Type: {content_type}\r\n\r\n"
			)
			.as_bytes(),
		);
		body.extend_from_slice(bytes);
		body.extend_from_slice(b"\r\n");
	}
	body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
	body
}

pub fn store_request(uri: &str, body: Vec<u8>) -> Request<Body> {
	Request::builder()
		.method(Method::POST)
		.uri(uri)
		.header(
			CONTENT_TYPE,
			format!("multipart/form-data; boundary={BOUNDARY}"),
		)
		.body(Body::from(body))
		.expect("Failed to build request")
}

/// Delegates everything to a real store except `record_file`, which always
/// reports the store as unavailable.
struct FailingRecordStore {
	inner: Arc<dyn MetadataStore>,
}

#[async_trait]
impl MetadataStore for FailingRecordStore {
	async fn migrate(&self) -> MetadataResult<()> {
		self.inner.migrate().await
	}

	async fn health_check(&self) -> MetadataResult<()> {
		self.inner.health_check().await
	}

	async fn ensure_study(&self, study_id: &str, now: DateTime<Utc>) -> MetadataResult<StudyRow> {
		self.inner.ensure_study(study_id, now).await
	}

	async fn precheck_file(
		&self,
		study_key: i64,
		digest: &str,
		stored_path: &str,
	) -> MetadataResult<FilePrecheck> {
		self.inner.precheck_file(study_key, digest, stored_path).await
	}

	async fn record_file(&self, _file: NewStoredFile) -> MetadataResult<RecordOutcome> {
		Err(MetadataError::Unavailable(sqlx::Error::PoolClosed))
	}

	async fn study_file_count(&self, study_key: i64) -> MetadataResult<i64> {
		self.inner.study_file_count(study_key).await
	}

	async fn find_file(
		&self,
		study_key: i64,
		digest: &str,
	) -> MetadataResult<Option<StoredFileRow>> {
		self.inner.find_file(study_key, digest).await
	}
}

/// Delegates everything to a real store except `record_file`, which hangs far
/// longer than any per-file deadline the tests configure.
struct StalledRecordStore {
	inner: Arc<dyn MetadataStore>,
}

#[async_trait]
impl MetadataStore for StalledRecordStore {
	async fn migrate(&self) -> MetadataResult<()> {
		self.inner.migrate().await
	}

	async fn health_check(&self) -> MetadataResult<()> {
		self.inner.health_check().await
	}

	async fn ensure_study(&self, study_id: &str, now: DateTime<Utc>) -> MetadataResult<StudyRow> {
		self.inner.ensure_study(study_id, now).await
	}

	async fn precheck_file(
		&self,
		study_key: i64,
		digest: &str,
		stored_path: &str,
	) -> MetadataResult<FilePrecheck> {
		self.inner.precheck_file(study_key, digest, stored_path).await
	}

	async fn record_file(&self, file: NewStoredFile) -> MetadataResult<RecordOutcome> {
		tokio::time::sleep(std::time::Duration::from_secs(60)).await;
		self.inner.record_file(file).await
	}

	async fn study_file_count(&self, study_key: i64) -> MetadataResult<i64> {
		self.inner.study_file_count(study_key).await
	}

	async fn find_file(
		&self,
		study_key: i64,
		digest: &str,
	) -> MetadataResult<Option<StoredFileRow>> {
		self.inner.find_file(study_key, digest).await
	}
}
