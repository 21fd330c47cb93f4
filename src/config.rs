use serde::{Deserialize, Deserializer};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub server: ServerConfig,
	pub storage: StorageConfig,
	pub database: DatabaseConfig,
	pub ingest: IngestConfig,
}

impl AppConfig {
	pub fn new() -> Result<Self, config::ConfigError> {
		use config::Config;
		let s = Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("config.toml").required(false))
			.add_source(config::Environment::with_prefix("DICOM_VAULT").separator("_"))
			.build()?;

		let mut config: Self = s.try_deserialize()?;

		// The compose environment supplies the connection string as a bare
		// DATABASE_URL, so honor it over the layered configuration.
		if let Ok(url) = std::env::var("DATABASE_URL") {
			config.database.url = url;
		}

		Ok(config)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	/// Logging level. Also configurable via RUST_LOG.
	#[serde(deserialize_with = "deserialize_level")]
	pub level: tracing::Level,
	/// Sentry DSN. Sentry is disabled when unset.
	pub sentry: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
	pub http: HttpServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
	/// The interface the ingestion server will be listening on.
	pub interface: IpAddr,
	pub port: u16,
	/// Maximum request body size in bytes.
	pub max_upload_size: usize,
	/// Seconds before an in-flight request is aborted.
	pub request_timeout: u64,
	pub graceful_shutdown: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
	/// Root directory for stored files. Typically a mounted volume.
	pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
	/// Connection string; `postgres://` or `sqlite://` schemes are supported.
	pub url: String,
	pub max_connections: u32,
	/// Seconds to wait for a pooled connection.
	pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
	/// Upper bound on files processed concurrently within one request.
	pub max_parallel_files: usize,
	/// Seconds allowed per file for disk placement and metadata recording.
	pub io_timeout: u64,
	/// Media types accepted for upload parts.
	pub accepted_media_types: Vec<String>,
	/// Require the DICM magic at offset 128 before accepting a part.
	pub require_dicom_preamble: bool,
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<tracing::Level, D::Error>
where
	D: Deserializer<'de>,
{
	let level = String::deserialize(deserializer)?;
	level.parse().map_err(serde::de::Error::custom)
}
