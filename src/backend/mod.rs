pub mod ingest;

use crate::api::store::StoreService;
use crate::config::AppConfig;
use crate::metadata;
use crate::storage::FileStorage;
use ingest::IngestionService;
use std::sync::Arc;
use tracing::info;

/// Builds the ingestion pipeline from the application config: file storage
/// under the configured root, a metadata store reached via the configured
/// URL, and the orchestrator wired on top.
pub async fn from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn StoreService>> {
	let storage = FileStorage::new(config.storage.root.clone())?;
	let metadata = metadata::connect(&config.database).await?;
	metadata.migrate().await?;
	info!(
		root = %config.storage.root.display(),
		"Initialized file storage and metadata store"
	);
	Ok(Arc::new(IngestionService::new(
		storage,
		metadata,
		config.ingest.clone(),
	)))
}
