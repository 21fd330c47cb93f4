pub mod path;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

/// Directory under the storage root that holds in-flight uploads.
const SPOOL_DIR: &str = ".spool";

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("a different file already occupies `{0}`")]
	Conflict(String),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Outcome of moving a spooled upload to its final location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promoted {
	/// The spooled bytes now live at the target path.
	Placed,
	/// The target path already held a byte-identical copy.
	AlreadyPresent,
}

/// Filesystem storage rooted at a single configured directory.
///
/// Uploads are first streamed into a spool file and only linked to their
/// final `<study>/<filename>` location once their digest is known, so a
/// half-written upload can never be observed at a final path.
#[derive(Debug, Clone)]
pub struct FileStorage {
	root: PathBuf,
}

impl FileStorage {
	pub fn new(root: PathBuf) -> std::io::Result<Self> {
		let spool_dir = root.join(SPOOL_DIR);
		std::fs::create_dir_all(&spool_dir)?;
		// Spool entries only matter while their request is in flight; anything
		// left over is an orphan from an earlier crash.
		for entry in std::fs::read_dir(&spool_dir)? {
			let entry = entry?;
			if let Err(err) = std::fs::remove_file(entry.path()) {
				tracing::warn!(%err, path = %entry.path().display(), "Failed to sweep spool entry");
			}
		}
		Ok(Self { root })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Opens a fresh spool file for an incoming upload.
	pub async fn create_spool(&self) -> std::io::Result<SpoolWriter> {
		let path = self.root.join(SPOOL_DIR).join(Uuid::new_v4().to_string());
		let file = File::create(&path).await?;
		Ok(SpoolWriter {
			path,
			file,
			hasher: Sha256::new(),
			len: 0,
			completed: false,
		})
	}

	/// Links a spooled upload to its final location under the root.
	///
	/// Never clobbers: if the target already exists it is re-hashed and the
	/// upload either collapses into it (identical bytes) or fails with a
	/// conflict. The spool file itself is cleaned up by the guard's `Drop`.
	pub async fn promote(
		&self,
		spool: &SpooledUpload,
		relative: &Path,
	) -> Result<Promoted, StorageError> {
		let target = self.root.join(relative);
		if let Some(parent) = target.parent() {
			fs::create_dir_all(parent).await?;
		}
		match fs::hard_link(&spool.path, &target).await {
			Ok(()) => Ok(Promoted::Placed),
			Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
				let existing = self.digest_of(&target).await?;
				if existing == spool.digest {
					Ok(Promoted::AlreadyPresent)
				} else {
					Err(StorageError::Conflict(relative.display().to_string()))
				}
			}
			Err(err) => Err(err.into()),
		}
	}

	/// Streams a stored file through SHA-256 and returns the lowercase hex digest.
	pub async fn digest_of(&self, path: &Path) -> std::io::Result<String> {
		let mut file = File::open(path).await?;
		let mut hasher = Sha256::new();
		let mut buffer = [0u8; 8192];
		loop {
			let n = file.read(&mut buffer).await?;
			if n == 0 {
				break;
			}
			hasher.update(&buffer[..n]);
		}
		Ok(hex::encode(hasher.finalize()))
	}

	/// Reads up to `len` bytes from the start of a spooled upload.
	pub async fn read_prefix(
		&self,
		spool: &SpooledUpload,
		len: usize,
	) -> std::io::Result<Vec<u8>> {
		let mut file = File::open(&spool.path).await?;
		let mut buffer = vec![0u8; len];
		let mut filled = 0;
		while filled < len {
			let n = file.read(&mut buffer[filled..]).await?;
			if n == 0 {
				break;
			}
			filled += n;
		}
		buffer.truncate(filled);
		Ok(buffer)
	}
}

/// Write half of a spool file. Accumulates a SHA-256 digest and byte count
/// while chunks stream in, so the whole part is never buffered in memory.
pub struct SpoolWriter {
	path: PathBuf,
	file: File,
	hasher: Sha256,
	len: u64,
	completed: bool,
}

impl SpoolWriter {
	pub async fn write_chunk(&mut self, chunk: Bytes) -> std::io::Result<()> {
		self.file.write_all(&chunk).await?;
		self.hasher.update(&chunk);
		self.len += chunk.len() as u64;
		Ok(())
	}

	/// Flushes the spool to disk and seals it for promotion.
	pub async fn finish(mut self) -> std::io::Result<SpooledUpload> {
		self.file.sync_all().await?;
		self.completed = true;
		Ok(SpooledUpload {
			path: self.path.clone(),
			digest: hex::encode(std::mem::take(&mut self.hasher).finalize()),
			len: self.len,
		})
	}
}

impl Drop for SpoolWriter {
	fn drop(&mut self) {
		if !self.completed {
			let _ = std::fs::remove_file(&self.path);
		}
	}
}

/// A fully spooled upload, ready for promotion.
///
/// Dropping the guard removes the spool file. Promotion uses a hard link, so
/// the final copy survives the guard going out of scope on every path.
pub struct SpooledUpload {
	pub(crate) path: PathBuf,
	pub digest: String,
	pub len: u64,
}

impl Drop for SpooledUpload {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.path);
	}
}
