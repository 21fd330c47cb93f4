use std::path::PathBuf;
use thiserror::Error;

/// Longest permitted study id or filename in bytes.
/// Matches the common filesystem limit for a single path component.
const MAX_COMPONENT_LEN: usize = 255;

/// Characters that are replaced during filename sanitization.
/// Covers the Windows-reserved set plus shell-hostile quoting characters.
const RESERVED: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\'', '`', '$'];

#[derive(Debug, Error)]
pub enum PathError {
	#[error("invalid identifier: {0}")]
	InvalidIdentifier(String),
}

/// Validates a study identifier taken from a URL path segment.
///
/// A study id doubles as a directory name under the storage root, so it must
/// already be clean: ASCII letters, digits, `.`, `-` and `_` only. Unlike
/// filenames it is never sanitized, because silently rewriting the id would
/// detach uploads from the study the client asked for.
pub fn validate_study_id(study_id: &str) -> Result<&str, PathError> {
	if study_id.is_empty() {
		return Err(PathError::InvalidIdentifier("study id is empty".to_owned()));
	}
	if study_id.len() > MAX_COMPONENT_LEN {
		return Err(PathError::InvalidIdentifier(format!(
			"study id exceeds {MAX_COMPONENT_LEN} bytes"
		)));
	}
	if study_id == "." || study_id == ".." {
		return Err(PathError::InvalidIdentifier(format!(
			"study id `{study_id}` is a relative path component"
		)));
	}
	if !study_id
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
	{
		return Err(PathError::InvalidIdentifier(format!(
			"study id `{study_id}` contains disallowed characters"
		)));
	}
	Ok(study_id)
}

/// Reduces a client-provided filename to a safe single path component.
///
/// Directory components are stripped first (clients may send full paths),
/// then control characters and reserved characters are replaced with `_`.
/// Returns an error if nothing usable remains.
pub fn sanitize_filename(filename: &str) -> Result<String, PathError> {
	// Only the final path component matters, regardless of separator flavor.
	let name = filename.rsplit(['/', '\\']).next().unwrap_or("");
	if name.is_empty() {
		return Err(PathError::InvalidIdentifier(
			"filename is empty".to_owned(),
		));
	}
	if name.len() > MAX_COMPONENT_LEN {
		return Err(PathError::InvalidIdentifier(format!(
			"filename exceeds {MAX_COMPONENT_LEN} bytes"
		)));
	}
	if name == "." || name == ".." {
		return Err(PathError::InvalidIdentifier(format!(
			"filename `{name}` is a relative path component"
		)));
	}

	let sanitized: String = name
		.chars()
		.map(|c| {
			if c.is_control() || RESERVED.contains(&c) {
				'_'
			} else {
				c
			}
		})
		.collect();

	if sanitized.chars().all(|c| matches!(c, '_' | '.' | ' ')) {
		return Err(PathError::InvalidIdentifier(format!(
			"filename `{name}` contains only disallowed characters"
		)));
	}

	Ok(sanitized)
}

/// A resolved storage location: a validated study id paired with a
/// sanitized filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
	study_id: String,
	filename: String,
}

impl ResolvedPath {
	/// Path relative to the storage root.
	pub fn relative(&self) -> PathBuf {
		PathBuf::from(&self.study_id).join(&self.filename)
	}

	/// Canonical `<study>/<file>` form, as recorded in the `stored_path`
	/// database column. Always uses forward slashes.
	pub fn stored_path(&self) -> String {
		format!("{}/{}", self.study_id, self.filename)
	}

	pub fn filename(&self) -> &str {
		&self.filename
	}
}

/// Computes the storage location for a file.
///
/// The result is always `<study_id>/<sanitized filename>`: exactly two
/// components, neither of which can contain a separator or `..`, so joining
/// it to the root can never escape the root. The mapping is deterministic;
/// repeated calls with the same inputs yield the same path.
pub fn resolve(study_id: &str, filename: &str) -> Result<ResolvedPath, PathError> {
	let study = validate_study_id(study_id)?;
	let name = sanitize_filename(filename)?;
	Ok(ResolvedPath {
		study_id: study.to_owned(),
		filename: name,
	})
}
