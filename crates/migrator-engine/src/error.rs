use thiserror::Error;

use crate::archive::ArchiveError;

/// Errors surfaced by the backup and restore engine.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error(transparent)]
	Archive(#[from] ArchiveError),

	#[error("listing {resource}")]
	List {
		resource: String,
		#[source]
		source: kube::Error,
	},

	#[error("serializing object")]
	Serialize(#[source] serde_json::Error),

	#[error("archive holds backup {found:?}, restore expects {expected:?}")]
	BackupMismatch { expected: String, found: String },

	#[error("restore finished with {} error(s), first: {}", .errors.len(), .errors.first().map_or("", String::as_str))]
	Incomplete { errors: Vec<String> },
}
