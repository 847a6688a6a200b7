use std::{path::PathBuf, time::Duration};

use migrator_engine::EngineError;
use thiserror::Error;

use crate::{
	cli::ValidationError,
	k8s::{credentials::LookupError, ConstructionError},
};

/// Everything that can stop a run.
#[derive(Debug, Error)]
pub enum MigratorError {
	#[error(transparent)]
	Validation(#[from] ValidationError),

	#[error("looking up remote cluster credentials")]
	CredentialLookup(#[from] LookupError),

	#[error("constructing cluster connection")]
	ConnectionConstruction(#[from] ConstructionError),

	#[error("{action} {}", path.display())]
	FileIo {
		action: &'static str,
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("backup/restore engine failed")]
	Engine(#[from] EngineError),

	#[error("run did not finish within {0:?}")]
	Timeout(Duration),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_engine_error_names_neither_action() {
		let error = MigratorError::from(EngineError::Incomplete {
			errors: vec!["namespace demo is terminating".to_string()],
		});

		assert_eq!(error.to_string(), "backup/restore engine failed");
	}
}
