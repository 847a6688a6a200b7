//! Backup orchestration.

use std::{
	fs::{self, File},
	io::BufWriter,
	path::{Path, PathBuf},
};

use migrator_engine::{Backup, BackupRequest, BackupSummary, KubernetesBackupper};
use tracing::{info, instrument, warn};

use crate::{config::RunConfig, error::MigratorError, k8s::client::ClusterConnection};

/// What to back up and where to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDescriptor {
	pub namespace: String,
	pub name: String,
	pub included_namespaces: Vec<String>,
	pub path: PathBuf,
}

impl BackupDescriptor {
	pub fn new(config: &RunConfig, path: &Path, included_namespaces: &[String]) -> Self {
		Self {
			namespace: config.namespace.clone(),
			name: config.backup_name.clone(),
			included_namespaces: included_namespaces.to_vec(),
			path: path.to_path_buf(),
		}
	}

	/// The control object handed to the engine. Pod volumes are never backed
	/// up through restic.
	pub fn to_backup(&self) -> Backup {
		Backup::builder()
			.namespace(&self.namespace)
			.name(&self.name)
			.included_namespaces(self.included_namespaces.clone())
			.default_volumes_to_restic(false)
			.build()
	}
}

/// Back up the connected cluster into the descriptor's archive file.
#[instrument(skip_all, fields(path = %descriptor.path.display()))]
pub async fn backup(
	connection: &ClusterConnection,
	descriptor: &BackupDescriptor,
) -> Result<BackupSummary, MigratorError> {
	let file = create_archive_file(&descriptor.path)?;
	let backup = descriptor.to_backup();

	let backupper = KubernetesBackupper::new(
		connection.versioned(),
		connection.discovery(),
		connection.dynamic(),
		connection.pod_exec(),
	);
	let summary = backupper
		.backup(&BackupRequest { backup: &backup }, BufWriter::new(file))
		.await?;

	for warning in &summary.warnings {
		warn!(%warning, "backup warning");
	}
	info!(items = summary.items, "backup completed");
	Ok(summary)
}

/// Create the archive file, and any missing parent directories.
pub fn create_archive_file(path: &Path) -> Result<File, MigratorError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|source| MigratorError::FileIo {
			action: "creating directory",
			path: parent.to_path_buf(),
			source,
		})?;
	}

	File::create(path).map_err(|source| MigratorError::FileIo {
		action: "creating",
		path: path.to_path_buf(),
		source,
	})
}
