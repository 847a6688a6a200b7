//! Restore orchestration.

use std::{
	fs::File,
	io::BufReader,
	path::{Path, PathBuf},
	time::Duration,
};

use migrator_engine::{Backup, KubernetesRestorer, Restore, RestoreRequest, RestoreResult};
use tracing::{info, instrument, warn};

use crate::{config::RunConfig, error::MigratorError, k8s::client::ClusterConnection};

/// Order in which resources are restored; anything not listed follows.
pub const RESTORE_PRIORITIES: [&str; 16] = [
	"customresourcedefinitions.apiextensions.k8s.io",
	"namespaces",
	"storageclasses.storage.k8s.io",
	"volumesnapshotclasses.snapshot.storage.k8s.io",
	"volumesnapshotcontents.snapshot.storage.k8s.io",
	"volumesnapshots.snapshot.storage.k8s.io",
	"persistentvolumes",
	"persistentvolumeclaims",
	"secrets",
	"configmaps",
	"serviceaccounts",
	"limitranges",
	"pods",
	// Not the extensions group, which serves the same objects
	"replicasets.apps",
	"clusters.cluster.x-k8s.io",
	"clusterresourcesets.addons.cluster.x-k8s.io",
];

/// What to restore and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreDescriptor {
	pub namespace: String,
	pub name: String,
	pub backup_name: String,
	pub path: PathBuf,
	pub priorities: Vec<String>,
	pub resource_terminating_timeout: Duration,
}

impl RestoreDescriptor {
	/// The namespace filter only applies to backups; a restore replays the
	/// whole archive.
	pub fn new(config: &RunConfig, path: &Path) -> Self {
		Self {
			namespace: config.namespace.clone(),
			name: config.restore_name.clone(),
			backup_name: config.backup_name.clone(),
			path: path.to_path_buf(),
			priorities: RESTORE_PRIORITIES.map(String::from).to_vec(),
			resource_terminating_timeout: config.resource_terminating_timeout,
		}
	}

	fn to_backup(&self) -> Backup {
		Backup::builder()
			.namespace(&self.namespace)
			.name(&self.backup_name)
			.build()
	}

	fn to_restore(&self) -> Restore {
		Restore::builder()
			.namespace(&self.namespace)
			.name(&self.name)
			.backup(&self.backup_name)
			.build()
	}
}

/// Restore the descriptor's archive file into the connected cluster.
#[instrument(skip_all, fields(path = %descriptor.path.display()))]
pub async fn restore(
	connection: &ClusterConnection,
	descriptor: &RestoreDescriptor,
) -> Result<RestoreResult, MigratorError> {
	let file = open_archive_file(&descriptor.path)?;
	let backup = descriptor.to_backup();
	let restore = descriptor.to_restore();

	let restorer = KubernetesRestorer::new(
		connection.discovery(),
		connection.dynamic(),
		descriptor.priorities.clone(),
		connection.core().namespaces(),
		descriptor.resource_terminating_timeout,
	);
	let result = restorer
		.restore(RestoreRequest {
			backup: &backup,
			restore: &restore,
			backup_reader: BufReader::new(file),
		})
		.await?;

	for warning in &result.warnings {
		warn!(%warning, "restore warning");
	}
	let result = result.ensure_complete()?;
	info!(restored = result.restored, "restore completed");
	Ok(result)
}

pub fn open_archive_file(path: &Path) -> Result<File, MigratorError> {
	File::open(path).map_err(|source| MigratorError::FileIo {
		action: "opening",
		path: path.to_path_buf(),
		source,
	})
}
