//! Backup and restore control objects.
//!
//! These mirror the `velero.io/v1` `Backup` and `Restore` resources. They are
//! never persisted to the cluster; the engine reads its parameters from them
//! and the backup object is embedded in the archive header.

use bon::bon;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// API version of the control objects.
pub const API_VERSION: &str = "velero.io/v1";

/// Describes what a backup captures.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
	pub api_version: String,
	pub kind: String,
	pub metadata: ObjectMeta,
	pub spec: BackupSpec,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
	/// Namespaces to capture. Empty means every namespace plus
	/// cluster-scoped resources.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub included_namespaces: Vec<String>,

	/// Whether pod volumes are backed up through restic by default.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default_volumes_to_restic: Option<bool>,
}

#[bon]
impl Backup {
	#[builder]
	pub fn new(
		#[builder(into)] namespace: String,
		#[builder(into)] name: String,
		#[builder(default)] included_namespaces: Vec<String>,
		default_volumes_to_restic: Option<bool>,
	) -> Self {
		Self {
			api_version: API_VERSION.to_string(),
			kind: "Backup".to_string(),
			metadata: object_meta(namespace, name),
			spec: BackupSpec {
				included_namespaces,
				default_volumes_to_restic,
			},
		}
	}
}

impl Backup {
	pub fn name(&self) -> &str {
		self.metadata.name.as_deref().unwrap_or_default()
	}

	/// Whether objects in `namespace` fall inside this backup's namespace filter.
	pub fn includes_namespace(&self, namespace: &str) -> bool {
		self.spec.included_namespaces.is_empty()
			|| self
				.spec
				.included_namespaces
				.iter()
				.any(|included| included == "*" || included == namespace)
	}

	/// Whether cluster-scoped resources are captured.
	///
	/// Only unfiltered backups carry cluster-scoped resources; namespace
	/// objects for the included namespaces are captured either way.
	pub fn includes_cluster_resources(&self) -> bool {
		self.spec.included_namespaces.is_empty()
			|| self.spec.included_namespaces.iter().any(|ns| ns == "*")
	}
}

/// Describes a restore of a named backup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Restore {
	pub api_version: String,
	pub kind: String,
	pub metadata: ObjectMeta,
	pub spec: RestoreSpec,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
	pub backup_name: String,
}

#[bon]
impl Restore {
	#[builder]
	pub fn new(
		#[builder(into)] namespace: String,
		#[builder(into)] name: String,
		#[builder(into)] backup: String,
	) -> Self {
		Self {
			api_version: API_VERSION.to_string(),
			kind: "Restore".to_string(),
			metadata: object_meta(namespace, name),
			spec: RestoreSpec {
				backup_name: backup,
			},
		}
	}
}

impl Restore {
	pub fn name(&self) -> &str {
		self.metadata.name.as_deref().unwrap_or_default()
	}
}

fn object_meta(namespace: String, name: String) -> ObjectMeta {
	ObjectMeta {
		name: Some(name),
		namespace: Some(namespace),
		..ObjectMeta::default()
	}
}
