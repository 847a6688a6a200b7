//! Recreating archived resources on a cluster.

use std::{
	collections::{BTreeMap, HashSet},
	io::Read,
	time::Duration,
};

use k8s_openapi::{api::core::v1::Namespace, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::api::{Api, DynamicObject, PostParams};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{
	api::{Backup, Restore},
	archive::{ArchiveEntry, ArchiveReader},
	client::DynamicFactory,
	discovery::{DiscoveredResource, Helper},
	error::EngineError,
};

/// How often a terminating namespace is re-checked.
const NAMESPACE_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct RestoreRequest<'a, R> {
	/// Backup the archive was produced from; its namespace filter narrows
	/// what gets restored.
	pub backup: &'a Backup,
	pub restore: &'a Restore,
	pub backup_reader: R,
}

/// Per-item outcome of a restore.
#[derive(Debug, Clone, Default)]
pub struct RestoreResult {
	pub restored: usize,
	pub warnings: Vec<String>,
	pub errors: Vec<String>,
}

impl RestoreResult {
	/// Turn a result carrying item errors into an error.
	pub fn ensure_complete(self) -> Result<Self, EngineError> {
		if self.errors.is_empty() {
			Ok(self)
		} else {
			Err(EngineError::Incomplete {
				errors: self.errors,
			})
		}
	}
}

#[derive(Debug, Error)]
enum ItemError {
	#[error("namespace {namespace} still terminating after {timeout:?}")]
	Terminating { namespace: String, timeout: Duration },

	#[error(transparent)]
	Kube(#[from] kube::Error),

	#[error("archived object is not a valid resource")]
	Object(#[source] serde_json::Error),
}

enum NamespaceState {
	Active,
	Absent,
}

pub struct KubernetesRestorer<'a> {
	discovery: &'a Helper,
	dynamic: &'a DynamicFactory,
	priorities: Vec<String>,
	namespaces: Api<Namespace>,
	resource_terminating_timeout: Duration,
}

impl<'a> KubernetesRestorer<'a> {
	pub fn new(
		discovery: &'a Helper,
		dynamic: &'a DynamicFactory,
		priorities: Vec<String>,
		namespaces: Api<Namespace>,
		resource_terminating_timeout: Duration,
	) -> Self {
		Self {
			discovery,
			dynamic,
			priorities,
			namespaces,
			resource_terminating_timeout,
		}
	}

	#[instrument(skip_all, fields(restore = request.restore.name(), backup = %request.restore.spec.backup_name))]
	pub async fn restore<R: Read>(&self, request: RestoreRequest<'_, R>) -> Result<RestoreResult, EngineError> {
		let reader = ArchiveReader::open(request.backup_reader)?;
		let archived = reader.header().backup.name().to_string();
		if archived != request.restore.spec.backup_name {
			return Err(EngineError::BackupMismatch {
				expected: request.restore.spec.backup_name.clone(),
				found: archived,
			});
		}

		let mut by_resource: BTreeMap<String, Vec<ArchiveEntry>> = BTreeMap::new();
		for entry in reader {
			let entry = entry?;
			let namespace = match &entry.namespace {
				Some(ns) => ns.as_str(),
				None if entry.resource == "namespaces" => entry.name(),
				None => "",
			};
			if !namespace.is_empty() && !request.backup.includes_namespace(namespace) {
				continue;
			}
			by_resource.entry(entry.resource.clone()).or_default().push(entry);
		}

		let order = restore_order(&self.priorities, by_resource.keys());
		let mut result = RestoreResult::default();
		let mut ready_namespaces = HashSet::new();

		for resource in order {
			let entries = by_resource.remove(&resource).unwrap_or_default();
			let Some(discovered) = self.discovery.resource_for(&resource) else {
				warn!(resource = %resource, items = entries.len(), "resource not served by target cluster");
				result.warnings.push(format!(
					"{resource}: not served by the target cluster, skipped {} item(s)",
					entries.len()
				));
				continue;
			};

			debug!(resource = %resource, items = entries.len(), "restoring resource");
			for entry in &entries {
				self.restore_item(discovered, entry, &mut ready_namespaces, &mut result)
					.await;
			}
		}

		info!(
			restored = result.restored,
			warnings = result.warnings.len(),
			errors = result.errors.len(),
			"restore finished"
		);
		Ok(result)
	}

	async fn restore_item(
		&self,
		resource: &DiscoveredResource,
		entry: &ArchiveEntry,
		ready_namespaces: &mut HashSet<String>,
		result: &mut RestoreResult,
	) {
		let group_resource = resource.group_resource();
		let name = entry.name();

		if group_resource == "namespaces" {
			match self.await_namespace(name).await {
				Ok(NamespaceState::Active) => {
					ready_namespaces.insert(name.to_string());
					result
						.warnings
						.push(format!("namespaces/{name}: already exists"));
					return;
				}
				Ok(NamespaceState::Absent) => {}
				Err(e) => {
					result.errors.push(format!("namespaces/{name}: {e}"));
					return;
				}
			}
		}

		let namespace = entry
			.namespace
			.as_deref()
			.filter(|_| resource.is_namespaced());
		if let Some(ns) = namespace {
			if !ready_namespaces.contains(ns) {
				if let Err(e) = self.ensure_namespace(ns).await {
					result.errors.push(format!("{group_resource}/{ns}/{name}: {e}"));
					return;
				}
				ready_namespaces.insert(ns.to_string());
			}
		}

		let item = match namespace {
			Some(ns) => format!("{group_resource}/{ns}/{name}"),
			None => format!("{group_resource}/{name}"),
		};
		match self.create(resource, namespace, entry).await {
			Ok(true) => {
				result.restored += 1;
				if group_resource == "namespaces" {
					ready_namespaces.insert(name.to_string());
				}
			}
			Ok(false) => result.warnings.push(format!("{item}: already exists")),
			Err(e) => {
				warn!(item = %item, error = %e, "could not restore item");
				result.errors.push(format!("{item}: {e}"));
			}
		}
	}

	/// Create the object, returning `false` when it already exists.
	async fn create(
		&self,
		resource: &DiscoveredResource,
		namespace: Option<&str>,
		entry: &ArchiveEntry,
	) -> Result<bool, ItemError> {
		let object: DynamicObject = serde_json::from_value(entry.object.clone()).map_err(ItemError::Object)?;
		let api = self.dynamic.client_for(&resource.api_resource, namespace);

		match api.create(&PostParams::default(), &object).await {
			Ok(_) => Ok(true),
			Err(kube::Error::Api(ref err)) if err.code == 409 => Ok(false),
			Err(e) => Err(e.into()),
		}
	}

	/// Make sure `name` exists and is not terminating, creating it if absent.
	async fn ensure_namespace(&self, name: &str) -> Result<(), ItemError> {
		if let NamespaceState::Active = self.await_namespace(name).await? {
			return Ok(());
		}

		let namespace = Namespace {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				..ObjectMeta::default()
			},
			..Namespace::default()
		};
		match self.namespaces.create(&PostParams::default(), &namespace).await {
			Ok(_) => Ok(()),
			Err(kube::Error::Api(ref err)) if err.code == 409 => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	/// Wait, bounded by the terminating timeout, for a terminating namespace
	/// to go away.
	async fn await_namespace(&self, name: &str) -> Result<NamespaceState, ItemError> {
		let deadline = Instant::now() + self.resource_terminating_timeout;

		loop {
			match self.namespaces.get_opt(name).await? {
				None => return Ok(NamespaceState::Absent),
				Some(ns) if is_terminating(&ns) => {
					let now = Instant::now();
					if now >= deadline {
						return Err(ItemError::Terminating {
							namespace: name.to_string(),
							timeout: self.resource_terminating_timeout,
						});
					}
					debug!(namespace = %name, "waiting for terminating namespace");
					tokio::time::sleep(NAMESPACE_POLL_INTERVAL.min(deadline - now)).await;
				}
				Some(_) => return Ok(NamespaceState::Active),
			}
		}
	}
}

fn is_terminating(namespace: &Namespace) -> bool {
	namespace.metadata.deletion_timestamp.is_some()
		|| namespace
			.status
			.as_ref()
			.and_then(|status| status.phase.as_deref())
			== Some("Terminating")
}

/// Prioritized resources first, in priority order, then everything else in
/// name order.
fn restore_order<'k>(priorities: &[String], resources: impl Iterator<Item = &'k String>) -> Vec<String> {
	let mut rest: Vec<String> = resources.cloned().collect();
	let mut order = Vec::with_capacity(rest.len());

	for priority in priorities {
		if let Some(pos) = rest.iter().position(|r| r == priority) {
			order.push(rest.remove(pos));
		}
	}
	rest.sort();
	order.extend(rest);
	order
}

#[cfg(test)]
mod tests {
	use k8s_openapi::api::core::v1::NamespaceStatus;

	use super::*;

	fn strings(values: &[&str]) -> Vec<String> {
		values.iter().map(ToString::to_string).collect()
	}

	#[test]
	fn test_priorities_come_first() {
		let priorities = strings(&["namespaces", "secrets", "pods", "replicasets.apps"]);
		let present = strings(&["deployments.apps", "pods", "configmaps", "namespaces", "replicasets.apps"]);

		assert_eq!(
			restore_order(&priorities, present.iter()),
			strings(&["namespaces", "pods", "replicasets.apps", "configmaps", "deployments.apps"])
		);
	}

	#[test]
	fn test_priority_match_is_exact() {
		let priorities = strings(&["replicasets.apps"]);
		let present = strings(&["replicasets.extensions", "replicasets.apps"]);

		assert_eq!(
			restore_order(&priorities, present.iter()),
			strings(&["replicasets.apps", "replicasets.extensions"])
		);
	}

	#[test]
	fn test_terminating_namespace_detection() {
		let active = Namespace::default();
		let terminating = Namespace {
			status: Some(NamespaceStatus {
				phase: Some("Terminating".to_string()),
				..NamespaceStatus::default()
			}),
			..Namespace::default()
		};

		assert!(!is_terminating(&active));
		assert!(is_terminating(&terminating));
	}

	#[test]
	fn test_incomplete_result_is_an_error() {
		let ok = RestoreResult {
			restored: 3,
			..RestoreResult::default()
		};
		assert!(ok.ensure_complete().is_ok());

		let failed = RestoreResult {
			errors: vec!["pods/default/web: boom".to_string()],
			..RestoreResult::default()
		};
		assert!(matches!(
			failed.ensure_complete(),
			Err(EngineError::Incomplete { errors }) if errors.len() == 1
		));
	}
}
