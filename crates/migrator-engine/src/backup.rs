//! Capturing cluster resources into an archive.

use std::{collections::BTreeMap, io::Write, time::Duration};

use kube::api::{DynamicObject, ListParams};
use tracing::{info, instrument, warn};

use crate::{
	api::Backup,
	archive::{ArchiveEntry, ArchiveWriter},
	client::{DynamicFactory, VersionedClient},
	discovery::{DiscoveredResource, Helper},
	error::EngineError,
	podexec::{ExecHook, PodCommandExecutor, DEFAULT_HOOK_TIMEOUT},
};

const PRE_HOOK_COMMAND: &str = "pre.hook.backup.velero.io/command";
const PRE_HOOK_CONTAINER: &str = "pre.hook.backup.velero.io/container";
const PRE_HOOK_TIMEOUT: &str = "pre.hook.backup.velero.io/timeout";

/// Resources that are never captured.
const EXCLUDED_RESOURCES: &[&str] = &[
	"events",
	"events.events.k8s.io",
	"nodes",
	"componentstatuses",
];

/// Groups whose resources are never captured.
const EXCLUDED_GROUPS: &[&str] = &["velero.io", "metrics.k8s.io"];

/// Server-populated metadata that must not travel to another cluster.
const TRANSIENT_METADATA: &[&str] = &[
	"uid",
	"resourceVersion",
	"generation",
	"creationTimestamp",
	"deletionTimestamp",
	"deletionGracePeriodSeconds",
	"managedFields",
	"selfLink",
];

pub struct BackupRequest<'a> {
	pub backup: &'a Backup,
}

/// What a finished backup wrote.
#[derive(Debug, Clone, Default)]
pub struct BackupSummary {
	pub items: usize,
	pub warnings: Vec<String>,
}

pub struct KubernetesBackupper<'a> {
	versioned: &'a VersionedClient,
	discovery: &'a Helper,
	dynamic: &'a DynamicFactory,
	pod_exec: &'a PodCommandExecutor,
}

impl<'a> KubernetesBackupper<'a> {
	pub fn new(
		versioned: &'a VersionedClient,
		discovery: &'a Helper,
		dynamic: &'a DynamicFactory,
		pod_exec: &'a PodCommandExecutor,
	) -> Self {
		Self {
			versioned,
			discovery,
			dynamic,
			pod_exec,
		}
	}

	/// Write every object selected by the request's backup to `writer`.
	#[instrument(skip_all, fields(backup = request.backup.name()))]
	pub async fn backup<W: Write>(
		&self,
		request: &BackupRequest<'_>,
		writer: W,
	) -> Result<BackupSummary, EngineError> {
		let backup = request.backup;
		let cluster_version = match self.versioned.server_version().await {
			Ok(info) => Some(info.git_version),
			Err(e) => {
				warn!(error = %e, "could not read server version");
				None
			}
		};

		let mut archive = ArchiveWriter::new(writer, backup, cluster_version)?;
		let mut summary = BackupSummary::default();

		for resource in self.discovery.resources() {
			if !should_capture(resource) {
				continue;
			}
			let group_resource = resource.group_resource();

			for object in self.list(backup, resource).await? {
				let namespace = object.metadata.namespace.clone();
				if group_resource == "pods" {
					self.run_pre_hook(&object, &mut summary).await;
				}
				archive.write_entry(&ArchiveEntry {
					resource: group_resource.clone(),
					namespace,
					object: sanitize(object, resource)?,
				})?;
			}
		}

		summary.items = archive.entries();
		archive.finish()?;
		info!(items = summary.items, warnings = summary.warnings.len(), "backup written");
		Ok(summary)
	}

	async fn list(&self, backup: &Backup, resource: &DiscoveredResource) -> Result<Vec<DynamicObject>, EngineError> {
		let ar = &resource.api_resource;
		let params = ListParams::default();

		if resource.is_namespaced() {
			if backup.includes_cluster_resources() {
				let api = self.dynamic.client_for(ar, None);
				return list_or_skip(api.list(&params).await, resource);
			}
			let mut objects = Vec::new();
			for namespace in &backup.spec.included_namespaces {
				let api = self.dynamic.client_for(ar, Some(namespace));
				objects.extend(list_or_skip(api.list(&params).await, resource)?);
			}
			return Ok(objects);
		}

		if backup.includes_cluster_resources() {
			let api = self.dynamic.client_for(ar, None);
			return list_or_skip(api.list(&params).await, resource);
		}

		// A filtered backup still carries the namespace objects it covers.
		if resource.group_resource() == "namespaces" {
			let api = self.dynamic.client_for(ar, None);
			let mut objects = Vec::new();
			for namespace in &backup.spec.included_namespaces {
				if let Some(object) = api.get_opt(namespace).await.map_err(|source| EngineError::List {
					resource: resource.group_resource(),
					source,
				})? {
					objects.push(object);
				}
			}
			return Ok(objects);
		}

		Ok(Vec::new())
	}

	async fn run_pre_hook(&self, pod: &DynamicObject, summary: &mut BackupSummary) {
		let Some(hook) = pre_hook(pod.metadata.annotations.as_ref()) else {
			return;
		};
		let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
		let name = pod.metadata.name.as_deref().unwrap_or_default();

		info!(pod = %format!("{namespace}/{name}"), "running pre-backup hook");
		if let Err(e) = self.pod_exec.execute(namespace, name, &hook).await {
			warn!(pod = %format!("{namespace}/{name}"), error = %e, "pre-backup hook failed");
			summary
				.warnings
				.push(format!("pre-backup hook in pod {namespace}/{name}: {e}"));
		}
	}
}

fn should_capture(resource: &DiscoveredResource) -> bool {
	let group_resource = resource.group_resource();
	resource.is_listable()
		&& !EXCLUDED_RESOURCES.contains(&group_resource.as_str())
		&& !EXCLUDED_GROUPS.contains(&resource.api_resource.group.as_str())
}

/// Forbidden and not-found list responses mean the kind is not visible to
/// us; they are skipped rather than failing the backup.
fn list_or_skip(
	result: Result<kube::core::ObjectList<DynamicObject>, kube::Error>,
	resource: &DiscoveredResource,
) -> Result<Vec<DynamicObject>, EngineError> {
	match result {
		Ok(list) => Ok(list.items),
		Err(kube::Error::Api(ref err)) if matches!(err.code, 403 | 404 | 405) => {
			warn!(resource = %resource.group_resource(), code = err.code, "skipping unlistable resource");
			Ok(Vec::new())
		}
		Err(source) => Err(EngineError::List {
			resource: resource.group_resource(),
			source,
		}),
	}
}

/// Strip server-populated fields and pin apiVersion/kind, which list
/// responses leave off their items.
fn sanitize(object: DynamicObject, resource: &DiscoveredResource) -> Result<serde_json::Value, EngineError> {
	let mut value = serde_json::to_value(&object).map_err(EngineError::Serialize)?;
	let Some(map) = value.as_object_mut() else {
		return Ok(value);
	};

	map.insert(
		"apiVersion".to_string(),
		serde_json::Value::String(resource.api_resource.api_version.clone()),
	);
	map.insert(
		"kind".to_string(),
		serde_json::Value::String(resource.api_resource.kind.clone()),
	);
	map.remove("status");
	if let Some(metadata) = map.get_mut("metadata").and_then(serde_json::Value::as_object_mut) {
		for field in TRANSIENT_METADATA {
			metadata.remove(*field);
		}
	}
	Ok(value)
}

/// Parse the pre-backup hook a pod declares through annotations.
///
/// The command annotation holds either a JSON array of arguments or a single
/// command string.
fn pre_hook(annotations: Option<&BTreeMap<String, String>>) -> Option<ExecHook> {
	let annotations = annotations?;
	let raw = annotations.get(PRE_HOOK_COMMAND)?.trim();
	let command = if raw.starts_with('[') {
		serde_json::from_str::<Vec<String>>(raw).ok()?
	} else {
		vec![raw.to_string()]
	};

	let timeout = annotations
		.get(PRE_HOOK_TIMEOUT)
		.map(String::as_str)
		.and_then(parse_seconds)
		.unwrap_or(DEFAULT_HOOK_TIMEOUT);

	Some(ExecHook {
		container: annotations.get(PRE_HOOK_CONTAINER).cloned(),
		command,
		timeout,
	})
}

/// Accepts `30` or `30s`.
fn parse_seconds(value: &str) -> Option<Duration> {
	value
		.trim()
		.trim_end_matches('s')
		.parse::<u64>()
		.ok()
		.map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
	use kube::discovery::Scope;

	use super::*;
	use crate::discovery::tests::resource;

	fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
		pairs
			.iter()
			.map(|(k, v)| ((*k).to_string(), (*v).to_string()))
			.collect()
	}

	#[test]
	fn test_pre_hook_json_command() {
		let hook = pre_hook(Some(&annotations(&[
			(PRE_HOOK_COMMAND, r#"["/bin/sh", "-c", "sync"]"#),
			(PRE_HOOK_CONTAINER, "db"),
			(PRE_HOOK_TIMEOUT, "90s"),
		])))
		.unwrap();

		assert_eq!(hook.command, vec!["/bin/sh", "-c", "sync"]);
		assert_eq!(hook.container.as_deref(), Some("db"));
		assert_eq!(hook.timeout, Duration::from_secs(90));
	}

	#[test]
	fn test_pre_hook_plain_command() {
		let hook = pre_hook(Some(&annotations(&[(PRE_HOOK_COMMAND, "/freeze")]))).unwrap();

		assert_eq!(hook.command, vec!["/freeze"]);
		assert_eq!(hook.container, None);
		assert_eq!(hook.timeout, DEFAULT_HOOK_TIMEOUT);
	}

	#[test]
	fn test_no_hook_without_annotation() {
		assert!(pre_hook(None).is_none());
		assert!(pre_hook(Some(&annotations(&[("app", "web")]))).is_none());
	}

	#[test]
	fn test_sanitize_strips_server_fields() {
		let configmaps = resource("", "v1", "ConfigMap", "configmaps", Scope::Namespaced);
		let object: DynamicObject = serde_json::from_value(serde_json::json!({
			"metadata": {
				"name": "settings",
				"namespace": "default",
				"uid": "1234",
				"resourceVersion": "42",
				"creationTimestamp": "2024-01-01T00:00:00Z",
				"labels": {"app": "web"}
			},
			"data": {"key": "value"},
			"status": {"phase": "whatever"}
		}))
		.unwrap();

		let value = sanitize(object, &configmaps).unwrap();

		assert_eq!(
			value,
			serde_json::json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": {
					"name": "settings",
					"namespace": "default",
					"labels": {"app": "web"}
				},
				"data": {"key": "value"}
			})
		);
	}

	#[test]
	fn test_excluded_resources_are_not_captured() {
		assert!(!should_capture(&resource("", "v1", "Event", "events", Scope::Namespaced)));
		assert!(!should_capture(&resource("velero.io", "v1", "Backup", "backups", Scope::Namespaced)));
		assert!(should_capture(&resource("apps", "v1", "ReplicaSet", "replicasets", Scope::Namespaced)));
	}
}
