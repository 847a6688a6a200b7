//! Kubernetes API resource discovery.
//!
//! The helper snapshots the cluster's discovery API once and answers
//! lookups by group-resource name (`replicasets.apps`, `pods`) for the rest
//! of the run.

use std::collections::BTreeMap;

use kube::discovery::{verbs, ApiCapabilities, ApiResource, Discovery, Scope};
use thiserror::Error;
use tracing::instrument;

use crate::client::VersionedClient;

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] kube::Error),
}

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}

/// Discovered API resource with scope and capabilities.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
	/// API capabilities (verbs, subresources, etc.)
	pub capabilities: ApiCapabilities,
}

impl DiscoveredResource {
	/// `<plural>.<group>`, or just `<plural>` for the core group.
	pub fn group_resource(&self) -> String {
		group_resource(&self.api_resource)
	}

	pub fn is_namespaced(&self) -> bool {
		self.scope == ResourceScope::Namespaced
	}

	pub fn supports(&self, verb: &str) -> bool {
		self.capabilities.supports_operation(verb)
	}

	pub fn is_listable(&self) -> bool {
		self.supports(verbs::LIST)
	}
}

/// `<plural>.<group>` for grouped resources, `<plural>` for core ones.
pub fn group_resource(ar: &ApiResource) -> String {
	if ar.group.is_empty() {
		ar.plural.clone()
	} else {
		format!("{}.{}", ar.plural, ar.group)
	}
}

/// Snapshot of the API resources served by a cluster.
///
/// Each group-resource appears once, at its group's preferred version.
#[derive(Debug, Clone, Default)]
pub struct Helper {
	resources: BTreeMap<String, DiscoveredResource>,
}

impl Helper {
	/// Query the cluster's discovery API and build the helper.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) which requires only 2 API
	/// calls, falling back to full discovery for older clusters.
	#[instrument(skip_all)]
	pub async fn new(client: &VersionedClient) -> Result<Self, DiscoveryError> {
		let discovery = match client.discovery().run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				discovery
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available, using full discovery");
				client
					.discovery()
					.run()
					.await
					.map_err(DiscoveryError::FullDiscovery)?
			}
		};

		let helper = Self::from_discovery(&discovery);
		tracing::debug!(resources = helper.resources.len(), "discovered API resources");
		Ok(helper)
	}

	fn from_discovery(discovery: &Discovery) -> Self {
		Self::from_resources(discovery.groups().flat_map(|group| {
			group
				.recommended_resources()
				.into_iter()
				.map(|(api_resource, capabilities)| {
					let scope = match capabilities.scope {
						Scope::Namespaced => ResourceScope::Namespaced,
						Scope::Cluster => ResourceScope::ClusterWide,
					};
					DiscoveredResource {
						api_resource,
						scope,
						capabilities,
					}
				})
		}))
	}

	/// Build a helper from already discovered resources.
	pub fn from_resources(resources: impl IntoIterator<Item = DiscoveredResource>) -> Self {
		Self {
			resources: resources
				.into_iter()
				.map(|resource| (resource.group_resource(), resource))
				.collect(),
		}
	}

	/// Look up a resource by group-resource name.
	pub fn resource_for(&self, group_resource: &str) -> Option<&DiscoveredResource> {
		self.resources.get(group_resource)
	}

	/// All resources, ordered by group-resource name.
	pub fn resources(&self) -> impl Iterator<Item = &DiscoveredResource> {
		self.resources.values()
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use kube::core::GroupVersionKind;

	use super::*;

	pub(crate) fn resource(group: &str, version: &str, kind: &str, plural: &str, scope: Scope) -> DiscoveredResource {
		let gvk = GroupVersionKind::gvk(group, version, kind);
		let capabilities = ApiCapabilities {
			scope: scope.clone(),
			subresources: vec![],
			operations: vec![verbs::LIST.to_string(), verbs::CREATE.to_string()],
		};
		DiscoveredResource {
			api_resource: ApiResource::from_gvk_with_plural(&gvk, plural),
			scope: match scope {
				Scope::Namespaced => ResourceScope::Namespaced,
				Scope::Cluster => ResourceScope::ClusterWide,
			},
			capabilities,
		}
	}

	#[test]
	fn test_group_resource_names() {
		let rs = resource("apps", "v1", "ReplicaSet", "replicasets", Scope::Namespaced);
		let pods = resource("", "v1", "Pod", "pods", Scope::Namespaced);

		assert_eq!(rs.group_resource(), "replicasets.apps");
		assert_eq!(pods.group_resource(), "pods");
	}

	#[test]
	fn test_lookup_by_group_resource() {
		let helper = Helper::from_resources([
			resource("apps", "v1", "ReplicaSet", "replicasets", Scope::Namespaced),
			resource("", "v1", "Namespace", "namespaces", Scope::Cluster),
		]);

		let namespaces = helper.resource_for("namespaces").unwrap();
		assert!(!namespaces.is_namespaced());
		assert!(namespaces.is_listable());
		assert!(helper.resource_for("replicasets.apps").is_some());
		assert!(helper.resource_for("replicasets.extensions").is_none());
	}
}
