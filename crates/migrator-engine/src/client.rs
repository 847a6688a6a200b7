//! Clients the engine talks to the cluster through.
//!
//! All three wrap a [`kube::Client`]; callers are expected to build them
//! from one cluster configuration.

use k8s_openapi::{
	api::core::v1::{Namespace, Pod},
	apimachinery::pkg::version::Info,
};
use kube::{
	api::{Api, DynamicObject},
	discovery::ApiResource,
	Client, Discovery,
};

/// Versioned API client, the entry point for discovery and server metadata.
#[derive(Clone)]
pub struct VersionedClient {
	client: Client,
}

impl VersionedClient {
	pub fn new(client: Client) -> Self {
		Self { client }
	}

	/// A fresh discovery run against this client's cluster.
	pub fn discovery(&self) -> Discovery {
		Discovery::new(self.client.clone())
	}

	pub async fn server_version(&self) -> Result<Info, kube::Error> {
		self.client.apiserver_version().await
	}
}

/// Hands out [`Api`] handles for arbitrary resource kinds.
#[derive(Clone)]
pub struct DynamicFactory {
	client: Client,
}

impl DynamicFactory {
	pub fn new(client: Client) -> Self {
		Self { client }
	}

	/// Api for `resource`, scoped to `namespace` when one is given.
	pub fn client_for(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
		match namespace {
			Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
			None => Api::all_with(self.client.clone(), resource),
		}
	}
}

/// Typed client for core/v1 objects.
#[derive(Clone)]
pub struct CoreClient {
	client: Client,
}

impl CoreClient {
	pub fn new(client: Client) -> Self {
		Self { client }
	}

	pub fn namespaces(&self) -> Api<Namespace> {
		Api::all(self.client.clone())
	}

	pub fn pods(&self, namespace: &str) -> Api<Pod> {
		Api::namespaced(self.client.clone(), namespace)
	}
}
