//! Kubernetes cluster connection management.

use migrator_engine::{
	discovery::DiscoveryError, CoreClient, DynamicFactory, Helper, PodCommandExecutor,
	VersionedClient,
};
use thiserror::Error;
use tracing::{debug, instrument};

use super::access::ClusterAccessConfig;

/// Errors that can occur while deriving clients from an access configuration.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("building versioned API client")]
	VersionedClient(#[source] kube::Error),

	#[error("building discovery helper")]
	Discovery(#[source] DiscoveryError),

	#[error("building dynamic client factory")]
	DynamicClient(#[source] kube::Error),

	#[error("building typed core client")]
	TypedClient(#[source] kube::Error),
}

/// Produces the clients a [`ClusterConnection`] is made of, all from one
/// resolved configuration.
pub trait ClientFactory {
	/// The configuration every client is built from.
	fn resolve(&self) -> &kube::Config;

	fn build_versioned_client(&self) -> Result<VersionedClient, ConnectionError>;

	fn build_dynamic_client(&self) -> Result<DynamicFactory, ConnectionError>;

	fn build_typed_client(&self) -> Result<CoreClient, ConnectionError>;
}

impl ClientFactory for ClusterAccessConfig {
	fn resolve(&self) -> &kube::Config {
		self.config()
	}

	fn build_versioned_client(&self) -> Result<VersionedClient, ConnectionError> {
		self.client()
			.map(VersionedClient::new)
			.map_err(ConnectionError::VersionedClient)
	}

	fn build_dynamic_client(&self) -> Result<DynamicFactory, ConnectionError> {
		self.client()
			.map(DynamicFactory::new)
			.map_err(ConnectionError::DynamicClient)
	}

	fn build_typed_client(&self) -> Result<CoreClient, ConnectionError> {
		self.client()
			.map(CoreClient::new)
			.map_err(ConnectionError::TypedClient)
	}
}

/// Everything the backup and restore engine needs to talk to one cluster.
///
/// Built in one go from a single [`ClientFactory`]; none of the clients can
/// be swapped out afterwards.
pub struct ClusterConnection {
	versioned: VersionedClient,
	discovery: Helper,
	dynamic: DynamicFactory,
	core: CoreClient,
	pod_exec: PodCommandExecutor,
	cluster_url: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_url", &self.cluster_url)
			.field("resources", &self.discovery.resources().count())
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Derive every client, stopping at the first failure.
	#[instrument(skip_all, fields(cluster = %factory.resolve().cluster_url))]
	pub async fn build(factory: &impl ClientFactory) -> Result<Self, ConnectionError> {
		let versioned = factory.build_versioned_client()?;
		let discovery = Helper::new(&versioned)
			.await
			.map_err(ConnectionError::Discovery)?;
		let dynamic = factory.build_dynamic_client()?;
		let core = factory.build_typed_client()?;
		let pod_exec = PodCommandExecutor::new(&core);

		debug!("cluster connection ready");
		Ok(Self {
			versioned,
			discovery,
			dynamic,
			core,
			pod_exec,
			cluster_url: factory.resolve().cluster_url.to_string(),
		})
	}

	pub fn versioned(&self) -> &VersionedClient {
		&self.versioned
	}

	pub fn discovery(&self) -> &Helper {
		&self.discovery
	}

	pub fn dynamic(&self) -> &DynamicFactory {
		&self.dynamic
	}

	pub fn core(&self) -> &CoreClient {
		&self.core
	}

	pub fn pod_exec(&self) -> &PodCommandExecutor {
		&self.pod_exec
	}

	/// API server the connection targets.
	pub fn cluster_url(&self) -> &str {
		&self.cluster_url
	}
}
