//! Kubernetes access: credentials, configuration and clients.

pub mod access;
pub mod client;
pub mod credentials;
pub mod proxy;

use thiserror::Error;

use self::{
	access::ResolveError,
	client::{ClusterConnection, ConnectionError},
	credentials::ResolvedCredentials,
};

/// Failure to get from credentials to a usable connection.
#[derive(Debug, Error)]
pub enum ConstructionError {
	#[error(transparent)]
	Resolve(#[from] ResolveError),

	#[error(transparent)]
	Connection(#[from] ConnectionError),
}

/// Resolve `credentials` and connect to the cluster they describe.
pub async fn connect(credentials: &ResolvedCredentials) -> Result<ClusterConnection, ConstructionError> {
	let access = access::resolve(credentials).await?;
	Ok(ClusterConnection::build(&access).await?)
}
