pub mod backup;
pub mod restore;

use tracing::{info, instrument};

use crate::{
	cli::{Action, Invocation},
	config::RunConfig,
	error::MigratorError,
	k8s::{self, credentials::CredentialStore},
};

/// Run an invocation against the cluster its credentials point at.
pub async fn run(invocation: &Invocation, config: &RunConfig) -> Result<(), MigratorError> {
	run_with_store(invocation, config, &CredentialStore::new()).await
}

/// Like [`run`], reading remote credentials from `store`.
///
/// With a timeout, the whole run (lookup, connection and engine) must finish
/// within it.
pub async fn run_with_store(
	invocation: &Invocation,
	config: &RunConfig,
	store: &CredentialStore,
) -> Result<(), MigratorError> {
	let work = execute(invocation, config, store);
	match invocation.timeout {
		Some(limit) => tokio::time::timeout(limit, work)
			.await
			.map_err(|_| MigratorError::Timeout(limit))?,
		None => work.await,
	}
}

#[instrument(skip_all, fields(action = %invocation.action))]
async fn execute(
	invocation: &Invocation,
	config: &RunConfig,
	store: &CredentialStore,
) -> Result<(), MigratorError> {
	let credentials = store.lookup(&invocation.locator).await?;
	let connection = k8s::connect(&credentials).await?;
	info!(
		remote_host = credentials.remote_host(),
		cluster = connection.cluster_url(),
		"connected to cluster"
	);

	match invocation.action {
		Action::Backup => {
			let descriptor =
				backup::BackupDescriptor::new(config, &invocation.path, &invocation.included_namespaces);
			backup::backup(&connection, &descriptor).await?;
		}
		Action::Restore => {
			let descriptor =
				restore::RestoreDescriptor::new(config, &invocation.path);
			restore::restore(&connection, &descriptor).await?;
		}
	}
	Ok(())
}
