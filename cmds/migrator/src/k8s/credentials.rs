//! Remote cluster credentials stored in secrets.

use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use kube::{
	api::{Api, ListParams},
	Client,
};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

pub const HOST_KEY: &str = "host";
pub const SA_TOKEN_KEY: &str = "sa-token";
pub const KUBECONFIG_KEY: &str = "kubeconfig";
pub const HTTPS_PROXY_KEY: &str = "https_proxy";

/// Where to find remote cluster credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialLocator {
	pub secret_name: String,
	pub secret_namespace: String,
}

impl CredentialLocator {
	pub fn new(secret_name: impl Into<String>, secret_namespace: impl Into<String>) -> Self {
		Self {
			secret_name: secret_name.into(),
			secret_namespace: secret_namespace.into(),
		}
	}

	/// Whether both name and namespace are given. Anything less means the
	/// local cluster.
	pub fn is_remote(&self) -> bool {
		!self.secret_name.is_empty() && !self.secret_namespace.is_empty()
	}
}

/// Credential fields read from a secret. Empty fields were not set.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResolvedCredentials {
	pub host: String,
	pub service_account_token: String,
	pub kubeconfig: String,
	pub https_proxy: String,
}

impl fmt::Debug for ResolvedCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fn redacted(value: &str) -> &'static str {
			if value.is_empty() {
				""
			} else {
				"<redacted>"
			}
		}

		f.debug_struct("ResolvedCredentials")
			.field("host", &self.host)
			.field("service_account_token", &redacted(&self.service_account_token))
			.field("kubeconfig", &redacted(&self.kubeconfig))
			.field("https_proxy", &self.https_proxy)
			.finish()
	}
}

impl ResolvedCredentials {
	pub fn from_secret(secret: &Secret) -> Self {
		let field = |key: &str| {
			secret
				.data
				.as_ref()
				.and_then(|data| data.get(key))
				.map(|value| String::from_utf8_lossy(&value.0).into_owned())
				.unwrap_or_default()
		};

		Self {
			host: field(HOST_KEY),
			service_account_token: field(SA_TOKEN_KEY),
			kubeconfig: field(KUBECONFIG_KEY),
			https_proxy: field(HTTPS_PROXY_KEY),
		}
	}

	pub fn is_empty(&self) -> bool {
		*self == Self::default()
	}

	/// Host for log output.
	pub fn remote_host(&self) -> &str {
		if self.host.is_empty() {
			"in-cluster"
		} else {
			&self.host
		}
	}
}

#[derive(Debug, Error)]
pub enum LookupError {
	#[error("building local cluster client")]
	Client(#[source] kube::Error),

	#[error("listing secrets in namespace {namespace}")]
	List {
		namespace: String,
		#[source]
		source: kube::Error,
	},
}

/// Secret store on the local cluster.
///
/// The client is created on first lookup, so a run against the local cluster
/// never talks to the store.
pub struct CredentialStore {
	client: OnceCell<Client>,
}

impl Default for CredentialStore {
	fn default() -> Self {
		Self::new()
	}
}

impl CredentialStore {
	/// Store reached through the ambient cluster configuration.
	pub fn new() -> Self {
		Self {
			client: OnceCell::new(),
		}
	}

	/// Store reached through an existing client.
	pub fn with_client(client: Client) -> Self {
		Self {
			client: OnceCell::new_with(Some(client)),
		}
	}

	/// Read credentials for `locator`.
	///
	/// A missing secret is not an error: like an empty locator it yields empty
	/// credentials, which select the local cluster.
	#[instrument(skip_all, fields(secret = %locator.secret_name, namespace = %locator.secret_namespace))]
	pub async fn lookup(&self, locator: &CredentialLocator) -> Result<ResolvedCredentials, LookupError> {
		if !locator.is_remote() {
			debug!("no credentials secret given");
			return Ok(ResolvedCredentials::default());
		}

		let client = self
			.client
			.get_or_try_init(Client::try_default)
			.await
			.map_err(LookupError::Client)?;
		let secrets: Api<Secret> = Api::namespaced(client.clone(), &locator.secret_namespace);
		let list = secrets
			.list(&ListParams::default())
			.await
			.map_err(|source| LookupError::List {
				namespace: locator.secret_namespace.clone(),
				source,
			})?;

		let Some(secret) = list
			.items
			.iter()
			.find(|secret| secret.metadata.name.as_deref() == Some(locator.secret_name.as_str()))
		else {
			warn!("credentials secret not found, falling back to local cluster");
			return Ok(ResolvedCredentials::default());
		};

		let credentials = ResolvedCredentials::from_secret(secret);
		info!(remote_host = credentials.remote_host(), "read remote cluster credentials");
		Ok(credentials)
	}
}
