//! Turning credentials into a cluster access configuration.

use std::{future::Future, time::Duration};

use http::{uri::InvalidUri, Uri};
use kube::{
	client::ClientBuilder,
	config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tower::limit::RateLimitLayer;
use tracing::{debug, instrument};

use super::{
	credentials::ResolvedCredentials,
	proxy::{apply_proxy, ProxyError},
};

/// Client-side request limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
	/// Sustained queries per second.
	pub qps: u32,
	/// Requests admitted at once.
	pub burst: u32,
}

impl RequestLimits {
	/// Limits for connections authenticated with a service account token.
	pub const SERVICE_ACCOUNT: Self = Self {
		qps: 100,
		burst: 1000,
	};

	/// Admits `burst` requests per `burst / qps` seconds.
	pub fn layer(&self) -> RateLimitLayer {
		let qps = self.qps.max(1);
		let burst = self.burst.max(1);
		RateLimitLayer::new(
			u64::from(burst),
			Duration::from_secs_f64(f64::from(burst) / f64::from(qps)),
		)
	}
}

/// Which credentials a configuration was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
	Kubeconfig,
	ServiceAccountToken,
	Ambient,
}

#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("loading kubeconfig from credentials")]
	Kubeconfig(#[source] KubeconfigError),

	#[error("invalid cluster host {host:?}")]
	Host {
		host: String,
		#[source]
		source: InvalidUri,
	},

	#[error("loading local cluster configuration")]
	Ambient(#[source] InferConfigError),

	#[error(transparent)]
	Proxy(#[from] ProxyError),
}

/// Fully resolved connection parameters for one cluster.
#[derive(Debug, Clone)]
pub struct ClusterAccessConfig {
	config: Config,
	limits: Option<RequestLimits>,
	source: CredentialSource,
}

impl ClusterAccessConfig {
	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn limits(&self) -> Option<RequestLimits> {
		self.limits
	}

	pub fn source(&self) -> CredentialSource {
		self.source
	}

	/// A new client for this configuration.
	pub fn client(&self) -> Result<Client, kube::Error> {
		let builder = ClientBuilder::try_from(self.config.clone())?;
		Ok(match self.limits {
			Some(limits) => builder.with_layer(&limits.layer()).build(),
			None => builder.build(),
		})
	}
}

/// Resolve credentials, falling back to the process's kube context.
pub async fn resolve(credentials: &ResolvedCredentials) -> Result<ClusterAccessConfig, ResolveError> {
	resolve_with_ambient(credentials, Config::infer).await
}

/// Resolve credentials, in order of precedence:
///
/// 1. a kubeconfig, taken as is
/// 2. a service account token with its host; TLS verification is disabled
/// 3. the ambient configuration produced by `ambient`
///
/// A proxy is only applied to the first two.
#[instrument(skip_all, fields(remote_host = credentials.remote_host()))]
pub async fn resolve_with_ambient<F, Fut>(
	credentials: &ResolvedCredentials,
	ambient: F,
) -> Result<ClusterAccessConfig, ResolveError>
where
	F: FnOnce() -> Fut,
	Fut: Future<Output = Result<Config, InferConfigError>>,
{
	let (mut config, limits, source) = if !credentials.kubeconfig.is_empty() {
		let kubeconfig = Kubeconfig::from_yaml(&credentials.kubeconfig).map_err(ResolveError::Kubeconfig)?;
		let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
			.await
			.map_err(ResolveError::Kubeconfig)?;
		(config, None, CredentialSource::Kubeconfig)
	} else if !credentials.service_account_token.is_empty() && !credentials.host.is_empty() {
		let config = token_config(&credentials.host, &credentials.service_account_token)?;
		(
			config,
			Some(RequestLimits::SERVICE_ACCOUNT),
			CredentialSource::ServiceAccountToken,
		)
	} else {
		let config = ambient().await.map_err(ResolveError::Ambient)?;
		(config, None, CredentialSource::Ambient)
	};

	if source != CredentialSource::Ambient && !credentials.https_proxy.is_empty() {
		apply_proxy(&mut config, &credentials.https_proxy)?;
	}

	debug!(cluster = %config.cluster_url, ?source, "resolved cluster access");
	Ok(ClusterAccessConfig {
		config,
		limits,
		source,
	})
}

fn token_config(host: &str, token: &str) -> Result<Config, ResolveError> {
	let url = if host.contains("://") {
		host.to_string()
	} else {
		format!("https://{host}")
	};
	let cluster_url: Uri = url.parse().map_err(|source| ResolveError::Host {
		host: host.to_string(),
		source,
	})?;

	let mut config = Config::new(cluster_url);
	config.accept_invalid_certs = true;
	config.auth_info.token = Some(token.to_string().into());
	Ok(config)
}
