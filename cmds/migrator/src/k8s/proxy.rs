//! Outbound proxy for cluster connections.

use http::{uri::InvalidUri, Uri};
use thiserror::Error;

const SUPPORTED_SCHEMES: &[&str] = &["http", "https"];

#[derive(Debug, Error)]
pub enum ProxyError {
	#[error("invalid proxy URL {url:?}")]
	Invalid {
		url: String,
		#[source]
		source: InvalidUri,
	},

	#[error("proxy URL {url:?} must be an absolute http or https URL")]
	Unsupported { url: String },
}

/// Route the connection described by `config` through `proxy_url`.
///
/// Only the proxy is set; TLS, timeouts and auth stay as they were.
pub fn apply_proxy(config: &mut kube::Config, proxy_url: &str) -> Result<(), ProxyError> {
	let uri: Uri = proxy_url.parse().map_err(|source| ProxyError::Invalid {
		url: proxy_url.to_string(),
		source,
	})?;

	let supported = uri
		.scheme_str()
		.is_some_and(|scheme| SUPPORTED_SCHEMES.contains(&scheme))
		&& uri.authority().is_some_and(|authority| !authority.host().is_empty());
	if !supported {
		return Err(ProxyError::Unsupported {
			url: proxy_url.to_string(),
		});
	}

	tracing::debug!(proxy = %uri, "routing cluster traffic through proxy");
	config.proxy_url = Some(uri);
	Ok(())
}
