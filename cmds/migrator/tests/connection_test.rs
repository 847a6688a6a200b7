//! Integration tests for cluster connection construction using the HTTP mock server.

use assert_matches::assert_matches;
use k8s_mock::{discovery::DiscoveryMode, http::HttpMockK8sServer};
use kube::{config::KubeConfigOptions, Client};
use migrator::k8s::{
	access::{resolve, CredentialSource, RequestLimits},
	client::ClusterConnection,
	connect,
	credentials::{CredentialLocator, CredentialStore, ResolvedCredentials},
	ConstructionError,
};

async fn test_connect_with_kubeconfig_impl(discovery_mode: DiscoveryMode) {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(discovery_mode)
		.git_version("v1.30.2")
		.build()
		.start()
		.await;

	let credentials = ResolvedCredentials {
		kubeconfig: server.kubeconfig_yaml(),
		..ResolvedCredentials::default()
	};
	let access = resolve(&credentials).await.expect("kubeconfig should resolve");
	assert_eq!(access.source(), CredentialSource::Kubeconfig);

	let connection = ClusterConnection::build(&access)
		.await
		.expect("connection should succeed");

	assert!(connection.cluster_url().starts_with(&server.uri()));
	let replicasets = connection
		.discovery()
		.resource_for("replicasets.apps")
		.expect("replicasets are served");
	assert!(replicasets.is_namespaced());
	assert!(!connection
		.discovery()
		.resource_for("namespaces")
		.expect("namespaces are served")
		.is_namespaced());

	let version = connection.versioned().server_version().await.unwrap();
	assert_eq!(version.git_version, "v1.30.2");
}

#[tokio::test]
async fn test_connect_with_kubeconfig_aggregated() {
	test_connect_with_kubeconfig_impl(DiscoveryMode::Aggregated).await;
}

#[tokio::test]
async fn test_connect_with_kubeconfig_legacy() {
	test_connect_with_kubeconfig_impl(DiscoveryMode::Legacy).await;
}

#[tokio::test]
async fn test_connect_with_service_account_token() {
	let server = HttpMockK8sServer::builder().build().start().await;

	let credentials = ResolvedCredentials {
		host: server.uri(),
		service_account_token: "token".to_string(),
		..ResolvedCredentials::default()
	};
	let access = resolve(&credentials).await.unwrap();
	assert_eq!(access.source(), CredentialSource::ServiceAccountToken);
	assert_eq!(access.limits(), Some(RequestLimits::SERVICE_ACCOUNT));

	let connection = ClusterConnection::build(&access).await.unwrap();

	assert!(connection.discovery().resource_for("configmaps").is_some());
	let namespaces = connection.core().namespaces().list(&Default::default()).await.unwrap();
	assert_eq!(namespaces.items.len(), 1);
}

#[tokio::test]
async fn test_credentials_from_secret() {
	let remote = HttpMockK8sServer::builder().build().start().await;
	let kubeconfig = remote.kubeconfig_yaml();
	let local = HttpMockK8sServer::builder()
		.resources(vec![k8s_mock::secret(
			"ops",
			"remote",
			&[
				("kubeconfig", kubeconfig.as_str()),
				("host", "https://ignored:6443"),
				("sa-token", "ignored"),
			],
		)])
		.build()
		.start()
		.await;

	let config = kube::Config::from_custom_kubeconfig(local.kubeconfig(), &KubeConfigOptions::default())
		.await
		.unwrap();
	let store = CredentialStore::with_client(Client::try_from(config).unwrap());

	let credentials = store
		.lookup(&CredentialLocator::new("remote", "ops"))
		.await
		.unwrap();
	assert_eq!(credentials.kubeconfig, kubeconfig);

	let connection = connect(&credentials).await.unwrap();
	assert!(connection.cluster_url().starts_with(&remote.uri()));
}

#[tokio::test]
async fn test_malformed_proxy_fails_construction() {
	let server = HttpMockK8sServer::builder().build().start().await;

	let credentials = ResolvedCredentials {
		kubeconfig: server.kubeconfig_yaml(),
		https_proxy: "::not a proxy::".to_string(),
		..ResolvedCredentials::default()
	};

	assert_matches!(connect(&credentials).await, Err(ConstructionError::Resolve(_)));
}
