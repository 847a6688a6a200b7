//! Backup from one mock cluster and restore into another, with credentials
//! read from secrets on a third.

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use assert_matches::assert_matches;
use k8s_mock::http::{HttpMockK8sServer, RunningHttpMockK8sServer};
use kube::{config::KubeConfigOptions, Client};
use migrator::{
	cli::{Action, Invocation},
	commands::run_with_store,
	config::RunConfig,
	error::MigratorError,
	k8s::credentials::{CredentialLocator, CredentialStore},
};
use migrator_engine::EngineError;
use serde_json::json;

const CONFIGMAPS: &str = "/api/v1/namespaces/demo/configmaps";
const REPLICASETS: &str = "/apis/apps/v1/namespaces/demo/replicasets";

fn source_objects() -> Vec<serde_json::Value> {
	vec![
		k8s_mock::namespace("demo"),
		k8s_mock::namespace("other"),
		json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {
				"name": "settings",
				"namespace": "demo",
				"uid": "0b5c4a9e",
				"resourceVersion": "7"
			},
			"data": {"mode": "prod"}
		}),
		json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": "unrelated", "namespace": "other"},
			"data": {}
		}),
		json!({
			"apiVersion": "apps/v1",
			"kind": "ReplicaSet",
			"metadata": {"name": "web", "namespace": "demo"},
			"spec": {
				"replicas": 2,
				"selector": {"matchLabels": {"app": "web"}},
				"template": {
					"metadata": {"labels": {"app": "web"}},
					"spec": {"containers": [{"name": "web", "image": "nginx"}]}
				}
			},
			"status": {"replicas": 2}
		}),
	]
}

struct Clusters {
	/// Holds the credential secrets.
	local: RunningHttpMockK8sServer,
	source: RunningHttpMockK8sServer,
	target: RunningHttpMockK8sServer,
}

impl Clusters {
	async fn start(target_objects: Vec<serde_json::Value>) -> Self {
		let source = HttpMockK8sServer::builder()
			.resources(source_objects())
			.build()
			.start()
			.await;
		let target = HttpMockK8sServer::builder()
			.resources(target_objects)
			.build()
			.start()
			.await;

		let source_kubeconfig = source.kubeconfig_yaml();
		let target_kubeconfig = target.kubeconfig_yaml();
		let local = HttpMockK8sServer::builder()
			.resources(vec![
				k8s_mock::secret("ops", "source", &[("kubeconfig", source_kubeconfig.as_str())]),
				k8s_mock::secret("ops", "target", &[("kubeconfig", target_kubeconfig.as_str())]),
			])
			.build()
			.start()
			.await;

		Self { local, source, target }
	}

	async fn store(&self) -> CredentialStore {
		let config = kube::Config::from_custom_kubeconfig(self.local.kubeconfig(), &KubeConfigOptions::default())
			.await
			.unwrap();
		CredentialStore::with_client(Client::try_from(config).unwrap())
	}

	async fn run(&self, invocation: &Invocation, config: &RunConfig) -> Result<(), MigratorError> {
		run_with_store(invocation, config, &self.store().await).await
	}

	async fn backup(&self, path: &Path) {
		self.run(&invocation(Action::Backup, path, "source"), &RunConfig::default())
			.await
			.expect("backup should succeed");
	}
}

fn invocation(action: Action, path: &Path, secret: &str) -> Invocation {
	Invocation {
		action,
		path: path.to_path_buf(),
		locator: CredentialLocator::new(secret, "ops"),
		included_namespaces: vec!["demo".to_string()],
		timeout: None,
	}
}

fn archive_path(dir: &tempfile::TempDir) -> PathBuf {
	dir.path().join("out").join("archive.tar.gz")
}

#[tokio::test]
async fn test_backup_and_restore() {
	let clusters = Clusters::start(vec![]).await;
	let dir = tempfile::tempdir().unwrap();
	let path = archive_path(&dir);

	clusters.backup(&path).await;
	assert!(path.is_file());

	clusters
		.run(&invocation(Action::Restore, &path, "target"), &RunConfig::default())
		.await
		.expect("restore should succeed");

	let target = &clusters.target;
	assert_eq!(target.names("/api/v1/namespaces"), vec!["default", "demo"]);
	assert_eq!(target.names(CONFIGMAPS), vec!["settings"]);
	assert_eq!(target.names(REPLICASETS), vec!["web"]);
	assert!(target.names("/api/v1/namespaces/other/configmaps").is_empty());

	let settings = target.object(CONFIGMAPS, "settings").unwrap();
	assert_eq!(settings["data"], json!({"mode": "prod"}));
	assert_eq!(settings.pointer("/metadata/uid"), None);
	assert_eq!(settings.pointer("/metadata/resourceVersion"), None);

	let web = target.object(REPLICASETS, "web").unwrap();
	assert_eq!(web["spec"]["replicas"], json!(2));
	assert_eq!(web.get("status"), None);

	// The source is left alone
	assert_eq!(clusters.source.names(CONFIGMAPS), vec!["settings"]);
}

#[tokio::test]
async fn test_restore_over_existing_objects() {
	let clusters = Clusters::start(vec![
		k8s_mock::namespace("demo"),
		json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": "settings", "namespace": "demo"},
			"data": {"mode": "staging"}
		}),
	])
	.await;
	let dir = tempfile::tempdir().unwrap();
	let path = archive_path(&dir);

	clusters.backup(&path).await;
	clusters
		.run(&invocation(Action::Restore, &path, "target"), &RunConfig::default())
		.await
		.expect("existing objects are not an error");

	let target = &clusters.target;
	let settings = target.object(CONFIGMAPS, "settings").unwrap();
	assert_eq!(settings["data"], json!({"mode": "staging"}));
	assert_eq!(target.names(REPLICASETS), vec!["web"]);
}

#[tokio::test]
async fn test_restore_ignores_namespace_filter() {
	let clusters = Clusters::start(vec![]).await;
	let dir = tempfile::tempdir().unwrap();
	let path = archive_path(&dir);

	clusters.backup(&path).await;
	let invocation = Invocation {
		included_namespaces: vec!["other".to_string()],
		..invocation(Action::Restore, &path, "target")
	};
	clusters
		.run(&invocation, &RunConfig::default())
		.await
		.expect("restore should succeed");

	let target = &clusters.target;
	assert_eq!(target.names(CONFIGMAPS), vec!["settings"]);
	assert_eq!(target.names(REPLICASETS), vec!["web"]);
	assert!(target.names("/api/v1/namespaces/other/configmaps").is_empty());
}

#[tokio::test]
async fn test_restore_into_terminating_namespace() {
	let clusters = Clusters::start(vec![k8s_mock::terminating_namespace("demo")]).await;
	let dir = tempfile::tempdir().unwrap();
	let path = archive_path(&dir);

	clusters.backup(&path).await;
	let config = RunConfig {
		resource_terminating_timeout: Duration::ZERO,
		..RunConfig::default()
	};
	let result = clusters
		.run(&invocation(Action::Restore, &path, "target"), &config)
		.await;

	assert_matches!(
		result,
		Err(MigratorError::Engine(EngineError::Incomplete { errors })) if errors.iter().all(|e| e.contains("terminating"))
	);
	assert!(clusters.target.names(CONFIGMAPS).is_empty());
}

#[tokio::test]
async fn test_run_timeout() {
	let clusters = Clusters::start(vec![k8s_mock::terminating_namespace("demo")]).await;
	let dir = tempfile::tempdir().unwrap();
	let path = archive_path(&dir);

	clusters.backup(&path).await;
	let invocation = Invocation {
		timeout: Some(Duration::from_secs(3)),
		..invocation(Action::Restore, &path, "target")
	};
	let result = clusters.run(&invocation, &RunConfig::default()).await;

	assert_matches!(result, Err(MigratorError::Timeout(limit)) if limit == Duration::from_secs(3));
}

#[tokio::test]
async fn test_restore_missing_archive() {
	let clusters = Clusters::start(vec![]).await;
	let dir = tempfile::tempdir().unwrap();

	let result = clusters
		.run(
			&invocation(Action::Restore, &dir.path().join("missing.tar"), "target"),
			&RunConfig::default(),
		)
		.await;

	assert_matches!(result, Err(MigratorError::FileIo { action: "opening", .. }));
}
