//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual kubeconfig-based
//! connections, unlike the tower mock which only works with in-process clients.

use std::{
	collections::BTreeMap,
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::discovery::{DiscoveryMode, MockApiResource, MockDiscovery};

/// Objects keyed by (collection path, name), e.g.
/// (`/api/v1/namespaces/default/configmaps`, `settings`).
pub type SharedObjects = Arc<RwLock<BTreeMap<(String, String), serde_json::Value>>>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// Objects to serve as raw manifests. The server derives API paths from
	/// apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<serde_json::Value>,
	/// Reported `gitVersion`.
	#[builder(default = "v1.31.0".to_string(), into)]
	git_version: String,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	objects: SharedObjects,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let discovery = MockDiscovery::default();

		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut objects = BTreeMap::new();
		for manifest in self.resources {
			if let Some(key) = key_for_manifest(&manifest, &discovery) {
				trace!(collection = %key.0, name = %key.1, "Registered resource");
				objects.insert(key, manifest);
			}
		}
		objects
			.entry(("/api/v1/namespaces".to_string(), "default".to_string()))
			.or_insert_with(|| crate::namespace("default"));

		let objects = Arc::new(RwLock::new(objects));

		mount_version(&server, &self.git_version).await;
		mount_discovery(&server, &discovery, self.discovery_mode).await;
		mount_objects(&server, &objects).await;

		RunningHttpMockK8sServer { server, objects }
	}
}

/// Derive the storage key for a manifest using discovery data.
fn key_for_manifest(manifest: &serde_json::Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?.to_string();
	let namespace = manifest
		.pointer("/metadata/namespace")
		.and_then(serde_json::Value::as_str)
		.unwrap_or("default");

	let resource = discovery.resource_for(api_version, kind)?;
	let prefix = if api_version.contains('/') {
		format!("/apis/{api_version}")
	} else {
		format!("/api/{api_version}")
	};

	let collection = if resource.namespaced {
		format!("{prefix}/namespaces/{namespace}/{}", resource.name)
	} else {
		format!("{prefix}/{}", resource.name)
	};
	Some((collection, name))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// The kubeconfig serialized as YAML, as it would be stored in a secret.
	pub fn kubeconfig_yaml(&self) -> String {
		serde_yaml::to_string(&self.kubeconfig()).expect("kubeconfig serializes")
	}

	/// A stored object, e.g. `object("/api/v1/namespaces/default/configmaps", "settings")`.
	pub fn object(&self, collection: &str, name: &str) -> Option<serde_json::Value> {
		let objects = self.objects.read().expect("object store poisoned");
		objects
			.get(&(collection.to_string(), name.to_string()))
			.cloned()
	}

	/// Names of the objects stored in `collection`, in order.
	pub fn names(&self, collection: &str) -> Vec<String> {
		let objects = self.objects.read().expect("object store poisoned");
		objects
			.keys()
			.filter(|(c, _)| c == collection)
			.map(|(_, name)| name.clone())
			.collect()
	}
}

async fn mount_version(server: &MockServer, git_version: &str) {
	let minor = git_version
		.trim_start_matches('v')
		.split('.')
		.nth(1)
		.unwrap_or("31");

	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"major": "1",
			"minor": minor,
			"gitVersion": git_version,
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.22.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn aggregated_resource(r: &MockApiResource, group: &str, version: &str) -> serde_json::Value {
	serde_json::json!({
		"resource": r.name,
		"responseKind": {
			"group": group,
			"version": version,
			"kind": r.kind
		},
		"scope": if r.namespaced { "Namespaced" } else { "Cluster" },
		"verbs": r.verbs,
	})
}

fn legacy_resource(r: &MockApiResource) -> serde_json::Value {
	serde_json::json!({
		"name": r.name,
		"singularName": "",
		"namespaced": r.namespaced,
		"kind": r.kind,
		"verbs": r.verbs,
	})
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// The Content-Type must name the aggregated format for clients to parse it
	const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
		"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

	match mode {
		DiscoveryMode::Aggregated => {
			let core_body = serde_json::json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": [{
					"metadata": {"name": ""},
					"versions": [{
						"version": "v1",
						"resources": discovery
							.core_resources
							.iter()
							.map(|r| aggregated_resource(r, "", "v1"))
							.collect::<Vec<_>>(),
						"freshness": "Current"
					}]
				}]
			});

			let groups: Vec<_> = discovery
				.group_resources
				.iter()
				.map(|(gv, rs)| {
					let (group, version) = gv.split_once('/').unwrap_or(("", gv));
					serde_json::json!({
						"metadata": {"name": group},
						"versions": [{
							"version": version,
							"resources": rs
								.iter()
								.map(|r| aggregated_resource(r, group, version))
								.collect::<Vec<_>>(),
							"freshness": "Current"
						}]
					})
				})
				.collect();
			let apis_body = serde_json::json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": groups
			});

			// set_body_json would overwrite the Content-Type
			for (endpoint, body) in [("/api", core_body), ("/apis", apis_body)] {
				let body = serde_json::to_vec(&body).expect("discovery JSON serializes");
				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(
						ResponseTemplate::new(200).set_body_raw(body, AGGREGATED_DISCOVERY_CONTENT_TYPE),
					)
					.mount(server)
					.await;
			}
		}
		DiscoveryMode::Legacy => {
			for endpoint in ["/api", "/apis"] {
				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(406))
					.mount(server)
					.await;
			}
		}
	}

	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			serde_json::json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIResourceList",
			"apiVersion": "v1",
			"groupVersion": "v1",
			"resources": discovery.core_resources.iter().map(legacy_resource).collect::<Vec<_>>()
		})))
		.mount(server)
		.await;

	for (gv, rs) in &discovery.group_resources {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{gv}")))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"kind": "APIResourceList",
				"apiVersion": "v1",
				"groupVersion": gv,
				"resources": rs.iter().map(legacy_resource).collect::<Vec<_>>()
			})))
			.mount(server)
			.await;
	}
}

async fn mount_objects(server: &MockServer, objects: &SharedObjects) {
	let post_objects = Arc::clone(objects);
	let get_objects = Arc::clone(objects);

	// POST creates; an existing name is a conflict
	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some((collection, None)) = split_path(req.url.path()) else {
				return status(405, "MethodNotAllowed", "create is only allowed on collections");
			};
			let Ok(body) = serde_json::from_slice::<serde_json::Value>(&req.body) else {
				return status(400, "BadRequest", "request body is not JSON");
			};
			let Some(name) = body.pointer("/metadata/name").and_then(serde_json::Value::as_str) else {
				return status(422, "Invalid", "metadata.name is required");
			};
			if req.url.query().is_some_and(|q| q.contains("dryRun")) {
				return ResponseTemplate::new(201).set_body_json(body);
			}

			let mut objects = post_objects.write().expect("object store poisoned");
			let key = (collection, name.to_string());
			if objects.contains_key(&key) {
				return status(409, "AlreadyExists", &format!("{name} already exists"));
			}
			trace!(collection = %key.0, name = %key.1, "Created resource");
			objects.insert(key, body.clone());
			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;

	// GET serves both single objects and lists, cluster-wide lists included
	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some((collection, name)) = split_path(req.url.path()) else {
				return status(404, "NotFound", "not found");
			};
			let objects = get_objects.read().expect("object store poisoned");

			if let Some(name) = name {
				return match objects.get(&(collection, name)) {
					Some(object) => ResponseTemplate::new(200).set_body_json(object),
					None => status(404, "NotFound", "not found"),
				};
			}

			let items: Vec<_> = objects
				.iter()
				.filter(|((stored, _), _)| {
					*stored == collection || cluster_wide_path(stored).as_deref() == Some(collection.as_str())
				})
				.map(|(_, object)| object.clone())
				.collect();

			ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"kind": "List",
				"apiVersion": "v1",
				"metadata": {"resourceVersion": "1"},
				"items": items
			}))
		})
		.mount(server)
		.await;
}

fn status(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

/// Split an API path into the collection it addresses and the object name,
/// if one is given. Subresource paths are not served.
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps` -> (`/api/v1/namespaces/default/configmaps`, None)
/// - `/apis/apps/v1/namespaces/default/replicasets/web` -> (`/apis/apps/v1/namespaces/default/replicasets`, `web`)
/// - `/api/v1/namespaces/my-ns` -> (`/api/v1/namespaces`, `my-ns`)
fn split_path(path: &str) -> Option<(String, Option<String>)> {
	let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
	let prefix_len = match segments.first() {
		Some(&"api") => 2,
		Some(&"apis") => 3,
		_ => return None,
	};
	if segments.len() <= prefix_len {
		return None;
	}
	let prefix = segments[..prefix_len].join("/");

	match &segments[prefix_len..] {
		[resource] => Some((format!("/{prefix}/{resource}"), None)),
		[resource, name] => Some((format!("/{prefix}/{resource}"), Some((*name).to_string()))),
		["namespaces", ns, resource] => Some((format!("/{prefix}/namespaces/{ns}/{resource}"), None)),
		["namespaces", ns, resource, name] => Some((
			format!("/{prefix}/namespaces/{ns}/{resource}"),
			Some((*name).to_string()),
		)),
		_ => None,
	}
}

/// The cluster-wide collection a namespaced collection belongs to.
///
/// `/api/v1/namespaces/default/configmaps` -> `/api/v1/configmaps`
fn cluster_wide_path(collection: &str) -> Option<String> {
	let (before, after) = collection.split_once("/namespaces/")?;
	let (_, resource) = after.split_once('/')?;
	Some(format!("{before}/{resource}"))
}
