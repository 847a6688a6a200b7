//! Manifest builders for seeding the mock server.

use k8s_openapi::{
	api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta, ByteString,
};

/// An active namespace.
pub fn namespace(name: &str) -> serde_json::Value {
	serde_json::json!({
		"apiVersion": "v1",
		"kind": "Namespace",
		"metadata": {"name": name},
		"status": {"phase": "Active"}
	})
}

/// A namespace that is being deleted and never goes away.
pub fn terminating_namespace(name: &str) -> serde_json::Value {
	serde_json::json!({
		"apiVersion": "v1",
		"kind": "Namespace",
		"metadata": {
			"name": name,
			"deletionTimestamp": "2024-01-01T00:00:00Z"
		},
		"status": {"phase": "Terminating"}
	})
}

/// An opaque secret. Values are base64-encoded the way the API server
/// returns them.
pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> serde_json::Value {
	let secret = Secret {
		metadata: ObjectMeta {
			name: Some(name.to_string()),
			namespace: Some(namespace.to_string()),
			..ObjectMeta::default()
		},
		data: Some(
			data.iter()
				.map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
				.collect(),
		),
		type_: Some("Opaque".to_string()),
		..Secret::default()
	};
	serde_json::to_value(&secret).expect("secrets serialize")
}
