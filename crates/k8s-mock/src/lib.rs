//! Mock Kubernetes API server for testing.
//!
//! Provides an HTTP server that can be used with kubeconfig-based connections.
//! Objects created through the API are kept in memory, so a backup taken from
//! one server can be restored into another and inspected afterwards.

pub mod discovery;
mod helpers;
pub mod http;

pub use discovery::{DiscoveryMode, MockApiResource, MockDiscovery};
pub use helpers::{namespace, secret, terminating_namespace};
pub use http::{HttpMockK8sServer, RunningHttpMockK8sServer};
