//! Backup and restore of Kubernetes resources.
//!
//! A backup walks every resource the cluster serves, captures the objects
//! selected by a [`Backup`] and writes them into a gzip archive. A restore
//! replays such an archive against a (possibly different) cluster.

pub mod api;
pub mod archive;
pub mod backup;
pub mod client;
pub mod discovery;
pub mod error;
pub mod podexec;
pub mod restore;

pub use api::{Backup, Restore};
pub use backup::{BackupRequest, BackupSummary, KubernetesBackupper};
pub use client::{CoreClient, DynamicFactory, VersionedClient};
pub use discovery::Helper;
pub use error::EngineError;
pub use podexec::PodCommandExecutor;
pub use restore::{KubernetesRestorer, RestoreRequest, RestoreResult};
