//! Process-wide settings, fixed for the duration of a run.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
	/// Namespace the backup and restore objects live in.
	pub namespace: String,
	pub backup_name: String,
	pub restore_name: String,
	/// How long a restore waits for terminating namespaces to go away.
	pub resource_terminating_timeout: Duration,
}

impl Default for RunConfig {
	fn default() -> Self {
		Self {
			namespace: "migrator".to_string(),
			backup_name: "backup".to_string(),
			restore_name: "restore".to_string(),
			resource_terminating_timeout: Duration::from_secs(10 * 60),
		}
	}
}
