//! Command line surface.

use std::{fmt, path::PathBuf, time::Duration};

use clap::Parser;
use thiserror::Error;
use tracing::Level;

use crate::k8s::credentials::CredentialLocator;

#[derive(Parser, Debug, Default)]
#[command(name = "migrator")]
#[command(about = "Back up and restore workloads on a local or remote Kubernetes cluster", long_about = None)]
#[command(version = env!("MIGRATOR_VERSION"))]
pub struct Cli {
	/// Action to perform: backup or restore
	#[arg(short = 'a', long, default_value = "")]
	pub action: String,

	/// Backup archive location
	#[arg(short = 'p', long, default_value = "")]
	pub path: String,

	/// Name of the secret holding remote cluster credentials
	#[arg(short = 's', long, default_value = "")]
	pub secret: String,

	/// Namespace of the credentials secret
	#[arg(short = 'n', long, default_value = "")]
	pub secret_namespace: String,

	/// Comma-separated namespaces to back up (all when empty)
	#[arg(short = 'i', long, default_value = "")]
	pub include_namespaces: String,

	/// Log level (overrides RUST_LOG)
	#[arg(long)]
	pub log_level: Option<Level>,

	/// Abort the run after this many seconds
	#[arg(long, value_name = "SECONDS")]
	pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	Backup,
	Restore,
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Action::Backup => "backup",
			Action::Restore => "restore",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
	#[error("action must be either backup or restore")]
	Action,

	#[error("backup file location must not be empty")]
	EmptyPath,

	#[error("provide both remote cluster credentials secret and its namespace or neither")]
	SecretPair,
}

/// A validated command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
	pub action: Action,
	pub path: PathBuf,
	pub locator: CredentialLocator,
	pub included_namespaces: Vec<String>,
	pub timeout: Option<Duration>,
}

impl Cli {
	/// Check argument combinations, in the order action, path, secret pair.
	pub fn validate(&self) -> Result<Invocation, ValidationError> {
		let action = match self.action.as_str() {
			"backup" => Action::Backup,
			"restore" => Action::Restore,
			_ => return Err(ValidationError::Action),
		};

		let path = clean_path(&self.path);
		if path.is_empty() {
			return Err(ValidationError::EmptyPath);
		}

		if self.secret.is_empty() != self.secret_namespace.is_empty() {
			return Err(ValidationError::SecretPair);
		}

		Ok(Invocation {
			action,
			path: PathBuf::from(path),
			locator: CredentialLocator::new(&self.secret, &self.secret_namespace),
			included_namespaces: self
				.include_namespaces
				.split(',')
				.map(str::trim)
				.filter(|ns| !ns.is_empty())
				.map(String::from)
				.collect(),
			timeout: self.timeout.map(Duration::from_secs),
		})
	}
}

/// Lexically normalise a slash-separated path: collapse repeated separators,
/// drop `.` and resolve `..` against preceding components.
///
/// An empty path stays empty.
pub fn clean_path(path: &str) -> String {
	if path.is_empty() {
		return String::new();
	}

	let rooted = path.starts_with('/');
	let mut parts: Vec<&str> = Vec::new();
	for part in path.split('/') {
		match part {
			"" | "." => {}
			".." => {
				if parts.last().is_some_and(|last| *last != "..") {
					parts.pop();
				} else if !rooted {
					parts.push("..");
				}
			}
			_ => parts.push(part),
		}
	}

	let joined = parts.join("/");
	if rooted {
		format!("/{joined}")
	} else if joined.is_empty() {
		".".to_string()
	} else {
		joined
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use clap::CommandFactory;
	use rstest::rstest;

	use super::*;

	fn parse(args: &[&str]) -> Cli {
		Cli::try_parse_from(std::iter::once("migrator").chain(args.iter().copied())).unwrap()
	}

	#[test]
	fn test_cli_definition() {
		Cli::command().debug_assert();
	}

	#[test]
	fn test_backup_invocation() {
		let invocation = parse(&["-a", "backup", "-p", "/tmp/out//backup.tar", "-i", "default"])
			.validate()
			.unwrap();

		assert_eq!(
			invocation,
			Invocation {
				action: Action::Backup,
				path: PathBuf::from("/tmp/out/backup.tar"),
				locator: CredentialLocator::default(),
				included_namespaces: vec!["default".to_string()],
				timeout: None,
			}
		);
	}

	#[test]
	fn test_remote_restore_invocation() {
		let invocation = parse(&[
			"--action=restore",
			"--path=archive.tar",
			"-s",
			"remote",
			"-n",
			"ops",
			"-i",
			"default, apps,",
			"--timeout",
			"90",
		])
		.validate()
		.unwrap();

		assert_eq!(invocation.action, Action::Restore);
		assert_eq!(invocation.locator, CredentialLocator::new("remote", "ops"));
		assert_eq!(invocation.included_namespaces, vec!["default", "apps"]);
		assert_eq!(invocation.timeout, Some(Duration::from_secs(90)));
	}

	#[test]
	fn test_unknown_action() {
		let result = parse(&["-a", "foo", "-p", "x"]).validate();

		assert_matches!(result, Err(ValidationError::Action));
		assert_eq!(
			ValidationError::Action.to_string(),
			"action must be either backup or restore"
		);
	}

	#[test]
	fn test_action_is_checked_before_path() {
		assert_matches!(parse(&[]).validate(), Err(ValidationError::Action));
		assert_matches!(parse(&["-a", "backup"]).validate(), Err(ValidationError::EmptyPath));
	}

	#[rstest]
	#[case::name_only(&["-s", "remote"])]
	#[case::namespace_only(&["-n", "ops"])]
	fn test_secret_pair(#[case] extra: &[&str]) {
		let mut args = vec!["-a", "backup", "-p", "backup.tar"];
		args.extend_from_slice(extra);

		assert_matches!(parse(&args).validate(), Err(ValidationError::SecretPair));
	}

	#[rstest]
	#[case("", "")]
	#[case("backup.tar", "backup.tar")]
	#[case("./out/../backup.tar", "backup.tar")]
	#[case("/tmp//out/./backup.tar", "/tmp/out/backup.tar")]
	#[case("/../backup.tar", "/backup.tar")]
	#[case("../up/backup.tar", "../up/backup.tar")]
	#[case("out/..", ".")]
	#[case("/", "/")]
	fn test_clean_path(#[case] input: &str, #[case] expected: &str) {
		assert_eq!(clean_path(input), expected);
	}
}
