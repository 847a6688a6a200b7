//! Running commands inside pod containers.

use std::time::Duration;

use kube::api::AttachParams;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::instrument;

use crate::client::CoreClient;

/// Default bound on a single hook command.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PodExecError {
	#[error("hook command is empty")]
	EmptyCommand,

	#[error("attaching to pod {namespace}/{pod}")]
	Attach {
		namespace: String,
		pod: String,
		#[source]
		source: kube::Error,
	},

	#[error("reading command output")]
	Output(#[source] std::io::Error),

	#[error("command in pod {namespace}/{pod} did not finish within {timeout:?}")]
	Timeout {
		namespace: String,
		pod: String,
		timeout: Duration,
	},

	#[error("command in pod {namespace}/{pod} failed: {message}")]
	Failed {
		namespace: String,
		pod: String,
		message: String,
	},
}

/// A command to run in a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecHook {
	/// Container to run in; the pod's default container when unset.
	pub container: Option<String>,
	pub command: Vec<String>,
	pub timeout: Duration,
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
	pub stdout: String,
	pub stderr: String,
}

/// Executes commands in pods through the API server's exec subresource.
#[derive(Clone)]
pub struct PodCommandExecutor {
	core: CoreClient,
}

impl PodCommandExecutor {
	pub fn new(core: &CoreClient) -> Self {
		Self { core: core.clone() }
	}

	#[instrument(skip(self, hook), fields(command = ?hook.command))]
	pub async fn execute(
		&self,
		namespace: &str,
		pod: &str,
		hook: &ExecHook,
	) -> Result<ExecOutput, PodExecError> {
		if hook.command.is_empty() {
			return Err(PodExecError::EmptyCommand);
		}

		tokio::time::timeout(hook.timeout, self.run(namespace, pod, hook))
			.await
			.map_err(|_| PodExecError::Timeout {
				namespace: namespace.to_string(),
				pod: pod.to_string(),
				timeout: hook.timeout,
			})?
	}

	async fn run(&self, namespace: &str, pod: &str, hook: &ExecHook) -> Result<ExecOutput, PodExecError> {
		let mut params = AttachParams::default().stdin(false).stdout(true).stderr(true);
		if let Some(container) = &hook.container {
			params = params.container(container.clone());
		}

		let mut attached = self
			.core
			.pods(namespace)
			.exec(pod, hook.command.clone(), &params)
			.await
			.map_err(|source| PodExecError::Attach {
				namespace: namespace.to_string(),
				pod: pod.to_string(),
				source,
			})?;

		let status = attached.take_status();
		let (stdout, stderr) = tokio::join!(read_all(attached.stdout()), read_all(attached.stderr()));
		let output = ExecOutput {
			stdout: stdout.map_err(PodExecError::Output)?,
			stderr: stderr.map_err(PodExecError::Output)?,
		};

		let status = match status {
			Some(status) => status.await,
			None => None,
		};
		if let Some(status) = status {
			if status.status.as_deref() == Some("Failure") {
				return Err(PodExecError::Failed {
					namespace: namespace.to_string(),
					pod: pod.to_string(),
					message: status.message.unwrap_or_default(),
				});
			}
		}

		tracing::debug!(stdout = %output.stdout, stderr = %output.stderr, "hook finished");
		Ok(output)
	}
}

async fn read_all(stream: Option<impl AsyncRead + Unpin>) -> std::io::Result<String> {
	let mut buf = String::new();
	if let Some(mut stream) = stream {
		stream.read_to_string(&mut buf).await?;
	}
	Ok(buf)
}
