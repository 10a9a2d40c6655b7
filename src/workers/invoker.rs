//! Worker invocation: one JSON request in, one JSON envelope out.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::registry::WorkerInfo;
use crate::errors::WorkerError;

/// The envelope every worker prints on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// What a worker receives on stdin.
#[derive(Debug, Serialize)]
pub struct WorkerRequest<'a> {
    pub role: &'a str,
    pub timeout_secs: u64,
    pub payload: &'a Value,
}

/// Abstraction over worker execution for testability.
/// Real implementation: `CommandInvoker`. Test double: `mock::MockInvoker`.
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    async fn invoke(
        &self,
        worker: &WorkerInfo,
        role: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<WorkerResponse, WorkerError>;
}

/// Decode stdout: the whole output as one envelope, else the last line that is one.
pub fn decode_envelope(worker: &str, stdout: &str) -> Result<WorkerResponse, WorkerError> {
    serde_json::from_str::<WorkerResponse>(stdout.trim())
        .ok()
        .or_else(|| {
            stdout
                .lines()
                .rev()
                .map(str::trim)
                .filter(|line| line.starts_with('{'))
                .find_map(|line| serde_json::from_str(line).ok())
        })
        .ok_or_else(|| WorkerError::Decode {
            worker: worker.to_string(),
            message: format!(
                "no JSON envelope in {} bytes of output",
                stdout.len()
            ),
        })
}

/// Runs each worker as a child process in the project directory.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    working_dir: PathBuf,
}

impl CommandInvoker {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl WorkerInvoker for CommandInvoker {
    async fn invoke(
        &self,
        worker: &WorkerInfo,
        role: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<WorkerResponse, WorkerError> {
        let invocation = |message: String| WorkerError::Invocation {
            worker: worker.id.clone(),
            message,
        };

        let request = serde_json::to_vec(&WorkerRequest {
            role,
            timeout_secs: timeout.as_secs(),
            payload,
        })
        .map_err(|e| invocation(format!("failed to encode request: {}", e)))?;

        let mut child = Command::new(&worker.endpoint)
            .args(&worker.args)
            .env("CONDUCTOR_ROLE", role)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| invocation(format!("failed to spawn {}: {}", worker.endpoint, e)))?;

        tracing::debug!(worker = %worker.id, role, pid = child.id().unwrap_or(0), "Worker spawned");

        // A worker may exit without reading its request; its output still decides.
        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(&request).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                tracing::debug!(worker = %worker.id, error = %e, "Worker did not take its request");
            }
        }

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| WorkerError::Timeout {
                worker: worker.id.clone(),
                role: role.to_string(),
                timeout,
            })?
            .map_err(|e| invocation(format!("failed to collect output: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match decode_envelope(&worker.id, &stdout) {
            Ok(response) => Ok(response),
            Err(_) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(invocation(format!(
                    "exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
            Err(e) => Err(e),
        }
    }
}
