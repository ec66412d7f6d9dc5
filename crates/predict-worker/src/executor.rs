//! Prediction executor adapter.
//!
//! The processor hands each job's `input` to a [`PredictionExecutor`] and
//! only looks at the exit code and captured output. [`SubprocessExecutor`]
//! runs the configured prediction program as a child process.

use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};

use predict_core::config::{ExecutorConfig, PayloadDelivery};

/// Errors raised when the prediction program could not be run to completion.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The process could not be started.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that was being launched
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Writing the payload or collecting output failed.
    #[error("I/O error while running prediction: {0}")]
    Io(#[from] std::io::Error),

    /// The process did not finish in time and was killed.
    #[error("Prediction timed out after {0} seconds")]
    Timeout(u64),

    /// The job input could not be serialized.
    #[error("Failed to serialize prediction input: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Captured result of one prediction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Process exit code; `-1` when terminated by a signal.
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ExecutionOutput {
    /// Whether the run exited cleanly.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a prediction for a job's input.
#[async_trait]
pub trait PredictionExecutor: Send + Sync + std::fmt::Debug {
    /// Execute the prediction, returning the raw process outcome.
    async fn execute(&self, input: &Value) -> Result<ExecutionOutput, ExecutorError>;
}

/// Executor that spawns the configured program per job.
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    config: ExecutorConfig,
}

impl SubprocessExecutor {
    /// Create an executor from configuration.
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn command(&self, payload: &str) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match self.config.payload_delivery {
            PayloadDelivery::Argument => {
                cmd.arg(payload).stdin(Stdio::null());
            }
            PayloadDelivery::Stdin => {
                cmd.stdin(Stdio::piped());
            }
        }

        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        cmd
    }

    async fn run(&self, payload: String) -> Result<ExecutionOutput, ExecutorError> {
        let mut child = self
            .command(&payload)
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: self.config.program.clone(),
                source,
            })?;

        // Feed stdin while draining stdout/stderr so a chatty child never
        // blocks on a full pipe.
        let stdin = child.stdin.take();
        let (fed, output) = tokio::join!(
            feed_stdin(stdin, payload.as_bytes()),
            child.wait_with_output()
        );
        let output = output?;
        fed?;

        Ok(ExecutionOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Write the payload and close stdin. A child that exits without reading
/// its input is not an error.
async fn feed_stdin(stdin: Option<ChildStdin>, payload: &[u8]) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    let written = match stdin.write_all(payload).await {
        Ok(()) => stdin.shutdown().await,
        Err(e) => Err(e),
    };
    match written {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

#[async_trait]
impl PredictionExecutor for SubprocessExecutor {
    async fn execute(&self, input: &Value) -> Result<ExecutionOutput, ExecutorError> {
        let payload = serde_json::to_string(input)?;
        let start = Instant::now();

        tracing::debug!(
            "Running prediction: program='{}', args={:?}, delivery={:?}",
            self.config.program,
            self.config.args,
            self.config.payload_delivery
        );

        let output = match self.config.timeout_seconds {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.run(payload))
                .await
                .map_err(|_| {
                    tracing::warn!(
                        "Prediction timed out after {}s: program='{}'",
                        secs,
                        self.config.program
                    );
                    ExecutorError::Timeout(secs)
                })??,
            None => self.run(payload).await?,
        };

        tracing::debug!(
            "Prediction finished: exit_code={}, duration={}ms",
            output.exit_code,
            start.elapsed().as_millis()
        );
        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh(script: &str, delivery: PayloadDelivery) -> SubprocessExecutor {
        SubprocessExecutor::new(ExecutorConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            payload_delivery: delivery,
            ..ExecutorConfig::default()
        })
    }

    #[tokio::test]
    async fn test_payload_as_last_argument() {
        let executor = sh("printf '%s' \"$1\"", PayloadDelivery::Argument);
        let output = executor.execute(&json!({"title": "x"})).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, r#"{"title":"x"}"#);
    }

    #[tokio::test]
    async fn test_payload_on_stdin() {
        let executor = sh("cat", PayloadDelivery::Stdin);
        let output = executor.execute(&json!([1, 2])).await.unwrap();
        assert_eq!(output.stdout, "[1,2]");
    }

    fn large_payload() -> Value {
        json!({ "caption": "x".repeat(1 << 20) })
    }

    #[tokio::test]
    async fn test_large_stdin_payload_echoed_back() {
        let mut executor = sh("cat", PayloadDelivery::Stdin);
        executor.config.timeout_seconds = Some(20);
        let input = large_payload();

        let output = executor.execute(&input).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.len(), serde_json::to_string(&input).unwrap().len());
    }

    #[tokio::test]
    async fn test_child_ignoring_stdin_still_succeeds() {
        let mut executor = sh("echo '{\"score\":1}'", PayloadDelivery::Stdin);
        executor.config.timeout_seconds = Some(20);

        let output = executor.execute(&large_payload()).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), r#"{"score":1}"#);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported_not_raised() {
        let executor = sh("echo oops >&2; exit 3", PayloadDelivery::Argument);
        let output = executor.execute(&json!({})).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_signal_kill_reports_minus_one() {
        let executor = sh("kill -9 $$", PayloadDelivery::Argument);
        let output = executor.execute(&json!({})).await.unwrap();
        assert_eq!(output.exit_code, -1);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let executor = SubprocessExecutor::new(ExecutorConfig {
            program: "/nonexistent/predict-binary".to_string(),
            args: vec![],
            ..ExecutorConfig::default()
        });
        let err = executor.execute(&json!({})).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let mut executor = sh("sleep 10", PayloadDelivery::Argument);
        executor.config.timeout_seconds = Some(1);
        let err = executor.execute(&json!({})).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Timeout(1)));
    }
}
