//! Prediction executor configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the job input reaches the prediction process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadDelivery {
    /// Appended as the last command-line argument.
    #[default]
    Argument,
    /// Written to the child's stdin, which is then closed.
    Stdin,
}

/// External prediction process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Program to spawn.
    #[serde(default = "default_program")]
    pub program: String,
    /// Fixed arguments placed before the payload.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Payload delivery mode.
    #[serde(default)]
    pub payload_delivery: PayloadDelivery,
    /// Working directory of the child process.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Extra environment variables for the child process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Wall-clock limit for one invocation. Unset means no limit.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ExecutorConfig {
    /// Invocation timeout as a [`Duration`], if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            payload_delivery: PayloadDelivery::default(),
            working_dir: None,
            env: HashMap::new(),
            timeout_seconds: None,
        }
    }
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["ai/virality.py".to_string()]
}
