//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod database;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod worker;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub use self::database::DatabaseConfig;
pub use self::executor::{ExecutorConfig, PayloadDelivery};
pub use self::logging::LoggingConfig;
pub use self::metrics::MetricsConfig;
pub use self::worker::WorkerConfig;

use crate::error::AppError;

/// Bare environment variables accepted for compatibility with older
/// deployments, mapped onto their configuration keys.
const LEGACY_OVERRIDES: &[(&str, &str)] = &[
    ("WORKER_MAX_ATTEMPTS", "worker.max_attempts"),
    ("WORKER_BASE_BACKOFF_SEC", "worker.base_backoff_seconds"),
];

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Worker loop settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Prediction process settings.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `config/default.toml` with an environment-specific overlay,
    /// environment variables prefixed with `PREDICT__`, and finally the
    /// legacy `WORKER_*` variables.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{env}")).required(false))
            .add_source(prefixed_environment());

        Self::build(builder, |key| std::env::var(key).ok())
    }

    /// Load configuration from an explicit file path plus the environment.
    pub fn load_from(path: &str) -> Result<Self, AppError> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(true))
            .add_source(prefixed_environment());

        Self::build(builder, |key| std::env::var(key).ok())
    }

    /// Parse configuration from a TOML string, resolving legacy overrides
    /// through `lookup` instead of the process environment.
    pub fn from_toml_str<F>(toml: &str, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        Self::build(builder, lookup)
    }

    /// Reject values the worker cannot operate with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.database.url.trim().is_empty() {
            return Err(AppError::configuration("database.url must not be empty"));
        }
        if self.worker.max_attempts == 0 {
            return Err(AppError::configuration(
                "worker.max_attempts must be at least 1",
            ));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(AppError::configuration(
                "worker.poll_interval_ms must be greater than zero",
            ));
        }
        if self.executor.program.trim().is_empty() {
            return Err(AppError::configuration("executor.program must not be empty"));
        }
        if let Some(lease) = self.worker.lease_timeout_seconds {
            // A lease shorter than a run would reclaim jobs that are still executing.
            match self.executor.timeout_seconds {
                Some(timeout) if timeout < lease => {}
                Some(timeout) => {
                    return Err(AppError::configuration(format!(
                        "worker.lease_timeout_seconds ({lease}) must exceed executor.timeout_seconds ({timeout})"
                    )));
                }
                None => {
                    return Err(AppError::configuration(
                        "worker.lease_timeout_seconds requires executor.timeout_seconds",
                    ));
                }
            }
        }
        Ok(())
    }

    fn build<F>(builder: ConfigBuilder<DefaultState>, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = apply_legacy_overrides(builder, lookup)?
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let parsed: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        parsed.validate()?;
        Ok(parsed)
    }
}

fn prefixed_environment() -> Environment {
    Environment::with_prefix("PREDICT")
        .separator("__")
        .try_parsing(true)
}

fn apply_legacy_overrides<F>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: F,
) -> Result<ConfigBuilder<DefaultState>, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    for (var, key) in LEGACY_OVERRIDES {
        if let Some(raw) = lookup(var) {
            let value: i64 = raw.trim().parse().map_err(|_| {
                AppError::configuration(format!("{var} must be an integer, got '{raw}'"))
            })?;
            builder = builder.set_override(*key, value)?;
        }
    }
    Ok(builder)
}
