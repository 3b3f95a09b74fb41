//! Configuration loader.
//!
//! Loads configuration from an optional `.env` file and environment
//! variables. Every variable has a production default; deployments override
//! only what differs.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::dto::{
    AnalysisServiceConfig, BatchingConfig, BroadcastConfig, CircuitBreakerSettings,
    DetectionServiceConfig, LoggingConfig, PipelineConfig, RetrySettings, StoreConfig,
    SupervisorConfig, WorkersConfig,
};
use super::error::{ConfigError, Result};
use super::validator::validate_pipeline_config;

/// Loads [`PipelineConfig`] from `.env` + environment variables.
///
/// Values already present in the process environment win over the `.env`
/// file, which is only a convenience for local development.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_file_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(env_file_path: Option<PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load and validate the full pipeline configuration.
    pub fn load(&self) -> Result<PipelineConfig> {
        if let Some(path) = &self.env_file_path {
            if path.exists() {
                dotenvy::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
                    path: path.clone(),
                    source: e,
                })?;
            }
        }

        let config = PipelineConfig {
            store: StoreConfig {
                url: env_or("ARGUS_STORE_URL", "memory://"),
            },
            detection: DetectionServiceConfig {
                base_url: env_or("ARGUS_DETECTION_URL", "http://localhost:8001"),
                connect_timeout_secs: env_parse("ARGUS_DETECTION_CONNECT_TIMEOUT_SECS", 10)?,
                read_timeout_secs: env_parse("ARGUS_DETECTION_READ_TIMEOUT_SECS", 60)?,
            },
            analysis: AnalysisServiceConfig {
                base_url: env_or("ARGUS_ANALYSIS_URL", "http://localhost:8002"),
                connect_timeout_secs: env_parse("ARGUS_ANALYSIS_CONNECT_TIMEOUT_SECS", 10)?,
                read_timeout_secs: env_parse("ARGUS_ANALYSIS_READ_TIMEOUT_SECS", 120)?,
            },
            retry: RetrySettings {
                max_retries: env_parse("ARGUS_RETRY_MAX_RETRIES", 3)?,
                base_delay_ms: env_parse("ARGUS_RETRY_BASE_DELAY_MS", 1_000)?,
                max_delay_ms: env_parse("ARGUS_RETRY_MAX_DELAY_MS", 30_000)?,
            },
            breaker: CircuitBreakerSettings {
                failure_threshold: env_parse("ARGUS_BREAKER_FAILURE_THRESHOLD", 5)?,
                success_threshold: env_parse("ARGUS_BREAKER_SUCCESS_THRESHOLD", 3)?,
                recovery_timeout_secs: env_parse("ARGUS_BREAKER_RECOVERY_TIMEOUT_SECS", 30)?,
                half_open_max_calls: env_parse("ARGUS_BREAKER_HALF_OPEN_MAX_CALLS", 2)?,
            },
            batching: BatchingConfig {
                window_secs: env_parse("ARGUS_BATCH_WINDOW_SECS", 90)?,
                idle_timeout_secs: env_parse("ARGUS_BATCH_IDLE_TIMEOUT_SECS", 30)?,
                max_detections: env_parse("ARGUS_BATCH_MAX_DETECTIONS", 10)?,
                state_ttl_secs: env_parse("ARGUS_BATCH_STATE_TTL_SECS", 3_600)?,
                closing_ttl_secs: env_parse("ARGUS_BATCH_CLOSING_TTL_SECS", 300)?,
                sweep_interval_secs: env_parse("ARGUS_BATCH_SWEEP_INTERVAL_SECS", 5)?,
            },
            broadcast: BroadcastConfig {
                buffer_size: env_parse("ARGUS_BROADCAST_BUFFER_SIZE", 100)?,
                ping_interval_secs: env_parse("ARGUS_BROADCAST_PING_INTERVAL_SECS", 30)?,
                idle_timeout_secs: env_parse("ARGUS_BROADCAST_IDLE_TIMEOUT_SECS", 300)?,
                listener_max_restarts: env_parse("ARGUS_BROADCAST_LISTENER_MAX_RESTARTS", 5)?,
                session_channel_capacity: env_parse("ARGUS_BROADCAST_SESSION_CAPACITY", 256)?,
            },
            supervisor: SupervisorConfig {
                check_interval_secs: env_parse("ARGUS_SUPERVISOR_CHECK_INTERVAL_SECS", 5)?,
                max_restarts: env_parse("ARGUS_SUPERVISOR_MAX_RESTARTS", 5)?,
                restart_base_delay_ms: env_parse("ARGUS_SUPERVISOR_RESTART_BASE_DELAY_MS", 1_000)?,
                restart_max_delay_secs: env_parse("ARGUS_SUPERVISOR_RESTART_MAX_DELAY_SECS", 60)?,
            },
            workers: WorkersConfig {
                pop_timeout_ms: env_parse("ARGUS_WORKER_POP_TIMEOUT_MS", 1_000)?,
                inference_concurrency: env_parse("ARGUS_INFERENCE_CONCURRENCY", 4)?,
            },
            logging: LoggingConfig {
                level: env_or("ARGUS_LOG_LEVEL", "info"),
                json: env_parse("ARGUS_LOG_JSON", false)?,
            },
        };

        validate_pipeline_config(&config)?;
        Ok(config)
    }
}

fn env_or(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
