//! Configuration validation.
//!
//! Rejects configurations that would boot into an unusable pipeline:
//! zero thresholds, inverted window pairs, empty endpoints.

use super::dto::PipelineConfig;
use super::error::{ConfigError, Result};

pub fn validate_pipeline_config(config: &PipelineConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    if config.store.url.is_empty() {
        errors.push("store.url must not be empty".to_string());
    }
    if config.detection.base_url.is_empty() {
        errors.push("detection.base_url must not be empty".to_string());
    }
    if config.analysis.base_url.is_empty() {
        errors.push("analysis.base_url must not be empty".to_string());
    }

    if config.breaker.failure_threshold == 0 {
        errors.push("breaker.failure_threshold must be >= 1".to_string());
    }
    if config.breaker.success_threshold == 0 {
        errors.push("breaker.success_threshold must be >= 1".to_string());
    }
    if config.breaker.half_open_max_calls == 0 {
        errors.push("breaker.half_open_max_calls must be >= 1".to_string());
    }

    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        errors.push("retry.base_delay_ms must not exceed retry.max_delay_ms".to_string());
    }

    if config.batching.max_detections == 0 {
        errors.push("batching.max_detections must be >= 1".to_string());
    }
    if config.batching.idle_timeout_secs > config.batching.window_secs {
        errors.push("batching.idle_timeout_secs must not exceed batching.window_secs".to_string());
    }
    if config.batching.window_secs >= config.batching.state_ttl_secs {
        errors.push("batching.state_ttl_secs must exceed batching.window_secs".to_string());
    }
    if config.batching.sweep_interval_secs == 0 {
        errors.push("batching.sweep_interval_secs must be >= 1".to_string());
    }

    if config.broadcast.buffer_size == 0 {
        errors.push("broadcast.buffer_size must be >= 1".to_string());
    }
    if config.broadcast.ping_interval_secs >= config.broadcast.idle_timeout_secs {
        errors.push(
            "broadcast.ping_interval_secs must be below broadcast.idle_timeout_secs".to_string(),
        );
    }

    if config.workers.inference_concurrency == 0 {
        errors.push("workers.inference_concurrency must be >= 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dto::*;

    fn valid_config() -> PipelineConfig {
        PipelineConfig {
            store: StoreConfig {
                url: "memory://".to_string(),
            },
            detection: DetectionServiceConfig {
                base_url: "http://localhost:8001".to_string(),
                connect_timeout_secs: 10,
                read_timeout_secs: 60,
            },
            analysis: AnalysisServiceConfig {
                base_url: "http://localhost:8002".to_string(),
                connect_timeout_secs: 10,
                read_timeout_secs: 120,
            },
            retry: RetrySettings::default(),
            breaker: CircuitBreakerSettings::default(),
            batching: BatchingConfig::default(),
            broadcast: BroadcastConfig::default(),
            supervisor: SupervisorConfig::default(),
            workers: WorkersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate_pipeline_config(&valid_config()).is_ok());
    }

    #[test]
    fn zero_failure_threshold_is_rejected() {
        let mut config = valid_config();
        config.breaker.failure_threshold = 0;
        let err = validate_pipeline_config(&config).unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));
    }

    #[test]
    fn idle_timeout_above_window_is_rejected() {
        let mut config = valid_config();
        config.batching.idle_timeout_secs = 120;
        config.batching.window_secs = 90;
        assert!(validate_pipeline_config(&config).is_err());
    }
}
