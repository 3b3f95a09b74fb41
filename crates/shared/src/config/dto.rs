//! Configuration DTOs.
//!
//! A single immutable tree loaded at startup and handed to services via
//! dependency injection. Durations are stored in integral units matching the
//! environment variables; accessor methods convert to `std::time::Duration`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Single source of truth for all pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub detection: DetectionServiceConfig,
    pub analysis: AnalysisServiceConfig,
    pub retry: RetrySettings,
    pub breaker: CircuitBreakerSettings,
    pub batching: BatchingConfig,
    pub broadcast: BroadcastConfig,
    pub supervisor: SupervisorConfig,
    pub workers: WorkersConfig,
    pub logging: LoggingConfig,
}

/// Shared store (state, queues, pub/sub) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection URL. `memory://` selects the in-process adapter.
    pub url: String,
}

/// Detection model service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionServiceConfig {
    /// Base URL, e.g. `http://localhost:8001`.
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl DetectionServiceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// LLM risk-analysis service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisServiceConfig {
    /// Base URL, e.g. `http://localhost:8002`.
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl AnalysisServiceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Retry/backoff settings shared by every outbound call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Per-dependency circuit breaker settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub half_open_max_calls: u32,
}

impl CircuitBreakerSettings {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout_secs: 30,
            half_open_max_calls: 2,
        }
    }
}

/// Batch aggregation windows and TTLs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Hard window: a batch closes this long after it opened.
    pub window_secs: u64,
    /// Idle window: a batch closes this long after its last detection.
    pub idle_timeout_secs: u64,
    /// Size limit: the batch closes immediately at this many detections.
    pub max_detections: usize,
    /// TTL on every batch-scoped key; orphaned state expires on its own.
    pub state_ttl_secs: u64,
    /// TTL of the closing marker guarding racing close attempts.
    pub closing_ttl_secs: u64,
    /// Interval of the timeout sweep.
    pub sweep_interval_secs: u64,
}

impl BatchingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    pub fn closing_ttl(&self) -> Duration {
        Duration::from_secs(self.closing_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            window_secs: 90,
            idle_timeout_secs: 30,
            max_detections: 10,
            state_ttl_secs: 3_600,
            closing_ttl_secs: 300,
            sweep_interval_secs: 5,
        }
    }
}

/// Live-client broadcasting settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Replay ring buffer capacity.
    pub buffer_size: usize,
    pub ping_interval_secs: u64,
    /// Sessions silent for this long are disconnected.
    pub idle_timeout_secs: u64,
    /// Restart budget for the channel-subscription listener.
    pub listener_max_restarts: u32,
    /// Bounded per-session outbound channel.
    pub session_channel_capacity: usize,
}

impl BroadcastConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            ping_interval_secs: 30,
            idle_timeout_secs: 300,
            listener_max_restarts: 5,
            session_channel_capacity: 256,
        }
    }
}

/// Worker supervision settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub check_interval_secs: u64,
    /// Default restart ceiling for registered workers.
    pub max_restarts: u32,
    pub restart_base_delay_ms: u64,
    pub restart_max_delay_secs: u64,
}

impl SupervisorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn restart_base_delay(&self) -> Duration {
        Duration::from_millis(self.restart_base_delay_ms)
    }

    pub fn restart_max_delay(&self) -> Duration {
        Duration::from_secs(self.restart_max_delay_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            max_restarts: 5,
            restart_base_delay_ms: 1_000,
            restart_max_delay_secs: 60,
        }
    }
}

/// Queue worker tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Blocking-pop timeout; bounds how long shutdown waits on an idle pull.
    pub pop_timeout_ms: u64,
    /// Shared semaphore capacity bounding in-flight model calls.
    pub inference_concurrency: usize,
}

impl WorkersConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            pop_timeout_ms: 1_000,
            inference_concurrency: 4,
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `argus=debug,info`.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
