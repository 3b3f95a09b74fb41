//! HTTP clients for the model services.
//!
//! Transport failures map onto the error taxonomy the resilience layer keys
//! off: timeouts and connection errors are transient, 5xx is transient, 4xx
//! is permanent, and an undecodable success body is a permanent contract
//! violation.

mod analysis;
mod detection;

pub use analysis::HttpAnalysisClient;
pub use detection::HttpDetectionClient;

use argus_domain::PipelineError;
use serde::de::DeserializeOwned;

pub(crate) fn map_transport_error(
    dependency: &str,
    error: reqwest::Error,
    read_timeout: std::time::Duration,
) -> PipelineError {
    if error.is_timeout() {
        PipelineError::DependencyTimeout {
            dependency: dependency.to_string(),
            timeout_ms: read_timeout.as_millis() as u64,
        }
    } else {
        PipelineError::DependencyUnavailable {
            dependency: dependency.to_string(),
            message: error.to_string(),
        }
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    dependency: &str,
    response: reqwest::Response,
) -> Result<T, PipelineError> {
    let status = response.status();
    if status.is_success() {
        response
            .json::<T>()
            .await
            .map_err(|e| PipelineError::MalformedResponse {
                dependency: dependency.to_string(),
                message: e.to_string(),
            })
    } else if status.is_server_error() {
        Err(PipelineError::DependencyUnavailable {
            dependency: dependency.to_string(),
            message: format!("HTTP {status}"),
        })
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(PipelineError::BadRequest {
            dependency: dependency.to_string(),
            message: format!("HTTP {status}: {body}"),
        })
    }
}

pub(crate) fn build_client(
    dependency: &str,
    connect_timeout: std::time::Duration,
    read_timeout: std::time::Duration,
) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .build()
        .map_err(|e| PipelineError::DependencyUnavailable {
            dependency: dependency.to_string(),
            message: format!("failed to build HTTP client: {e}"),
        })
}
