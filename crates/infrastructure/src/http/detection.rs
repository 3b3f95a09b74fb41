//! Detection service client.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use argus_application::ports::DetectionClient;
use argus_domain::{DetectionJob, PipelineError, RawDetection};
use argus_shared::config::DetectionServiceConfig;

use super::{build_client, map_transport_error, read_json};

const DEPENDENCY: &str = "detection";

#[derive(Debug, Deserialize)]
struct DetectResponse {
    detections: Vec<RawDetection>,
}

pub struct HttpDetectionClient {
    client: reqwest::Client,
    base_url: String,
    read_timeout: Duration,
}

impl HttpDetectionClient {
    pub fn new(config: &DetectionServiceConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_client(DEPENDENCY, config.connect_timeout(), config.read_timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            read_timeout: config.read_timeout(),
        })
    }
}

#[async_trait]
impl DetectionClient for HttpDetectionClient {
    async fn detect(&self, job: &DetectionJob) -> Result<Vec<RawDetection>, PipelineError> {
        // An unreadable image cannot recover on retry.
        let bytes = tokio::fs::read(&job.image_ref)
            .await
            .map_err(|e| PipelineError::BadRequest {
                dependency: DEPENDENCY.to_string(),
                message: format!("unreadable image `{}`: {e}", job.image_ref),
            })?;

        let form = Form::new()
            .part("image", Part::bytes(bytes).file_name("frame.jpg"))
            .text("camera_id", job.camera_id.as_str().to_string())
            .text("captured_at", job.captured_at.to_rfc3339());

        let response = self
            .client
            .post(format!("{}/detect", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_transport_error(DEPENDENCY, e, self.read_timeout))?;

        let parsed: DetectResponse = read_json(DEPENDENCY, response).await?;
        debug!(
            camera_id = %job.camera_id,
            detections = parsed.detections.len(),
            "detection service responded"
        );
        Ok(parsed.detections)
    }
}
