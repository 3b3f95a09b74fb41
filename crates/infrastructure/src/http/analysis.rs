//! Analysis service client.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use argus_application::ports::AnalysisClient;
use argus_domain::{AnalysisRequest, PipelineError, RiskAssessment};
use argus_shared::config::AnalysisServiceConfig;

use super::{build_client, map_transport_error, read_json};

const DEPENDENCY: &str = "analysis";

pub struct HttpAnalysisClient {
    client: reqwest::Client,
    base_url: String,
    read_timeout: Duration,
}

impl HttpAnalysisClient {
    pub fn new(config: &AnalysisServiceConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_client(DEPENDENCY, config.connect_timeout(), config.read_timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            read_timeout: config.read_timeout(),
        })
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<RiskAssessment, PipelineError> {
        let response = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| map_transport_error(DEPENDENCY, e, self.read_timeout))?;

        let assessment: RiskAssessment = read_json(DEPENDENCY, response).await?;
        debug!(
            batch_id = %request.batch_id,
            risk_score = assessment.risk_score,
            "analysis service responded"
        );
        Ok(assessment)
    }
}
