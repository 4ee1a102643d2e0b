use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Settings;
use crate::error::{TrackerError, TrackerResult};
use crate::models::{ApplicationFields, ApplicationRecord, RecordId, StatsSnapshot};

// --- Service trait ---

/// The remote Application Records Service.
#[async_trait]
pub trait ApplicationService: Send + Sync {
    async fn stats(&self) -> TrackerResult<StatsSnapshot>;
    async fn list_applications(&self) -> TrackerResult<Vec<ApplicationRecord>>;
    async fn get_application(&self, id: &RecordId) -> TrackerResult<ApplicationRecord>;
    async fn create_application(&self, fields: &ApplicationFields) -> TrackerResult<ApplicationRecord>;
    async fn update_application(
        &self,
        id: &RecordId,
        fields: &ApplicationFields,
    ) -> TrackerResult<ApplicationRecord>;
    async fn delete_application(&self, id: &RecordId) -> TrackerResult<()>;
}

// --- HTTP implementation ---

#[derive(Debug, Clone)]
pub struct HttpApplicationService {
    base_url: String,
    client: Client,
}

impl HttpApplicationService {
    pub fn new(settings: &Settings) -> TrackerResult<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_json<T: DeserializeOwned>(
        response: Response,
        id: Option<&RecordId>,
    ) -> TrackerResult<T> {
        let response = Self::check_status(response, id).await?;
        response
            .json()
            .await
            .map_err(|e| TrackerError::NetworkFailure(format!("Failed to parse response: {}", e)))
    }

    async fn check_status(response: Response, id: Option<&RecordId>) -> TrackerResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match (status, id) {
            (StatusCode::NOT_FOUND, Some(id)) => TrackerError::NotFound(id.clone()),
            (StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY, _) => {
                TrackerError::ValidationFailure(body)
            }
            _ => TrackerError::NetworkFailure(format!(
                "request failed with status {}: {}",
                status, body
            )),
        })
    }
}

#[async_trait]
impl ApplicationService for HttpApplicationService {
    async fn stats(&self) -> TrackerResult<StatsSnapshot> {
        debug!(url = %self.base_url, "GET /stats");
        let response = self.client.get(self.url("/stats")).send().await?;
        Self::read_json(response, None).await
    }

    async fn list_applications(&self) -> TrackerResult<Vec<ApplicationRecord>> {
        debug!(url = %self.base_url, "GET /applications");
        let response = self.client.get(self.url("/applications")).send().await?;
        Self::read_json(response, None).await
    }

    async fn get_application(&self, id: &RecordId) -> TrackerResult<ApplicationRecord> {
        debug!(%id, "GET /applications/{{id}}");
        let response = self
            .client
            .get(self.url(&format!("/applications/{}", id)))
            .send()
            .await?;
        Self::read_json(response, Some(id)).await
    }

    async fn create_application(&self, fields: &ApplicationFields) -> TrackerResult<ApplicationRecord> {
        debug!(company = %fields.company, "POST /applications");
        let response = self
            .client
            .post(self.url("/applications"))
            .json(fields)
            .send()
            .await?;
        Self::read_json(response, None).await
    }

    async fn update_application(
        &self,
        id: &RecordId,
        fields: &ApplicationFields,
    ) -> TrackerResult<ApplicationRecord> {
        debug!(%id, "PUT /applications/{{id}}");
        let response = self
            .client
            .put(self.url(&format!("/applications/{}", id)))
            .json(fields)
            .send()
            .await?;
        Self::read_json(response, Some(id)).await
    }

    async fn delete_application(&self, id: &RecordId) -> TrackerResult<()> {
        debug!(%id, "DELETE /applications/{{id}}");
        let response = self
            .client
            .delete(self.url(&format!("/applications/{}", id)))
            .send()
            .await?;
        Self::check_status(response, Some(id)).await?;
        Ok(())
    }
}
