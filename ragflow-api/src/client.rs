use crate::api::{DatasetApi, RagflowError, RagflowResult};
use crate::config::RagflowConfig;
use crate::types::{ApiEnvelope, CreateDatasetRequest, Dataset, Document, DocumentPage};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

/// HTTP client for a RagFlow server's `/api/v1` endpoints
pub struct RagflowClient {
    client: reqwest::Client,
    config: RagflowConfig,
}

impl RagflowClient {
    pub fn new(config: RagflowConfig) -> RagflowResult<Self> {
        config
            .validate()
            .map_err(|message| RagflowError::InvalidConfig { message })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagflowError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RagflowConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_root(), path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.config.api_key)
    }

    fn handle_http_error(err: reqwest::Error) -> RagflowError {
        if err.is_timeout() {
            RagflowError::ServiceUnavailable {
                message: "Request timeout".to_string(),
            }
        } else if err.is_connect() {
            RagflowError::ServiceUnavailable {
                message: "Cannot connect to RagFlow service".to_string(),
            }
        } else {
            RagflowError::Network(err)
        }
    }

    fn status_error(status: StatusCode, body: String, endpoint: &str) -> RagflowError {
        match status.as_u16() {
            401 | 403 => RagflowError::Authentication,
            404 => RagflowError::NotFound {
                resource: endpoint.to_string(),
            },
            429 => RagflowError::RateLimit,
            503 => RagflowError::ServiceUnavailable {
                message: "RagFlow service unavailable".to_string(),
            },
            code => RagflowError::Api {
                code: i64::from(code),
                message: body,
            },
        }
    }

    async fn envelope<T: DeserializeOwned>(
        response: Response,
        endpoint: &str,
    ) -> RagflowResult<ApiEnvelope<T>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(endpoint, %status, "RagFlow request failed");
            return Err(Self::status_error(status, body, endpoint));
        }

        let bytes = response.bytes().await.map_err(Self::handle_http_error)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn decode<T: DeserializeOwned>(response: Response, endpoint: &str) -> RagflowResult<T> {
        Self::envelope::<T>(response, endpoint)
            .await?
            .into_data(endpoint)
    }
}

#[async_trait]
impl DatasetApi for RagflowClient {
    async fn list_datasets(
        &self,
        name: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> RagflowResult<Vec<Dataset>> {
        debug!(?name, page, page_size, "Listing datasets");

        let mut query = vec![
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
        ];
        if let Some(name) = name {
            query.push(("name", name.to_string()));
        }

        let response = self
            .authorized(self.client.get(self.url("datasets")))
            .query(&query)
            .send()
            .await
            .map_err(Self::handle_http_error)?;

        Self::decode(response, "datasets").await
    }

    async fn create_dataset(&self, request: &CreateDatasetRequest) -> RagflowResult<Dataset> {
        debug!(dataset = %request.name, "Creating dataset");

        let response = self
            .authorized(self.client.post(self.url("datasets")))
            .json(request)
            .send()
            .await
            .map_err(Self::handle_http_error)?;

        Self::decode(response, "datasets").await
    }

    async fn list_documents(
        &self,
        dataset_id: &str,
        page: u32,
        page_size: u32,
    ) -> RagflowResult<Vec<Document>> {
        let endpoint = format!("datasets/{}/documents", dataset_id);
        debug!(dataset_id, page, page_size, "Listing documents");

        let response = self
            .authorized(self.client.get(self.url(&endpoint)))
            .query(&[("page", page), ("page_size", page_size)])
            .send()
            .await
            .map_err(Self::handle_http_error)?;

        let page: DocumentPage = Self::decode(response, &endpoint).await?;
        Ok(page.docs)
    }

    async fn upload_document(
        &self,
        dataset_id: &str,
        file_name: &str,
        content: Vec<u8>,
    ) -> RagflowResult<Vec<Document>> {
        let endpoint = format!("datasets/{}/documents", dataset_id);
        debug!(dataset_id, file_name, bytes = content.len(), "Uploading document");

        let part = Part::bytes(content).file_name(file_name.to_string());
        let form = Form::new().part("file", part);

        let response = self
            .authorized(self.client.post(self.url(&endpoint)))
            .multipart(form)
            .send()
            .await
            .map_err(Self::handle_http_error)?;

        let documents: Vec<Document> = Self::decode(response, &endpoint).await?;
        info!(dataset_id, file_name, count = documents.len(), "Document uploaded");
        Ok(documents)
    }

    async fn parse_documents(
        &self,
        dataset_id: &str,
        document_ids: &[String],
    ) -> RagflowResult<()> {
        let endpoint = format!("datasets/{}/chunks", dataset_id);
        debug!(dataset_id, count = document_ids.len(), "Requesting document parsing");

        let response = self
            .authorized(self.client.post(self.url(&endpoint)))
            .json(&serde_json::json!({ "document_ids": document_ids }))
            .send()
            .await
            .map_err(Self::handle_http_error)?;

        Self::envelope::<serde_json::Value>(response, &endpoint)
            .await?
            .into_status()?;
        info!(dataset_id, count = document_ids.len(), "Document parsing started");
        Ok(())
    }

    async fn health_check(&self) -> RagflowResult<()> {
        debug!("Performing health check");

        // One-item listing exercises both reachability and the API key.
        match self.list_datasets(None, 1, 1).await {
            Ok(_) => {
                info!(base_url = %self.config.base_url, "Health check passed");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Health check failed");
                Err(e)
            }
        }
    }
}
