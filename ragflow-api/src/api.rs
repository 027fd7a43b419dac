use crate::types::{CreateDatasetRequest, Dataset, Document};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

/// RagFlow answers an unknown dataset name with this code instead of an
/// empty list.
pub const CODE_DATA_ERROR: i64 = 102;

#[derive(Error, Debug)]
pub enum RagflowError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("RagFlow API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Response from {endpoint} carried no data")]
    MissingData { endpoint: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Authentication failed")]
    Authentication,
}

pub type RagflowResult<T> = Result<T, RagflowError>;

/// Dataset and document operations of the RagFlow v1 API.
///
/// Implementors provide the raw endpoints; lookups and pagination are
/// provided on top of them.
#[async_trait]
pub trait DatasetApi: Send + Sync {
    async fn list_datasets(
        &self,
        name: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> RagflowResult<Vec<Dataset>>;

    async fn create_dataset(&self, request: &CreateDatasetRequest) -> RagflowResult<Dataset>;

    async fn list_documents(
        &self,
        dataset_id: &str,
        page: u32,
        page_size: u32,
    ) -> RagflowResult<Vec<Document>>;

    async fn upload_document(
        &self,
        dataset_id: &str,
        file_name: &str,
        content: Vec<u8>,
    ) -> RagflowResult<Vec<Document>>;

    /// Queue uploaded documents for chunking. Returns once the server has
    /// accepted the request; parsing itself continues server-side.
    async fn parse_documents(
        &self,
        dataset_id: &str,
        document_ids: &[String],
    ) -> RagflowResult<()>;

    async fn health_check(&self) -> RagflowResult<()>;

    /// First dataset with this exact name, if any
    async fn find_dataset(&self, name: &str) -> RagflowResult<Option<Dataset>> {
        match self.list_datasets(Some(name), 1, 30).await {
            Ok(datasets) => Ok(datasets.into_iter().find(|d| d.name == name)),
            Err(RagflowError::Api { code, message }) if code == CODE_DATA_ERROR => {
                debug!(dataset = name, %message, "Dataset lookup returned no match");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Find the dataset named in `request`, creating it when missing
    async fn ensure_dataset(&self, request: &CreateDatasetRequest) -> RagflowResult<Dataset> {
        if let Some(existing) = self.find_dataset(&request.name).await? {
            debug!(dataset = %existing.name, id = %existing.id, "Dataset already exists");
            return Ok(existing);
        }

        let created = self.create_dataset(request).await?;
        info!(dataset = %created.name, id = %created.id, "Dataset created");
        Ok(created)
    }

    /// Walk every page of a dataset's documents. Stops on an empty page or on
    /// a page shorter than `page_size`.
    async fn list_all_documents(
        &self,
        dataset_id: &str,
        page_size: u32,
    ) -> RagflowResult<Vec<Document>> {
        if page_size == 0 {
            return Err(RagflowError::InvalidConfig {
                message: "Page size must be greater than 0".to_string(),
            });
        }

        let mut all_documents = Vec::new();
        let mut page = 1;

        loop {
            let documents = self.list_documents(dataset_id, page, page_size).await?;
            let count = documents.len();
            all_documents.extend(documents);

            if count < page_size as usize {
                break;
            }
            page += 1;
        }

        debug!(dataset_id, count = all_documents.len(), "Listed documents");
        Ok(all_documents)
    }
}
