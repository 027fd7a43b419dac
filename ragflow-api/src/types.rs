use crate::api::{RagflowError, RagflowResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every RagFlow response is wrapped in `{ code, data, message }`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap `data`, turning a non-zero `code` into an error
    pub fn into_data(self, endpoint: &str) -> RagflowResult<T> {
        if self.code != 0 {
            return Err(RagflowError::Api {
                code: self.code,
                message: self.message.unwrap_or_default(),
            });
        }

        self.data.ok_or_else(|| RagflowError::MissingData {
            endpoint: endpoint.to_string(),
        })
    }

    /// Check `code` only, for endpoints that acknowledge without a payload
    pub fn into_status(self) -> RagflowResult<()> {
        if self.code != 0 {
            return Err(RagflowError::Api {
                code: self.code,
                message: self.message.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub chunk_method: Option<String>,
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub document_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, alias = "create_date")]
    pub created_at: Option<String>,
    #[serde(default, alias = "update_date")]
    pub updated_at: Option<String>,
    /// Parsing state reported by the server, e.g. `UNSTART` or `DONE`
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default, alias = "meta_fields")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// `data` of the document listing endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPage {
    #[serde(default)]
    pub docs: Vec<Document>,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateDatasetRequest {
    pub name: String,
    pub avatar: String,
    pub description: String,
    pub embedding_model: String,
    pub permission: String,
    pub chunk_method: String,
}

impl CreateDatasetRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            avatar: String::new(),
            description: "This is a Logseq dataset".to_string(),
            embedding_model: "BAAI/bge-large-zh-v1.5".to_string(),
            permission: "me".to_string(),
            chunk_method: "naive".to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_chunk_method(mut self, chunk_method: impl Into<String>) -> Self {
        self.chunk_method = chunk_method.into();
        self
    }
}
