pub mod api;
pub mod client;
pub mod config;
pub mod types;

pub use api::{DatasetApi, RagflowError, RagflowResult};
pub use client::RagflowClient;
pub use config::RagflowConfig;
pub use types::{ApiEnvelope, CreateDatasetRequest, Dataset, Document, DocumentPage};

pub mod prelude {
    pub use crate::api::*;
    pub use crate::client::*;
    pub use crate::config::*;
    pub use crate::types::*;
}
