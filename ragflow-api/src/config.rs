use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagflowConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub timeout: Duration,
    pub page_size: u32,
}

impl Default for RagflowConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9380".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl RagflowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Base URL without a trailing slash
    pub fn api_root(&self) -> String {
        format!("{}/api/v1", self.base_url.trim_end_matches('/'))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("Base URL cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("Base URL must start with http:// or https://".to_string());
        }

        if self.api_key.trim().is_empty() {
            return Err("API key cannot be empty".to_string());
        }

        if self.page_size == 0 {
            return Err("Page size must be greater than 0".to_string());
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
