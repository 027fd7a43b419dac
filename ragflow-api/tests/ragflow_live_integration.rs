//! Runs against a live stack brought up with `ragstack deploy`.
//! Requires RAGFLOW_API_KEY (and optionally RAGFLOW_BASE_URL).

use ragflow_api::{CreateDatasetRequest, DatasetApi, RagflowClient, RagflowConfig};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(60);
const DATASET: &str = "ragstack_integration";

fn make_client() -> RagflowClient {
    let api_key = std::env::var("RAGFLOW_API_KEY").expect("RAGFLOW_API_KEY must be set");
    let base_url =
        std::env::var("RAGFLOW_BASE_URL").unwrap_or_else(|_| "http://localhost:9380".to_string());

    RagflowClient::new(
        RagflowConfig::default()
            .with_base_url(base_url)
            .with_api_key(api_key)
            .with_timeout(TIMEOUT),
    )
    .expect("client creation")
}

#[tokio::test]
#[ignore]
async fn test_health_check() {
    let client = make_client();
    tokio::time::timeout(TIMEOUT, client.health_check())
        .await
        .expect("health_check timed out")
        .expect("health_check failed");
}

#[tokio::test]
#[ignore]
async fn test_upload_and_list() {
    let client = make_client();

    let dataset = client
        .ensure_dataset(&CreateDatasetRequest::new(DATASET))
        .await
        .expect("ensure_dataset failed");
    assert_eq!(dataset.name, DATASET);

    let again = client
        .ensure_dataset(&CreateDatasetRequest::new(DATASET))
        .await
        .expect("second ensure_dataset failed");
    assert_eq!(dataset.id, again.id, "dataset must not be created twice");

    let uploaded = client
        .upload_document(
            &dataset.id,
            "ragstack-integration.md",
            b"# ragstack\n\nintegration test note\n".to_vec(),
        )
        .await
        .expect("upload failed");
    assert_eq!(uploaded.len(), 1);

    let documents = client
        .list_all_documents(&dataset.id, 30)
        .await
        .expect("listing failed");
    assert!(
        documents.iter().any(|d| d.id == uploaded[0].id),
        "uploaded document must be listed"
    );

    let ids: Vec<String> = uploaded.iter().map(|d| d.id.clone()).collect();
    client
        .parse_documents(&dataset.id, &ids)
        .await
        .expect("parse request failed");
}
