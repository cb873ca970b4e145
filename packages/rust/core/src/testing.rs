//! Helpers shared by this crate's tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::{MockServer, ResponseTemplate};

use sitecast_shared::{CrawledPage, DomainRecord, LlmConfig, PageType, RetryPolicy};
use sitecast_storage::Storage;

use crate::llm::{ACTIVE_PROVIDER_KEY, LlmClient};

pub async fn temp_storage() -> Arc<Storage> {
    let path = std::env::temp_dir().join(format!("sitecast_core_{}.db", Uuid::now_v7()));
    Arc::new(Storage::open(&path).await.expect("open test db"))
}

pub async fn seeded_domain(storage: &Storage) -> DomainRecord {
    let mut domain = DomainRecord::new("https://shop.example.com", "Example Shop");
    domain.primary_goal = Some("Grow newsletter signups".into());
    storage.insert_domain(&domain).await.expect("insert domain");
    domain
}

pub fn page(url: &str, title: &str, body: &str) -> CrawledPage {
    CrawledPage {
        id: Uuid::now_v7().to_string(),
        url: url.into(),
        title: title.into(),
        headings: Vec::new(),
        body_text: body.into(),
        internal_links: Vec::new(),
        page_type: PageType::Other,
        content_hash: format!("hash-{url}"),
        crawled_at: Utc::now(),
    }
}

/// Point a `custom` provider at the mock server and build a client with
/// millisecond retry delays.
pub async fn llm_for(storage: &Arc<Storage>, server: &MockServer) -> Arc<LlmClient> {
    storage
        .set_setting(ACTIVE_PROVIDER_KEY, "custom")
        .await
        .expect("set provider");
    storage
        .set_setting("custom_base_url", &server.uri())
        .await
        .expect("set base url");
    storage
        .set_setting("custom_api_key", "test-key")
        .await
        .expect("set key");

    let config = LlmConfig {
        api_key_env: format!("SITECAST_TEST_UNSET_{}", Uuid::now_v7().simple()),
        ..LlmConfig::default()
    };
    let retry = RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(5),
    };
    Arc::new(LlmClient::new(Arc::clone(storage), config, retry))
}

pub fn completion(content: &serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content.to_string() } }]
    }))
}
