//! LLM call adapter.
//!
//! Resolves the active provider from the settings store on every call,
//! sends one OpenAI-compatible chat completion, retries only on HTTP 429,
//! and parses the reply as JSON after stripping Markdown code fences.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use sitecast_shared::{LlmConfig, Result, RetryPolicy, SitecastError};
use sitecast_storage::Storage;

/// Settings key naming the active provider.
pub const ACTIVE_PROVIDER_KEY: &str = "active_provider";

/// Providers that refuse requests without an API key.
const KEYED_PROVIDERS: &[&str] = &["openai", "anthropic", "google", "openrouter"];

/// Providers known to accept `response_format: json_object`.
const JSON_MODE_PROVIDERS: &[&str] = &["openai", "openrouter"];

/// Built-in endpoint defaults for providers other than the configured one.
const PROVIDER_DEFAULTS: &[(&str, &str, &str)] = &[
    ("openai", "https://api.openai.com/v1", "gpt-4o-mini"),
    ("anthropic", "https://api.anthropic.com", "claude-sonnet-4-20250514"),
    (
        "google",
        "https://generativelanguage.googleapis.com/v1beta/openai/",
        "gemini-2.0-flash",
    ),
    ("ollama", "http://localhost:11434/v1", "llama3.1"),
    ("lmstudio", "http://localhost:1234/v1", ""),
    ("openrouter", "https://openrouter.ai/api/v1", ""),
];

// ---------------------------------------------------------------------------
// Provider resolution
// ---------------------------------------------------------------------------

/// Fully resolved provider for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl ProviderConfig {
    /// The part of the config that determines the HTTP client.
    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
        }
    }

    /// Whether the request may ask for a JSON object response.
    pub fn supports_json_mode(&self) -> bool {
        JSON_MODE_PROVIDERS.contains(&self.provider.as_str()) || self.base_url.contains("openai.com")
    }
}

/// Values that decide whether a cached client can be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionKey {
    pub api_key: String,
    pub base_url: String,
}

/// Environment-level provider defaults.
#[derive(Debug, Clone, Default)]
pub struct ProviderEnv {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

impl ProviderEnv {
    /// Read the API key from `api_key_env` plus `OPENAI_BASE_URL` and `OPENAI_MODEL`.
    pub fn from_env(api_key_env: &str) -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            api_key: read(api_key_env),
            base_url: read("OPENAI_BASE_URL"),
            model: read("OPENAI_MODEL"),
        }
    }
}

/// Resolve the active provider: settings first, then environment, then
/// config (for the configured provider) or built-in defaults (for others).
pub fn resolve_provider(
    settings: &BTreeMap<String, String>,
    env: &ProviderEnv,
    config: &LlmConfig,
) -> Result<ProviderConfig> {
    let setting = |key: String| settings.get(&key).filter(|v| !v.is_empty()).cloned();

    let provider = setting(ACTIVE_PROVIDER_KEY.to_string()).unwrap_or_else(|| config.provider.clone());

    let (default_base_url, default_model) = if provider == config.provider {
        (config.base_url.clone(), config.model.clone())
    } else {
        PROVIDER_DEFAULTS
            .iter()
            .find(|(name, _, _)| *name == provider)
            .map(|(_, url, model)| (url.to_string(), model.to_string()))
            .unwrap_or_else(|| (config.base_url.clone(), config.model.clone()))
    };

    let api_key = setting(format!("{provider}_api_key"))
        .or_else(|| env.api_key.clone())
        .unwrap_or_default();
    let base_url = setting(format!("{provider}_base_url"))
        .or_else(|| env.base_url.clone())
        .unwrap_or(default_base_url);
    let model = setting(format!("{provider}_model"))
        .or_else(|| env.model.clone())
        .unwrap_or(default_model);

    if api_key.is_empty() && KEYED_PROVIDERS.contains(&provider.as_str()) {
        return Err(SitecastError::config(format!(
            "No API key configured for provider \"{provider}\". \
             Run `sitecast settings set {provider}_api_key <key>` or export {}.",
            config.api_key_env
        )));
    }

    Ok(ProviderConfig {
        provider,
        api_key,
        base_url,
        model,
    })
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Sampling options for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4000,
        }
    }
}

impl CompletionOptions {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

impl Message {
    fn system(content: &str) -> Self {
        Self {
            role: "system",
            content: content.to_string(),
        }
    }

    fn user(content: &str) -> Self {
        Self {
            role: "user",
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct CachedClient {
    key: ConnectionKey,
    http: Client,
}

/// Chat-completion client shared by all pipeline steps.
pub struct LlmClient {
    storage: Arc<Storage>,
    config: LlmConfig,
    retry: RetryPolicy,
    cached: Mutex<Option<CachedClient>>,
    client_builds: AtomicUsize,
}

impl LlmClient {
    pub fn new(storage: Arc<Storage>, config: LlmConfig, retry: RetryPolicy) -> Self {
        Self {
            storage,
            config,
            retry,
            cached: Mutex::new(None),
            client_builds: AtomicUsize::new(0),
        }
    }

    /// Resolve the provider from current settings and environment.
    pub async fn provider(&self) -> Result<ProviderConfig> {
        let settings = self.storage.all_settings().await?;
        let env = ProviderEnv::from_env(&self.config.api_key_env);
        resolve_provider(&settings, &env, &self.config)
    }

    /// Run one completion and parse the reply as JSON.
    ///
    /// Rate-limit responses are retried up to the policy's attempt count
    /// with linearly growing delays; every other failure is returned as-is.
    #[instrument(skip_all, fields(temperature = opts.temperature, max_tokens = opts.max_tokens))]
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: CompletionOptions,
    ) -> Result<serde_json::Value> {
        let provider = self.provider().await?;
        let http = self.client_for(&provider)?;
        info!(provider = %provider.provider, model = %provider.model, "LLM call");

        let request = ChatRequest {
            model: provider.model.clone(),
            messages: vec![Message::system(system_prompt), Message::user(user_prompt)],
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            response_format: provider.supports_json_mode().then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let mut attempt = 1;
        let content = loop {
            match send_chat(&http, &provider.base_url, &request).await {
                Ok(content) => break content,
                Err(e) if e.is_rate_limited() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        parse_json_content(content.as_deref())
    }

    /// Return the cached HTTP client, rebuilding it when the key or URL changed.
    fn client_for(&self, provider: &ProviderConfig) -> Result<Client> {
        let key = provider.connection_key();
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = cached.as_ref().filter(|c| c.key == key) {
            return Ok(existing.http.clone());
        }

        debug!(base_url = %key.base_url, "building provider client");
        let http = build_http_client(&key.api_key)?;
        self.client_builds.fetch_add(1, Ordering::Relaxed);
        *cached = Some(CachedClient {
            key,
            http: http.clone(),
        });
        Ok(http)
    }
}

fn build_http_client(api_key: &str) -> Result<Client> {
    let mut headers = HeaderMap::new();
    if !api_key.is_empty() {
        let mut value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| SitecastError::config(format!("invalid API key: {e}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| SitecastError::Network(format!("failed to build HTTP client: {e}")))
}

/// POST one chat completion; returns the first choice's content, if any.
async fn send_chat(http: &Client, base_url: &str, request: &ChatRequest) -> Result<Option<String>> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let response = http
        .post(&url)
        .json(request)
        .send()
        .await
        .map_err(|e| SitecastError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if status.as_u16() == 429 {
        let body = error_body(response).await;
        return Err(SitecastError::RateLimited(body));
    }
    if !status.is_success() {
        let body = error_body(response).await;
        warn!(status = %status, error = %body, "provider API error");
        return Err(SitecastError::llm(Some(status.as_u16()), body));
    }

    let raw: ChatResponseRaw = response
        .json()
        .await
        .map_err(|e| SitecastError::llm(None, format!("malformed provider response: {e}")))?;

    Ok(raw.choices.into_iter().next().and_then(|c| c.message.content))
}

/// Read an error response's body for the error message; an unreadable body is logged and left empty.
async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!(status = %status, error = %e, "failed to read provider error body");
            String::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```(?:json)?\s*").expect("leading fence regex"));

static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```\s*$").expect("trailing fence regex"));

/// Strip a leading ```` ``` ````/```` ```json ```` fence and a trailing fence,
/// ignoring whitespace around either.
pub fn strip_code_fences(content: &str) -> String {
    let without_leading = LEADING_FENCE.replace(content.trim(), "");
    TRAILING_FENCE.replace(&without_leading, "").trim().to_string()
}

/// Parse reply content as JSON. Absent or empty content yields `{}`;
/// malformed JSON is an error.
pub fn parse_json_content(content: Option<&str>) -> Result<serde_json::Value> {
    let content = content.filter(|c| !c.is_empty()).unwrap_or("{}");
    let cleaned = strip_code_fences(content);
    serde_json::from_str(&cleaned).map_err(|e| {
        let preview: String = cleaned.chars().take(200).collect();
        SitecastError::parse(format!("LLM returned invalid JSON: {e} (got: {preview})"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, Instant};
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> LlmConfig {
        LlmConfig {
            api_key_env: format!("SITECAST_TEST_UNSET_{}", Uuid::now_v7().simple()),
            ..LlmConfig::default()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
        }
    }

    fn completion(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        }))
    }

    async fn client_for_server(server: &MockServer, provider: &str) -> LlmClient {
        let tmp = std::env::temp_dir().join(format!("sitecast_llm_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.unwrap());
        storage.set_setting(ACTIVE_PROVIDER_KEY, provider).await.unwrap();
        storage
            .set_setting(&format!("{provider}_base_url"), &server.uri())
            .await
            .unwrap();
        storage
            .set_setting(&format!("{provider}_api_key"), "test-key")
            .await
            .unwrap();
        storage
            .set_setting(&format!("{provider}_model"), "test-model")
            .await
            .unwrap();
        LlmClient::new(storage, test_config(), fast_retry())
    }

    // -- resolution ---------------------------------------------------------

    #[test]
    fn settings_override_env_and_config() {
        let settings = BTreeMap::from([
            ("active_provider".to_string(), "openrouter".to_string()),
            ("openrouter_api_key".to_string(), "sk-or".to_string()),
            ("openrouter_model".to_string(), "meta/llama".to_string()),
        ]);
        let env = ProviderEnv {
            api_key: Some("sk-env".into()),
            base_url: None,
            model: Some("env-model".into()),
        };
        let resolved = resolve_provider(&settings, &env, &LlmConfig::default()).unwrap();
        assert_eq!(resolved.provider, "openrouter");
        assert_eq!(resolved.api_key, "sk-or");
        assert_eq!(resolved.model, "meta/llama");
        assert_eq!(resolved.base_url, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn env_fills_gaps_before_config() {
        let env = ProviderEnv {
            api_key: Some("sk-env".into()),
            base_url: Some("https://proxy.example.com/v1".into()),
            model: None,
        };
        let resolved = resolve_provider(&BTreeMap::new(), &env, &LlmConfig::default()).unwrap();
        assert_eq!(resolved.provider, "openai");
        assert_eq!(resolved.api_key, "sk-env");
        assert_eq!(resolved.base_url, "https://proxy.example.com/v1");
        assert_eq!(resolved.model, "gpt-4o-mini");
    }

    #[test]
    fn missing_key_is_config_error_for_keyed_providers() {
        let err = resolve_provider(&BTreeMap::new(), &ProviderEnv::default(), &LlmConfig::default())
            .unwrap_err();
        assert!(matches!(err, SitecastError::Config { .. }));
        assert!(err.to_string().contains("No API key configured"));

        let local = BTreeMap::from([("active_provider".to_string(), "ollama".to_string())]);
        let resolved = resolve_provider(&local, &ProviderEnv::default(), &LlmConfig::default()).unwrap();
        assert_eq!(resolved.base_url, "http://localhost:11434/v1");
        assert!(resolved.api_key.is_empty());
    }

    #[test]
    fn json_mode_detection() {
        let mut provider = ProviderConfig {
            provider: "ollama".into(),
            api_key: String::new(),
            base_url: "http://localhost:11434/v1".into(),
            model: "llama3.1".into(),
        };
        assert!(!provider.supports_json_mode());
        provider.base_url = "https://api.openai.com/v1".into();
        assert!(provider.supports_json_mode());
        provider.provider = "openrouter".into();
        provider.base_url = "https://openrouter.ai/api/v1".into();
        assert!(provider.supports_json_mode());
    }

    // -- parsing ------------------------------------------------------------

    #[test]
    fn fenced_and_plain_json_parse_identically() {
        let plain = r#"{"industry": "retail", "strengths": ["price"]}"#;
        let fenced = format!("```json\n{plain}\n```");
        let bare_fence = format!("```\n{plain}\n```");
        let upper = format!("```JSON {plain}```");

        let expected = parse_json_content(Some(plain)).unwrap();
        assert_eq!(parse_json_content(Some(&fenced)).unwrap(), expected);
        assert_eq!(parse_json_content(Some(&bare_fence)).unwrap(), expected);
        assert_eq!(parse_json_content(Some(&upper)).unwrap(), expected);
    }

    #[test]
    fn fences_surrounded_by_whitespace_still_parse() {
        let expected = json!({"a": 1});
        let trailing_newline = "```json\n{\"a\":1}\n```\n";
        let indented = "  ```json\n{\"a\":1}```";
        let padded = "\n\n```\n{\"a\":1}\n```  \r\n";

        assert_eq!(parse_json_content(Some(trailing_newline)).unwrap(), expected);
        assert_eq!(parse_json_content(Some(indented)).unwrap(), expected);
        assert_eq!(parse_json_content(Some(padded)).unwrap(), expected);
        assert_eq!(strip_code_fences("  {\"a\":1}\n"), "{\"a\":1}");
    }

    #[test]
    fn empty_content_is_empty_object_but_garbage_is_an_error() {
        assert_eq!(parse_json_content(None).unwrap(), json!({}));
        assert_eq!(parse_json_content(Some("")).unwrap(), json!({}));

        let err = parse_json_content(Some("Sure! Here is your JSON:")).unwrap_err();
        assert!(matches!(err, SitecastError::Parse { .. }));
    }

    // -- HTTP ---------------------------------------------------------------

    #[tokio::test]
    async fn sends_chat_request_and_parses_fenced_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(completion("```json\n{\"ok\": true}\n```"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for_server(&server, "custom").await;
        let value = client
            .complete("system", "user", CompletionOptions::new(0.6, 3000))
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["max_tokens"], 3000);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");
        assert!(body.get("response_format").is_none());
    }

    #[tokio::test]
    async fn json_mode_requested_for_openai() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("{}"))
            .mount(&server)
            .await;

        let client = client_for_server(&server, "openai").await;
        client.complete("s", "u", CompletionOptions::default()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[tokio::test]
    async fn retries_rate_limits_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(3)
            .with_priority(1)
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion(r#"{"industry": "saas"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for_server(&server, "custom").await;
        let started = Instant::now();
        let value = client
            .complete("s", "u", CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(value["industry"], "saas");
        // 10ms + 20ms + 30ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exhausted"))
            .expect(4)
            .mount(&server)
            .await;

        let client = client_for_server(&server, "custom").await;
        let err = client
            .complete("s", "u", CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("quota exhausted"));
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for_server(&server, "custom").await;
        let err = client
            .complete("s", "u", CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SitecastError::Llm { status: Some(500), .. }));
    }

    #[tokio::test]
    async fn invalid_json_reply_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("not json at all"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for_server(&server, "custom").await;
        let err = client
            .complete("s", "u", CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SitecastError::Parse { .. }));
    }

    #[tokio::test]
    async fn client_rebuilt_only_when_connection_changes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("{}"))
            .mount(&server)
            .await;

        let client = client_for_server(&server, "custom").await;
        client.complete("s", "u", CompletionOptions::default()).await.unwrap();
        client.complete("s", "u", CompletionOptions::default()).await.unwrap();
        assert_eq!(client.client_builds.load(Ordering::Relaxed), 1);

        // A model change reuses the client.
        client.storage.set_setting("custom_model", "other").await.unwrap();
        client.complete("s", "u", CompletionOptions::default()).await.unwrap();
        assert_eq!(client.client_builds.load(Ordering::Relaxed), 1);

        // A key change rebuilds it.
        client.storage.set_setting("custom_api_key", "rotated").await.unwrap();
        client.complete("s", "u", CompletionOptions::default()).await.unwrap();
        assert_eq!(client.client_builds.load(Ordering::Relaxed), 2);

        let requests = server.received_requests().await.unwrap();
        let last_auth = requests
            .last()
            .and_then(|r| r.headers.get("authorization"))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        assert_eq!(last_auth.as_deref(), Some("Bearer rotated"));
        let model: serde_json::Value = serde_json::from_slice(&requests[2].body).unwrap();
        assert_eq!(model["model"], "other");
    }
}
