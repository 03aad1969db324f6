//! Translation backends behind one capability contract

pub mod caiyun;
pub mod deepl;
pub mod doubao;
pub mod mock;
pub mod openai;
pub mod registry;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{LanguagePair, UnitType};

pub use registry::{ProviderEntry, ProviderFactory, ProviderRegistry};

/// Uniform contract every backend implements
#[async_trait]
pub trait TranslationProvider: Send + Sync + fmt::Debug {
    /// Backend kind identifier, e.g. `deepl`
    fn provider_type(&self) -> &str;

    /// Unit the backend's per-call limit is expressed in
    fn unit_type(&self) -> UnitType;

    /// Measure `text` the way the backend's limit does
    fn unit_count(&self, text: &str) -> usize {
        self.unit_type().count(text)
    }

    /// Check the backend's settings; `ConfigError` explains what is wrong
    fn validate_config(&self) -> Result<()>;

    /// Acquire resources (HTTP session). Validates first.
    async fn initialize(&self) -> Result<()> {
        self.validate_config()
    }

    /// Release whatever `initialize` acquired
    async fn cleanup(&self) {}

    /// Translate one piece of plain text
    async fn translate(&self, text: &str, langs: &LanguagePair) -> Result<String>;
}

/// Free-form string settings of one registry entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    values: BTreeMap<String, String>,
}

impl ProviderSettings {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Secret from `key`, or from the env var named by `{key}_env`, or from `default_env`
    pub fn secret(&self, key: &str, default_env: Option<&str>) -> Option<String> {
        if let Some(value) = self.get(key) {
            return Some(value.to_string());
        }
        let env_name = self
            .get(&format!("{key}_env"))
            .map(str::to_string)
            .or_else(|| default_env.map(str::to_string))?;
        std::env::var(env_name).ok().filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Lazily opened reqwest client shared by the HTTP backends
#[derive(Debug)]
pub struct HttpSession {
    provider: &'static str,
    timeout: Duration,
    headers: reqwest::header::HeaderMap,
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpSession {
    pub fn new(provider: &'static str, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            headers: reqwest::header::HeaderMap::new(),
            client: RwLock::new(None),
        }
    }

    pub fn with_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub async fn open(&self) -> Result<()> {
        let mut slot = self.client.write().await;
        if slot.is_none() {
            let client = reqwest::Client::builder()
                .timeout(self.timeout)
                .pool_idle_timeout(Some(Duration::from_secs(30)))
                .pool_max_idle_per_host(10)
                .default_headers(self.headers.clone())
                .build()?;
            *slot = Some(client);
            debug!("Opened HTTP session for {}", self.provider);
        }
        Ok(())
    }

    pub async fn close(&self) {
        if self.client.write().await.take().is_some() {
            debug!("Closed HTTP session for {}", self.provider);
        }
    }

    pub async fn client(&self) -> Result<reqwest::Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| TranslationError::config(format!("{} HTTP client not initialized", self.provider)))
    }
}

/// Map a non-success HTTP status to the error taxonomy
pub fn classify_status(
    provider: &str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> TranslationError {
    match status {
        429 => TranslationError::RateLimitError { retry_after },
        401 | 403 => TranslationError::config(format!(
            "{provider} rejected credentials ({status}): {}",
            preview(body)
        )),
        408 | 500..=599 => TranslationError::ProviderError {
            provider: provider.to_string(),
            message: preview(body),
            transient: true,
            status: Some(status),
        },
        _ => TranslationError::ProviderError {
            provider: provider.to_string(),
            message: preview(body),
            transient: false,
            status: Some(status),
        },
    }
}

/// Map a reqwest transport failure to the error taxonomy
pub fn classify_transport(provider: &str, err: reqwest::Error, timeout: Duration) -> TranslationError {
    if err.is_timeout() {
        TranslationError::TimeoutError { elapsed: timeout }
    } else if err.is_connect() || err.is_request() {
        TranslationError::NetworkError {
            message: format!("{provider}: {err}"),
        }
    } else {
        TranslationError::transient(provider, err.to_string())
    }
}

/// Parse a `Retry-After` header given in seconds
pub fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send a prepared request and hand back the JSON body of a success response
pub async fn send_json(
    provider: &str,
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport(provider, e, timeout))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| TranslationError::InvalidResponseError {
                message: format!("{provider}: {e}"),
            });
    }

    let retry_after = retry_after_header(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(provider, status.as_u16(), &body, retry_after))
}

/// Strip Markdown code fences some chat models wrap around their answer
pub fn clean_translation_result(text: &str) -> String {
    let mut text = text.trim();

    if let Some(rest) = text.strip_prefix("```") {
        text = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }

    text.trim().to_string()
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status("x", 429, "", Some(Duration::from_secs(2))),
            TranslationError::RateLimitError { retry_after: Some(d) } if d == Duration::from_secs(2)
        ));
        assert!(matches!(
            classify_status("x", 401, "nope", None),
            TranslationError::ConfigError { .. }
        ));
        assert!(classify_status("x", 503, "busy", None).is_retryable());
        assert!(classify_status("x", 408, "", None).is_retryable());
        assert!(!classify_status("x", 400, "bad", None).is_retryable());
    }

    #[test]
    fn test_clean_translation_result() {
        assert_eq!(clean_translation_result("```html\n你好\n```"), "你好");
        assert_eq!(clean_translation_result("```你好```"), "你好");
        assert_eq!(clean_translation_result("  plain  "), "plain");
    }

    #[test]
    fn test_settings_secret_lookup() {
        let settings = ProviderSettings::default().with("api_key", "inline");
        assert_eq!(settings.secret("api_key", None).as_deref(), Some("inline"));

        std::env::set_var("EPUBOX_TEST_SECRET_LOOKUP", "from-env");
        let settings =
            ProviderSettings::default().with("api_key_env", "EPUBOX_TEST_SECRET_LOOKUP");
        assert_eq!(settings.secret("api_key", None).as_deref(), Some("from-env"));

        let empty = ProviderSettings::default();
        assert_eq!(empty.secret("api_key", Some("EPUBOX_TEST_UNSET_VAR")), None);
    }

    #[tokio::test]
    async fn test_session_requires_open() {
        let session = HttpSession::new("test", Duration::from_secs(1));
        assert!(session.client().await.is_err());
        session.open().await.unwrap();
        assert!(session.client().await.is_ok());
        session.close().await;
        assert!(session.client().await.is_err());
    }
}
