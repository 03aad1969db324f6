//! Doubao (Volcengine Ark) translation backend

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{LanguagePair, UnitType};
use crate::providers::{send_json, HttpSession, ProviderSettings, TranslationProvider};

const DEFAULT_ENDPOINT: &str = "https://ark.cn-beijing.volces.com/api/v3/responses";
const DEFAULT_MODEL: &str = "doubao-seed-translation-250915";

/// Ark responses API with `translation_options`
#[derive(Debug)]
pub struct DoubaoProvider {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    timeout: Duration,
    session: HttpSession,
}

impl DoubaoProvider {
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Self {
        Self {
            api_key: settings.secret("api_key", Some("ARK_API_KEY")),
            endpoint: settings.get_or("endpoint", DEFAULT_ENDPOINT).to_string(),
            model: settings.get_or("model", DEFAULT_MODEL).to_string(),
            timeout,
            session: HttpSession::new("doubao", timeout),
        }
    }

    fn request_body(&self, text: &str, langs: &LanguagePair) -> serde_json::Value {
        let mut options = serde_json::json!({ "target_language": langs.target });
        if !langs.source.is_empty() && langs.source != "auto" {
            options["source_language"] = serde_json::json!(langs.source);
        }

        serde_json::json!({
            "model": self.model,
            "input": [{
                "role": "user",
                "content": [{
                    "type": "input_text",
                    "text": text,
                    "translation_options": options
                }]
            }]
        })
    }
}

/// Pull the translated text out of either response shape Ark returns
fn extract_translation(json: &serde_json::Value) -> Option<String> {
    json["output"]["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .or_else(|| {
            json["output"]
                .get(0)
                .and_then(|o| o["content"].get(0))
                .and_then(|c| c["text"].as_str())
        })
        .map(str::to_string)
}

#[async_trait]
impl TranslationProvider for DoubaoProvider {
    fn provider_type(&self) -> &str {
        "doubao"
    }

    fn unit_type(&self) -> UnitType {
        UnitType::Tokens
    }

    fn validate_config(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(TranslationError::config(
                "doubao requires settings.api_key or ARK_API_KEY",
            ));
        }
        if self.endpoint.is_empty() {
            return Err(TranslationError::config("doubao endpoint is empty"));
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        self.validate_config()?;
        self.session.open().await
    }

    async fn cleanup(&self) {
        self.session.close().await;
    }

    async fn translate(&self, text: &str, langs: &LanguagePair) -> Result<String> {
        let client = self.session.client().await?;
        let api_key = self.api_key.as_deref().unwrap_or_default();

        let request = client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(text, langs));

        let json = send_json("doubao", request, self.timeout).await?;
        if let Some(id) = json["id"].as_str() {
            debug!("doubao request {} used {} tokens", id, json["usage"]["total_tokens"]);
        }

        extract_translation(&json).ok_or_else(|| TranslationError::InvalidResponseError {
            message: "No translation in doubao response".to_string(),
        })
    }
}
