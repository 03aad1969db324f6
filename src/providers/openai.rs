//! OpenAI-compatible chat completion backend (OpenAI, Mistral, Groq, ...)

use async_trait::async_trait;
use std::time::Duration;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{LanguagePair, UnitType};
use crate::providers::{
    clean_translation_result, send_json, HttpSession, ProviderSettings, TranslationProvider,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug)]
pub struct OpenAiProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f64,
    timeout: Duration,
    session: HttpSession,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Self {
        Self {
            api_key: settings.secret("api_key", Some("OPENAI_API_KEY")),
            base_url: settings
                .get_or("base_url", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: settings.get_or("model", DEFAULT_MODEL).to_string(),
            temperature: settings
                .get("temperature")
                .and_then(|t| t.parse().ok())
                .unwrap_or(0.2),
            timeout,
            session: HttpSession::new("openai", timeout),
        }
    }

    fn system_prompt(langs: &LanguagePair) -> String {
        let source = if langs.source.is_empty() || langs.source == "auto" {
            "the detected source language".to_string()
        } else {
            langs.source.clone()
        };
        format!(
            "Translate the user's text from {source} to {}. \
             Return only the translation, with no explanations. \
             Keep line breaks and any `###` separator lines exactly where they are.",
            langs.target
        )
    }

    fn request_body(&self, text: &str, langs: &LanguagePair) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": Self::system_prompt(langs) },
                { "role": "user", "content": text }
            ]
        })
    }
}

#[async_trait]
impl TranslationProvider for OpenAiProvider {
    fn provider_type(&self) -> &str {
        "openai"
    }

    fn unit_type(&self) -> UnitType {
        UnitType::Tokens
    }

    fn validate_config(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(TranslationError::config(
                "openai requires settings.api_key or OPENAI_API_KEY",
            ));
        }
        if !self.base_url.starts_with("http") {
            return Err(TranslationError::config(format!(
                "openai base_url is not an http(s) URL: {}",
                self.base_url
            )));
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
        let request = client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.as_deref().unwrap_or_default())
            .json(&self.request_body(text, langs));

        let json = send_json("openai", request, self.timeout).await?;
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| TranslationError::InvalidResponseError {
                message: "No message content in chat completion".to_string(),
            })?;

        Ok(clean_translation_result(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalised() {
        let settings = ProviderSettings::default()
            .with("api_key", "k")
            .with("base_url", "https://api.mistral.ai/v1/");
        let provider = OpenAiProvider::new(&settings, Duration::from_secs(5));
        assert_eq!(provider.base_url, "https://api.mistral.ai/v1");
        assert!(provider.validate_config().is_ok());
    }

    #[test]
    fn test_prompt_mentions_languages() {
        let prompt = OpenAiProvider::system_prompt(&LanguagePair::new("en", "zh"));
        assert!(prompt.contains("from en to zh"));

        let prompt = OpenAiProvider::system_prompt(&LanguagePair::new("auto", "ja"));
        assert!(prompt.contains("detected source language"));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let settings = ProviderSettings::default()
            .with("api_key", "k")
            .with("base_url", "ftp://example.com");
        let provider = OpenAiProvider::new(&settings, Duration::from_secs(5));
        assert!(provider.validate_config().is_err());
    }
}
