//! Caiyun translator backend

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use std::time::Duration;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{LanguagePair, UnitType};
use crate::providers::{send_json, HttpSession, ProviderSettings, TranslationProvider};

const DEFAULT_ENDPOINT: &str = "https://api.interpreter.caiyunai.com/v1/translator";

#[derive(Debug)]
pub struct CaiyunProvider {
    api_key: Option<String>,
    endpoint: String,
    request_id: String,
    timeout: Duration,
    session: HttpSession,
}

impl CaiyunProvider {
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Self {
        let api_key = settings.secret("api_key", Some("CAIYUN_API_KEY"));

        let mut headers = HeaderMap::new();
        if let Some(value) = api_key
            .as_deref()
            .and_then(|key| HeaderValue::from_str(&format!("token {key}")).ok())
        {
            headers.insert("x-authorization", value);
        }

        Self {
            api_key,
            endpoint: settings.get_or("endpoint", DEFAULT_ENDPOINT).to_string(),
            request_id: settings.get_or("request_id", "epubox").to_string(),
            timeout,
            session: HttpSession::new("caiyun", timeout).with_headers(headers),
        }
    }

    /// Caiyun only translates into a handful of languages
    fn trans_type(target: &str) -> Result<&'static str> {
        match target.to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "zh-hans" => Ok("auto2zh"),
            "en" => Ok("auto2en"),
            "ja" => Ok("auto2ja"),
            other => Err(TranslationError::permanent(
                "caiyun",
                format!("unsupported target language: {other}"),
            )),
        }
    }
}

#[async_trait]
impl TranslationProvider for CaiyunProvider {
    fn provider_type(&self) -> &str {
        "caiyun"
    }

    fn unit_type(&self) -> UnitType {
        UnitType::Characters
    }

    fn validate_config(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(TranslationError::config(
                "caiyun requires settings.api_key or CAIYUN_API_KEY",
            ));
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
        let trans_type = Self::trans_type(&langs.target)?;
        let client = self.session.client().await?;

        let request = client.post(&self.endpoint).json(&serde_json::json!({
            "source": text,
            "trans_type": trans_type,
            "request_id": self.request_id,
            "detect": true,
        }));

        let json = send_json("caiyun", request, self.timeout).await?;
        json["target"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TranslationError::InvalidResponseError {
                message: format!("Invalid response format from Caiyun: {json}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trans_type() {
        assert_eq!(CaiyunProvider::trans_type("zh").unwrap(), "auto2zh");
        assert_eq!(CaiyunProvider::trans_type("EN").unwrap(), "auto2en");
        let err = CaiyunProvider::trans_type("fr").unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unsupported_target_fails_before_any_request() {
        let settings = ProviderSettings::default().with("api_key", "k");
        let provider = CaiyunProvider::new(&settings, Duration::from_secs(5));
        // Session never opened; the language check must come first
        let err = provider
            .translate("Hello", &LanguagePair::new("en", "fr"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslationError::ProviderError { transient: false, .. }));
    }
}
