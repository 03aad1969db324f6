//! DeepL v2 REST backend

use async_trait::async_trait;
use std::time::Duration;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{LanguagePair, UnitType};
use crate::providers::{send_json, HttpSession, ProviderSettings, TranslationProvider};

const FREE_ENDPOINT: &str = "https://api-free.deepl.com/v2/translate";
const PRO_ENDPOINT: &str = "https://api.deepl.com/v2/translate";

#[derive(Debug)]
pub struct DeepLProvider {
    auth_key: Option<String>,
    endpoint: String,
    timeout: Duration,
    session: HttpSession,
}

impl DeepLProvider {
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Self {
        let auth_key = settings.secret("auth_key", Some("DEEPL_AUTH_KEY"));
        // Free-plan keys end in ":fx"
        let default_endpoint = match &auth_key {
            Some(key) if key.ends_with(":fx") => FREE_ENDPOINT,
            _ => PRO_ENDPOINT,
        };

        Self {
            auth_key,
            endpoint: settings.get_or("endpoint", default_endpoint).to_string(),
            timeout,
            session: HttpSession::new("deepl", timeout),
        }
    }

    /// DeepL wants upper-case codes; `en` as a target must carry a variant
    fn target_code(lang: &str) -> String {
        match lang.to_ascii_lowercase().as_str() {
            "en" => "EN-US".to_string(),
            "pt" => "PT-PT".to_string(),
            "zh" | "zh-cn" | "zh-hans" => "ZH".to_string(),
            other => other.to_ascii_uppercase(),
        }
    }

    fn source_code(lang: &str) -> Option<String> {
        if lang.is_empty() || lang.eq_ignore_ascii_case("auto") {
            return None;
        }
        // Source codes take no regional variant
        let base = lang.split('-').next().unwrap_or(lang);
        Some(base.to_ascii_uppercase())
    }

    fn request_body(&self, text: &str, langs: &LanguagePair) -> serde_json::Value {
        let mut body = serde_json::json!({
            "text": [text],
            "target_lang": Self::target_code(&langs.target),
            "preserve_formatting": true,
        });
        if let Some(source) = Self::source_code(&langs.source) {
            body["source_lang"] = serde_json::json!(source);
        }
        body
    }
}

#[async_trait]
impl TranslationProvider for DeepLProvider {
    fn provider_type(&self) -> &str {
        "deepl"
    }

    fn unit_type(&self) -> UnitType {
        UnitType::Characters
    }

    fn validate_config(&self) -> Result<()> {
        if self.auth_key.is_none() {
            return Err(TranslationError::config(
                "deepl requires settings.auth_key or DEEPL_AUTH_KEY",
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
        let client = self.session.client().await?;
        let request = client
            .post(&self.endpoint)
            .header(
                "Authorization",
                format!("DeepL-Auth-Key {}", self.auth_key.as_deref().unwrap_or_default()),
            )
            .json(&self.request_body(text, langs));

        // DeepL signals quota exhaustion with 456; nothing a retry can fix
        let json = match send_json("deepl", request, self.timeout).await {
            Err(TranslationError::ProviderError { status: Some(456), .. }) => {
                return Err(TranslationError::permanent("deepl", "character quota exceeded"))
            }
            other => other?,
        };

        json["translations"]
            .get(0)
            .and_then(|t| t["text"].as_str())
            .map(str::to_string)
            .ok_or_else(|| TranslationError::InvalidResponseError {
                message: "No translations in DeepL response".to_string(),
            })
    }
}
