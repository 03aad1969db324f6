//! Configuration management

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::LanguagePair;
use crate::providers::ProviderRegistry;

/// Environment prefix for overrides, e.g. `EPUBOX_TARGET_LANG`
pub const ENV_PREFIX: &str = "EPUBOX";

/// Engine-level settings for the translator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// YAML provider registry; absent means the built-in mock only
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    /// Overrides the registry's `default_provider`
    #[serde(default)]
    pub default_provider: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    /// Chapters processed at once
    pub max_concurrent_chapters: usize,
    /// Where JSON progress records live
    pub progress_dir: PathBuf,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            registry_path: None,
            default_provider: None,
            source_lang: "en".to_string(),
            target_lang: "zh".to_string(),
            max_concurrent_chapters: 4,
            progress_dir: PathBuf::from("progress"),
        }
    }
}

impl TranslatorConfig {
    /// Defaults, then the optional file, then `EPUBOX_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("source_lang", defaults.source_lang)?
            .set_default("target_lang", defaults.target_lang)?
            .set_default("max_concurrent_chapters", defaults.max_concurrent_chapters as i64)?
            .set_default("progress_dir", defaults.progress_dir.display().to_string())?;

        if let Some(path) = path {
            if !path.exists() {
                return Err(TranslationError::FileError {
                    path: path.display().to_string(),
                    message: "config file not found".to_string(),
                });
            }
            info!("Loading config file: {}", path.display());
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_chapters == 0 {
            return Err(TranslationError::config(
                "max_concurrent_chapters must be greater than 0",
            ));
        }

        if self.source_lang.trim().is_empty() || self.target_lang.trim().is_empty() {
            return Err(TranslationError::config("source_lang and target_lang are required"));
        }

        if self.source_lang.eq_ignore_ascii_case(&self.target_lang) {
            warn!("Source and target language are both {}", self.target_lang);
        }

        Ok(())
    }

    pub fn languages(&self) -> LanguagePair {
        LanguagePair::new(&self.source_lang, &self.target_lang)
    }

    /// Read the configured registry, falling back to the mock-only one
    pub fn load_registry(&self) -> Result<ProviderRegistry> {
        let mut registry = match &self.registry_path {
            Some(path) => ProviderRegistry::from_file(path)?,
            None => {
                warn!("No provider registry configured, using the mock provider");
                ProviderRegistry::mock_only()
            }
        };

        if let Some(id) = &self.default_provider {
            registry.default_provider = Some(id.clone());
        }
        Ok(registry)
    }
}
