//! Declarative provider registry and the factory that instantiates it

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{ProviderProfile, TermEntry, UnitType};
use crate::core::retry::RetryPolicy;
use crate::providers::caiyun::CaiyunProvider;
use crate::providers::deepl::DeepLProvider;
use crate::providers::doubao::DoubaoProvider;
use crate::providers::mock::MockProvider;
use crate::providers::openai::OpenAiProvider;
use crate::providers::{ProviderSettings, TranslationProvider};

/// Default separator placed between grouped leaves
pub const DEFAULT_SEGMENT_SEPARATOR: &str = "\n###\n";

/// Built-in limits per backend kind: (unit, max units, requests, per seconds, concurrency)
const KIND_DEFAULTS: &[(&str, UnitType, usize, u32, u64, usize)] = &[
    ("doubao", UnitType::Tokens, 900, 5000, 60, 20),
    ("openai", UnitType::Tokens, 2000, 60, 60, 8),
    ("deepl", UnitType::Characters, 4500, 1, 1, 1),
    ("caiyun", UnitType::Characters, 4000, 5, 1, 4),
    ("mock", UnitType::Characters, 2000, 1000, 1, 16),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub requests: Option<u32>,
    pub per_seconds: Option<u64>,
    pub burst: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_true() -> bool {
    true
}

/// One provider as written in the registry file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Backend kind the factory knows how to build
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub unit_type: Option<UnitType>,
    pub max_units_per_call: Option<usize>,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    pub max_concurrent: Option<usize>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetrySettings,
    pub segment_separator: Option<String>,
    #[serde(default)]
    pub terminology: Vec<TermEntry>,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_yaml::Value>,
}

impl ProviderEntry {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            enabled: true,
            unit_type: None,
            max_units_per_call: None,
            rate_limit: RateLimitSettings::default(),
            max_concurrent: None,
            timeout_ms: None,
            retry: RetrySettings::default(),
            segment_separator: None,
            terminology: Vec::new(),
            features: BTreeMap::new(),
            settings: BTreeMap::new(),
        }
    }

    /// Feature flag, `default` when absent
    pub fn feature(&self, name: &str, default: bool) -> bool {
        self.features.get(name).copied().unwrap_or(default)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(30000))
    }

    /// Scalar settings flattened to strings
    pub fn provider_settings(&self) -> Result<ProviderSettings> {
        let mut values = BTreeMap::new();
        for (key, value) in &self.settings {
            let text = match value {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => {
                    return Err(TranslationError::config(format!(
                        "setting '{key}' must be a scalar"
                    )))
                }
            };
            values.insert(key.clone(), text);
        }
        if let Some(unit) = self.unit_type {
            values.entry("unit_type".to_string()).or_insert_with(|| unit.to_string());
        }
        Ok(ProviderSettings::new(values))
    }
}

/// Parsed registry document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRegistry {
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TranslationError::FileError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&content)
    }

    /// Registry with a single dry-run mock provider
    pub fn mock_only() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert("mock".to_string(), ProviderEntry::new("mock"));
        Self {
            default_provider: Some("mock".to_string()),
            providers,
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: ProviderEntry) {
        self.providers.insert(id.into(), entry);
    }

    /// Enabled entries, in id order
    pub fn enabled(&self) -> impl Iterator<Item = (&String, &ProviderEntry)> {
        self.providers.iter().filter(|(_, e)| e.enabled)
    }

    /// Turn one entry into a validated profile
    pub fn resolve_profile(&self, id: &str) -> Result<ProviderProfile> {
        let entry = self
            .providers
            .get(id)
            .ok_or_else(|| TranslationError::config(format!("unknown provider: {id}")))?;
        resolve(id, entry)
    }

    /// Instantiate every enabled provider.
    ///
    /// Entries that fail resolution or construction are returned separately so
    /// the others stay usable.
    pub fn build_all(
        &self,
        factory: &ProviderFactory,
    ) -> (
        Vec<(ProviderProfile, Arc<dyn TranslationProvider>)>,
        Vec<(String, TranslationError)>,
    ) {
        let mut built = Vec::new();
        let mut failed = Vec::new();

        for (id, entry) in self.enabled() {
            let result = resolve(id, entry).and_then(|profile| {
                let provider = factory.create(entry)?;
                if provider.unit_type() != profile.unit_type {
                    return Err(TranslationError::config(format!(
                        "{} provider must use {}-based limits",
                        entry.kind,
                        provider.unit_type()
                    )));
                }
                Ok((profile, provider))
            });

            match result {
                Ok(pair) => {
                    info!("Registered provider {} ({})", id, entry.kind);
                    built.push(pair);
                }
                Err(e) => {
                    warn!("Skipping provider {}: {}", id, e);
                    failed.push((id.clone(), e));
                }
            }
        }

        (built, failed)
    }
}

fn kind_defaults(kind: &str) -> Option<(UnitType, usize, u32, u64, usize)> {
    KIND_DEFAULTS
        .iter()
        .find(|(k, ..)| *k == kind)
        .map(|(_, unit, units, requests, secs, concurrency)| {
            (*unit, *units, *requests, *secs, *concurrency)
        })
}

fn resolve(id: &str, entry: &ProviderEntry) -> Result<ProviderProfile> {
    let (unit, units, requests, secs, concurrency) = kind_defaults(&entry.kind)
        .unwrap_or((UnitType::Characters, 2000, 60, 60, 4));

    let profile = ProviderProfile {
        id: id.to_string(),
        provider_type: entry.kind.clone(),
        unit_type: entry.unit_type.unwrap_or(unit),
        max_units_per_call: entry.max_units_per_call.unwrap_or(units),
        requests_per_unit_time: entry.rate_limit.requests.unwrap_or(requests),
        unit_time: Duration::from_secs(entry.rate_limit.per_seconds.unwrap_or(secs)),
        burst: entry
            .rate_limit
            .burst
            .or(entry.rate_limit.requests)
            .unwrap_or(requests),
        max_concurrent: entry.max_concurrent.unwrap_or(concurrency),
        timeout: entry.timeout(),
        retry_policy: RetryPolicy::new(
            entry.retry.max_attempts,
            Duration::from_millis(entry.retry.initial_delay_ms),
            Duration::from_millis(entry.retry.max_delay_ms),
        ),
        terminology: entry.terminology.clone(),
        segment_separator: entry
            .segment_separator
            .clone()
            .unwrap_or_else(|| DEFAULT_SEGMENT_SEPARATOR.to_string()),
        batching: entry.feature("batching", true),
    };

    validate_profile(&profile)?;
    Ok(profile)
}

fn validate_profile(profile: &ProviderProfile) -> Result<()> {
    let fail = |what: &str| {
        Err(TranslationError::config(format!(
            "provider {}: {}",
            profile.id, what
        )))
    };

    if profile.max_units_per_call == 0 {
        return fail("max_units_per_call must be greater than 0");
    }
    if profile.requests_per_unit_time == 0 || profile.unit_time.is_zero() {
        return fail("rate_limit must admit at least one request per non-zero window");
    }
    if profile.burst == 0 {
        return fail("rate_limit.burst must be greater than 0");
    }
    if profile.max_concurrent == 0 {
        return fail("max_concurrent must be greater than 0");
    }
    if profile.timeout.is_zero() {
        return fail("timeout_ms must be greater than 0");
    }
    if profile.retry_policy.max_attempts == 0 {
        return fail("retry.max_attempts must be at least 1");
    }
    if profile.retry_policy.initial_delay > profile.retry_policy.max_delay {
        return fail("retry.initial_delay_ms exceeds retry.max_delay_ms");
    }
    if profile.segment_separator.trim().is_empty() {
        return fail("segment_separator must contain visible characters");
    }
    if profile.terminology.iter().any(|t| t.source.is_empty()) {
        return fail("terminology entries need a non-empty source term");
    }
    Ok(())
}

/// Builds a provider from its settings and call timeout
pub type ProviderConstructor =
    fn(&ProviderSettings, Duration) -> Result<Arc<dyn TranslationProvider>>;

/// Maps a backend kind to its constructor
#[derive(Clone)]
pub struct ProviderFactory {
    constructors: HashMap<String, ProviderConstructor>,
}

impl std::fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.constructors.keys().collect();
        kinds.sort();
        f.debug_struct("ProviderFactory").field("kinds", &kinds).finish()
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl ProviderFactory {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Factory knowing every backend shipped with the crate
    pub fn with_builtin() -> Self {
        let mut factory = Self::empty();
        factory.register("doubao", |settings, timeout| {
            Ok(Arc::new(DoubaoProvider::new(settings, timeout)))
        });
        factory.register("openai", |settings, timeout| {
            Ok(Arc::new(OpenAiProvider::new(settings, timeout)))
        });
        factory.register("deepl", |settings, timeout| {
            Ok(Arc::new(DeepLProvider::new(settings, timeout)))
        });
        factory.register("caiyun", |settings, timeout| {
            Ok(Arc::new(CaiyunProvider::new(settings, timeout)))
        });
        factory.register("mock", |settings, _| {
            Ok(Arc::new(MockProvider::from_settings(settings)?))
        });
        factory
    }

    pub fn register(&mut self, kind: impl Into<String>, constructor: ProviderConstructor) {
        self.constructors.insert(kind.into(), constructor);
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn create(&self, entry: &ProviderEntry) -> Result<Arc<dyn TranslationProvider>> {
        let constructor = self.constructors.get(&entry.kind).ok_or_else(|| {
            TranslationError::config(format!("no provider registered for kind: {}", entry.kind))
        })?;
        constructor(&entry.provider_settings()?, entry.timeout())
    }
}
