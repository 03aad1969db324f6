//! In-process backend for dry runs and tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{LanguagePair, UnitType};
use crate::providers::{ProviderSettings, TranslationProvider};

/// How the mock renders text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockMode {
    Uppercase,
    Echo,
    Prefix(String),
    /// Exact match first, then ordered substring replacement
    Dictionary(Vec<(String, String)>),
}

/// One scripted outcome, consumed by the next call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    RateLimited,
    Transient,
    Permanent,
    /// Sleep before answering normally
    Stall(Duration),
}

#[derive(Debug)]
pub struct MockProvider {
    mode: MockMode,
    unit_type: UnitType,
    latency: Duration,
    invalid_reason: Option<String>,
    script: Mutex<VecDeque<MockFailure>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockProvider {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode,
            unit_type: UnitType::Characters,
            latency: Duration::ZERO,
            invalid_reason: None,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Build from registry settings: `mode` = uppercase | echo | prefix, `prefix`, `unit_type`
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let mode = match settings.get_or("mode", "prefix") {
            "uppercase" => MockMode::Uppercase,
            "echo" => MockMode::Echo,
            "prefix" => MockMode::Prefix(settings.get_or("prefix", "[TRANSLATED] ").to_string()),
            other => {
                return Err(TranslationError::config(format!("unknown mock mode: {other}")))
            }
        };
        let unit_type = match settings.get_or("unit_type", "characters") {
            "tokens" => UnitType::Tokens,
            _ => UnitType::Characters,
        };
        let latency = settings
            .get("latency_ms")
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or_default();

        Ok(Self::new(mode).with_unit_type(unit_type).with_latency(latency))
    }

    pub fn dictionary<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(MockMode::Dictionary(
            entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }

    pub fn with_unit_type(mut self, unit_type: UnitType) -> Self {
        self.unit_type = unit_type;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_invalid_config(mut self, reason: impl Into<String>) -> Self {
        self.invalid_reason = Some(reason.into());
        self
    }

    /// Queue outcomes for upcoming calls, in order
    pub fn script(self, failures: impl IntoIterator<Item = MockFailure>) -> Self {
        if let Ok(mut queue) = self.script.lock() {
            queue.extend(failures);
        }
        self
    }

    /// Texts received so far, in arrival order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Highest number of calls observed running at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn render(&self, text: &str) -> String {
        match &self.mode {
            MockMode::Uppercase => text.to_uppercase(),
            MockMode::Echo => text.to_string(),
            MockMode::Prefix(prefix) => format!("{prefix}{text}"),
            MockMode::Dictionary(entries) => {
                if let Some((_, target)) = entries.iter().find(|(source, _)| source == text) {
                    return target.clone();
                }
                entries
                    .iter()
                    .fold(text.to_string(), |acc, (source, target)| acc.replace(source, target))
            }
        }
    }

    fn next_scripted(&self) -> Option<MockFailure> {
        self.script.lock().ok().and_then(|mut q| q.pop_front())
    }
}

/// Decrements the in-flight gauge on every exit path
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TranslationProvider for MockProvider {
    fn provider_type(&self) -> &str {
        "mock"
    }

    fn unit_type(&self) -> UnitType {
        self.unit_type
    }

    fn validate_config(&self) -> Result<()> {
        match &self.invalid_reason {
            Some(reason) => Err(TranslationError::config(reason.clone())),
            None => Ok(()),
        }
    }

    async fn translate(&self, text: &str, _langs: &LanguagePair) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_scripted() {
            Some(MockFailure::RateLimited) => {
                return Err(TranslationError::RateLimitError { retry_after: None })
            }
            Some(MockFailure::Transient) => {
                return Err(TranslationError::transient("mock", "scripted transient failure"))
            }
            Some(MockFailure::Permanent) => {
                return Err(TranslationError::permanent("mock", "scripted permanent failure"))
            }
            Some(MockFailure::Stall(duration)) => tokio::time::sleep(duration).await,
            None => {}
        }

        Ok(self.render(text))
    }
}
