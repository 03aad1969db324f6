//! Core data models for translation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::core::retry::RetryPolicy;

/// How a provider measures text against its per-call limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    /// Unicode scalar values
    Characters,
    /// Estimated model tokens
    Tokens,
}

impl UnitType {
    /// Measure `text` in this unit
    pub fn count(&self, text: &str) -> usize {
        match self {
            UnitType::Characters => text.chars().count(),
            UnitType::Tokens => estimate_tokens(text),
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitType::Characters => write!(f, "characters"),
            UnitType::Tokens => write!(f, "tokens"),
        }
    }
}

/// Rough token estimate: four ASCII bytes per token, one token per other char.
///
/// Monotone over prefixes, which the chunker relies on when it bisects a
/// string for the longest piece under a limit.
pub fn estimate_tokens(text: &str) -> usize {
    let mut ascii = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if c.is_ascii() {
            ascii += 1;
        } else {
            other += 1;
        }
    }
    ascii.div_ceil(4) + other
}

/// One fixed rendering applied before dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermEntry {
    pub source: String,
    pub target: String,
}

impl TermEntry {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Resolved configuration of one translation backend
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    /// Registry id, e.g. `doubao-fast`
    pub id: String,
    /// Backend kind, e.g. `doubao`
    pub provider_type: String,
    pub unit_type: UnitType,
    pub max_units_per_call: usize,
    /// Requests admitted per `unit_time`
    pub requests_per_unit_time: u32,
    pub unit_time: Duration,
    /// Bucket capacity; defaults to `requests_per_unit_time`
    pub burst: u32,
    /// In-flight call cap, separate from the rate
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// Ordered; earlier entries win
    pub terminology: Vec<TermEntry>,
    /// Joins grouped leaves inside one call
    pub segment_separator: String,
    /// Group several leaves per call; off sends every leaf alone
    pub batching: bool,
}

impl ProviderProfile {
    /// Token refill rate for the profile's bucket
    pub fn refill_per_second(&self) -> f64 {
        let secs = self.unit_time.as_secs_f64();
        if secs <= 0.0 {
            return f64::from(self.requests_per_unit_time);
        }
        f64::from(self.requests_per_unit_time) / secs
    }
}

/// Source/target language pair supplied by the task driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

/// Per-chapter translation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChapterStatus::Pending => write!(f, "pending"),
            ChapterStatus::Processing => write!(f, "processing"),
            ChapterStatus::Completed => write!(f, "completed"),
            ChapterStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Overall status of a document's translation task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Chapter identity handed over by the task driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub id: String,
    pub name: String,
}

impl ChapterInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Persisted state of one chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub id: String,
    pub name: String,
    pub status: ChapterStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
}

impl ChapterProgress {
    pub fn pending(info: &ChapterInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            status: ChapterStatus::Pending,
            completed_at: None,
            error_detail: None,
        }
    }
}

/// Persisted progress of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub document_id: String,
    pub chapters: Vec<ChapterProgress>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Fresh all-pending record
    pub fn new(document_id: impl Into<String>, chapters: &[ChapterInfo]) -> Self {
        let now = Utc::now();
        let mut record = Self {
            document_id: document_id.into(),
            chapters: chapters.iter().map(ChapterProgress::pending).collect(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        record.refresh_status();
        record
    }

    pub fn chapter(&self, chapter_id: &str) -> Option<&ChapterProgress> {
        self.chapters.iter().find(|c| c.id == chapter_id)
    }

    /// Replace one chapter entry and recompute the overall status
    pub fn apply_chapter(&mut self, update: ChapterProgress) -> bool {
        match self.chapters.iter_mut().find(|c| c.id == update.id) {
            Some(slot) => {
                *slot = update;
                self.updated_at = Utc::now();
                self.refresh_status();
                true
            }
            None => false,
        }
    }

    /// Recompute `status` from the chapter set
    pub fn refresh_status(&mut self) {
        let snapshot = ProgressSnapshot::from_chapters(&self.chapters);
        self.status = if snapshot.total > 0 && snapshot.completed == snapshot.total {
            TaskStatus::Completed
        } else if snapshot.processing > 0 {
            TaskStatus::Processing
        } else if snapshot.pending == snapshot.total {
            TaskStatus::Pending
        } else if snapshot.pending == 0 && snapshot.failed > 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Processing
        };
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::from_chapters(&self.chapters)
    }
}

/// Counts and percentage of a document's chapters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Completed / total, 0.0..=100.0
    pub percentage: f64,
}

impl ProgressSnapshot {
    pub fn from_chapters(chapters: &[ChapterProgress]) -> Self {
        let mut snapshot = Self {
            total: chapters.len(),
            pending: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            percentage: 0.0,
        };
        for chapter in chapters {
            match chapter.status {
                ChapterStatus::Pending => snapshot.pending += 1,
                ChapterStatus::Processing => snapshot.processing += 1,
                ChapterStatus::Completed => snapshot.completed += 1,
                ChapterStatus::Failed => snapshot.failed += 1,
            }
        }
        if snapshot.total > 0 {
            snapshot.percentage = snapshot.completed as f64 * 100.0 / snapshot.total as f64;
        }
        snapshot
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}
