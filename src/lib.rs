//! EPUBox Translator - HTML chapter translation engine
//!
//! Splits chapter markup into translatable text leaves, sends them to
//! rate-limited translation backends, and rebuilds the markup with the
//! translations in place while tracking per-chapter progress.

#![forbid(unsafe_code)]

pub mod cli;
pub mod core;
pub mod processors;
pub mod providers;

// Re-export key types for convenience
pub use core::{
    config::TranslatorConfig,
    errors::{Result, TranslationError},
    models::{ChapterInfo, ChapterStatus, LanguagePair, ProgressSnapshot, ProviderProfile, UnitType},
    orchestrator::{TranslationOrchestrator, TreeReport},
    progress::{JsonFileProgressStore, MemoryProgressStore, ProgressStore, ProgressTracker},
    rate_limiter::RateLimiter,
};

pub use processors::{
    chapter::{ChapterPipeline, FileSystemChapters},
    reconstruct::HtmlReconstructor,
    skip_tags::SkipTagRegistry,
    tree::{ContentTree, TreeBuilder},
};

pub use providers::{ProviderFactory, ProviderRegistry, TranslationProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
