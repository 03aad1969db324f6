//! CLI command definitions and handlers

use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use crate::core::config::TranslatorConfig;

/// Commands for EPUBox Translator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate a chapter file or a directory of HTML/XHTML chapters
    Translate(TranslateArgs),

    /// Show the recorded progress of a document
    Status {
        /// Document id used when translating
        #[arg(short, long)]
        document_id: String,

        /// Progress directory (default: from config)
        #[arg(long)]
        progress_dir: Option<PathBuf>,
    },

    /// List configured providers and their resolved limits
    Providers {
        /// Provider registry file (default: from config)
        #[arg(short, long)]
        registry: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct TranslateArgs {
    /// Input chapter file or directory (required)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory (required)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Source language (default: from config)
    #[arg(long)]
    pub source_lang: Option<String>,

    /// Target language (default: from config)
    #[arg(short, long)]
    pub target_lang: Option<String>,

    /// Provider id from the registry (default: the registry's default)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Provider registry file
    #[arg(short, long)]
    pub registry: Option<PathBuf>,

    /// Progress directory
    #[arg(long)]
    pub progress_dir: Option<PathBuf>,

    /// Document id for progress tracking (default: input name)
    #[arg(long)]
    pub document_id: Option<String>,

    /// Chapters translated at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Extra element whose content is never translated (repeatable)
    #[arg(long = "skip-tag")]
    pub skip_tags: Vec<String>,
}

fn apply_overrides(mut config: TranslatorConfig, args: &TranslateArgs) -> TranslatorConfig {
    if let Some(lang) = &args.source_lang {
        config.source_lang = lang.clone();
    }
    if let Some(lang) = &args.target_lang {
        config.target_lang = lang.clone();
    }
    if let Some(registry) = &args.registry {
        config.registry_path = Some(registry.clone());
    }
    if let Some(dir) = &args.progress_dir {
        config.progress_dir = dir.clone();
    }
    if let Some(n) = args.concurrency {
        config.max_concurrent_chapters = n;
    }
    config
}

/// Input file stem or directory name
fn default_document_id(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// Handle chapter translation command
pub async fn handle_translate(args: TranslateArgs, config: TranslatorConfig) -> anyhow::Result<()> {
    use crate::core::models::{ChapterInfo, ChapterStatus};
    use crate::core::orchestrator::TranslationOrchestrator;
    use crate::core::progress::{JsonFileProgressStore, ProgressStore, ProgressTracker};
    use crate::processors::chapter::{ChapterPipeline, FileSystemChapters};
    use crate::processors::skip_tags::SkipTagRegistry;
    use crate::processors::tree::TreeBuilder;
    use crate::providers::ProviderFactory;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;
    use tracing::{info, warn};

    let start_time = Instant::now();

    let config = apply_overrides(config, &args);
    config.validate()?;
    let langs = config.languages();
    let document_id = args
        .document_id
        .clone()
        .unwrap_or_else(|| default_document_id(&args.input));

    info!("Starting chapter translation");
    info!("Input: {}", args.input.display());
    info!("Output: {}", args.output.display());
    info!("Languages: {}", langs);
    info!("Document: {}", document_id);

    // Find chapters
    let files = FileSystemChapters::new(&args.input, &args.output);
    let chapters = files.discover()?;
    if chapters.is_empty() {
        anyhow::bail!("No chapter files (.html, .xhtml, .htm) found");
    }

    // Build providers
    let registry = config.load_registry()?;
    let cancel = CancellationToken::new();
    let (orchestrator, skipped) = TranslationOrchestrator::from_registry(
        &registry,
        &ProviderFactory::with_builtin(),
        cancel.clone(),
    )
    .await?;
    for (id, e) in &skipped {
        warn!("Provider {} skipped: {}", id, e);
    }
    let orchestrator = Arc::new(orchestrator);

    // Load or create progress
    let store: Arc<dyn ProgressStore> = Arc::new(JsonFileProgressStore::new(&config.progress_dir));
    let tracker = ProgressTracker::initialize(store, &document_id, &chapters).await?;
    let snapshot = tracker.snapshot().await;
    if snapshot.completed > 0 {
        info!(
            "Resuming: {}/{} chapters already completed",
            snapshot.completed, snapshot.total
        );
    }

    // Create progress bar
    let pb = ProgressBar::new(snapshot.total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )?
            .progress_chars("=>-"),
    );
    pb.set_position(snapshot.completed as u64);

    let bar = pb.clone();
    let observer = Arc::new(move |chapter: &ChapterInfo, status: ChapterStatus| match status {
        ChapterStatus::Processing => bar.set_message(format!("Translating: {}", chapter.id)),
        ChapterStatus::Completed => bar.inc(1),
        ChapterStatus::Failed => bar.println(format!("❌ Failed: {}", chapter.id)),
        ChapterStatus::Pending => {}
    });

    let skip_tags = args
        .skip_tags
        .iter()
        .fold(SkipTagRegistry::default(), |tags, tag| tags.with_tag(tag));
    let pipeline = ChapterPipeline::new(orchestrator.clone())
        .with_builder(TreeBuilder::new(skip_tags))
        .with_provider(args.provider.clone())
        .with_max_concurrent_chapters(config.max_concurrent_chapters)
        .with_observer(observer);

    // Ctrl-C stops new work; requests already sent are allowed to finish
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight requests");
            interrupt.cancel();
        }
    });

    let summary = orchestrator
        .scoped(|_| async { pipeline.run_task(&tracker, &files, &files, &langs).await })
        .await?;

    pb.finish_with_message("Completed");

    let duration = start_time.elapsed();
    info!(
        "Completed: {} translated, {} failed, {} skipped in {:?}",
        summary.completed, summary.failed, summary.skipped, duration
    );

    println!("\n✅ Translation completed!");
    println!("   Translated: {}", summary.completed);
    println!("   Already done: {}", summary.already_completed);
    println!("   Failed: {}", summary.failed);
    if summary.skipped > 0 {
        println!("   Not started: {}", summary.skipped);
    }
    println!("   Progress: {:.1}%", summary.snapshot.percentage);
    println!("   Time: {:?}", duration);

    if !summary.snapshot.is_complete() {
        println!("\nRun the same command again to resume the remaining chapters.");
    }

    Ok(())
}

/// Handle progress status command
pub async fn handle_status(
    document_id: String,
    progress_dir: Option<PathBuf>,
    config: TranslatorConfig,
) -> anyhow::Result<()> {
    use crate::core::progress::{JsonFileProgressStore, ProgressStore};

    let dir = progress_dir.unwrap_or(config.progress_dir);
    let store = JsonFileProgressStore::new(&dir);

    let Some(record) = store.load(&document_id).await? else {
        println!("No progress recorded for {} in {}", document_id, dir.display());
        return Ok(());
    };

    let snapshot = record.snapshot();
    println!("📖 {} ({:?})", record.document_id, record.status);
    println!(
        "   {}/{} completed ({:.1}%), {} failed, {} pending, {} processing",
        snapshot.completed,
        snapshot.total,
        snapshot.percentage,
        snapshot.failed,
        snapshot.pending,
        snapshot.processing
    );
    println!("   Updated: {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();

    for chapter in &record.chapters {
        match &chapter.error_detail {
            Some(detail) => println!(
                "   {:<11} {}  ({})",
                chapter.status.to_string(),
                chapter.id,
                detail
            ),
            None => println!("   {:<11} {}", chapter.status.to_string(), chapter.id),
        }
    }

    Ok(())
}

/// Handle provider listing command
pub async fn handle_providers(
    registry: Option<PathBuf>,
    config: TranslatorConfig,
) -> anyhow::Result<()> {
    use crate::providers::ProviderFactory;

    let mut config = config;
    if registry.is_some() {
        config.registry_path = registry;
    }
    let registry = config.load_registry()?;
    let factory = ProviderFactory::with_builtin();

    println!("Known kinds: {}", factory.kinds().join(", "));
    println!();

    for (id, entry) in registry.enabled() {
        let marker = if registry.default_provider.as_deref() == Some(id.as_str()) {
            "*"
        } else {
            " "
        };
        match registry.resolve_profile(id) {
            Ok(profile) => println!(
                "{} {:<12} {:<8} {} {} per call, {} requests per {:?} (burst {}), {} in flight, timeout {:?}",
                marker,
                id,
                entry.kind,
                profile.max_units_per_call,
                profile.unit_type,
                profile.requests_per_unit_time,
                profile.unit_time,
                profile.burst,
                profile.max_concurrent,
                profile.timeout
            ),
            Err(e) => println!("{} {:<12} {:<8} ❌ {}", marker, id, entry.kind, e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> TranslateArgs {
        TranslateArgs {
            input: PathBuf::from("books/moby-dick"),
            output: PathBuf::from("out"),
            source_lang: None,
            target_lang: Some("fr".to_string()),
            provider: None,
            registry: None,
            progress_dir: None,
            document_id: None,
            concurrency: Some(8),
            skip_tags: Vec::new(),
        }
    }

    #[test]
    fn test_overrides() {
        let config = apply_overrides(TranslatorConfig::default(), &args());
        assert_eq!(config.target_lang, "fr");
        assert_eq!(config.source_lang, "en");
        assert_eq!(config.max_concurrent_chapters, 8);
    }

    #[test]
    fn test_default_document_id() {
        assert_eq!(default_document_id(Path::new("books/moby-dick")), "moby-dick");
        assert_eq!(default_document_id(Path::new("ch1.xhtml")), "ch1");
        assert_eq!(default_document_id(Path::new("/")), "document");
    }
}
