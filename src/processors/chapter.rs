//! Chapter pipeline: one chapter through build, translate and reconstruct,
//! and a document's chapters through the progress tracker

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{ChapterInfo, ChapterStatus, LanguagePair, ProgressSnapshot};
use crate::core::orchestrator::{TranslationOrchestrator, TreeReport};
use crate::core::progress::ProgressTracker;
use crate::processors::reconstruct::HtmlReconstructor;
use crate::processors::tree::TreeBuilder;

/// File extensions treated as chapters
pub const CHAPTER_EXTENSIONS: &[&str] = &["html", "xhtml", "htm"];

/// Where chapter markup comes from
#[async_trait]
pub trait ChapterSource: Send + Sync {
    async fn read(&self, chapter: &ChapterInfo) -> Result<Vec<u8>>;
}

/// Where translated chapter markup goes
#[async_trait]
pub trait ChapterSink: Send + Sync {
    async fn write(&self, chapter: &ChapterInfo, html: String) -> Result<()>;
}

/// Chapters as files below an input root, mirrored below an output root.
///
/// A chapter id is the file's path relative to the input root, with `/`
/// separators.
#[derive(Debug, Clone)]
pub struct FileSystemChapters {
    input: PathBuf,
    base: PathBuf,
    output_root: PathBuf,
}

impl FileSystemChapters {
    /// `input` may be a directory of chapters or a single chapter file
    pub fn new(input: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        let input = input.into();
        let base = if input.is_file() {
            input.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            input.clone()
        };
        Self {
            input,
            base,
            output_root: output_root.into(),
        }
    }

    /// Chapter files in path order
    pub fn discover(&self) -> Result<Vec<ChapterInfo>> {
        if !self.input.exists() {
            return Err(TranslationError::FileError {
                path: self.input.display().to_string(),
                message: "input not found".to_string(),
            });
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.input).follow_links(true) {
            let entry = entry.map_err(|e| TranslationError::FileError {
                path: self.input.display().to_string(),
                message: e.to_string(),
            })?;
            if entry.file_type().is_file() && is_chapter_file(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        let chapters: Vec<ChapterInfo> = paths
            .iter()
            .filter_map(|path| {
                let relative = path.strip_prefix(&self.base).ok()?;
                let id = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| id.clone());
                Some(ChapterInfo::new(id, name))
            })
            .collect();

        debug!(
            "Found {} chapters under {}",
            chapters.len(),
            self.input.display()
        );
        Ok(chapters)
    }

    pub fn input_path(&self, chapter: &ChapterInfo) -> PathBuf {
        self.base.join(&chapter.id)
    }

    pub fn output_path(&self, chapter: &ChapterInfo) -> PathBuf {
        self.output_root.join(&chapter.id)
    }
}

fn is_chapter_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            CHAPTER_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn file_error(path: &Path, err: std::io::Error) -> TranslationError {
    TranslationError::FileError {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl ChapterSource for FileSystemChapters {
    async fn read(&self, chapter: &ChapterInfo) -> Result<Vec<u8>> {
        let path = self.input_path(chapter);
        tokio::fs::read(&path).await.map_err(|e| file_error(&path, e))
    }
}

#[async_trait]
impl ChapterSink for FileSystemChapters {
    async fn write(&self, chapter: &ChapterInfo, html: String) -> Result<()> {
        let path = self.output_path(chapter);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| file_error(parent, e))?;
        }
        tokio::fs::write(&path, html)
            .await
            .map_err(|e| file_error(&path, e))?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

/// Translated markup of one chapter
#[derive(Debug, Clone)]
pub struct ChapterOutput {
    pub html: String,
    pub report: TreeReport,
}

/// Per-run counts of a task
#[derive(Debug, Clone)]
pub struct TaskSummary {
    /// Completed before this run started
    pub already_completed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Not started because the run was cancelled
    pub skipped: usize,
    pub snapshot: ProgressSnapshot,
}

/// Called on every chapter transition made by `run_task`
pub type StatusObserver = Arc<dyn Fn(&ChapterInfo, ChapterStatus) + Send + Sync>;

enum ChapterOutcome {
    Completed,
    Failed,
    Skipped,
}

/// Runs chapters through TreeBuilder, the orchestrator and HtmlReconstructor
pub struct ChapterPipeline {
    orchestrator: Arc<TranslationOrchestrator>,
    builder: TreeBuilder,
    reconstructor: HtmlReconstructor,
    provider_id: Option<String>,
    max_concurrent_chapters: usize,
    observer: Option<StatusObserver>,
}

impl fmt::Debug for ChapterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChapterPipeline")
            .field("provider_id", &self.provider_id)
            .field("max_concurrent_chapters", &self.max_concurrent_chapters)
            .finish_non_exhaustive()
    }
}

impl ChapterPipeline {
    pub fn new(orchestrator: Arc<TranslationOrchestrator>) -> Self {
        Self {
            orchestrator,
            builder: TreeBuilder::default(),
            reconstructor: HtmlReconstructor::new(),
            provider_id: None,
            max_concurrent_chapters: 1,
            observer: None,
        }
    }

    pub fn with_builder(mut self, builder: TreeBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Provider for every chapter; the orchestrator's default when unset
    pub fn with_provider(mut self, provider_id: Option<String>) -> Self {
        self.provider_id = provider_id;
        self
    }

    pub fn with_max_concurrent_chapters(mut self, n: usize) -> Self {
        self.max_concurrent_chapters = n.max(1);
        self
    }

    pub fn with_observer(mut self, observer: StatusObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build, translate and reconstruct one chapter
    pub async fn translate_html(&self, html: &str, langs: &LanguagePair) -> Result<ChapterOutput> {
        self.translate_bytes(html.as_bytes(), langs).await
    }

    pub async fn translate_bytes(&self, bytes: &[u8], langs: &LanguagePair) -> Result<ChapterOutput> {
        let provider_id = self.provider_id.as_deref();
        let handle = self.orchestrator.handle(provider_id).await?;
        let mut tree = self.builder.build_bytes(bytes, |t| handle.unit_count(t))?;
        let report = self
            .orchestrator
            .translate_tree(&mut tree, provider_id, langs)
            .await?;
        let html = self.reconstructor.reconstruct(&tree)?;
        Ok(ChapterOutput { html, report })
    }

    /// Process every chapter not yet Completed.
    ///
    /// Output is written through `sink` before the chapter is marked
    /// Completed. Chapter failures are recorded on the tracker; only
    /// progress-store errors and a missing provider fail the whole run.
    pub async fn run_task(
        &self,
        tracker: &ProgressTracker,
        source: &dyn ChapterSource,
        sink: &dyn ChapterSink,
        langs: &LanguagePair,
    ) -> Result<TaskSummary> {
        self.orchestrator
            .handle(self.provider_id.as_deref())
            .await?;

        let pending = tracker.resumable_chapters().await;
        let already_completed = tracker.chapter_ids().len() - pending.len();
        info!(
            "Document {}: {} chapters to translate, {} already completed",
            tracker.document_id(),
            pending.len(),
            already_completed
        );

        let outcomes: Vec<Result<ChapterOutcome>> = stream::iter(pending.iter())
            .map(|chapter| self.process_chapter(tracker, source, sink, chapter, langs))
            .buffer_unordered(self.max_concurrent_chapters)
            .collect()
            .await;

        let mut summary = TaskSummary {
            already_completed,
            completed: 0,
            failed: 0,
            skipped: 0,
            snapshot: tracker.snapshot().await,
        };
        for outcome in outcomes {
            match outcome? {
                ChapterOutcome::Completed => summary.completed += 1,
                ChapterOutcome::Failed => summary.failed += 1,
                ChapterOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary.snapshot = tracker.snapshot().await;

        info!(
            "Document {}: {} completed, {} failed, {} skipped ({:.1}%)",
            tracker.document_id(),
            summary.completed,
            summary.failed,
            summary.skipped,
            summary.snapshot.percentage
        );
        Ok(summary)
    }

    fn notify(&self, chapter: &ChapterInfo, status: ChapterStatus) {
        if let Some(observer) = &self.observer {
            observer(chapter, status);
        }
    }

    async fn process_chapter(
        &self,
        tracker: &ProgressTracker,
        source: &dyn ChapterSource,
        sink: &dyn ChapterSink,
        chapter: &ChapterInfo,
        langs: &LanguagePair,
    ) -> Result<ChapterOutcome> {
        if self.orchestrator.is_cancelled() {
            debug!("Cancelled before chapter {}", chapter.id);
            return Ok(ChapterOutcome::Skipped);
        }

        tracker.mark_processing(&chapter.id).await?;
        self.notify(chapter, ChapterStatus::Processing);

        match self.translate_chapter(source, sink, chapter, langs).await {
            Ok(()) => {
                tracker.mark_completed(&chapter.id).await?;
                self.notify(chapter, ChapterStatus::Completed);
                info!("Chapter {} completed", chapter.id);
                Ok(ChapterOutcome::Completed)
            }
            Err(e) => {
                error!("Chapter {} failed: {}", chapter.id, e);
                tracker.mark_failed(&chapter.id, &e.to_string()).await?;
                self.notify(chapter, ChapterStatus::Failed);
                Ok(ChapterOutcome::Failed)
            }
        }
    }

    async fn translate_chapter(
        &self,
        source: &dyn ChapterSource,
        sink: &dyn ChapterSink,
        chapter: &ChapterInfo,
        langs: &LanguagePair,
    ) -> Result<()> {
        let bytes = source.read(chapter).await?;
        let output = self.translate_bytes(&bytes, langs).await?;
        let report = &output.report;

        if report.cancelled > 0 {
            warn!(
                "Chapter {} interrupted with {} leaves untranslated",
                chapter.id, report.cancelled
            );
            return Err(TranslationError::Cancelled);
        }
        if report.failed > 0 {
            let provider = self.provider_id.clone().unwrap_or_else(|| "default".to_string());
            return Err(TranslationError::permanent(
                provider,
                format!(
                    "{} of {} leaves failed: {}",
                    report.failed,
                    report.failed + report.translated,
                    report.first_error.as_deref().unwrap_or("unknown error")
                ),
            ));
        }

        sink.write(chapter, output.html).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::{JsonFileProgressStore, MemoryProgressStore, ProgressStore};
    use crate::providers::mock::{MockFailure, MockMode, MockProvider};
    use crate::providers::ProviderRegistry;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    async fn pipeline(mock: MockProvider) -> ChapterPipeline {
        let profile = ProviderRegistry::mock_only().resolve_profile("mock").unwrap();
        let orchestrator = TranslationOrchestrator::default().with_default_provider("mock");
        orchestrator.register(profile, Arc::new(mock)).await.unwrap();
        ChapterPipeline::new(Arc::new(orchestrator)).with_max_concurrent_chapters(2)
    }

    fn langs() -> LanguagePair {
        LanguagePair::new("en", "fr")
    }

    /// In-memory chapters; writes record the chapter's status at write time
    struct MemoryChapters {
        inputs: HashMap<String, String>,
        reads: Mutex<Vec<String>>,
        writes: Mutex<Vec<(String, String, Option<ChapterStatus>)>>,
        tracker: Option<Arc<ProgressTracker>>,
    }

    impl MemoryChapters {
        fn new(inputs: &[(&str, &str)]) -> Self {
            Self {
                inputs: inputs
                    .iter()
                    .map(|(id, html)| (id.to_string(), html.to_string()))
                    .collect(),
                reads: Mutex::new(Vec::new()),
                writes: Mutex::new(Vec::new()),
                tracker: None,
            }
        }
    }

    #[async_trait]
    impl ChapterSource for MemoryChapters {
        async fn read(&self, chapter: &ChapterInfo) -> Result<Vec<u8>> {
            self.reads.lock().unwrap().push(chapter.id.clone());
            self.inputs
                .get(&chapter.id)
                .map(|html| html.as_bytes().to_vec())
                .ok_or_else(|| TranslationError::FileError {
                    path: chapter.id.clone(),
                    message: "missing".to_string(),
                })
        }
    }

    #[async_trait]
    impl ChapterSink for MemoryChapters {
        async fn write(&self, chapter: &ChapterInfo, html: String) -> Result<()> {
            let status = match &self.tracker {
                Some(tracker) => tracker.chapter(&chapter.id).await.map(|c| c.status),
                None => None,
            };
            self.writes
                .lock()
                .unwrap()
                .push((chapter.id.clone(), html, status));
            Ok(())
        }
    }

    fn infos(ids: &[&str]) -> Vec<ChapterInfo> {
        ids.iter().map(|id| ChapterInfo::new(*id, *id)).collect()
    }

    #[tokio::test]
    async fn test_translate_html_keeps_skipped_markup() {
        let pipeline = pipeline(MockProvider::dictionary([("Hello", "Bonjour"), ("world", "monde")])).await;
        let output = pipeline
            .translate_html("<p>Hello <code>x=1</code> world</p>", &langs())
            .await
            .unwrap();

        assert_eq!(output.html, "<p>Bonjour <code>x=1</code> monde</p>");
        assert_eq!(output.report.translated, 2);
        assert!(output.report.is_complete());
    }

    #[tokio::test]
    async fn test_translate_invalid_utf8_is_parse_error() {
        let pipeline = pipeline(MockProvider::new(MockMode::Uppercase)).await;
        let err = pipeline
            .translate_bytes(&[0x3c, 0x70, 0x3e, 0xff, 0xfe], &langs())
            .await
            .unwrap_err();
        assert!(matches!(err, TranslationError::ParseError { .. }));
    }

    #[tokio::test]
    async fn test_resume_processes_only_unfinished_chapters() {
        let store: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
        let chapters = infos(&["c1", "c2", "c3", "c4"]);
        let tracker = Arc::new(
            ProgressTracker::initialize(store, "book", &chapters)
                .await
                .unwrap(),
        );
        assert_ok!(tracker.mark_completed("c1").await);
        assert_ok!(tracker.mark_completed("c2").await);
        assert_ok!(tracker.mark_processing("c3").await);
        assert_ok!(tracker.mark_failed("c4", "earlier failure").await);
        assert_eq!(tracker.snapshot().await.percentage, 50.0);

        let mut io = MemoryChapters::new(&[
            ("c1", "<p>one</p>"),
            ("c2", "<p>two</p>"),
            ("c3", "<p>three</p>"),
            ("c4", "<p>four</p>"),
        ]);
        io.tracker = Some(tracker.clone());

        let pipeline = pipeline(MockProvider::new(MockMode::Uppercase)).await;
        let summary = pipeline
            .run_task(&tracker, &io, &io, &langs())
            .await
            .unwrap();

        let mut reads = io.reads.lock().unwrap().clone();
        reads.sort();
        assert_eq!(reads, vec!["c3", "c4"]);

        let mut writes = io.writes.lock().unwrap().clone();
        writes.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            writes,
            vec![
                (
                    "c3".to_string(),
                    "<p>THREE</p>".to_string(),
                    Some(ChapterStatus::Processing)
                ),
                (
                    "c4".to_string(),
                    "<p>FOUR</p>".to_string(),
                    Some(ChapterStatus::Processing)
                ),
            ]
        );

        assert_eq!(summary.already_completed, 2);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);
        assert!(summary.snapshot.is_complete());
        assert_eq!(summary.snapshot.percentage, 100.0);
    }

    #[tokio::test]
    async fn test_chapter_failures_are_recorded_and_contained() {
        let store: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::initialize(store, "book", &infos(&["ok", "missing"]))
            .await
            .unwrap();
        let io = MemoryChapters::new(&[("ok", "<p>fine</p>")]);

        let pipeline = pipeline(MockProvider::new(MockMode::Uppercase)).await;
        let summary = pipeline
            .run_task(&tracker, &io, &io, &langs())
            .await
            .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        let missing = tracker.chapter("missing").await.unwrap();
        assert_eq!(missing.status, ChapterStatus::Failed);
        assert!(missing.error_detail.unwrap().contains("missing"));
        assert_eq!(summary.snapshot.percentage, 50.0);
    }

    #[tokio::test]
    async fn test_failed_leaf_fails_the_chapter_without_writing() {
        let store: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::initialize(store, "book", &infos(&["c1"]))
            .await
            .unwrap();
        let io = MemoryChapters::new(&[("c1", "<p>doomed</p>")]);

        let mock = MockProvider::new(MockMode::Uppercase).script([MockFailure::Permanent]);
        let pipeline = pipeline(mock).await;
        let summary = pipeline
            .run_task(&tracker, &io, &io, &langs())
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert!(io.writes.lock().unwrap().is_empty());
        let chapter = tracker.chapter("c1").await.unwrap();
        assert_eq!(chapter.status, ChapterStatus::Failed);
        assert!(chapter
            .error_detail
            .unwrap()
            .contains("scripted permanent failure"));

        // A second run retries the failed chapter
        let summary = pipeline
            .run_task(&tracker, &io, &io, &langs())
            .await
            .unwrap();
        assert_eq!(summary.completed, 1);
        assert!(summary.snapshot.is_complete());
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_no_chapters() {
        let store: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::initialize(store, "book", &infos(&["c1", "c2"]))
            .await
            .unwrap();
        let io = MemoryChapters::new(&[("c1", "<p>a</p>"), ("c2", "<p>b</p>")]);

        let pipeline = pipeline(MockProvider::new(MockMode::Uppercase)).await;
        pipeline.orchestrator.cancel();
        let summary = pipeline
            .run_task(&tracker, &io, &io, &langs())
            .await
            .unwrap();

        assert_eq!(summary.skipped, 2);
        assert!(io.reads.lock().unwrap().is_empty());
        assert_eq!(summary.snapshot.pending, 2);
    }

    #[tokio::test]
    async fn test_observer_sees_transitions() {
        let store: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::initialize(store, "book", &infos(&["c1"]))
            .await
            .unwrap();
        let io = MemoryChapters::new(&[("c1", "<p>seen</p>")]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let pipeline = pipeline(MockProvider::new(MockMode::Uppercase))
            .await
            .with_observer(Arc::new(move |chapter: &ChapterInfo, status: ChapterStatus| {
                sink.lock().unwrap().push((chapter.id.clone(), status));
            }));

        pipeline
            .run_task(&tracker, &io, &io, &langs())
            .await
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("c1".to_string(), ChapterStatus::Processing),
                ("c1".to_string(), ChapterStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_file_system_chapters_end_to_end() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let progress = TempDir::new().unwrap();

        std::fs::create_dir_all(input.path().join("text")).unwrap();
        std::fs::write(input.path().join("text/ch1.xhtml"), "<p>hello</p>").unwrap();
        std::fs::write(input.path().join("ch0.HTML"), "<p>intro <code>x</code></p>").unwrap();
        std::fs::write(input.path().join("notes.txt"), "not a chapter").unwrap();

        let files = FileSystemChapters::new(input.path(), output.path());
        let chapters = files.discover().unwrap();
        let ids: Vec<&str> = chapters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["ch0.HTML", "text/ch1.xhtml"]);
        assert_eq!(chapters[1].name, "ch1");

        let store: Arc<dyn ProgressStore> = Arc::new(JsonFileProgressStore::new(progress.path()));
        let tracker = ProgressTracker::initialize(store, "book", &chapters)
            .await
            .unwrap();
        let pipeline = pipeline(MockProvider::new(MockMode::Uppercase)).await;
        let summary = pipeline
            .run_task(&tracker, &files, &files, &langs())
            .await
            .unwrap();
        assert_eq!(summary.completed, 2);

        let written = std::fs::read_to_string(output.path().join("text/ch1.xhtml")).unwrap();
        assert_eq!(written, "<p>HELLO</p>");
        let written = std::fs::read_to_string(output.path().join("ch0.HTML")).unwrap();
        assert_eq!(written, "<p>INTRO <code>x</code></p>");
    }

    #[tokio::test]
    async fn test_single_file_input() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let file = input.path().join("only.html");
        std::fs::write(&file, "<p>x</p>").unwrap();
        std::fs::write(input.path().join("other.html"), "<p>y</p>").unwrap();

        let files = FileSystemChapters::new(&file, output.path());
        let chapters = files.discover().unwrap();
        assert_eq!(chapters, vec![ChapterInfo::new("only.html", "only")]);
        assert_eq!(files.input_path(&chapters[0]), file);

        let missing = FileSystemChapters::new(input.path().join("nope"), output.path());
        assert!(matches!(
            missing.discover(),
            Err(TranslationError::FileError { .. })
        ));
    }
}
