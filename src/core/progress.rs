//! Per-chapter progress tracking with pluggable persistence

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{
    ChapterInfo, ChapterProgress, ChapterStatus, ProgressRecord, ProgressSnapshot,
};

/// Durable home of progress records
#[async_trait]
pub trait ProgressStore: Send + Sync + fmt::Debug {
    /// Store `record` unless one exists for its document; return whichever is stored
    async fn create_if_absent(&self, record: ProgressRecord) -> Result<ProgressRecord>;

    async fn load(&self, document_id: &str) -> Result<Option<ProgressRecord>>;

    /// Overwrite one chapter entry of an existing record
    async fn update_chapter(
        &self,
        document_id: &str,
        chapter: ChapterProgress,
    ) -> Result<ProgressRecord>;
}

fn apply_update(
    record: &mut ProgressRecord,
    document_id: &str,
    chapter: ChapterProgress,
) -> Result<()> {
    let chapter_id = chapter.id.clone();
    if !record.apply_chapter(chapter) {
        return Err(TranslationError::UnknownChapter {
            chapter_id: format!("{document_id}/{chapter_id}"),
        });
    }
    Ok(())
}

fn missing_record(document_id: &str) -> TranslationError {
    TranslationError::InternalError(format!("no progress record for document {document_id}"))
}

/// Process-local store, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<String, ProgressRecord>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn create_if_absent(&self, record: ProgressRecord) -> Result<ProgressRecord> {
        let mut records = self.records.lock().await;
        Ok(records
            .entry(record.document_id.clone())
            .or_insert(record)
            .clone())
    }

    async fn load(&self, document_id: &str) -> Result<Option<ProgressRecord>> {
        Ok(self.records.lock().await.get(document_id).cloned())
    }

    async fn update_chapter(
        &self,
        document_id: &str,
        chapter: ChapterProgress,
    ) -> Result<ProgressRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(document_id)
            .ok_or_else(|| missing_record(document_id))?;
        apply_update(record, document_id, chapter)?;
        Ok(record.clone())
    }
}

/// One pretty-printed JSON file per document, replaced atomically on write
#[derive(Debug)]
pub struct JsonFileProgressStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonFileProgressStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `document_id`; bytes outside `[A-Za-z0-9._-]` become `%XX`
    pub fn path_for(&self, document_id: &str) -> PathBuf {
        let mut name = String::with_capacity(document_id.len());
        for byte in document_id.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
                name.push(byte as char);
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{name}.json"))
    }

    async fn lock_for(&self, document_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(document_id.to_string())
            .or_default()
            .clone()
    }

    async fn read(&self, document_id: &str) -> Result<Option<ProgressRecord>> {
        let path = self.path_for(document_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let record: ProgressRecord = serde_json::from_str(&content)?;
                if record.document_id != document_id {
                    return Err(TranslationError::config(format!(
                        "{} holds progress for document {:?}, not {:?}",
                        path.display(),
                        record.document_id,
                        document_id
                    )));
                }
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TranslationError::FileError {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    async fn write(&self, record: &ProgressRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&record.document_id);
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| TranslationError::FileError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        debug!("Saved progress for {} to {}", record.document_id, path.display());
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for JsonFileProgressStore {
    async fn create_if_absent(&self, record: ProgressRecord) -> Result<ProgressRecord> {
        let lock = self.lock_for(&record.document_id).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.read(&record.document_id).await? {
            return Ok(existing);
        }
        self.write(&record).await?;
        Ok(record)
    }

    async fn load(&self, document_id: &str) -> Result<Option<ProgressRecord>> {
        let lock = self.lock_for(document_id).await;
        let _guard = lock.lock().await;
        self.read(document_id).await
    }

    async fn update_chapter(
        &self,
        document_id: &str,
        chapter: ChapterProgress,
    ) -> Result<ProgressRecord> {
        let lock = self.lock_for(document_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .read(document_id)
            .await?
            .ok_or_else(|| missing_record(document_id))?;
        apply_update(&mut record, document_id, chapter)?;
        self.write(&record).await?;
        Ok(record)
    }
}

/// Chapter state machine for one document.
///
/// Each chapter sits behind its own lock, so transitions on different
/// chapters never wait on each other. A transition is written to the store
/// before it becomes visible locally.
#[derive(Debug)]
pub struct ProgressTracker {
    document_id: String,
    order: Vec<String>,
    chapters: HashMap<String, Mutex<ChapterProgress>>,
    store: Arc<dyn ProgressStore>,
}

impl ProgressTracker {
    /// Load the document's record, creating an all-pending one if none exists
    pub async fn initialize(
        store: Arc<dyn ProgressStore>,
        document_id: impl Into<String>,
        chapters: &[ChapterInfo],
    ) -> Result<Self> {
        let document_id = document_id.into();
        let record = store
            .create_if_absent(ProgressRecord::new(document_id.clone(), chapters))
            .await?;

        if record.chapters.len() != chapters.len() {
            warn!(
                "Progress for {} tracks {} chapters, {} supplied; keeping the stored list",
                document_id,
                record.chapters.len(),
                chapters.len()
            );
        }
        info!(
            "Tracking {} chapters for {} ({:.1}% complete)",
            record.chapters.len(),
            document_id,
            record.snapshot().percentage
        );

        Ok(Self {
            document_id,
            order: record.chapters.iter().map(|c| c.id.clone()).collect(),
            chapters: record
                .chapters
                .into_iter()
                .map(|c| (c.id.clone(), Mutex::new(c)))
                .collect(),
            store,
        })
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn chapter_ids(&self) -> &[String] {
        &self.order
    }

    fn slot(&self, chapter_id: &str) -> Result<&Mutex<ChapterProgress>> {
        self.chapters
            .get(chapter_id)
            .ok_or_else(|| TranslationError::UnknownChapter {
                chapter_id: chapter_id.to_string(),
            })
    }

    /// Apply `change` under the chapter's lock; persist only if it changed anything
    async fn transition<F>(&self, chapter_id: &str, change: F) -> Result<ChapterStatus>
    where
        F: FnOnce(&ChapterProgress) -> Option<ChapterProgress>,
    {
        let mut current = self.slot(chapter_id)?.lock().await;
        match change(&*current) {
            Some(next) => {
                self.store
                    .update_chapter(&self.document_id, next.clone())
                    .await?;
                debug!(
                    "Chapter {} of {}: {} -> {}",
                    chapter_id, self.document_id, current.status, next.status
                );
                *current = next;
            }
            None => debug!(
                "Chapter {} of {} already {}, transition skipped",
                chapter_id, self.document_id, current.status
            ),
        }
        Ok(current.status)
    }

    /// Pending or Failed → Processing; no-op when Processing or Completed
    pub async fn mark_processing(&self, chapter_id: &str) -> Result<ChapterStatus> {
        self.transition(chapter_id, |c| match c.status {
            ChapterStatus::Processing | ChapterStatus::Completed => None,
            ChapterStatus::Pending | ChapterStatus::Failed => Some(ChapterProgress {
                status: ChapterStatus::Processing,
                error_detail: None,
                ..c.clone()
            }),
        })
        .await
    }

    pub async fn mark_completed(&self, chapter_id: &str) -> Result<ChapterStatus> {
        self.transition(chapter_id, |c| match c.status {
            ChapterStatus::Completed => None,
            _ => Some(ChapterProgress {
                status: ChapterStatus::Completed,
                completed_at: Some(Utc::now()),
                error_detail: None,
                ..c.clone()
            }),
        })
        .await
    }

    /// Completed chapters are never moved back to Failed
    pub async fn mark_failed(&self, chapter_id: &str, detail: &str) -> Result<ChapterStatus> {
        self.transition(chapter_id, |c| match c.status {
            ChapterStatus::Completed => None,
            ChapterStatus::Failed if c.error_detail.as_deref() == Some(detail) => None,
            _ => Some(ChapterProgress {
                status: ChapterStatus::Failed,
                error_detail: Some(detail.to_string()),
                ..c.clone()
            }),
        })
        .await
    }

    pub async fn chapter(&self, chapter_id: &str) -> Option<ChapterProgress> {
        match self.chapters.get(chapter_id) {
            Some(slot) => Some(slot.lock().await.clone()),
            None => None,
        }
    }

    /// Chapter entries in document order
    pub async fn chapters(&self) -> Vec<ChapterProgress> {
        let mut out = Vec::with_capacity(self.order.len());
        for id in &self.order {
            if let Some(slot) = self.chapters.get(id) {
                out.push(slot.lock().await.clone());
            }
        }
        out
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::from_chapters(&self.chapters().await)
    }

    /// Chapters a resumed run must process: everything not Completed.
    ///
    /// Processing entries are leftovers of an interrupted run.
    pub async fn resumable_chapters(&self) -> Vec<ChapterInfo> {
        self.chapters()
            .await
            .into_iter()
            .filter(|c| c.status != ChapterStatus::Completed)
            .map(|c| ChapterInfo::new(c.id, c.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_include;
    use tokio_test::assert_ok;

    fn chapters() -> Vec<ChapterInfo> {
        vec![
            ChapterInfo::new("c1", "One"),
            ChapterInfo::new("c2", "Two"),
            ChapterInfo::new("c3", "Three"),
            ChapterInfo::new("c4", "Four"),
        ]
    }

    async fn tracker(store: Arc<dyn ProgressStore>) -> ProgressTracker {
        ProgressTracker::initialize(store, "book", &chapters())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
        let first = tracker(store.clone()).await;
        assert_ok!(first.mark_completed("c1").await);

        let second = tracker(store.clone()).await;
        assert_eq!(
            second.chapter("c1").await.unwrap().status,
            ChapterStatus::Completed
        );
        assert_eq!(second.snapshot().await.completed, 1);
    }

    #[tokio::test]
    async fn test_transitions_and_redundant_calls() {
        let store: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
        let tracker = tracker(store.clone()).await;

        assert_eq!(
            tracker.mark_processing("c1").await.unwrap(),
            ChapterStatus::Processing
        );
        assert_eq!(
            tracker.mark_processing("c1").await.unwrap(),
            ChapterStatus::Processing
        );
        assert_eq!(
            tracker.mark_completed("c1").await.unwrap(),
            ChapterStatus::Completed
        );
        let completed_at = tracker.chapter("c1").await.unwrap().completed_at;
        assert!(completed_at.is_some());

        // Completed is terminal for the public mutators
        assert_eq!(
            tracker.mark_failed("c1", "late").await.unwrap(),
            ChapterStatus::Completed
        );
        assert_eq!(
            tracker.mark_processing("c1").await.unwrap(),
            ChapterStatus::Completed
        );
        assert_eq!(tracker.mark_completed("c1").await.unwrap(), ChapterStatus::Completed);
        assert_eq!(tracker.chapter("c1").await.unwrap().completed_at, completed_at);

        tracker.mark_failed("c2", "timeout").await.unwrap();
        let c2 = tracker.chapter("c2").await.unwrap();
        assert_eq!(c2.status, ChapterStatus::Failed);
        assert_eq!(c2.error_detail.as_deref(), Some("timeout"));

        // Failed chapters can be picked up again
        tracker.mark_processing("c2").await.unwrap();
        assert_eq!(tracker.chapter("c2").await.unwrap().error_detail, None);

        let stored = store.load("book").await.unwrap().unwrap();
        assert_eq!(stored.chapter("c1").unwrap().status, ChapterStatus::Completed);
        assert_eq!(stored.chapter("c2").unwrap().status, ChapterStatus::Processing);
    }

    #[tokio::test]
    async fn test_unknown_chapter() {
        let tracker = tracker(Arc::new(MemoryProgressStore::new())).await;
        let err = tracker.mark_processing("nope").await.unwrap_err();
        assert!(matches!(err, TranslationError::UnknownChapter { .. }));
    }

    #[tokio::test]
    async fn test_resume_selects_pending_and_failed() {
        let tracker = tracker(Arc::new(MemoryProgressStore::new())).await;
        tracker.mark_completed("c1").await.unwrap();
        tracker.mark_completed("c2").await.unwrap();
        tracker.mark_failed("c4", "boom").await.unwrap();

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.percentage, 50.0);

        let resumable: Vec<_> = tracker
            .resumable_chapters()
            .await
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(resumable, vec!["c3", "c4"]);
    }

    #[tokio::test]
    async fn test_json_store_persists_across_trackers() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ProgressStore> = Arc::new(JsonFileProgressStore::new(dir.path()));

        let first = tracker(store.clone()).await;
        first.mark_processing("c1").await.unwrap();
        first.mark_completed("c1").await.unwrap();
        first.mark_failed("c3", "parse").await.unwrap();
        drop(first);

        let reopened: Arc<dyn ProgressStore> = Arc::new(JsonFileProgressStore::new(dir.path()));
        let second = tracker(reopened).await;
        let snapshot = second.snapshot().await;
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.pending, 2);

        let raw = std::fs::read_to_string(dir.path().join("book.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_json_include!(
            actual: json,
            expected: serde_json::json!({
                "document_id": "book",
                "status": "processing",
                "chapters": [
                    { "id": "c1", "name": "One", "status": "completed" },
                    { "id": "c2", "name": "Two", "status": "pending", "completed_at": null },
                    { "id": "c3", "status": "failed", "error_detail": "parse" },
                    { "id": "c4", "status": "pending" }
                ]
            })
        );
        assert!(!dir.path().join("book.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_concurrent_updates_on_different_chapters() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ProgressStore> = Arc::new(JsonFileProgressStore::new(dir.path()));
        let tracker = Arc::new(tracker(store.clone()).await);

        let tasks: Vec<_> = ["c1", "c2", "c3", "c4"]
            .into_iter()
            .map(|id| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    tracker.mark_processing(id).await.unwrap();
                    tracker.mark_completed(id).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.load("book").await.unwrap().unwrap();
        assert!(stored.snapshot().is_complete());
        assert_eq!(stored.status, crate::core::models::TaskStatus::Completed);
    }

    #[test]
    fn test_path_encoding() {
        let store = JsonFileProgressStore::new("/tmp/p");
        assert_eq!(store.path_for("book"), PathBuf::from("/tmp/p/book.json"));
        assert_eq!(
            store.path_for("books/war & peace"),
            PathBuf::from("/tmp/p/books%2Fwar%20%26%20peace.json")
        );
        assert_ne!(store.path_for("war & peace"), store.path_for("war___peace"));
        assert_ne!(store.path_for("a%20b"), store.path_for("a b"));
    }

    #[tokio::test]
    async fn test_similar_document_ids_keep_separate_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ProgressStore> = Arc::new(JsonFileProgressStore::new(dir.path()));

        let war = ProgressTracker::initialize(
            store.clone(),
            "war & peace",
            &[ChapterInfo::new("w1", "One")],
        )
        .await
        .unwrap();
        war.mark_completed("w1").await.unwrap();

        let other = ProgressTracker::initialize(
            store.clone(),
            "war___peace",
            &[ChapterInfo::new("b1", "Other")],
        )
        .await
        .unwrap();
        assert_eq!(other.chapter_ids().to_vec(), vec!["b1".to_string()]);
        assert!(other.chapter("w1").await.is_none());
        assert_eq!(other.snapshot().await.completed, 0);

        let stored = store.load("war & peace").await.unwrap().unwrap();
        assert_eq!(stored.chapter("w1").unwrap().status, ChapterStatus::Completed);
    }

    #[tokio::test]
    async fn test_record_for_another_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileProgressStore::new(dir.path());
        let tracker = ProgressTracker::initialize(
            Arc::new(JsonFileProgressStore::new(dir.path())),
            "book",
            &chapters(),
        )
        .await
        .unwrap();
        drop(tracker);

        std::fs::rename(dir.path().join("book.json"), dir.path().join("other.json")).unwrap();

        let err = store.load("other").await.unwrap_err();
        assert!(matches!(err, TranslationError::ConfigError { .. }));
        let err = store
            .update_chapter("other", ChapterProgress::pending(&ChapterInfo::new("c1", "One")))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslationError::ConfigError { .. }));
    }
}
