//! Translation orchestrator: chunking, rate limiting, retry and provider lifecycle

use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{LanguagePair, ProviderProfile, TermEntry};
use crate::core::rate_limiter::RateLimiter;
use crate::processors::tree::{ContentTree, NodeId};
use crate::providers::{ProviderFactory, ProviderRegistry, TranslationProvider};

/// A provider together with the limits that gate its calls
#[derive(Debug)]
pub struct ProviderHandle {
    pub profile: ProviderProfile,
    pub provider: Arc<dyn TranslationProvider>,
    limiter: RateLimiter,
    permits: Semaphore,
}

impl ProviderHandle {
    pub fn new(profile: ProviderProfile, provider: Arc<dyn TranslationProvider>) -> Self {
        let limiter = RateLimiter::new(f64::from(profile.burst), profile.refill_per_second());
        let permits = Semaphore::new(profile.max_concurrent);
        Self {
            profile,
            provider,
            limiter,
            permits,
        }
    }

    pub fn unit_count(&self, text: &str) -> usize {
        self.provider.unit_count(text)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

/// Outcome counts of one `translate_tree` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeReport {
    pub translated: usize,
    pub failed: usize,
    /// Leaves with nothing to translate
    pub skipped: usize,
    pub cancelled: usize,
    /// Provider invocations, retries included
    pub calls: usize,
    pub first_error: Option<String>,
}

impl TreeReport {
    /// Every translatable leaf got a translation
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

/// Whether a leaf is worth a provider call
pub fn is_translatable(text: &str) -> bool {
    text.chars().any(char::is_alphabetic)
}

/// Literal replacement in one left-to-right pass; at each position the first
/// matching entry wins and replaced text is not scanned again
pub fn apply_terminology(text: &str, terms: &[TermEntry]) -> String {
    if terms.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        match terms
            .iter()
            .find(|t| !t.source.is_empty() && rest.starts_with(t.source.as_str()))
        {
            Some(term) => {
                out.push_str(&term.target);
                rest = &rest[term.source.len()..];
            }
            None => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

/// `(leading whitespace, core, trailing whitespace)`
fn split_edges(text: &str) -> (&str, &str, &str) {
    let start = text.len() - text.trim_start().len();
    let end = text.trim_end().len();
    if start >= end {
        return (text, "", "");
    }
    (&text[..start], &text[start..end], &text[end..])
}

const SENTENCE_ENDS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；', '…'];

/// Last safe cut inside `prefix`: after a sentence end, else after whitespace
fn boundary(prefix: &str) -> Option<usize> {
    let mut sentence = None;
    let mut space = None;
    let mut chars = prefix.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let after = idx + c.len_utf8();
        let next = chars.peek().map(|(_, n)| *n);
        if SENTENCE_ENDS.contains(&c) && (next.map_or(true, char::is_whitespace) || !c.is_ascii()) {
            sentence = Some(after);
        }
        if c.is_whitespace() && next.map_or(true, |n| !n.is_whitespace()) {
            space = Some(after);
        }
    }

    sentence.or(space).filter(|&cut| cut > 0)
}

/// Split `text` into contiguous pieces of at most `max_units` each.
///
/// Finds the longest fitting prefix by bisection over char boundaries, then
/// backs off to a sentence end or whitespace inside it when there is one.
pub fn split_oversized(text: &str, max_units: usize, measure: impl Fn(&str) -> usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if measure(rest) <= max_units {
            pieces.push(rest.to_string());
            break;
        }

        let ends: Vec<usize> = rest
            .char_indices()
            .map(|(idx, c)| idx + c.len_utf8())
            .collect();
        let fitting = ends.partition_point(|&end| measure(&rest[..end]) <= max_units);
        // A single char over the limit still has to go somewhere
        let fit = ends[fitting.saturating_sub(1)];
        let cut = boundary(&rest[..fit]).unwrap_or(fit);

        pieces.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    pieces
}

#[derive(Debug, Clone)]
struct Segment {
    leaf: NodeId,
    lead: String,
    core: String,
    trail: String,
    units: usize,
}

impl Segment {
    fn wrap(&self, translated: &str) -> String {
        format!("{}{}{}", self.lead, translated.trim(), self.trail)
    }
}

#[derive(Debug)]
enum Chunk {
    /// Leaves joined by the separator into one call
    Batch(Vec<Segment>),
    /// One leaf too large for a call, cut into pieces
    Split { segment: Segment, pieces: Vec<String> },
}

#[derive(Debug)]
enum LeafResult {
    Translated(String),
    Failed(String),
    Cancelled,
}

impl LeafResult {
    fn from_error(err: &TranslationError) -> Self {
        match err {
            TranslationError::Cancelled => LeafResult::Cancelled,
            other => LeafResult::Failed(other.to_string()),
        }
    }
}

fn plan_chunks(
    segments: Vec<Segment>,
    profile: &ProviderProfile,
    measure: impl Fn(&str) -> usize,
) -> Vec<Chunk> {
    let max = profile.max_units_per_call;
    let separator_units = measure(&profile.segment_separator);
    let mut chunks = Vec::new();
    let mut current: Vec<Segment> = Vec::new();
    let mut current_units = 0;

    for segment in segments {
        if segment.units > max {
            if !current.is_empty() {
                chunks.push(Chunk::Batch(std::mem::take(&mut current)));
            }
            let pieces = split_oversized(&segment.core, max, &measure);
            chunks.push(Chunk::Split { segment, pieces });
            continue;
        }

        let joined = current_units + separator_units + segment.units;
        if !current.is_empty() && (!profile.batching || joined > max) {
            chunks.push(Chunk::Batch(std::mem::take(&mut current)));
        }

        current_units = if current.is_empty() {
            segment.units
        } else {
            current_units + separator_units + segment.units
        };
        current.push(segment);
    }

    if !current.is_empty() {
        chunks.push(Chunk::Batch(current));
    }
    chunks
}

/// Split a batched response back into `expected` segments
fn split_response(response: &str, separator: &str, expected: usize) -> Option<Vec<String>> {
    if expected == 1 {
        return Some(vec![response.trim().to_string()]);
    }
    let marker = match separator.trim() {
        "" => separator,
        trimmed => trimmed,
    };
    let parts: Vec<String> = response
        .split(marker)
        .map(|part| part.trim().to_string())
        .collect();
    (parts.len() == expected).then_some(parts)
}

/// Drives leaf translation for every registered provider.
///
/// Built once at startup and shared by reference; owns each provider's
/// rate limiter and in-flight cap.
#[derive(Debug)]
pub struct TranslationOrchestrator {
    handles: RwLock<HashMap<String, Arc<ProviderHandle>>>,
    default_provider: Option<String>,
    cancel: CancellationToken,
}

impl Default for TranslationOrchestrator {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl TranslationOrchestrator {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            default_provider: None,
            cancel,
        }
    }

    pub fn with_default_provider(mut self, id: impl Into<String>) -> Self {
        self.default_provider = Some(id.into());
        self
    }

    /// Build from a registry; entries that fail to resolve are returned alongside
    pub async fn from_registry(
        registry: &ProviderRegistry,
        factory: &ProviderFactory,
        cancel: CancellationToken,
    ) -> Result<(Self, Vec<(String, TranslationError)>)> {
        let (built, failed) = registry.build_all(factory);
        let mut orchestrator = Self::new(cancel);
        orchestrator.default_provider = registry.default_provider.clone();

        for (profile, provider) in built {
            orchestrator.register(profile, provider).await?;
        }
        Ok((orchestrator, failed))
    }

    pub async fn register(
        &self,
        profile: ProviderProfile,
        provider: Arc<dyn TranslationProvider>,
    ) -> Result<()> {
        if provider.unit_type() != profile.unit_type {
            return Err(TranslationError::config(format!(
                "provider {} counts {} but its profile limits {}",
                profile.id,
                provider.unit_type(),
                profile.unit_type
            )));
        }
        let id = profile.id.clone();
        self.handles
            .write()
            .await
            .insert(id, Arc::new(ProviderHandle::new(profile, provider)));
        Ok(())
    }

    pub async fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handle for `id`, or for the default provider when `id` is `None`
    pub async fn handle(&self, id: Option<&str>) -> Result<Arc<ProviderHandle>> {
        let handles = self.handles.read().await;
        let id = match id.or(self.default_provider.as_deref()) {
            Some(id) => id.to_string(),
            None if handles.len() == 1 => handles.keys().next().cloned().unwrap_or_default(),
            None => {
                return Err(TranslationError::config(
                    "no provider given and no default provider configured",
                ))
            }
        };
        handles
            .get(&id)
            .cloned()
            .ok_or_else(|| TranslationError::config(format!("provider not available: {id}")))
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop issuing new calls; calls already running finish normally
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Initialize every provider, dropping those that fail.
    ///
    /// Returns the dropped providers; errors only when none is left.
    pub async fn start(&self) -> Result<Vec<(String, TranslationError)>> {
        let handles: Vec<(String, Arc<ProviderHandle>)> = self
            .handles
            .read()
            .await
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect();

        let results = join_all(handles.iter().map(|(id, handle)| async move {
            (id.clone(), handle.provider.initialize().await)
        }))
        .await;

        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => info!("Provider {} ready", id),
                Err(e) => {
                    warn!("Provider {} disabled: {}", id, e);
                    failed.push((id, e));
                }
            }
        }

        let mut handles = self.handles.write().await;
        for (id, _) in &failed {
            handles.remove(id);
        }
        if handles.is_empty() {
            return Err(TranslationError::config("no usable translation provider"));
        }
        Ok(failed)
    }

    /// Release every provider's resources
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<ProviderHandle>> =
            self.handles.read().await.values().cloned().collect();
        join_all(handles.iter().map(|h| h.provider.cleanup())).await;
        debug!("Released {} providers", handles.len());
    }

    /// Run `f` between `start` and `shutdown`; shutdown happens on every return path
    pub async fn scoped<F, Fut, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Err(e) = self.start().await {
            self.shutdown().await;
            return Err(e);
        }
        let result = f(Arc::clone(self)).await;
        self.shutdown().await;
        result
    }

    /// Translate every leaf of `tree` in place.
    ///
    /// Chunk failures are recorded on their leaves and counted in the report;
    /// only a missing provider fails the whole call.
    pub async fn translate_tree(
        &self,
        tree: &mut ContentTree,
        provider_id: Option<&str>,
        langs: &LanguagePair,
    ) -> Result<TreeReport> {
        let handle = self.handle(provider_id).await?;
        let mut report = TreeReport::default();

        let mut segments = Vec::new();
        for leaf in tree.leaves() {
            let text = tree.node(leaf)?.text().unwrap_or_default().to_string();
            if !is_translatable(&text) {
                report.skipped += 1;
                continue;
            }
            let (lead, core, trail) = split_edges(&text);
            let core = apply_terminology(core, &handle.profile.terminology);
            segments.push(Segment {
                leaf,
                lead: lead.to_string(),
                units: handle.unit_count(&core),
                core,
                trail: trail.to_string(),
            });
        }

        if segments.is_empty() {
            return Ok(report);
        }

        let chunks = plan_chunks(segments, &handle.profile, |t| handle.unit_count(t));
        debug!(
            "Dispatching {} chunks to {} ({} leaves skipped)",
            chunks.len(),
            handle.profile.id,
            report.skipped
        );

        let calls = AtomicUsize::new(0);
        let outcomes = join_all(
            chunks
                .iter()
                .map(|chunk| self.run_chunk(&handle, chunk, langs, &calls)),
        )
        .await;
        report.calls = calls.load(Ordering::SeqCst);

        for (leaf, result) in outcomes.into_iter().flatten() {
            match result {
                LeafResult::Translated(text) => {
                    tree.set_translation(leaf, text);
                    report.translated += 1;
                }
                LeafResult::Failed(reason) => {
                    report.first_error.get_or_insert_with(|| reason.clone());
                    tree.mark_failed(leaf, reason);
                    report.failed += 1;
                }
                LeafResult::Cancelled => {
                    tree.mark_failed(leaf, "cancelled");
                    report.cancelled += 1;
                }
            }
        }

        info!(
            "Tree translated via {}: {} translated, {} failed, {} skipped, {} cancelled, {} calls",
            handle.profile.id,
            report.translated,
            report.failed,
            report.skipped,
            report.cancelled,
            report.calls
        );
        Ok(report)
    }

    async fn run_chunk(
        &self,
        handle: &ProviderHandle,
        chunk: &Chunk,
        langs: &LanguagePair,
        calls: &AtomicUsize,
    ) -> Vec<(NodeId, LeafResult)> {
        match chunk {
            Chunk::Batch(segments) => {
                let separator = &handle.profile.segment_separator;
                let joined = segments
                    .iter()
                    .map(|s| s.core.as_str())
                    .collect::<Vec<_>>()
                    .join(separator);

                match self.call(handle, &joined, langs, calls).await {
                    Ok(response) => match split_response(&response, separator, segments.len()) {
                        Some(parts) => segments
                            .iter()
                            .zip(parts)
                            .map(|(s, part)| (s.leaf, LeafResult::Translated(s.wrap(&part))))
                            .collect(),
                        None => {
                            warn!(
                                "{} returned a batch with the wrong segment count, retrying {} leaves one by one",
                                handle.profile.id,
                                segments.len()
                            );
                            self.run_individually(handle, segments, langs, calls).await
                        }
                    },
                    Err(e) => segments
                        .iter()
                        .map(|s| (s.leaf, LeafResult::from_error(&e)))
                        .collect(),
                }
            }
            Chunk::Split { segment, pieces } => {
                debug!(
                    "Leaf {} split into {} pieces for {}",
                    segment.leaf.0,
                    pieces.len(),
                    handle.profile.id
                );
                let results = join_all(
                    pieces
                        .iter()
                        .map(|piece| self.translate_piece(handle, piece, langs, calls)),
                )
                .await;

                let mut translated = String::new();
                for result in results {
                    match result {
                        Ok(piece) => translated.push_str(&piece),
                        Err(e) => return vec![(segment.leaf, LeafResult::from_error(&e))],
                    }
                }
                vec![(segment.leaf, LeafResult::Translated(segment.wrap(&translated)))]
            }
        }
    }

    async fn run_individually(
        &self,
        handle: &ProviderHandle,
        segments: &[Segment],
        langs: &LanguagePair,
        calls: &AtomicUsize,
    ) -> Vec<(NodeId, LeafResult)> {
        join_all(segments.iter().map(|s| async move {
            match self.call(handle, &s.core, langs, calls).await {
                Ok(text) => (s.leaf, LeafResult::Translated(s.wrap(&text))),
                Err(e) => (s.leaf, LeafResult::from_error(&e)),
            }
        }))
        .await
    }

    /// Pieces keep their own edge whitespace; untranslatable ones pass through
    async fn translate_piece(
        &self,
        handle: &ProviderHandle,
        piece: &str,
        langs: &LanguagePair,
        calls: &AtomicUsize,
    ) -> Result<String> {
        let (lead, core, trail) = split_edges(piece);
        if !is_translatable(core) {
            return Ok(piece.to_string());
        }
        let translated = self.call(handle, core, langs, calls).await?;
        Ok(format!("{}{}{}", lead, translated.trim(), trail))
    }

    async fn call(
        &self,
        handle: &ProviderHandle,
        text: &str,
        langs: &LanguagePair,
        calls: &AtomicUsize,
    ) -> Result<String> {
        let label = format!("{} call", handle.profile.id);
        handle
            .profile
            .retry_policy
            .run(&label, Some(&self.cancel), |attempt| {
                self.attempt(handle, text, langs, calls, attempt)
            })
            .await
    }

    /// One attempt: in-flight permit, rate token, then the timed provider call
    async fn attempt(
        &self,
        handle: &ProviderHandle,
        text: &str,
        langs: &LanguagePair,
        calls: &AtomicUsize,
        attempt: u32,
    ) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(TranslationError::Cancelled);
        }

        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TranslationError::Cancelled),
            permit = handle.permits.acquire() => permit.map_err(|_| {
                TranslationError::InternalError(format!("{} permits closed", handle.profile.id))
            })?,
        };

        handle.limiter.try_acquire().await?;
        calls.fetch_add(1, Ordering::SeqCst);
        debug!(
            provider = %handle.profile.id,
            attempt,
            units = handle.unit_count(text),
            "Sending translation request"
        );

        match tokio::time::timeout(handle.profile.timeout, handle.provider.translate(text, langs))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "{} call timed out after {:?}",
                    handle.profile.id, handle.profile.timeout
                );
                Err(TranslationError::TimeoutError {
                    elapsed: handle.profile.timeout,
                })
            }
        }
    }
}
