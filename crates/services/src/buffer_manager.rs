use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use review_core::Clock;
use review_core::model::{BufferConfig, BufferEntry, Fingerprint, UserId};
use storage::repository::{BufferRepository, MaterialRepository};

use crate::ai::IllustrationRequest;
use crate::dedup::Deduplicator;
use crate::error::BufferError;
use crate::image_queue::ImageGenerationQueue;
use crate::interleave::interleave_by_origin;

/// What a refill pass accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillReport {
    /// New entries appended toward the target.
    pub appended: usize,
    /// Previously unready entries whose illustration was repaired.
    pub repaired: usize,
    /// True when another refill for the same user was already in flight and
    /// this call did nothing.
    pub skipped: bool,
}

impl RefillReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Maintains each user's persisted buffer of pre-generated items toward a
/// target size, refilling in the background.
///
/// The per-user single-flight refill state lives here as an owned lock map,
/// not as ambient globals: one `BufferManager` owns its refill locks.
#[derive(Clone)]
pub struct BufferManager {
    clock: Clock,
    config: BufferConfig,
    buffers: Arc<dyn BufferRepository>,
    materials: Arc<dyn MaterialRepository>,
    images: Arc<ImageGenerationQueue>,
    refill_gates: Arc<Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl BufferManager {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: BufferConfig,
        buffers: Arc<dyn BufferRepository>,
        materials: Arc<dyn MaterialRepository>,
        images: Arc<ImageGenerationQueue>,
    ) -> Self {
        Self {
            clock,
            config,
            buffers,
            materials,
            images,
            refill_gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Current buffer contents. Below the low watermark this also triggers a
    /// background refill without blocking the caller.
    ///
    /// # Errors
    ///
    /// Returns `BufferError::Storage` when the buffer cannot be loaded.
    pub async fn fetch(&self, user: &UserId) -> Result<Vec<BufferEntry>, BufferError> {
        let buffer = self.buffers.load_buffer(user).await?;
        if buffer.len() < self.config.low_watermark() {
            self.trigger_refill(user);
        }
        Ok(buffer)
    }

    /// Remove every entry whose question text is in `texts`, then refill in
    /// the background. Idempotent against already-absent entries.
    ///
    /// # Errors
    ///
    /// Returns `BufferError::Storage` when removal fails.
    pub async fn consume(&self, user: &UserId, texts: &[String]) -> Result<usize, BufferError> {
        let fingerprints: Vec<Fingerprint> = texts.iter().map(|t| Fingerprint::of(t)).collect();
        let removed = self
            .buffers
            .remove_by_fingerprints(user, &fingerprints)
            .await?;
        self.trigger_refill(user);
        Ok(removed)
    }

    /// Load and clear the buffer in one step for a starting session.
    ///
    /// # Errors
    ///
    /// Returns `BufferError::Storage` when the drain fails.
    pub async fn drain(&self, user: &UserId) -> Result<Vec<BufferEntry>, BufferError> {
        Ok(self.buffers.drain_buffer(user).await?)
    }

    /// Kick off a refill on the runtime; the caller never waits for it.
    pub fn trigger_refill(&self, user: &UserId) {
        let manager = self.clone();
        let user = user.clone();
        tokio::spawn(async move {
            if let Err(err) = manager.refill(&user).await {
                warn!(user = %user, error = %err, "background refill failed");
            }
        });
    }

    /// Refill the user's buffer toward the target.
    ///
    /// Guarded by a per-user single-flight lock: a second call while one is in
    /// flight reports `skipped` and does nothing. Every new entry is persisted
    /// individually, so a crash mid-refill leaves a valid, merely under-target
    /// buffer. An empty candidate pool is not an error.
    ///
    /// # Errors
    ///
    /// Returns `BufferError::Storage` when loading candidates or persisting an
    /// entry fails.
    pub async fn refill(&self, user: &UserId) -> Result<RefillReport, BufferError> {
        let gate = self.refill_gate(user);
        let Ok(_guard) = gate.try_lock() else {
            debug!(user = %user, "refill already in flight");
            return Ok(RefillReport::skipped());
        };
        self.run_refill(user).await
    }

    fn refill_gate(&self, user: &UserId) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.refill_gates.lock().expect("refill gate map poisoned");
        Arc::clone(gates.entry(user.clone()).or_default())
    }

    async fn run_refill(&self, user: &UserId) -> Result<RefillReport, BufferError> {
        let mut buffer = self.buffers.load_buffer(user).await?;
        let mut report = RefillReport::default();

        // Opportunistic repair: entries buffered without an illustration get
        // one more attempt on each refill.
        for entry in buffer.iter_mut().filter(|entry| !entry.ready) {
            let request = IllustrationRequest::for_question(&entry.question);
            match self.images.enqueue(&request).await {
                Ok(url) => {
                    match self.buffers.mark_ready(user, &entry.fingerprint(), &url).await {
                        Ok(()) => {
                            entry.image_url = Some(url);
                            entry.ready = true;
                            report.repaired += 1;
                        }
                        Err(err) => {
                            warn!(user = %user, error = %err, "failed to persist repaired illustration");
                        }
                    }
                }
                Err(err) => {
                    debug!(user = %user, error = %err, "illustration retry failed, staying unready");
                }
            }
        }

        let needed = self.config.target().saturating_sub(buffer.len());
        if needed == 0 {
            return Ok(report);
        }

        let mut dedup = Deduplicator::with_seen(buffer.iter().map(BufferEntry::fingerprint));
        let mut candidates = Vec::new();
        for material in self.materials.list_materials(user).await? {
            candidates.extend(material.questions);
        }
        let candidates = dedup.filter_fresh(candidates);
        let ordered = interleave_by_origin(candidates, |q| q.origin_id());

        for question in ordered.into_iter().take(needed) {
            let request = IllustrationRequest::for_question(&question);
            let image_url = match self.images.enqueue(&request).await {
                Ok(url) => Some(url),
                Err(err) => {
                    debug!(user = %user, error = %err, "illustration failed, buffering unready");
                    None
                }
            };
            let entry = BufferEntry::new(question, image_url, self.clock.now());
            // Persisted one at a time: partial progress survives a crash.
            self.buffers.append_entry(user, &entry).await?;
            report.appended += 1;
        }

        debug!(
            user = %user,
            appended = report.appended,
            repaired = report.repaired,
            "refill complete"
        );
        Ok(report)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
