use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use review_core::model::{
    Answer, BufferEntry, Fingerprint, Material, MaterialId, Question, QuestionId, ResponseType,
    SolvedSet, UserId,
};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Persisted shape for a question.
///
/// Mirrors the domain `Question` so repositories can serialize/deserialize
/// without leaking storage concerns into the domain layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: Uuid,
    pub text: String,
    pub response_type: String,
    pub options: Vec<String>,
    pub answer: Answer,
    pub explanation: String,
    pub illustration_prompt: String,
    pub language: String,
    pub origin_id: String,
    pub origin_title: String,
    pub liked: bool,
    pub spawned: bool,
    pub spawned_from: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QuestionRecord {
    #[must_use]
    pub fn from_question(question: &Question) -> Self {
        Self {
            id: question.id().as_uuid(),
            text: question.text().to_owned(),
            response_type: question.response_type().as_str().to_owned(),
            options: question.options().to_vec(),
            answer: question.answer().clone(),
            explanation: question.explanation().to_owned(),
            illustration_prompt: question.illustration_prompt().to_owned(),
            language: question.language().to_owned(),
            origin_id: question.origin_id().as_str().to_owned(),
            origin_title: question.origin_title().to_owned(),
            liked: question.liked(),
            spawned: question.spawned(),
            spawned_from: question.spawned_from().map(str::to_owned),
            created_at: question.created_at(),
        }
    }

    /// Convert the record back into a domain `Question`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` when the response type or origin
    /// id is invalid, or the lineage invariant is broken.
    pub fn into_question(self) -> Result<Question, StorageError> {
        let response_type = ResponseType::from_str_opt(&self.response_type).ok_or_else(|| {
            StorageError::Serialization(format!("invalid response type: {}", self.response_type))
        })?;
        let origin_id = MaterialId::new(self.origin_id)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        Question::from_persisted(
            QuestionId::from_uuid(self.id),
            self.text,
            response_type,
            self.options,
            self.answer,
            self.explanation,
            self.illustration_prompt,
            self.language,
            origin_id,
            self.origin_title,
            self.liked,
            self.spawned,
            self.spawned_from,
            self.created_at,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Persisted shape for a buffer (or mirror) entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferEntryRecord {
    pub question: QuestionRecord,
    pub image_url: Option<String>,
    pub ready: bool,
    pub origin_id: String,
    pub created_at: DateTime<Utc>,
}

impl BufferEntryRecord {
    #[must_use]
    pub fn from_entry(entry: &BufferEntry) -> Self {
        Self {
            question: QuestionRecord::from_question(&entry.question),
            image_url: entry.image_url.as_ref().map(Url::to_string),
            ready: entry.ready,
            origin_id: entry.origin_id.as_str().to_owned(),
            created_at: entry.created_at,
        }
    }

    /// True when the entry lacks origin attribution and must not be served.
    #[must_use]
    pub fn is_orphaned(&self) -> bool {
        self.origin_id.trim().is_empty() || self.question.origin_title.trim().is_empty()
    }

    /// Convert the record back into a domain `BufferEntry`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` for invalid URLs or question rows.
    pub fn into_entry(self) -> Result<BufferEntry, StorageError> {
        let image_url = self
            .image_url
            .map(|raw| Url::parse(&raw))
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let origin_id = MaterialId::new(self.origin_id)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(BufferEntry {
            question: self.question.into_question()?,
            image_url,
            ready: self.ready,
            origin_id,
            created_at: self.created_at,
        })
    }
}

/// A cached illustration keyed by a content hash of its request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedImage {
    pub url: Url,
    pub byte_len: u64,
    pub created_at: DateTime<Utc>,
}

//
// ─── REPOSITORY CONTRACTS ──────────────────────────────────────────────────────
//

/// Per-user persisted buffer of pre-generated quiz items.
#[async_trait]
pub trait BufferRepository: Send + Sync {
    /// Load the buffer in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn load_buffer(&self, user: &UserId) -> Result<Vec<BufferEntry>, StorageError>;

    /// Append a single entry. Entries are persisted one at a time during
    /// refill so partial progress survives a crash. Appending a fingerprint
    /// already in the buffer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn append_entry(&self, user: &UserId, entry: &BufferEntry) -> Result<(), StorageError>;

    /// Remove all entries matching the given fingerprints. Idempotent against
    /// already-absent entries; returns the number actually removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn remove_by_fingerprints(
        &self,
        user: &UserId,
        fingerprints: &[Fingerprint],
    ) -> Result<usize, StorageError>;

    /// Attach an illustration to an existing entry and flip it ready.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` when no entry matches.
    async fn mark_ready(
        &self,
        user: &UserId,
        fingerprint: &Fingerprint,
        image_url: &Url,
    ) -> Result<(), StorageError>;

    /// Load and clear the buffer in one step. Session start drains the buffer
    /// exactly once so a second concurrent session cannot double-consume it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn drain_buffer(&self, user: &UserId) -> Result<Vec<BufferEntry>, StorageError>;
}

/// Source materials and their nested, append-only question lists.
#[async_trait]
pub trait MaterialRepository: Send + Sync {
    /// List all materials owned by the user, questions included.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn list_materials(&self, user: &UserId) -> Result<Vec<Material>, StorageError>;

    /// Fetch one material by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn get_material(&self, id: &MaterialId) -> Result<Option<Material>, StorageError>;

    /// Persist or update a material and its question list.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn upsert_material(&self, user: &UserId, material: &Material)
    -> Result<(), StorageError>;

    /// Append one question to the material's permanent question list without
    /// rewriting unrelated fields.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` when the material does not exist.
    async fn append_question(
        &self,
        id: &MaterialId,
        question: &Question,
    ) -> Result<(), StorageError>;
}

/// Durable solved-fingerprint set, add-only.
#[async_trait]
pub trait SolvedSetRepository: Send + Sync {
    /// Load the user's solved set.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn load_solved(&self, user: &UserId) -> Result<SolvedSet, StorageError>;

    /// Record a fingerprint as solved. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn add_solved(&self, user: &UserId, fingerprint: &Fingerprint)
    -> Result<(), StorageError>;
}

/// Durable client-side buffer mirror, replaced wholesale at session exit.
#[async_trait]
pub trait MirrorRepository: Send + Sync {
    /// Load the mirror. Entries lacking origin attribution are pruned here
    /// rather than served as orphaned content.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn load_mirror(&self, user: &UserId) -> Result<Vec<BufferEntry>, StorageError>;

    /// Replace the mirror with the given entries.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn replace_mirror(
        &self,
        user: &UserId,
        entries: &[BufferEntry],
    ) -> Result<(), StorageError>;
}

/// Persisted illustration cache keyed by request-parameter content hash.
#[async_trait]
pub trait ImageCacheRepository: Send + Sync {
    /// Look up a cached render.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn get_image(&self, key: &str) -> Result<Option<CachedImage>, StorageError>;

    /// Store a successful render.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn put_image(&self, key: &str, image: &CachedImage) -> Result<(), StorageError>;

    /// Drop a cached render (e.g. one detected as corrupt).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn delete_image(&self, key: &str) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY IMPLEMENTATION ──────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
struct StoredMaterial {
    owner: UserId,
    material: Material,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    buffers: Arc<Mutex<HashMap<UserId, Vec<BufferEntry>>>>,
    materials: Arc<Mutex<HashMap<MaterialId, StoredMaterial>>>,
    solved: Arc<Mutex<HashMap<UserId, SolvedSet>>>,
    mirrors: Arc<Mutex<HashMap<UserId, Vec<BufferEntryRecord>>>>,
    images: Arc<Mutex<HashMap<String, CachedImage>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>, StorageError> {
        mutex
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl BufferRepository for InMemoryRepository {
    async fn load_buffer(&self, user: &UserId) -> Result<Vec<BufferEntry>, StorageError> {
        let guard = Self::lock(&self.buffers)?;
        Ok(guard.get(user).cloned().unwrap_or_default())
    }

    async fn append_entry(&self, user: &UserId, entry: &BufferEntry) -> Result<(), StorageError> {
        let mut guard = Self::lock(&self.buffers)?;
        let buffer = guard.entry(user.clone()).or_default();
        let fp = entry.fingerprint();
        if buffer.iter().any(|e| e.fingerprint() == fp) {
            return Ok(());
        }
        buffer.push(entry.clone());
        Ok(())
    }

    async fn remove_by_fingerprints(
        &self,
        user: &UserId,
        fingerprints: &[Fingerprint],
    ) -> Result<usize, StorageError> {
        let mut guard = Self::lock(&self.buffers)?;
        let Some(buffer) = guard.get_mut(user) else {
            return Ok(0);
        };
        let before = buffer.len();
        buffer.retain(|entry| !fingerprints.contains(&entry.fingerprint()));
        Ok(before - buffer.len())
    }

    async fn mark_ready(
        &self,
        user: &UserId,
        fingerprint: &Fingerprint,
        image_url: &Url,
    ) -> Result<(), StorageError> {
        let mut guard = Self::lock(&self.buffers)?;
        let buffer = guard.get_mut(user).ok_or(StorageError::NotFound)?;
        let entry = buffer
            .iter_mut()
            .find(|e| e.fingerprint() == *fingerprint)
            .ok_or(StorageError::NotFound)?;
        entry.image_url = Some(image_url.clone());
        entry.ready = true;
        Ok(())
    }

    async fn drain_buffer(&self, user: &UserId) -> Result<Vec<BufferEntry>, StorageError> {
        let mut guard = Self::lock(&self.buffers)?;
        Ok(guard.remove(user).unwrap_or_default())
    }
}

#[async_trait]
impl MaterialRepository for InMemoryRepository {
    async fn list_materials(&self, user: &UserId) -> Result<Vec<Material>, StorageError> {
        let guard = Self::lock(&self.materials)?;
        let mut materials: Vec<Material> = guard
            .values()
            .filter(|stored| stored.owner == *user)
            .map(|stored| stored.material.clone())
            .collect();
        materials.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(materials)
    }

    async fn get_material(&self, id: &MaterialId) -> Result<Option<Material>, StorageError> {
        let guard = Self::lock(&self.materials)?;
        Ok(guard.get(id).map(|stored| stored.material.clone()))
    }

    async fn upsert_material(
        &self,
        user: &UserId,
        material: &Material,
    ) -> Result<(), StorageError> {
        let mut guard = Self::lock(&self.materials)?;
        guard.insert(
            material.id.clone(),
            StoredMaterial {
                owner: user.clone(),
                material: material.clone(),
            },
        );
        Ok(())
    }

    async fn append_question(
        &self,
        id: &MaterialId,
        question: &Question,
    ) -> Result<(), StorageError> {
        let mut guard = Self::lock(&self.materials)?;
        let stored = guard.get_mut(id).ok_or(StorageError::NotFound)?;
        stored.material.questions.push(question.clone());
        Ok(())
    }
}

#[async_trait]
impl SolvedSetRepository for InMemoryRepository {
    async fn load_solved(&self, user: &UserId) -> Result<SolvedSet, StorageError> {
        let guard = Self::lock(&self.solved)?;
        Ok(guard.get(user).cloned().unwrap_or_default())
    }

    async fn add_solved(
        &self,
        user: &UserId,
        fingerprint: &Fingerprint,
    ) -> Result<(), StorageError> {
        let mut guard = Self::lock(&self.solved)?;
        guard
            .entry(user.clone())
            .or_default()
            .insert(fingerprint.clone());
        Ok(())
    }
}

#[async_trait]
impl MirrorRepository for InMemoryRepository {
    async fn load_mirror(&self, user: &UserId) -> Result<Vec<BufferEntry>, StorageError> {
        let guard = Self::lock(&self.mirrors)?;
        let records = guard.get(user).cloned().unwrap_or_default();
        Ok(prune_orphaned(records))
    }

    async fn replace_mirror(
        &self,
        user: &UserId,
        entries: &[BufferEntry],
    ) -> Result<(), StorageError> {
        let mut guard = Self::lock(&self.mirrors)?;
        guard.insert(
            user.clone(),
            entries.iter().map(BufferEntryRecord::from_entry).collect(),
        );
        Ok(())
    }
}

#[async_trait]
impl ImageCacheRepository for InMemoryRepository {
    async fn get_image(&self, key: &str) -> Result<Option<CachedImage>, StorageError> {
        let guard = Self::lock(&self.images)?;
        Ok(guard.get(key).cloned())
    }

    async fn put_image(&self, key: &str, image: &CachedImage) -> Result<(), StorageError> {
        let mut guard = Self::lock(&self.images)?;
        guard.insert(key.to_owned(), image.clone());
        Ok(())
    }

    async fn delete_image(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = Self::lock(&self.images)?;
        guard.remove(key);
        Ok(())
    }
}

/// Drops mirror records lacking origin attribution or failing conversion,
/// forcing a fresh server refill instead of serving orphaned content.
pub(crate) fn prune_orphaned(records: Vec<BufferEntryRecord>) -> Vec<BufferEntry> {
    records
        .into_iter()
        .filter(|record| !record.is_orphaned())
        .filter_map(|record| record.into_entry().ok())
        .collect()
}

//
// ─── AGGREGATE ─────────────────────────────────────────────────────────────────
//

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub buffers: Arc<dyn BufferRepository>,
    pub materials: Arc<dyn MaterialRepository>,
    pub solved: Arc<dyn SolvedSetRepository>,
    pub mirrors: Arc<dyn MirrorRepository>,
    pub image_cache: Arc<dyn ImageCacheRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            buffers: Arc::new(repo.clone()),
            materials: Arc::new(repo.clone()),
            solved: Arc::new(repo.clone()),
            mirrors: Arc::new(repo.clone()),
            image_cache: Arc::new(repo),
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use review_core::model::{Origin, QuestionDraft};
    use review_core::time::fixed_now;

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    fn build_question(text: &str) -> Question {
        let origin = Origin::new(MaterialId::new("mat-1").unwrap(), "Notes");
        QuestionDraft::open_response(text, "A")
            .validate(origin, fixed_now())
            .unwrap()
    }

    fn build_entry(text: &str) -> BufferEntry {
        BufferEntry::new(build_question(text), None, fixed_now())
    }

    #[tokio::test]
    async fn append_is_idempotent_per_fingerprint() {
        let repo = InMemoryRepository::new();
        repo.append_entry(&user(), &build_entry("Q1")).await.unwrap();
        repo.append_entry(&user(), &build_entry(" Q1 ")).await.unwrap();

        let buffer = repo.load_buffer(&user()).await.unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent_against_absent_entries() {
        let repo = InMemoryRepository::new();
        repo.append_entry(&user(), &build_entry("Q1")).await.unwrap();

        let removed = repo
            .remove_by_fingerprints(&user(), &[Fingerprint::of("Q1"), Fingerprint::of("missing")])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let removed_again = repo
            .remove_by_fingerprints(&user(), &[Fingerprint::of("Q1")])
            .await
            .unwrap();
        assert_eq!(removed_again, 0);
    }

    #[tokio::test]
    async fn drain_empties_the_buffer() {
        let repo = InMemoryRepository::new();
        repo.append_entry(&user(), &build_entry("Q1")).await.unwrap();
        repo.append_entry(&user(), &build_entry("Q2")).await.unwrap();

        let drained = repo.drain_buffer(&user()).await.unwrap();
        assert_eq!(drained.len(), 2);
        assert!(repo.load_buffer(&user()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_ready_attaches_image() {
        let repo = InMemoryRepository::new();
        repo.append_entry(&user(), &build_entry("Q1")).await.unwrap();

        let url = Url::parse("https://img.example/q1.png").unwrap();
        repo.mark_ready(&user(), &Fingerprint::of("Q1"), &url)
            .await
            .unwrap();

        let buffer = repo.load_buffer(&user()).await.unwrap();
        assert!(buffer[0].ready);
        assert_eq!(buffer[0].image_url.as_ref(), Some(&url));
    }

    #[tokio::test]
    async fn append_question_requires_material() {
        let repo = InMemoryRepository::new();
        let err = repo
            .append_question(&MaterialId::new("ghost").unwrap(), &build_question("Q"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn mirror_prunes_orphaned_records() {
        let repo = InMemoryRepository::new();
        let good = build_entry("Q1");
        repo.replace_mirror(&user(), &[good.clone()]).await.unwrap();

        // Inject a record stripped of origin attribution, as legacy mirrors had.
        {
            let mut guard = repo.mirrors.lock().unwrap();
            let records = guard.get_mut(&user()).unwrap();
            let mut orphan = BufferEntryRecord::from_entry(&build_entry("Q2"));
            orphan.question.origin_title = String::new();
            records.push(orphan);
        }

        let loaded = repo.load_mirror(&user()).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].question.text(), "Q1");
    }

    #[tokio::test]
    async fn image_cache_round_trips() {
        let repo = InMemoryRepository::new();
        let image = CachedImage {
            url: Url::parse("https://img.example/a.png").unwrap(),
            byte_len: 2048,
            created_at: fixed_now(),
        };
        repo.put_image("abc123", &image).await.unwrap();
        assert_eq!(repo.get_image("abc123").await.unwrap(), Some(image));

        repo.delete_image("abc123").await.unwrap();
        assert_eq!(repo.get_image("abc123").await.unwrap(), None);
    }

    #[test]
    fn question_record_round_trips() {
        let question = build_question("What is osmosis?");
        let record = QuestionRecord::from_question(&question);
        let back = record.into_question().unwrap();
        assert_eq!(back, question);
    }
}
