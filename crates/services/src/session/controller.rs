use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use review_core::Clock;
use review_core::model::{
    BufferConfig, BufferEntry, Fingerprint, Question, Session, SessionItem, SessionPhase,
    SolvedSet, UserId,
};
use storage::repository::{MaterialRepository, MirrorRepository, SolvedSetRepository};

use crate::buffer_manager::BufferManager;
use crate::dedup::{Deduplicator, demote_solved};
use crate::error::SessionError;
use crate::interleave::interleave_by_origin;
use crate::spawn_engine::{SpawnEngine, SpawnRequest};

/// Outcome classification for an answer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerEvent {
    /// A multiple-choice answer was submitted.
    Choice { correct: bool },
    /// An open-response item's ideal answer was revealed.
    Revealed,
}

impl AnswerEvent {
    /// Events that grow the session by spawning a related question.
    #[must_use]
    fn rewards_spawn(self) -> bool {
        matches!(self, AnswerEvent::Choice { correct: true } | AnswerEvent::Revealed)
    }
}

/// Drives one endless-scroll session through
/// `Idle → Loading → Active → Exiting`.
///
/// Composes the buffer manager, deduplicator, interleaver, and spawn engine;
/// network-triggered effects are explicit calls on this object rather than
/// callbacks closing over shared state.
pub struct SessionController {
    user: UserId,
    clock: Clock,
    config: BufferConfig,
    session: Session,
    buffer_manager: BufferManager,
    spawn_engine: SpawnEngine,
    materials: Arc<dyn MaterialRepository>,
    mirrors: Arc<dyn MirrorRepository>,
    solved_store: Arc<dyn SolvedSetRepository>,
    solved: SolvedSet,
    /// Illustrations already rendered for items now living in the session,
    /// kept so exit folding does not lose them.
    images: HashMap<Fingerprint, Url>,
    rendered: usize,
}

impl SessionController {
    #[must_use]
    pub fn new(
        user: UserId,
        clock: Clock,
        config: BufferConfig,
        buffer_manager: BufferManager,
        spawn_engine: SpawnEngine,
        materials: Arc<dyn MaterialRepository>,
        mirrors: Arc<dyn MirrorRepository>,
        solved_store: Arc<dyn SolvedSetRepository>,
    ) -> Self {
        Self {
            user,
            clock,
            config,
            session: Session::new(),
            buffer_manager,
            spawn_engine,
            materials,
            mirrors,
            solved_store,
            solved: SolvedSet::new(),
            images: HashMap::new(),
            rendered: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Items currently exposed to the renderer.
    #[must_use]
    pub fn visible(&self) -> &[SessionItem] {
        &self.session.items()[..self.rendered]
    }

    /// Start the session: drain the server buffer, combine it with the local
    /// mirror and fresh material pools, deduplicate, interleave, demote solved
    /// items to the back, and expose the first render batch.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` on phase violations or storage failures while
    /// assembling the sequence.
    pub async fn start(&mut self) -> Result<&[SessionItem], SessionError> {
        self.session.transition(SessionPhase::Loading)?;

        // Drain once: a second concurrent session must not double-consume
        // these entries.
        let server = self.buffer_manager.drain(&self.user).await?;
        let mirror = self.mirrors.load_mirror(&self.user).await?;
        self.solved = self.solved_store.load_solved(&self.user).await?;

        let mut pool: Vec<Question> = Vec::new();
        for entry in server.into_iter().chain(mirror) {
            if let Some(url) = &entry.image_url {
                self.images.insert(entry.fingerprint(), url.clone());
            }
            pool.push(entry.question);
        }

        // The session now owns the mirrored items.
        if let Err(err) = self.mirrors.replace_mirror(&self.user, &[]).await {
            warn!(user = %self.user, error = %err, "failed to clear mirror at session start");
        }

        for material in self.materials.list_materials(&self.user).await? {
            pool.extend(material.questions);
        }

        let mut dedup = Deduplicator::new();
        let pool = dedup.filter_fresh(pool);
        let ordered = interleave_by_origin(pool, |q| q.origin_id());
        let ordered = demote_solved(ordered, &self.solved);

        for question in ordered {
            let solved = self.solved.contains(&question.fingerprint());
            self.session.push_tail(question, solved);
        }

        self.rendered = self.config.render_batch().min(self.session.len());
        self.session.transition(SessionPhase::Active)?;

        // Keep the pipeline warm for whatever comes next.
        self.buffer_manager.trigger_refill(&self.user);

        debug!(user = %self.user, total = self.session.len(), "session active");
        Ok(self.visible())
    }

    /// Expose the next render batch; returns the newly visible items.
    #[must_use]
    pub fn next_batch(&mut self) -> &[SessionItem] {
        let from = self.rendered;
        self.rendered = (self.rendered + self.config.render_batch()).min(self.session.len());
        &self.session.items()[from..self.rendered]
    }

    /// Advance the read cursor. Near the tail this triggers a background
    /// refill and absorbs whatever the buffer already holds; rendering never
    /// blocks on new content.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` when absorbing buffered content fails.
    pub async fn advance(&mut self) -> Result<Option<&SessionItem>, SessionError> {
        self.session.advance();
        if self.session.remaining() <= self.config.lookahead() {
            self.buffer_manager.trigger_refill(&self.user);
            self.absorb_available().await?;
        }
        Ok(self.session.current())
    }

    /// Append buffered entries not yet in the session, consuming them from
    /// the server buffer so they are not served twice.
    async fn absorb_available(&mut self) -> Result<usize, SessionError> {
        let entries = self.buffer_manager.fetch(&self.user).await?;
        let mut absorbed = Vec::new();

        for entry in entries {
            let fingerprint = entry.fingerprint();
            if let Some(url) = &entry.image_url {
                self.images.insert(fingerprint.clone(), url.clone());
            }
            let solved = self.solved.contains(&fingerprint);
            if self.session.push_tail(entry.question, solved) {
                absorbed.push(fingerprint.as_str().to_owned());
            }
        }

        if !absorbed.is_empty() {
            debug!(user = %self.user, count = absorbed.len(), "absorbed buffered items");
            if let Err(err) = self.buffer_manager.consume(&self.user, &absorbed).await {
                warn!(user = %self.user, error = %err, "failed to consume absorbed entries");
            }
        }
        Ok(absorbed.len())
    }

    /// Record an answer for the item at `index`.
    ///
    /// A correct multiple-choice answer or an open-response reveal marks the
    /// fingerprint solved and spawns one related question: reveals splice it
    /// right after the current item to reward immediate follow-up, correct
    /// choices append it to the tail to preserve diversity. Returns true when
    /// a spawned question was placed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` for out-of-range indices or storage failures
    /// while reading the origin material.
    pub async fn record_answer(
        &mut self,
        index: usize,
        event: AnswerEvent,
    ) -> Result<bool, SessionError> {
        let item = self.session.mark_answered(index)?;
        let question = item.question.clone();

        if !event.rewards_spawn() {
            return Ok(false);
        }

        let fingerprint = question.fingerprint();
        self.solved.insert(fingerprint.clone());
        if let Err(err) = self.solved_store.add_solved(&self.user, &fingerprint).await {
            warn!(user = %self.user, error = %err, "failed to persist solved fingerprint");
        }

        let request = SpawnRequest {
            user: self.user.clone(),
            seed_text: question.text().to_owned(),
            response_type: question.response_type(),
            origin_id: question.origin_id().clone(),
            context: None,
        };
        let outcome = match self.spawn_engine.spawn(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                // Mid-quiz, a failed spawn is an absence of new content.
                warn!(user = %self.user, error = %err, "spawn failed");
                return Ok(false);
            }
        };
        let Some(spawned) = outcome.questions.into_iter().next() else {
            return Ok(false);
        };

        let placed = match event {
            AnswerEvent::Revealed => {
                let placed = self.session.splice_after_cursor(spawned);
                if placed && self.session.cursor() + 1 <= self.rendered {
                    // The splice landed inside the visible window.
                    self.rendered += 1;
                }
                placed
            }
            AnswerEvent::Choice { .. } => self.session.push_tail(spawned, false),
        };
        Ok(placed)
    }

    /// Exit the session, folding unanswered items back into the durable
    /// mirror (unanswered-first, bounded) for the next session start.
    /// In-flight spawn and image work is left to finish in the background.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` on phase violations or when the mirror cannot
    /// be replaced.
    pub async fn exit(mut self) -> Result<usize, SessionError> {
        self.session.transition(SessionPhase::Exiting)?;

        let now = self.clock.now();
        let mut entries: Vec<BufferEntry> = self
            .session
            .unanswered()
            .into_iter()
            .map(|question| {
                let image_url = self.images.get(&question.fingerprint()).cloned();
                BufferEntry::new(question, image_url, now)
            })
            .collect();
        entries.truncate(self.config.mirror_cap());

        self.mirrors.replace_mirror(&self.user, &entries).await?;
        debug!(user = %self.user, folded = entries.len(), "session exited");
        Ok(entries.len())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    use review_core::model::{Material, MaterialId, Origin, QuestionDraft, ResponseType};
    use review_core::time::{fixed_clock, fixed_now};
    use storage::repository::{BufferRepository, InMemoryRepository, SolvedSetRepository};

    use crate::ai::{
        GenerationRequest, GenerationResponse, ImageRenderer, IllustrationRequest, QuestionGenerator,
        RenderedImage,
    };
    use crate::error::{GenerationError, ImageError};
    use crate::image_queue::ImageGenerationQueue;

    struct EchoRenderer;

    #[async_trait]
    impl ImageRenderer for EchoRenderer {
        async fn render(&self, request: &IllustrationRequest) -> Result<RenderedImage, ImageError> {
            let digest = &request.cache_key()[..16];
            Ok(RenderedImage {
                url: Url::parse(&format!("https://img.example/{digest}.png")).unwrap(),
                byte_len: 4096,
            })
        }
    }

    /// Generator producing a numbered follow-up per call.
    struct FollowUpGenerator {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl QuestionGenerator for FollowUpGenerator {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            let draft = match request.response_type {
                ResponseType::MultipleChoice => QuestionDraft::multiple_choice(
                    format!("Follow-up {}", *calls),
                    vec!["a".into(), "b".into()],
                    0,
                ),
                ResponseType::OpenResponse => {
                    QuestionDraft::open_response(format!("Follow-up {}", *calls), "A")
                }
            };
            Ok(GenerationResponse {
                questions: vec![draft],
                ..GenerationResponse::default()
            })
        }
    }

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    fn build_question(text: &str, material: &str, response_type: ResponseType) -> Question {
        let origin = Origin::new(MaterialId::new(material).unwrap(), "Notes");
        let draft = match response_type {
            ResponseType::MultipleChoice => {
                QuestionDraft::multiple_choice(text, vec!["a".into(), "b".into()], 0)
            }
            ResponseType::OpenResponse => QuestionDraft::open_response(text, "A"),
        };
        draft.validate(origin, fixed_now()).unwrap()
    }

    async fn seed_materials(repo: &InMemoryRepository, per_origin: usize, origins: &[&str]) {
        for origin in origins {
            let mut material = Material::new(MaterialId::new(*origin).unwrap(), "Notes", "en");
            for i in 0..per_origin {
                material.questions.push(build_question(
                    &format!("{origin} question {i}"),
                    origin,
                    ResponseType::OpenResponse,
                ));
            }
            repo.upsert_material(&user(), &material).await.unwrap();
        }
    }

    fn build_controller(repo: &InMemoryRepository) -> SessionController {
        let config = BufferConfig::default();
        let images = Arc::new(
            ImageGenerationQueue::new(
                Arc::new(EchoRenderer),
                Arc::new(repo.clone()),
                fixed_clock(),
                2,
            )
            .with_smoothing(Duration::ZERO),
        );
        let buffer_manager = BufferManager::new(
            fixed_clock(),
            config.clone(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            images,
        );
        let spawn_engine = SpawnEngine::new(
            fixed_clock(),
            config.clone(),
            Arc::new(FollowUpGenerator {
                calls: Mutex::new(0),
            }),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        );
        SessionController::new(
            user(),
            fixed_clock(),
            config,
            buffer_manager,
            spawn_engine,
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    #[tokio::test]
    async fn start_builds_deduplicated_diverse_sequence() {
        let repo = InMemoryRepository::new();
        seed_materials(&repo, 4, &["m1", "m2"]).await;
        let mut controller = build_controller(&repo);

        assert_eq!(controller.phase(), SessionPhase::Idle);
        let first_batch = controller.start().await.unwrap();
        assert_eq!(first_batch.len(), 8);
        assert_eq!(controller.phase(), SessionPhase::Active);

        // Adjacent items alternate origins: equal group sizes never force a repeat.
        for pair in controller.session().items().windows(2) {
            assert_ne!(pair[0].question.origin_id(), pair[1].question.origin_id());
        }
    }

    #[tokio::test]
    async fn start_places_solved_items_last() {
        let repo = InMemoryRepository::new();
        seed_materials(&repo, 3, &["m1"]).await;
        repo.add_solved(&user(), &Fingerprint::of("m1 question 0"))
            .await
            .unwrap();
        let mut controller = build_controller(&repo);

        controller.start().await.unwrap();
        let items = controller.session().items();
        assert_eq!(items.last().unwrap().question.text(), "m1 question 0");
        assert!(items.last().unwrap().solved);
        assert!(items[..items.len() - 1].iter().all(|item| !item.solved));
    }

    #[tokio::test]
    async fn start_drains_server_buffer_and_clears_mirror() {
        let repo = InMemoryRepository::new();
        let entry = BufferEntry::new(
            build_question("Buffered Q", "m9", ResponseType::OpenResponse),
            Some(Url::parse("https://img.example/buffered.png").unwrap()),
            fixed_now(),
        );
        repo.append_entry(&user(), &entry).await.unwrap();
        repo.replace_mirror(
            &user(),
            &[BufferEntry::new(
                build_question("Mirrored Q", "m8", ResponseType::OpenResponse),
                None,
                fixed_now(),
            )],
        )
        .await
        .unwrap();

        let mut controller = build_controller(&repo);
        controller.start().await.unwrap();

        let texts: Vec<_> = controller
            .session()
            .items()
            .iter()
            .map(|item| item.question.text().to_owned())
            .collect();
        assert!(texts.contains(&"Buffered Q".to_owned()));
        assert!(texts.contains(&"Mirrored Q".to_owned()));

        // Both stores are now empty: the session owns the items.
        assert!(repo.load_buffer(&user()).await.unwrap().is_empty());
        assert!(repo.load_mirror(&user()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn correct_choice_appends_follow_up_to_tail() {
        let repo = InMemoryRepository::new();
        let mut material = Material::new(MaterialId::new("m1").unwrap(), "Notes", "en");
        for i in 0..3 {
            material.questions.push(build_question(
                &format!("MC {i}"),
                "m1",
                ResponseType::MultipleChoice,
            ));
        }
        repo.upsert_material(&user(), &material).await.unwrap();

        let mut controller = build_controller(&repo);
        controller.start().await.unwrap();
        let before = controller.session().len();

        let placed = controller
            .record_answer(0, AnswerEvent::Choice { correct: true })
            .await
            .unwrap();
        assert!(placed);
        assert_eq!(controller.session().len(), before + 1);
        assert_eq!(
            controller.session().items().last().unwrap().question.text(),
            "Follow-up 1"
        );
        assert!(
            controller
                .session()
                .items()
                .last()
                .unwrap()
                .question
                .spawned()
        );
    }

    #[tokio::test]
    async fn reveal_splices_follow_up_after_current_item() {
        let repo = InMemoryRepository::new();
        seed_materials(&repo, 3, &["m1"]).await;
        let mut controller = build_controller(&repo);
        controller.start().await.unwrap();

        let current = controller.session().cursor();
        let placed = controller
            .record_answer(current, AnswerEvent::Revealed)
            .await
            .unwrap();
        assert!(placed);
        assert_eq!(
            controller.session().items()[current + 1].question.text(),
            "Follow-up 1"
        );
    }

    #[tokio::test]
    async fn incorrect_choice_never_spawns() {
        let repo = InMemoryRepository::new();
        seed_materials(&repo, 2, &["m1"]).await;
        let mut controller = build_controller(&repo);
        controller.start().await.unwrap();
        let before = controller.session().len();

        let placed = controller
            .record_answer(0, AnswerEvent::Choice { correct: false })
            .await
            .unwrap();
        assert!(!placed);
        assert_eq!(controller.session().len(), before);
    }

    #[tokio::test]
    async fn answered_fingerprints_land_in_the_durable_solved_set() {
        let repo = InMemoryRepository::new();
        seed_materials(&repo, 2, &["m1"]).await;
        let mut controller = build_controller(&repo);
        controller.start().await.unwrap();

        let seed_text = controller.session().items()[0].question.text().to_owned();
        controller
            .record_answer(0, AnswerEvent::Revealed)
            .await
            .unwrap();

        let solved = repo.load_solved(&user()).await.unwrap();
        assert!(solved.contains(&Fingerprint::of(&seed_text)));
    }

    #[tokio::test]
    async fn exit_folds_unanswered_into_mirror_bounded() {
        let repo = InMemoryRepository::new();
        seed_materials(&repo, 4, &["m1"]).await;
        let mut controller = build_controller(&repo);
        controller.start().await.unwrap();

        let answered_text = controller.session().items()[0].question.text().to_owned();
        controller
            .record_answer(0, AnswerEvent::Choice { correct: false })
            .await
            .unwrap();

        let folded = controller.exit().await.unwrap();
        assert_eq!(folded, 3);

        let mirror = repo.load_mirror(&user()).await.unwrap();
        assert_eq!(mirror.len(), 3);
        assert!(
            mirror
                .iter()
                .all(|entry| entry.question.text() != answered_text)
        );
    }

    #[tokio::test]
    async fn exit_is_terminal() {
        let repo = InMemoryRepository::new();
        seed_materials(&repo, 1, &["m1"]).await;
        let mut controller = build_controller(&repo);
        controller.start().await.unwrap();
        controller.exit().await.unwrap();
    }
}
