use std::sync::Arc;

use review_core::Clock;
use review_core::model::{BufferConfig, UserId};
use storage::repository::Storage;

use crate::ai::{HttpImageRenderer, HttpQuestionGenerator, ImageRenderer, QuestionGenerator};
use crate::buffer_manager::BufferManager;
use crate::error::SupplyInitError;
use crate::image_queue::{DEFAULT_IMAGE_CEILING, ImageGenerationQueue};
use crate::session::SessionController;
use crate::spawn_engine::SpawnEngine;
use crate::supply_api::SupplyService;

/// Assembles the supply engine over a storage backend.
#[derive(Clone)]
pub struct SupplyServices {
    clock: Clock,
    config: BufferConfig,
    storage: Storage,
    buffer_manager: BufferManager,
    spawn_engine: SpawnEngine,
    supply: SupplyService,
}

impl SupplyServices {
    /// Wire the engine over explicit storage and collaborator handles.
    #[must_use]
    pub fn new(
        clock: Clock,
        config: BufferConfig,
        storage: Storage,
        generator: Arc<dyn QuestionGenerator>,
        renderer: Arc<dyn ImageRenderer>,
    ) -> Self {
        let images = Arc::new(ImageGenerationQueue::new(
            renderer,
            Arc::clone(&storage.image_cache),
            clock,
            DEFAULT_IMAGE_CEILING,
        ));
        let buffer_manager = BufferManager::new(
            clock,
            config.clone(),
            Arc::clone(&storage.buffers),
            Arc::clone(&storage.materials),
            images,
        );
        let spawn_engine = SpawnEngine::new(
            clock,
            config.clone(),
            generator,
            Arc::clone(&storage.materials),
            Arc::clone(&storage.buffers),
        );
        let supply = SupplyService::new(buffer_manager.clone(), spawn_engine.clone());

        Self {
            clock,
            config,
            storage,
            buffer_manager,
            spawn_engine,
            supply,
        }
    }

    /// Build services backed by `SQLite` storage and the env-configured HTTP
    /// collaborators.
    ///
    /// # Errors
    ///
    /// Returns `SupplyInitError` when storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: BufferConfig,
    ) -> Result<Self, SupplyInitError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(
            clock,
            config,
            storage,
            Arc::new(HttpQuestionGenerator::from_env()),
            Arc::new(HttpImageRenderer::from_env()),
        ))
    }

    #[must_use]
    pub fn supply(&self) -> &SupplyService {
        &self.supply
    }

    #[must_use]
    pub fn buffer_manager(&self) -> &BufferManager {
        &self.buffer_manager
    }

    #[must_use]
    pub fn spawn_engine(&self) -> &SpawnEngine {
        &self.spawn_engine
    }

    #[must_use]
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// A controller for one endless-scroll session.
    #[must_use]
    pub fn session_controller(&self, user: UserId) -> SessionController {
        SessionController::new(
            user,
            self.clock,
            self.config.clone(),
            self.buffer_manager.clone(),
            self.spawn_engine.clone(),
            Arc::clone(&self.storage.materials),
            Arc::clone(&self.storage.mirrors),
            Arc::clone(&self.storage.solved),
        )
    }
}
