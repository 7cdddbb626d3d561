#![forbid(unsafe_code)]

pub mod ai;
pub mod buffer_manager;
pub mod dedup;
pub mod error;
pub mod image_queue;
pub mod interleave;
pub mod session;
pub mod spawn_engine;
pub mod supply_api;
pub mod supply_services;

pub use review_core::Clock;

pub use buffer_manager::{BufferManager, RefillReport};
pub use dedup::{Deduplicator, demote_solved};
pub use error::{
    BufferError, GenerationError, ImageError, SessionError, SpawnError, SupplyInitError,
};
pub use image_queue::{DEFAULT_IMAGE_CEILING, ImageGenerationQueue, MIN_VALID_IMAGE_BYTES};
pub use interleave::interleave_by_origin;
pub use session::{AnswerEvent, SessionController};
pub use spawn_engine::{SpawnEngine, SpawnOutcome, SpawnRequest};
pub use supply_api::{
    ConsumeRequest, ConsumeResponse, PregeneratedResponse, SpawnApiRequest, SpawnResponse,
    SupplyService,
};
pub use supply_services::SupplyServices;
