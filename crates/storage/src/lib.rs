#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    BufferRepository, CachedImage, ImageCacheRepository, InMemoryRepository, MaterialRepository,
    MirrorRepository, SolvedSetRepository, Storage, StorageError,
};
pub use sqlite::{SqliteInitError, SqliteRepository};
