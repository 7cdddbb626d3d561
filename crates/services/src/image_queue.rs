use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use review_core::Clock;
use storage::repository::{CachedImage, ImageCacheRepository};

use crate::ai::{IllustrationRequest, ImageRenderer};
use crate::error::ImageError;

/// Cached results smaller than this are treated as corrupt and regenerated.
pub const MIN_VALID_IMAGE_BYTES: u64 = 1024;

/// Default ceiling on concurrent outbound render requests.
pub const DEFAULT_IMAGE_CEILING: usize = 2;

const DEFAULT_SMOOTHING: Duration = Duration::from_millis(150);

/// Bounds concurrent outbound illustration requests to a fixed ceiling.
///
/// Admission is FIFO (the semaphore is fair); completion order is whatever the
/// collaborator delivers. A successful result is persisted keyed by a content
/// hash of the request parameters, and that cache is consulted before any
/// queue admission, so cache hits bypass concurrency limiting entirely.
pub struct ImageGenerationQueue {
    renderer: Arc<dyn ImageRenderer>,
    cache: Arc<dyn ImageCacheRepository>,
    clock: Clock,
    semaphore: Semaphore,
    smoothing: Duration,
}

impl ImageGenerationQueue {
    #[must_use]
    pub fn new(
        renderer: Arc<dyn ImageRenderer>,
        cache: Arc<dyn ImageCacheRepository>,
        clock: Clock,
        ceiling: usize,
    ) -> Self {
        Self {
            renderer,
            cache,
            clock,
            semaphore: Semaphore::new(ceiling.max(1)),
            smoothing: DEFAULT_SMOOTHING,
        }
    }

    /// Override the post-completion smoothing delay (mainly for tests).
    #[must_use]
    pub fn with_smoothing(mut self, smoothing: Duration) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Resolve an illustration for the request.
    ///
    /// # Errors
    ///
    /// Returns `ImageError` when rendering fails or produces an image below
    /// the minimum valid size. Failures are not retried here.
    pub async fn enqueue(&self, request: &IllustrationRequest) -> Result<Url, ImageError> {
        let key = request.cache_key();

        match self.cache.get_image(&key).await {
            Ok(Some(cached)) if cached.byte_len >= MIN_VALID_IMAGE_BYTES => {
                debug!(%key, "illustration cache hit");
                return Ok(cached.url);
            }
            Ok(Some(corrupt)) => {
                debug!(%key, byte_len = corrupt.byte_len, "corrupt cached illustration, regenerating");
                if let Err(err) = self.cache.delete_image(&key).await {
                    warn!(%key, error = %err, "failed to drop corrupt cache entry");
                }
            }
            Ok(None) => {}
            Err(err) => {
                // Degrade to rendering; the cache is an optimization.
                warn!(%key, error = %err, "illustration cache lookup failed");
            }
        }

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ImageError::QueueClosed)?;
        let result = self.renderer.render(request).await;
        // Hold the slot briefly after completion so dispatches stay smoothed.
        tokio::time::sleep(self.smoothing).await;
        drop(permit);

        let image = result?;
        if image.byte_len < MIN_VALID_IMAGE_BYTES {
            return Err(ImageError::TooSmall {
                actual: image.byte_len,
            });
        }

        let cached = CachedImage {
            url: image.url.clone(),
            byte_len: image.byte_len,
            created_at: self.clock.now(),
        };
        if let Err(err) = self.cache.put_image(&key, &cached).await {
            warn!(%key, error = %err, "failed to persist illustration cache entry");
        }

        Ok(image.url)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storage::repository::InMemoryRepository;

    use crate::ai::RenderedImage;
    use review_core::time::{fixed_clock, fixed_now};

    fn image_url(name: &str) -> Url {
        Url::parse(&format!("https://img.example/{name}.png")).unwrap()
    }

    /// Renderer whose completions are released manually through a gate.
    struct GatedRenderer {
        started: AtomicUsize,
        gate: Semaphore,
    }

    impl GatedRenderer {
        fn new() -> Self {
            Self {
                started: AtomicUsize::new(0),
                gate: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageRenderer for GatedRenderer {
        async fn render(&self, request: &IllustrationRequest) -> Result<RenderedImage, ImageError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let permit = self.gate.acquire().await.expect("gate open");
            permit.forget();
            Ok(RenderedImage {
                url: image_url(&request.prompt),
                byte_len: 4096,
            })
        }
    }

    struct FixedRenderer {
        byte_len: u64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageRenderer for FixedRenderer {
        async fn render(&self, request: &IllustrationRequest) -> Result<RenderedImage, ImageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RenderedImage {
                url: image_url(&request.prompt),
                byte_len: self.byte_len,
            })
        }
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn ceiling_admits_two_then_one_after_a_completion() {
        let renderer = Arc::new(GatedRenderer::new());
        let cache = Arc::new(InMemoryRepository::new());
        let queue = Arc::new(
            ImageGenerationQueue::new(renderer.clone(), cache, fixed_clock(), 2)
                .with_smoothing(Duration::ZERO),
        );

        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                queue.enqueue(&IllustrationRequest::new(name)).await
            }));
        }

        settle().await;
        assert_eq!(renderer.started.load(Ordering::SeqCst), 2);

        // One completion frees a slot; the third dispatch begins.
        renderer.gate.add_permits(1);
        settle().await;
        assert_eq!(renderer.started.load(Ordering::SeqCst), 3);

        renderer.gate.add_permits(2);
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn cache_hit_bypasses_the_queue() {
        let renderer = Arc::new(FixedRenderer {
            byte_len: 4096,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(InMemoryRepository::new());
        let request = IllustrationRequest::new("cached");
        cache
            .put_image(
                &request.cache_key(),
                &CachedImage {
                    url: image_url("cached"),
                    byte_len: 4096,
                    created_at: fixed_now(),
                },
            )
            .await
            .unwrap();

        let queue = ImageGenerationQueue::new(renderer.clone(), cache, fixed_clock(), 2)
            .with_smoothing(Duration::ZERO);

        let url = queue.enqueue(&request).await.unwrap();
        assert_eq!(url, image_url("cached"));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_deleted_and_regenerated() {
        let renderer = Arc::new(FixedRenderer {
            byte_len: 4096,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(InMemoryRepository::new());
        let request = IllustrationRequest::new("tiny");
        cache
            .put_image(
                &request.cache_key(),
                &CachedImage {
                    url: image_url("stale"),
                    byte_len: MIN_VALID_IMAGE_BYTES - 1,
                    created_at: fixed_now(),
                },
            )
            .await
            .unwrap();

        let queue = ImageGenerationQueue::new(
            renderer.clone(),
            Arc::clone(&cache) as Arc<dyn ImageCacheRepository>,
            fixed_clock(),
            2,
        )
        .with_smoothing(Duration::ZERO);

        let url = queue.enqueue(&request).await.unwrap();
        assert_eq!(url, image_url("tiny"));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);

        // The regenerated result replaced the corrupt entry.
        let cached = cache.get_image(&request.cache_key()).await.unwrap().unwrap();
        assert_eq!(cached.byte_len, 4096);
    }

    #[tokio::test]
    async fn undersized_render_is_an_error_and_not_cached() {
        let renderer = Arc::new(FixedRenderer {
            byte_len: 10,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(InMemoryRepository::new());
        let request = IllustrationRequest::new("small");

        let queue = ImageGenerationQueue::new(
            renderer,
            Arc::clone(&cache) as Arc<dyn ImageCacheRepository>,
            fixed_clock(),
            2,
        )
        .with_smoothing(Duration::ZERO);

        let err = queue.enqueue(&request).await.unwrap_err();
        assert!(matches!(err, ImageError::TooSmall { actual: 10 }));
        assert!(cache.get_image(&request.cache_key()).await.unwrap().is_none());
    }
}
