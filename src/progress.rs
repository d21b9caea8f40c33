//! Progress-callback trait for per-page job events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the background executor works through a job.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a broadcast channel, a WebSocket, or a
//! terminal progress bar without the library knowing how the host
//! application communicates. The trait is `Send + Sync` because pages of a
//! job, and several jobs, are processed concurrently.
//!
//! # Example
//!
//! ```rust
//! use edgequake_flashcards::{JobProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     cards: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, page_num: usize, total_pages: usize, front: &str) {
//!         self.cards.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{}: {}", page_num, total_pages, front);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { cards: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn JobProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Called by the executor as it processes each page of a job.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// Item events for different pages (and different jobs) may arrive
/// concurrently from different threads. Implementations must protect shared
/// mutable state with `Mutex`, `AtomicUsize` or similar.
pub trait JobProgressCallback: Send + Sync {
    /// Called once when a job switches to `Processing`.
    fn on_job_start(&self, job_id: &str, total_pages: usize) {
        let _ = (job_id, total_pages);
    }

    /// Called after a limiter slot is acquired, just before rendering.
    fn on_item_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called before sleeping ahead of a rate-limit retry.
    ///
    /// # Arguments
    /// * `attempt`: the attempt number about to be made (1-based retries)
    /// * `delay`  : how long the executor will wait first
    fn on_item_retry(&self, page_num: usize, attempt: u32, delay: Duration) {
        let _ = (page_num, attempt, delay);
    }

    /// Called when a page produced a card.
    fn on_item_complete(&self, page_num: usize, total_pages: usize, front: &str) {
        let _ = (page_num, total_pages, front);
    }

    /// Called when a page settles as `Failed`.
    fn on_item_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page of the job has settled.
    ///
    /// # Arguments
    /// * `completed`: pages that produced a card
    fn on_job_complete(&self, job_id: &str, total_pages: usize, completed: usize) {
        let _ = (job_id, total_pages, completed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        retries: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        completed_total: AtomicUsize,
    }

    impl JobProgressCallback for TrackingCallback {
        fn on_item_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_retry(&self, _page_num: usize, _attempt: u32, _delay: Duration) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _page_num: usize, _total_pages: usize, _front: &str) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_complete(&self, _job_id: &str, _total_pages: usize, completed: usize) {
            self.completed_total.store(completed, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_job_start("job", 5);
        cb.on_item_start(1, 5);
        cb.on_item_retry(1, 1, Duration::from_secs(1));
        cb.on_item_complete(1, 5, "Photosynthesis");
        cb.on_item_error(2, 5, "some error");
        cb.on_job_complete("job", 5, 4);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_item_start(1, 3);
        tracker.on_item_complete(1, 3, "A");
        tracker.on_item_start(2, 3);
        tracker.on_item_retry(2, 1, Duration::from_secs(1));
        tracker.on_item_error(2, 3, "rate limited");
        tracker.on_item_start(3, 3);
        tracker.on_item_complete(3, 3, "C");
        tracker.on_job_complete("job", 3, 2);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.retries.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completed_total.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_job_start("job", 10);
        cb.on_item_complete(1, 10, "front");
    }
}
