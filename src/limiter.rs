//! Process-wide cap on in-flight pages.
//!
//! The analysis service enforces a request-rate ceiling, so every page of
//! every job being processed by this process shares one [`PageLimiter`].
//! The limiter is constructed once and handed to the executor explicitly
//! (no hidden global), which lets tests substitute a capacity of 1 to force
//! pages through one at a time.
//!
//! ```rust
//! use edgequake_flashcards::PageLimiter;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = PageLimiter::new(3);
//! let permit = limiter.acquire().await?;
//! assert_eq!(limiter.in_flight(), 1);
//! drop(permit);
//! assert_eq!(limiter.in_flight(), 0);
//! # Ok(())
//! # }
//! ```

use crate::error::FlashcardError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default capacity: three pages in flight across the whole process.
pub const DEFAULT_PAGE_CONCURRENCY: usize = 3;

/// Counting limiter over a Tokio semaphore, with in-flight and peak gauges.
#[derive(Debug)]
pub struct PageLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    /// Permits currently held.
    in_flight: AtomicUsize,
    /// Highest `in_flight` ever observed.
    peak_in_flight: AtomicUsize,
}

impl PageLimiter {
    /// A limiter allowing `max_concurrent` pages at once (at least 1).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_permits: max_concurrent,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<PagePermit<'_>, FlashcardError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| FlashcardError::Internal(format!("page limiter closed: {e}")))?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.update_peak(current);

        Ok(PagePermit {
            _permit: permit,
            in_flight: &self.in_flight,
        })
    }

    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_flight.load(Ordering::SeqCst);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_permits
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for PageLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_CONCURRENCY)
    }
}

/// One held slot of a [`PageLimiter`].
pub struct PagePermit<'a> {
    _permit: OwnedSemaphorePermit,
    in_flight: &'a AtomicUsize,
}

impl Drop for PagePermit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let limiter = PageLimiter::new(0);
        assert_eq!(limiter.max_concurrent(), 1);
        assert_eq!(limiter.available_permits(), 1);
    }

    #[tokio::test]
    async fn acquire_releases_on_drop() {
        let limiter = PageLimiter::new(2);
        {
            let _p1 = limiter.acquire().await.unwrap();
            let _p2 = limiter.acquire().await.unwrap();
            assert_eq!(limiter.available_permits(), 0);
            assert_eq!(limiter.in_flight(), 2);
        }
        assert_eq!(limiter.available_permits(), 2);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn waiters_block_until_a_slot_frees() {
        let limiter = Arc::new(PageLimiter::new(1));
        let first = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let _p = limiter.acquire().await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert_eq!(limiter.peak_in_flight(), 1);
    }
}
