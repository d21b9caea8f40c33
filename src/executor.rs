//! Background execution of a job's pages.
//!
//! ## Per-page procedure
//!
//! ```text
//! acquire slot ─▶ Processing ─▶ render ─┬─▶ analyze ─┬─▶ Completed
//!                                       │            ├─▶ RateLimited ─▶ sleep ─▶ analyze (same slot)
//!                                       │            └─▶ Failed
//!                                       └─▶ Failed
//! ```
//!
//! Every page of a job is launched at once; the shared [`PageLimiter`] is
//! what bounds how many are actually in flight across all jobs. A page keeps
//! its slot through every retry, so a throttled page does not re-enter the
//! queue behind its siblings. Only [`FailureKind::RateLimited`] is retried,
//! at most `max_retries` times, sleeping [`PipelineConfig::backoff`] between
//! attempts.
//!
//! The job itself is persisted twice: once when it enters `Processing` and
//! once after every page has settled. Intermediate progress lives only in the
//! shared `Arc<Mutex<Job>>`.

use crate::config::PipelineConfig;
use crate::error::{FailureKind, StoreError};
use crate::job::{Job, ProcessingStatus};
use crate::limiter::PageLimiter;
use crate::pipeline::analyze::{Analyzer, CardContent};
use crate::pipeline::render::Renderer;
use crate::store::JobStore;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Runs jobs to completion against the shared limiter.
#[derive(Clone)]
pub struct Executor {
    store: Arc<JobStore>,
    limiter: Arc<PageLimiter>,
    renderer: Arc<dyn Renderer>,
    analyzer: Arc<dyn Analyzer>,
    config: PipelineConfig,
}

impl Executor {
    pub fn new(
        store: Arc<JobStore>,
        limiter: Arc<PageLimiter>,
        renderer: Arc<dyn Renderer>,
        analyzer: Arc<dyn Analyzer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            renderer,
            analyzer,
            config,
        }
    }

    pub fn limiter(&self) -> &Arc<PageLimiter> {
        &self.limiter
    }

    /// Process every page of `job` and persist the final snapshot.
    ///
    /// Never returns an error: page failures are recorded on the items, and
    /// store failures are logged with the job left at its last persisted
    /// state.
    pub async fn run_job(&self, job: Arc<Mutex<Job>>) {
        let start = Instant::now();
        let (job_id, pages) = {
            let j = job.lock().await;
            let pages: Vec<usize> = j.cards.iter().map(|c| c.page_number).collect();
            (j.id.clone(), pages)
        };
        let total = pages.len();

        let document: Arc<[u8]> = match self.store.load_source(&job_id).await {
            Ok(Some(bytes)) => Arc::from(bytes),
            Ok(None) => {
                warn!("Job {}: source document missing, marking failed", job_id);
                self.finish(&job, ProcessingStatus::Failed).await;
                return;
            }
            Err(e) => {
                error!("Job {}: cannot read source document: {}", job_id, e);
                self.finish(&job, ProcessingStatus::Failed).await;
                return;
            }
        };

        {
            let mut j = job.lock().await;
            j.status = ProcessingStatus::Processing;
        }
        self.persist(&job).await;

        info!("Job {}: processing {} pages", job_id, total);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_job_start(&job_id, total);
        }

        join_all(
            pages
                .into_iter()
                .map(|page| self.process_item(&job, Arc::clone(&document), page, total)),
        )
        .await;

        let completed = self.finish(&job, ProcessingStatus::Completed).await;
        info!(
            "Job {}: done in {:.1}s, {}/{} pages completed",
            job_id,
            start.elapsed().as_secs_f64(),
            completed,
            total
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_job_complete(&job_id, total, completed);
        }
    }

    /// Set the terminal job status, persist, and return the completed count.
    async fn finish(&self, job: &Arc<Mutex<Job>>, status: ProcessingStatus) -> usize {
        let completed = {
            let mut j = job.lock().await;
            j.status = status;
            j.processed_slides
        };
        self.persist(job).await;
        completed
    }

    async fn persist(&self, job: &Arc<Mutex<Job>>) {
        let snapshot = job.lock().await.clone();
        match self.store.put(&snapshot).await {
            Ok(tier) => debug!(
                "Job {}: persisted {:?} snapshot to {:?} tier",
                snapshot.id, snapshot.status, tier
            ),
            Err(StoreError::NotFound { .. }) => {
                info!("Job {}: deleted while processing, snapshot dropped", snapshot.id)
            }
            Err(e) => error!("Job {}: failed to persist snapshot: {}", snapshot.id, e),
        }
    }

    async fn process_item(
        &self,
        job: &Arc<Mutex<Job>>,
        document: Arc<[u8]>,
        page: usize,
        total: usize,
    ) {
        let _permit = match self.limiter.acquire().await {
            Ok(p) => p,
            Err(e) => {
                self.fail_item(job, page, total, &e.to_string()).await;
                return;
            }
        };

        {
            let mut j = job.lock().await;
            let started = match j.card_mut(page) {
                Some(item) => item.start(),
                None => false,
            };
            if !started {
                return;
            }
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_item_start(page, total);
        }

        let image = match self.renderer.render_page(document, page).await {
            Ok(image) => image,
            Err(e) => {
                warn!("{}", e);
                self.fail_item(job, page, total, &e.to_string()).await;
                return;
            }
        };

        match self.analyze_with_retry(&image, page).await {
            Ok(card) => {
                let mut j = job.lock().await;
                let completed = j
                    .card_mut(page)
                    .map(|item| item.complete(card.front.clone(), card.back.clone()))
                    .unwrap_or(false);
                if completed {
                    j.record_completion();
                }
                drop(j);
                debug!("Page {}: card '{}'", page, card.front);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_item_complete(page, total, &card.front);
                }
            }
            Err(message) => self.fail_item(job, page, total, &message).await,
        }
    }

    /// Call the analyzer until it succeeds, fails for good, or runs out of
    /// rate-limit retries. Returns the error text on failure.
    async fn analyze_with_retry(&self, image: &[u8], page: usize) -> Result<CardContent, String> {
        let max_retries = self.config.max_retries;
        let mut attempt: u32 = 0;
        loop {
            match self.analyzer.analyze(image, page, attempt).await {
                Ok(card) => return Ok(card),
                Err(e) if e.kind() == FailureKind::RateLimited && attempt < max_retries => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        "Page {}: rate limited (attempt {}/{}), retrying in {:?}",
                        page,
                        attempt + 1,
                        max_retries + 1,
                        delay
                    );
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_item_retry(page, attempt + 1, delay);
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Page {}: giving up after {} attempt(s): {}", page, attempt + 1, e);
                    return Err(e.to_string());
                }
            }
        }
    }

    async fn fail_item(&self, job: &Arc<Mutex<Job>>, page: usize, total: usize, message: &str) {
        {
            let mut j = job.lock().await;
            if let Some(item) = j.card_mut(page) {
                item.fail(message);
            }
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_item_error(page, total, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AnalysisError, RenderError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FakeRenderer {
        fail_pages: Vec<usize>,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn page_count(&self, _document: Arc<[u8]>) -> usize {
            0
        }

        async fn render_page(
            &self,
            _document: Arc<[u8]>,
            page_num: usize,
        ) -> Result<Vec<u8>, RenderError> {
            if self.fail_pages.contains(&page_num) {
                Err(RenderError::PageOutOfRange {
                    page: page_num,
                    total: 0,
                })
            } else {
                Ok(vec![page_num as u8])
            }
        }
    }

    /// Rate-limits every call for the listed pages, succeeds otherwise.
    #[derive(Default)]
    struct ThrottlingAnalyzer {
        throttled_pages: Vec<usize>,
        calls: StdMutex<HashMap<usize, Vec<u32>>>,
        delay: Duration,
    }

    impl ThrottlingAnalyzer {
        fn attempts(&self, page: usize) -> Vec<u32> {
            self.calls
                .lock()
                .unwrap()
                .get(&page)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Analyzer for ThrottlingAnalyzer {
        async fn analyze(
            &self,
            _image: &[u8],
            page_num: usize,
            attempt: u32,
        ) -> Result<CardContent, AnalysisError> {
            self.calls
                .lock()
                .unwrap()
                .entry(page_num)
                .or_default()
                .push(attempt);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.throttled_pages.contains(&page_num) {
                Err(AnalysisError::RateLimited {
                    page: page_num,
                    detail: "429 Too Many Requests".into(),
                })
            } else {
                Ok(CardContent {
                    front: format!("Concept {page_num}"),
                    back: format!("Explanation {page_num}"),
                })
            }
        }
    }

    struct CountingAnalyzer {
        calls: AtomicUsize,
        result: fn(usize) -> Result<CardContent, AnalysisError>,
    }

    #[async_trait]
    impl Analyzer for CountingAnalyzer {
        async fn analyze(
            &self,
            _image: &[u8],
            page_num: usize,
            _attempt: u32,
        ) -> Result<CardContent, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)(page_num)
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::builder()
            .retry_backoff_unit(Duration::from_millis(1))
            .build()
            .unwrap()
    }

    async fn setup(
        pages: usize,
        analyzer: Arc<dyn Analyzer>,
        renderer: FakeRenderer,
        capacity: usize,
    ) -> (TempDir, Executor, Arc<JobStore>, Arc<Mutex<Job>>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(dir.path()).await.unwrap());
        let job = Job::new("deck.pdf", pages);
        store.put(&job).await.unwrap();
        store.put_source(&job.id, b"%PDF-1.4").await.unwrap();
        let executor = Executor::new(
            Arc::clone(&store),
            Arc::new(PageLimiter::new(capacity)),
            Arc::new(renderer),
            analyzer,
            fast_config(),
        );
        (dir, executor, store, Arc::new(Mutex::new(job)))
    }

    #[tokio::test]
    async fn rate_limited_page_makes_four_attempts() {
        let analyzer = Arc::new(ThrottlingAnalyzer {
            throttled_pages: vec![1],
            ..Default::default()
        });
        let (_dir, executor, store, job) = setup(
            1,
            analyzer.clone(),
            FakeRenderer { fail_pages: vec![] },
            3,
        )
        .await;

        executor.run_job(Arc::clone(&job)).await;

        assert_eq!(analyzer.attempts(1), vec![0, 1, 2, 3]);
        let id = job.lock().await.id.clone();
        let stored = store.get(&id).await.unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert_eq!(stored.cards[0].status, ProcessingStatus::Failed);
        assert!(stored.cards[0].error.as_deref().unwrap().contains("rate limited"));
        assert_eq!(stored.processed_slides, 0);
    }

    #[tokio::test]
    async fn non_rate_limit_failure_is_not_retried() {
        let analyzer = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
            result: |page| Err(AnalysisError::EmptyResponse { page }),
        });
        let (_dir, executor, _store, job) = setup(
            2,
            analyzer.clone(),
            FakeRenderer { fail_pages: vec![] },
            3,
        )
        .await;

        executor.run_job(Arc::clone(&job)).await;

        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
        let j = job.lock().await;
        assert!(j.cards.iter().all(|c| c.status == ProcessingStatus::Failed));
        assert_eq!(j.status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn render_failure_skips_analysis() {
        let analyzer = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
            result: |page| {
                Ok(CardContent {
                    front: format!("F{page}"),
                    back: "B".into(),
                })
            },
        });
        let (_dir, executor, _store, job) = setup(
            3,
            analyzer.clone(),
            FakeRenderer {
                fail_pages: vec![2],
            },
            3,
        )
        .await;

        executor.run_job(Arc::clone(&job)).await;

        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
        let j = job.lock().await;
        assert_eq!(j.card(2).unwrap().status, ProcessingStatus::Failed);
        assert!(j.card(2).unwrap().error.as_deref().unwrap().contains("out of range"));
        assert_eq!(j.processed_slides, 2);
    }

    #[tokio::test]
    async fn limiter_bounds_in_flight_pages() {
        let analyzer = Arc::new(ThrottlingAnalyzer {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let (_dir, executor, _store, job) = setup(
            6,
            analyzer,
            FakeRenderer { fail_pages: vec![] },
            2,
        )
        .await;

        executor.run_job(Arc::clone(&job)).await;

        assert_eq!(executor.limiter().peak_in_flight(), 2);
        assert_eq!(executor.limiter().in_flight(), 0);
        assert_eq!(job.lock().await.processed_slides, 6);
    }

    #[tokio::test]
    async fn missing_source_fails_the_job() {
        let analyzer = Arc::new(ThrottlingAnalyzer::default());
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(dir.path()).await.unwrap());
        let job = Job::new("gone.pdf", 2);
        store.put(&job).await.unwrap();
        let id = job.id.clone();
        let executor = Executor::new(
            Arc::clone(&store),
            Arc::new(PageLimiter::new(3)),
            Arc::new(FakeRenderer { fail_pages: vec![] }),
            analyzer.clone(),
            fast_config(),
        );

        executor.run_job(Arc::new(Mutex::new(job))).await;

        let stored = store.get(&id).await.unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
        assert!(stored.cards.iter().all(|c| c.status == ProcessingStatus::Pending));
        assert!(analyzer.calls.lock().unwrap().is_empty());
    }
}
