//! The job lifecycle surface: submit, poll, list, promote, delete, export.
//!
//! [`JobService`] ties the store, the ingest controller and the executor
//! together. It keeps one `Arc<Mutex<Job>>` per running job; that object is
//! the only copy the background executor mutates, so polling a running job
//! shows live per-page progress without any mid-flight writes to disk.
//!
//! ```rust,no_run
//! use edgequake_flashcards::{JobService, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().storage_dir("./cards").build()?;
//!     let service = JobService::from_config(config).await?;
//!
//!     let bytes = std::fs::read("lecture.pdf")?;
//!     let job = service.submit("lecture.pdf", bytes).await?;
//!     service.wait_idle().await;
//!
//!     let done = service.status(&job.id).await?;
//!     println!("{}/{} cards", done.processed_slides, done.total_slides);
//!     Ok(())
//! }
//! ```

use crate::config::PipelineConfig;
use crate::error::FlashcardError;
use crate::executor::Executor;
use crate::export;
use crate::ingest::IngestController;
use crate::job::Job;
use crate::limiter::PageLimiter;
use crate::pipeline::analyze::{Analyzer, VisionAnalyzer};
use crate::pipeline::render::{PdfiumRenderer, Renderer};
use crate::store::{JobStore, JobStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

type Registry = Arc<Mutex<HashMap<String, Arc<Mutex<Job>>>>>;

/// Job lifecycle operations over one store and one shared page limiter.
pub struct JobService {
    store: Arc<JobStore>,
    ingest: IngestController,
    executor: Executor,
    running: Registry,
    tasks: Mutex<JoinSet<()>>,
}

impl JobService {
    /// Assemble a service from already-built parts.
    ///
    /// Services built over the same `limiter` share its capacity.
    pub fn new(
        store: Arc<JobStore>,
        limiter: Arc<PageLimiter>,
        renderer: Arc<dyn Renderer>,
        analyzer: Arc<dyn Analyzer>,
        config: PipelineConfig,
    ) -> Self {
        let ingest = IngestController::new(Arc::clone(&store), Arc::clone(&renderer));
        let executor = Executor::new(Arc::clone(&store), limiter, renderer, analyzer, config);
        Self {
            store,
            ingest,
            executor,
            running: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Open the store under `config.storage_dir` and use the given adapters.
    pub async fn open(
        config: PipelineConfig,
        renderer: Arc<dyn Renderer>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<Self, FlashcardError> {
        let store = Arc::new(JobStore::open(&config.storage_dir).await?);
        let limiter = Arc::new(PageLimiter::new(config.concurrency));
        Ok(Self::new(store, limiter, renderer, analyzer, config))
    }

    /// Open the store and build the pdfium renderer and vision analyzer.
    pub async fn from_config(config: PipelineConfig) -> Result<Self, FlashcardError> {
        let renderer = Arc::new(PdfiumRenderer::from_config(&config));
        let analyzer = Arc::new(VisionAnalyzer::from_config(&config)?);
        Self::open(config, renderer, analyzer).await
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn limiter(&self) -> &Arc<PageLimiter> {
        self.executor.limiter()
    }

    /// Ingest a document and start processing it in the background.
    ///
    /// Returns the freshly persisted, all-pending snapshot without waiting
    /// for any page.
    pub async fn submit(&self, name: &str, bytes: Vec<u8>) -> Result<Job, FlashcardError> {
        let job = self.ingest.ingest(name, bytes).await?;
        let shared = Arc::new(Mutex::new(job.clone()));
        self.running
            .lock()
            .await
            .insert(job.id.clone(), Arc::clone(&shared));

        let executor = self.executor.clone();
        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        let id = job.id.clone();
        let mut tasks = self.tasks.lock().await;
        reap_finished(&mut tasks);
        tasks.spawn(async move {
            executor.run_job(shared).await;
            running.lock().await.remove(&id);
            // No more writes can come from this job.
            store.release(&id).await;
            debug!("Job {}: background task finished", id);
        });

        Ok(job)
    }

    /// Current snapshot: the live copy while running, else the stored one.
    pub async fn status(&self, id: &str) -> Result<Job, FlashcardError> {
        if let Some(live) = self.live(id).await {
            return Ok(live.lock().await.clone());
        }
        Ok(self.store.get(id).await?)
    }

    /// Every known job, with running jobs shown at their live state.
    pub fn list(&self) -> JobStream {
        let running = Arc::clone(&self.running);
        Box::pin(self.store.list().then(move |stored| {
            let running = Arc::clone(&running);
            async move {
                let live = running.lock().await.get(&stored.id).cloned();
                match live {
                    Some(live) => live.lock().await.clone(),
                    None => stored,
                }
            }
        }))
    }

    /// Move a job to permanent retention. Idempotent.
    pub async fn promote(&self, id: &str) -> Result<Job, FlashcardError> {
        let stored = self.store.promote(id).await?;
        match self.live(id).await {
            Some(live) => {
                let mut job = live.lock().await;
                job.is_saved = true;
                Ok(job.clone())
            }
            None => Ok(stored),
        }
    }

    /// Delete a job from both tiers.
    ///
    /// A job still being processed keeps running in the background, but its
    /// final snapshot is discarded.
    pub async fn delete(&self, id: &str) -> Result<(), FlashcardError> {
        self.store.delete(id).await?;
        if self.running.lock().await.remove(id).is_some() {
            info!("Job {}: deleted while still processing", id);
        } else {
            self.store.release(id).await;
        }
        Ok(())
    }

    /// Store an already-processed job directly in the permanent tier.
    ///
    /// Used for results produced elsewhere; the job is not re-processed. A
    /// payload without a valid id is given a fresh one.
    pub async fn store_job(&self, mut job: Job) -> Result<Job, FlashcardError> {
        if Uuid::parse_str(&job.id).is_err() {
            job.id = Uuid::new_v4().to_string();
        }
        job.is_saved = true;
        self.store.put(&job).await?;
        info!("Job {}: stored '{}' in permanent tier", job.id, job.filename);
        Ok(job)
    }

    /// Build the vault archive for a job's completed cards.
    pub async fn export(&self, id: &str) -> Result<Vec<u8>, FlashcardError> {
        let job = self.status(id).await?;
        export::build_vault(&job)
    }

    /// Wait for every background job started so far to finish.
    pub async fn wait_idle(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!("Background job task failed: {}", e);
            }
        }
    }

    async fn live(&self, id: &str) -> Option<Arc<Mutex<Job>>> {
        self.running.lock().await.get(id).cloned()
    }
}

/// Drop the results of background tasks that already finished.
fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(res) = tasks.try_join_next() {
        if let Err(e) = res {
            error!("Background job task failed: {}", e);
        }
    }
}
