//! Turning an uploaded document into a persisted, pending job.

use crate::error::FlashcardError;
use crate::job::Job;
use crate::pipeline::render::Renderer;
use crate::store::JobStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Creates jobs from raw document bytes.
///
/// Ingest only records the job; running it is the caller's business (see
/// [`crate::service::JobService::submit`]).
#[derive(Clone)]
pub struct IngestController {
    store: Arc<JobStore>,
    renderer: Arc<dyn Renderer>,
}

impl IngestController {
    pub fn new(store: Arc<JobStore>, renderer: Arc<dyn Renderer>) -> Self {
        Self { store, renderer }
    }

    /// Count pages, build a job with one pending item per page, and persist
    /// both the snapshot and the source bytes in the transient tier.
    ///
    /// An unreadable document yields a job with zero pages rather than an
    /// error.
    pub async fn ingest(&self, name: &str, bytes: Vec<u8>) -> Result<Job, FlashcardError> {
        let document: Arc<[u8]> = Arc::from(bytes);
        let page_count = self.renderer.page_count(Arc::clone(&document)).await;

        let job = Job::new(name, page_count);
        self.persist_new(&job, &document).await?;

        info!(
            "Job {}: ingested '{}' ({} pages, {} bytes)",
            job.id,
            name,
            page_count,
            document.len()
        );
        Ok(job)
    }

    /// Write the source, then the snapshot. A job only becomes visible once
    /// both are on disk; on any failure the partial directory is removed.
    async fn persist_new(&self, job: &Job, document: &[u8]) -> Result<(), FlashcardError> {
        let written = match self.store.put_source(&job.id, document).await {
            Ok(()) => self.store.put(job).await.map(|_| ()),
            failed => failed,
        };
        if let Err(e) = written {
            warn!("Job {}: ingest failed, discarding: {}", job.id, e);
            if let Err(cleanup) = self.store.discard(&job.id).await {
                warn!("Job {}: could not discard partial job: {}", job.id, cleanup);
            }
            return Err(e.into());
        }
        Ok(())
    }
}
