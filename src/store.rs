//! Durable job storage with two retention tiers.
//!
//! ## Layout
//!
//! ```text
//! <storage_dir>/
//!   temp_storage/<job-id>/metadata.json   transient tier (every job starts here)
//!   temp_storage/<job-id>/source.pdf
//!   saved_storage/<job-id>/metadata.json  permanent tier (after promote)
//!   saved_storage/<job-id>/source.pdf
//! ```
//!
//! Each job is one JSON snapshot plus its original bytes, both addressed by
//! job id inside whichever tier currently holds the job directory. Reads
//! always try the permanent tier first so a promoted job is never served
//! from a stale transient copy.
//!
//! Writes go to `<file>.tmp` and are renamed into place, so a reader sees
//! either the previous snapshot or the new one, never half a file.
//! Directory-changing operations (put, promote, delete) are serialised by a
//! single async mutex; the process is assumed to be the only writer.

use crate::error::StoreError;
use crate::job::Job;
use futures::future;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReadDirStream;
use tokio_stream::Stream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// File name of the job snapshot inside a job directory.
pub const METADATA_FILE: &str = "metadata.json";

/// File name of the original document inside a job directory.
pub const SOURCE_FILE: &str = "source.pdf";

/// A lazily evaluated, finite stream of stored jobs.
pub type JobStream = Pin<Box<dyn Stream<Item = Job> + Send>>;

/// Where a job's durable state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionTier {
    /// Default tier for freshly ingested jobs.
    Transient,
    /// Tier for jobs the operator chose to keep.
    Permanent,
}

impl RetentionTier {
    /// Directory name of the tier under the storage root.
    pub fn dir_name(self) -> &'static str {
        match self {
            RetentionTier::Transient => "temp_storage",
            RetentionTier::Permanent => "saved_storage",
        }
    }

    fn root(self, storage_dir: &Path) -> PathBuf {
        storage_dir.join(self.dir_name())
    }
}

/// Filesystem-backed job store.
#[derive(Debug)]
pub struct JobStore {
    root: PathBuf,
    /// Serialises directory changes; also remembers ids deleted by this
    /// process so a late background write cannot bring them back.
    deleted: Mutex<HashSet<String>>,
}

impl JobStore {
    /// Open (and create if needed) a store rooted at `storage_dir`.
    pub async fn open(storage_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = storage_dir.into();
        for tier in [RetentionTier::Transient, RetentionTier::Permanent] {
            let dir = tier.root(&root);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StoreError::io(&dir, e))?;
        }
        debug!("Job store opened at {}", root.display());
        Ok(Self {
            root,
            deleted: Mutex::new(HashSet::new()),
        })
    }

    /// Storage root this store was opened on.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, tier: RetentionTier, id: &str) -> PathBuf {
        tier.root(&self.root).join(id)
    }

    /// Tier currently holding `id`, if any.
    pub async fn tier_of(&self, id: &str) -> Option<RetentionTier> {
        if !is_valid_id(id) {
            return None;
        }
        for tier in [RetentionTier::Permanent, RetentionTier::Transient] {
            if dir_exists(&self.job_dir(tier, id)).await {
                return Some(tier);
            }
        }
        None
    }

    /// Write the full snapshot of `job`, replacing any previous one.
    ///
    /// The target tier is permanent when the job is flagged as saved or
    /// already lives in the permanent tier, transient otherwise. Snapshots in
    /// the permanent tier always carry `is_saved = true`.
    pub async fn put(&self, job: &Job) -> Result<RetentionTier, StoreError> {
        if !is_valid_id(&job.id) {
            return Err(StoreError::NotFound { id: job.id.clone() });
        }
        let deleted = self.deleted.lock().await;
        if deleted.contains(&job.id) {
            return Err(StoreError::NotFound { id: job.id.clone() });
        }

        let tier = self.write_tier(job).await;
        let dir = self.job_dir(tier, &job.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let json = if tier == RetentionTier::Permanent && !job.is_saved {
            let mut saved = job.clone();
            saved.is_saved = true;
            serde_json::to_vec_pretty(&saved)
        } else {
            serde_json::to_vec_pretty(job)
        }
        .map_err(|source| StoreError::Serialize {
            id: job.id.clone(),
            source,
        })?;

        write_atomic(&dir.join(METADATA_FILE), &json).await?;
        debug!("Job {}: snapshot written to {:?} tier", job.id, tier);
        Ok(tier)
    }

    async fn write_tier(&self, job: &Job) -> RetentionTier {
        if job.is_saved || dir_exists(&self.job_dir(RetentionTier::Permanent, &job.id)).await {
            RetentionTier::Permanent
        } else {
            RetentionTier::Transient
        }
    }

    /// Store the original document bytes next to the snapshot of `job_id`.
    pub async fn put_source(&self, job_id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if !is_valid_id(job_id) {
            return Err(StoreError::NotFound { id: job_id.to_string() });
        }
        let _guard = self.deleted.lock().await;
        let tier = self
            .tier_of(job_id)
            .await
            .unwrap_or(RetentionTier::Transient);
        let dir = self.job_dir(tier, job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        write_atomic(&dir.join(SOURCE_FILE), bytes).await
    }

    /// Read the original document bytes, or `None` if they are gone.
    pub async fn load_source(&self, job_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if !is_valid_id(job_id) {
            return Ok(None);
        }
        for tier in [RetentionTier::Permanent, RetentionTier::Transient] {
            let path = self.job_dir(tier, job_id).join(SOURCE_FILE);
            match tokio::fs::read(&path).await {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        Ok(None)
    }

    /// Load the snapshot of `id`, permanent tier first.
    pub async fn get(&self, id: &str) -> Result<Job, StoreError> {
        if !is_valid_id(id) {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        let permanent = self.job_dir(RetentionTier::Permanent, id).join(METADATA_FILE);
        match load_snapshot(&permanent).await {
            Err(StoreError::NotFound { .. }) => {}
            other => return other,
        }

        let transient = self.job_dir(RetentionTier::Transient, id).join(METADATA_FILE);
        let result = match load_snapshot(&transient).await {
            // A promotion may have moved the directory between the two reads.
            Err(StoreError::NotFound { .. }) => load_snapshot(&permanent).await,
            other => other,
        };
        result.map_err(|e| match e {
            StoreError::NotFound { .. } => StoreError::NotFound { id: id.to_string() },
            other => other,
        })
    }

    /// Move `id` from the transient to the permanent tier.
    ///
    /// Promoting a job that already lives in the permanent tier returns its
    /// stored state and touches nothing on disk.
    pub async fn promote(&self, id: &str) -> Result<Job, StoreError> {
        if !is_valid_id(id) {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        let _guard = self.deleted.lock().await;

        let saved_dir = self.job_dir(RetentionTier::Permanent, id);
        if dir_exists(&saved_dir).await {
            let mut job = load_snapshot(&saved_dir.join(METADATA_FILE)).await?;
            job.is_saved = true;
            debug!("Job {}: already in permanent tier", id);
            return Ok(job);
        }

        let temp_dir = self.job_dir(RetentionTier::Transient, id);
        if !dir_exists(&temp_dir).await {
            return Err(StoreError::NotFound { id: id.to_string() });
        }

        tokio::fs::rename(&temp_dir, &saved_dir)
            .await
            .map_err(|e| StoreError::io(&temp_dir, e))?;

        let metadata = saved_dir.join(METADATA_FILE);
        let mut job = load_snapshot(&metadata).await?;
        job.is_saved = true;
        let json = serde_json::to_vec_pretty(&job).map_err(|source| StoreError::Serialize {
            id: id.to_string(),
            source,
        })?;
        write_atomic(&metadata, &json).await?;

        info!("Job {}: promoted to permanent storage", id);
        Ok(job)
    }

    /// Remove every trace of `id` from both tiers.
    ///
    /// Returns `NotFound` when neither tier holds the job, including on a
    /// second delete of the same id.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        if !is_valid_id(id) {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        let mut deleted = self.deleted.lock().await;

        let mut removed = false;
        for tier in [RetentionTier::Permanent, RetentionTier::Transient] {
            let dir = self.job_dir(tier, id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&dir, e)),
            }
        }

        if !removed {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        deleted.insert(id.to_string());
        info!("Job {}: deleted", id);
        Ok(())
    }

    /// Stop refusing writes for a deleted `id`.
    ///
    /// Call once nothing can still write a late snapshot for it.
    pub async fn release(&self, id: &str) {
        if self.deleted.lock().await.remove(id) {
            debug!("Job {}: tombstone released", id);
        }
    }

    /// Remove whatever a failed ingest left behind for `id`.
    ///
    /// Unlike [`JobStore::delete`] this leaves no tombstone and treats an
    /// absent job as success.
    pub async fn discard(&self, id: &str) -> Result<(), StoreError> {
        if !is_valid_id(id) {
            return Ok(());
        }
        let _guard = self.deleted.lock().await;
        for tier in [RetentionTier::Permanent, RetentionTier::Transient] {
            let dir = self.job_dir(tier, id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!("Job {}: discarded {}", id, dir.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&dir, e)),
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn tombstones(&self) -> usize {
        self.deleted.lock().await.len()
    }

    /// Every stored job across both tiers, in no particular order.
    ///
    /// Unreadable or corrupt snapshots are logged and skipped. A job present
    /// in both tiers is only yielded once, from the permanent tier.
    pub fn list(&self) -> JobStream {
        let saved_root = RetentionTier::Permanent.root(&self.root);
        let entries = tier_entries(&self.root, RetentionTier::Permanent)
            .chain(tier_entries(&self.root, RetentionTier::Transient));

        let jobs = entries.filter_map(move |(tier, dir)| {
            let saved_root = saved_root.clone();
            async move {
                if tier == RetentionTier::Transient {
                    if let Some(name) = dir.file_name() {
                        if dir_exists(&saved_root.join(name)).await {
                            return None;
                        }
                    }
                }
                match load_snapshot(&dir.join(METADATA_FILE)).await {
                    Ok(job) => Some(job),
                    Err(StoreError::NotFound { .. }) => {
                        debug!("Skipping {}: no snapshot", dir.display());
                        None
                    }
                    Err(e) => {
                        warn!("Skipping unreadable job record: {}", e);
                        None
                    }
                }
            }
        });

        Box::pin(jobs)
    }
}

/// Directory entries of one tier, tagged with the tier.
fn tier_entries(
    root: &Path,
    tier: RetentionTier,
) -> impl Stream<Item = (RetentionTier, PathBuf)> + Send {
    let dir = tier.root(root);
    stream::once(async move {
        match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => Some(ReadDirStream::new(read_dir)),
            Err(e) => {
                warn!("Cannot list {}: {}", dir.display(), e);
                None
            }
        }
    })
    .filter_map(future::ready)
    .flatten()
    .filter_map(move |entry| {
        future::ready(match entry {
            Ok(entry) => Some((tier, entry.path())),
            Err(e) => {
                warn!("Skipping unreadable directory entry: {}", e);
                None
            }
        })
    })
}

/// Job ids are UUIDs; anything else cannot name a stored job (and must not
/// be joined onto a path).
fn is_valid_id(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

async fn dir_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn load_snapshot(path: &Path) -> Result<Job, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::NotFound {
                id: path.display().to_string(),
            })
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Write to `<path>.tmp`, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| StoreError::io(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ProcessingStatus;
    use tempfile::TempDir;

    async fn store() -> (TempDir, JobStore) {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn open_creates_both_tiers() {
        let (dir, _store) = store().await;
        assert!(dir.path().join("temp_storage").is_dir());
        assert!(dir.path().join("saved_storage").is_dir());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_dir, store) = store().await;
        let mut job = Job::new("deck.pdf", 2);
        job.cards[0].start();
        job.cards[0].complete("Front".into(), "Back".into());
        job.record_completion();
        job.cards[1].start();
        job.cards[1].fail("Page 2: rate limited");

        assert_eq!(store.put(&job).await.unwrap(), RetentionTier::Transient);
        let loaded = store.get(&job.id).await.unwrap();
        assert_eq!(loaded, job);
    }

    #[tokio::test]
    async fn put_leaves_no_temp_file() {
        let (dir, store) = store().await;
        let job = Job::new("deck.pdf", 1);
        store.put(&job).await.unwrap();
        let job_dir = dir.path().join("temp_storage").join(&job.id);
        assert!(job_dir.join(METADATA_FILE).is_file());
        assert!(!job_dir.join("metadata.json.tmp").exists());
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let (_dir, store) = store().await;
        let id = Uuid::new_v4().to_string();
        assert!(matches!(
            store.get(&id).await,
            Err(StoreError::NotFound { id: ref got }) if *got == id
        ));
        assert!(matches!(
            store.get("../../etc").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn permanent_copy_wins_over_stale_transient_copy() {
        let (dir, store) = store().await;
        let mut job = Job::new("deck.pdf", 1);
        store.put(&job).await.unwrap();
        store.promote(&job.id).await.unwrap();

        // Resurrect a stale transient copy behind the store's back.
        let stale_dir = dir.path().join("temp_storage").join(&job.id);
        std::fs::create_dir_all(&stale_dir).unwrap();
        job.status = ProcessingStatus::Failed;
        std::fs::write(
            stale_dir.join(METADATA_FILE),
            serde_json::to_vec(&job).unwrap(),
        )
        .unwrap();

        let loaded = store.get(&job.id).await.unwrap();
        assert!(loaded.is_saved);
        assert_eq!(loaded.status, ProcessingStatus::Pending);

        let listed: Vec<Job> = store.list().collect().await;
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_saved);
    }

    #[tokio::test]
    async fn promote_moves_snapshot_and_source() {
        let (dir, store) = store().await;
        let job = Job::new("deck.pdf", 1);
        store.put(&job).await.unwrap();
        store.put_source(&job.id, b"%PDF-1.7").await.unwrap();

        let promoted = store.promote(&job.id).await.unwrap();
        assert!(promoted.is_saved);
        assert_eq!(store.tier_of(&job.id).await, Some(RetentionTier::Permanent));
        assert!(!dir.path().join("temp_storage").join(&job.id).exists());
        assert_eq!(
            store.load_source(&job.id).await.unwrap().as_deref(),
            Some(&b"%PDF-1.7"[..])
        );
        assert!(store.get(&job.id).await.unwrap().is_saved);
    }

    #[tokio::test]
    async fn promote_twice_is_a_no_op() {
        let (dir, store) = store().await;
        let job = Job::new("deck.pdf", 1);
        store.put(&job).await.unwrap();
        let first = store.promote(&job.id).await.unwrap();

        let path = dir
            .path()
            .join("saved_storage")
            .join(&job.id)
            .join(METADATA_FILE);
        let before = std::fs::read(&path).unwrap();

        let second = store.promote(&job.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn promote_unknown_is_not_found() {
        let (_dir, store) = store().await;
        let id = Uuid::new_v4().to_string();
        assert!(matches!(
            store.promote(&id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn put_after_promotion_stays_permanent() {
        let (_dir, store) = store().await;
        let mut job = Job::new("deck.pdf", 1);
        store.put(&job).await.unwrap();
        store.promote(&job.id).await.unwrap();

        // An in-memory copy that predates the promotion.
        job.status = ProcessingStatus::Completed;
        assert_eq!(store.put(&job).await.unwrap(), RetentionTier::Permanent);
        let loaded = store.get(&job.id).await.unwrap();
        assert!(loaded.is_saved);
        assert_eq!(loaded.status, ProcessingStatus::Completed);
        assert_eq!(store.tier_of(&job.id).await, Some(RetentionTier::Permanent));
    }

    #[tokio::test]
    async fn delete_then_delete_again() {
        let (_dir, store) = store().await;
        let job = Job::new("deck.pdf", 1);
        store.put(&job).await.unwrap();

        store.delete(&job.id).await.unwrap();
        assert!(matches!(
            store.delete(&job.id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.get(&job.id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn deleted_job_is_not_resurrected_by_put() {
        let (_dir, store) = store().await;
        let job = Job::new("deck.pdf", 1);
        store.put(&job).await.unwrap();
        store.delete(&job.id).await.unwrap();

        assert!(store.put(&job).await.is_err());
        assert_eq!(store.tier_of(&job.id).await, None);
    }

    #[tokio::test]
    async fn released_id_can_be_written_again() {
        let (_dir, store) = store().await;
        let job = Job::new("deck.pdf", 1);
        store.put(&job).await.unwrap();
        store.delete(&job.id).await.unwrap();
        assert_eq!(store.tombstones().await, 1);

        store.release(&job.id).await;
        assert_eq!(store.tombstones().await, 0);
        assert_eq!(store.put(&job).await.unwrap(), RetentionTier::Transient);
    }

    #[tokio::test]
    async fn discard_leaves_no_tombstone() {
        let (_dir, store) = store().await;
        let job = Job::new("deck.pdf", 1);
        store.put(&job).await.unwrap();
        store.put_source(&job.id, b"%PDF").await.unwrap();

        store.discard(&job.id).await.unwrap();
        assert_eq!(store.tier_of(&job.id).await, None);
        assert_eq!(store.tombstones().await, 0);
        // Discarding nothing is fine.
        store.discard(&job.id).await.unwrap();
    }

    #[tokio::test]
    async fn list_skips_corrupt_records() {
        let (dir, store) = store().await;
        let a = Job::new("a.pdf", 1);
        let b = Job::new("b.pdf", 2);
        store.put(&a).await.unwrap();
        store.put(&b).await.unwrap();
        store.promote(&b.id).await.unwrap();

        let corrupt = dir.path().join("temp_storage").join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&corrupt).unwrap();
        std::fs::write(corrupt.join(METADATA_FILE), b"{not json").unwrap();
        std::fs::create_dir_all(dir.path().join("temp_storage").join("empty")).unwrap();

        let mut names: Vec<String> = store.list().map(|j| j.filename).collect().await;
        names.sort();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    }

    #[tokio::test]
    async fn load_source_of_missing_job_is_none() {
        let (_dir, store) = store().await;
        let id = Uuid::new_v4().to_string();
        assert_eq!(store.load_source(&id).await.unwrap(), None);
    }
}
