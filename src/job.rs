//! Job and work-item records.
//!
//! A [`Job`] is one submitted document; each page becomes a [`WorkItem`]
//! that ends up holding one flashcard (`front` / `back`). Both are plain
//! serde structs because the whole aggregate is persisted as a single JSON
//! snapshot by [`crate::store::JobStore`].
//!
//! ## Work-item state machine
//!
//! ```text
//! Pending ──▶ Processing ──▶ Completed
//!                        └──▶ Failed
//! ```
//!
//! Terminal states are final: a failed page is never re-queued. Rate-limit
//! retries happen inside a single `Processing` attempt, see
//! [`crate::executor`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Status shared by jobs and work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// `Completed` and `Failed` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

/// One page of a job and the flashcard produced from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Opaque identifier, unique within the job.
    pub id: String,
    /// 1-based page index in the source document.
    pub page_number: usize,
    /// Concept or question side of the card.
    pub front: String,
    /// Explanation side of the card.
    pub back: String,
    pub status: ProcessingStatus,
    /// Why the page failed; only set when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkItem {
    /// A fresh, empty item for `page_number`.
    pub fn pending(page_number: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            page_number,
            front: String::new(),
            back: String::new(),
            status: ProcessingStatus::Pending,
            error: None,
        }
    }

    /// `Pending → Processing`. Returns `false` (and changes nothing) from any
    /// other state.
    pub fn start(&mut self) -> bool {
        if self.status != ProcessingStatus::Pending {
            warn!(
                "Page {}: refusing to start from {:?}",
                self.page_number, self.status
            );
            return false;
        }
        self.status = ProcessingStatus::Processing;
        true
    }

    /// `Processing → Completed`, storing the card text.
    pub fn complete(&mut self, front: String, back: String) -> bool {
        if self.status != ProcessingStatus::Processing {
            warn!(
                "Page {}: refusing to complete from {:?}",
                self.page_number, self.status
            );
            return false;
        }
        self.front = front;
        self.back = back;
        self.error = None;
        self.status = ProcessingStatus::Completed;
        true
    }

    /// `Pending | Processing → Failed`, storing the reason.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            warn!(
                "Page {}: refusing to fail from {:?}",
                self.page_number, self.status
            );
            return false;
        }
        self.error = Some(error.into());
        self.status = ProcessingStatus::Failed;
        true
    }
}

/// The aggregate record for one submitted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Globally unique identifier (UUID v4).
    pub id: String,
    /// Name of the uploaded document, e.g. `lecture-03.pdf`.
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    /// Number of pages; fixed at ingest.
    pub total_slides: usize,
    /// Pages that reached `Completed`. Failed pages do not count.
    pub processed_slides: usize,
    /// One item per page, in page order.
    pub cards: Vec<WorkItem>,
    pub status: ProcessingStatus,
    /// Whether the job lives in the permanent retention tier.
    #[serde(default)]
    pub is_saved: bool,
}

impl Job {
    /// A new pending job with one pending item per page (`1..=page_count`).
    pub fn new(filename: impl Into<String>, page_count: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            upload_date: Utc::now(),
            total_slides: page_count,
            processed_slides: 0,
            cards: (1..=page_count).map(WorkItem::pending).collect(),
            status: ProcessingStatus::Pending,
            is_saved: false,
        }
    }

    /// Overall status implied by the item statuses.
    ///
    /// `Failed` is never derived: it is reserved for jobs that could not start
    /// at all and is set explicitly by the executor.
    pub fn derived_status(&self) -> ProcessingStatus {
        if self.cards.iter().all(|c| c.status.is_terminal()) {
            ProcessingStatus::Completed
        } else if self
            .cards
            .iter()
            .all(|c| c.status == ProcessingStatus::Pending)
        {
            ProcessingStatus::Pending
        } else {
            ProcessingStatus::Processing
        }
    }

    /// Bump the completed counter, never past `total_slides`.
    pub fn record_completion(&mut self) {
        if self.processed_slides < self.total_slides {
            self.processed_slides += 1;
        } else {
            warn!(
                "Job {}: completion counter already at {}",
                self.id, self.total_slides
            );
        }
    }

    /// Items that reached `Completed`, in page order.
    pub fn completed_cards(&self) -> impl Iterator<Item = &WorkItem> {
        self.cards
            .iter()
            .filter(|c| c.status == ProcessingStatus::Completed)
    }

    /// Mutable access to the item for `page_number`.
    pub fn card_mut(&mut self, page_number: usize) -> Option<&mut WorkItem> {
        self.cards.iter_mut().find(|c| c.page_number == page_number)
    }

    /// Immutable access to the item for `page_number`.
    pub fn card(&self, page_number: usize) -> Option<&WorkItem> {
        self.cards.iter().find(|c| c.page_number == page_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_has_one_pending_item_per_page() {
        let job = Job::new("deck.pdf", 4);
        assert_eq!(job.total_slides, 4);
        assert_eq!(job.cards.len(), 4);
        let pages: Vec<usize> = job.cards.iter().map(|c| c.page_number).collect();
        assert_eq!(pages, vec![1, 2, 3, 4]);
        assert!(job
            .cards
            .iter()
            .all(|c| c.status == ProcessingStatus::Pending));
        assert_eq!(job.status, ProcessingStatus::Pending);
        assert!(!job.is_saved);
    }

    #[test]
    fn item_ids_are_unique() {
        let job = Job::new("deck.pdf", 20);
        let mut ids: Vec<&str> = job.cards.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn terminal_items_never_go_back() {
        let mut item = WorkItem::pending(1);
        assert!(item.start());
        assert!(item.complete("Q".into(), "A".into()));
        assert!(!item.start());
        assert!(!item.fail("late error"));
        assert_eq!(item.status, ProcessingStatus::Completed);
        assert_eq!(item.error, None);

        let mut failed = WorkItem::pending(2);
        assert!(failed.start());
        assert!(failed.fail("boom"));
        assert!(!failed.complete("Q".into(), "A".into()));
        assert_eq!(failed.status, ProcessingStatus::Failed);
        assert_eq!(failed.front, "");
    }

    #[test]
    fn complete_requires_processing() {
        let mut item = WorkItem::pending(1);
        assert!(!item.complete("Q".into(), "A".into()));
        assert_eq!(item.status, ProcessingStatus::Pending);
    }

    #[test]
    fn derived_status_follows_items() {
        let mut job = Job::new("deck.pdf", 2);
        assert_eq!(job.derived_status(), ProcessingStatus::Pending);

        job.cards[0].start();
        assert_eq!(job.derived_status(), ProcessingStatus::Processing);

        job.cards[0].fail("nope");
        assert_eq!(job.derived_status(), ProcessingStatus::Processing);

        job.cards[1].start();
        job.cards[1].fail("nope");
        // Every page failed, but there is no work left: still Completed.
        assert_eq!(job.derived_status(), ProcessingStatus::Completed);
    }

    #[test]
    fn counter_is_capped_at_total() {
        let mut job = Job::new("deck.pdf", 1);
        job.record_completion();
        job.record_completion();
        assert_eq!(job.processed_slides, 1);
    }

    #[test]
    fn status_serialises_lowercase() {
        let json = serde_json::to_string(&ProcessingStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut job = Job::new("deck.pdf", 2);
        job.cards[0].start();
        job.cards[0].complete("Front".into(), "- back".into());
        job.record_completion();
        job.cards[1].start();
        job.cards[1].fail("Page 2: rate limited");

        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }
}
