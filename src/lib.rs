//! # edgequake-flashcards
//!
//! Turn PDF lecture decks into study flashcards using Vision Language Models.
//!
//! Every page of a submitted deck becomes one work item. Pages are rendered
//! to JPEG, sent to a vision model under a process-wide concurrency cap, and
//! the `{front, back}` answers are collected into a job record that is
//! persisted as JSON and can be exported as an Obsidian vault.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Ingest    count pages, persist a Pending job + source (transient tier)
//!  ├─ 2. Execute   one task per page, bounded by the shared PageLimiter
//!  │     ├─ Render   pdfium → JPEG (spawn_blocking)
//!  │     └─ Analyze  vision model → {front, back}; 429s retried with backoff
//!  ├─ 3. Persist   final snapshot once every page has settled
//!  └─ 4. Promote / Export / Delete on operator request
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_flashcards::{JobService, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::builder().storage_dir("./cards").build()?;
//!     let service = JobService::from_config(config).await?;
//!
//!     let job = service
//!         .submit("week1.pdf", std::fs::read("week1.pdf")?)
//!         .await?;
//!     service.wait_idle().await;
//!
//!     for card in service.status(&job.id).await?.completed_cards() {
//!         println!("## {}\n{}\n", card.front, card.back);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2cards` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-flashcards = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod executor;
pub mod export;
pub mod ingest;
pub mod job;
pub mod limiter;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{AnalysisError, FailureKind, FlashcardError, RenderError, StoreError};
pub use executor::Executor;
pub use export::build_vault;
pub use ingest::IngestController;
pub use job::{Job, ProcessingStatus, WorkItem};
pub use limiter::{PageLimiter, PagePermit};
pub use pipeline::analyze::{list_models, Analyzer, CardContent, ModelInfo, VisionAnalyzer};
pub use pipeline::render::{PdfiumRenderer, Renderer};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use service::JobService;
pub use store::{JobStore, JobStream, RetentionTier};
