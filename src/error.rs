//! Error types for the edgequake-flashcards library.
//!
//! Three layers of failure, each with its own type:
//!
//! * [`FlashcardError`]: **Fatal** for the operation that raised it: a job
//!   cannot be found, the store cannot be written, the input is not a PDF.
//!   Returned as `Err(FlashcardError)` from the [`crate::service::JobService`]
//!   lifecycle methods.
//!
//! * [`StoreError`]: durable read/write failures raised by
//!   [`crate::store::JobStore`]. Surfaced to the caller of ingest, promote and
//!   delete; logged (never raised) by background processing.
//!
//! * [`RenderError`] / [`AnalysisError`]: **Non-fatal**: one page failed but
//!   the rest of the job carries on. Their text ends up in the failed
//!   [`crate::job::WorkItem::error`] field.
//!
//! The executor's retry policy looks only at [`AnalysisError::kind`], never at
//! the message text, so adapters are responsible for classifying provider
//! failures when they build the error.

use std::path::PathBuf;
use thiserror::Error;

/// All operation-level errors returned by the edgequake-flashcards library.
#[derive(Debug, Error)]
pub enum FlashcardError {
    // ── Lookup errors ─────────────────────────────────────────────────────
    /// No job with this identifier exists in either retention tier.
    #[error("Job '{id}' not found")]
    NotFound { id: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The bytes handed to ingest are not a PDF document.
    #[error("'{name}' is not a valid PDF (first bytes: {magic:?}). Only PDF files are supported.")]
    InvalidDocument { name: String, magic: Vec<u8> },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Durable storage failed while serving the operation.
    #[error(transparent)]
    Store(StoreError),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Export errors ─────────────────────────────────────────────────────
    /// Building the vault archive failed.
    #[error("Failed to build export archive: {0}")]
    ExportFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for FlashcardError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { id } => FlashcardError::NotFound { id },
            other => FlashcardError::Store(other),
        }
    }
}

/// Durable storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record for this job in either tier.
    #[error("No stored record for job '{id}'")]
    NotFound { id: String },

    /// A filesystem operation failed.
    #[error("Storage I/O failed at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot exists but cannot be decoded.
    #[error("Stored job record '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// The in-memory job could not be encoded.
    #[error("Failed to serialise job '{id}': {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal failure turning one page into an image.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum RenderError {
    /// pdfium could not be bound or the document could not be opened.
    #[error("Page {page}: document could not be opened: {detail}")]
    DocumentUnreadable { page: usize, detail: String },

    /// The requested page does not exist.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium returned an error while rasterising.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The rendered bitmap could not be encoded as JPEG.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The blocking render task died.
    #[error("Page {page}: render task failed: {detail}")]
    TaskFailed { page: usize, detail: String },
}

/// Classification the executor's retry policy branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// The external service asked us to slow down; worth retrying.
    RateLimited,
    /// Anything else; retrying will not help.
    Other,
}

/// A non-fatal failure analysing one page image.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum AnalysisError {
    /// The provider throttled the request (HTTP 429 or equivalent).
    #[error("Page {page}: rate limited by the analysis service: {detail}")]
    RateLimited { page: usize, detail: String },

    /// The provider rejected or failed the request.
    #[error("Page {page}: analysis failed: {detail}")]
    Failed { page: usize, detail: String },

    /// The provider answered with nothing usable.
    #[error("Page {page}: empty response from model")]
    EmptyResponse { page: usize },

    /// The provider answered, but not with a `{front, back}` object.
    #[error("Page {page}: malformed response from model: {detail}")]
    MalformedResponse { page: usize, detail: String },

    /// The call did not finish within the configured timeout.
    #[error("Page {page}: analysis timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl AnalysisError {
    /// How the executor should treat this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            AnalysisError::RateLimited { .. } => FailureKind::RateLimited,
            _ => FailureKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_job_not_found() {
        let e: FlashcardError = StoreError::NotFound { id: "abc".into() }.into();
        assert!(matches!(e, FlashcardError::NotFound { ref id } if id == "abc"));
    }

    #[test]
    fn store_io_stays_a_store_error() {
        let e: FlashcardError = StoreError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        )
        .into();
        assert!(matches!(e, FlashcardError::Store(StoreError::Io { .. })));
        assert!(e.to_string().contains("/tmp/x"));
    }

    #[test]
    fn only_rate_limited_is_retryable() {
        let limited = AnalysisError::RateLimited {
            page: 2,
            detail: "429".into(),
        };
        assert_eq!(limited.kind(), FailureKind::RateLimited);

        let others = [
            AnalysisError::Failed {
                page: 2,
                detail: "429 mentioned in text but not throttled".into(),
            },
            AnalysisError::EmptyResponse { page: 2 },
            AnalysisError::MalformedResponse {
                page: 2,
                detail: "eof".into(),
            },
            AnalysisError::Timeout { page: 2, secs: 60 },
        ];
        for e in others {
            assert_eq!(e.kind(), FailureKind::Other, "{e}");
        }
    }

    #[test]
    fn render_error_display() {
        let e = RenderError::PageOutOfRange { page: 9, total: 3 };
        assert!(e.to_string().contains("Page 9"));
        assert!(e.to_string().contains("3 pages"));
    }
}
