//! Document input: a user-supplied path or URL → `(name, bytes)`.
//!
//! Jobs are content-addressed by id, not by path, so the whole document is
//! read into memory here and handed to ingest as bytes. Only `%PDF` files are
//! accepted; anything else is rejected before a job is created.

use crate::error::FlashcardError;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Magic bytes at the start of every PDF file.
const PDF_MAGIC: &[u8] = b"%PDF";

/// A document read from disk or downloaded, ready for ingest.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// File name shown in the job record (e.g. `lecture-03.pdf`).
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read a local PDF or download one from an HTTP(S) URL.
pub async fn load_document(input: &str, timeout_secs: u64) -> Result<LoadedDocument, FlashcardError> {
    let doc = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(Path::new(input)).await?
    };
    ensure_pdf(&doc.name, &doc.bytes)?;
    Ok(doc)
}

/// Reject bytes that do not start with `%PDF`.
pub fn ensure_pdf(name: &str, bytes: &[u8]) -> Result<(), FlashcardError> {
    if bytes.starts_with(PDF_MAGIC) {
        Ok(())
    } else {
        Err(FlashcardError::InvalidDocument {
            name: name.to_string(),
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        })
    }
}

async fn read_local(path: &Path) -> Result<LoadedDocument, FlashcardError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => FlashcardError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => FlashcardError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(LoadedDocument {
        name: file_name_of(path),
        bytes,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedDocument, FlashcardError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FlashcardError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_error = |e: reqwest::Error| {
        if e.is_timeout() {
            FlashcardError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            FlashcardError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(to_error)?;
    if !response.status().is_success() {
        return Err(FlashcardError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(to_error)?;
    info!("Downloaded {} bytes", bytes.len());

    Ok(LoadedDocument {
        name: filename_from_url(url),
        bytes: bytes.to_vec(),
    })
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string())
}

/// Last non-empty path segment of the URL, or `downloaded.pdf`.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
