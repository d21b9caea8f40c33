//! Page rendering: PDF bytes + 1-based page number → JPEG image.
//!
//! The [`Renderer`] trait is the seam the executor depends on; the
//! production implementation is [`PdfiumRenderer`]. Tests plug in fakes.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-bound. Every call is moved onto Tokio's blocking pool so
//! rendering a dense slide never stalls the async workers driving the
//! analysis requests of other pages.
//!
//! ## Why cap pixels, not DPI?
//!
//! Slide decks come in every physical size. `max_rendered_pixels` caps the
//! longest edge regardless, keeping memory bounded and matching the image
//! size vision models actually use (around 1,024–2,048 px).

use crate::config::PipelineConfig;
use crate::error::RenderError;
use crate::pipeline::encode;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns pages of a document into images.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Number of pages in `document`. Best effort: 0 when it cannot be read.
    async fn page_count(&self, document: Arc<[u8]>) -> usize;

    /// Render 1-based page `page_num` of `document` as JPEG bytes.
    async fn render_page(&self, document: Arc<[u8]>, page_num: usize)
        -> Result<Vec<u8>, RenderError>;
}

/// [`Renderer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    lib_path: Option<PathBuf>,
    max_pixels: u32,
    jpeg_quality: u8,
}

impl PdfiumRenderer {
    pub fn new(lib_path: Option<PathBuf>, max_pixels: u32, jpeg_quality: u8) -> Self {
        Self {
            lib_path,
            max_pixels,
            jpeg_quality,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.pdfium_lib_path.clone(),
            config.max_rendered_pixels,
            config.jpeg_quality,
        )
    }
}

#[async_trait]
impl Renderer for PdfiumRenderer {
    async fn page_count(&self, document: Arc<[u8]>) -> usize {
        let lib_path = self.lib_path.clone();
        tokio::task::spawn_blocking(move || page_count_blocking(&document, lib_path.as_deref()))
            .await
            .unwrap_or_else(|e| {
                warn!("Page-count task failed: {}", e);
                0
            })
    }

    async fn render_page(
        &self,
        document: Arc<[u8]>,
        page_num: usize,
    ) -> Result<Vec<u8>, RenderError> {
        let lib_path = self.lib_path.clone();
        let max_pixels = self.max_pixels;
        let quality = self.jpeg_quality;

        tokio::task::spawn_blocking(move || {
            render_page_blocking(&document, page_num, lib_path.as_deref(), max_pixels, quality)
        })
        .await
        .map_err(|e| RenderError::TaskFailed {
            page: page_num,
            detail: e.to_string(),
        })?
    }
}

/// Bind to an explicit pdfium library, or the system one.
fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, PdfiumError> {
    let bindings = match lib_path {
        Some(path) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))?,
        None => Pdfium::bind_to_system_library()?,
    };
    Ok(Pdfium::new(bindings))
}

fn page_count_blocking(document: &[u8], lib_path: Option<&Path>) -> usize {
    let pdfium = match bind_pdfium(lib_path) {
        Ok(p) => p,
        Err(e) => {
            warn!("Cannot bind pdfium for page count: {:?}", e);
            return 0;
        }
    };
    let count = match pdfium.load_pdf_from_byte_slice(document, None) {
        Ok(doc) => {
            let count = doc.pages().len() as usize;
            debug!("PDF loaded: {} pages", count);
            count
        }
        Err(e) => {
            warn!("Cannot read page count: {:?}", e);
            0
        }
    };
    count
}

fn render_page_blocking(
    document: &[u8],
    page_num: usize,
    lib_path: Option<&Path>,
    max_pixels: u32,
    jpeg_quality: u8,
) -> Result<Vec<u8>, RenderError> {
    let pdfium = bind_pdfium(lib_path).map_err(|e| RenderError::DocumentUnreadable {
        page: page_num,
        detail: format!("pdfium binding failed: {:?}", e),
    })?;

    let doc = pdfium
        .load_pdf_from_byte_slice(document, None)
        .map_err(|e| RenderError::DocumentUnreadable {
            page: page_num,
            detail: format!("{:?}", e),
        })?;

    let pages = doc.pages();
    let total = pages.len() as usize;
    if page_num == 0 || page_num > total {
        return Err(RenderError::PageOutOfRange {
            page: page_num,
            total,
        });
    }

    let page = pages
        .get((page_num - 1) as u16)
        .map_err(|e| RenderError::RasterisationFailed {
            page: page_num,
            detail: format!("{:?}", e),
        })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| RenderError::RasterisationFailed {
            page: page_num,
            detail: format!("{:?}", e),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_num,
        image.width(),
        image.height()
    );

    encode::encode_jpeg(&image, jpeg_quality).map_err(|e| RenderError::EncodeFailed {
        page: page_num,
        detail: e.to_string(),
    })
}
