//! External-capability adapters: document in, flashcards out.
//!
//! The job pipeline in [`crate::executor`] only sees the [`render::Renderer`]
//! and [`analyze::Analyzer`] traits. The modules here provide the production
//! implementations and the small pure helpers they share.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ analyze ──▶ postprocess
//! (URL/path)  (pdfium)  (JPEG/b64)  (VLM)      (JSON cleanup)
//! ```
//!
//! 1. [`input`] : read a local path or download a URL; `%PDF` files only
//! 2. [`render`]: rasterise one page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]: JPEG-encode each page, base64-wrap it for the request body
//! 4. [`analyze`]: one vision-model call per page, failures classified as
//!    rate-limited or not
//! 5. [`postprocess`]: strip fences and noise from the reply, tidy card text

pub mod analyze;
pub mod encode;
pub mod input;
pub mod postprocess;
pub mod render;
