//! Configuration types for the flashcard job pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. One struct is shared by the store, the
//! executor and the capability adapters, so two runs can be compared by
//! diffing their configs.

use crate::error::FlashcardError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for ingesting and processing flashcard jobs.
///
/// # Example
/// ```rust
/// use edgequake_flashcards::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .storage_dir("/var/lib/flashcards")
///     .concurrency(3)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root directory holding `temp_storage/` and `saved_storage/`. Default: `.`
    pub storage_dir: PathBuf,

    /// Capacity of the process-wide limiter on in-flight pages. Default: 3.
    ///
    /// The analysis API enforces a request-rate ceiling; keeping only a few
    /// requests in flight avoids throttling in the first place instead of
    /// leaning on backoff.
    pub concurrency: usize,

    /// Retries after a rate-limited analysis call. Default: 3 (4 attempts).
    pub max_retries: u32,

    /// Time unit of the backoff curve `2^attempt + 0.1 * attempt`. Default: 1 s.
    ///
    /// Waits are 1 s → 2.1 s → 4.2 s with the default unit.
    pub retry_backoff_unit: Duration,

    /// Longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// JPEG quality of rendered pages, 1–100. Default: 85.
    pub jpeg_quality: u8,

    /// LLM model identifier, e.g. "gpt-4.1-nano", "gemini-2.5-flash".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.3.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per card. Default: 1024.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses the built-in flashcard prompt.
    pub system_prompt: Option<String>,

    /// Per-analysis-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Explicit pdfium shared library location. If None, the system library
    /// is used.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("."),
            concurrency: 3,
            max_retries: 3,
            retry_backoff_unit: Duration::from_secs(1),
            max_rendered_pixels: 2000,
            jpeg_quality: 85,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.3,
            max_tokens: 1024,
            system_prompt: None,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            pdfium_lib_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("storage_dir", &self.storage_dir)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_unit", &self.retry_backoff_unit)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Wait before retry number `attempt + 1`: `unit * (2^attempt + 0.1 * attempt)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt as i32) + 0.1 * f64::from(attempt);
        self.retry_backoff_unit.mul_f64(factor)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_unit(mut self, unit: Duration) -> Self {
        self.config.retry_backoff_unit = unit;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, FlashcardError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(FlashcardError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.storage_dir.as_os_str().is_empty() {
            return Err(FlashcardError::InvalidConfig(
                "Storage directory must not be empty".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(FlashcardError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
