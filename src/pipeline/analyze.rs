//! Slide analysis: page image → `{front, back}` flashcard via a vision model.
//!
//! [`Analyzer`] is the seam the executor calls; [`VisionAnalyzer`] is the
//! edgequake-llm implementation. The adapter owns failure classification:
//! provider rate-limit errors become [`AnalysisError::RateLimited`], every
//! other failure (timeouts, bad keys, empty or malformed replies) becomes a
//! non-retryable variant. The executor never inspects error text.
//!
//! Retrying is **not** done here; see [`crate::executor`]. The `attempt`
//! argument is informational (logging, and fakes in tests).

use crate::config::PipelineConfig;
use crate::error::{AnalysisError, FlashcardError};
use crate::pipeline::{encode, postprocess};
use crate::prompts::{page_prompt, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default model when nothing more specific is known.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// A vision-capable model known to produce usable cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub provider: &'static str,
    pub model: &'static str,
}

/// Known vision models. The first entry of each provider is its default.
pub const VISION_MODELS: &[ModelInfo] = &[
    ModelInfo { provider: "openai", model: "gpt-4.1-nano" },
    ModelInfo { provider: "openai", model: "gpt-4.1-mini" },
    ModelInfo { provider: "openai", model: "gpt-4.1" },
    ModelInfo { provider: "openai", model: "gpt-4o" },
    ModelInfo { provider: "anthropic", model: "claude-sonnet-4-20250514" },
    ModelInfo { provider: "anthropic", model: "claude-haiku-4-20250514" },
    ModelInfo { provider: "gemini", model: "gemini-2.0-flash" },
    ModelInfo { provider: "gemini", model: "gemini-2.5-pro" },
    ModelInfo { provider: "mistral", model: "pixtral-12b-2409" },
    ModelInfo { provider: "ollama", model: "llama3.2-vision" },
    ModelInfo { provider: "ollama", model: "llava" },
];

/// Known vision models, optionally only those of `provider`.
pub fn list_models(provider: Option<&str>) -> Vec<ModelInfo> {
    VISION_MODELS
        .iter()
        .filter(|m| provider.map_or(true, |p| m.provider.eq_ignore_ascii_case(p)))
        .copied()
        .collect()
}

/// Model used for `provider` when none is configured.
pub fn default_model_for(provider: &str) -> &'static str {
    list_models(Some(provider))
        .first()
        .map_or(DEFAULT_MODEL, |m| m.model)
}

/// The two sides of one flashcard.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CardContent {
    #[serde(default)]
    pub front: String,
    #[serde(default)]
    pub back: String,
}

/// Turns a page image into a flashcard.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyse the JPEG `image` of 1-based page `page_num`.
    ///
    /// `attempt` is 0 for the first call and increases by one per retry.
    async fn analyze(
        &self,
        image: &[u8],
        page_num: usize,
        attempt: u32,
    ) -> Result<CardContent, AnalysisError>;
}

/// [`Analyzer`] backed by an edgequake-llm vision provider.
pub struct VisionAnalyzer {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl VisionAnalyzer {
    /// Wrap an already-built provider.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from config and environment, then wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, FlashcardError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Analyzer for VisionAnalyzer {
    async fn analyze(
        &self,
        image: &[u8],
        page_num: usize,
        attempt: u32,
    ) -> Result<CardContent, AnalysisError> {
        let start = Instant::now();
        let text = page_prompt(page_num);
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(text.as_str(), vec![encode::to_image_data(image)]),
        ];
        let options = self.build_options();

        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| AnalysisError::Timeout {
                page: page_num,
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| classify_provider_error(page_num, e))?;

        debug!(
            "Page {}: attempt {} answered in {:?} ({} in / {} out tokens)",
            page_num,
            attempt + 1,
            start.elapsed(),
            response.prompt_tokens,
            response.completion_tokens
        );

        parse_card(page_num, &response.content)
    }
}

/// Map a provider error onto the retry classification.
fn classify_provider_error(page_num: usize, e: LlmError) -> AnalysisError {
    let detail = e.to_string();
    if matches!(e, LlmError::RateLimited { .. }) {
        AnalysisError::RateLimited {
            page: page_num,
            detail,
        }
    } else {
        AnalysisError::Failed {
            page: page_num,
            detail,
        }
    }
}

/// Parse a model reply into a card.
///
/// A reply with no JSON object, or with both sides blank, is an error: an
/// empty card is never recorded as a success.
pub fn parse_card(page_num: usize, raw: &str) -> Result<CardContent, AnalysisError> {
    let cleaned = postprocess::clean_model_reply(raw);
    if cleaned.is_empty() {
        return Err(AnalysisError::EmptyResponse { page: page_num });
    }

    let card: CardContent =
        serde_json::from_str(&cleaned).map_err(|e| AnalysisError::MalformedResponse {
            page: page_num,
            detail: e.to_string(),
        })?;

    let card = CardContent {
        front: postprocess::clean_card_text(&card.front),
        back: postprocess::clean_card_text(&card.back),
    };
    if card.front.is_empty() && card.back.is_empty() {
        return Err(AnalysisError::EmptyResponse { page: page_num });
    }
    Ok(card)
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`): used as-is.
/// 2. **Named provider + model** (`config.provider_name`, model defaulting
///    to [`default_model_for`]): built through
///    [`ProviderFactory::create_llm_provider`], which reads the matching API
///    key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **`OPENAI_API_KEY`** present → OpenAI with the configured or default model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, FlashcardError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model_for(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FlashcardError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, FlashcardError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FlashcardError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_catalogue() {
        assert_eq!(VISION_MODELS[0].model, DEFAULT_MODEL);
        assert_eq!(default_model_for("anthropic"), "claude-sonnet-4-20250514");
        assert_eq!(default_model_for("Mistral"), "pixtral-12b-2409");
        assert_eq!(default_model_for("azure"), DEFAULT_MODEL);

        let gemini = list_models(Some("gemini"));
        assert_eq!(gemini.len(), 2);
        assert!(gemini.iter().all(|m| m.provider == "gemini"));
        assert_eq!(list_models(None).len(), VISION_MODELS.len());
        assert!(list_models(Some("nope")).is_empty());
    }

    #[test]
    fn parse_plain_json() {
        let card = parse_card(1, r#"{"front": "Mitosis", "back": "- prophase\n- metaphase"}"#)
            .unwrap();
        assert_eq!(card.front, "Mitosis");
        assert_eq!(card.back, "- prophase\n- metaphase");
    }

    #[test]
    fn parse_fenced_json() {
        let card = parse_card(1, "```json\n{\"front\": \"Q\", \"back\": \"A\"}\n```").unwrap();
        assert_eq!(card, CardContent { front: "Q".into(), back: "A".into() });
    }

    #[test]
    fn missing_side_defaults_to_empty() {
        let card = parse_card(1, r#"{"front": "Only a front"}"#).unwrap();
        assert_eq!(card.back, "");
    }

    #[test]
    fn empty_reply_is_an_error() {
        assert!(matches!(
            parse_card(4, ""),
            Err(AnalysisError::EmptyResponse { page: 4 })
        ));
        assert!(matches!(
            parse_card(4, r#"{"front": " ", "back": ""}"#),
            Err(AnalysisError::EmptyResponse { page: 4 })
        ));
    }

    #[test]
    fn non_json_reply_is_malformed() {
        let err = parse_card(2, "I cannot read this slide.").unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedResponse { page: 2, .. }));
        assert_eq!(err.kind(), crate::error::FailureKind::Other);
    }
}
