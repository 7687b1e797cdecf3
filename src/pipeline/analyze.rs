//! Vision analysis: send all page images to a multimodal model in one call.
//!
//! ## Message Layout
//!
//! A single user message carries, in order:
//! 1. the instruction text (plus a page-count line for multi-page documents)
//! 2. every page image, in page order, as a base64 attachment
//!
//! There is no retry here. A failed call fails the job; redelivery is the
//! dispatcher's decision, and only for faults that left the record
//! non-terminal.

use super::encode::encode_page;
use super::pages::PageImage;
use super::postprocess::clean_result;
use crate::config::AnalyzerConfig;
use crate::error::{AnalysisError, JobError};
use crate::prompts::page_context;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Turns ordered page images plus an instruction into descriptive text.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Returns non-empty, cleaned text.
    async fn analyze(&self, pages: &[PageImage], instruction: &str)
        -> Result<String, AnalysisError>;
}

/// [`VisionAnalyzer`] backed by an `edgequake_llm` provider.
pub struct LlmVisionAnalyzer {
    provider: Arc<dyn LLMProvider>,
    config: AnalyzerConfig,
}

impl LlmVisionAnalyzer {
    /// Wrap a pre-built provider. `config` still supplies sampling options
    /// and the timeout; its provider/model names are ignored.
    pub fn new(provider: Arc<dyn LLMProvider>, config: AnalyzerConfig) -> Self {
        Self { provider, config }
    }

    /// Build the provider named by `config`, reading its credential from the
    /// process environment.
    pub fn from_config(config: AnalyzerConfig) -> Result<Self, JobError> {
        Self::from_config_with(config, |var| std::env::var(var).ok())
    }

    /// As [`Self::from_config`], with an explicit credential lookup.
    ///
    /// Fails with [`JobError::InvalidConfig`] when the provider needs a
    /// credential and `lookup` has none, so a misconfigured worker refuses to
    /// start instead of failing every job.
    pub fn from_config_with<F>(config: AnalyzerConfig, lookup: F) -> Result<Self, JobError>
    where
        F: Fn(&str) -> Option<String>,
    {
        config.validate()?;
        if let Some(var) = config.credential_var() {
            let present = lookup(var).is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(JobError::InvalidConfig(format!(
                    "{} is not set (required by provider '{}')",
                    var, config.provider
                )));
            }
        }

        let provider = ProviderFactory::create_llm_provider(&config.provider, &config.model)
            .map_err(|e| AnalysisError::ProviderNotConfigured {
                provider: config.provider.clone(),
                hint: format!("{e}"),
            })?;
        info!(
            "Vision analyzer: provider={}, model={}",
            config.provider, config.model
        );
        Ok(Self { provider, config })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }
}

/// Build `CompletionOptions` from the analyzer config.
fn build_options(config: &AnalyzerConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Instruction text plus the page-count hint, if any.
fn request_text(instruction: &str, page_count: usize) -> String {
    match page_context(page_count) {
        Some(ctx) => format!("{instruction}{ctx}"),
        None => instruction.to_string(),
    }
}

#[async_trait]
impl VisionAnalyzer for LlmVisionAnalyzer {
    async fn analyze(
        &self,
        pages: &[PageImage],
        instruction: &str,
    ) -> Result<String, AnalysisError> {
        if pages.is_empty() {
            return Err(AnalysisError::NoImages);
        }

        let mut images = Vec::with_capacity(pages.len());
        for page in pages {
            images.push(encode_page(page).await?);
        }

        let messages = vec![ChatMessage::user_with_images(
            &request_text(instruction, pages.len()),
            images,
        )];
        let options = build_options(&self.config);

        let start = Instant::now();
        let secs = self.config.timeout_secs;
        let response = match tokio::time::timeout(
            Duration::from_secs(secs),
            self.provider.chat(&messages, Some(&options)),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Vision call failed: {}", e);
                return Err(AnalysisError::Api {
                    message: format!("{}", e),
                });
            }
            Err(_) => {
                warn!("Vision call timed out after {}s", secs);
                return Err(AnalysisError::Timeout { secs });
            }
        };

        debug!(
            "Vision call: {} pages, {} input tokens, {} output tokens, {:?}",
            pages.len(),
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        clean_result(&response.content).ok_or(AnalysisError::EmptyResponse { pages: pages.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_from_config() {
        let opts = build_options(&AnalyzerConfig::default());
        assert_eq!(opts.temperature, Some(0.7));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn missing_credential_fails_fast() {
        let result = LlmVisionAnalyzer::from_config_with(AnalyzerConfig::default(), |_| None);
        match result {
            Err(JobError::InvalidConfig(msg)) => assert!(msg.contains("OPENAI_API_KEY")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("analyzer built without a credential"),
        }
    }

    #[test]
    fn blank_credential_counts_as_missing() {
        let config = AnalyzerConfig {
            provider: "anthropic".into(),
            model: "claude-sonnet-4".into(),
            ..Default::default()
        };
        let result = LlmVisionAnalyzer::from_config_with(config, |_| Some("  ".into()));
        assert!(matches!(result, Err(JobError::InvalidConfig(_))));
    }

    #[test]
    fn invalid_config_is_rejected_before_credentials() {
        let config = AnalyzerConfig {
            temperature: 5.0,
            ..Default::default()
        };
        let result = LlmVisionAnalyzer::from_config_with(config, |_| Some("sk-test".into()));
        match result {
            Err(JobError::InvalidConfig(msg)) => assert!(msg.contains("temperature")),
            _ => panic!("expected InvalidConfig"),
        }
    }

    #[test]
    fn request_text_adds_page_context() {
        assert_eq!(request_text("Roast this", 1), "Roast this");
        let multi = request_text("Roast this\n\n", 2);
        assert!(multi.starts_with("Roast this\n\n"));
        assert!(multi.contains("2 pages"));
    }
}
