//! Extraction client: free text -> TaskCandidate via the LLM

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::candidate::{TaskCandidate, ValidationError, parse_candidate};
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message};
use crate::prompts::PromptLoader;

/// Default response budget; a candidate is a few dozen tokens
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Errors from a single extraction attempt
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The provider was unreachable or answered with a failure status
    #[error("extraction service error{}: {message}", status.map(|s| format!(" {}", s)).unwrap_or_default())]
    Service { status: Option<u16>, message: String },

    /// The provider answered but the content did not fit the schema
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<LlmError> for ExtractionError {
    fn from(e: LlmError) -> Self {
        if e.is_service_failure() {
            ExtractionError::Service {
                status: e.status(),
                message: e.to_string(),
            }
        } else {
            ExtractionError::Validation(ValidationError::Envelope(e.to_string()))
        }
    }
}

/// Turns free-form task text into a validated candidate
///
/// One request per call, temperature 0, JSON response mode. No retries.
pub struct Extractor {
    llm: Arc<dyn LlmClient>,
    prompts: PromptLoader,
    max_tokens: u32,
}

impl Extractor {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: PromptLoader) -> Self {
        Self {
            llm,
            prompts,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Override the response token budget
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Build the completion request for the given text
    pub fn build_request(&self, text: &str) -> Result<CompletionRequest, ExtractionError> {
        let prompt_error = |e: eyre::Report| ExtractionError::Service {
            status: None,
            message: format!("prompt rendering failed: {}", e),
        };
        let system_prompt = self.prompts.system_prompt().map_err(prompt_error)?;
        let user_prompt = self.prompts.extract_prompt(text).map_err(prompt_error)?;

        Ok(CompletionRequest {
            system_prompt,
            messages: vec![Message::user(user_prompt)],
            max_tokens: self.max_tokens,
            temperature: Some(0.0),
            json_mode: true,
        })
    }

    /// Extract a task candidate from trimmed, non-empty text
    pub async fn extract(&self, text: &str) -> Result<TaskCandidate, ExtractionError> {
        debug!(text_len = text.len(), "extract: called");
        let request = self.build_request(text)?;

        let response = self.llm.complete(request).await.map_err(|e| {
            warn!(error = %e, "extract: completion failed");
            ExtractionError::from(e)
        })?;

        // A missing content field is treated as an empty object, which then
        // fails validation on the required title.
        let content = response.content.as_deref().unwrap_or("{}");
        let candidate = parse_candidate(content).inspect_err(|e| {
            info!(error = %e, "extract: model output rejected");
        })?;

        debug!(?candidate, "extract: candidate extracted");
        Ok(candidate)
    }
}
