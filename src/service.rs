//! The text-completion seam used by the tagger.
//!
//! ## Why a trait instead of calling `LLMProvider` directly?
//!
//! The tagger only needs "send instructions plus text, get text back".
//! [`CompletionService`] states exactly that, which lets tests drive the
//! tagger with scripted fakes and keeps provider specifics (message layout,
//! token accounting, error classification) in [`LlmCompletionService`].

use crate::config::PipelineConfig;
use crate::error::ServiceError;
use crate::prompts::document_message;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One completion request: tagging instructions plus one chunk of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub document: String,
}

/// The service's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A remote text-completion endpoint.
///
/// Implementations classify their own failures into [`ServiceError`] so the
/// retry policy can tell transient from permanent errors.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Short label for logs and error messages.
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ServiceError>;
}

/// [`CompletionService`] backed by an edgequake-llm provider.
pub struct LlmCompletionService {
    provider: Arc<dyn LLMProvider>,
    label: String,
    temperature: f32,
    max_tokens: usize,
}

impl fmt::Debug for LlmCompletionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmCompletionService")
            .field("label", &self.label)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl LlmCompletionService {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            label: label.into(),
            temperature,
            max_tokens,
        }
    }

    /// Build the service from config, resolving the provider as described in
    /// [`resolve_provider`].
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ServiceError> {
        let (provider, label) = resolve_provider(config)?;
        Ok(Self::new(provider, label, config.temperature, config.max_tokens))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl CompletionService for LlmCompletionService {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ServiceError> {
        let messages = vec![
            ChatMessage::system(request.system_prompt.as_str()),
            ChatMessage::user(document_message(&request.document)),
        ];
        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| classify_failure(&self.label, &e))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );
        Ok(Completion {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Map a provider error onto the retry taxonomy.
///
/// Follows the provider's own retry strategy, except that an oversized
/// request is permanent: resending the same chunk cannot shrink it.
pub fn classify_failure(service: &str, error: &LlmError) -> ServiceError {
    let detail = error.to_string();
    match error {
        LlmError::TokenLimitExceeded { .. } => ServiceError::Rejected {
            service: service.to_string(),
            detail,
        },
        e if e.is_recoverable() => ServiceError::Unavailable {
            service: service.to_string(),
            detail,
        },
        _ => ServiceError::Rejected {
            service: service.to_string(),
            detail,
        },
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<(Arc<dyn LLMProvider>, String), ServiceError> {
    ProviderFactory::create_llm_provider(provider_name, model)
        .map(|p| (p, format!("{provider_name}/{model}")))
        .map_err(|e| ServiceError::NotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`): used as-is.
/// 2. **Named provider + model** (`config.provider_name`): created through
///    [`ProviderFactory::create_llm_provider`], which reads the matching API
///    key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    when both are set and non-empty.
/// 4. **`OPENAI_API_KEY`** present: OpenAI with the configured model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<(Arc<dyn LLMProvider>, String), ServiceError> {
    if let Some(ref provider) = config.provider {
        return Ok((Arc::clone(provider), "custom".to_string()));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| ServiceError::NotConfigured {
        provider: "auto".to_string(),
        hint: format!(
            "No LLM provider could be auto-detected from environment.\n\
            Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
            Error: {}",
            e
        ),
    })?;
    Ok((llm_provider, "auto".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_request_failures_are_permanent() {
        let failures = [
            LlmError::AuthError("Invalid API key".into()),
            LlmError::InvalidRequest("unknown parameter 'temprature'".into()),
            LlmError::ModelNotFound("gpt-9".into()),
            LlmError::TokenLimitExceeded { max: 128_000, got: 190_000 },
        ];
        for failure in failures {
            let e = classify_failure("openai", &failure);
            assert!(matches!(e, ServiceError::Rejected { .. }), "{failure} should be rejected");
            assert!(!e.is_retryable());
        }
    }

    #[test]
    fn server_and_network_failures_are_transient() {
        let failures = [
            LlmError::NetworkError("connection reset by peer".into()),
            LlmError::RateLimited("429 Too Many Requests".into()),
            LlmError::ApiError("503 Service Unavailable".into()),
            LlmError::Timeout,
        ];
        for failure in failures {
            let e = classify_failure("openai", &failure);
            assert!(e.is_retryable(), "{failure} should be retryable");
        }
    }

    #[test]
    fn classification_ignores_wording() {
        // A 400-ish message on a transient variant stays transient.
        let e = classify_failure("openai", &LlmError::NetworkError("HTTP 400 from proxy".into()));
        assert!(e.is_retryable());
        let e = classify_failure("openai", &LlmError::InvalidRequest("try again later".into()));
        assert!(!e.is_retryable());
    }
}
