//! services/api/src/adapters/coach_llm.rs
//!
//! Adapter for the coach language model, implementing the `CoachModel` port
//! with an OpenAI-compatible chat-completions endpoint (a local Ollama `/v1`
//! deployment works as well as the hosted API). Every call is bounded by an
//! explicit timeout; callers fall back to deterministic text on any error.

use std::sync::OnceLock;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use posture_core::ports::{CoachModel, PortError, PortResult};
use regex::Regex;

const WEEKLY_SYSTEM_PROMPT: &str = "You are a data-aware posture and wellness assistant. Return \
exactly one practical weekly recommendation focused on either one exercise, one activity, or one \
diet action.";

const CHAT_SYSTEM_PROMPT: &str = "You are a neutral, general-purpose AI assistant.\n\
Answer the user's question directly, clearly, and without topic bias.\n\
If you are uncertain, say so instead of inventing details.";

/// A misconfigured local proxy answers with its own URL or an HTML error
/// page; both must be treated as model failures, not recommendations.
fn is_invalid_model_content(content: &str) -> bool {
    static LOCALHOST_URL_ONLY: OnceLock<Regex> = OnceLock::new();
    let localhost_only = LOCALHOST_URL_ONLY.get_or_init(|| {
        Regex::new(r"(?i)^https?://(?:localhost|127\.0\.0\.1)(?::\d+)?/?$").unwrap()
    });

    let trimmed = content.trim();
    if trimmed.is_empty() || localhost_only.is_match(trimmed) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    lower.starts_with("<!doctype html") || lower.starts_with("<html")
}

/// An adapter that implements `CoachModel` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiCoachAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiCoachAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String, timeout: Duration) -> Self {
        Self {
            client,
            model,
            timeout,
        }
    }

    async fn chat(&self, system_prompt: &str, user_message: &str) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_message)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                PortError::Unexpected(format!(
                    "coach model timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("coach model returned no text content".to_string())
            })?;

        if is_invalid_model_content(&content) {
            return Err(PortError::Unexpected(
                "coach model returned an invalid payload".to_string(),
            ));
        }
        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl CoachModel for OpenAiCoachAdapter {
    async fn weekly_recommendation(&self, prompt: &str) -> PortResult<String> {
        self.chat(WEEKLY_SYSTEM_PROMPT, prompt).await
    }

    async fn answer(&self, question: &str) -> PortResult<String> {
        self.chat(CHAT_SYSTEM_PROMPT, question).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_proxy_artifacts() {
        assert!(is_invalid_model_content(""));
        assert!(is_invalid_model_content("   "));
        assert!(is_invalid_model_content("http://localhost:11434"));
        assert!(is_invalid_model_content("HTTP://127.0.0.1/"));
        assert!(is_invalid_model_content("<!DOCTYPE html><html></html>"));
        assert!(is_invalid_model_content("<html><body>502</body></html>"));
    }

    #[test]
    fn accepts_ordinary_recommendations() {
        assert!(!is_invalid_model_content("Take a 20-minute walk after lunch."));
        assert!(!is_invalid_model_content(
            "Visit http://localhost:3000/dashboard for details."
        ));
    }
}
