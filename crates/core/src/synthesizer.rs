use crate::aggregator::AggregatedScores;
use crate::error::SynthesisError;
use crate::feedback::{FeedbackRecord, parse_feedback};
use crate::prompt::{
    DEFAULT_EXCERPT_CHARS, PromptContext, PromptTemplate, score_summary, transcript_excerpt,
};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_LANGUAGE: &str = "English";

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: String,
}

/// A text-in, text-out generative model.
///
/// `is_configured` must be answerable without a network call so that a
/// missing credential is caught before any request is made.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeedbackModel: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn generate(&self, prompt: &str) -> Result<String, SynthesisError>;
}

#[derive(Debug)]
pub struct ModelConfig {
    credential: Option<SecretString>,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            credential: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.4,
        }
    }
}

impl ModelConfig {
    /// A blank credential is treated as no credential.
    pub fn with_credential(mut self, credential: Option<&str>) -> Self {
        self.credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| SecretString::from(c.to_string()));
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Talks to any OpenAI-compatible `chat/completions` endpoint.
pub struct ChatCompletionsModel {
    client: Client,
    config: ModelConfig,
}

impl ChatCompletionsModel {
    pub fn new(config: ModelConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: ModelConfig, client: Client) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl FeedbackModel for ChatCompletionsModel {
    fn is_configured(&self) -> bool {
        self.config.has_credential()
    }

    async fn generate(&self, prompt: &str) -> Result<String, SynthesisError> {
        let Some(credential) = &self.config.credential else {
            return Err(SynthesisError::ModelUnavailable(
                "no API credential configured".to_string(),
            ));
        };

        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        });

        let resp = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(credential.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::Service(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(SynthesisError::Service(format!("{status}: {}", detail.trim())));
        }

        let resp = resp
            .json::<LlmResponse>()
            .await
            .map_err(|e| SynthesisError::Service(format!("unreadable response body: {e}")))?;

        resp.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| SynthesisError::Service("No response from LLM".to_string()))
    }
}

/// Builds the feedback prompt, makes one model call and parses the answer.
pub struct FeedbackSynthesizer {
    model: Arc<dyn FeedbackModel>,
    template: PromptTemplate,
    timeout: Duration,
    excerpt_chars: usize,
}

impl FeedbackSynthesizer {
    pub fn new(model: Arc<dyn FeedbackModel>) -> Self {
        Self {
            model,
            template: PromptTemplate::default(),
            timeout: DEFAULT_TIMEOUT,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_excerpt_chars(mut self, excerpt_chars: usize) -> Self {
        self.excerpt_chars = excerpt_chars;
        self
    }

    pub fn build_prompt(
        &self,
        transcript: Option<&str>,
        scores: &AggregatedScores,
        topic: &str,
        language: Option<&str>,
    ) -> String {
        let excerpt = transcript_excerpt(transcript, self.excerpt_chars);
        let summary = score_summary(scores);
        self.template.render(&PromptContext {
            topic,
            language: language.unwrap_or(DEFAULT_LANGUAGE),
            scores: &summary,
            transcript: &excerpt,
        })
    }

    /// Makes at most one model call. Every failure is returned to the caller
    /// as a [`SynthesisError`]; none of them is retried.
    pub async fn synthesize(
        &self,
        transcript: Option<&str>,
        scores: &AggregatedScores,
        topic: &str,
        language: Option<&str>,
    ) -> Result<FeedbackRecord, SynthesisError> {
        if !self.model.is_configured() {
            return Err(SynthesisError::ModelUnavailable(
                "no API credential configured".to_string(),
            ));
        }

        let prompt = self.build_prompt(transcript, scores, topic, language);
        tracing::debug!("Feedback prompt is {} chars", prompt.len());

        let raw = tokio::time::timeout(self.timeout, self.model.generate(&prompt))
            .await
            .map_err(|_| SynthesisError::Timeout(self.timeout))??;
        tracing::debug!("Model answered with {} chars", raw.len());

        parse_feedback(&raw)
    }
}
