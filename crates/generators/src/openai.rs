use crate::config::BackendConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use storyboard::{PlanRequest, StoryboardError, StoryboardPlanner};

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub organization: Option<String>,
    pub temperature: f32,
}

impl OpenAiConfig {
    pub fn from_backend(config: &BackendConfig) -> Self {
        Self {
            api_key: config.openai_api_key.clone().unwrap_or_default(),
            api_base: config.openai_api_url.trim_end_matches('/').to_string(),
            model: config.openai_model.clone(),
            organization: config.openai_organization.clone(),
            temperature: config.temperature,
        }
    }
}

/// Storyboard planner backed by the chat completions endpoint.
pub struct OpenAiPlanner {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiPlanner {
    pub fn new(config: OpenAiConfig, backend: &BackendConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::configuration(
                "OpenAI API key is required (set OPENAI_API_KEY).",
            ));
        }
        if config.model.trim().is_empty() {
            return Err(ProviderError::configuration("OpenAI model name is required."));
        }
        let client = reqwest::Client::builder()
            .timeout(backend.request_timeout())
            .build()
            .map_err(|err| ProviderError::configuration(format!("HTTP client: {err}")))?;
        Ok(Self { config, client })
    }

    pub fn from_backend(backend: &BackendConfig) -> Result<Self, ProviderError> {
        Self::new(OpenAiConfig::from_backend(backend), backend)
    }

    fn endpoint(&self) -> String {
        format!("{}/{CHAT_COMPLETIONS_PATH}", self.config.api_base)
    }

    async fn execute_chat(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let payload = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let start = Instant::now();
        tracing::info!(
            target: "planner",
            "OpenAI request start: model={}",
            self.config.model
        );
        let mut request = self
            .client
            .post(self.endpoint())
            .header("Accept", "application/json")
            .bearer_auth(&self.config.api_key)
            .json(&payload);
        if let Some(org) = self.config.organization.as_deref() {
            if !org.trim().is_empty() {
                request = request.header("OpenAI-Organization", org.trim());
            }
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }
        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|err| {
            ProviderError::invalid_response(format!("Invalid OpenAI response JSON: {err}"))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();
        tracing::info!(
            target: "planner",
            "OpenAI request completed in {:.2?} (input_tokens={:?}, output_tokens={:?})",
            start.elapsed(),
            parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            parsed.usage.as_ref().and_then(|u| u.completion_tokens)
        );
        Ok(content)
    }
}

#[async_trait]
impl StoryboardPlanner for OpenAiPlanner {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn plan(&self, request: &PlanRequest) -> storyboard::Result<String> {
        let content = self
            .execute_chat(&request.system_prompt(), &request.user_message())
            .await
            .map_err(ProviderError::into_planner)?;
        if content.trim().is_empty() {
            return Err(StoryboardError::malformed(
                "model returned an empty completion",
                &content,
            ));
        }
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: Option<ChatCompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}
