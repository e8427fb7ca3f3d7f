/// Replicate API backend
///
/// Each stage call is one prediction: create, poll until terminal, read the
/// output URL. Predictions abandoned mid-flight (timeout or cancellation) are
/// cancelled on the provider side.
use crate::config::{BackendConfig, ModelConfig, StageModel};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use storyboard::{ArtifactRef, GenerationInvoker, Stage, StoryboardError};

#[derive(Clone)]
pub struct ReplicateClient {
    api_key: String,
    api_base: String,
    poll_interval: Duration,
    client: reqwest::Client,
}

impl ReplicateClient {
    pub fn new(config: &BackendConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .replicate_api_token
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::configuration("Replicate backend requires REPLICATE_API_TOKEN"))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| ProviderError::configuration(format!("HTTP client: {err}")))?;
        Ok(Self {
            api_key,
            api_base: config.replicate_api_url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval(),
            client,
        })
    }

    fn auth(&self) -> String {
        format!("Token {}", self.api_key)
    }

    /// Starts a prediction. `owner/name:version` ids go through the versioned
    /// endpoint, bare `owner/name` ids through the model endpoint.
    pub async fn create_prediction(&self, model: &str, input: &Value) -> Result<Prediction, ProviderError> {
        let (url, body) = match model.split_once(':') {
            Some((_, version)) => (
                format!("{}/predictions", self.api_base),
                json!({ "version": version, "input": input }),
            ),
            None => (
                format!("{}/models/{}/predictions", self.api_base, model),
                json!({ "input": input }),
            ),
        };
        let response = self
            .client
            .post(url)
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await?;
        read_prediction(response).await
    }

    pub async fn get_prediction(&self, id: &str) -> Result<Prediction, ProviderError> {
        let response = self
            .client
            .get(format!("{}/predictions/{}", self.api_base, id))
            .header("Authorization", self.auth())
            .send()
            .await?;
        read_prediction(response).await
    }

    pub async fn cancel_prediction(&self, id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/predictions/{}/cancel", self.api_base, id))
            .header("Authorization", self.auth())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }
        Ok(())
    }

    /// Runs a prediction to completion and returns its output URL.
    pub async fn run(&self, model: &str, input: Value) -> Result<String, ProviderError> {
        let mut prediction = self.create_prediction(model, &input).await?;
        tracing::debug!(
            target: "replicate",
            "prediction {} created for {} ({})",
            prediction.id,
            model,
            prediction.status
        );
        let mut guard = CancelOnDrop::new(self.clone(), prediction.id.clone());

        while !prediction.is_terminal() {
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.get_prediction(&guard.id).await?;
            tracing::trace!(target: "replicate", "prediction {} is {}", prediction.id, prediction.status);
        }
        guard.disarm();

        match prediction.status.as_str() {
            "succeeded" => {
                if let Some(metrics) = &prediction.metrics {
                    tracing::debug!(
                        target: "replicate",
                        "prediction {} succeeded in {:?}s",
                        prediction.id,
                        metrics.predict_time
                    );
                }
                prediction.output_url().ok_or_else(|| {
                    ProviderError::invalid_response(format!(
                        "prediction {} succeeded without an output URL",
                        prediction.id
                    ))
                })
            }
            status => Err(ProviderError::Prediction {
                id: prediction.id.clone(),
                status: status.to_string(),
                message: prediction
                    .error
                    .as_ref()
                    .map(error_text)
                    .unwrap_or_else(|| "no error detail".to_string()),
            }),
        }
    }
}

async fn read_prediction(response: reqwest::Response) -> Result<Prediction, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::from_status(status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|err| ProviderError::invalid_response(format!("invalid prediction JSON: {err}")))
}

fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cancels the prediction when dropped while still armed.
struct CancelOnDrop {
    client: ReplicateClient,
    id: String,
    armed: bool,
}

impl CancelOnDrop {
    fn new(client: ReplicateClient, id: String) -> Self {
        Self {
            client,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let id = std::mem::take(&mut self.id);
        tracing::info!(target: "replicate", "cancelling abandoned prediction {id}");
        handle.spawn(async move {
            if let Err(err) = client.cancel_prediction(&id).await {
                tracing::warn!(target: "replicate", "failed to cancel prediction {id}: {err}");
            }
        });
    }
}

/// Prediction resource as returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub metrics: Option<PredictionMetrics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionMetrics {
    #[serde(default)]
    pub predict_time: Option<f64>,
}

impl Prediction {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    /// The output as a single URL: a string, or the first string of an array.
    pub fn output_url(&self) -> Option<String> {
        let url = match self.output.as_ref()? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(items) => items.iter().find_map(Value::as_str),
            _ => None,
        }?;
        let url = url.trim();
        (!url.is_empty()).then(|| url.to_string())
    }
}

/// [`GenerationInvoker`] backed by Replicate predictions.
pub struct ReplicateInvoker {
    client: ReplicateClient,
    models: ModelConfig,
}

impl ReplicateInvoker {
    pub fn new(config: &BackendConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: ReplicateClient::new(config)?,
            models: config.models.clone(),
        })
    }

    pub fn client(&self) -> &ReplicateClient {
        &self.client
    }

    async fn generate(&self, stage: Stage, input: Map<String, Value>) -> storyboard::Result<ArtifactRef> {
        let model = self.models.for_stage(stage);
        tracing::info!(target: "replicate", "{} prediction on {}", stage, model.model);
        let url = self
            .client
            .run(&model.model, Value::Object(stage_input(model, input)))
            .await
            .map_err(|err| err.into_remote(stage))?;
        ArtifactRef::new(url)
            .ok_or_else(|| StoryboardError::remote(stage, "provider returned an empty output"))
    }
}

/// Fixed per-model parameters merged with the per-call values.
pub fn stage_input(model: &StageModel, call: Map<String, Value>) -> Map<String, Value> {
    let mut input = model.params.clone();
    input.extend(call);
    input
}

fn fields<const N: usize>(pairs: [(&str, &str); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

#[async_trait]
impl GenerationInvoker for ReplicateInvoker {
    fn name(&self) -> &str {
        "Replicate"
    }

    async fn generate_image(&self, prompt: &str) -> storyboard::Result<ArtifactRef> {
        self.generate(Stage::Image, fields([("prompt", prompt)])).await
    }

    async fn generate_video(&self, prompt: &str, start_image: &ArtifactRef) -> storyboard::Result<ArtifactRef> {
        self.generate(
            Stage::Video,
            fields([("prompt", prompt), ("start_image", start_image.as_str())]),
        )
        .await
    }

    async fn generate_sound(&self, source_video: &ArtifactRef, prompt: &str) -> storyboard::Result<ArtifactRef> {
        self.generate(
            Stage::Sound,
            fields([
                ("caption", prompt),
                ("cot", prompt),
                ("video", source_video.as_str()),
            ]),
        )
        .await
    }
}
