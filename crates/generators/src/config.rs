/// Backend configuration
///
/// Credentials, model identifiers and timing for the remote backends. Loaded
/// from JSON, then overlaid with environment variables (and `.env`).
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use storyboard::{RunnerConfig, Stage};

pub const ENV_REPLICATE_TOKEN: &str = "REPLICATE_API_TOKEN";
pub const ENV_OPENAI_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const ENV_OUTPUT_DIR: &str = "REELGEN_OUTPUT_DIR";

pub const DEFAULT_REPLICATE_API: &str = "https://api.replicate.com/v1";
pub const DEFAULT_OPENAI_API: &str = "https://api.openai.com/v1";

/// A Replicate model plus the fixed inputs sent with every prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageModel {
    /// `owner/name` or `owner/name:version`
    pub model: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl StageModel {
    fn new(model: &str, params: Value) -> Self {
        Self {
            model: model.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub image: StageModel,
    pub video: StageModel,
    pub sound: StageModel,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            image: StageModel::new(
                "bytedance/seedream-3",
                json!({
                    "aspect_ratio": "9:16",
                    "safety_filter_level": "block_medium_and_above",
                    "size": "big",
                    "guidance_scale": 2.5
                }),
            ),
            video: StageModel::new("kwaivgi/kling-v2.1", json!({ "mode": "pro" })),
            sound: StageModel::new(
                "zsxkib/thinksound:40d08f9f569e91a5d72f6795ebed75178c185b0434699a98c07fc5f566efb2d4",
                json!({ "cfg": 5, "num_inference_steps": 24 }),
            ),
        }
    }
}

impl ModelConfig {
    pub fn for_stage(&self, stage: Stage) -> &StageModel {
        match stage {
            Stage::Image => &self.image,
            Stage::Video => &self.video,
            Stage::Sound => &self.sound,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicate_api_token: Option<String>,
    pub replicate_api_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    pub openai_api_url: String,
    pub openai_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_organization: Option<String>,
    pub temperature: f32,

    /// Base directory for saved projects
    pub output_dir: PathBuf,

    pub models: ModelConfig,

    /// Delay between prediction status polls
    pub poll_interval_ms: u64,

    /// Upper bound for one stage call, queueing included
    pub timeout_secs: u64,

    /// Upper bound for a single HTTP request
    pub request_timeout_secs: u64,

    /// Maximum in-flight generation calls per batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            replicate_api_token: None,
            replicate_api_url: DEFAULT_REPLICATE_API.to_string(),
            openai_api_key: None,
            openai_api_url: DEFAULT_OPENAI_API.to_string(),
            openai_model: "gpt-4o".to_string(),
            openai_organization: None,
            temperature: 0.7,
            output_dir: PathBuf::from(storyboard::persist::DEFAULT_OUTPUT_DIR),
            models: ModelConfig::default(),
            poll_interval_ms: 1000,
            timeout_secs: 15 * 60,
            request_timeout_secs: 60,
            max_concurrency: None,
        }
    }
}

impl BackendConfig {
    /// Defaults overlaid with the process environment, after loading `.env`.
    pub fn from_env() -> Self {
        load_dotenv();
        Self::default().apply_env()
    }

    pub fn apply_env(self) -> Self {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlays non-empty values returned by `lookup`.
    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = get(ENV_REPLICATE_TOKEN) {
            self.replicate_api_token = Some(token);
        }
        if let Some(key) = get(ENV_OPENAI_KEY) {
            self.openai_api_key = Some(key);
        }
        if let Some(model) = get(ENV_OPENAI_MODEL) {
            self.openai_model = model;
        }
        if let Some(dir) = get(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn with_replicate_token(mut self, token: impl Into<String>) -> Self {
        self.replicate_api_token = Some(token.into());
        self
    }

    pub fn with_replicate_url(mut self, url: impl Into<String>) -> Self {
        self.replicate_api_url = url.into();
        self
    }

    pub fn with_openai_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    pub fn with_openai_url(mut self, url: impl Into<String>) -> Self {
        self.openai_api_url = url.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        let config = RunnerConfig::default().with_timeout(Duration::from_secs(self.timeout_secs));
        match self.max_concurrency {
            Some(max) => config.with_max_concurrency(max),
            None => config,
        }
    }

    /// Save configuration to JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Load configuration from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }
}

/// Loads `.env` from the working directory or its parents, if present.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("loaded environment from {}", path.display()),
        Err(err) if err.not_found() => {}
        Err(err) => tracing::warn!("ignoring unreadable .env: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_stage_models() {
        let config = BackendConfig::default();
        assert_eq!(config.models.image.model, "bytedance/seedream-3");
        assert_eq!(config.models.image.params["aspect_ratio"], "9:16");
        assert_eq!(config.models.video.params["mode"], "pro");
        assert_eq!(config.models.sound.params["num_inference_steps"], 24);
        assert_eq!(config.openai_model, "gpt-4o");
        assert_eq!(config.output_dir, PathBuf::from("final_videos"));
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            (ENV_REPLICATE_TOKEN, "r8_token"),
            (ENV_OPENAI_KEY, "sk-test"),
            (ENV_OPENAI_MODEL, "  "),
            (ENV_OUTPUT_DIR, "/tmp/reels"),
        ]
        .into_iter()
        .collect();
        let config = BackendConfig::default()
            .apply_env_with(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.replicate_api_token.as_deref(), Some("r8_token"));
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.openai_model, "gpt-4o");
        assert_eq!(config.output_dir, PathBuf::from("/tmp/reels"));
    }

    #[test]
    fn test_runner_config() {
        let runner = BackendConfig::default()
            .with_timeout(30)
            .with_max_concurrency(0)
            .runner_config();
        assert_eq!(runner.call_timeout, Duration::from_secs(30));
        assert_eq!(runner.max_concurrency, Some(1));
    }

    #[test]
    fn test_save_load_roundtrip_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reelgen.json");
        let mut config = BackendConfig::default().with_poll_interval(Duration::from_millis(250));
        config.models.video.model = "kwaivgi/kling-v2.1-pro".to_string();
        config.save(&path).unwrap();

        let loaded = BackendConfig::load(&path).unwrap();
        assert_eq!(loaded.poll_interval_ms, 250);
        assert_eq!(loaded.models.video.model, "kwaivgi/kling-v2.1-pro");
        assert!(loaded.replicate_api_token.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"timeout_secs": 120}"#).unwrap();
        let loaded = BackendConfig::load(&path).unwrap();
        assert_eq!(loaded.timeout_secs, 120);
        assert_eq!(loaded.models, ModelConfig::default());
    }
}
