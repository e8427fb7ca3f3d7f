//! Offline backends for `--mock` runs and tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use storyboard::{
    ArtifactFetcher, ArtifactRef, GenerationInvoker, PlanRequest, Stage, StoryboardError,
    StoryboardPlanner,
};
use uuid::Uuid;

pub const MOCK_SCHEME: &str = "mock://";

#[derive(Clone, Debug)]
pub struct MockConfig {
    pub scene_count: usize,
    /// Returned verbatim instead of a generated storyboard
    pub scripted_response: Option<String>,
    pub latency: Duration,
    pub failing_stages: HashSet<Stage>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            scene_count: 3,
            scripted_response: None,
            latency: Duration::from_millis(150),
            failing_stages: HashSet::new(),
        }
    }
}

pub struct MockPlanner {
    config: MockConfig,
}

impl MockPlanner {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoryboardPlanner for MockPlanner {
    fn name(&self) -> &str {
        "reelgen-mock-planner"
    }

    async fn plan(&self, request: &PlanRequest) -> storyboard::Result<String> {
        if let Some(raw) = &self.config.scripted_response {
            return Ok(raw.clone());
        }
        let concept = request.concept.trim();
        let scenes: Vec<_> = (1..=self.config.scene_count.max(1))
            .map(|n| {
                json!({
                    "scene": format!("Part {n} of the story about {concept}."),
                    "scene_image_prompt": format!("Cinematic vertical still, beat {n}: {concept}"),
                    "scene_video_prompt": format!("Slow push-in, beat {n}"),
                    "scene_sound_prompt": format!("Low ambient drone with a rising pulse, beat {n}"),
                })
            })
            .collect();
        Ok(json!({ "scenes": scenes }).to_string())
    }
}

/// Produces `mock://{stage}/{id}` references after a short delay.
pub struct MockInvoker {
    config: MockConfig,
    calls: AtomicUsize,
}

impl MockInvoker {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn produce(&self, stage: Stage) -> storyboard::Result<ArtifactRef> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        if self.config.failing_stages.contains(&stage) {
            return Err(StoryboardError::remote(stage, "mock backend configured to fail"));
        }
        ArtifactRef::new(format!("{MOCK_SCHEME}{stage}/{}", Uuid::new_v4()))
            .ok_or_else(|| StoryboardError::remote(stage, "empty mock reference"))
    }
}

#[async_trait]
impl GenerationInvoker for MockInvoker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_image(&self, _prompt: &str) -> storyboard::Result<ArtifactRef> {
        self.produce(Stage::Image).await
    }

    async fn generate_video(&self, _prompt: &str, _start_image: &ArtifactRef) -> storyboard::Result<ArtifactRef> {
        self.produce(Stage::Video).await
    }

    async fn generate_sound(&self, _source_video: &ArtifactRef, _prompt: &str) -> storyboard::Result<ArtifactRef> {
        self.produce(Stage::Sound).await
    }
}

/// Writes the reference itself as the artifact body.
pub struct MockFetcher;

#[async_trait]
impl ArtifactFetcher for MockFetcher {
    async fn fetch(&self, reference: &ArtifactRef) -> storyboard::Result<Vec<u8>> {
        Ok(reference.as_str().as_bytes().to_vec())
    }
}
