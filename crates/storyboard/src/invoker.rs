use crate::error::{Result, StoryboardError};
use crate::gate;
use crate::scene::{ArtifactRef, SceneRecord, Stage};
use async_trait::async_trait;

/// One remote call per stage. Implementations are at-most-once: they must
/// not retry on their own.
#[async_trait]
pub trait GenerationInvoker: Send + Sync {
    /// Backend name, for logging.
    fn name(&self) -> &str;

    /// Generate a still image from a prompt.
    async fn generate_image(&self, prompt: &str) -> Result<ArtifactRef>;

    /// Animate a previously generated image.
    async fn generate_video(&self, prompt: &str, start_image: &ArtifactRef) -> Result<ArtifactRef>;

    /// Add a soundtrack to a previously generated video.
    async fn generate_sound(&self, source_video: &ArtifactRef, prompt: &str)
        -> Result<ArtifactRef>;
}

/// Inputs of one stage invocation, snapshotted from a record so the call can
/// run without borrowing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageRequest {
    Image {
        prompt: String,
    },
    Video {
        prompt: String,
        start_image: ArtifactRef,
    },
    Sound {
        source_video: ArtifactRef,
        prompt: String,
    },
}

impl StageRequest {
    /// Builds the request for `stage`, refusing if the gate is closed.
    pub fn for_record(stage: Stage, record: &SceneRecord) -> Result<Self> {
        gate::check(stage, record)?;
        let prompt = record.prompt(stage).to_string();
        let upstream = |s: Stage| {
            record.artifact_ref(s).cloned().ok_or_else(|| {
                StoryboardError::precondition(format!("scene has no {s} to build on"))
            })
        };
        Ok(match stage {
            Stage::Image => StageRequest::Image { prompt },
            Stage::Video => StageRequest::Video {
                prompt,
                start_image: upstream(Stage::Image)?,
            },
            Stage::Sound => StageRequest::Sound {
                source_video: upstream(Stage::Video)?,
                prompt,
            },
        })
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageRequest::Image { .. } => Stage::Image,
            StageRequest::Video { .. } => Stage::Video,
            StageRequest::Sound { .. } => Stage::Sound,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            StageRequest::Image { prompt }
            | StageRequest::Video { prompt, .. }
            | StageRequest::Sound { prompt, .. } => prompt,
        }
    }

    pub async fn dispatch(&self, invoker: &dyn GenerationInvoker) -> Result<ArtifactRef> {
        match self {
            StageRequest::Image { prompt } => invoker.generate_image(prompt).await,
            StageRequest::Video {
                prompt,
                start_image,
            } => invoker.generate_video(prompt, start_image).await,
            StageRequest::Sound {
                source_video,
                prompt,
            } => invoker.generate_sound(source_video, prompt).await,
        }
    }
}
