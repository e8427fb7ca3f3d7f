//! Per-scene pipeline: `Empty -> ImageReady -> VideoReady -> SoundReady`.

use crate::error::{Result, StoryboardError};
use crate::invoker::{GenerationInvoker, StageRequest};
use crate::reset::reset_from;
use crate::scene::{Artifact, ArtifactRef, SceneRecord, Stage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Runner settings shared by single-scene and batch execution.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Upper bound on a single remote call, including queueing on the provider side.
    pub call_timeout: Duration,
    /// Maximum in-flight calls per batch; `None` dispatches every scene at once.
    pub max_concurrency: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(15 * 60),
            max_concurrency: None,
        }
    }
}

impl RunnerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }
}

/// Drives scene records through the stages, enforcing the gate before every call.
#[derive(Clone)]
pub struct PipelineRunner {
    invoker: Arc<dyn GenerationInvoker>,
    config: RunnerConfig,
}

impl PipelineRunner {
    pub fn new(invoker: Arc<dyn GenerationInvoker>) -> Self {
        Self {
            invoker,
            config: RunnerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn invoker(&self) -> &dyn GenerationInvoker {
        self.invoker.as_ref()
    }

    /// Issues one remote call under the configured timeout.
    pub async fn invoke(&self, request: &StageRequest) -> Result<ArtifactRef> {
        let timeout = self.config.call_timeout;
        match tokio::time::timeout(timeout, request.dispatch(self.invoker.as_ref())).await {
            Ok(result) => result,
            Err(_) => Err(StoryboardError::remote(
                request.stage(),
                format!("timed out after {timeout:?}"),
            )),
        }
    }

    /// Runs one stage for one scene. Fails with `Precondition` if the gate is
    /// closed or the stage already has an artifact.
    pub async fn run_stage(&self, record: &mut SceneRecord, stage: Stage) -> Result<ArtifactRef> {
        if record.is_done(stage) {
            return Err(StoryboardError::precondition(format!(
                "scene already has a {stage}; regenerate it instead"
            )));
        }
        let request = StageRequest::for_record(stage, record)?;
        info!(
            target: "storyboard",
            "generating {} for scene {} via {}",
            stage,
            record.id(),
            self.invoker.name()
        );
        let outcome = self.invoke(&request).await;
        apply_outcome(record, &request, outcome)
    }

    /// Invalidates `stage` (and everything downstream), then runs it again.
    pub async fn regenerate(&self, record: &mut SceneRecord, stage: Stage) -> Result<ArtifactRef> {
        reset_from(record, stage);
        self.run_stage(record, stage).await
    }

    /// Runs the remaining stages in order, stopping at the first failure.
    /// Artifacts produced before a failure are kept. Returns the sound artifact.
    pub async fn run_full(&self, record: &mut SceneRecord) -> Result<ArtifactRef> {
        for stage in Stage::ALL {
            if record.is_done(stage) {
                continue;
            }
            self.run_stage(record, stage).await?;
        }
        record
            .artifact_ref(Stage::Sound)
            .cloned()
            .ok_or_else(|| StoryboardError::precondition("pipeline ended without a sound"))
    }
}

/// Writes the result of a call back into its record: the artifact on success,
/// the failure marker otherwise.
pub(crate) fn apply_outcome(
    record: &mut SceneRecord,
    request: &StageRequest,
    outcome: Result<ArtifactRef>,
) -> Result<ArtifactRef> {
    let stage = request.stage();
    match outcome {
        Ok(reference) => {
            record.complete(
                stage,
                Artifact {
                    reference: reference.clone(),
                    prompt: request.prompt().to_string(),
                },
            )?;
            info!(target: "storyboard", "scene {} {} ready: {}", record.id(), stage, reference);
            Ok(reference)
        }
        Err(err) => {
            warn!(target: "storyboard", "scene {} {} failed: {}", record.id(), stage, err);
            record.record_failure(stage, err.to_string());
            Err(err)
        }
    }
}
