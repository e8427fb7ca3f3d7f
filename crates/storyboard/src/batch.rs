//! Batch orchestration: one stage (or the whole pipeline) across every scene.
//!
//! Calls run concurrently from snapshotted inputs; results are written back by
//! the owning caller, matched to their scene by id rather than completion order.

use crate::cancel::CancelSignal;
use crate::error::{Result, StoryboardError};
use crate::gate;
use crate::invoker::StageRequest;
use crate::runner::{apply_outcome, PipelineRunner};
use crate::scene::{ArtifactRef, SceneId, Stage};
use crate::story::Story;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeeded(ArtifactRef),
    /// The stage was already done; nothing was dispatched.
    Skipped,
    Failed(StoryboardError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SceneOutcome {
    pub index: usize,
    pub scene_id: SceneId,
    pub outcome: Outcome,
}

/// Per-scene results of a batch, in story order.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    /// `None` for full-pipeline batches.
    pub stage: Option<Stage>,
    pub outcomes: Vec<SceneOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Succeeded(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&SceneOutcome, &StoryboardError)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Failed(err) => Some((o, err)),
            _ => None,
        })
    }

    pub fn outcome_for(&self, id: SceneId) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.scene_id == id)
            .map(|o| &o.outcome)
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}

pub struct BatchOrchestrator {
    runner: PipelineRunner,
}

impl BatchOrchestrator {
    pub fn new(runner: PipelineRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &PipelineRunner {
        &self.runner
    }

    /// Rejects a stage batch if any scene lacks the prerequisite. Nothing is
    /// dispatched for a partially eligible story.
    pub fn check_batch(story: &Story, stage: Stage) -> Result<()> {
        let blocked: Vec<String> = story
            .scenes()
            .iter()
            .enumerate()
            .filter(|(_, record)| !gate::can_run(stage, record))
            .map(|(index, _)| (index + 1).to_string())
            .collect();
        if blocked.is_empty() {
            return Ok(());
        }
        let missing = stage.prerequisite().map(|s| s.as_str()).unwrap_or("prerequisite");
        Err(StoryboardError::precondition(format!(
            "cannot start {stage} batch: scene(s) {} have no {missing} yet ({}/{} ready)",
            blocked.join(", "),
            story.len() - blocked.len(),
            story.len()
        )))
    }

    pub async fn run_all(&self, story: &mut Story, stage: Stage) -> Result<BatchReport> {
        self.run_all_with(story, stage, &CancelSignal::never()).await
    }

    /// Runs `stage` for every scene that does not have it yet. One scene's
    /// failure never cancels or blocks the others.
    pub async fn run_all_with(
        &self,
        story: &mut Story,
        stage: Stage,
        cancel: &CancelSignal,
    ) -> Result<BatchReport> {
        Self::check_batch(story, stage)?;

        let mut outcomes = Vec::with_capacity(story.len());
        let mut pending = Vec::new();
        for (index, record) in story.scenes().iter().enumerate() {
            if record.is_done(stage) {
                outcomes.push(SceneOutcome {
                    index,
                    scene_id: record.id(),
                    outcome: Outcome::Skipped,
                });
            } else {
                pending.push((index, record.id(), StageRequest::for_record(stage, record)?));
            }
        }

        info!(
            target: "storyboard",
            "{} batch: dispatching {} call(s), {} already done",
            stage,
            pending.len(),
            outcomes.len()
        );

        let limit = self
            .runner
            .config()
            .max_concurrency
            .unwrap_or(pending.len())
            .max(1);
        let runner = &self.runner;
        let results: Vec<_> = stream::iter(pending)
            .map(|(index, id, request)| async move {
                let result = cancel.guard(runner.invoke(&request)).await;
                (index, id, request, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        for (index, id, request, result) in results {
            let outcome = match story.find_mut(id) {
                Some(record) => match apply_outcome(record, &request, result) {
                    Ok(reference) => Outcome::Succeeded(reference),
                    Err(err) => Outcome::Failed(err),
                },
                None => Outcome::Failed(StoryboardError::precondition(format!(
                    "scene {id} is no longer part of the story"
                ))),
            };
            outcomes.push(SceneOutcome {
                index,
                scene_id: id,
                outcome,
            });
        }
        outcomes.sort_by_key(|o| o.index);

        let report = BatchReport {
            stage: Some(stage),
            outcomes,
        };
        log_report(&report);
        Ok(report)
    }

    pub async fn run_pipeline_all(&self, story: &mut Story) -> BatchReport {
        self.run_pipeline_all_with(story, &CancelSignal::never()).await
    }

    /// Runs the full pipeline for every scene concurrently. Each scene stops at
    /// its own first failure.
    pub async fn run_pipeline_all_with(
        &self,
        story: &mut Story,
        cancel: &CancelSignal,
    ) -> BatchReport {
        let limit = self
            .runner
            .config()
            .max_concurrency
            .unwrap_or(story.len())
            .max(1);
        info!(
            target: "storyboard",
            "full pipeline: {} scene(s), up to {} in flight",
            story.len(),
            limit
        );

        let runner = &self.runner;
        let mut outcomes: Vec<SceneOutcome> = stream::iter(story.scenes_mut().iter_mut().enumerate())
            .map(|(index, record)| async move {
                let scene_id = record.id();
                let outcome = if record.sound_done() {
                    Outcome::Skipped
                } else {
                    match cancel.guard(runner.run_full(record)).await {
                        Ok(reference) => Outcome::Succeeded(reference),
                        Err(err) => Outcome::Failed(err),
                    }
                };
                SceneOutcome {
                    index,
                    scene_id,
                    outcome,
                }
            })
            .buffer_unordered(limit)
            .collect()
            .await;
        outcomes.sort_by_key(|o| o.index);

        let report = BatchReport {
            stage: None,
            outcomes,
        };
        log_report(&report);
        report
    }
}

fn log_report(report: &BatchReport) {
    let label = report.stage.map(|s| s.as_str()).unwrap_or("pipeline");
    info!(
        target: "storyboard",
        "{} batch finished: {} succeeded, {} skipped, {} failed",
        label,
        report.succeeded(),
        report.skipped(),
        report.failed()
    );
    for (outcome, err) in report.failures() {
        warn!(target: "storyboard", "scene {}: {}", outcome.index + 1, err);
    }
}
