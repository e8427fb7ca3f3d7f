//! Storyboard core
//!
//! Scene records, the stage gate, the per-scene pipeline and batch
//! orchestration over a pluggable generation backend.

pub mod batch;
pub mod cancel;
pub mod error;
pub mod formats;
pub mod gate;
pub mod invoker;
pub mod persist;
pub mod planner;
pub mod reset;
pub mod runner;
pub mod scene;
pub mod story;

pub use batch::{BatchOrchestrator, BatchReport, Outcome, SceneOutcome};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use error::{Result, StoryboardError};
pub use formats::{FormatRegistry, StoryFormat};
pub use gate::can_run;
pub use invoker::{GenerationInvoker, StageRequest};
pub use persist::{ArtifactFetcher, ProjectStore, SaveReport, StoryboardDocument};
pub use planner::{parse_storyboard, plan_story, PlanRequest, StoryboardPlanner};
pub use reset::reset_from;
pub use runner::{PipelineRunner, RunnerConfig};
pub use scene::{
    Artifact, ArtifactRef, SceneDraft, SceneId, SceneRecord, SceneState, StageFailure, Stage,
};
pub use story::{Story, StoryStats};
