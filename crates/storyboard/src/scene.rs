use crate::error::{Result, StoryboardError};
use crate::gate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Generation stage, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Image,
    Video,
    Sound,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Image, Stage::Video, Stage::Sound];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Image => "image",
            Stage::Video => "video",
            Stage::Sound => "sound",
        }
    }

    /// Stage whose artifact this stage consumes.
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Stage::Image => None,
            Stage::Video => Some(Stage::Image),
            Stage::Sound => Some(Stage::Video),
        }
    }

    /// This stage and every stage built on top of it.
    pub fn and_downstream(&self) -> &'static [Stage] {
        match self {
            Stage::Image => &[Stage::Image, Stage::Video, Stage::Sound],
            Stage::Video => &[Stage::Video, Stage::Sound],
            Stage::Sound => &[Stage::Sound],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = StoryboardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" | "images" => Ok(Stage::Image),
            "video" | "videos" => Ok(Stage::Video),
            "sound" | "sounds" | "audio" => Ok(Stage::Sound),
            other => Err(StoryboardError::precondition(format!(
                "unknown stage '{other}' (expected image, video or sound)"
            ))),
        }
    }
}

/// Opaque handle (URL or local path) to a generated media file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    /// Returns `None` for empty or whitespace-only references.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_remote(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A produced artifact together with the prompt it was generated from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub reference: ArtifactRef,
    pub prompt: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneId(pub Uuid);

impl SceneId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SceneId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneState {
    Empty,
    ImageReady,
    VideoReady,
    SoundReady,
}

/// Marker for the last failed stage invocation. Non-terminal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

/// Scene entry as it appears in storyboard JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDraft {
    pub scene: String,
    pub scene_image_prompt: String,
    pub scene_video_prompt: String,
    pub scene_sound_prompt: String,
}

/// One narrative beat: script text, three prompts and the artifacts produced so far.
///
/// A stage counts as done iff its artifact is set. Artifacts are only ever set
/// through the stage gate, so `video => image` and `sound => video` hold for
/// every reachable record.
#[derive(Clone, Debug)]
pub struct SceneRecord {
    id: SceneId,
    script_text: String,
    image_prompt: String,
    video_prompt: String,
    sound_prompt: String,
    image: Option<Artifact>,
    video: Option<Artifact>,
    sound: Option<Artifact>,
    last_failure: Option<StageFailure>,
}

impl SceneRecord {
    pub fn new(
        script_text: impl Into<String>,
        image_prompt: impl Into<String>,
        video_prompt: impl Into<String>,
        sound_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: SceneId::new(),
            script_text: script_text.into(),
            image_prompt: image_prompt.into(),
            video_prompt: video_prompt.into(),
            sound_prompt: sound_prompt.into(),
            image: None,
            video: None,
            sound: None,
            last_failure: None,
        }
    }

    pub fn from_draft(draft: SceneDraft) -> Self {
        Self::new(
            draft.scene,
            draft.scene_image_prompt,
            draft.scene_video_prompt,
            draft.scene_sound_prompt,
        )
    }

    pub fn to_draft(&self) -> SceneDraft {
        SceneDraft {
            scene: self.script_text.clone(),
            scene_image_prompt: self.image_prompt.clone(),
            scene_video_prompt: self.video_prompt.clone(),
            scene_sound_prompt: self.sound_prompt.clone(),
        }
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    pub fn script_text(&self) -> &str {
        &self.script_text
    }

    pub fn set_script_text(&mut self, text: impl Into<String>) {
        self.script_text = text.into();
    }

    pub fn prompt(&self, stage: Stage) -> &str {
        match stage {
            Stage::Image => &self.image_prompt,
            Stage::Video => &self.video_prompt,
            Stage::Sound => &self.sound_prompt,
        }
    }

    /// Edits a prompt. An existing artifact is kept as-is; see [`Self::prompt_drifted`].
    pub fn set_prompt(&mut self, stage: Stage, prompt: impl Into<String>) {
        let prompt = prompt.into();
        match stage {
            Stage::Image => self.image_prompt = prompt,
            Stage::Video => self.video_prompt = prompt,
            Stage::Sound => self.sound_prompt = prompt,
        }
    }

    pub fn artifact(&self, stage: Stage) -> Option<&Artifact> {
        match stage {
            Stage::Image => self.image.as_ref(),
            Stage::Video => self.video.as_ref(),
            Stage::Sound => self.sound.as_ref(),
        }
    }

    pub fn artifact_ref(&self, stage: Stage) -> Option<&ArtifactRef> {
        self.artifact(stage).map(|a| &a.reference)
    }

    pub fn is_done(&self, stage: Stage) -> bool {
        self.artifact(stage).is_some()
    }

    pub fn image_done(&self) -> bool {
        self.is_done(Stage::Image)
    }

    pub fn video_done(&self) -> bool {
        self.is_done(Stage::Video)
    }

    pub fn sound_done(&self) -> bool {
        self.is_done(Stage::Sound)
    }

    pub fn state(&self) -> SceneState {
        if self.sound_done() {
            SceneState::SoundReady
        } else if self.video_done() {
            SceneState::VideoReady
        } else if self.image_done() {
            SceneState::ImageReady
        } else {
            SceneState::Empty
        }
    }

    pub fn last_failure(&self) -> Option<&StageFailure> {
        self.last_failure.as_ref()
    }

    /// True when the stage's artifact exists but the prompt was edited since.
    pub fn prompt_drifted(&self, stage: Stage) -> bool {
        self.artifact(stage)
            .map(|a| a.prompt != self.prompt(stage))
            .unwrap_or(false)
    }

    pub fn has_content(&self) -> bool {
        Stage::ALL.iter().any(|stage| self.is_done(*stage))
    }

    /// Stores a freshly generated artifact. Gate-checked; refuses to overwrite
    /// an existing artifact so downstream stages never outlive their source.
    pub(crate) fn complete(&mut self, stage: Stage, artifact: Artifact) -> Result<()> {
        gate::check(stage, self)?;
        if self.is_done(stage) {
            return Err(StoryboardError::precondition(format!(
                "scene already has a {stage}; reset it before generating again"
            )));
        }
        *self.slot_mut(stage) = Some(artifact);
        self.last_failure = None;
        Ok(())
    }

    pub(crate) fn record_failure(&mut self, stage: Stage, message: impl Into<String>) {
        self.last_failure = Some(StageFailure {
            stage,
            message: message.into(),
        });
    }

    pub(crate) fn clear(&mut self, stage: Stage) {
        *self.slot_mut(stage) = None;
        if self.last_failure.as_ref().map_or(false, |f| f.stage == stage) {
            self.last_failure = None;
        }
    }

    fn slot_mut(&mut self, stage: Stage) -> &mut Option<Artifact> {
        match stage {
            Stage::Image => &mut self.image,
            Stage::Video => &mut self.video,
            Stage::Sound => &mut self.sound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(url: &str, prompt: &str) -> Artifact {
        Artifact {
            reference: ArtifactRef::new(url).unwrap(),
            prompt: prompt.to_string(),
        }
    }

    fn record() -> SceneRecord {
        SceneRecord::new("1947. Roswell.", "desert ranch", "slow dolly", "wind")
    }

    #[test]
    fn test_new_record_is_empty() {
        let r = record();
        assert_eq!(r.state(), SceneState::Empty);
        assert!(!r.image_done() && !r.video_done() && !r.sound_done());
        assert!(!r.has_content());
        assert!(r.last_failure().is_none());
    }

    #[test]
    fn test_artifact_ref_rejects_blank() {
        assert!(ArtifactRef::new("").is_none());
        assert!(ArtifactRef::new("   ").is_none());
        let r = ArtifactRef::new(" https://x/y.png ").unwrap();
        assert_eq!(r.as_str(), "https://x/y.png");
        assert!(r.is_remote());
        assert!(!ArtifactRef::new("/tmp/a.png").unwrap().is_remote());
    }

    #[test]
    fn test_complete_follows_gate() {
        let mut r = record();
        let err = r.complete(Stage::Video, artifact("https://v", "slow dolly"));
        assert!(matches!(err, Err(StoryboardError::Precondition(_))));
        assert_eq!(r.state(), SceneState::Empty);

        r.complete(Stage::Image, artifact("https://i", "desert ranch"))
            .unwrap();
        r.complete(Stage::Video, artifact("https://v", "slow dolly"))
            .unwrap();
        assert_eq!(r.state(), SceneState::VideoReady);

        let again = r.complete(Stage::Image, artifact("https://i2", "desert ranch"));
        assert!(again.is_err());
        assert_eq!(r.artifact_ref(Stage::Image).unwrap().as_str(), "https://i");
    }

    #[test]
    fn test_prompt_edit_does_not_invalidate() {
        let mut r = record();
        r.complete(Stage::Image, artifact("https://i", "desert ranch"))
            .unwrap();
        assert!(!r.prompt_drifted(Stage::Image));

        r.set_prompt(Stage::Image, "desert ranch at night");
        assert!(r.image_done());
        assert!(r.prompt_drifted(Stage::Image));
        assert_eq!(r.artifact(Stage::Image).unwrap().prompt, "desert ranch");
        assert!(!r.prompt_drifted(Stage::Video));
    }

    #[test]
    fn test_stage_parsing_and_order() {
        assert_eq!("Images".parse::<Stage>().unwrap(), Stage::Image);
        assert_eq!("audio".parse::<Stage>().unwrap(), Stage::Sound);
        assert!("music".parse::<Stage>().is_err());
        assert_eq!(Stage::Sound.prerequisite(), Some(Stage::Video));
        assert_eq!(Stage::Video.and_downstream(), &[Stage::Video, Stage::Sound]);
        assert!(Stage::Image < Stage::Sound);
    }

    #[test]
    fn test_draft_round_trip_keeps_prompts() {
        let r = record();
        let again = SceneRecord::from_draft(r.to_draft());
        assert_eq!(again.prompt(Stage::Sound), "wind");
        assert_ne!(again.id(), r.id());
    }
}
