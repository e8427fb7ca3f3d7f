use crate::error::{Result, StoryboardError};
use crate::scene::{SceneDraft, SceneId, SceneRecord, Stage};
use std::fmt;

/// Ordered scenes generated from one concept. Position is meaningful: scene
/// numbering and saved file names follow it, so scenes cannot be reordered,
/// added or removed after construction.
#[derive(Clone, Debug)]
pub struct Story {
    concept: String,
    format_id: String,
    scenes: Vec<SceneRecord>,
}

impl Story {
    pub fn new(
        concept: impl Into<String>,
        format_id: impl Into<String>,
        scenes: Vec<SceneRecord>,
    ) -> Self {
        Self {
            concept: concept.into(),
            format_id: format_id.into(),
            scenes,
        }
    }

    pub fn from_drafts(
        concept: impl Into<String>,
        format_id: impl Into<String>,
        drafts: Vec<SceneDraft>,
    ) -> Result<Self> {
        if drafts.is_empty() {
            return Err(StoryboardError::precondition(
                "a story needs at least one scene",
            ));
        }
        let scenes = drafts.into_iter().map(SceneRecord::from_draft).collect();
        Ok(Self::new(concept, format_id, scenes))
    }

    pub fn concept(&self) -> &str {
        &self.concept
    }

    pub fn format_id(&self) -> &str {
        &self.format_id
    }

    pub fn scenes(&self) -> &[SceneRecord] {
        &self.scenes
    }

    pub fn scenes_mut(&mut self) -> &mut [SceneRecord] {
        &mut self.scenes
    }

    pub fn scene(&self, index: usize) -> Option<&SceneRecord> {
        self.scenes.get(index)
    }

    pub fn scene_mut(&mut self, index: usize) -> Option<&mut SceneRecord> {
        self.scenes.get_mut(index)
    }

    pub fn position(&self, id: SceneId) -> Option<usize> {
        self.scenes.iter().position(|s| s.id() == id)
    }

    pub fn find_mut(&mut self, id: SceneId) -> Option<&mut SceneRecord> {
        self.scenes.iter_mut().find(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn has_content(&self) -> bool {
        self.scenes.iter().any(SceneRecord::has_content)
    }

    pub fn stats(&self) -> StoryStats {
        let count = |stage: Stage| self.scenes.iter().filter(|s| s.is_done(stage)).count();
        StoryStats {
            total: self.scenes.len(),
            images: count(Stage::Image),
            videos: count(Stage::Video),
            sounds: count(Stage::Sound),
        }
    }
}

/// Generation progress across a story.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoryStats {
    pub total: usize,
    pub images: usize,
    pub videos: usize,
    pub sounds: usize,
}

impl StoryStats {
    pub fn done(&self, stage: Stage) -> usize {
        match stage {
            Stage::Image => self.images,
            Stage::Video => self.videos,
            Stage::Sound => self.sounds,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.sounds == self.total
    }
}

impl fmt::Display for StoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "images {}/{}, videos {}/{}, sounds {}/{}",
            self.images, self.total, self.videos, self.total, self.sounds, self.total
        )
    }
}
