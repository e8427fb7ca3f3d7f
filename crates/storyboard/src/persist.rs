//! Project layout on disk: storyboard JSON, the user concept and every
//! generated artifact, one timestamped directory per session.

use crate::error::{Result, StoryboardError};
use crate::formats;
use crate::planner;
use crate::scene::{ArtifactRef, SceneDraft, Stage};
use crate::story::Story;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_OUTPUT_DIR: &str = "final_videos";
pub const STORYBOARD_FILE: &str = "storyboard.json";
pub const PROMPT_FILE: &str = "original_prompt.txt";
const SLUG_MAX_CHARS: usize = 50;

/// Retrieves the bytes behind an artifact reference.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, reference: &ArtifactRef) -> Result<Vec<u8>>;
}

/// Replaces anything outside `[A-Za-z0-9_\-. ]` (Unicode letters and digits
/// included) with `_` and keeps the first 50 characters.
pub fn safe_filename(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .take(SLUG_MAX_CHARS)
        .collect()
}

/// `scene_{n}_{slug}_{suffix}` with a 1-based scene number.
pub fn artifact_file_name(index: usize, script_text: &str, stage: Stage) -> String {
    let suffix = match stage {
        Stage::Image => "image.png",
        Stage::Video => "video.mp4",
        Stage::Sound => "final.mp4",
    };
    format!("scene_{}_{}_{}", index + 1, safe_filename(script_text), suffix)
}

/// Serialized form of `storyboard.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryboardDocument {
    pub scenes: Vec<SceneDraft>,
    pub original_prompt: String,
    pub format_type: String,
}

impl StoryboardDocument {
    pub fn from_story(story: &Story) -> Self {
        Self {
            scenes: story.scenes().iter().map(|r| r.to_draft()).collect(),
            original_prompt: story.concept().to_string(),
            format_type: story.format_id().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    pub project_dir: PathBuf,
    pub saved: Vec<PathBuf>,
    pub errors: Vec<StoryboardError>,
}

impl SaveReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct ProjectStore {
    base_dir: PathBuf,
    project_dir: Option<PathBuf>,
}

impl Default for ProjectStore {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

impl ProjectStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            project_dir: None,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory of the current session, if one has been created.
    pub fn project_dir(&self) -> Option<&Path> {
        self.project_dir.as_deref()
    }

    /// Creates the session directory on first use and reuses it afterwards.
    pub async fn ensure_project_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.project_dir {
            return Ok(dir.clone());
        }
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let dir = self.base_dir.join(format!("project_{stamp}"));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| StoryboardError::persistence(&dir, err))?;
        debug!(target: "storyboard", "project directory {}", dir.display());
        self.project_dir = Some(dir.clone());
        Ok(dir)
    }

    /// Writes the storyboard, the concept and every artifact produced so far.
    ///
    /// Refuses when nothing has been generated. Individual artifact failures
    /// are collected in the report and do not stop the remaining writes.
    pub async fn save(&mut self, story: &Story, fetcher: &dyn ArtifactFetcher) -> Result<SaveReport> {
        if !story.has_content() {
            return Err(StoryboardError::persistence(
                &self.base_dir,
                "no content to save: generate at least one artifact first",
            ));
        }
        let dir = self.ensure_project_dir().await?;
        let mut report = SaveReport {
            project_dir: dir.clone(),
            ..SaveReport::default()
        };

        let document = StoryboardDocument::from_story(story);
        let json = serde_json::to_string_pretty(&document)
            .map_err(|err| StoryboardError::persistence(dir.join(STORYBOARD_FILE), err))?;
        write_file(&dir.join(STORYBOARD_FILE), json.as_bytes(), &mut report).await;
        write_file(&dir.join(PROMPT_FILE), story.concept().as_bytes(), &mut report).await;

        for (index, record) in story.scenes().iter().enumerate() {
            for stage in Stage::ALL {
                let Some(reference) = record.artifact_ref(stage) else {
                    continue;
                };
                let path = dir.join(artifact_file_name(index, record.script_text(), stage));
                match fetcher.fetch(reference).await {
                    Ok(bytes) => write_file(&path, &bytes, &mut report).await,
                    Err(err) => {
                        warn!(target: "storyboard", "could not fetch {}: {}", reference, err);
                        report
                            .errors
                            .push(StoryboardError::persistence(&path, err));
                    }
                }
            }
        }

        info!(
            target: "storyboard",
            "saved {} file(s) to {} ({} error(s))",
            report.saved.len(),
            dir.display(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Reads a saved `storyboard.json` back into a fresh story. Artifacts are
    /// not restored; every scene starts empty.
    pub async fn load_storyboard(path: &Path) -> Result<Story> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| StoryboardError::persistence(path, err))?;
        let value = planner::parse_json(&raw)?;
        let drafts = planner::scenes_from_value(&value, &raw)?;
        let text_field = |key: &str| value.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let concept = text_field("original_prompt").unwrap_or_default();
        let format_id =
            text_field("format_type").unwrap_or_else(|| formats::default_format_id().to_string());
        Story::from_drafts(concept, format_id, drafts)
    }
}

async fn write_file(path: &Path, bytes: &[u8], report: &mut SaveReport) {
    match tokio::fs::write(path, bytes).await {
        Ok(()) => {
            debug!(target: "storyboard", "wrote {}", path.display());
            report.saved.push(path.to_path_buf());
        }
        Err(err) => {
            warn!(target: "storyboard", "failed to write {}: {}", path.display(), err);
            report.errors.push(StoryboardError::persistence(path, err));
        }
    }
}
