use crate::scene::Stage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoryboardError {
    /// Text-generation output failed structural validation.
    #[error("malformed storyboard response: {reason} (response: {preview})")]
    MalformedResponse { reason: String, preview: String },

    /// A media call returned non-success or an empty/invalid reference.
    #[error("{stage} generation failed: {message}")]
    RemoteGeneration { stage: Stage, message: String },

    /// A stage was invoked out of order, or a batch was rejected up front.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Artifact download or file write failure during save.
    #[error("failed to persist {path:?}: {message}")]
    Persistence { path: PathBuf, message: String },

    /// Transport or configuration failure of the text-generation call.
    #[error("storyboard planner error: {0}")]
    Planner(String),

    #[error("invalid story format: {0}")]
    InvalidFormat(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl StoryboardError {
    pub fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        StoryboardError::MalformedResponse {
            reason: reason.into(),
            preview: preview(raw),
        }
    }

    pub fn remote(stage: Stage, message: impl Into<String>) -> Self {
        StoryboardError::RemoteGeneration {
            stage,
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        StoryboardError::Precondition(message.into())
    }

    pub fn persistence(path: impl AsRef<Path>, message: impl ToString) -> Self {
        StoryboardError::Persistence {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn planner(message: impl Into<String>) -> Self {
        StoryboardError::Planner(message.into())
    }

    /// Stage the failure is scoped to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            StoryboardError::RemoteGeneration { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// First 200 characters of a response, for error messages.
pub fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    if trimmed.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

pub type Result<T> = std::result::Result<T, StoryboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_long_responses() {
        let raw = "x".repeat(500);
        let p = preview(&raw);
        assert_eq!(p.len(), 203);
        assert!(p.ends_with("..."));
        assert_eq!(preview("  short  "), "short");
    }

    #[test]
    fn test_remote_error_display_names_stage() {
        let err = StoryboardError::remote(Stage::Video, "HTTP 500");
        assert_eq!(err.to_string(), "video generation failed: HTTP 500");
        assert_eq!(err.stage(), Some(Stage::Video));
        assert_eq!(StoryboardError::Cancelled.stage(), None);
    }
}
