use storyboard::{Stage, StoryboardError};
use thiserror::Error;

/// Failure of a remote provider call, before it is scoped to a stage.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Configuration(String),
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    InvalidResponse(String),
    /// The provider reported a terminal `failed` or `canceled` status.
    #[error("prediction {id} {status}: {message}")]
    Prediction {
        id: String,
        status: String,
        message: String,
    },
}

impl ProviderError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        ProviderError::Configuration(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        ProviderError::Transport(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        ProviderError::InvalidResponse(msg.into())
    }

    /// Maps an unsuccessful HTTP status to the matching variant.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = format!("{status} - {}", storyboard::error::preview(body));
        match status.as_u16() {
            401 | 403 => ProviderError::Authentication(detail),
            429 => ProviderError::RateLimited(detail),
            _ => ProviderError::Transport(detail),
        }
    }

    pub fn into_remote(self, stage: Stage) -> StoryboardError {
        StoryboardError::remote(stage, self.to_string())
    }

    pub fn into_planner(self) -> StoryboardError {
        StoryboardError::planner(self.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Transport(format!("request timed out: {err}"))
        } else if err.is_decode() {
            ProviderError::InvalidResponse(format!("could not decode response: {err}"))
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}
