//! Script stage: ask a language model for scenes, then validate what comes back.

use crate::error::{Result, StoryboardError};
use crate::formats::{self, StoryFormat};
use crate::scene::SceneDraft;
use crate::story::Story;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub const SCENES_KEY: &str = "scenes";
pub const REQUIRED_FIELDS: [&str; 4] = [
    "scene",
    "scene_image_prompt",
    "scene_video_prompt",
    "scene_sound_prompt",
];

const SYSTEM_ROLE: &str = "You are an expert video storyboard creator. Your task is to create detailed storyboards for TikTok-style videos.";
const JSON_ONLY: &str = "IMPORTANT: Your response must be ONLY valid JSON with no additional text, explanations, or markdown formatting.";
const FORMAT_BLOCK: &str = r#"{
  "scenes": [
    {
      "scene": "Scene script",
      "scene_image_prompt": "...",
      "scene_video_prompt": "...",
      "scene_sound_prompt": "..."
    },
    ...
  ]
}"#;

#[derive(Clone, Debug)]
pub struct PlanRequest {
    pub concept: String,
    pub format: StoryFormat,
}

impl PlanRequest {
    pub fn new(concept: impl Into<String>, format: StoryFormat) -> Self {
        Self {
            concept: concept.into(),
            format,
        }
    }

    pub fn system_prompt(&self) -> String {
        compose_system_prompt(&self.format, &self.concept)
    }

    pub fn user_message(&self) -> String {
        format!("Input: {}", self.concept)
    }
}

/// The text-generation call. Returns the raw completion; validation happens
/// in [`parse_storyboard`].
#[async_trait]
pub trait StoryboardPlanner: Send + Sync {
    fn name(&self) -> &str;

    async fn plan(&self, request: &PlanRequest) -> Result<String>;
}

pub fn compose_system_prompt(format: &StoryFormat, concept: &str) -> String {
    let examples = formats::model_examples();
    let mut prompt = String::from(SYSTEM_ROLE);
    prompt.push_str("\n\nTOPIC PROMPT:\n");
    prompt.push_str(&format.render(concept));
    prompt.push_str("\n\nGENERAL INSTRUCTIONS:\n");
    prompt.push_str(formats::general_instructions());
    prompt.push_str("\n\nFORMAT:\n");
    prompt.push_str(FORMAT_BLOCK);
    prompt.push_str("\n\nMODEL EXAMPLES:\n");
    push_examples(
        &mut prompt,
        "Image prompts should be detailed and cinematic like these examples:",
        &examples.image,
    );
    push_examples(
        &mut prompt,
        "Video prompts should be simple motion descriptions like these examples:",
        &examples.video,
    );
    push_examples(
        &mut prompt,
        "Sound prompts should be detailed audio descriptions like these examples:",
        &examples.sound,
    );
    prompt.push('\n');
    prompt.push_str(JSON_ONLY);
    prompt
}

fn push_examples(out: &mut String, heading: &str, examples: &[String]) {
    out.push('\n');
    out.push_str(heading);
    for (i, example) in examples.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, example));
    }
    out.push('\n');
}

/// Removes a surrounding Markdown code fence, if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Validates a completion and extracts its scenes.
///
/// The top level must be an object with a non-empty `scenes` list whose
/// entries carry all four string fields. Errors name the missing fields and
/// the zero-based scene index.
pub fn parse_storyboard(raw: &str) -> Result<Vec<SceneDraft>> {
    let value = parse_json(raw)?;
    scenes_from_value(&value, raw)
}

pub(crate) fn parse_json(raw: &str) -> Result<Value> {
    let text = strip_code_fences(raw);
    if text.is_empty() {
        return Err(StoryboardError::malformed("empty response", raw));
    }
    serde_json::from_str(text)
        .map_err(|err| StoryboardError::malformed(format!("invalid JSON: {err}"), raw))
}

pub(crate) fn scenes_from_value(value: &Value, raw: &str) -> Result<Vec<SceneDraft>> {
    let object = value
        .as_object()
        .ok_or_else(|| StoryboardError::malformed("top-level value must be a JSON object", raw))?;
    let scenes = object
        .get(SCENES_KEY)
        .ok_or_else(|| StoryboardError::malformed("missing 'scenes' key", raw))?
        .as_array()
        .ok_or_else(|| StoryboardError::malformed("'scenes' must be a list", raw))?;
    if scenes.is_empty() {
        return Err(StoryboardError::malformed("'scenes' list is empty", raw));
    }

    scenes
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let entry = entry.as_object().ok_or_else(|| {
                StoryboardError::malformed(format!("scene {index} is not an object"), raw)
            })?;
            let missing: Vec<&str> = REQUIRED_FIELDS
                .iter()
                .copied()
                .filter(|field| string_field(entry, field).is_none())
                .collect();
            if !missing.is_empty() {
                return Err(StoryboardError::malformed(
                    format!(
                        "scene {index} missing required fields: {}",
                        missing.join(", ")
                    ),
                    raw,
                ));
            }
            let field = |name: &str| string_field(entry, name).unwrap_or_default().to_string();
            Ok(SceneDraft {
                scene: field("scene"),
                scene_image_prompt: field("scene_image_prompt"),
                scene_video_prompt: field("scene_video_prompt"),
                scene_sound_prompt: field("scene_sound_prompt"),
            })
        })
        .collect()
}

fn string_field<'a>(entry: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    entry.get(name).and_then(Value::as_str)
}

/// Runs the script stage and builds a fresh story from the validated result.
pub async fn plan_story(
    planner: &dyn StoryboardPlanner,
    concept: &str,
    format: StoryFormat,
) -> Result<Story> {
    let request = PlanRequest::new(concept, format);
    tracing::info!(
        target: "planner",
        "planning storyboard with {} (format={})",
        planner.name(),
        request.format.id
    );
    let raw = planner.plan(&request).await?;
    let drafts = parse_storyboard(&raw)?;
    tracing::info!(target: "planner", "storyboard has {} scene(s)", drafts.len());
    Story::from_drafts(concept, request.format.id, drafts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FormatRegistry;

    fn reason(err: StoryboardError) -> String {
        match err {
            StoryboardError::MalformedResponse { reason, .. } => reason,
            other => panic!("expected malformed response, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_fields_are_named_with_index() {
        let err = parse_storyboard(r#"{"scenes": [{"scene": "x"}]}"#).unwrap_err();
        let reason = reason(err);
        assert!(reason.contains("scene 0"));
        for field in ["scene_image_prompt", "scene_video_prompt", "scene_sound_prompt"] {
            assert!(reason.contains(field), "{reason}");
        }
        assert!(!reason.contains(" scene,"));
    }

    #[test]
    fn test_structural_rejections() {
        assert!(reason(parse_storyboard("[]").unwrap_err()).contains("object"));
        assert!(reason(parse_storyboard("{}").unwrap_err()).contains("missing 'scenes'"));
        assert!(reason(parse_storyboard(r#"{"scenes": {}}"#).unwrap_err()).contains("list"));
        assert!(reason(parse_storyboard(r#"{"scenes": []}"#).unwrap_err()).contains("empty"));
        assert!(reason(parse_storyboard("   ").unwrap_err()).contains("empty response"));
        assert!(reason(parse_storyboard("not json").unwrap_err()).contains("invalid JSON"));
    }

    #[test]
    fn test_non_string_field_counts_as_missing() {
        let raw = r#"{"scenes": [
            {"scene": "a", "scene_image_prompt": "b", "scene_video_prompt": "c", "scene_sound_prompt": "d"},
            {"scene": "a", "scene_image_prompt": 3, "scene_video_prompt": "c", "scene_sound_prompt": "d"}
        ]}"#;
        let reason = reason(parse_storyboard(raw).unwrap_err());
        assert_eq!(reason, "scene 1 missing required fields: scene_image_prompt");
    }

    #[test]
    fn test_fenced_json_is_accepted() {
        let raw = "```json\n{\"scenes\": [{\"scene\": \"Roswell, 1947\", \"scene_image_prompt\": \"i\", \"scene_video_prompt\": \"v\", \"scene_sound_prompt\": \"s\"}]}\n```";
        let drafts = parse_storyboard(raw).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].scene, "Roswell, 1947");
    }

    #[test]
    fn test_malformed_error_carries_preview() {
        let raw = format!("{{\"nope\": \"{}\"}}", "y".repeat(400));
        match parse_storyboard(&raw).unwrap_err() {
            StoryboardError::MalformedResponse { preview, .. } => {
                assert!(preview.starts_with("{\"nope\""));
                assert!(preview.ends_with("..."));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_system_prompt_sections() {
        let format = FormatRegistry::new().resolve("conspiracy");
        let prompt = compose_system_prompt(&format, "the moon landing");
        assert!(prompt.starts_with(SYSTEM_ROLE));
        assert!(prompt.contains("conspiracy theory the moon landing."));
        for section in ["TOPIC PROMPT:", "GENERAL INSTRUCTIONS:", "FORMAT:", "MODEL EXAMPLES:"] {
            assert!(prompt.contains(section), "missing {section}");
        }
        assert!(prompt.contains(&format!("\n1. {}", formats::model_examples().image[0])));
        assert!(prompt.ends_with(JSON_ONLY));

        let request = PlanRequest::new("the moon landing", format);
        assert_eq!(request.user_message(), "Input: the moon landing");
    }
}
