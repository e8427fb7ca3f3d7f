use crate::error::{Result, StoryboardError};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const FALLBACK_FORMAT_ID: &str = "freeform";

static CATALOG: OnceCell<FormatCatalog> = OnceCell::new();

const CATALOG_JSON: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../formats/story_formats.json"
));

/// Narrative template with a single `{input}` placeholder for the concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryFormat {
    pub id: String,
    pub name: String,
    pub prompt: String,
}

impl StoryFormat {
    /// A user-defined format. The prompt must contain `{input}` exactly once.
    pub fn custom(
        id: impl Into<String>,
        name: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<Self> {
        let format = Self {
            id: id.into(),
            name: name.into(),
            prompt: prompt.into(),
        };
        format.validate()?;
        Ok(format)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(StoryboardError::InvalidFormat(
                "format id cannot be empty".to_string(),
            ));
        }
        let placeholders = self.prompt.matches(INPUT_PLACEHOLDER).count();
        if placeholders != 1 {
            return Err(StoryboardError::InvalidFormat(format!(
                "format '{}' must contain {INPUT_PLACEHOLDER} exactly once (found {placeholders})",
                self.id
            )));
        }
        Ok(())
    }

    /// Substitutes the concept into the template.
    pub fn render(&self, input: &str) -> String {
        self.prompt.replace(INPUT_PLACEHOLDER, input)
    }
}

/// Example prompts shown to the language model, one list per stage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelExamples {
    #[serde(default)]
    pub image: Vec<String>,
    #[serde(default)]
    pub video: Vec<String>,
    #[serde(default)]
    pub sound: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FormatCatalog {
    default_format: String,
    fallback_prompt: String,
    formats: Vec<StoryFormat>,
    general_instructions: String,
    model_examples: ModelExamples,
}

fn catalog() -> &'static FormatCatalog {
    CATALOG.get_or_init(|| {
        serde_json::from_str(CATALOG_JSON).unwrap_or_else(|err| {
            tracing::error!(target: "storyboard", "embedded format catalog is invalid: {err}");
            FormatCatalog {
                default_format: FALLBACK_FORMAT_ID.to_string(),
                fallback_prompt: format!("Create a video script about: {INPUT_PLACEHOLDER}"),
                formats: Vec::new(),
                general_instructions: String::new(),
                model_examples: ModelExamples::default(),
            }
        })
    })
}

pub fn builtin_formats() -> &'static [StoryFormat] {
    &catalog().formats
}

pub fn default_format_id() -> &'static str {
    &catalog().default_format
}

pub fn general_instructions() -> &'static str {
    &catalog().general_instructions
}

pub fn model_examples() -> &'static ModelExamples {
    &catalog().model_examples
}

/// Used when a format id resolves to nothing.
pub fn fallback_format() -> StoryFormat {
    StoryFormat {
        id: FALLBACK_FORMAT_ID.to_string(),
        name: "Freeform".to_string(),
        prompt: catalog().fallback_prompt.clone(),
    }
}

/// Built-in formats plus formats registered at runtime.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    custom: Vec<StoryFormat>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a custom format. Built-in ids cannot be shadowed.
    pub fn register(&mut self, format: StoryFormat) -> Result<()> {
        format.validate()?;
        if builtin_formats().iter().any(|f| f.id == format.id) {
            return Err(StoryboardError::InvalidFormat(format!(
                "'{}' is a built-in format",
                format.id
            )));
        }
        self.custom.retain(|f| f.id != format.id);
        self.custom.push(format);
        Ok(())
    }

    /// Loads a JSON array of formats, returning how many were registered.
    pub fn load_custom(&mut self, path: &Path) -> Result<usize> {
        let json = std::fs::read_to_string(path)
            .map_err(|err| StoryboardError::persistence(path, err))?;
        let formats: Vec<StoryFormat> = serde_json::from_str(&json)
            .map_err(|err| StoryboardError::InvalidFormat(format!("{}: {err}", path.display())))?;
        let count = formats.len();
        for format in formats {
            self.register(format)?;
        }
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<&StoryFormat> {
        builtin_formats()
            .iter()
            .chain(self.custom.iter())
            .find(|f| f.id == id)
    }

    /// The format for `id`, or the freeform fallback.
    pub fn resolve(&self, id: &str) -> StoryFormat {
        self.get(id).cloned().unwrap_or_else(|| {
            tracing::warn!(target: "storyboard", "unknown format '{id}', using freeform prompt");
            fallback_format()
        })
    }

    pub fn all(&self) -> impl Iterator<Item = &StoryFormat> {
        builtin_formats().iter().chain(self.custom.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_loads() {
        let ids: Vec<&str> = builtin_formats().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["conspiracy", "educational", "motivational", "storytelling"]
        );
        assert_eq!(default_format_id(), "conspiracy");
        for format in builtin_formats() {
            format.validate().unwrap();
        }
        assert!(!general_instructions().is_empty());
        assert_eq!(model_examples().sound.len(), 4);
    }

    #[test]
    fn test_render_substitutes_concept() {
        let registry = FormatRegistry::new();
        let rendered = registry.resolve("educational").render("black holes");
        assert!(rendered.contains("about black holes."));
        assert!(!rendered.contains(INPUT_PLACEHOLDER));
    }

    #[test]
    fn test_unknown_format_falls_back() {
        let format = FormatRegistry::new().resolve("haiku");
        assert_eq!(format.id, FALLBACK_FORMAT_ID);
        assert_eq!(format.render("cats"), "Create a video script about: cats");
    }

    #[test]
    fn test_custom_format_validation() {
        assert!(StoryFormat::custom("x", "X", "no placeholder").is_err());
        assert!(StoryFormat::custom("x", "X", "{input} and {input}").is_err());

        let mut registry = FormatRegistry::new();
        let ok = StoryFormat::custom("recipe", "Recipe", "A recipe video about {input}.").unwrap();
        registry.register(ok).unwrap();
        assert_eq!(registry.get("recipe").unwrap().name, "Recipe");
        assert_eq!(registry.all().count(), builtin_formats().len() + 1);

        let shadow = StoryFormat::custom("conspiracy", "Mine", "{input}").unwrap();
        assert!(registry.register(shadow).is_err());
    }

    #[test]
    fn test_load_custom_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formats.json");
        std::fs::write(
            &path,
            r#"[{"id": "travel", "name": "Travel", "prompt": "A travel diary about {input}."}]"#,
        )
        .unwrap();
        let mut registry = FormatRegistry::new();
        assert_eq!(registry.load_custom(&path).unwrap(), 1);
        assert!(registry.get("travel").is_some());
    }
}
