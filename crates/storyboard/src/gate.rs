//! Stage gate: prerequisite checks run before every generation attempt.

use crate::error::{Result, StoryboardError};
use crate::scene::{SceneRecord, Stage};

/// Whether `stage` is eligible to run for `record`. No side effects.
pub fn can_run(stage: Stage, record: &SceneRecord) -> bool {
    match stage {
        Stage::Image => true,
        Stage::Video => record.image_done() && record.artifact_ref(Stage::Image).is_some(),
        Stage::Sound => record.video_done() && record.artifact_ref(Stage::Video).is_some(),
    }
}

/// [`can_run`] as a `Result`, naming the missing prerequisite.
pub fn check(stage: Stage, record: &SceneRecord) -> Result<()> {
    if can_run(stage, record) {
        return Ok(());
    }
    let missing = stage.prerequisite().map(|s| s.as_str()).unwrap_or("prerequisite");
    Err(StoryboardError::precondition(format!(
        "cannot generate {stage} before the scene has a {missing}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Artifact, ArtifactRef};

    fn done(record: &mut SceneRecord, stage: Stage) {
        let prompt = record.prompt(stage).to_string();
        record
            .complete(
                stage,
                Artifact {
                    reference: ArtifactRef::new(format!("https://cdn/{stage}")).unwrap(),
                    prompt,
                },
            )
            .unwrap();
    }

    #[test]
    fn test_image_always_runs() {
        let r = SceneRecord::new("a", "b", "c", "d");
        assert!(can_run(Stage::Image, &r));
        assert!(!can_run(Stage::Video, &r));
        assert!(!can_run(Stage::Sound, &r));
    }

    #[test]
    fn test_each_stage_unlocks_the_next() {
        let mut r = SceneRecord::new("a", "b", "c", "d");
        done(&mut r, Stage::Image);
        assert!(can_run(Stage::Video, &r));
        assert!(!can_run(Stage::Sound, &r));
        done(&mut r, Stage::Video);
        assert!(can_run(Stage::Sound, &r));
    }

    #[test]
    fn test_check_names_missing_stage() {
        let r = SceneRecord::new("a", "b", "c", "d");
        let err = check(Stage::Sound, &r).unwrap_err();
        assert!(err.to_string().contains("before the scene has a video"));
        assert!(check(Stage::Image, &r).is_ok());
    }
}
