//! Reset controller: invalidating a stage cascades to everything derived from it.

use crate::scene::{SceneRecord, Stage};

/// Clears `stage` and every downstream stage. Idempotent.
pub fn reset_from(record: &mut SceneRecord, stage: Stage) {
    for cleared in stage.and_downstream() {
        record.clear(*cleared);
    }
    tracing::debug!(
        target: "storyboard",
        "scene {} reset from {} (state now {:?})",
        record.id(),
        stage,
        record.state()
    );
}
