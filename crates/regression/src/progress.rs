use std::path::Path;

use crate::report::SceneOutcome;

/// Progress callbacks for a suite run. Every hook defaults to a no-op.
///
/// Hooks fire in nesting order: `suite_started`, then per manifest
/// `manifest_started` (parsed manifests only), per scene `scene_started`,
/// one `step_finished` per engine step and `scene_finished`, and finally
/// `manifest_finished` for every discovered manifest, parsed or not.
pub trait SuiteObserver {
    fn suite_started(&mut self, _manifests: usize) {}

    fn manifest_started(&mut self, _manifest: &Path, _scenes: usize) {}

    fn scene_started(&mut self, _relative_scene: &str, _steps: u32) {}

    /// `step` counts the steps taken so far in the current scene.
    fn step_finished(&mut self, _step: u32) {}

    fn scene_finished(&mut self, _relative_scene: &str, _outcome: &SceneOutcome) {}

    fn manifest_finished(&mut self, _manifest: &Path) {}

    fn suite_finished(&mut self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl SuiteObserver for NoProgress {}
