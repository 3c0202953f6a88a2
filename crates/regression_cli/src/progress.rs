use std::path::Path;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use regression::{SceneOutcome, SuiteObserver};

const BAR_TEMPLATE: &str = "{prefix:>6} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}";

/// Stacked set / scene / step bars on stderr.
pub(crate) struct ProgressBars {
    multi: MultiProgress,
    sets: Option<ProgressBar>,
    scenes: Option<ProgressBar>,
    steps: Option<ProgressBar>,
}

impl ProgressBars {
    pub(crate) fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    fn with_draw_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            sets: None,
            scenes: None,
            steps: None,
        }
    }

    fn add_bar(&self, prefix: &'static str, len: u64) -> ProgressBar {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        let bar = self.multi.add(ProgressBar::new(len));
        bar.set_style(style);
        bar.set_prefix(prefix);
        bar
    }

    fn clear(&self, bar: ProgressBar) {
        bar.finish_and_clear();
        self.multi.remove(&bar);
    }
}

impl SuiteObserver for ProgressBars {
    fn suite_started(&mut self, manifests: usize) {
        self.sets = Some(self.add_bar("sets", manifests as u64));
    }

    fn manifest_started(&mut self, manifest: &Path, scenes: usize) {
        if let Some(sets) = &self.sets {
            sets.set_message(manifest.display().to_string());
        }
        self.scenes = Some(self.add_bar("scenes", scenes as u64));
    }

    fn scene_started(&mut self, relative_scene: &str, steps: u32) {
        if let Some(scenes) = &self.scenes {
            scenes.set_message(relative_scene.to_string());
        }
        self.steps = Some(self.add_bar("steps", u64::from(steps)));
    }

    fn step_finished(&mut self, step: u32) {
        if let Some(steps) = &self.steps {
            steps.set_position(u64::from(step));
        }
    }

    fn scene_finished(&mut self, _relative_scene: &str, _outcome: &SceneOutcome) {
        if let Some(steps) = self.steps.take() {
            self.clear(steps);
        }
        if let Some(scenes) = &self.scenes {
            scenes.inc(1);
        }
    }

    fn manifest_finished(&mut self, _manifest: &Path) {
        if let Some(scenes) = self.scenes.take() {
            self.clear(scenes);
        }
        if let Some(sets) = &self.sets {
            sets.inc(1);
        }
    }

    fn suite_finished(&mut self) {
        if let Some(sets) = self.sets.take() {
            self.clear(sets);
        }
    }
}
