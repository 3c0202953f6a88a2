use std::path::Path;
use std::time::{Duration, Instant};

use crate::types::SceneError;

/// Wall-clock budget for one scene, checked between engine steps.
///
/// A single step that never returns still blocks the harness.
pub(crate) struct SceneClock {
    started: Instant,
    budget: Option<Duration>,
}

impl SceneClock {
    pub(crate) fn start(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub(crate) fn check(&self, scene: &Path, steps_done: u32) -> Result<(), SceneError> {
        match self.budget {
            Some(budget) if self.started.elapsed() > budget => {
                Err(SceneError::TimeBudgetExceeded {
                    path: scene.to_path_buf(),
                    budget,
                    steps: steps_done,
                })
            }
            _ => Ok(()),
        }
    }
}
