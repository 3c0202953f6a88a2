use std::error::Error as StdError;
use std::path::Path;

use crate::types::{SceneError, Shape, Snapshot, TrajectoryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateObjectId(pub usize);

/// Borrowed view of a state object's position array.
///
/// The view borrows the engine, so it cannot outlive the next call to
/// [`Engine::step`]. Anything kept across steps goes through
/// [`PositionsView::to_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionsView<'a> {
    values: &'a [f64],
    dof_per_point: usize,
}

impl<'a> PositionsView<'a> {
    pub fn new(values: &'a [f64], dof_per_point: usize) -> Self {
        Self {
            values,
            dof_per_point,
        }
    }

    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    pub fn dof_per_point(&self) -> usize {
        self.dof_per_point
    }

    pub fn num_points(&self) -> usize {
        self.values.len().checked_div(self.dof_per_point).unwrap_or(0)
    }

    pub fn shape(&self) -> Shape {
        Shape {
            num_points: self.num_points(),
            dof_per_point: self.dof_per_point,
        }
    }

    /// Copies the positions out. Fails when the array does not hold a whole
    /// number of points.
    pub fn to_snapshot(&self) -> Result<Snapshot, TrajectoryError> {
        Snapshot::new(self.shape(), self.values.to_vec())
    }
}

/// The simulation session the harness drives.
///
/// One scene is loaded at a time. Node and state-object ids are only
/// meaningful until [`Engine::unload`] is called for the scene's root.
pub trait Engine {
    type Error: StdError + Send + Sync + 'static;

    fn load_scene(&mut self, path: &Path) -> Result<NodeId, Self::Error>;
    fn step(&mut self, root: NodeId, dt: f64) -> Result<(), Self::Error>;
    fn unload(&mut self, root: NodeId);
    fn timestep(&self, root: NodeId) -> f64;

    fn children(&self, node: NodeId) -> &[NodeId];
    fn parents(&self, node: NodeId) -> &[NodeId];
    fn node_name(&self, node: NodeId) -> &str;
    fn has_integration_solver(&self, node: NodeId) -> bool;
    fn state_object(&self, node: NodeId) -> Option<StateObjectId>;
    fn has_mechanical_mapping(&self, node: NodeId) -> bool;

    fn state_object_name(&self, id: StateObjectId) -> &str;
    fn positions(&self, id: StateObjectId) -> PositionsView<'_>;
}

/// The root's timestep, rejected unless finite and positive.
pub(crate) fn checked_timestep<E: Engine + ?Sized>(
    engine: &E,
    root: NodeId,
    scene: &Path,
) -> Result<f64, SceneError> {
    let dt = engine.timestep(root);
    if dt.is_finite() && dt > 0.0 {
        Ok(dt)
    } else {
        Err(SceneError::InvalidTimestep {
            path: scene.to_path_buf(),
            dt,
        })
    }
}

/// Runs one engine step, boxing the engine's error into a scene failure.
pub(crate) fn step_scene<E: Engine + ?Sized>(
    engine: &mut E,
    root: NodeId,
    dt: f64,
    scene: &Path,
    step: u32,
) -> Result<(), SceneError> {
    engine
        .step(root, dt)
        .map_err(|source| SceneError::Step {
            path: scene.to_path_buf(),
            step,
            source: Box::new(source),
        })
}
