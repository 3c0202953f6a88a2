use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::engine::{Engine, NodeId, PositionsView, StateObjectId};

#[derive(Debug, Error)]
pub(crate) enum FakeEngineError {
    #[error("no fake scene registered for {path}")]
    UnknownScene { path: PathBuf },
    #[error("fake step {step} failed")]
    StepFailed { step: u32 },
}

#[derive(Debug, Clone)]
struct FakeNode {
    name: String,
    children: Vec<NodeId>,
    parents: Vec<NodeId>,
    solver: bool,
    mapping: bool,
    state: Option<StateObjectId>,
}

#[derive(Debug, Clone)]
struct FakeState {
    name: String,
    dof_per_point: usize,
    values: Vec<f64>,
    drift: f64,
}

/// In-memory scene graph. Every state value moves by its drift on each step.
#[derive(Debug, Clone)]
pub(crate) struct FakeScene {
    nodes: Vec<FakeNode>,
    states: Vec<FakeState>,
    dt: f64,
    fail_at_step: Option<u32>,
    step_delay: Option<Duration>,
}

impl FakeScene {
    pub(crate) fn new(root_name: &str) -> Self {
        Self {
            nodes: vec![FakeNode {
                name: root_name.to_string(),
                children: Vec::new(),
                parents: Vec::new(),
                solver: false,
                mapping: false,
                state: None,
            }],
            states: Vec::new(),
            dt: 0.01,
            fail_at_step: None,
            step_delay: None,
        }
    }

    /// Root with one solver child holding a single `points x dof` object.
    pub(crate) fn single_body(points: usize, dof: usize) -> Self {
        let mut scene = Self::new("root");
        let body = scene.add_child(scene.root(), "body");
        scene.set_solver(body);
        scene.add_state(body, "dofs", points, dof);
        scene
    }

    pub(crate) fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub(crate) fn add_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(FakeNode {
            name: name.to_string(),
            children: Vec::new(),
            parents: vec![parent],
            solver: false,
            mapping: false,
            state: None,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Adds `child` under a second parent.
    pub(crate) fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parents.push(parent);
    }

    pub(crate) fn set_solver(&mut self, node: NodeId) {
        self.nodes[node.0].solver = true;
    }

    pub(crate) fn set_mapping(&mut self, node: NodeId) {
        self.nodes[node.0].mapping = true;
    }

    pub(crate) fn add_state(
        &mut self,
        node: NodeId,
        name: &str,
        points: usize,
        dof: usize,
    ) -> StateObjectId {
        let id = StateObjectId(self.states.len());
        let values = (0..points * dof).map(|i| i as f64 * 0.5).collect();
        self.states.push(FakeState {
            name: name.to_string(),
            dof_per_point: dof,
            values,
            drift: 0.1,
        });
        self.nodes[node.0].state = Some(id);
        id
    }

    pub(crate) fn set_values(&mut self, state: StateObjectId, values: Vec<f64>) {
        self.states[state.0].values = values;
    }

    pub(crate) fn set_drift(&mut self, state: StateObjectId, drift: f64) {
        self.states[state.0].drift = drift;
    }

    pub(crate) fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    pub(crate) fn fail_at_step(&mut self, step: u32) {
        self.fail_at_step = Some(step);
    }

    /// Makes every step sleep for `delay`.
    pub(crate) fn set_step_delay(&mut self, delay: Duration) {
        self.step_delay = Some(delay);
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeEngine {
    registered: HashMap<PathBuf, FakeScene>,
    loaded: Option<FakeScene>,
    steps_taken: u32,
    loads: usize,
    unloads: usize,
    parent_queries: Cell<usize>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, path: impl Into<PathBuf>, scene: FakeScene) {
        self.registered.insert(path.into(), scene);
    }

    /// Loads a scene directly, bypassing the path registry.
    pub(crate) fn load(&mut self, scene: FakeScene) -> NodeId {
        let root = scene.root();
        self.loaded = Some(scene);
        self.steps_taken = 0;
        self.loads += 1;
        root
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads
    }

    pub(crate) fn unloads(&self) -> usize {
        self.unloads
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub(crate) fn steps_taken(&self) -> u32 {
        self.steps_taken
    }

    pub(crate) fn parent_queries(&self) -> usize {
        self.parent_queries.get()
    }

    fn node(&self, node: NodeId) -> Option<&FakeNode> {
        self.loaded.as_ref()?.nodes.get(node.0)
    }

    fn state(&self, id: StateObjectId) -> Option<&FakeState> {
        self.loaded.as_ref()?.states.get(id.0)
    }
}

impl Engine for FakeEngine {
    type Error = FakeEngineError;

    fn load_scene(&mut self, path: &Path) -> Result<NodeId, Self::Error> {
        let scene = self
            .registered
            .get(path)
            .cloned()
            .ok_or_else(|| FakeEngineError::UnknownScene {
                path: path.to_path_buf(),
            })?;
        Ok(self.load(scene))
    }

    fn step(&mut self, _root: NodeId, _dt: f64) -> Result<(), Self::Error> {
        let step = self.steps_taken;
        if let Some(scene) = self.loaded.as_mut() {
            if scene.fail_at_step == Some(step) {
                return Err(FakeEngineError::StepFailed { step });
            }
            if let Some(delay) = scene.step_delay {
                thread::sleep(delay);
            }
            for state in &mut scene.states {
                let drift = state.drift;
                state.values.iter_mut().for_each(|value| *value += drift);
            }
        }
        self.steps_taken += 1;
        Ok(())
    }

    fn unload(&mut self, _root: NodeId) {
        if self.loaded.take().is_some() {
            self.unloads += 1;
        }
    }

    fn timestep(&self, _root: NodeId) -> f64 {
        self.loaded.as_ref().map_or(0.0, |scene| scene.dt)
    }

    fn children(&self, node: NodeId) -> &[NodeId] {
        self.node(node)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    fn parents(&self, node: NodeId) -> &[NodeId] {
        self.parent_queries.set(self.parent_queries.get() + 1);
        self.node(node)
            .map(|node| node.parents.as_slice())
            .unwrap_or_default()
    }

    fn node_name(&self, node: NodeId) -> &str {
        self.node(node).map_or("", |node| node.name.as_str())
    }

    fn has_integration_solver(&self, node: NodeId) -> bool {
        self.node(node).is_some_and(|node| node.solver)
    }

    fn state_object(&self, node: NodeId) -> Option<StateObjectId> {
        self.node(node)?.state
    }

    fn has_mechanical_mapping(&self, node: NodeId) -> bool {
        self.node(node).is_some_and(|node| node.mapping)
    }

    fn state_object_name(&self, id: StateObjectId) -> &str {
        self.state(id).map_or("", |state| state.name.as_str())
    }

    fn positions(&self, id: StateObjectId) -> PositionsView<'_> {
        self.state(id).map_or(PositionsView::new(&[], 0), |state| {
            PositionsView::new(&state.values, state.dof_per_point)
        })
    }
}
