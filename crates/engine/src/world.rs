use std::path::{Path, PathBuf};

use regression::{Engine, NodeId, PositionsView, StateObjectId};
use thiserror::Error;
use tracing::{debug, info};

use crate::loader::{load_scene_file, MappingDesc, SceneDesc, SceneLoadError, Template};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] SceneLoadError),
    #[error("no scene is loaded")]
    NoSceneLoaded,
    #[error("node {root:?} is not the root of the loaded scene")]
    UnknownRoot { root: NodeId },
}

#[derive(Debug, Clone)]
struct WorldNode {
    name: String,
    children: Vec<NodeId>,
    parents: Vec<NodeId>,
    solver: bool,
    state: Option<StateObjectId>,
    mapping: Option<WorldMapping>,
}

#[derive(Debug, Clone, Copy)]
struct WorldMapping {
    input: StateObjectId,
    output: StateObjectId,
    offset: [f64; 3],
}

#[derive(Debug, Clone)]
struct WorldState {
    name: String,
    template: Template,
    positions: Vec<f64>,
    velocities: Vec<f64>,
    integrated: bool,
}

#[derive(Debug, Clone)]
struct World {
    path: PathBuf,
    gravity: [f64; 3],
    dt: f64,
    nodes: Vec<WorldNode>,
    states: Vec<WorldState>,
    /// Mappings in node pre-order, so chained mappings see updated inputs.
    mappings: Vec<WorldMapping>,
    steps: u64,
}

impl World {
    fn build(path: &Path, desc: SceneDesc) -> Self {
        let mut nodes = Vec::<WorldNode>::with_capacity(desc.nodes.len());
        let mut states = Vec::new();
        let mut mappings = Vec::new();
        let mut under_solver = Vec::<bool>::with_capacity(desc.nodes.len());

        for (index, node) in desc.nodes.into_iter().enumerate() {
            let id = NodeId(index);
            let parent = node.parent.map(NodeId);
            if let Some(parent) = parent {
                nodes[parent.0].children.push(id);
            }
            let simulated = node.solver || parent.is_some_and(|parent| under_solver[parent.0]);
            under_solver.push(simulated);

            let state = node.state.map(|state| {
                let state_id = StateObjectId(states.len());
                states.push(WorldState {
                    name: state.name,
                    template: state.template,
                    positions: state.positions,
                    velocities: state.velocities,
                    integrated: simulated && node.mapping.is_none(),
                });
                state_id
            });

            let mapping = match (node.mapping, state) {
                (Some(desc), Some(output)) => {
                    nearest_ancestor_state(&nodes, parent).map(|input| WorldMapping {
                        input,
                        output,
                        offset: match desc {
                            MappingDesc::Identity => [0.0; 3],
                            MappingDesc::Translation { offset } => offset,
                        },
                    })
                }
                _ => None,
            };
            mappings.extend(mapping);

            nodes.push(WorldNode {
                name: node.name,
                children: Vec::new(),
                parents: parent.into_iter().collect(),
                solver: node.solver,
                state,
                mapping,
            });
        }

        let mut world = Self {
            path: path.to_path_buf(),
            gravity: desc.gravity,
            dt: desc.dt,
            nodes,
            states,
            mappings,
            steps: 0,
        };
        world.apply_mappings();
        world
    }

    fn integrate(&mut self, dt: f64) {
        let gravity = self.gravity;
        for state in self.states.iter_mut().filter(|state| state.integrated) {
            let dof = state.template.dof_per_point();
            let moving = state.template.translational_dofs();
            for (position, velocity) in state
                .positions
                .chunks_mut(dof)
                .zip(state.velocities.chunks_mut(dof))
            {
                for axis in 0..moving {
                    velocity[axis] += gravity[axis] * dt;
                    position[axis] += velocity[axis] * dt;
                }
            }
        }
    }

    fn apply_mappings(&mut self) {
        for index in 0..self.mappings.len() {
            let mapping = self.mappings[index];
            let input = &self.states[mapping.input.0];
            let input_dof = input.template.dof_per_point();
            let input_moving = input.template.translational_dofs();
            let source = input.positions.clone();

            let output = &mut self.states[mapping.output.0];
            let output_dof = output.template.dof_per_point();
            let axes = input_moving.min(output.template.translational_dofs());
            for (target, origin) in output
                .positions
                .chunks_mut(output_dof)
                .zip(source.chunks(input_dof))
            {
                for axis in 0..axes {
                    target[axis] = origin[axis] + mapping.offset[axis];
                }
            }
        }
    }
}

fn nearest_ancestor_state(nodes: &[WorldNode], mut current: Option<NodeId>) -> Option<StateObjectId> {
    while let Some(node) = current {
        let node = &nodes[node.0];
        if node.state.is_some() {
            return node.state;
        }
        current = node.parents.first().copied();
    }
    None
}

/// Point masses falling under gravity, loaded from XML scene files.
///
/// Integrated objects use semi-implicit Euler on their translational
/// components; rotations never change. Mapped objects follow their input.
#[derive(Debug, Default)]
pub struct PointMassEngine {
    world: Option<World>,
}

impl PointMassEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded_scene(&self) -> Option<&Path> {
        self.world.as_ref().map(|world| world.path.as_path())
    }

    fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    fn node(&self, node: NodeId) -> Option<&WorldNode> {
        self.world()?.nodes.get(node.0)
    }

    fn state(&self, id: StateObjectId) -> Option<&WorldState> {
        self.world()?.states.get(id.0)
    }
}

impl Engine for PointMassEngine {
    type Error = EngineError;

    fn load_scene(&mut self, path: &Path) -> Result<NodeId, Self::Error> {
        let desc = load_scene_file(path)?;
        let world = World::build(path, desc);
        info!(
            scene = %path.display(),
            nodes = world.nodes.len(),
            state_objects = world.states.len(),
            dt = world.dt,
            "scene_loaded"
        );
        self.world = Some(world);
        Ok(NodeId(0))
    }

    fn step(&mut self, root: NodeId, dt: f64) -> Result<(), Self::Error> {
        let world = self.world.as_mut().ok_or(EngineError::NoSceneLoaded)?;
        if root != NodeId(0) {
            return Err(EngineError::UnknownRoot { root });
        }
        world.integrate(dt);
        world.apply_mappings();
        world.steps += 1;
        Ok(())
    }

    fn unload(&mut self, _root: NodeId) {
        if let Some(world) = self.world.take() {
            debug!(scene = %world.path.display(), steps = world.steps, "scene_unloaded");
        }
    }

    fn timestep(&self, _root: NodeId) -> f64 {
        self.world().map_or(0.0, |world| world.dt)
    }

    fn children(&self, node: NodeId) -> &[NodeId] {
        self.node(node)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    fn parents(&self, node: NodeId) -> &[NodeId] {
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
        self.node(node).is_some_and(|node| node.mapping.is_some())
    }

    fn state_object_name(&self, id: StateObjectId) -> &str {
        self.state(id).map_or("", |state| state.name.as_str())
    }

    fn positions(&self, id: StateObjectId) -> PositionsView<'_> {
        match self.state(id) {
            Some(state) => PositionsView::new(&state.positions, state.template.dof_per_point()),
            None => PositionsView::new(&[], 0),
        }
    }
}
