use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::engine::{Engine, NodeId, StateObjectId};
use crate::types::{SceneError, Snapshot};

/// A selected state object, valid until the scene is unloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateObjectHandle {
    /// Position in traversal order; part of every reference filename.
    pub index: usize,
    pub node: NodeId,
    pub state: StateObjectId,
    pub name: String,
    /// Node-name path from the root down to the object, e.g. `root/body/dofs`.
    pub key: String,
}

impl StateObjectHandle {
    /// Copies the object's current positions out of the engine.
    pub fn snapshot<E: Engine + ?Sized>(&self, engine: &E) -> Result<Snapshot, SceneError> {
        engine
            .positions(self.state)
            .to_snapshot()
            .map_err(|source| SceneError::InvalidPositions {
                index: self.index,
                name: self.name.clone(),
                source,
            })
    }
}

/// Walks the scene below `root` in pre-order and returns every simulated
/// state object, skipping mapped ones unless `include_mapped` is set.
pub fn select_state_objects<E: Engine + ?Sized>(
    engine: &E,
    root: NodeId,
    include_mapped: bool,
) -> Vec<StateObjectHandle> {
    let mut simulated = SimulatedMemo::default();
    let mut visited = HashSet::from([root]);
    let mut selected = Vec::new();

    let root_path = engine.node_name(root).to_string();
    let mut stack = engine
        .children(root)
        .iter()
        .rev()
        .map(|child| (*child, root_path.clone()))
        .collect::<Vec<_>>();

    while let Some((node, parent_path)) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        let path = format!("{parent_path}/{}", engine.node_name(node));

        if let Some(state) = engine.state_object(node) {
            let mapped = engine.has_mechanical_mapping(node);
            if (include_mapped || !mapped) && simulated.is_simulated(engine, node) {
                let name = engine.state_object_name(state).to_string();
                selected.push(StateObjectHandle {
                    index: selected.len(),
                    node,
                    state,
                    key: format!("{path}/{name}"),
                    name,
                });
            }
        }

        for child in engine.children(node).iter().rev() {
            stack.push((*child, path.clone()));
        }
    }

    debug!(
        root = engine.node_name(root),
        include_mapped,
        selected = selected.len(),
        "state_objects_selected"
    );
    selected
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done(bool),
}

/// Per-selection cache of the "has a solver on some ancestor path" answer.
#[derive(Default)]
struct SimulatedMemo {
    visits: HashMap<NodeId, Visit>,
}

impl SimulatedMemo {
    fn is_simulated<E: Engine + ?Sized>(&mut self, engine: &E, node: NodeId) -> bool {
        match self.visits.get(&node) {
            Some(Visit::Done(answer)) => return *answer,
            Some(Visit::InProgress) => return false,
            None => {}
        }
        self.visits.insert(node, Visit::InProgress);

        let answer = engine.has_integration_solver(node)
            || engine
                .parents(node)
                .iter()
                .any(|parent| self.is_simulated(engine, *parent));

        self.visits.insert(node, Visit::Done(answer));
        answer
    }
}
