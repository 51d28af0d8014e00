//! # Script: A Rooted Tree of Block Nodes
//!
//! A `Script` owns an arena of [`BlockNode`]s. Node `#0` is always the root
//! (an `Event` or `FunctionDef`). Every node reachable from the root lives in
//! this arena and nowhere else.

use crate::block::{BlockKind, BlockNode, NodeId};
use crate::error::ConfigurationError;
use crate::world::{BlockLocation, BlockPos, WorldId};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable identity of a script: the position of its root marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptKey {
    pub world: WorldId,
    pub root: BlockPos,
}

impl fmt::Display for ScriptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.world, self.root)
    }
}

impl From<&BlockLocation> for ScriptKey {
    fn from(location: &BlockLocation) -> Self {
        Self {
            world: location.world.clone(),
            root: location.pos,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub key: ScriptKey,
    pub enabled: bool,
    nodes: Vec<BlockNode>,
    /// Configuration errors that disabled this script.
    pub errors: Vec<ConfigurationError>,
}

impl Script {
    pub(crate) fn from_nodes(key: ScriptKey, nodes: Vec<BlockNode>) -> Self {
        Self {
            key,
            enabled: true,
            nodes,
            errors: Vec::new(),
        }
    }

    pub const ROOT: NodeId = NodeId(0);

    pub fn root(&self) -> &BlockNode {
        &self.nodes[Self::ROOT.index()]
    }

    pub fn world(&self) -> &WorldId {
        &self.key.world
    }

    pub fn node(&self, id: NodeId) -> Option<&BlockNode> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> &[BlockNode] {
        &self.nodes
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn next_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.next)
    }

    pub fn is_function(&self) -> bool {
        self.root().kind == BlockKind::FunctionDef
    }

    /// The trigger key of an event script or the name of a function.
    pub fn name(&self) -> &str {
        &self.root().action_id
    }

    /// Mark the script invalid. It is never dispatched afterwards.
    pub fn disable(&mut self, error: ConfigurationError) {
        self.enabled = false;
        self.errors.push(error);
    }

    /// Nesting depth of every node (root = 0), in arena order.
    pub fn depths(&self) -> Vec<usize> {
        let mut depths = vec![0; self.nodes.len()];
        let mut stack = vec![(Self::ROOT, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            depths[id.index()] = depth;
            for child in &node.children {
                stack.push((*child, depth + 1));
            }
            if let Some(alt) = node.alternate {
                stack.push((alt, depth));
            }
        }
        depths
    }
}

/// All scripts of one world, in build (registration) order.
#[derive(Debug, Clone, Default)]
pub struct ScriptSet {
    scripts: Vec<Arc<Script>>,
    by_key: AHashMap<ScriptKey, usize>,
    functions: AHashMap<String, usize>,
}

impl ScriptSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, script: Script) {
        let idx = self.scripts.len();
        self.by_key.insert(script.key.clone(), idx);
        if script.is_function() && script.enabled {
            // First definition wins; duplicates are rejected by the builder.
            self.functions.entry(script.name().to_string()).or_insert(idx);
        }
        self.scripts.push(Arc::new(script));
    }

    pub fn get(&self, key: &ScriptKey) -> Option<&Arc<Script>> {
        self.by_key.get(key).map(|idx| &self.scripts[*idx])
    }

    /// Resolve an enabled function definition by name.
    pub fn function(&self, name: &str) -> Option<&Arc<Script>> {
        self.functions.get(name).map(|idx| &self.scripts[*idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Script>> {
        self.scripts.iter()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn disabled(&self) -> impl Iterator<Item = &Arc<Script>> {
        self.scripts.iter().filter(|s| !s.enabled)
    }
}
