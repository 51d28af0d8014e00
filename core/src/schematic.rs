use crate::block::BlockKind;
use crate::script::{Script, ScriptSet};
use serde::{Deserialize, Serialize};

/// The Static Analysis View of a Script.
///
/// `Schematic` is the node/edge view extracted from a built [`Script`].
/// It is used for visualization, documentation, and verification.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Schematic {
    pub name: String,
    pub script: String,
    pub enabled: bool,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub errors: Vec<String>,
}

impl Schematic {
    pub fn of(script: &Script) -> Self {
        let nodes = script
            .nodes()
            .iter()
            .map(|n| Node {
                id: n.id.0,
                kind: n.kind,
                label: n.action_id.clone(),
                location: n.location.to_string(),
                enabled: n.enabled,
            })
            .collect();

        let mut edges = Vec::new();
        for node in script.nodes() {
            if let Some(first) = node.first_child() {
                edges.push(Edge {
                    from: node.id.0,
                    to: first.0,
                    kind: EdgeType::Body,
                });
            }
            if let Some(alt) = node.alternate {
                edges.push(Edge {
                    from: node.id.0,
                    to: alt.0,
                    kind: EdgeType::Else,
                });
            }
            if let Some(next) = node.next {
                edges.push(Edge {
                    from: node.id.0,
                    to: next.0,
                    kind: EdgeType::Next,
                });
            }
        }

        Self {
            name: script.name().to_string(),
            script: script.key.to_string(),
            enabled: script.enabled,
            nodes,
            edges,
            errors: script.errors.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn all(scripts: &ScriptSet) -> Vec<Self> {
        scripts.iter().map(|s| Self::of(s)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub kind: BlockKind,
    pub label: String,
    pub location: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeType {
    /// First node of a bracket body.
    Body,
    /// Conditional bracket to its else branch.
    Else,
    /// Sequential continuation.
    Next,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: u32,
    pub to: u32,
    pub kind: EdgeType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{AnyAction, GraphBuilder};
    use crate::world::{BlockPos, WorldSnapshot};

    #[test]
    fn test_schematic_edges() {
        let p = |x| BlockPos::new(x, 0, 0);
        let snapshot = WorldSnapshot::new("w")
            .place(p(0), "diamond_block")
            .configure(p(0), "join", vec![])
            .place(p(1), "cobblestone")
            .configure(p(1), "a", vec![])
            .place(p(2), "cobblestone")
            .configure(p(2), "b", vec![]);
        let output = GraphBuilder::default().build(&snapshot, &AnyAction);
        let schematic = Schematic::all(&output.scripts).remove(0);

        assert_eq!(schematic.name, "join");
        assert_eq!(schematic.nodes.len(), 3);
        let kinds: Vec<_> = schematic.edges.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EdgeType::Body, EdgeType::Next]);
    }
}
