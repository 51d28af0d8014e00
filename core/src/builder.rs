//! # Graph Builder: Spatial Arrangement to Script Trees
//!
//! `GraphBuilder::build` compiles a [`WorldSnapshot`] into a [`ScriptSet`].
//!
//! ## Layout
//!
//! * Code markers sharing `(y, z)` in a world form one **chain**.
//! * Chains are scanned in `(z, y)` order, markers within a chain by `x`.
//! * The first marker of a chain is the script root (`Event`/`FunctionDef`).
//! * `ControlOpen` pushes a scope, `ControlClose` pops it and binds the
//!   collected nodes as the bracket's `children`. Nodes at the same depth are
//!   linked through `next`.
//!
//! The whole world is rebuilt on every structural edit; there is no partial
//! invalidation.

use crate::block::{BlockKind, BlockNode, Bracket, NodeId, VarOp, VarOpKind};
use crate::config::Palette;
use crate::error::ConfigurationError;
use crate::script::{Script, ScriptKey, ScriptSet};
use crate::world::{BlockLocation, BlockPos, Marker, MarkerConfig, WorldSnapshot};
use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;

/// Knows which action and condition ids exist and what they require.
///
/// Implemented by the runtime handler registry.
pub trait ActionCatalog {
    /// Required parameter slots of `action_id`, or `None` if it is unknown.
    fn required_params(&self, kind: BlockKind, action_id: &str) -> Option<&'static [&'static str]>;
}

/// A catalog that accepts every action id and requires nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyAction;

impl ActionCatalog for AnyAction {
    fn required_params(&self, _kind: BlockKind, _action_id: &str) -> Option<&'static [&'static str]> {
        Some(&[])
    }
}

/// Result of one world build.
#[derive(Debug, Default)]
pub struct BuildOutput {
    pub scripts: ScriptSet,
    /// Problems not attributable to any script (e.g. rootless chains).
    pub diagnostics: Vec<ConfigurationError>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    palette: Palette,
}

struct Scope {
    owner: NodeId,
    body: Vec<NodeId>,
}

/// Builds the arena of a single chain.
struct ChainBuilder<'a> {
    world: &'a crate::world::WorldId,
    configs: &'a AHashMap<BlockPos, &'a MarkerConfig>,
    catalog: &'a dyn ActionCatalog,
    nodes: Vec<BlockNode>,
    stack: Vec<Scope>,
    errors: Vec<ConfigurationError>,
}

impl GraphBuilder {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn build(&self, snapshot: &WorldSnapshot, catalog: &dyn ActionCatalog) -> BuildOutput {
        let mut output = BuildOutput::default();

        let mut configs: AHashMap<BlockPos, &MarkerConfig> = AHashMap::new();
        for config in &snapshot.configs {
            configs.insert(config.pos, config);
        }

        // (z, y) -> [(kind, marker)]
        let mut chains: BTreeMap<(i32, i32), Vec<(BlockKind, &Marker)>> = BTreeMap::new();
        let mut code_positions = AHashSet::new();
        for marker in &snapshot.markers {
            let Some(kind) = self.palette.classify(&marker.material) else {
                continue;
            };
            code_positions.insert(marker.pos);
            chains
                .entry((marker.pos.z, marker.pos.y))
                .or_default()
                .push((kind, marker));
        }

        for config in &snapshot.configs {
            if !code_positions.contains(&config.pos) {
                tracing::debug!(
                    lodestone.world = %snapshot.world,
                    pos = %config.pos,
                    action_id = %config.action_id,
                    "Ignoring configuration without a code marker"
                );
            }
        }

        let mut built = Vec::new();
        for (_, mut chain) in chains {
            chain.sort_by_key(|(_, marker)| marker.pos.x);
            let (root_kind, root_marker) = chain[0];
            let root_location = BlockLocation {
                world: snapshot.world.clone(),
                pos: root_marker.pos,
            };
            if !root_kind.is_root() {
                let error = ConfigurationError::MissingRoot {
                    location: root_location,
                };
                tracing::warn!(%error, "Skipping chain");
                output.diagnostics.push(error);
                continue;
            }

            let mut chain_builder = ChainBuilder {
                world: &snapshot.world,
                configs: &configs,
                catalog,
                nodes: Vec::with_capacity(chain.len()),
                stack: Vec::new(),
                errors: Vec::new(),
            };
            let script = chain_builder.build(&chain);
            built.push(script);
        }

        resolve_functions(&mut built);

        for script in built {
            for error in &script.errors {
                tracing::warn!(lodestone.script = %script.key, %error, "Script disabled");
            }
            output.scripts.insert(script);
        }

        tracing::debug!(
            lodestone.world = %snapshot.world,
            scripts = output.scripts.len(),
            disabled = output.scripts.disabled().count(),
            "World rebuilt"
        );
        output
    }
}

impl ChainBuilder<'_> {
    fn build(&mut self, chain: &[(BlockKind, &Marker)]) -> Script {
        let (root_kind, root_marker) = chain[0];
        let root = self.push_node(root_kind, root_marker);
        self.stack.push(Scope {
            owner: root,
            body: Vec::new(),
        });

        for (kind, marker) in &chain[1..] {
            match kind {
                BlockKind::Event | BlockKind::FunctionDef => {
                    let location = self.location(marker.pos);
                    self.errors.push(ConfigurationError::MisplacedRoot {
                        kind: *kind,
                        location,
                    });
                }
                BlockKind::ControlOpen => {
                    let id = self.push_node(*kind, marker);
                    self.check_guard(id);
                    self.append(id);
                    self.stack.push(Scope {
                        owner: id,
                        body: Vec::new(),
                    });
                }
                BlockKind::ControlElse => self.open_else(marker),
                BlockKind::ControlClose => {
                    if self.stack.len() <= 1 {
                        let location = self.location(marker.pos);
                        self.errors
                            .push(ConfigurationError::UnmatchedClose { location });
                        continue;
                    }
                    self.close_scope();
                }
                _ => {
                    let id = self.push_node(*kind, marker);
                    self.append(id);
                }
            }
        }

        while self.stack.len() > 1 {
            let owner = self.close_scope();
            let location = self.nodes[owner.index()].location.clone();
            self.errors
                .push(ConfigurationError::UnmatchedOpen { location });
        }
        self.close_scope();

        let key = ScriptKey::from(&self.nodes[0].location);
        let mut script = Script::from_nodes(key, std::mem::take(&mut self.nodes));
        for error in self.errors.drain(..) {
            script.disable(error);
        }
        script
    }

    fn location(&self, pos: BlockPos) -> BlockLocation {
        BlockLocation {
            world: self.world.clone(),
            pos,
        }
    }

    /// Create a node for `marker`, attach its configuration and validate it.
    fn push_node(&mut self, kind: BlockKind, marker: &Marker) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let mut node = BlockNode::new(id, kind, self.location(marker.pos));
        match self.configs.get(&marker.pos) {
            Some(config) => {
                node.action_id = config.action_id.clone();
                node.params = config.params.clone();
                node.enabled = config.enabled;
            }
            None if kind == BlockKind::ControlElse => {}
            None => {
                self.errors.push(ConfigurationError::MissingConfiguration {
                    kind,
                    location: node.location.clone(),
                });
            }
        }
        if !node.action_id.is_empty() {
            if let Err(error) = self.validate(&node) {
                self.errors.push(error);
            }
        }
        self.nodes.push(node);
        id
    }

    fn validate(&self, node: &BlockNode) -> Result<(), ConfigurationError> {
        let unknown = || ConfigurationError::UnknownAction {
            kind: node.kind,
            action_id: node.action_id.clone(),
            location: node.location.clone(),
        };
        let require = |slot: &str| {
            if node.has_param(slot) {
                Ok(())
            } else {
                Err(ConfigurationError::MissingParameter {
                    action_id: node.action_id.clone(),
                    slot: slot.to_string(),
                    location: node.location.clone(),
                })
            }
        };

        match node.kind {
            BlockKind::Action | BlockKind::Condition => {
                let required = self
                    .catalog
                    .required_params(node.kind, &node.action_id)
                    .ok_or_else(unknown)?;
                for slot in required {
                    require(*slot)?;
                }
            }
            BlockKind::ControlOpen => {
                let bracket = node.bracket().ok_or_else(unknown)?;
                if bracket == Bracket::Repeat {
                    require("times")?;
                }
            }
            BlockKind::VariableOp => {
                let op: VarOp = node.action_id.parse().map_err(|_| unknown())?;
                require("name")?;
                if op.op != VarOpKind::Get {
                    require("value")?;
                }
            }
            BlockKind::Event
            | BlockKind::FunctionDef
            | BlockKind::FunctionCall
            | BlockKind::ControlElse
            | BlockKind::ControlClose => {}
        }
        Ok(())
    }

    /// `if`/`while` must read the condition directly before them.
    fn check_guard(&mut self, open: NodeId) {
        let node = &self.nodes[open.index()];
        let Some(bracket) = node.bracket() else {
            return;
        };
        if !bracket.is_guarded() {
            return;
        }
        let previous = self
            .stack
            .last()
            .and_then(|scope| scope.body.last())
            .map(|id| self.nodes[id.index()].kind);
        if previous != Some(BlockKind::Condition) {
            self.errors.push(ConfigurationError::UnguardedBracket {
                action_id: node.action_id.clone(),
                location: node.location.clone(),
            });
        }
    }

    /// Append `id` to the innermost scope, linking it after its previous sibling.
    fn append(&mut self, id: NodeId) {
        let Some(scope) = self.stack.last_mut() else {
            return;
        };
        if let Some(prev) = scope.body.last() {
            self.nodes[prev.index()].next = Some(id);
        }
        scope.body.push(id);
    }

    fn open_else(&mut self, marker: &Marker) {
        let open = match self.stack.last() {
            Some(scope) if self.stack.len() > 1 => {
                let owner = &self.nodes[scope.owner.index()];
                (owner.bracket() == Some(Bracket::Conditional) && owner.alternate.is_none())
                    .then_some(scope.owner)
            }
            _ => None,
        };
        let Some(open) = open else {
            let location = self.location(marker.pos);
            self.errors
                .push(ConfigurationError::MisplacedElse { location });
            return;
        };

        self.close_scope();
        let else_id = self.push_node(BlockKind::ControlElse, marker);
        self.nodes[open.index()].alternate = Some(else_id);
        self.stack.push(Scope {
            owner: else_id,
            body: Vec::new(),
        });
    }

    fn close_scope(&mut self) -> NodeId {
        let scope = self
            .stack
            .pop()
            .unwrap_or(Scope {
                owner: Script::ROOT,
                body: Vec::new(),
            });
        self.nodes[scope.owner.index()].children = scope.body;
        scope.owner
    }
}

/// Reject duplicate function names and calls to functions that do not exist
/// (or are themselves disabled). Repeats until no script changes state.
fn resolve_functions(scripts: &mut [Script]) {
    let mut seen = AHashSet::new();
    for script in scripts.iter_mut().filter(|s| s.is_function()) {
        if !seen.insert(script.name().to_string()) {
            let error = ConfigurationError::DuplicateFunction {
                name: script.name().to_string(),
                location: script.root().location.clone(),
            };
            script.disable(error);
        }
    }

    loop {
        let available: AHashSet<String> = scripts
            .iter()
            .filter(|s| s.is_function() && s.enabled)
            .map(|s| s.name().to_string())
            .collect();

        let mut changed = false;
        for script in scripts.iter_mut().filter(|s| s.enabled) {
            let missing = script
                .nodes()
                .iter()
                .find(|n| n.kind == BlockKind::FunctionCall && !available.contains(&n.action_id))
                .map(|n| ConfigurationError::UnknownAction {
                    kind: BlockKind::FunctionCall,
                    action_id: n.action_id.clone(),
                    location: n.location.clone(),
                });
            if let Some(error) = missing {
                script.disable(error);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}
