//! # Block Nodes
//!
//! One `BlockNode` is one placed instruction. Nodes live in the arena of the
//! [`Script`](crate::script::Script) that owns them and point at each other
//! through [`NodeId`] handles:
//!
//! * `children` - the body of a `ControlOpen`/`ControlElse`/`FunctionDef`
//!   node, in order (only the direct body; nested bodies hang off their own
//!   bracket node).
//! * `next` - the sequential continuation at the same nesting depth.
//! * `alternate` - the `ControlElse` node of a conditional bracket.
//!
//! Together these form a tree: a node has exactly one parent slot.

use crate::value::Value;
use crate::world::BlockLocation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque handle into a script arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    Event,
    Action,
    Condition,
    ControlOpen,
    ControlElse,
    ControlClose,
    FunctionDef,
    FunctionCall,
    VariableOp,
}

impl BlockKind {
    /// Kinds that may start a chain.
    pub fn is_root(self) -> bool {
        matches!(self, BlockKind::Event | BlockKind::FunctionDef)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Storage tier of a variable. A read or write always names its tier;
/// tiers never shadow each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Local,
    #[serde(alias = "player")]
    PlayerPersistent,
    #[serde(alias = "world")]
    WorldGlobal,
    #[serde(alias = "server")]
    ServerGlobal,
}

impl Tier {
    pub const SHARED: [Tier; 3] = [Tier::PlayerPersistent, Tier::WorldGlobal, Tier::ServerGlobal];

    pub fn short_name(self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::PlayerPersistent => "player",
            Tier::WorldGlobal => "world",
            Tier::ServerGlobal => "server",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Tier::Local),
            "player" => Ok(Tier::PlayerPersistent),
            "world" => Ok(Tier::WorldGlobal),
            "server" => Ok(Tier::ServerGlobal),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// A parameter is either a literal or a reference resolved at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Param {
    Literal { value: Value },
    Variable { tier: Tier, name: String },
    /// A key of the triggering event's payload bag.
    Event { key: String },
}

impl Param {
    pub fn literal(value: impl Into<Value>) -> Self {
        Param::Literal {
            value: value.into(),
        }
    }

    pub fn variable(tier: Tier, name: impl Into<String>) -> Self {
        Param::Variable {
            tier,
            name: name.into(),
        }
    }

    pub fn event(key: impl Into<String>) -> Self {
        Param::Event { key: key.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSlot {
    pub name: String,
    pub param: Param,
}

impl ParamSlot {
    pub fn new(name: impl Into<String>, param: Param) -> Self {
        Self {
            name: name.into(),
            param,
        }
    }
}

/// Flavours of `ControlOpen`, selected by its action id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    /// `if`: body runs 0 or 1 times depending on the preceding condition.
    Conditional,
    /// `while`: body runs while the preceding condition holds.
    Loop,
    /// `repeat`: body runs `times` times.
    Repeat,
}

impl Bracket {
    pub fn from_action_id(action_id: &str) -> Option<Self> {
        match action_id {
            "if" => Some(Bracket::Conditional),
            "while" => Some(Bracket::Loop),
            "repeat" => Some(Bracket::Repeat),
            _ => None,
        }
    }

    /// Whether the bracket reads the result of the condition right before it.
    pub fn is_guarded(self) -> bool {
        matches!(self, Bracket::Conditional | Bracket::Loop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarOpKind {
    Set,
    Get,
    Add,
    Sub,
    Mul,
    Div,
}

/// A parsed `VariableOp` action id, e.g. `add:world`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarOp {
    pub op: VarOpKind,
    pub tier: Tier,
}

impl VarOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self.op,
            VarOpKind::Add | VarOpKind::Sub | VarOpKind::Mul | VarOpKind::Div
        )
    }
}

impl FromStr for VarOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (op, tier) = s
            .split_once(':')
            .ok_or_else(|| format!("variable operation '{}' must look like <op>:<tier>", s))?;
        let op = match op {
            "set" => VarOpKind::Set,
            "get" => VarOpKind::Get,
            "add" => VarOpKind::Add,
            "sub" => VarOpKind::Sub,
            "mul" => VarOpKind::Mul,
            "div" => VarOpKind::Div,
            other => return Err(format!("unknown variable operation '{}'", other)),
        };
        Ok(VarOp {
            op,
            tier: tier.parse()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockNode {
    pub id: NodeId,
    pub kind: BlockKind,
    pub action_id: String,
    pub params: Vec<ParamSlot>,
    pub location: BlockLocation,
    pub enabled: bool,
    pub children: Vec<NodeId>,
    pub next: Option<NodeId>,
    pub alternate: Option<NodeId>,
}

impl BlockNode {
    pub fn new(id: NodeId, kind: BlockKind, location: BlockLocation) -> Self {
        Self {
            id,
            kind,
            action_id: String::new(),
            params: Vec::new(),
            location,
            enabled: true,
            children: Vec::new(),
            next: None,
            alternate: None,
        }
    }

    pub fn param(&self, slot: &str) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.name == slot)
            .map(|p| &p.param)
    }

    pub fn has_param(&self, slot: &str) -> bool {
        self.param(slot).is_some()
    }

    pub fn bracket(&self) -> Option<Bracket> {
        match self.kind {
            BlockKind::ControlOpen => Bracket::from_action_id(&self.action_id),
            _ => None,
        }
    }

    pub fn var_op(&self) -> Option<VarOp> {
        match self.kind {
            BlockKind::VariableOp => self.action_id.parse().ok(),
            _ => None,
        }
    }

    pub fn first_child(&self) -> Option<NodeId> {
        self.children.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_op_parse() {
        let op: VarOp = "add:world".parse().unwrap();
        assert_eq!(op.op, VarOpKind::Add);
        assert_eq!(op.tier, Tier::WorldGlobal);
        assert!(op.is_arithmetic());

        let get: VarOp = "get:local".parse().unwrap();
        assert!(!get.is_arithmetic());

        assert!("add".parse::<VarOp>().is_err());
        assert!("pow:local".parse::<VarOp>().is_err());
        assert!("set:galaxy".parse::<VarOp>().is_err());
    }

    #[test]
    fn test_bracket_flavours() {
        assert_eq!(Bracket::from_action_id("if"), Some(Bracket::Conditional));
        assert_eq!(Bracket::from_action_id("while"), Some(Bracket::Loop));
        assert!(!Bracket::Repeat.is_guarded());
        assert_eq!(Bracket::from_action_id("unless"), None);
    }

    #[test]
    fn test_param_json_shape() {
        let slot = ParamSlot::new("name", Param::variable(Tier::WorldGlobal, "count"));
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "name",
                "param": { "type": "variable", "tier": "world_global", "name": "count" }
            })
        );

        let parsed: Param =
            serde_json::from_value(serde_json::json!({ "type": "variable", "tier": "world", "name": "x" }))
                .unwrap();
        assert_eq!(parsed, Param::variable(Tier::WorldGlobal, "x"));
    }
}
