//! # Value: Tagged Data Exchanged Between Nodes
//!
//! A `Value` is immutable once built. Executing a script never mutates a
//! value in place; it only replaces the binding that holds it.
//!
//! There is no implicit coercion. Numeric operations require `Number`
//! operands and report a [`KindMismatch`] otherwise.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to an item stack (material + amount).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub material: String,
    pub amount: u32,
}

impl ItemRef {
    pub fn new(material: impl Into<String>, amount: u32) -> Self {
        Self {
            material: material.into(),
            amount,
        }
    }
}

/// A precise point in a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// The fixed set of value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Number,
    Text,
    Boolean,
    Item,
    Location,
    List,
    Unresolved,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Number => "number",
            ValueKind::Text => "text",
            ValueKind::Boolean => "boolean",
            ValueKind::Item => "item",
            ValueKind::Location => "location",
            ValueKind::List => "list",
            ValueKind::Unresolved => "unresolved",
        };
        f.write_str(name)
    }
}

/// Raised when a value of the wrong kind is used where a specific kind is required.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct KindMismatch {
    pub expected: ValueKind,
    pub found: ValueKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Number(f64),
    Text(String),
    Boolean(bool),
    Item(ItemRef),
    Location(Location),
    List(Vec<Value>),
    /// A binding that has never been assigned.
    #[default]
    Unresolved,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::Text(_) => ValueKind::Text,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Item(_) => ValueKind::Item,
            Value::Location(_) => ValueKind::Location,
            Value::List(_) => ValueKind::List,
            Value::Unresolved => ValueKind::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Value::Unresolved)
    }

    pub fn as_number(&self) -> Result<f64, KindMismatch> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(other.mismatch(ValueKind::Number)),
        }
    }

    pub fn as_text(&self) -> Result<&str, KindMismatch> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(other.mismatch(ValueKind::Text)),
        }
    }

    pub fn as_bool(&self) -> Result<bool, KindMismatch> {
        match self {
            Value::Boolean(b) => Ok(*b),
            other => Err(other.mismatch(ValueKind::Boolean)),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], KindMismatch> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(other.mismatch(ValueKind::List)),
        }
    }

    fn mismatch(&self, expected: ValueKind) -> KindMismatch {
        KindMismatch {
            expected,
            found: self.kind(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Item(item) => write!(f, "{}x{}", item.amount, item.material),
            Value::Location(loc) => {
                write!(f, "{}@{:.2},{:.2},{:.2}", loc.world, loc.x, loc.y, loc.z)
            }
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Unresolved => f.write_str("<unresolved>"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<ItemRef> for Value {
    fn from(item: ItemRef) -> Self {
        Value::Item(item)
    }
}

impl From<Location> for Value {
    fn from(loc: Location) -> Self {
        Value::Location(loc)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}
