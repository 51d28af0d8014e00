//! # Handler Registry
//!
//! Actions and conditions are not part of the engine. They are looked up by
//! action id in a [`HandlerRegistry`] (strategy table) and invoked with their
//! parameters already resolved.

use crate::context::ExecutionContext;
use crate::error::HandlerError;
use ahash::AHashMap;
use async_trait::async_trait;
use lodestone_core::{ActionCatalog, BlockKind, Value};
use std::sync::Arc;

/// Resolved parameters of one node, in slot order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    slots: Vec<(String, Value)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, slot: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(slot, value);
        self
    }

    pub fn push(&mut self, slot: impl Into<String>, value: impl Into<Value>) {
        self.slots.push((slot.into(), value.into()));
    }

    pub fn get(&self, slot: &str) -> Option<&Value> {
        self.slots.iter().find(|(s, _)| s == slot).map(|(_, v)| v)
    }

    pub fn value(&self, slot: &str) -> Result<&Value, HandlerError> {
        self.get(slot)
            .ok_or_else(|| HandlerError::MissingParam(slot.to_string()))
    }

    pub fn number(&self, slot: &str) -> Result<f64, HandlerError> {
        self.value(slot)?.as_number().map_err(|source| HandlerError::Kind {
            slot: slot.to_string(),
            source,
        })
    }

    pub fn text(&self, slot: &str) -> Result<&str, HandlerError> {
        self.value(slot)?.as_text().map_err(|source| HandlerError::Kind {
            slot: slot.to_string(),
            source,
        })
    }

    pub fn boolean(&self, slot: &str) -> Result<bool, HandlerError> {
        self.value(slot)?.as_bool().map_err(|source| HandlerError::Kind {
            slot: slot.to_string(),
            source,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slots.iter().map(|(s, v)| (s.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl IntoIterator for Params {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter()
    }
}

/// An effectful instruction (send a message, wait, ...).
///
/// Handlers may suspend; the engine advances only after the returned future
/// completes.
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// Parameter slots the graph builder must find configured.
    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn invoke(&self, params: Params, ctx: &mut ExecutionContext) -> Result<(), HandlerError>;
}

/// A predicate evaluated by Condition nodes.
#[async_trait]
pub trait ConditionHandler: Send + Sync + 'static {
    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn test(&self, params: Params, ctx: &mut ExecutionContext) -> Result<bool, HandlerError>;
}

/// Action built from a synchronous closure.
pub struct ActionFn<F> {
    required: &'static [&'static str],
    f: F,
}

impl<F> ActionFn<F>
where
    F: Fn(&Params, &mut ExecutionContext) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    pub fn new(required: &'static [&'static str], f: F) -> Self {
        Self { required, f }
    }
}

#[async_trait]
impl<F> ActionHandler for ActionFn<F>
where
    F: Fn(&Params, &mut ExecutionContext) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn required_params(&self) -> &'static [&'static str] {
        self.required
    }

    async fn invoke(&self, params: Params, ctx: &mut ExecutionContext) -> Result<(), HandlerError> {
        (self.f)(&params, ctx)
    }
}

/// Condition built from a synchronous closure.
pub struct ConditionFn<F> {
    required: &'static [&'static str],
    f: F,
}

impl<F> ConditionFn<F>
where
    F: Fn(&Params, &ExecutionContext) -> Result<bool, HandlerError> + Send + Sync + 'static,
{
    pub fn new(required: &'static [&'static str], f: F) -> Self {
        Self { required, f }
    }
}

#[async_trait]
impl<F> ConditionHandler for ConditionFn<F>
where
    F: Fn(&Params, &ExecutionContext) -> Result<bool, HandlerError> + Send + Sync + 'static,
{
    fn required_params(&self) -> &'static [&'static str] {
        self.required
    }

    async fn test(&self, params: Params, ctx: &mut ExecutionContext) -> Result<bool, HandlerError> {
        (self.f)(&params, ctx)
    }
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    actions: AHashMap<String, Arc<dyn ActionHandler>>,
    conditions: AHashMap<String, Arc<dyn ConditionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. A later registration replaces an earlier one.
    pub fn register_action(&mut self, id: impl Into<String>, handler: impl ActionHandler) {
        self.actions.insert(id.into(), Arc::new(handler));
    }

    pub fn register_condition(&mut self, id: impl Into<String>, handler: impl ConditionHandler) {
        self.conditions.insert(id.into(), Arc::new(handler));
    }

    pub fn with_action(mut self, id: impl Into<String>, handler: impl ActionHandler) -> Self {
        self.register_action(id, handler);
        self
    }

    pub fn with_condition(mut self, id: impl Into<String>, handler: impl ConditionHandler) -> Self {
        self.register_condition(id, handler);
        self
    }

    pub fn action(&self, id: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.actions.get(id)
    }

    pub fn condition(&self, id: &str) -> Option<&Arc<dyn ConditionHandler>> {
        self.conditions.get(id)
    }

    pub fn action_ids(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn condition_ids(&self) -> impl Iterator<Item = &str> {
        self.conditions.keys().map(String::as_str)
    }
}

impl ActionCatalog for HandlerRegistry {
    fn required_params(&self, kind: BlockKind, action_id: &str) -> Option<&'static [&'static str]> {
        match kind {
            BlockKind::Action => self.action(action_id).map(|h| h.required_params()),
            BlockKind::Condition => self.condition(action_id).map(|h| h.required_params()),
            _ => Some(&[]),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("actions", &self.actions.len())
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_core::ValueKind;

    #[test]
    fn test_params_accessors() {
        let params = Params::new().with("text", "hi").with("n", 2i64);
        assert_eq!(params.text("text").unwrap(), "hi");
        assert_eq!(params.number("n").unwrap(), 2.0);
        assert!(matches!(
            params.number("text"),
            Err(HandlerError::Kind { source, .. }) if source.found == ValueKind::Text
        ));
        assert!(matches!(params.value("x"), Err(HandlerError::MissingParam(_))));
    }

    #[test]
    fn test_catalog_lookup() {
        let registry = HandlerRegistry::new()
            .with_action("greet", ActionFn::new(&["text"], |_, _| Ok(())))
            .with_condition("always", ConditionFn::new(&[], |_, _| Ok(true)));

        assert_eq!(
            ActionCatalog::required_params(&registry, BlockKind::Action, "greet"),
            Some(&["text"][..])
        );
        assert_eq!(
            ActionCatalog::required_params(&registry, BlockKind::Action, "always"),
            None
        );
        assert!(ActionCatalog::required_params(&registry, BlockKind::Condition, "always").is_some());
        assert!(ActionCatalog::required_params(&registry, BlockKind::VariableOp, "set:local").is_some());
    }
}
