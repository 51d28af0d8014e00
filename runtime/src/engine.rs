//! # Execution Engine
//!
//! Walks a [`Script`] node by node against a [`HandlerRegistry`].
//!
//! The walk is an explicit frame stack rather than host recursion: brackets,
//! loops and function calls push frames, so the nesting depth of a script
//! (and the depth of recursive function calls) never touches the host stack.
//!
//! Every node is preceded by a budget checkpoint (cancellation, wall clock,
//! node count). A handler already running is never interrupted; the budget
//! is enforced at the next node.

use crate::context::{Budget, ExecutionContext};
use crate::error::ExecutionError;
use crate::handler::{HandlerRegistry, Params};
use crate::report::{Failure, InvocationObserver, InvocationReport, Outcome, TracingObserver};
use crate::store::VariableStore;
use chrono::Utc;
use futures_util::FutureExt;
use lodestone_core::{
    BlockKind, BlockLocation, BlockNode, Bracket, EngineConfig, NodeId, Param, Script, ScriptSet,
    Tier, Value, VarOpKind,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Yield to the scheduler every this many nodes, so long handler-free loops
/// do not starve other invocations on the same worker.
const YIELD_EVERY: u64 = 256;

enum Frame {
    /// Run nodes from `cursor` along `next` links.
    Body {
        script: Arc<Script>,
        cursor: Option<NodeId>,
    },
    /// Re-test `guard` after each pass through the body of `open`.
    Loop {
        script: Arc<Script>,
        guard: NodeId,
        open: NodeId,
        iterations: u32,
    },
    Repeat {
        script: Arc<Script>,
        open: NodeId,
        remaining: u64,
        iterations: u32,
    },
    /// Restore the caller's context when a function body completes.
    Return { caller: Box<ExecutionContext> },
}

impl Frame {
    fn body(script: &Arc<Script>, cursor: Option<NodeId>) -> Self {
        Frame::Body {
            script: Arc::clone(script),
            cursor,
        }
    }
}

/// An error plus the node it happened at.
struct Halt {
    error: ExecutionError,
    location: Option<BlockLocation>,
}

trait At<T> {
    fn at(self, node: &BlockNode) -> Result<T, Halt>;
}

impl<T> At<T> for Result<T, ExecutionError> {
    fn at(self, node: &BlockNode) -> Result<T, Halt> {
        self.map_err(|error| Halt {
            error,
            location: Some(node.location.clone()),
        })
    }
}

fn lookup(script: &Script, id: NodeId) -> Result<&BlockNode, Halt> {
    script.node(id).ok_or_else(|| Halt {
        error: ExecutionError::Malformed(format!("node {} is not part of {}", id, script.key)),
        location: None,
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

fn arithmetic(
    op: VarOpKind,
    current: &Value,
    operand: f64,
    context: &str,
) -> Result<Value, ExecutionError> {
    let current = current
        .as_number()
        .map_err(|e| ExecutionError::type_mismatch(context, e))?;
    let result = match op {
        VarOpKind::Add => current + operand,
        VarOpKind::Sub => current - operand,
        VarOpKind::Mul => current * operand,
        VarOpKind::Div if operand == 0.0 => {
            return Err(ExecutionError::DivisionByZero(context.to_string()));
        }
        VarOpKind::Div => current / operand,
        VarOpKind::Set | VarOpKind::Get => {
            return Err(ExecutionError::Malformed(format!(
                "{} is not an arithmetic operation",
                context
            )));
        }
    };
    Ok(Value::Number(result))
}

pub struct Engine {
    handlers: Arc<HandlerRegistry>,
    store: Arc<VariableStore>,
    config: EngineConfig,
    observer: Arc<dyn InvocationObserver>,
}

impl Engine {
    pub fn new(handlers: Arc<HandlerRegistry>, store: Arc<VariableStore>) -> Self {
        Self {
            handlers,
            store,
            config: EngineConfig::default(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn InvocationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn store(&self) -> &Arc<VariableStore> {
        &self.store
    }

    /// Run one invocation of `script` to completion.
    ///
    /// Never fails: every error is turned into the report's outcome, which is
    /// also handed to the observer. `scripts` is the set function calls are
    /// resolved against.
    pub async fn invoke(
        &self,
        scripts: Arc<ScriptSet>,
        script: Arc<Script>,
        mut ctx: ExecutionContext,
    ) -> InvocationReport {
        let span = tracing::info_span!(
            "Invocation",
            lodestone.script = %script.key,
            lodestone.world = %ctx.world,
            lodestone.invocation = %ctx.invocation_id,
        );

        async move {
            let started_at = Utc::now();
            let budget = ctx.arm(self.config.timeout());
            let invocation_id = ctx.invocation_id;
            let world = ctx.world.clone();
            let trigger = ctx.trigger.clone();
            let actor = ctx.actor.as_ref().map(|a| a.id.clone());

            let result = if script.enabled {
                self.walk(&scripts, &script, &mut ctx, &budget).await
            } else {
                Err(Halt {
                    error: ExecutionError::Malformed(format!("{} is disabled", script.key)),
                    location: Some(script.root().location.clone()),
                })
            };

            let outcome = match result {
                Ok(()) => Outcome::Completed,
                Err(halt) => Outcome::Failed(Failure::new(&halt.error, halt.location)),
            };
            let report = InvocationReport {
                invocation_id,
                script: script.key.clone(),
                world,
                trigger,
                actor,
                started_at,
                elapsed: budget.elapsed(),
                nodes_executed: budget.nodes(),
                outcome,
            };
            self.observer.observe(&report);
            report
        }
        .instrument(span)
        .await
    }

    async fn walk(
        &self,
        scripts: &ScriptSet,
        root: &Arc<Script>,
        ctx: &mut ExecutionContext,
        budget: &Budget,
    ) -> Result<(), Halt> {
        let mut stack = vec![Frame::body(root, root.root().first_child())];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Body { cursor: None, .. } => {}
                Frame::Body {
                    script,
                    cursor: Some(id),
                } => {
                    let node = lookup(&script, id)?;
                    self.checkpoint(ctx, budget).await.at(node)?;
                    if node.enabled {
                        self.step(scripts, &script, node, ctx, &mut stack).await?;
                    } else {
                        stack.push(Frame::body(&script, Self::skip(&script, node)));
                    }
                }
                Frame::Loop {
                    script,
                    guard,
                    open,
                    iterations,
                } => {
                    let guard_node = lookup(&script, guard)?;
                    let open_node = lookup(&script, open)?;
                    self.checkpoint(ctx, budget).await.at(guard_node)?;
                    if self.test(guard_node, ctx).await.at(guard_node)? {
                        if iterations >= self.config.max_loop_iterations {
                            return Err(ExecutionError::LoopBoundExceeded {
                                limit: self.config.max_loop_iterations,
                            })
                            .at(open_node);
                        }
                        stack.push(Frame::Loop {
                            script: Arc::clone(&script),
                            guard,
                            open,
                            iterations: iterations + 1,
                        });
                        stack.push(Frame::body(&script, open_node.first_child()));
                    }
                }
                Frame::Repeat {
                    script,
                    open,
                    remaining,
                    iterations,
                } => {
                    if remaining == 0 {
                        continue;
                    }
                    let open_node = lookup(&script, open)?;
                    if iterations >= self.config.max_loop_iterations {
                        return Err(ExecutionError::LoopBoundExceeded {
                            limit: self.config.max_loop_iterations,
                        })
                        .at(open_node);
                    }
                    stack.push(Frame::Repeat {
                        script: Arc::clone(&script),
                        open,
                        remaining: remaining - 1,
                        iterations: iterations + 1,
                    });
                    stack.push(Frame::body(&script, open_node.first_child()));
                }
                Frame::Return { caller } => {
                    *ctx = *caller;
                }
            }
        }
        Ok(())
    }

    /// Where to continue after a disabled node. A disabled guard takes its
    /// bracket down with it.
    fn skip(script: &Script, node: &BlockNode) -> Option<NodeId> {
        if node.kind == BlockKind::Condition {
            if let Some(open) = Self::guarded_bracket(script, node) {
                return open.next;
            }
        }
        node.next
    }

    fn guarded_bracket<'s>(script: &'s Script, condition: &BlockNode) -> Option<&'s BlockNode> {
        condition
            .next
            .and_then(|id| script.node(id))
            .filter(|n| n.bracket().is_some_and(Bracket::is_guarded))
    }

    async fn step(
        &self,
        scripts: &ScriptSet,
        script: &Arc<Script>,
        node: &BlockNode,
        ctx: &mut ExecutionContext,
        stack: &mut Vec<Frame>,
    ) -> Result<(), Halt> {
        match node.kind {
            BlockKind::Action => {
                self.act(node, ctx).await.at(node)?;
                stack.push(Frame::body(script, node.next));
            }
            BlockKind::Condition => {
                let holds = self.test(node, ctx).await.at(node)?;
                match Self::guarded_bracket(script, node) {
                    Some(open) => {
                        stack.push(Frame::body(script, open.next));
                        if !open.enabled {
                            return Ok(());
                        }
                        if open.bracket() == Some(Bracket::Loop) {
                            if holds {
                                stack.push(Frame::Loop {
                                    script: Arc::clone(script),
                                    guard: node.id,
                                    open: open.id,
                                    iterations: 1,
                                });
                                stack.push(Frame::body(script, open.first_child()));
                            }
                        } else if holds {
                            stack.push(Frame::body(script, open.first_child()));
                        } else if let Some(alt) = open.alternate.and_then(|id| script.node(id)) {
                            stack.push(Frame::body(script, alt.first_child()));
                        }
                    }
                    None if holds => stack.push(Frame::body(script, node.next)),
                    // A bare failing condition ends the body it sits in.
                    None => tracing::trace!(condition = %node.action_id, "Condition failed"),
                }
            }
            BlockKind::ControlOpen => match node.bracket() {
                Some(Bracket::Repeat) => {
                    let times = self.repeat_count(node, ctx).await.at(node)?;
                    stack.push(Frame::body(script, node.next));
                    if times > 0 {
                        stack.push(Frame::Repeat {
                            script: Arc::clone(script),
                            open: node.id,
                            remaining: times - 1,
                            iterations: 1,
                        });
                        stack.push(Frame::body(script, node.first_child()));
                    }
                }
                _ => {
                    return Err(ExecutionError::Malformed(format!(
                        "bracket '{}' has no guard condition",
                        node.action_id
                    )))
                    .at(node);
                }
            },
            BlockKind::FunctionCall => {
                let target = scripts
                    .function(&node.action_id)
                    .ok_or_else(|| ExecutionError::UnknownFunction(node.action_id.clone()))
                    .at(node)?;
                if ctx.depth() >= self.config.max_call_depth {
                    return Err(ExecutionError::RecursionLimitExceeded {
                        limit: self.config.max_call_depth,
                        function: node.action_id.clone(),
                    })
                    .at(node);
                }
                let args = self.resolve(node, ctx).await.at(node)?;

                stack.push(Frame::body(script, node.next));
                let mut callee = ctx.child(args);
                std::mem::swap(ctx, &mut callee);
                stack.push(Frame::Return {
                    caller: Box::new(callee),
                });
                stack.push(Frame::body(target, target.root().first_child()));
                tracing::debug!(function = %node.action_id, depth = ctx.depth(), "Calling function");
            }
            BlockKind::VariableOp => {
                self.variable_op(node, ctx).await.at(node)?;
                stack.push(Frame::body(script, node.next));
            }
            BlockKind::ControlElse
            | BlockKind::ControlClose
            | BlockKind::Event
            | BlockKind::FunctionDef => {
                return Err(ExecutionError::Malformed(format!(
                    "unexpected {} node in a body",
                    node.kind
                )))
                .at(node);
            }
        }
        Ok(())
    }

    async fn checkpoint(&self, ctx: &ExecutionContext, budget: &Budget) -> Result<(), ExecutionError> {
        if ctx.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        let used = budget.tick();
        if used > self.config.max_nodes {
            return Err(ExecutionError::NodeBudgetExceeded {
                limit: self.config.max_nodes,
            });
        }
        if budget.expired() {
            return Err(ExecutionError::Timeout {
                budget_ms: self.config.timeout_ms,
            });
        }
        if used % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn act(&self, node: &BlockNode, ctx: &mut ExecutionContext) -> Result<(), ExecutionError> {
        let handler = self
            .handlers
            .action(&node.action_id)
            .ok_or_else(|| ExecutionError::UnknownHandler(node.action_id.clone()))?;
        let params = self.resolve(node, ctx).await?;
        tracing::debug!(action = %node.action_id, location = %node.location, "Invoking action");

        match AssertUnwindSafe(handler.invoke(params, ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(|e| ExecutionError::from_handler(&node.action_id, e)),
            Err(panic) => Err(ExecutionError::HandlerFailure {
                action_id: node.action_id.clone(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    async fn test(&self, node: &BlockNode, ctx: &mut ExecutionContext) -> Result<bool, ExecutionError> {
        let handler = self
            .handlers
            .condition(&node.action_id)
            .ok_or_else(|| ExecutionError::UnknownHandler(node.action_id.clone()))?;
        let params = self.resolve(node, ctx).await?;
        tracing::debug!(condition = %node.action_id, location = %node.location, "Testing condition");

        match AssertUnwindSafe(handler.test(params, ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(|e| ExecutionError::from_handler(&node.action_id, e)),
            Err(panic) => Err(ExecutionError::HandlerFailure {
                action_id: node.action_id.clone(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    async fn repeat_count(&self, node: &BlockNode, ctx: &ExecutionContext) -> Result<u64, ExecutionError> {
        let times = self
            .required(node, "times", ctx)
            .await?
            .as_number()
            .map_err(|e| ExecutionError::type_mismatch("repeat.times", e))?;
        if !(times >= 0.0 && times.fract() == 0.0 && times.is_finite()) {
            return Err(ExecutionError::Malformed(format!(
                "repeat count {} is not a whole number",
                times
            )));
        }
        Ok(times as u64)
    }

    /// Resolve one parameter slot of `node`. `None` if the slot is not configured.
    pub async fn parameter_value(
        &self,
        node: &BlockNode,
        slot: &str,
        ctx: &ExecutionContext,
    ) -> Result<Option<Value>, ExecutionError> {
        match node.param(slot) {
            Some(param) => Ok(Some(self.resolve_param(param, ctx).await?)),
            None => Ok(None),
        }
    }

    async fn required(
        &self,
        node: &BlockNode,
        slot: &str,
        ctx: &ExecutionContext,
    ) -> Result<Value, ExecutionError> {
        self.parameter_value(node, slot, ctx).await?.ok_or_else(|| {
            ExecutionError::Malformed(format!("'{}' has no '{}' parameter", node.action_id, slot))
        })
    }

    async fn text_param(
        &self,
        node: &BlockNode,
        slot: &str,
        ctx: &ExecutionContext,
    ) -> Result<String, ExecutionError> {
        match self.required(node, slot, ctx).await? {
            Value::Text(s) => Ok(s),
            other => Err(ExecutionError::type_mismatch(
                format!("{}.{}", node.action_id, slot),
                lodestone_core::KindMismatch {
                    expected: lodestone_core::ValueKind::Text,
                    found: other.kind(),
                },
            )),
        }
    }

    async fn resolve(&self, node: &BlockNode, ctx: &ExecutionContext) -> Result<Params, ExecutionError> {
        let mut params = Params::new();
        for slot in &node.params {
            params.push(slot.name.clone(), self.resolve_param(&slot.param, ctx).await?);
        }
        Ok(params)
    }

    async fn resolve_param(&self, param: &Param, ctx: &ExecutionContext) -> Result<Value, ExecutionError> {
        match param {
            Param::Literal { value } => Ok(value.clone()),
            Param::Variable { tier, name } => self.read(*tier, name, ctx).await,
            Param::Event { key } => Ok(ctx.event(key)),
        }
    }

    async fn read(&self, tier: Tier, name: &str, ctx: &ExecutionContext) -> Result<Value, ExecutionError> {
        match tier {
            Tier::Local => Ok(ctx.local(name)),
            shared => {
                let scope = ctx.scope_key(shared)?;
                Ok(self.store.get(shared, &scope, name).await?)
            }
        }
    }

    async fn write(
        &self,
        tier: Tier,
        name: String,
        value: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<(), ExecutionError> {
        match tier {
            Tier::Local => ctx.set_local(name, value),
            shared => {
                let scope = ctx.scope_key(shared)?;
                self.store.set(shared, &scope, &name, value).await?;
            }
        }
        Ok(())
    }

    async fn variable_op(&self, node: &BlockNode, ctx: &mut ExecutionContext) -> Result<(), ExecutionError> {
        let op = node.var_op().ok_or_else(|| {
            ExecutionError::Malformed(format!("'{}' is not a variable operation", node.action_id))
        })?;
        let name = self.text_param(node, "name", ctx).await?;

        match op.op {
            VarOpKind::Get => {
                let value = self.read(op.tier, &name, ctx).await?;
                let into = match node.param("into") {
                    Some(_) => self.text_param(node, "into", ctx).await?,
                    None => name,
                };
                ctx.set_local(into, value);
            }
            VarOpKind::Set => {
                let value = self.required(node, "value", ctx).await?;
                self.write(op.tier, name, value, ctx).await?;
            }
            arith => {
                let context = format!("{} {}", node.action_id, name);
                let operand = self
                    .required(node, "value", ctx)
                    .await?
                    .as_number()
                    .map_err(|e| ExecutionError::type_mismatch(context.as_str(), e))?;
                let apply = |current: &Value| arithmetic(arith, current, operand, &context);
                match op.tier {
                    Tier::Local => {
                        let updated = apply(&ctx.local(&name))?;
                        ctx.set_local(name, updated);
                    }
                    shared => {
                        let scope = ctx.scope_key(shared)?;
                        self.store.update(shared, &scope, &name, apply).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("handlers", &self.handlers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
