//! Lodestone Runtime - Execution Layer
//!
//! Everything that happens after a world has been built:
//! - `Engine`: walks a script against the handler registry
//! - `VariableStore`: shared tiered variables with atomic updates
//! - `ActivatorRegistry`: trigger key to script dispatch
//! - `Host`: `rebuild(world)` and `dispatch(..)` for the embedding server

pub mod activator;
pub mod bus;
pub mod context;
pub mod engine;
pub mod error;
pub mod handler;
pub mod host;
pub mod report;
pub mod store;

pub mod prelude {
    pub use crate::activator::{ActivatorId, ActivatorRegistry, TriggerFilter};
    pub use crate::bus::Bus;
    pub use crate::context::{Actor, ExecutionContext, Payload};
    pub use crate::engine::Engine;
    pub use crate::error::{ExecutionError, FailureKind, HandlerError};
    pub use crate::handler::{ActionHandler, ConditionHandler, HandlerRegistry, Params};
    pub use crate::host::{Host, SnapshotProvider};
    pub use crate::report::{InvocationObserver, InvocationReport, Outcome};
    pub use crate::store::{MemoryBackend, PersistenceBackend, VariableStore};
}

pub use activator::{Activator, ActivatorId, ActivatorRegistry, TriggerFilter, WorldIndex, interval_of};
pub use bus::Bus;
pub use context::{Actor, ExecutionContext, Payload};
pub use engine::Engine;
pub use error::{ExecutionError, FailureKind, HandlerError, StoreError};
pub use handler::{ActionFn, ActionHandler, ConditionFn, ConditionHandler, HandlerRegistry, Params};
pub use host::{Host, HostBuilder, InMemorySnapshots, RebuildSummary, SnapshotProvider};
pub use report::{
    CollectingObserver, Failure, InvocationObserver, InvocationReport, ObserverSet, Outcome,
    TracingObserver,
};
pub use store::{MemoryBackend, PersistenceBackend, VariableStore};
