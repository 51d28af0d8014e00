//! Lodestone Std - the standard handler library.
//!
//! | id            | kind      | parameters                          |
//! |---------------|-----------|-------------------------------------|
//! | `sendMessage` | action    | `text`, `broadcast`?                |
//! | `wait`        | action    | `ms`                                |
//! | `waitTicks`   | action    | `ticks`                             |
//! | `log`         | action    | `message`, `level`?                 |
//! | `fail`        | action    | `message`                           |
//! | `equals`      | condition | `left`, `right`                     |
//! | `compare`     | condition | `left`, `op`, `right`               |
//! | `contains`    | condition | `haystack`, `needle`                |
//! | `chance`      | condition | `probability`                       |
//! | `hasActor`    | condition |                                     |
//!
//! `sendMessage` needs a [`SharedSink`](nodes::message::SharedSink) on the
//! invocation Bus.

pub mod nodes;
pub mod prelude;

use lodestone_runtime::HandlerRegistry;
use nodes::debug::{Fail, Log};
use nodes::flow::Wait;
use nodes::logic::{Chance, Compare, Contains, Equals, HasActor};
use nodes::message::SendMessage;

/// Add the standard handlers to `registry`. Existing entries with the same
/// ids are replaced.
pub fn register(registry: &mut HandlerRegistry) {
    registry.register_action("sendMessage", SendMessage);
    registry.register_action("wait", Wait::millis());
    registry.register_action("waitTicks", Wait::ticks());
    registry.register_action("log", Log);
    registry.register_action("fail", Fail);
    registry.register_condition("equals", Equals);
    registry.register_condition("compare", Compare);
    registry.register_condition("contains", Contains);
    registry.register_condition("chance", Chance::new());
    registry.register_condition("hasActor", HasActor);
}

/// A registry holding only the standard handlers.
pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    register(&mut registry);
    registry
}
