pub use crate::nodes::debug::{Fail, Log};
pub use crate::nodes::flow::Wait;
pub use crate::nodes::logic::{Chance, Compare, Contains, Equals, HasActor};
pub use crate::nodes::message::{CollectingSink, MessageSink, SendMessage, SharedSink, StdoutSink};
pub use crate::{register, registry};
