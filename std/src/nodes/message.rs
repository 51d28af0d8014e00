use async_trait::async_trait;
use lodestone_runtime::{ActionHandler, Actor, ExecutionContext, HandlerError, Params};
use parking_lot::Mutex;
use std::sync::Arc;

/// Where chat output goes. The host puts one on the Bus as [`SharedSink`].
pub trait MessageSink: Send + Sync + 'static {
    /// `recipient` is `None` for a broadcast.
    fn send(&self, recipient: Option<&Actor>, text: &str);
}

pub type SharedSink = Arc<dyn MessageSink>;

/// Prints messages to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl MessageSink for StdoutSink {
    fn send(&self, recipient: Option<&Actor>, text: &str) {
        match recipient {
            Some(actor) => println!("[to {}] {}", actor.name, text),
            None => println!("[broadcast] {}", text),
        }
    }
}

/// A message captured by [`CollectingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub recipient: Option<String>,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct CollectingSink {
    sent: Mutex<Vec<Sent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

impl MessageSink for CollectingSink {
    fn send(&self, recipient: Option<&Actor>, text: &str) {
        self.sent.lock().push(Sent {
            recipient: recipient.map(|a| a.id.clone()),
            text: text.to_string(),
        });
    }
}

/// `sendMessage`: sends `text` to the triggering player, or to everyone when
/// `broadcast` is true or nobody triggered the event. `text` must be Text;
/// other kinds are a type mismatch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendMessage;

#[async_trait]
impl ActionHandler for SendMessage {
    fn required_params(&self) -> &'static [&'static str] {
        &["text"]
    }

    async fn invoke(&self, params: Params, ctx: &mut ExecutionContext) -> Result<(), HandlerError> {
        let text = params.text("text")?;
        let broadcast = match params.get("broadcast") {
            Some(_) => params.boolean("broadcast")?,
            None => false,
        };
        let sink = ctx
            .bus
            .get::<SharedSink>()
            .ok_or_else(|| HandlerError::failed("no message sink available"))?;

        let recipient = if broadcast { None } else { ctx.actor.as_ref() };
        sink.send(recipient, text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_runtime::Bus;

    #[tokio::test]
    async fn test_send_to_actor_and_broadcast() {
        let sink = Arc::new(CollectingSink::new());
        let bus = Bus::new().with::<SharedSink>(sink.clone());
        let mut ctx = ExecutionContext::new("w")
            .with_actor(Some(Actor::new("u-1", "Alex")))
            .with_bus(bus);

        SendMessage
            .invoke(Params::new().with("text", "hi"), &mut ctx)
            .await
            .unwrap();
        SendMessage
            .invoke(
                Params::new().with("text", "all").with("broadcast", true),
                &mut ctx,
            )
            .await
            .unwrap();

        assert_eq!(
            sink.sent(),
            vec![
                Sent {
                    recipient: Some("u-1".into()),
                    text: "hi".into()
                },
                Sent {
                    recipient: None,
                    text: "all".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_non_text_is_a_kind_mismatch() {
        let sink = Arc::new(CollectingSink::new());
        let mut ctx =
            ExecutionContext::new("w").with_bus(Bus::new().with::<SharedSink>(sink.clone()));
        let err = SendMessage
            .invoke(Params::new().with("text", 3i64), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Kind { .. }));
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_sink_fails() {
        let mut ctx = ExecutionContext::new("w");
        let err = SendMessage
            .invoke(Params::new().with("text", "hi"), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
    }
}
