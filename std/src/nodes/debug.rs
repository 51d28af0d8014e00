use async_trait::async_trait;
use lodestone_runtime::{ActionHandler, ExecutionContext, HandlerError, Params};

/// `log`: writes `message` to the tracing log at `level` (default info).
#[derive(Debug, Default, Clone, Copy)]
pub struct Log;

#[async_trait]
impl ActionHandler for Log {
    fn required_params(&self) -> &'static [&'static str] {
        &["message"]
    }

    async fn invoke(&self, params: Params, ctx: &mut ExecutionContext) -> Result<(), HandlerError> {
        let message = params.value("message")?;
        let level = match params.get("level") {
            Some(_) => params.text("level")?,
            None => "info",
        };
        let world = &ctx.world;
        match level {
            "error" => tracing::error!(%world, "{}", message),
            "warn" => tracing::warn!(%world, "{}", message),
            "debug" => tracing::debug!(%world, "{}", message),
            _ => tracing::info!(%world, "{}", message),
        }
        Ok(())
    }
}

/// `fail`: stops the invocation with `message`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fail;

#[async_trait]
impl ActionHandler for Fail {
    fn required_params(&self) -> &'static [&'static str] {
        &["message"]
    }

    async fn invoke(&self, params: Params, _ctx: &mut ExecutionContext) -> Result<(), HandlerError> {
        Err(HandlerError::Failed(params.value("message")?.to_string()))
    }
}
