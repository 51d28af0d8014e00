use async_trait::async_trait;
use lodestone_runtime::{ActionHandler, ExecutionContext, HandlerError, Params};
use std::time::Duration;

/// Length of one server tick, the unit of `waitTicks`.
pub const TICK: Duration = Duration::from_millis(50);

/// `wait` (`ms`) and `waitTicks` (`ticks`): suspends the invocation. Returns
/// early when the invocation is cancelled; the engine stops at the next node.
#[derive(Debug, Clone, Copy)]
pub struct Wait {
    slot: &'static str,
    unit: Duration,
}

impl Wait {
    /// Milliseconds from the `ms` parameter.
    pub const fn millis() -> Self {
        Self {
            slot: "ms",
            unit: Duration::from_millis(1),
        }
    }

    /// Server ticks from the `ticks` parameter.
    pub const fn ticks() -> Self {
        Self {
            slot: "ticks",
            unit: TICK,
        }
    }

    fn duration(&self, params: &Params) -> Result<Duration, HandlerError> {
        let amount = params.number(self.slot)?;
        if amount < 0.0 {
            return Err(HandlerError::failed(format!("cannot wait for {}", amount)));
        }
        Duration::try_from_secs_f64(self.unit.as_secs_f64() * amount)
            .map_err(|e| HandlerError::failed(format!("cannot wait for {}: {}", amount, e)))
    }
}

impl Default for Wait {
    fn default() -> Self {
        Self::millis()
    }
}

#[async_trait]
impl ActionHandler for Wait {
    fn required_params(&self) -> &'static [&'static str] {
        if self.slot == "ticks" { &["ticks"] } else { &["ms"] }
    }

    async fn invoke(&self, params: Params, ctx: &mut ExecutionContext) -> Result<(), HandlerError> {
        let duration = self.duration(&params)?;
        let token = ctx.cancellation_token().clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = token.cancelled() => {
                tracing::debug!("Wait interrupted by cancellation");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_units() {
        let ms = Params::new().with("ms", 120i64);
        assert_eq!(Wait::millis().duration(&ms).unwrap(), Duration::from_millis(120));

        let ticks = Params::new().with("ticks", 4i64);
        assert_eq!(Wait::ticks().duration(&ticks).unwrap(), Duration::from_millis(200));

        assert!(Wait::millis().duration(&ticks).is_err());
        assert!(Wait::millis().duration(&Params::new().with("ms", -1i64)).is_err());
    }

    #[test]
    fn test_declares_its_slot() {
        assert_eq!(Wait::millis().required_params(), &["ms"]);
        assert_eq!(Wait::ticks().required_params(), &["ticks"]);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let mut ctx = ExecutionContext::new("w");
        ctx.cancellation_token().cancel();
        let started = std::time::Instant::now();
        Wait::millis()
            .invoke(Params::new().with("ms", 10_000i64), &mut ctx)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
