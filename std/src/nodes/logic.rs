use async_trait::async_trait;
use lodestone_core::Value;
use lodestone_runtime::{ConditionHandler, ExecutionContext, HandlerError, Params};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `equals`: `left` and `right` are the same value (same kind, same content).
#[derive(Debug, Default, Clone, Copy)]
pub struct Equals;

#[async_trait]
impl ConditionHandler for Equals {
    fn required_params(&self) -> &'static [&'static str] {
        &["left", "right"]
    }

    async fn test(&self, params: Params, _ctx: &mut ExecutionContext) -> Result<bool, HandlerError> {
        Ok(params.value("left")? == params.value("right")?)
    }
}

/// `compare`: `left <op> right`. Ordering operators need numbers.
#[derive(Debug, Default, Clone, Copy)]
pub struct Compare;

#[async_trait]
impl ConditionHandler for Compare {
    fn required_params(&self) -> &'static [&'static str] {
        &["left", "op", "right"]
    }

    async fn test(&self, params: Params, _ctx: &mut ExecutionContext) -> Result<bool, HandlerError> {
        match params.text("op")? {
            "==" => Ok(params.value("left")? == params.value("right")?),
            "!=" => Ok(params.value("left")? != params.value("right")?),
            op => {
                let left = params.number("left")?;
                let right = params.number("right")?;
                match op {
                    "<" => Ok(left < right),
                    "<=" => Ok(left <= right),
                    ">" => Ok(left > right),
                    ">=" => Ok(left >= right),
                    other => Err(HandlerError::failed(format!("unknown operator '{}'", other))),
                }
            }
        }
    }
}

/// `contains`: a text `haystack` contains `needle` (case-insensitive), or a
/// list `haystack` contains an element equal to `needle`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Contains;

#[async_trait]
impl ConditionHandler for Contains {
    fn required_params(&self) -> &'static [&'static str] {
        &["haystack", "needle"]
    }

    async fn test(&self, params: Params, _ctx: &mut ExecutionContext) -> Result<bool, HandlerError> {
        match params.value("haystack")? {
            Value::List(items) => {
                let needle = params.value("needle")?;
                Ok(items.iter().any(|item| item == needle))
            }
            _ => {
                let haystack = params.text("haystack")?.to_lowercase();
                let needle = params.text("needle")?.to_lowercase();
                Ok(haystack.contains(&needle))
            }
        }
    }
}

/// `chance`: holds with `probability` (0.0 to 1.0).
#[derive(Debug, Default)]
pub struct Chance {
    rng: Option<Mutex<StdRng>>,
}

impl Chance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic sequence, for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    fn roll(&self) -> f64 {
        match &self.rng {
            Some(rng) => rng.lock().r#gen::<f64>(),
            None => rand::random::<f64>(),
        }
    }
}

#[async_trait]
impl ConditionHandler for Chance {
    fn required_params(&self) -> &'static [&'static str] {
        &["probability"]
    }

    async fn test(&self, params: Params, _ctx: &mut ExecutionContext) -> Result<bool, HandlerError> {
        let probability = params.number("probability")?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(HandlerError::failed(format!(
                "probability {} is outside 0..1",
                probability
            )));
        }
        Ok(self.roll() < probability)
    }
}

/// `hasActor`: the event was triggered by a player.
#[derive(Debug, Default, Clone, Copy)]
pub struct HasActor;

#[async_trait]
impl ConditionHandler for HasActor {
    async fn test(&self, _params: Params, ctx: &mut ExecutionContext) -> Result<bool, HandlerError> {
        Ok(ctx.actor.is_some())
    }
}
