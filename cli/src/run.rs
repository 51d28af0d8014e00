//! One-shot event dispatch

use anyhow::{Context, Result};
use lodestone_core::{LodestoneConfig, Value, WorldSnapshot};
use lodestone_runtime::{Actor, Host, InMemorySnapshots, Payload};
use lodestone_std::prelude::{SharedSink, StdoutSink};
use std::sync::Arc;

/// Parse `key=value`. Numbers and `true`/`false` are typed, the rest is text.
pub fn parse_assignment(input: &str) -> Result<(String, Value)> {
    let (key, raw) = input
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got '{}'", input))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Empty key in '{}'", input);
    }

    let value = match raw {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => match raw.parse::<f64>() {
            Ok(number) if number.is_finite() => Value::Number(number),
            _ => Value::Text(raw.to_string()),
        },
    };
    Ok((key.to_string(), value))
}

/// Index the snapshot, fire `trigger` once and print every report as JSON.
pub fn run_dispatch_command(
    snapshot: WorldSnapshot,
    config: LodestoneConfig,
    trigger: &str,
    actor: Option<String>,
    assignments: &[String],
) -> Result<()> {
    let mut payload = Payload::new();
    for assignment in assignments {
        let (key, value) = parse_assignment(assignment)?;
        payload.insert(key, value);
    }
    let actor = actor.map(|name| Actor::new(name.to_lowercase(), name));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(async move {
        let world = snapshot.world.clone();
        let snapshots = Arc::new(InMemorySnapshots::new());
        snapshots.put(snapshot);

        let sink: SharedSink = Arc::new(StdoutSink);
        let host = Host::builder(snapshots)
            .config(config)
            .handlers(lodestone_std::registry())
            .resource(sink)
            .build();

        let summary = host.rebuild(&world).await?;
        for (key, errors) in &summary.disabled {
            for error in errors {
                tracing::warn!(script = %key, "{}", error);
            }
        }

        let handles = host.dispatch(&world, trigger, actor, payload);
        if handles.is_empty() {
            println!("No activator accepted trigger '{}'", trigger);
        }

        let mut failed = 0;
        for handle in handles {
            let report = handle.await.context("Invocation task panicked")?;
            if !report.is_success() {
                failed += 1;
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        host.shutdown().await?;
        if failed > 0 {
            anyhow::bail!("{} invocation(s) failed", failed);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment_types() {
        assert_eq!(
            parse_assignment("message=hi there").unwrap(),
            ("message".to_string(), Value::Text("hi there".to_string()))
        );
        assert_eq!(
            parse_assignment("x=12.5").unwrap().1,
            Value::Number(12.5)
        );
        assert_eq!(parse_assignment("ok=true").unwrap().1, Value::Boolean(true));
        assert_eq!(
            parse_assignment("expr=a=b").unwrap().1,
            Value::Text("a=b".to_string())
        );
        assert_eq!(parse_assignment("n=NaN").unwrap().1, Value::Text("NaN".to_string()));
    }

    #[test]
    fn test_parse_assignment_rejects_malformed() {
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=1").is_err());
    }
}
