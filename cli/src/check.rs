//! Snapshot validation

use anyhow::Result;
use lodestone_core::{BuildOutput, GraphBuilder, LodestoneConfig, WorldSnapshot};

/// Build a snapshot against the standard handler set.
pub fn build(snapshot: &WorldSnapshot, config: &LodestoneConfig) -> BuildOutput {
    let handlers = lodestone_std::registry();
    GraphBuilder::new(config.palette()).build(snapshot, &handlers)
}

/// Print every script of the snapshot and fail if any of them is disabled.
pub fn run_check_command(snapshot: &WorldSnapshot, config: &LodestoneConfig) -> Result<()> {
    println!("Checking world: {}", snapshot.world);
    println!(
        "  {} markers, {} configured",
        snapshot.markers.len(),
        snapshot.configs.len()
    );

    let output = build(snapshot, config);
    for script in output.scripts.iter() {
        let role = if script.is_function() { "function" } else { "event" };
        let status = if script.enabled { "ok" } else { "DISABLED" };
        println!(
            "  [{}] {} '{}' at {} ({} nodes)",
            status,
            role,
            script.name(),
            script.key.root,
            script.nodes().len()
        );
        for error in &script.errors {
            println!("      - {}", error);
        }
    }

    if !output.diagnostics.is_empty() {
        println!("  Unattached markers:");
        for diagnostic in &output.diagnostics {
            println!("      - {}", diagnostic);
        }
    }

    let disabled = output.scripts.disabled().count();
    println!();
    if disabled > 0 {
        anyhow::bail!("{} of {} scripts disabled", disabled, output.scripts.len());
    }
    println!("Check complete: {} scripts", output.scripts.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_core::{BlockPos, Param, ParamSlot};

    fn greeting(text_slot: &str) -> WorldSnapshot {
        WorldSnapshot::new("lobby")
            .place(BlockPos::new(0, 0, 0), "diamond_block")
            .configure(BlockPos::new(0, 0, 0), "join", vec![])
            .place(BlockPos::new(1, 0, 0), "cobblestone")
            .configure(
                BlockPos::new(1, 0, 0),
                "sendMessage",
                vec![ParamSlot::new(text_slot, Param::literal("welcome"))],
            )
    }

    #[test]
    fn test_check_accepts_valid_script() {
        assert!(run_check_command(&greeting("text"), &LodestoneConfig::default()).is_ok());
    }

    #[test]
    fn test_check_rejects_missing_param() {
        let snapshot = greeting("body");
        let output = build(&snapshot, &LodestoneConfig::default());
        assert_eq!(output.scripts.disabled().count(), 1);
        assert!(run_check_command(&snapshot, &LodestoneConfig::default()).is_err());
    }
}
