//! Lodestone CLI - inspect and run block scripts outside a game server
//!
//! # Commands
//! - `lodestone check <snapshot>` - build a world snapshot and report problems
//! - `lodestone schematic <snapshot>` - print the node/edge schematic JSON
//! - `lodestone run <snapshot> --trigger <key>` - dispatch one event

mod check;
mod run;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lodestone_core::{LodestoneConfig, Schematic, WorldSnapshot};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Lodestone CLI
#[derive(Parser)]
#[command(name = "lodestone")]
#[command(author, version, about = "Inspect and run Lodestone block scripts")]
struct Cli {
    /// TOML configuration file (engine limits, scheduler, palette)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a world snapshot and list scripts, activators and errors
    Check {
        /// World snapshot JSON file
        snapshot: PathBuf,
    },

    /// Print the schematic JSON of every script
    Schematic {
        /// World snapshot JSON file
        snapshot: PathBuf,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Dispatch one event and print the invocation reports
    Run {
        /// World snapshot JSON file
        snapshot: PathBuf,

        /// Trigger key (e.g. chat, blockBreak, tick-interval:20)
        #[arg(short, long)]
        trigger: String,

        /// Name of the triggering player
        #[arg(short, long)]
        actor: Option<String>,

        /// Payload entries as key=value (numbers and true/false are typed)
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

/// Stderr tracing, `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lodestone_runtime=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { snapshot } => check::run_check_command(&load_snapshot(&snapshot)?, &config),
        Commands::Schematic { snapshot, output } => {
            run_schematic_command(&load_snapshot(&snapshot)?, &config, output.as_deref())
        }
        Commands::Run {
            snapshot,
            trigger,
            actor,
            set,
        } => run::run_dispatch_command(load_snapshot(&snapshot)?, config, &trigger, actor, &set),
    }
}

fn load_config(path: Option<&Path>) -> Result<LodestoneConfig> {
    match path {
        Some(path) => LodestoneConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(LodestoneConfig::default()),
    }
}

fn load_snapshot(path: &Path) -> Result<WorldSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse snapshot: {}", path.display()))
}

fn run_schematic_command(
    snapshot: &WorldSnapshot,
    config: &LodestoneConfig,
    output: Option<&Path>,
) -> Result<()> {
    let output_scripts = check::build(snapshot, config);
    let schematics = Schematic::all(&output_scripts.scripts);
    let json = serde_json::to_string_pretty(&schematics).context("Failed to serialize schematic")?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            println!("Schematic saved to: {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_snapshot_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "world": "lobby",
                "markers": [{{ "pos": {{ "x": 0, "y": 0, "z": 0 }}, "material": "diamond_block" }}],
                "configs": [{{ "pos": {{ "x": 0, "y": 0, "z": 0 }}, "action_id": "join" }}]
            }}"#
        )
        .unwrap();

        let snapshot = load_snapshot(file.path()).unwrap();
        assert_eq!(snapshot.world.as_str(), "lobby");
        assert_eq!(snapshot.markers.len(), 1);
        assert!(snapshot.configs[0].enabled);
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[engine]\nmax_call_depth = 8\n").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.engine.max_call_depth, 8);
        assert_eq!(config.engine.max_loop_iterations, 1_000);
    }
}
