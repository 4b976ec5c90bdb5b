//! Operator CLI: dispatch events against a rules file, inspect the event
//! catalogue, and validate rule configuration offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::engine::{catalog, Engine, EventKind, HookRule};
use crate::store::MemoryStore;

#[derive(Parser)]
#[command(name = "hookforge", version, about = "Event-driven hook and workflow engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dispatch one event (read from stdin as JSON) against a rules file
    Run {
        /// Path to a JSON file containing an array of rules
        #[arg(long)]
        rules: PathBuf,
        /// Project path used for scope filtering and HOOK_PROJECT_PATH
        #[arg(long)]
        project: Option<String>,
    },
    /// Print the event catalogue as JSON
    Events,
    /// Parse and validate a rules file without executing anything
    Validate {
        /// Path to a JSON file containing an array of rules
        #[arg(long)]
        rules: PathBuf,
    },
}

/// Stdin shape for `run`: `{"event": "FileChange", "data": {...}}`.
#[derive(Deserialize)]
struct EventInput {
    event: String,
    #[serde(default)]
    data: Value,
}

pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { rules, project } => run(&rules, project.as_deref()).await,
        Commands::Events => {
            println!("{}", serde_json::to_string_pretty(catalog())?);
            Ok(())
        }
        Commands::Validate { rules } => validate(&rules).await,
    }
}

async fn load_rules(path: &Path) -> Result<Vec<HookRule>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read rules file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse rules file {}", path.display()))
}

async fn run(rules_path: &Path, project: Option<&str>) -> Result<()> {
    let rules = load_rules(rules_path).await?;
    let engine = Engine::new(Arc::new(MemoryStore::with_rules(rules)))
        .await
        .context("failed to initialize engine")?;

    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("failed to read event from stdin")?;
    let input: EventInput =
        serde_json::from_str(&raw).context("failed to parse event from stdin")?;
    let event: EventKind = input.event.parse()?;

    let results = engine.process_event(event, input.data, project).await;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

async fn validate(rules_path: &Path) -> Result<()> {
    let mut rules = load_rules(rules_path).await?;

    let mut failures = 0usize;
    for rule in &mut rules {
        match rule.validate() {
            Ok(()) => println!("ok    {} ({})", rule.name, rule.id),
            Err(e) => {
                failures += 1;
                println!("error {} ({}): {e}", rule.name, rule.id);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} rules failed validation", rules.len());
    }
    println!("{} rules valid", rules.len());
    Ok(())
}
