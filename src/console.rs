//! Operator console: line commands read from stdin while a session runs.

use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use colored::*;

use crate::client::SyncClient;
use crate::event::SyncEvent;
use crate::protocol::{Runtime, TagValue};
use crate::push::{Preview, PushOrchestrator};
use crate::store::{Conflict, ConnectionStatus, Resolution};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Conflicts,
    Events,
    Resolve { id: String, resolution: Resolution },
    ResolveAll(Resolution),
    Simulate,
    Preview(String),
    Push(String),
    Set { tag: String, value: TagValue, runtime: Runtime },
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.as_slice() {
            ["status"] => Command::Status,
            ["conflicts"] => Command::Conflicts,
            ["events"] => Command::Events,
            ["resolve", id, side] => Command::Resolve {
                id: id.to_string(),
                resolution: side.parse()?,
            },
            ["resolve-all", side] => Command::ResolveAll(side.parse()?),
            ["simulate"] => Command::Simulate,
            ["preview", logic] => Command::Preview(logic.to_string()),
            ["push", logic] => Command::Push(logic.to_string()),
            ["set", tag, value] => Command::Set {
                tag: tag.to_string(),
                value: TagValue::parse_loose(value),
                runtime: Runtime::Shadow,
            },
            ["set", tag, value, runtime] => Command::Set {
                tag: tag.to_string(),
                value: TagValue::parse_loose(value),
                runtime: runtime.parse()?,
            },
            ["help"] | ["?"] => Command::Help,
            ["quit"] | ["exit"] => Command::Quit,
            [] => bail!("empty command"),
            [other, ..] => bail!("unknown command '{other}' (try 'help')"),
        };
        Ok(command)
    }
}

pub const HELP: &str = "\
commands:
  status                              connection and runtime health
  conflicts                           list conflicts
  events                              recent events, newest first
  resolve <id|prefix> shadow|live     resolve one conflict
  resolve-all shadow|live             resolve every open conflict
  simulate                            inject demo conflicts
  preview <logic>                     diff shadow against live logic
  push <logic>                        push shadow logic to live
  set <tag> <value> [shadow|live]     write a tag value through the broker
  quit";

/// Whether the console should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub async fn execute(command: Command, client: &SyncClient, orchestrator: Option<&PushOrchestrator>) -> Result<Flow> {
    match command {
        Command::Status => println!("{}", render_status(&client.status())),
        Command::Conflicts => println!("{}", render_conflicts(&client.conflicts())),
        Command::Events => println!("{}", render_events(&client.events())),
        Command::Resolve { id, resolution } => {
            let conflict = client
                .resolve_by_prefix(&id, resolution)
                .ok_or_else(|| anyhow!("no single conflict matches '{id}'"))??;
            println!(
                "{} {} resolved with {}",
                "✓".green(),
                conflict.tag_name.bright_white(),
                resolution.as_str().bright_yellow()
            );
        }
        Command::ResolveAll(resolution) => {
            let ids = client.resolve_all_conflicts(resolution);
            println!("{} {} conflict(s) resolved with {}", "✓".green(), ids.len(), resolution.as_str());
        }
        Command::Simulate => {
            let ids = client.simulate_conflicts();
            println!("{} {} simulated conflict(s)", "!".yellow(), ids.len());
        }
        Command::Preview(logic_id) => {
            let orchestrator = orchestrator.ok_or_else(|| anyhow!("no deploy_url configured"))?;
            match orchestrator.preview_changes(&logic_id).await? {
                Preview::ResolveConflicts(open) => {
                    println!("{} resolve these first:", "✗".red());
                    println!("{}", render_conflicts(&open));
                }
                Preview::Ready(preview) if preview.is_empty() => {
                    println!("{} shadow and live logic are identical", "=".bright_blue());
                }
                Preview::Ready(preview) => {
                    println!(
                        "{} +{} -{}",
                        logic_id.bright_white(),
                        preview.insertions.to_string().green(),
                        preview.deletions.to_string().red()
                    );
                    for line in preview.unified.lines() {
                        match line.chars().next() {
                            Some('+') => println!("{}", line.green()),
                            Some('-') => println!("{}", line.red()),
                            _ => println!("{line}"),
                        }
                    }
                }
            }
        }
        Command::Push(logic_id) => {
            let orchestrator = orchestrator.ok_or_else(|| anyhow!("no deploy_url configured"))?;
            let receipt = orchestrator.push_to_live(&logic_id).await?;
            println!(
                "{} {} pushed to live at {}",
                "✓".green(),
                receipt.logic_id.bright_white(),
                receipt.committed_at.format("%H:%M:%S")
            );
        }
        Command::Set { tag, value, runtime } => {
            if client.send_tag_update(&tag, value, runtime) {
                println!("{} {} sent", "→".bright_blue(), tag);
            } else {
                println!("{} not connected; {} dropped", "✗".red(), tag);
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn flag(ok: bool) -> ColoredString {
    if ok {
        "ok".green()
    } else {
        "down".red()
    }
}

pub fn render_status(status: &ConnectionStatus) -> String {
    let mut out = String::new();
    let link = if status.connected {
        "connected".green()
    } else {
        "offline".red()
    };
    let _ = writeln!(out, "broker:    {link} ({} ms)", status.latency_ms);
    let _ = writeln!(out, "shadow:    {}", flag(status.shadow_ok));
    let _ = writeln!(out, "live:      {}", flag(status.live_ok));
    let _ = writeln!(out, "mode:      {:?}", status.execution_mode);
    let last = status
        .last_sync_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    let _ = writeln!(out, "last sync: {last}");
    let _ = write!(
        out,
        "conflicts: {} open / {} total",
        status.unresolved_count(),
        status.conflicts.len()
    );
    out
}

pub fn render_conflicts(conflicts: &[Conflict]) -> String {
    if conflicts.is_empty() {
        return "no conflicts".to_string();
    }
    let mut out = String::new();
    for conflict in conflicts {
        let id = conflict.id.to_string();
        let state = match conflict.resolution {
            Some(resolution) => format!("resolved:{}", resolution.as_str()).green(),
            None => "open".red(),
        };
        let _ = writeln!(
            out,
            "{} {:<16} shadow={} live={} [{}] {}",
            &id[..8],
            conflict.tag_name,
            conflict.shadow_value,
            conflict.live_value,
            conflict.conflict_type,
            state
        );
    }
    out.trim_end().to_string()
}

pub fn render_events(events: &[SyncEvent]) -> String {
    if events.is_empty() {
        return "no events".to_string();
    }
    events
        .iter()
        .map(|event| format!("{} {}", event.timestamp.format("%H:%M:%S%.3f"), event.summary()))
        .collect::<Vec<_>>()
        .join("\n")
}
