//! Offline walkthrough on the in-memory broker and a local deployment stub.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use colored::*;

use crate::client::{ClientConfig, SyncClient};
use crate::console::{render_conflicts, render_status};
use crate::protocol::{ExecutionMode, InboundMessage, Runtime, TagValue};
use crate::push::{LocalDeployment, Preview};
use crate::store::Resolution;
use crate::transport::MemoryConnector;

const LOGIC_ID: &str = "logic-1";
const WAIT: Duration = Duration::from_secs(2);

fn step(title: &str) {
    println!("\n{} {}", "▶".bright_blue(), title.bold());
}

pub async fn run() -> Result<()> {
    let (connector, broker) = MemoryConnector::new();
    let client = SyncClient::new(Arc::new(connector), ClientConfig::default());

    let deployment = Arc::new(LocalDeployment::new());
    deployment.set_logic(LOGIC_ID, Runtime::Live, "LD Start\nOUT Pump\n");
    deployment.set_logic(LOGIC_ID, Runtime::Shadow, "LD Start\nAND Level_OK\nOUT Pump\n");
    let orchestrator = client.orchestrator(deployment.clone());

    step("connect");
    client.connect().await;
    broker.push(InboundMessage::SyncStatusUpdate {
        shadow_ok: Some(true),
        live_ok: Some(true),
        execution_mode: Some(ExecutionMode::Simulation),
    });
    if !client.wait_until(WAIT, |s| s.status().connected && s.status().shadow_ok).await {
        bail!("memory broker never reported a ready shadow runtime");
    }
    println!("{}", render_status(&client.status()));

    step("Tank_Level diverges: shadow 50.0, live 48.0");
    for (runtime, value) in [(Runtime::Shadow, 50.0), (Runtime::Live, 48.0)] {
        broker.push(InboundMessage::TagUpdate {
            name: "Tank_Level".to_string(),
            value: TagValue::Number(value),
            runtime,
            timestamp: Utc::now(),
        });
    }
    client
        .wait_until(WAIT, |s| s.conflicts().open_for("Tank_Level").is_some())
        .await;
    println!("{}", render_conflicts(&client.conflicts()));

    step("push while a conflict is open");
    match orchestrator.push_to_live(LOGIC_ID).await {
        Err(err) => println!("{} {}", "✗".red(), err),
        Ok(_) => bail!("push went through with an open conflict"),
    }

    step("simulate extra conflicts");
    client.simulate_conflicts();
    println!("{}", render_conflicts(&client.conflicts()));

    step("resolve Tank_Level with shadow, the rest with live");
    if let Some(tank) = client
        .conflicts()
        .into_iter()
        .find(|c| c.tag_name == "Tank_Level" && !c.resolved)
    {
        client.resolve_conflict(tank.id, Resolution::Shadow)?;
    }
    let rest = client.resolve_all_conflicts(Resolution::Live);
    println!("{} resolved {} more", "✓".green(), rest.len());

    step("preview, confirm, commit");
    let preview = match orchestrator.preview_changes(LOGIC_ID).await? {
        Preview::Ready(preview) => preview,
        Preview::ResolveConflicts(open) => bail!("{} conflict(s) still open", open.len()),
    };
    print!("{}", preview.unified);
    let receipt = orchestrator.commit(preview.confirm()).await?;
    println!(
        "{} {} live at {}",
        "✓".green(),
        receipt.logic_id.bright_white(),
        receipt.committed_at.to_rfc3339()
    );
    println!("{}", render_status(&client.status()));

    client.close();
    Ok(())
}
