use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};

use shadow_sync::console::{self, Command, Flow};
use shadow_sync::poll::TagPoller;
use shadow_sync::push::StaticToken;
use shadow_sync::{broker, demo, telemetry};
use shadow_sync::{EventPayload, HttpDeployment, SyncClient, SyncConfig, WsConnector};

#[derive(Parser)]
#[command(name = "shadow-sync")]
#[command(about = "Shadow/live reconciliation: watch both runtimes, resolve conflicts, push logic to live", version)]
#[command(after_help = "Configuration is read from --config (TOML), then SHADOW_SYNC_* environment
variables (a .env file is honoured), then the flags below.

Logging follows SHADOW_SYNC_LOG, falling back to RUST_LOG.")]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and run the operator console
    Connect {
        /// Broker WebSocket URL, e.g. ws://localhost:8787/ws
        #[arg(long, value_name = "URL")]
        broker: Option<String>,

        /// Deployment endpoint base URL
        #[arg(long, value_name = "URL")]
        deploy: Option<String>,

        #[arg(long)]
        project: Option<String>,
    },

    /// Run the development broker
    Broker {
        #[arg(short, long, default_value = "8787")]
        port: u16,
    },

    /// Offline walkthrough: conflicts, resolution and a gated push
    Demo,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = SyncConfig::load(cli.config.as_deref())?;
    let _log_guard = telemetry::init(&config.logging, cli.verbose);

    match cli.command.unwrap_or(Commands::Connect {
        broker: None,
        deploy: None,
        project: None,
    }) {
        Commands::Connect {
            broker,
            deploy,
            project,
        } => {
            if let Some(url) = broker {
                config.broker_url = url;
            }
            if let Some(url) = deploy {
                config.deploy_url = Some(url);
            }
            if let Some(project) = project {
                config.project_id = Some(project);
            }
            config.validate()?;
            run_console(config).await?;
        }

        Commands::Broker { port } => {
            println!("{}", format!("Starting development broker on port {}...", port).cyan().bold());
            broker::start(port).await?;
        }

        Commands::Demo => {
            println!("{}", "shadow-sync offline demo".cyan().bold());
            demo::run().await?;
        }
    }

    Ok(())
}

async fn run_console(config: SyncConfig) -> Result<()> {
    let connector = WsConnector::new(&config.broker_url)?;
    let client = SyncClient::new(Arc::new(connector), config.client_config());

    let _notices = client.subscribe(|event| {
        match &event.payload {
            EventPayload::Conflict { tag_name, .. } => {
                println!("{} conflict reported on {}", "!".yellow(), tag_name.bright_white());
            }
            EventPayload::Disconnected { reason } => {
                println!("{} offline: {}", "✗".red(), reason);
            }
            EventPayload::PushResponse {
                logic_id,
                success: false,
                error,
            } => {
                println!("{} push of {} failed: {:?}", "✗".red(), logic_id, error);
            }
            _ => {}
        }
        Ok(())
    });

    let deployment = match &config.deploy_url {
        Some(url) => Some(Arc::new(
            HttpDeployment::new(url, Arc::new(StaticToken(config.auth_token.clone())))
                .context("failed to set up deployment endpoint")?,
        )),
        None => None,
    };
    let orchestrator = deployment.clone().map(|endpoint| client.orchestrator(endpoint));
    let poller = match (config.poll_interval(), deployment) {
        (Some(period), Some(source)) => {
            Some(TagPoller::new(source, period).spawn(client.session().clone(), client.injector()))
        }
        _ => None,
    };

    println!(
        "{} connecting to {} (type 'help' for commands)",
        "→".bright_blue(),
        config.broker_url.bright_white()
    );
    client.connect().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                println!("{} {}", "✗".red(), err);
                continue;
            }
        };
        match console::execute(command, &client, orchestrator.as_ref()).await {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(err) => println!("{} {:#}", "✗".red(), err),
        }
    }

    if let Some(poller) = poller {
        poller.abort();
    }
    client.close();
    Ok(())
}
