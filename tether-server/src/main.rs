mod config;
mod server;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use config::{AgentConfig, Config};
use server::run_server;
use std::collections::BTreeMap;
use std::sync::Arc;
use tether_core::{
    Agent, Annotations, AttachmentBatch, AttachmentSpec, CreateExecutorAttachmentRequest,
    DispatcherClient, ExecutorAttachmentManager, HttpDispatcherClient,
    ListExecutorAttachmentsRequest, Listener, Notifier, RemoveExecutorAttachmentRequest,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Executor attachment control path for cluster nodes")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the attachment controller
    Manager,

    /// Request an attachment for this node
    Create {
        /// Network ID or name
        #[arg(long)]
        target: String,

        /// Requested address, may be repeated
        #[arg(long = "address")]
        addresses: Vec<String>,

        /// Attachment name
        #[arg(long, default_value = "")]
        name: String,

        /// Label as key=value, may be repeated
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
    },

    /// Release an attachment
    Remove {
        /// Attachment ID
        id: String,
    },

    /// List attachments owned by this node
    List {
        /// List attachments of every node
        #[arg(long)]
        all: bool,
    },

    /// Log attachment changes for this node until interrupted
    Watch,
}

fn parse_label(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("invalid label '{}': expected key=value", value)),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=info,tether_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let cfg = match Config::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if matches!(cli.command, Commands::Manager) {
        let manager = match cfg.manager() {
            Ok(manager) => manager.clone(),
            Err(e) => {
                tracing::error!("Invalid manager config: {}", e);
                std::process::exit(1);
            }
        };

        tracing::info!("Starting Tether manager with config: {}", cli.config);
        if let Err(e) = run_server(manager).await {
            tracing::error!("Server error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Err(error) = run_node_command(&cfg, cli.command).await {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}

async fn run_node_command(cfg: &Config, command: Commands) -> anyhow::Result<()> {
    let agent_cfg = cfg.agent().context("invalid agent config")?;
    let agent = build_agent(agent_cfg)?;

    match command {
        Commands::Manager => anyhow::bail!("manager is not a node command"),
        Commands::Create {
            target,
            addresses,
            name,
            labels,
        } => {
            let spec = AttachmentSpec {
                node_id: agent.node_id().to_string(),
                target: target.clone(),
                addresses,
                annotations: Annotations {
                    name,
                    labels: labels.into_iter().collect::<BTreeMap<_, _>>(),
                },
            };

            let response = agent
                .create_attachment(CreateExecutorAttachmentRequest { spec })
                .await
                .with_context(|| format!("failed to create attachment on {}", target))?;
            println!("{}", response.id);
        }
        Commands::Remove { id } => {
            agent
                .remove_attachment(RemoveExecutorAttachmentRequest { id: id.clone() })
                .await
                .with_context(|| format!("failed to remove attachment {}", id))?;
            println!("{}", id);
        }
        Commands::List { all } => {
            let dispatcher = http_client(agent_cfg)?;
            let node_id = (!all).then(|| agent.node_id().to_string());
            let response = dispatcher
                .list_executor_attachments(ListExecutorAttachmentsRequest { node_id })
                .await
                .context("failed to list attachments")?;
            println!("{}", serde_json::to_string_pretty(&response.attachments)?);
        }
        Commands::Watch => {
            let registration_id = agent
                .register(Some(Arc::new(LoggingListener)))
                .context("failed to register listener")?;
            agent.start_sync(agent_cfg.sync_interval());
            tracing::info!(
                "Watching attachments for node {} (listener {})",
                agent.node_id(),
                registration_id
            );

            tokio::signal::ctrl_c()
                .await
                .context("failed to wait for ctrl-c")?;
            agent.leave(&registration_id);
            agent.shutdown().await;
        }
    }

    Ok(())
}

fn http_client(agent_cfg: &AgentConfig) -> anyhow::Result<HttpDispatcherClient> {
    HttpDispatcherClient::new(&agent_cfg.manager_addr, agent_cfg.request_timeout())
        .with_context(|| format!("invalid manager address {}", agent_cfg.manager_addr))
}

fn build_agent(agent_cfg: &AgentConfig) -> anyhow::Result<Agent> {
    let dispatcher = http_client(agent_cfg)?;
    let notifier = Notifier::new(agent_cfg.listener_queue_depth)
        .with_shutdown_grace(agent_cfg.shutdown_grace());
    Agent::new(
        agent_cfg.node_id.clone(),
        Arc::new(dispatcher),
        Arc::new(notifier),
    )
    .context("invalid agent configuration")
}

struct LoggingListener;

#[async_trait]
impl Listener for LoggingListener {
    async fn notify(&self, attachments: AttachmentBatch) {
        tracing::info!("{} attachments on this node", attachments.len());
        for attachment in attachments.iter() {
            tracing::info!(
                "  {} network={} state={} addresses={:?}",
                attachment.id,
                attachment.attachment.network.id,
                attachment.status.state,
                attachment.attachment.addresses
            );
        }
    }
}
