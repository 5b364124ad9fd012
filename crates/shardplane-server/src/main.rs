//! Shardplane - shard placement and indexing coordination for index nodes

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use shardplane_server::config::{parse_seeds, ClusterSettings, DiscoveryMode, MaindbBackend};
use shardplane_server::context::ClusterContext;
use shardplane_server::observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig};
use shardplane_server::{api, purge, version};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "shardplane")]
#[command(about = "Shard placement, replication and purge jobs for index node fleets")]
#[command(version = version::VERSION)]
struct Cli {
    #[command(flatten)]
    overrides: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery and the admin HTTP server
    Serve,
    /// Purge deleted knowledge boxes (metadata, node shards, storage)
    Purge,
    /// Delete shards that no knowledge box references any more
    PurgeOrphans,
    /// Print build information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum MaindbArg {
    Memory,
    Etcd,
}

/// Command line overrides applied on top of `ClusterSettings::from_env()`
#[derive(Args)]
struct SettingsArgs {
    /// Replicas per logical shard
    #[arg(long, env = "SHARDPLANE_NODE_REPLICAS", global = true)]
    node_replicas: Option<usize>,

    /// Seed addresses (comma-separated, `#replica` suffix for read replicas)
    #[arg(long, env = "SHARDPLANE_DISCOVERY_SEEDS", global = true)]
    seeds: Option<String>,

    /// Metadata store backend
    #[arg(long, env = "SHARDPLANE_MAINDB", value_enum, global = true)]
    maindb: Option<MaindbArg>,

    /// etcd endpoints (comma-separated)
    #[arg(long, env = "ETCD_ENDPOINTS", global = true)]
    etcd_endpoints: Option<String>,

    /// Run with an embedded index node
    #[arg(long, global = true)]
    standalone: bool,

    /// Admin HTTP bind address
    #[arg(long, env = "SHARDPLANE_HTTP_BIND", global = true)]
    http_bind: Option<String>,
}

impl SettingsArgs {
    fn apply(self, mut settings: ClusterSettings) -> ClusterSettings {
        if let Some(replicas) = self.node_replicas {
            settings.node_replicas = replicas;
        }
        if let Some(seeds) = self.seeds {
            settings.discovery = DiscoveryMode::Seeds(parse_seeds(&seeds));
        }
        if let Some(maindb) = self.maindb {
            settings.maindb = match maindb {
                MaindbArg::Memory => MaindbBackend::Memory,
                MaindbArg::Etcd => MaindbBackend::Etcd,
            };
        }
        if let Some(endpoints) = self.etcd_endpoints {
            settings.etcd_endpoints = endpoints.split(',').map(|s| s.trim().to_string()).collect();
        }
        if self.standalone {
            settings.standalone_mode = true;
        }
        if settings.standalone_mode {
            settings.discovery = DiscoveryMode::Standalone;
        }
        if let Some(bind) = self.http_bind {
            settings.http_bind = bind;
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("{}", version::build_info());
        return Ok(());
    }

    init_tracing(TracingConfig::from_env())
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    info!(version = %version::full_version(), "Starting shardplane");

    let settings = cli.overrides.apply(ClusterSettings::from_env());
    let result = match cli.command {
        Commands::Serve => serve(settings).await,
        Commands::Purge => run_purge(settings).await,
        Commands::PurgeOrphans => run_purge_orphans(settings).await,
        Commands::Version => Ok(()),
    };

    shutdown_tracing();
    result
}

async fn serve(settings: ClusterSettings) -> Result<()> {
    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Failed to install the Prometheus recorder, /metrics disabled");
            None
        }
    };

    let bind_addr = settings.http_bind.clone();
    let context = Arc::new(ClusterContext::build(settings).await?);

    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
    let discovery = match context.discovery_controller(shutdown_rx).await? {
        Some(controller) => Some(tokio::spawn(controller.run())),
        None => {
            info!("No discovery loop in standalone mode");
            None
        }
    };

    let app = api::create_router(api::AppState::new(context, metrics_state));
    info!(bind_addr = %bind_addr, "Starting admin API server");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for the shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    // The loop may already be gone
    let _ = shutdown_tx.send(());
    if let Some(handle) = discovery {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Discovery loop ended with an error"),
            Err(e) => warn!(error = %e, "Discovery task panicked"),
        }
    }
    Ok(())
}

/// Build the context and refresh the registry once. A failed pass is
/// logged: items that need an unreachable node stay for the next run.
async fn job_context(settings: ClusterSettings) -> Result<ClusterContext> {
    let context = ClusterContext::build(settings).await?;
    match context.discover_once().await {
        Ok(summary) => {
            let nodes = context.registry.len().await;
            info!(nodes = nodes, added = summary.added.len(), "Registry refreshed");
        }
        Err(e) => warn!(error = %e, "Discovery pass failed, continuing with an empty registry"),
    }
    Ok(context)
}

async fn run_purge(settings: ClusterSettings) -> Result<()> {
    let context = job_context(settings).await?;

    match purge::purge_kb(&context.kb).await {
        Ok(report) => info!(
            purged = report.purged.len(),
            retained = report.retained.len(),
            "purge_kb finished"
        ),
        Err(e) => error!(error = %e, "purge_kb failed"),
    }
    match purge::purge_kb_storage(context.driver.as_ref(), context.storage.as_ref()).await {
        Ok(report) => info!(
            purged = report.purged.len(),
            retained = report.retained.len(),
            "purge_kb_storage finished"
        ),
        Err(e) => error!(error = %e, "purge_kb_storage failed"),
    }
    Ok(())
}

async fn run_purge_orphans(settings: ClusterSettings) -> Result<()> {
    let context = job_context(settings).await?;

    match purge::purge_orphan_shards(&context.registry, context.driver.as_ref()).await {
        Ok(report) => info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            unreachable_nodes = report.unreachable_nodes.len(),
            "purge_orphan_shards finished"
        ),
        Err(e) => error!(error = %e, "purge_orphan_shards failed"),
    }
    Ok(())
}
