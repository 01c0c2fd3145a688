use clap::Parser;
use furnace::{activations::hierarchy::Hierarchy, build_rpc_module, HubConfig, NodeStore};
use jsonrpsee::server::{Server, ServerHandle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Furnace hub: hierarchical node store over JSON-RPC (WebSocket)
#[derive(Parser, Debug)]
#[command(name = "furnace", version, about)]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and FURNACE_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database path (overrides config and FURNACE_DB)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (silently ignore if not found)
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("furnace=info,jsonrpsee=info,sqlx=warn")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mut config = HubConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }

    if let Some(dir) = config.db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let storage = Arc::new(NodeStore::new(config.store_config()).await?);
    let module = build_rpc_module(storage)?;

    let addr: SocketAddr = format!("127.0.0.1:{}", config.port).parse()?;
    let server = Server::builder().build(addr).await?;
    let handle: ServerHandle = server.start(module);

    let methods = Hierarchy::method_schemas();
    tracing::info!("Furnace hub started at ws://{}", addr);
    tracing::info!("Database: {}", config.db_path.display());
    tracing::info!(
        "{} v{} - {}",
        Hierarchy::NAMESPACE,
        Hierarchy::VERSION,
        Hierarchy::DESCRIPTION
    );
    for method in &methods {
        tracing::info!("  - {}", method.name);
    }
    tracing::info!("Total methods: {} (+1 hub)", methods.len());

    // Keep server running
    handle.stopped().await;

    Ok(())
}
