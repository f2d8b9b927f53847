use crate::{
    config::FileConfig,
    node::{Node, Outbound},
};
use silc_network::{
    errors::StoreError,
    id::EntityId,
};

use tokio::sync::broadcast;
use tracing_subscriber::util::SubscriberInitExt;

use std::{
    path::Path,
    time::Duration,
};

#[derive(Debug,thiserror::Error)]
pub enum RunError
{
    #[error("Config error: {0}")]
    Config(#[from] silc_network::errors::ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Couldn't create server: {0}")]
    Store(#[from] StoreError),
    #[error("Logging already initialised: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}

/// Load the config at `config_path`, install the logging it describes, and
/// run a node until interrupted.
///
/// No network listener is attached here: packets the core sends are logged
/// and dropped until a transport layer takes over the node's channels.
///
/// This creates its own tokio runtime and must not be called from inside one.
pub fn run_server(config_path: impl AsRef<Path>) -> Result<(), RunError>
{
    // Load before starting anything, so config errors are reported early
    let config = FileConfig::load_file(&config_path)?;

    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(do_run_server(config))
}

async fn do_run_server(config: FileConfig) -> Result<(), RunError>
{
    crate::tracing_config::build_subscriber(config.log.clone())?.try_init()?;

    let (node, channels) = Node::new(config.server, Duration::from_secs(config.tick_interval.max(1)))?;
    tracing::info!("Starting server {} ({})", node.server().config().name, EntityId::from(node.server().id()));

    let (shutdown_send, shutdown_recv) = broadcast::channel(1);
    let node_task = tokio::spawn(node.run(shutdown_recv));

    let mut outbound = channels.outbound;
    let outbound_task = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await
        {
            match item
            {
                Outbound::Send(conn, packet) => tracing::debug!("No transport; dropping {} packet for {}", packet.packet_type, conn),
                Outbound::Close(conn, status, _) => tracing::debug!("No transport; dropping close of {} ({})", conn, status),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted");

    if shutdown_send.send(()).is_err()
    {
        tracing::error!("Node loop already gone");
    }

    match node_task.await
    {
        Ok(server) =>
        {
            let stats = server.stats();
            tracing::info!("Stopped with {} clients, {} channels and {} servers known", stats.clients, stats.channels, stats.servers);
            // Dropping the server drops the last outbound sender
            drop(server);
        }
        Err(e) => tracing::error!(?e, "Node task failed"),
    }
    drop(channels.events);

    if let Err(e) = outbound_task.await
    {
        tracing::error!(?e, "Outbound task failed");
    }

    Ok(())
}
