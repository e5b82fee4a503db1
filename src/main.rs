//! Server list daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;

mod config;
mod contract;
mod error;
mod handler;
mod query;
mod server;
mod store;
mod transport;
mod types;
mod wire;

use config::{Config, TransportKind};
use handler::Handler;
use store::{MemoryStore, RecordStore, Sweeper};
use transport::{TcpTransport, UdpTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting server list with config: {:?}", cfg);

    let contract = Arc::new(cfg.contract()?);
    for definition in contract.definitions() {
        info!(
            "Contract field {} ({}, {})",
            definition.name,
            definition.field_type,
            if definition.required { "required" } else { "optional" }
        );
    }
    let timeout = cfg.server_timeout();

    // Record store
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new(Arc::clone(&contract), timeout));
    info!("Using {} record store", store.name());

    // TTL sweep
    let sweep_handle = cfg
        .sweep_interval()
        .map(|period| Sweeper::new(Arc::clone(&store), timeout, period).spawn());

    // Listener
    let handler = Arc::new(Handler::new(contract, store, timeout, cfg.verbose));
    let bind = cfg.bind_addr();
    let mut server_handle = match cfg.transport {
        TransportKind::Tcp => {
            let transport = TcpTransport::bind(bind, cfg.max_frame_size).await?;
            tokio::spawn(server::serve(transport, handler))
        }
        TransportKind::Udp => {
            let transport =
                UdpTransport::bind(bind, cfg.max_frame_size, cfg.udp_session_idle()).await?;
            tokio::spawn(server::serve(transport, handler))
        }
    };

    // Graceful Shutdown
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        },
        joined = &mut server_handle => match joined {
            Ok(Ok(())) => info!("Server stopped"),
            Ok(Err(e)) => error!("Server failed: {}", e),
            Err(e) => error!("Server task failed: {}", e),
        },
    }

    // Abort tasks
    server_handle.abort();
    if let Some(handle) = sweep_handle {
        handle.abort();
    }

    info!("Shutdown complete.");
    Ok(())
}
