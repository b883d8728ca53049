//! fxbridge-server: WebSocket console bridge for a FiveM game server
//!
//! Spawns the FXServer process, mirrors its console output to every
//! connected WebSocket client and feeds client commands back to its
//! stdin. SIGINT/SIGTERM start a graceful shutdown with a bounded grace
//! window before the child is killed.

mod auth;
mod config;
mod gateway;
mod process;
mod registry;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use fxbridge_utils::Result;

use crate::config::ServerConfig;
use crate::gateway::GatewayState;
use crate::process::ProcessSupervisor;
use crate::registry::ClientRegistry;
use crate::shutdown::{ShutdownCoordinator, ShutdownSignal};

#[tokio::main]
async fn main() {
    if let Err(e) = fxbridge_utils::init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let config = ServerConfig::parse();
    if let Err(e) = run(config).await {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> Result<()> {
    if config.api_key.is_none() {
        warn!("WEBSOCKET_API_KEY is not set, console bridge is open without authentication");
    }

    let registry = Arc::new(ClientRegistry::new());
    let supervisor = Arc::new(ProcessSupervisor::new(Arc::clone(&registry)));

    // A game server that cannot launch leaves nothing to bridge
    supervisor
        .start(&config.linker, &config.child_args(), &config.working_dir)
        .await?;

    let listener = TcpListener::bind(config.listen_addr()).await?;
    let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&supervisor)));
    let mut shutdown_rx = coordinator.subscribe();

    let state = Arc::new(GatewayState {
        registry,
        supervisor,
        api_key: config.api_key.clone(),
    });
    let accept_loop = tokio::spawn(gateway::run_accept_loop(
        listener,
        state,
        coordinator.subscribe(),
    ));

    // Signal handlers stay installed for the life of the process; repeat
    // signals land in the coordinator, which ignores them once shutdown
    // has begun.
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let signal_coordinator = Arc::clone(&coordinator);
    tokio::spawn(async move {
        loop {
            let sig = tokio::select! {
                _ = interrupt.recv() => ShutdownSignal::Interrupt,
                _ = terminate.recv() => ShutdownSignal::Terminate,
            };
            signal_coordinator.trigger(sig).await;
        }
    });

    let _ = shutdown_rx.recv().await;
    let outcome = coordinator.await_grace().await;
    let _ = accept_loop.await;
    info!(?outcome, "Console bridge stopped");
    Ok(())
}
