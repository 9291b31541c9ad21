//! Server role
//!
//! Starts the transport in server mode and keeps it alive. The transport
//! itself accepts obfuscated connections and forwards them to the ORPort;
//! nothing is relayed here.

use crate::config::Config;
use crate::error::{LaunchError, PtProxyError};
use crate::helper::duration_from_secs;
use crate::pt::{launch, read_server_handshake, LaunchSpec, TransportHandle};
use tokio::sync::broadcast;
use tracing::info;

/// Run the server role with the given configuration
pub async fn run_server(
    config: Config,
    mut shutdown_rx: broadcast::Receiver<bool>,
) -> Result<(), PtProxyError> {
    let server = config
        .server
        .clone()
        .ok_or_else(|| PtProxyError::Config("missing [server] section".to_string()))?;

    info!(
        "Launching transport server {:?} on {} forwarding to {}",
        config.transport.binary, server.bind, server.orport
    );
    let mut transport = launch(&LaunchSpec::from_config(&config))?;

    let result = async {
        let mut stdout = transport
            .take_stdout()
            .ok_or(LaunchError::MissingPipe("stdout"))?;
        let announced = tokio::select! {
            announced = read_server_handshake(
                &mut stdout,
                &config.transport.name,
                duration_from_secs(config.transport.handshake_timeout),
            ) => announced?,
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested during startup");
                return Ok(());
            }
        };
        TransportHandle::drain_stdout(stdout);

        info!(
            "Transport {} listening on {}:{}",
            announced.transport_name, announced.address, announced.port
        );
        info!("Bridge state and certificate in {:?}", transport.state_dir());

        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down transport server");
                Ok(())
            }
            status = transport.wait_exit() => {
                let status = status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|e| e.to_string());
                Err(PtProxyError::TransportExited(status))
            }
        }
    }
    .await;

    transport.shutdown().await;
    result
}
