//! Client role
//!
//! Launches the transport, learns its SOCKS5 endpoint, optionally probes the
//! bridge once and then relays local connections until shutdown. The
//! transport is killed on every exit path.

use crate::bridge::{BridgeConnector, Connector, Credential};
use crate::config::{ClientConfig, Config};
use crate::error::{LaunchError, PtProxyError};
use crate::helper::{duration_from_secs, split_host_port};
use crate::pt::{launch, read_handshake, LaunchSpec, TransportHandle};
use crate::relay::{RelayEngine, RelayOptions};
use tokio::sync::broadcast;
use tracing::info;

/// Run the client role with the given configuration
pub async fn run_client(
    config: Config,
    shutdown_rx: broadcast::Receiver<bool>,
) -> Result<(), PtProxyError> {
    let client = config
        .client
        .clone()
        .ok_or_else(|| PtProxyError::Config("missing [client] section".to_string()))?;
    let (bridge_host, bridge_port) = split_host_port(&client.bridge)
        .map_err(|e| PtProxyError::Config(format!("client.bridge: {}", e)))?;

    info!("Launching transport client {:?}", config.transport.binary);
    let mut transport = launch(&LaunchSpec::client(&config.transport))?;

    let result = relay_through(
        &mut transport,
        &config,
        &client,
        (bridge_host, bridge_port),
        shutdown_rx,
    )
    .await;

    transport.shutdown().await;
    result
}

async fn relay_through(
    transport: &mut TransportHandle,
    config: &Config,
    client: &ClientConfig,
    (bridge_host, bridge_port): (String, u16),
    mut shutdown_rx: broadcast::Receiver<bool>,
) -> Result<(), PtProxyError> {
    let startup = async {
        let mut stdout = transport
            .take_stdout()
            .ok_or(LaunchError::MissingPipe("stdout"))?;
        let handshake = read_handshake(
            &mut stdout,
            &config.transport.name,
            duration_from_secs(config.transport.handshake_timeout),
        )
        .await?;
        TransportHandle::drain_stdout(stdout);
        info!(
            "Transport is running {} on {}",
            handshake.protocol,
            handshake.endpoint()
        );

        let connector = BridgeConnector::from_handshake(
            &handshake,
            Credential::new(client.credential.clone()),
            bridge_host,
            bridge_port,
        )
        .with_connect_timeout(duration_from_secs(client.connect_timeout));

        if client.probe_bridge {
            info!("Connecting to bridge {}", connector.describe());
            let probe = connector.connect().await?;
            drop(probe);
            info!("Connected to bridge {}", client.bridge);
        }

        let options = RelayOptions {
            chunk_size: client.chunk_size,
        };
        let engine = RelayEngine::bind(&client.listen_addr, connector, options).await?;
        Ok::<_, PtProxyError>(engine)
    };

    let engine = tokio::select! {
        engine = startup => engine?,
        _ = shutdown_rx.recv() => {
            info!("Shutdown requested during startup");
            return Ok(());
        }
    };

    tokio::select! {
        result = engine.run(shutdown_rx) => result,
        status = transport.wait_exit() => {
            let status = status
                .map(|s| s.to_string())
                .unwrap_or_else(|e| e.to_string());
            Err(PtProxyError::TransportExited(status))
        }
    }
}
