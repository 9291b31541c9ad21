//! Integration tests driving a scripted transport process
#![cfg(unix)]

mod common;

use common::{create_test_listener, spawn_echo_bridge, TestSocksServer};
use ptproxy::config::{ClientConfig, Config, ServerConfig, TransportConfig};
use ptproxy::error::{HandshakeError, LaunchError};
use ptproxy::pt::{launch, read_handshake, LaunchSpec};
use ptproxy::{run_client, run_server};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

/// Transport config running `script` under /bin/sh
fn scripted_transport(script: &str) -> TransportConfig {
    let mut transport = TransportConfig::new("/bin/sh");
    transport.args = vec!["-c".to_string(), script.to_string()];
    transport.handshake_timeout = 5;
    transport
}

async fn free_local_addr() -> String {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr.to_string()
}

#[tokio::test]
async fn test_handshake_from_process() {
    let transport = scripted_transport(
        "echo VERSION 1; echo CMETHOD obfs4 socks5 127.0.0.1:41000; exec sleep 30",
    );
    let mut handle = launch(&LaunchSpec::client(&transport)).unwrap();
    assert!(handle.pid().is_some());

    let mut stdout = handle.take_stdout().unwrap();
    assert!(handle.take_stdout().is_none());
    let result = read_handshake(&mut stdout, "obfs4", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result.address, "127.0.0.1");
    assert_eq!(result.port, 41000);

    handle.kill();
    handle.kill();
    assert!(handle.is_killed());
    handle.shutdown().await;
    assert!(handle.pid().is_none());
}

#[tokio::test]
async fn test_transport_environment_is_set() {
    let transport = scripted_transport(
        "echo VERSION $TOR_PT_MANAGED_TRANSPORT_VER; \
         echo CMETHOD $TOR_PT_CLIENT_TRANSPORTS socks5 127.0.0.1:41001",
    );
    let mut handle = launch(&LaunchSpec::client(&transport)).unwrap();
    let state_dir = handle.state_dir().to_path_buf();
    assert!(state_dir.is_dir());

    let mut stdout = handle.take_stdout().unwrap();
    let result = read_handshake(&mut stdout, "obfs4", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result.transport_name, "obfs4");
    assert_eq!(result.port, 41001);

    handle.shutdown().await;
    drop(handle);
    assert!(!state_dir.exists());
}

#[tokio::test]
async fn test_handshake_closed_early() {
    let transport = scripted_transport("echo VERSION 1");
    let mut handle = launch(&LaunchSpec::client(&transport)).unwrap();
    let mut stdout = handle.take_stdout().unwrap();
    let err = read_handshake(&mut stdout, "obfs4", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Closed));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_launch_missing_binary() {
    let transport = TransportConfig::new("/nonexistent/obfs4proxy");
    let err = launch(&LaunchSpec::client(&transport)).unwrap_err();
    assert!(matches!(err, LaunchError::BinaryNotFound { .. }));
}

fn client_config(transport: TransportConfig, bridge: String, listen: String) -> Config {
    let mut client = ClientConfig::new(bridge, "cert=abc;iat-mode=0");
    client.listen_addr = listen;
    client.connect_timeout = 5;
    Config {
        transport,
        client: Some(client),
        server: None,
    }
}

#[tokio::test]
async fn test_run_client_end_to_end() {
    let bridge = spawn_echo_bridge().await;
    let socks = TestSocksServer::start().await;
    let listen = free_local_addr().await;
    let transport = scripted_transport(&format!(
        "echo VERSION 1; echo CMETHOD obfs4 socks5 127.0.0.1:{}; exec sleep 30",
        socks.addr.port()
    ));
    let config = client_config(transport, bridge.to_string(), listen.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(run_client(config, shutdown_rx));

    let mut client = None;
    for _ in 0..200 {
        if let Ok(stream) = TcpStream::connect(&listen).await {
            client = Some(stream);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut client = client.expect("relay never started listening");

    client.write_all(b"through the transport").await.unwrap();
    let mut buf = [0u8; 21];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"through the transport");

    // Probe plus the relayed session
    assert_eq!(socks.auths().len(), 2);
    assert_eq!(socks.auths()[0].username, b"cert=abc;iat-mode=0".to_vec());

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_client_bad_version() {
    let transport =
        scripted_transport("echo VERSION 2; echo CMETHOD obfs4 socks5 127.0.0.1:1; sleep 30");
    let listen = free_local_addr().await;
    let config = client_config(transport, "127.0.0.1:443".to_string(), listen);

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let err = run_client(config, shutdown_rx).await.unwrap_err();
    assert_eq!(err.stage(), "handshake");
}

#[tokio::test]
async fn test_run_client_probe_failure_is_fatal() {
    let (refusing, refused_addr) = create_test_listener().await;
    drop(refusing);
    let transport = scripted_transport(&format!(
        "echo VERSION 1; echo CMETHOD obfs4 socks5 {}; exec sleep 30",
        refused_addr
    ));
    let listen = free_local_addr().await;
    let config = client_config(transport, "127.0.0.1:443".to_string(), listen);

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let err = run_client(config, shutdown_rx).await.unwrap_err();
    assert_eq!(err.stage(), "initial connect");
}

#[tokio::test]
async fn test_run_client_transport_exit() {
    let bridge = spawn_echo_bridge().await;
    let socks = TestSocksServer::start().await;
    let transport = scripted_transport(&format!(
        "echo VERSION 1; echo CMETHOD obfs4 socks5 127.0.0.1:{}; sleep 1",
        socks.addr.port()
    ));
    let listen = free_local_addr().await;
    let config = client_config(transport, bridge.to_string(), listen);

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let err = tokio::time::timeout(Duration::from_secs(10), run_client(config, shutdown_rx))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.stage(), "transport");
}

#[tokio::test]
async fn test_run_server_until_shutdown() {
    let state = tempfile::tempdir().unwrap();
    let mut transport = scripted_transport(
        "test \"$TOR_PT_SERVER_BINDADDR\" = obfs4-127.0.0.1:4443 || exit 3; \
         echo VERSION 1; echo SMETHOD obfs4 127.0.0.1:4443 ARGS:cert=abc,iat-mode=0; \
         exec sleep 30",
    );
    transport.state_dir = Some(state.path().to_path_buf());
    let config = Config {
        transport,
        client: None,
        server: Some(ServerConfig {
            bind: "127.0.0.1:4443".to_string(),
            orport: "127.0.0.1:8080".to_string(),
        }),
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(run_server(config, shutdown_rx));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!handle.is_finished());

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}
