//! # ptproxy - Pluggable Transport Helper
//!
//! ptproxy runs a Tor pluggable transport such as `obfs4proxy` as a child
//! process and puts it to use outside of Tor. In client mode it accepts plain
//! TCP connections on a local port and relays each one to a bridge through
//! the transport's SOCKS5 endpoint. In server mode it starts the transport
//! listening for obfuscated connections and forwarding them to a local
//! service.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ptproxy::config::load_config;
//! use ptproxy::client::run_client;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("ptproxy.toml")?;
//!     let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_client(config, shutdown_rx).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The transport announces its SOCKS5 endpoint on stdout. Every local
//! connection gets its own SOCKS5 connect to the bridge, with the bridge
//! credential carried in the username and password fields. A single task
//! then moves bytes in both directions for all sessions.
//!
//! ```text
//! Local client -> ptproxy -> transport (SOCKS5) -> Bridge
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod helper;
pub mod pt;
pub mod relay;
pub mod server;

// Re-export commonly used items
pub use client::run_client;
pub use config::{load_config, Config, Mode};
pub use error::{ConnectError, HandshakeError, LaunchError, PtProxyError};
pub use server::run_server;

/// Version of the ptproxy library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
