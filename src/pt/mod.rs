//! Pluggable transport process and its managed-proxy handshake

pub mod handshake;
pub mod launcher;

pub use handshake::{
    read_handshake, read_server_handshake, HandshakeResult, ServerHandshake,
    SUPPORTED_PROTOCOL,
};
pub use launcher::{launch, LaunchSpec, Role, TransportHandle};
