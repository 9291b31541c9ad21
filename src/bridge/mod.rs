//! Bridge connections through the pluggable transport

mod connector;
mod credential;

pub use connector::{BridgeConnector, Connector};
pub use credential::{Credential, NUL_PASSWORD, SOCKS5_FIELD_MAX};
