//! Session relay between local clients and the bridge

mod engine;
mod session;
mod stats;

pub use engine::{RelayEngine, RelayOptions};
pub use session::{ReadyEvent, Session, SessionError, SessionId, SessionSet, Side};
pub use stats::{RelayStats, RelayStatsSnapshot};
