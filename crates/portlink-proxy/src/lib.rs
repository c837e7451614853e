//! TCP forwarding engine
//!
//! This crate implements the data plane of the relay: one listener per
//! configured proxy port, a global budget on simultaneously relayed
//! connections, and per-connection routing to either a service on the
//! relay host itself (local passthrough) or the remote client registered
//! for the port.

mod budget;
mod probe;
mod proxy;

pub use budget::{ConnectionBudget, ConnectionPermit};
pub use probe::{ConnectProbe, LocalProbe};
pub use proxy::{TcpProxy, TcpProxyError, DEFAULT_MAX_CONNECTIONS};
