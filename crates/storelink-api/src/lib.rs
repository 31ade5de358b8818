// storelink-api: Async transport layer for the Storelink realtime client.
//
// Three concerns live here: the process-wide session store (token pair +
// identity), the HTTP gateway that renews expired tokens transparently,
// and the push-channel connection with automatic reconnect. Everything
// consumer-facing (event routing, lifecycle orchestration) sits in
// `storelink-core` on top of this crate.

pub mod channel;
pub mod error;
pub mod gateway;
pub mod session;
pub mod transport;

pub use channel::{ChannelEvent, ChannelHandle, ChannelState, Topic};
pub use error::Error;
pub use gateway::Gateway;
pub use session::{Role, Session, SessionStore, TokenProvider, UserIdentity};
pub use transport::{TlsMode, TransportConfig};
