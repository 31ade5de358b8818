// storelink-core: Event routing and connection lifecycle for the
// Storelink realtime client. Sits on top of `storelink-api`: it decides
// which topic channels to open for the current session, routes inbound
// events to cache invalidations and user alerts, and exposes the group
// membership calls for order tracking.

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod ports;
pub mod router;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::ClientConfig;
pub use controller::LiveController;
pub use error::CoreError;
pub use ports::{AlertSink, CacheInvalidator, CacheKey, Severity};

// Transport types consumers need alongside this crate.
pub use storelink_api::{
    ChannelEvent, ChannelState, Gateway, Role, Session, SessionStore, Topic, TransportConfig,
    UserIdentity,
};
