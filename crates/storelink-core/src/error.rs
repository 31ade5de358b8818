// ── Core error types ──
//
// User-facing errors from storelink-core. Consumers never see raw HTTP
// statuses or JSON parse failures; the `From<storelink_api::Error>` impl
// translates transport-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Not signed in")]
    SignedOut,

    #[error("The {topic} channel requires the Admin role")]
    RoleDenied { topic: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Cannot reach the backend: {reason}")]
    ConnectionFailed { reason: String },

    #[error("API error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<storelink_api::Error> for CoreError {
    fn from(err: storelink_api::Error) -> Self {
        match err {
            storelink_api::Error::SessionExpired => Self::SignedOut,
            storelink_api::Error::Authentication { message } => {
                Self::AuthenticationFailed { message }
            }
            storelink_api::Error::Transport(ref e) => Self::ConnectionFailed {
                reason: e.to_string(),
            },
            storelink_api::Error::InvalidUrl(e) => Self::Config {
                message: format!("Invalid URL: {e}"),
            },
            storelink_api::Error::Tls(msg) => Self::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            storelink_api::Error::Api { status, message } => Self::Api {
                message,
                status: Some(status),
            },
            storelink_api::Error::ChannelConnect(reason) => Self::ConnectionFailed { reason },
            storelink_api::Error::Deserialization { message, body: _ } => {
                Self::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
