use thiserror::Error;

/// Top-level error type for the `storelink-api` crate.
///
/// Covers every failure mode across the transport surfaces: session
/// renewal, the HTTP gateway, and the push channels. `storelink-core`
/// maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The backend rejected our credentials (bad token, revoked user, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Session is over: the refresh token was rejected or no session
    /// exists any more. The caller must send the user back to sign-in.
    #[error("Session expired -- sign-in required")]
    SessionExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── API ─────────────────────────────────────────────────────────
    /// Non-success response from the backend.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Push channels ───────────────────────────────────────────────
    /// Channel handshake or stream failure. Always recoverable: the
    /// connection loop retries on its own schedule.
    #[error("Channel connection failed: {0}")]
    ChannelConnect(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error means the session is gone and the
    /// user has to authenticate again.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::ChannelConnect(_) => true,
            _ => false,
        }
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
