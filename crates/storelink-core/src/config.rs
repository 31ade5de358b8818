// ── Runtime client configuration ──
//
// Describes *where* the backend lives and how to reach it. The embedding
// application constructs a `ClientConfig` and hands it in -- core never
// reads config files.

use std::sync::Arc;

use storelink_api::channel::Topic;
use storelink_api::gateway::Gateway;
use storelink_api::session::SessionStore;
use storelink_api::transport::TransportConfig;
use url::Url;

use crate::error::CoreError;

/// Configuration for one Storelink backend connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP API root (e.g. `https://api.storelink.example`).
    pub base_url: Url,
    /// Push-channel root (e.g. `https://api.storelink.example/hubs`).
    /// Topic endpoints hang off this path; `http(s)` schemes are mapped
    /// to `ws(s)` automatically.
    pub channel_base: Url,
    /// Transport tuning shared by the gateway and the channels.
    pub transport: TransportConfig,
}

impl ClientConfig {
    pub fn new(base_url: Url, channel_base: Url) -> Self {
        Self {
            base_url,
            channel_base,
            transport: TransportConfig::default(),
        }
    }

    /// Build an authenticated HTTP gateway against this backend.
    pub fn gateway(&self, sessions: Arc<SessionStore>) -> Result<Gateway, CoreError> {
        Ok(Gateway::new(self.base_url.clone(), sessions, &self.transport)?)
    }

    /// The WebSocket endpoint for one topic.
    pub fn channel_endpoint(&self, topic: Topic) -> Result<Url, CoreError> {
        let base = self.channel_base.as_str().trim_end_matches('/');
        let (scheme, rest) = base.split_once("://").ok_or_else(|| CoreError::Config {
            message: format!("channel base URL has no scheme: {base}"),
        })?;

        let ws_scheme = match scheme {
            "http" => "ws",
            "https" => "wss",
            "ws" | "wss" => scheme,
            other => {
                return Err(CoreError::Config {
                    message: format!("unsupported channel scheme: {other}"),
                });
            }
        };

        Url::parse(&format!("{ws_scheme}://{rest}{}", topic.path())).map_err(|e| {
            CoreError::Config {
                message: format!("invalid channel endpoint: {e}"),
            }
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────
