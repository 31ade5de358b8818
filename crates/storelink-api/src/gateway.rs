// Authenticated HTTP gateway.
//
// Wraps `reqwest::Client` with bearer attachment and transparent token
// renewal. Every outbound request reads the access token from the
// session store at dispatch time. A 401 on a not-yet-retried request
// triggers the single-flight renewal protocol, then exactly one replay;
// a request therefore succeeds, fails after at most one replay, or ends
// the session -- it never loops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::session::{Session, SessionStore, UserIdentity};
use crate::transport::TransportConfig;

/// Token renewal endpoint, relative to the API base URL.
const REFRESH_PATH: &str = "/auth/refresh-token";

/// Authenticated HTTP client for the Storelink backend.
///
/// Cheap to share behind an `Arc`. All concurrent callers go through
/// one renewal gate: when several requests hit a 401 at once, exactly
/// one renewal call is issued and the rest reuse its outcome.
pub struct Gateway {
    http: reqwest::Client,
    base_url: Url,
    sessions: Arc<SessionStore>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl Gateway {
    /// Create a gateway from a `TransportConfig`.
    pub fn new(
        base_url: Url,
        sessions: Arc<SessionStore>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            sessions,
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// The session store this gateway reads tokens from.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a GET request and deserialize the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let resp = self.request_raw(Method::GET, path, None::<&()>).await?;
        Self::parse_json(resp).await
    }

    /// Send a POST request with a JSON body and deserialize the response.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let resp = self.request_raw(Method::POST, path, Some(body)).await?;
        Self::parse_json(resp).await
    }

    /// Send a PUT request with a JSON body and deserialize the response.
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let resp = self.request_raw(Method::PUT, path, Some(body)).await?;
        Self::parse_json(resp).await
    }

    /// Send a DELETE request, discarding any response body.
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        self.request_raw(Method::DELETE, path, None::<&()>).await?;
        Ok(())
    }

    // ── Core dispatch / renewal protocol ─────────────────────────────

    async fn request_raw<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, Error> {
        let url = self.base_url.join(path)?;

        // Generation snapshot taken before dispatch: if it moved by the
        // time we reach the renewal gate, somebody else already renewed
        // (or the user signed in/out) and we must not renew again.
        let observed = self.sessions.generation();
        let token = self.bearer();
        let authed = token.is_some();

        let resp = self.dispatch(method.clone(), url.clone(), body, token).await?;
        if resp.status() != StatusCode::UNAUTHORIZED || !authed {
            // No session means nothing to renew; surface the 401 as-is.
            return Self::check_status(resp).await;
        }

        debug!(url = %url, "request unauthorized, renewing session");
        self.renew_session(observed).await?;

        // Exactly one replay with the fresh token. A second 401 falls
        // through check_status as an error -- never a further retry.
        let resp = self.dispatch(method, url, body, self.bearer()).await?;
        Self::check_status(resp).await
    }

    async fn dispatch<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        token: Option<SecretString>,
    ) -> Result<reqwest::Response, Error> {
        debug!("{} {}", method, url);

        let mut request = self.http.request(method, url);
        if let Some(token) = token {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(Error::Transport)
    }

    /// Current access token, read fresh from the store.
    fn bearer(&self) -> Option<SecretString> {
        self.sessions.get().map(|s| s.access_token.clone())
    }

    /// Single-flight token renewal.
    ///
    /// Callers serialize on the gate. The caller that acquires it with
    /// the generation unchanged performs the renewal; everyone queued
    /// behind it observes the bumped generation and reuses the outcome.
    async fn renew_session(&self, observed: u64) -> Result<(), Error> {
        let _flight = self.refresh_gate.lock().await;

        if self.sessions.generation() != observed {
            // A renewal (or sign-in/out) settled while we waited.
            return if self.sessions.get().is_some() {
                Ok(())
            } else {
                Err(Error::SessionExpired)
            };
        }

        let Some(session) = self.sessions.get() else {
            return Err(Error::SessionExpired);
        };

        let url = self.base_url.join(REFRESH_PATH)?;
        debug!(url = %url, "renewing access token");

        let request = RefreshRequest {
            access_token: session.access_token.expose_secret(),
            refresh_token: session.refresh_token.expose_secret(),
        };

        let renewed: Result<RefreshResponse, Error> = async {
            let resp = self
                .http
                .post(url)
                .json(&request)
                .send()
                .await
                .map_err(Error::Transport)?;
            let resp = Self::check_status(resp).await?;
            Self::parse_json(resp).await
        }
        .await;

        match renewed {
            Ok(renewal) => {
                self.sessions.set(renewal.into_session());
                debug!("session renewed");
                Ok(())
            }
            Err(e) => {
                // Renewal is the last line of defense; when it fails the
                // session is over. Clearing the store flips the signed-in
                // watch exactly once, sending the user back to sign-in.
                warn!(error = %e, "token renewal failed, signing out");
                self.sessions.clear();
                Err(Error::SessionExpired)
            }
        }
    }

    // ── Response handling ────────────────────────────────────────────

    /// Convert non-success statuses into errors, passing success through.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "access token rejected".into(),
            });
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    access_token: &'a str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    user: UserIdentity,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl RefreshResponse {
    fn into_session(self) -> Session {
        Session {
            access_token: SecretString::from(self.access_token),
            refresh_token: SecretString::from(self.refresh_token),
            expires_at: self.expires_at,
            user: self.user,
        }
    }
}

/// Error body shape the backend uses: `{ "message": "..." }`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

// ── Tests ────────────────────────────────────────────────────────────
