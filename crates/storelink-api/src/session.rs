// Process-wide session state.
//
// Exactly one `Session` exists at a time (or none, when signed out).
// The store is the only state shared across the gateway and the push
// channels; every consumer takes it as a constructor dependency and
// reads it fresh at the point of use -- a token renewed between reads
// is picked up automatically on the next one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Role of the authenticated user. Gates access to the stock-alerts
/// channel (admin only) and nothing else in this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    SalesRep,
    Customer,
}

/// The authenticated identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub role: Role,
}

/// A signed-in session: token pair plus identity.
///
/// Mutated only by successful sign-in, successful renewal, or sign-out
/// (which clears it) -- and only through [`SessionStore`].
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Access-token expiry, when the backend reports one. Expiry is
    /// detected reactively (HTTP 401), so this is informational.
    pub expires_at: Option<DateTime<Utc>>,
    pub user: UserIdentity,
}

/// Supplies the current access token to a connection attempt.
///
/// Invoked at handshake time, never captured ahead of it, so each
/// reconnect attempt carries whatever token is current right then.
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Option<SecretString>;
}

// ── SessionStore ─────────────────────────────────────────────────────

/// Atomic holder of the current [`Session`].
///
/// `get`/`set`/`clear` are atomic with respect to each other: a reader
/// sees either the previous session or the new one, never a torn pair.
/// The generation counter ticks on every mutation and backs the
/// gateway's single-flight renewal guard.
pub struct SessionStore {
    current: ArcSwapOption<Session>,
    generation: AtomicU64,
    signed_in: watch::Sender<bool>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (signed_in, _) = watch::channel(false);
        Self {
            current: ArcSwapOption::const_empty(),
            generation: AtomicU64::new(0),
            signed_in,
        }
    }

    /// Snapshot of the current session, if signed in.
    pub fn get(&self) -> Option<Arc<Session>> {
        self.current.load_full()
    }

    /// Install a new session (sign-in or successful renewal).
    pub fn set(&self, session: Session) {
        self.current.store(Some(Arc::new(session)));
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.signed_in.send_replace(true);
    }

    /// Drop the current session (sign-out or failed renewal).
    ///
    /// Clearing an already-empty store is a no-op: the signed-in flag
    /// flips at most once per sign-out, however many callers race here.
    pub fn clear(&self) {
        if self.current.swap(None).is_some() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.signed_in.send_replace(false);
        }
    }

    /// Monotonic counter bumped by every effective `set`/`clear`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Observe sign-in/sign-out transitions. A forced sign-out (failed
    /// renewal) flips this to `false` exactly once; the embedding UI
    /// watches it to navigate back to the sign-in entry point.
    pub fn watch_signed_in(&self) -> watch::Receiver<bool> {
        self.signed_in.subscribe()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenProvider for SessionStore {
    fn access_token(&self) -> Option<SecretString> {
        self.get().map(|s| s.access_token.clone())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("signed_in", &self.get().is_some())
            .field("generation", &self.generation())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
