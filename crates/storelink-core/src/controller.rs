// ── Live controller ──
//
// Owns the per-topic channel lifecycle for the current session: which
// channels may open (session present, role permitting), the routing
// task that feeds each channel's events into the router, and teardown
// when the session ends or the embedding scope goes away. Open/close is
// safe under rapid remount: replacing a topic's handle cancels the old
// connection, and a cancelled connection always finishes its stop.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use storelink_api::channel::{ChannelEvent, ChannelHandle, ChannelState, Topic};
use storelink_api::session::{Role, SessionStore, TokenProvider};

use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::ports::{AlertSink, CacheInvalidator};
use crate::router;

/// The entry point for consumers.
///
/// Cheaply cloneable via `Arc`. Construct once per backend, `start()`
/// after sign-in, `shutdown()` when the hosting scope unmounts.
#[derive(Clone)]
pub struct LiveController {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    sessions: Arc<SessionStore>,
    cache: Arc<dyn CacheInvalidator>,
    alerts: Arc<dyn AlertSink>,
    channels: DashMap<Topic, ChannelHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl LiveController {
    pub fn new(
        config: ClientConfig,
        sessions: Arc<SessionStore>,
        cache: Arc<dyn CacheInvalidator>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sessions,
                cache,
                alerts,
                channels: DashMap::new(),
                tasks: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The session store this controller is gated on.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.inner.sessions
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open every channel the current session is entitled to and start
    /// watching for sign-out. Fails only when no session exists; a
    /// channel that cannot connect retries silently in the background.
    pub fn start(&self) -> Result<(), CoreError> {
        let Some(session) = self.inner.sessions.get() else {
            return Err(CoreError::SignedOut);
        };

        for topic in Topic::ALL {
            if topic.admin_only() && session.user.role != Role::Admin {
                debug!(topic = %topic, role = ?session.user.role, "skipping admin-only topic");
                continue;
            }
            self.open_topic(topic)?;
        }

        self.spawn_session_watcher();
        info!("live controller started");
        Ok(())
    }

    /// Open one topic's channel.
    ///
    /// Idempotent under remount: if the topic already has a channel,
    /// the old handle is replaced -- dropping it sets its cancelled
    /// marker, and the old connection finishes its own stop whenever
    /// its in-flight attempt settles.
    pub fn open_topic(&self, topic: Topic) -> Result<(), CoreError> {
        let Some(session) = self.inner.sessions.get() else {
            return Err(CoreError::SignedOut);
        };
        if topic.admin_only() && session.user.role != Role::Admin {
            return Err(CoreError::RoleDenied {
                topic: topic.to_string(),
            });
        }

        let endpoint = self.inner.config.channel_endpoint(topic)?;
        let tokens: Arc<dyn TokenProvider> = Arc::clone(&self.inner.sessions) as _;
        let handle = ChannelHandle::open(topic, endpoint, tokens, CancellationToken::new());

        self.spawn_routing_task(&handle);

        if self.inner.channels.insert(topic, handle).is_some() {
            debug!(topic = %topic, "replaced existing channel");
        }
        Ok(())
    }

    /// Close one topic's channel, if open.
    pub fn close_topic(&self, topic: Topic) {
        if let Some((_, handle)) = self.inner.channels.remove(&topic) {
            handle.close();
            debug!(topic = %topic, "channel closed");
        }
    }

    /// Close everything and join background tasks.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.close_all();

        let drained: Vec<JoinHandle<()>> = {
            let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for task in drained {
            let _ = task.await;
        }
        debug!("live controller shut down");
    }

    fn close_all(&self) {
        let open: Vec<Topic> = self.inner.channels.iter().map(|e| *e.key()).collect();
        for topic in open {
            self.close_topic(topic);
        }
    }

    // ── Group membership (order tracking) ────────────────────────────

    /// Scope order-tracking events to one order. Best effort: a silent
    /// no-op while the tracking channel is not connected.
    pub fn join_order_group(&self, order_id: &str) {
        self.invoke_tracking("JoinOrderGroup", order_id);
    }

    /// Undo [`join_order_group`](Self::join_order_group). Same
    /// best-effort contract.
    pub fn leave_order_group(&self, order_id: &str) {
        self.invoke_tracking("LeaveOrderGroup", order_id);
    }

    fn invoke_tracking(&self, target: &str, order_id: &str) {
        if let Some(handle) = self.inner.channels.get(&Topic::OrderTracking) {
            handle.invoke(target, vec![serde_json::Value::String(order_id.to_owned())]);
        } else {
            debug!(target, "order-tracking channel not open, dropping invocation");
        }
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn is_open(&self, topic: Topic) -> bool {
        self.inner.channels.contains_key(&topic)
    }

    /// Snapshot of one topic's connection state.
    pub fn channel_state(&self, topic: Topic) -> Option<ChannelState> {
        self.inner
            .channels
            .get(&topic)
            .map(|h| h.current_state())
    }

    /// Observe one topic's state transitions.
    pub fn watch_channel(&self, topic: Topic) -> Option<watch::Receiver<ChannelState>> {
        self.inner.channels.get(&topic).map(|h| h.state())
    }

    /// Raw event stream for one topic, bypassing the router.
    pub fn subscribe(&self, topic: Topic) -> Option<broadcast::Receiver<Arc<ChannelEvent>>> {
        self.inner.channels.get(&topic).map(|h| h.subscribe())
    }

    // ── Background tasks ─────────────────────────────────────────────

    /// Consume one channel's events and feed them through the router.
    /// Ends when the channel's loop exits and drops its sender.
    fn spawn_routing_task(&self, handle: &ChannelHandle) {
        let topic = handle.topic();
        let mut events = handle.subscribe();
        let cache = Arc::clone(&self.inner.cache);
        let alerts = Arc::clone(&self.inner.alerts);

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => router::route(&event, cache.as_ref(), alerts.as_ref()),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(topic = %topic, missed, "event consumer lagged, skipping");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.push_task(task);
    }

    /// Close all channels the moment the session is cleared (sign-out
    /// or failed renewal). Ends after the first sign-out: a new session
    /// means the embedding application calls `start()` again.
    fn spawn_session_watcher(&self) {
        let ctrl = self.clone();
        let cancel = self.inner.cancel.clone();
        let mut signed_in = self.inner.sessions.watch_signed_in();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = signed_in.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if !*signed_in.borrow_and_update() {
                            info!("session ended, closing all channels");
                            ctrl.close_all();
                            break;
                        }
                    }
                }
            }
        });
        self.push_task(task);
    }

    fn push_task(&self, task: JoinHandle<()>) {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
    }
}

impl std::fmt::Debug for LiveController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveController")
            .field("open_topics", &self.inner.channels.len())
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;
    use storelink_api::session::{Session, UserIdentity};
    use url::Url;

    use super::*;

    struct NoopPorts;

    impl CacheInvalidator for NoopPorts {
        fn invalidate(&self, _key: crate::ports::CacheKey) {}
    }

    impl AlertSink for NoopPorts {
        fn notify(&self, _severity: crate::ports::Severity, _message: &str) {}
    }

    fn session(role: Role) -> Session {
        Session {
            access_token: SecretString::from("access".to_string()),
            refresh_token: SecretString::from("refresh".to_string()),
            expires_at: None,
            user: UserIdentity {
                id: "u1".into(),
                role,
            },
        }
    }

    // Nothing listens on the discard port, so channels stay in their
    // retry loop. These tests only exercise open/close bookkeeping.
    fn controller() -> LiveController {
        let config = ClientConfig::new(
            Url::parse("http://127.0.0.1:9").expect("base url"),
            Url::parse("ws://127.0.0.1:9").expect("channel base"),
        );
        LiveController::new(
            config,
            Arc::new(SessionStore::new()),
            Arc::new(NoopPorts),
            Arc::new(NoopPorts),
        )
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition should hold before the timeout");
    }

    #[tokio::test]
    async fn start_without_session_is_signed_out() {
        let ctrl = controller();
        assert!(matches!(ctrl.start(), Err(CoreError::SignedOut)));
        assert!(!ctrl.is_open(Topic::Notifications));
    }

    #[tokio::test]
    async fn customer_start_skips_stock_alerts() {
        let ctrl = controller();
        ctrl.sessions().set(session(Role::Customer));

        ctrl.start().expect("start should succeed");

        assert!(ctrl.is_open(Topic::Notifications));
        assert!(ctrl.is_open(Topic::OrderTracking));
        assert!(!ctrl.is_open(Topic::StockAlerts));
        ctrl.shutdown().await;
    }

    #[tokio::test]
    async fn admin_start_opens_every_topic() {
        let ctrl = controller();
        ctrl.sessions().set(session(Role::Admin));

        ctrl.start().expect("start should succeed");

        for topic in Topic::ALL {
            assert!(ctrl.is_open(topic), "{topic} should be open");
        }
        ctrl.shutdown().await;
    }

    #[tokio::test]
    async fn stock_alerts_requires_admin() {
        let ctrl = controller();
        ctrl.sessions().set(session(Role::SalesRep));

        let result = ctrl.open_topic(Topic::StockAlerts);

        assert!(matches!(result, Err(CoreError::RoleDenied { .. })));
        assert!(!ctrl.is_open(Topic::StockAlerts));
        ctrl.shutdown().await;
    }

    #[tokio::test]
    async fn sign_out_closes_every_channel() {
        let ctrl = controller();
        ctrl.sessions().set(session(Role::Admin));
        ctrl.start().expect("start should succeed");
        assert!(ctrl.is_open(Topic::Notifications));

        ctrl.sessions().clear();

        let probe = ctrl.clone();
        wait_until(move || !probe.is_open(Topic::Notifications) && !probe.is_open(Topic::StockAlerts))
            .await;
        ctrl.shutdown().await;
    }

    #[tokio::test]
    async fn join_order_group_without_channel_is_a_noop() {
        let ctrl = controller();
        // No channels are open; the invocation is dropped silently.
        ctrl.join_order_group("order-1");
        ctrl.leave_order_group("order-1");
    }

    #[tokio::test]
    async fn reopening_a_topic_replaces_the_old_channel() {
        let ctrl = controller();
        ctrl.sessions().set(session(Role::Customer));

        ctrl.open_topic(Topic::Notifications).expect("first open");
        let mut old_state = ctrl.watch_channel(Topic::Notifications).expect("watcher");
        ctrl.open_topic(Topic::Notifications).expect("second open");

        assert!(ctrl.is_open(Topic::Notifications));
        // The replaced handle was dropped, which cancels its loop.
        tokio::time::timeout(Duration::from_secs(5), async {
            old_state
                .wait_for(|s| *s == ChannelState::Closed)
                .await
                .expect("state channel should stay open until Closed");
        })
        .await
        .expect("old channel should close");

        ctrl.close_topic(Topic::Notifications);
        assert!(!ctrl.is_open(Topic::Notifications));
        ctrl.shutdown().await;
    }
}
