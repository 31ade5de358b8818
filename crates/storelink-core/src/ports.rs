// ── Output ports ──
//
// The core never owns a cache or a toast stack; it only signals them.
// The embedding application supplies these two interfaces and decides
// what "invalidate" and "notify" concretely mean (refetch a query,
// show a toast, ...). Both are fire-and-forget.

use strum::{AsRefStr, Display};

/// A unit of externally-cached data that an inbound event staled.
///
/// Invalidation is idempotent on the consumer side, so redelivering an
/// event (after a reconnect, say) is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum CacheKey {
    Notifications,
    UnreadCount,
    AdminOrders,
    AdminDashboard,
    RepOrders,
    CustomerOrders,
    AdminProducts,
    RepCatalog,
}

/// Severity of a user-facing alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// Consumes cache invalidation signals.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, key: CacheKey);
}

/// Consumes user-facing alerts.
pub trait AlertSink: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
}

// ── Tests ────────────────────────────────────────────────────────────
