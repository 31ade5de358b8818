// ── Event router ──
//
// Fixed table mapping inbound (topic, event) pairs to cache
// invalidations and user-facing alerts. Dispatch is synchronous and
// side-effect-only: redelivering the same logical event (after a
// reconnect, say) just re-triggers the same idempotent invalidations.
// Events with no table entry, and payloads that fail to parse, are
// logged at debug and dropped -- they never error and never take the
// connection down.

use serde::de::DeserializeOwned;
use storelink_api::channel::{ChannelEvent, Topic};
use tracing::debug;

use crate::event::{NewOrder, NotificationReceived, OrderStatusChanged, PriceUpdated, StockAlert};
use crate::ports::{AlertSink, CacheInvalidator, CacheKey, Severity};

/// Route one inbound event to its invalidations and alert.
pub fn route(event: &ChannelEvent, cache: &dyn CacheInvalidator, alerts: &dyn AlertSink) {
    match (event.topic, event.name.as_str()) {
        (Topic::Notifications, "ReceiveNotification") => {
            let Some(notification) = parse::<NotificationReceived>(event) else {
                return;
            };
            invalidate(cache, &[CacheKey::Notifications, CacheKey::UnreadCount]);
            alerts.notify(
                Severity::Info,
                &format!("{}: {}", notification.title, notification.message),
            );
        }

        (Topic::Notifications, "NewOrder") => {
            let Some(order) = parse::<NewOrder>(event) else {
                return;
            };
            invalidate(
                cache,
                &[
                    CacheKey::Notifications,
                    CacheKey::UnreadCount,
                    CacheKey::AdminOrders,
                    CacheKey::AdminDashboard,
                ],
            );
            alerts.notify(
                Severity::Success,
                &format!("New order {} received", order.order_number),
            );
        }

        (Topic::Notifications, "OrderStatusChanged") => {
            let Some(change) = parse::<OrderStatusChanged>(event) else {
                return;
            };
            invalidate(
                cache,
                &[
                    CacheKey::AdminOrders,
                    CacheKey::RepOrders,
                    CacheKey::CustomerOrders,
                ],
            );
            alerts.notify(
                Severity::Info,
                &format!("Order {} is now {}", change.order_id, change.status),
            );
        }

        (Topic::Notifications, "PriceUpdated") => {
            let Some(price) = parse::<PriceUpdated>(event) else {
                return;
            };
            invalidate(cache, &[CacheKey::AdminProducts, CacheKey::RepCatalog]);
            alerts.notify(
                Severity::Info,
                &format!("{} price updated to {:.2}", price.name, price.selling_price),
            );
        }

        // The tracking view renders status changes itself: invalidate
        // only, no alert.
        (Topic::OrderTracking, "OrderStatusChanged") => {
            let Some(_change) = parse::<OrderStatusChanged>(event) else {
                return;
            };
            invalidate(
                cache,
                &[
                    CacheKey::AdminOrders,
                    CacheKey::RepOrders,
                    CacheKey::CustomerOrders,
                ],
            );
        }

        (Topic::StockAlerts, "StockAlert") => {
            let Some(alert) = parse::<StockAlert>(event) else {
                return;
            };
            invalidate(cache, &[CacheKey::AdminProducts, CacheKey::AdminDashboard]);
            alerts.notify(
                Severity::Error,
                &format!(
                    "Low stock: {} ({} left)",
                    alert.product_name, alert.stock_quantity
                ),
            );
        }

        _ => {
            debug!(topic = %event.topic, name = %event.name, "unrouted channel event");
        }
    }
}

fn invalidate(cache: &dyn CacheInvalidator, keys: &[CacheKey]) {
    for key in keys {
        cache.invalidate(*key);
    }
}

fn parse<T: DeserializeOwned>(event: &ChannelEvent) -> Option<T> {
    match serde_json::from_value(event.payload.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(
                topic = %event.topic,
                name = %event.name,
                error = %e,
                "malformed event payload, not routed"
            );
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
