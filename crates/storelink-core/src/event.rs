// ── Typed inbound event payloads ──
//
// Wire shapes for the events each topic carries (camelCase JSON, per
// the backend contract). The router parses these out of the raw
// `ChannelEvent` payload before acting on them.

use serde::Deserialize;

/// `ReceiveNotification` on the notifications topic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationReceived {
    pub title: String,
    pub message: String,
}

/// `NewOrder` on the notifications topic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub id: String,
    pub order_number: String,
}

/// `OrderStatusChanged` on the notifications and order-tracking topics.
/// The tracking variant may carry a reason for the transition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChanged {
    pub order_id: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `PriceUpdated` on the notifications topic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdated {
    pub name: String,
    pub selling_price: f64,
}

/// `StockAlert` on the stock-alerts topic (admin only).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAlert {
    pub product_name: String,
    pub stock_quantity: i64,
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_reason_is_optional() {
        let without: OrderStatusChanged =
            serde_json::from_str(r#"{"orderId":"o1","status":"Shipped"}"#)
                .expect("payload should parse");
        assert_eq!(without.order_id, "o1");
        assert!(without.reason.is_none());

        let with: OrderStatusChanged = serde_json::from_str(
            r#"{"orderId":"o2","status":"Cancelled","reason":"out of stock"}"#,
        )
        .expect("payload should parse");
        assert_eq!(with.reason.as_deref(), Some("out of stock"));
    }

    #[test]
    fn payloads_use_camel_case() {
        let order: NewOrder = serde_json::from_str(r#"{"id":"1","orderNumber":"A100"}"#)
            .expect("payload should parse");
        assert_eq!(order.order_number, "A100");

        let price: PriceUpdated = serde_json::from_str(r#"{"name":"Widget","sellingPrice":9.5}"#)
            .expect("payload should parse");
        assert!((price.selling_price - 9.5).abs() < f64::EPSILON);

        let stock: StockAlert =
            serde_json::from_str(r#"{"productName":"Widget","stockQuantity":2}"#)
                .expect("payload should parse");
        assert_eq!(stock.stock_quantity, 2);
    }
}
