// Integration tests for the HTTP gateway's renewal protocol, using wiremock.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use storelink_api::{Error, Gateway, Role, Session, SessionStore, TransportConfig, UserIdentity};

// ── Helpers ─────────────────────────────────────────────────────────

fn session(access: &str, refresh: &str, role: Role) -> Session {
    Session {
        access_token: SecretString::from(access.to_string()),
        refresh_token: SecretString::from(refresh.to_string()),
        expires_at: None,
        user: UserIdentity {
            id: "u1".into(),
            role,
        },
    }
}

async fn setup() -> (MockServer, Gateway, Arc<SessionStore>) {
    let server = MockServer::start().await;
    let sessions = Arc::new(SessionStore::new());
    let gateway = Gateway::new(
        server.uri().parse().expect("mock server uri"),
        Arc::clone(&sessions),
        &TransportConfig::default(),
    )
    .expect("gateway should build");
    (server, gateway, sessions)
}

fn renewal_body(access: &str, refresh: &str) -> Value {
    json!({
        "accessToken": access,
        "refreshToken": refresh,
        "user": { "id": "u1", "role": "Admin" }
    })
}

// ── Bearer attachment ───────────────────────────────────────────────

#[tokio::test]
async fn attaches_current_access_token() {
    let (server, gateway, sessions) = setup().await;
    sessions.set(session("tok-1", "ref-1", Role::Admin));

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "1" }])))
        .expect(1)
        .mount(&server)
        .await;

    let orders: Value = gateway.get("/api/orders").await.expect("request should succeed");
    assert_eq!(orders[0]["id"], "1");
}

#[tokio::test]
async fn dispatches_unauthenticated_without_session() {
    let (server, gateway, _sessions) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let _: Value = gateway.get("/api/catalog").await.expect("request should succeed");

    let requests = server.received_requests().await.expect("requests recorded");
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn a_401_without_session_is_not_renewed() {
    let (server, gateway, _sessions) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result: Result<Value, Error> = gateway.get("/api/orders").await;
    assert!(matches!(result, Err(Error::Authentication { .. })));

    // No session means nothing to renew.
    let requests = server.received_requests().await.expect("requests recorded");
    assert!(requests.iter().all(|r| r.url.path() != "/auth/refresh-token"));
}

// ── Renewal protocol ────────────────────────────────────────────────

#[tokio::test]
async fn renews_once_and_replays_with_fresh_token() {
    let (server, gateway, sessions) = setup().await;
    sessions.set(session("stale", "ref-1", Role::Admin));

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .and(body_partial_json(json!({ "refreshToken": "ref-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(renewal_body("fresh", "ref-2")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "7" }])))
        .expect(1)
        .mount(&server)
        .await;

    let orders: Value = gateway.get("/api/orders").await.expect("replay should succeed");
    assert_eq!(orders[0]["id"], "7");

    let current = sessions.get().expect("session should survive renewal");
    assert_eq!(current.access_token.expose_secret(), "fresh");
    assert_eq!(current.refresh_token.expose_secret(), "ref-2");
}

#[tokio::test]
async fn concurrent_401s_share_one_renewal() {
    let (server, gateway, sessions) = setup().await;
    sessions.set(session("stale", "ref-1", Role::Admin));

    // Both callers hit the stale token first.
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    // The renewal endpoint must be called exactly once. The delay keeps
    // the renewal in flight long enough for the second 401 to queue up.
    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(renewal_body("fresh", "ref-2"))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let (a, b) = tokio::join!(
        gateway.get::<Value>("/api/orders"),
        gateway.get::<Value>("/api/orders"),
    );
    a.expect("first caller should succeed");
    b.expect("second caller should succeed");
}

#[tokio::test]
async fn a_replayed_request_is_never_retried_again() {
    let (server, gateway, sessions) = setup().await;
    sessions.set(session("stale", "ref-1", Role::Admin));

    // 401 regardless of token: the replay fails too.
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(renewal_body("fresh", "ref-2")))
        .expect(1)
        .mount(&server)
        .await;

    let result: Result<Value, Error> = gateway.get("/api/orders").await;
    assert!(matches!(result, Err(Error::Authentication { .. })));
}

#[tokio::test]
async fn failed_renewal_ends_the_session_once() {
    let (server, gateway, sessions) = setup().await;
    sessions.set(session("stale", "ref-1", Role::Admin));
    let generation_before = sessions.generation();
    let signed_in = sessions.watch_signed_in();

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let (a, b) = tokio::join!(
        gateway.get::<Value>("/api/orders"),
        gateway.get::<Value>("/api/orders"),
    );
    assert!(matches!(a, Err(Error::SessionExpired)));
    assert!(matches!(b, Err(Error::SessionExpired)));

    // One clear, even with two concurrent triggers.
    assert!(sessions.get().is_none());
    assert!(!*signed_in.borrow());
    assert_eq!(sessions.generation(), generation_before + 1);
}

// ── Error surfacing ─────────────────────────────────────────────────

#[tokio::test]
async fn non_auth_errors_pass_through() {
    let (server, gateway, sessions) = setup().await;
    sessions.set(session("tok-1", "ref-1", Role::Customer));

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "boom" })))
        .expect(1)
        .mount(&server)
        .await;

    let result: Result<Value, Error> = gateway.get("/api/orders").await;
    match result {
        Err(Error::Api { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("expected Api error, got: {other:?}"),
    }
}

#[tokio::test]
async fn post_sends_json_body() {
    let (server, gateway, sessions) = setup().await;
    sessions.set(session("tok-1", "ref-1", Role::SalesRep));

    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .and(body_partial_json(json!({ "productId": "p1", "quantity": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "o1" })))
        .expect(1)
        .mount(&server)
        .await;

    let created: Value = gateway
        .post("/api/orders", &json!({ "productId": "p1", "quantity": 3 }))
        .await
        .expect("post should succeed");
    assert_eq!(created["id"], "o1");
}

#[tokio::test]
async fn unexpected_body_is_a_deserialization_error() {
    #[derive(Debug, serde::Deserialize)]
    struct Order {
        #[allow(dead_code)]
        id: String,
    }

    let (server, gateway, _sessions) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/orders/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 5 })))
        .mount(&server)
        .await;

    let result: Result<Order, Error> = gateway.get("/api/orders/1").await;
    assert!(matches!(result, Err(Error::Deserialization { .. })));
}
