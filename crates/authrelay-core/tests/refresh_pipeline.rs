//! Integration tests for the request pipeline and single-flight refresh.

use std::time::Duration;

use authrelay_core::api::SESSION_EXPIRED_MESSAGE;
use authrelay_core::{
    ApiClient, ApiError, ClientConfig, CredentialStore, LogoutReason, MultipartBody,
    SessionEvent, StorageMode,
};
use futures::future::join_all;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const REFRESH_DELAY: Duration = Duration::from_millis(300);

fn client_for(server: &MockServer, token: Option<&str>) -> ApiClient {
    let config = ClientConfig::new(server.uri())
        .with_api_key("test-key")
        .with_storage(StorageMode::Memory);
    let store = CredentialStore::in_memory();
    if let Some(token) = token {
        store.set_token(token).expect("seed token");
    }
    ApiClient::new(config, store).expect("client")
}

fn unauthorized() -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({"message": "jwt expired"}))
}

fn refresh_ok(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(json!({"status": "OK", "accessToken": token}))
        .set_delay(REFRESH_DELAY)
}

fn drain_forced_logouts(rx: &mut broadcast::Receiver<SessionEvent>) -> usize {
    let mut count = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, SessionEvent::ForcedLogout { .. }) {
            count += 1;
        }
    }
    count
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Three concurrent protected GETs hit 401; one refresh, three retries with the new token.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/items/\d+$"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(unauthorized())
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/items/\d+$"))
        .and(header("authorization", "Bearer tok2"))
        .and(header("apikey", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(refresh_ok("tok2"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let mut events = client.events().subscribe();

    let handles: Vec<_> = (1..=3)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.get::<Value>(&format!("/items/{}", i), &[]).await })
        })
        .collect();

    for result in join_all(handles).await {
        let body = result.expect("task").expect("request should succeed after refresh");
        assert_eq!(body, json!({"ok": true}));
    }

    assert_eq!(client.store().token().as_deref(), Some("tok2"));
    let stats = client.refresh_stats();
    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.refreshed, 1);
    assert!(!client.coordinator().is_refreshing());
    assert_eq!(events.try_recv().ok(), Some(SessionEvent::TokenRefreshed));
    assert_eq!(drain_forced_logouts(&mut events), 0);
}

/// Every caller of a cycle resolves, none are left pending.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_waiter_resolves() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok("tok2"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let calls = (0..8).map(|i| {
        let client = client.clone();
        async move { client.get::<Value>(&format!("/orders/{}", i), &[]).await }
    });

    let results = tokio::time::timeout(Duration::from_secs(5), join_all(calls))
        .await
        .expect("no caller may be left waiting");

    assert_eq!(results.len(), 8);
    assert!(results.iter().all(Result::is_ok));
    let stats = client.refresh_stats();
    assert_eq!(stats.cycles, 1);
    assert!(stats.waiters <= 7);
}

/// A failed refresh fails every caller uniformly and forces logout once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_refresh_expires_all_callers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/invoices/\d+$"))
        .respond_with(unauthorized())
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "FAIL"}))
                .set_delay(REFRESH_DELAY),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    client
        .store()
        .set_profile(json!({"name": "Ana"}))
        .expect("seed profile");
    let mut events = client.events().subscribe();

    let handles: Vec<_> = (1..=2)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .get::<Value>(&format!("/invoices/{}", i), &[])
                    .await
            })
        })
        .collect();

    for result in join_all(handles).await {
        let err = result.expect("task").expect_err("refresh failed");
        assert!(err.is_session_expired());
        assert_eq!(err.to_string(), SESSION_EXPIRED_MESSAGE);
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    }

    assert!(client.store().token().is_none());
    assert!(client.store().profile().is_none());
    assert_eq!(drain_forced_logouts(&mut events), 1);
    let stats = client.refresh_stats();
    assert_eq!((stats.cycles, stats.failed), (1, 1));
    assert!(!client.coordinator().is_refreshing());
}

#[tokio::test]
async fn test_refresh_endpoint_error_forces_logout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stock"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "revoked"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let mut events = client.events().subscribe();

    let err = client
        .get::<Value>("/stock", &[])
        .await
        .expect_err("session cannot be repaired");
    assert!(err.is_session_expired());
    assert_eq!(
        events.try_recv().ok(),
        Some(SessionEvent::ForcedLogout {
            reason: LogoutReason::RefreshFailed
        })
    );
}

/// A 401 from the login endpoint surfaces directly.
#[tokio::test]
async fn test_login_401_never_refreshes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid credentials"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok("tok2"))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let err = client
        .post::<Value, _>("/auth/login", &json!({"email": "a@b.c", "password": "wrong"}))
        .await
        .expect_err("bad credentials");

    assert!(err.is_unauthorized());
    assert_eq!(err.to_string(), "Invalid credentials");
    assert_eq!(
        err.body().and_then(|b| b.get("message")),
        Some(&json!("Invalid credentials"))
    );
    assert_eq!(client.refresh_stats().cycles, 0);
    assert_eq!(client.store().token().as_deref(), Some("tok1"));
}

/// An auth endpoint 401 does not join a refresh that is already running.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_auth_endpoint_bypasses_in_flight_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/customers"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/customers"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "OK", "accessToken": "tok2"}))
                .set_delay(Duration::from_secs(1)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "not allowed"})))
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let background = {
        let client = client.clone();
        tokio::spawn(async move { client.get::<Value>("/customers", &[]).await })
    };

    let coordinator = client.coordinator().clone();
    wait_until(|| coordinator.is_refreshing()).await;

    let err = client
        .post::<Value, _>("/auth/register", &json!({"email": "x@y.z"}))
        .await
        .expect_err("register rejected");
    assert!(err.is_unauthorized());
    assert!(client.coordinator().is_refreshing());

    background.await.expect("task").expect("customers after refresh");
    assert_eq!(client.refresh_stats().cycles, 1);
    assert_eq!(client.refresh_stats().waiters, 0);
}

/// After a cycle settles, a later 401 starts a new one.
#[tokio::test]
async fn test_later_401_starts_new_cycle() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quotes"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/quotes"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"n": 1})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/quotes"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/quotes"))
        .and(header("authorization", "Bearer tok3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"n": 2})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(refresh_ok("tok2"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(refresh_ok("tok3"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));

    let first: Value = client.get("/quotes", &[]).await.expect("first");
    assert_eq!(first, json!({"n": 1}));
    assert!(!client.coordinator().is_refreshing());

    let second: Value = client.get("/quotes", &[]).await.expect("second");
    assert_eq!(second, json!({"n": 2}));
    assert!(!client.coordinator().is_refreshing());

    assert_eq!(client.refresh_stats().cycles, 2);
    assert_eq!(client.store().token().as_deref(), Some("tok3"));
}

/// A retry that is still unauthorized surfaces instead of looping.
#[tokio::test]
async fn test_retry_401_surfaces_without_second_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/products/7"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "insufficient role"})),
        )
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok("tok2"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let err = client
        .delete::<Value>("/products/7")
        .await
        .expect_err("still unauthorized");
    assert!(err.is_unauthorized());
    assert_eq!(err.to_string(), "insufficient role");
    assert_eq!(client.refresh_stats().cycles, 1);
}

#[tokio::test]
async fn test_non_401_errors_do_not_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/inventory/3"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "Stock cannot be negative"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok("tok2"))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let err = client
        .put::<Value, _>("/inventory/3", &json!({"quantity": -1}))
        .await
        .expect_err("validation error");

    assert_eq!(err.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));
    assert_eq!(err.to_string(), "Stock cannot be negative");
    assert_eq!(client.refresh_stats().cycles, 0);
}

#[tokio::test]
async fn test_transport_errors_propagate() {
    let config = ClientConfig::new("http://127.0.0.1:9").with_api_key("k");
    let client = ApiClient::new(config, CredentialStore::in_memory()).expect("client");

    let err = client
        .get::<Value>("/anything", &[])
        .await
        .expect_err("nothing listens on port 9");
    assert!(matches!(err, ApiError::Network(_)));
    assert_eq!(client.refresh_stats().cycles, 0);
}

/// Multipart uploads carry the transport's boundary, never a JSON content type,
/// including when re-sent after a refresh.
#[tokio::test]
async fn test_multipart_upload_has_no_explicit_content_type() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/attachments"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(unauthorized())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/attachments"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 11})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok("tok2"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let form = MultipartBody::new()
        .text("invoice_id", "42")
        .file("file", "receipt.txt", b"paid in full".to_vec(), Some("text/plain"));

    let created: Value = client
        .upload("/attachments", form, HeaderMap::new())
        .await
        .expect("upload after refresh");
    assert_eq!(created, json!({"id": 11}));

    let requests = server.received_requests().await.expect("recording enabled");
    let uploads: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path() == "/attachments")
        .collect();
    assert_eq!(uploads.len(), 2);
    for upload in uploads {
        let content_type = upload
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .expect("transport sets a content type");
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let body = String::from_utf8_lossy(&upload.body);
        assert!(body.contains("paid in full"));
    }
}

#[tokio::test]
async fn test_get_query_parameters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let _: Value = client
        .get(
            "/invoices",
            &[
                ("status", json!("paid")),
                ("limit", json!(20)),
                ("range", json!({"from": "2024-01-01"})),
                ("customer", Value::Null),
            ],
        )
        .await
        .expect("list invoices");

    let requests = server.received_requests().await.expect("recording enabled");
    let pairs: Vec<(String, String)> = requests[0]
        .url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("status".to_string(), "paid".to_string()),
            ("limit".to_string(), "20".to_string()),
            ("range".to_string(), r#"{"from":"2024-01-01"}"#.to_string()),
        ]
    );
    let content_type = requests[0]
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok());
    assert_eq!(content_type, Some("application/json"));
}

/// A leader that goes away mid-refresh hands the cycle to a waiter.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_refresh_is_taken_over() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(unauthorized())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("ok")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "OK", "accessToken": "tok2"}))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1..=2)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let coordinator = client.coordinator().clone();

    let leader = {
        let client = client.clone();
        tokio::spawn(async move { client.get::<Value>("/reports/a", &[]).await })
    };
    wait_until(|| coordinator.is_refreshing()).await;

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.get::<Value>("/reports/b", &[]).await })
    };
    wait_until(|| coordinator.stats().waiters == 1).await;

    leader.abort();
    assert!(leader.await.expect_err("aborted").is_cancelled());

    let body = waiter.await.expect("task").expect("waiter completes the cycle");
    assert_eq!(body, json!("ok"));
    assert_eq!(client.refresh_stats().cycles, 2);
    assert_eq!(client.refresh_stats().refreshed, 1);
    assert!(!client.coordinator().is_refreshing());
}

/// A 401 that arrives after another caller's refresh settled is retried
/// with the new token instead of starting a second cycle.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_401_after_refresh_retries_with_current_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reports/slow"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(unauthorized().set_delay(Duration::from_secs(1)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reports/slow"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"report": "slow"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reports/fast"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(unauthorized())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reports/fast"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"report": "fast"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "OK", "accessToken": "tok2"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));

    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.get::<Value>("/reports/slow", &[]).await })
    };
    // Let the slow request go out with tok1 before anything refreshes
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fast: Value = client.get("/reports/fast", &[]).await.expect("fast");
    assert_eq!(fast, json!({"report": "fast"}));
    assert_eq!(client.store().token().as_deref(), Some("tok2"));
    assert_eq!(client.refresh_stats().cycles, 1);

    let slow = slow.await.expect("task").expect("slow retried with current token");
    assert_eq!(slow, json!({"report": "slow"}));
    assert_eq!(client.refresh_stats().cycles, 1);
    assert_eq!(client.refresh_stats().waiters, 0);
}

/// A 401 that arrives after a failed cycle cleared the session fails without
/// a second cycle or a second forced logout.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_401_after_failed_refresh_does_not_log_out_twice() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reports/slow"))
        .respond_with(unauthorized().set_delay(Duration::from_secs(1)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reports/fast"))
        .respond_with(unauthorized())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("tok1"));
    let mut events = client.events().subscribe();

    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.get::<Value>("/reports/slow", &[]).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = client
        .get::<Value>("/reports/fast", &[])
        .await
        .expect_err("refresh failed");
    assert!(err.is_session_expired());
    assert!(client.store().token().is_none());

    let err = slow.await.expect("task").expect_err("session is gone");
    assert!(err.is_session_expired());
    assert_eq!(err.to_string(), SESSION_EXPIRED_MESSAGE);

    assert_eq!(client.refresh_stats().cycles, 1);
    assert_eq!(client.refresh_stats().failed, 1);
    assert_eq!(drain_forced_logouts(&mut events), 1);
}

/// Swaps the stored token for `tok2` as soon as a `tok1` request arrives,
/// as if another caller's refresh landed while the request was in flight.
struct RotateOnReceipt {
    store: CredentialStore,
}

impl Respond for RotateOnReceipt {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        match request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
        {
            Some("Bearer tok1") => {
                self.store.set_token("tok2").expect("rotate token");
                unauthorized()
            }
            Some("Bearer tok2") => ResponseTemplate::new(200).set_body_json(json!({"ok": true})),
            _ => ResponseTemplate::new(400),
        }
    }
}

/// The 401 handler compares against the token the request really carried.
#[tokio::test]
async fn test_401_compared_against_token_actually_sent() {
    let server = MockServer::start().await;
    let client = client_for(&server, Some("tok1"));

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(RotateOnReceipt {
            store: client.store().clone(),
        })
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let body: Value = client.get("/items", &[]).await.expect("retried with tok2");
    assert_eq!(body, json!({"ok": true}));
    assert_eq!(client.refresh_stats().cycles, 0);
}

#[test]
fn test_construction_requires_credentials() {
    let config = ClientConfig::new("https://api.example.com");
    let err = ApiClient::new(config, CredentialStore::in_memory()).expect_err("no credentials");
    assert!(matches!(err, ApiError::Config(_)));
}
