mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::serve;
use pulsync_client::{ApiClient, ApiConfig, ApiError, Channel, StaticCredentials, User};
use serde_json::{json, Value};

type Params = Query<HashMap<String, String>>;

fn client(base_url: String) -> ApiClient {
    client_with(ApiConfig {
        base_url,
        ..ApiConfig::default()
    })
}

fn client_with(config: ApiConfig) -> ApiClient {
    ApiClient::new(
        config,
        Arc::new(StaticCredentials::new().with_access_token("xoxb-test")),
    )
    .unwrap()
}

fn user_json(id: &str) -> Value {
    json!({"id": id, "name": id.to_lowercase(), "profile": {"display_name": format!("User {}", id)}})
}

#[tokio::test]
async fn test_list_all_follows_cursors_in_order() {
    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::default();

    let router = Router::new()
        .route(
            "/conversations.list",
            get(
                |State(seen): State<Arc<Mutex<Vec<Option<String>>>>>, Query(q): Params| async move {
                    assert_eq!(q.get("exclude_archived").map(String::as_str), Some("true"));
                    let cursor = q.get("cursor").cloned();
                    seen.lock().unwrap().push(cursor.clone());
                    let (ids, next) = match cursor.as_deref() {
                        None => (vec!["C1", "C2"], "p2"),
                        Some("p2") => (vec!["C3"], "p3"),
                        Some("p3") => (vec!["C4"], ""),
                        Some(other) => panic!("unexpected cursor {}", other),
                    };
                    let channels: Vec<Value> = ids
                        .iter()
                        .map(|id| json!({"id": id, "name": id.to_lowercase()}))
                        .collect();
                    Json(json!({
                        "ok": true,
                        "channels": channels,
                        "response_metadata": {"next_cursor": next}
                    }))
                },
            ),
        )
        .with_state(Arc::clone(&seen));

    let api = client(serve(router).await);
    let channels = api.list_all::<Channel>().await.unwrap();

    let ids: Vec<&str> = channels.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["C1", "C2", "C3", "C4"]);
    assert_eq!(
        *seen.lock().unwrap(),
        [None, Some("p2".to_string()), Some("p3".to_string())]
    );
    assert_eq!(api.caches().channels.len(), 4);
    assert_eq!(api.channel("C3").await.unwrap().display_name(), "#c3");
}

#[tokio::test]
async fn test_rate_limit_preserves_retry_after() {
    let router = Router::new()
        .route(
            "/conversations.info",
            get(|| async { (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "30")], "") }),
        )
        .route(
            "/users.info",
            get(|| async { StatusCode::TOO_MANY_REQUESTS }),
        );

    let api = client(serve(router).await);

    let err = api.channel("C1").await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));

    let err = api.user("U1").await.unwrap_err();
    assert!(matches!(err, ApiError::RateLimited { retry_after: None }));
}

#[tokio::test]
async fn test_error_taxonomy() {
    let router = Router::new().route(
        "/conversations.info",
        get(|Query(q): Params| async move {
            match q.get("channel").map(String::as_str) {
                Some("C401") => StatusCode::UNAUTHORIZED.into_response(),
                Some("C404") => StatusCode::NOT_FOUND.into_response(),
                Some("C500") => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
                Some("Cbad") => "{not json".into_response(),
                _ => Json(json!({"ok": false, "error": "channel_not_found"})).into_response(),
            }
        }),
    );

    let api = client(serve(router).await);

    assert!(matches!(api.channel("C401").await, Err(ApiError::Unauthorized)));
    assert!(matches!(api.channel("C404").await, Err(ApiError::NotFound)));
    assert!(matches!(
        api.channel("C500").await,
        Err(ApiError::Http { status: 500, body: Some(ref b) }) if b == "boom"
    ));
    assert!(matches!(api.channel("Cbad").await, Err(ApiError::Decoding(_))));
    assert!(matches!(
        api.channel("Cxyz").await,
        Err(ApiError::ApiRejected(ref m)) if m == "channel_not_found"
    ));
    assert!(api.caches().channels.is_empty());
}

#[tokio::test]
async fn test_get_by_id_is_cache_first() {
    let calls = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/users.info",
            get(
                |State(calls): State<Arc<AtomicUsize>>, headers: HeaderMap, Query(q): Params| async move {
                    assert_eq!(
                        headers.get("authorization").and_then(|v| v.to_str().ok()),
                        Some("Bearer xoxb-test")
                    );
                    calls.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"ok": true, "user": user_json(&q["user"])}))
                },
            ),
        )
        .with_state(Arc::clone(&calls));

    let api = client(serve(router).await);

    let first = api.user("U1").await.unwrap();
    let second = api.user("U1").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(api.display_name("U1").await, "User U1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    api.clear_caches();
    api.user("U1").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[derive(Default)]
struct Gauge {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[tokio::test]
async fn test_prefetch_is_bounded_and_skips_cached() {
    let gauge = Arc::new(Gauge::default());
    let router = Router::new()
        .route(
            "/users.info",
            get(|State(g): State<Arc<Gauge>>, Query(q): Params| async move {
                g.calls.fetch_add(1, Ordering::SeqCst);
                let now = g.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                g.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                g.in_flight.fetch_sub(1, Ordering::SeqCst);

                let id = &q["user"];
                if id == "U9" {
                    return StatusCode::NOT_FOUND.into_response();
                }
                Json(json!({"ok": true, "user": user_json(id)})).into_response()
            }),
        )
        .with_state(Arc::clone(&gauge));

    let api = client_with(ApiConfig {
        base_url: serve(router).await,
        prefetch_concurrency: 3,
        ..ApiConfig::default()
    });
    let cached: User = serde_json::from_value(user_json("U0")).unwrap();
    api.caches().users.insert("U0", cached);

    // U0 is cached, U1 and U2 repeat.
    let mut ids: Vec<String> = (0..10).map(|i| format!("U{}", i)).collect();
    ids.extend(["U1".to_string(), "U2".to_string()]);
    api.prefetch::<User, _, _>(&ids).await;

    assert_eq!(gauge.calls.load(Ordering::SeqCst), 9);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(api.caches().users.len(), 9);
    assert!(!api.caches().users.contains("U9"));
}

#[tokio::test]
async fn test_history_with_users_resolves_authors() {
    let router = Router::new()
        .route(
            "/conversations.history",
            get(|Query(q): Params| async move {
                assert_eq!(q.get("channel").map(String::as_str), Some("C1"));
                assert_eq!(q.get("limit").map(String::as_str), Some("2"));
                Json(json!({
                    "ok": true,
                    "has_more": true,
                    "messages": [
                        {"ts": "2.0", "user": "U1", "text": "second"},
                        {"ts": "1.0", "user": "U2", "text": "first"}
                    ],
                    "response_metadata": {"next_cursor": "h2"}
                }))
            }),
        )
        .route(
            "/users.info",
            get(|Query(q): Params| async move {
                match q["user"].as_str() {
                    "U1" => Json(json!({"ok": true, "user": user_json("U1")})).into_response(),
                    _ => Json(json!({"ok": false, "error": "user_not_found"})).into_response(),
                }
            }),
        );

    let api = client(serve(router).await);
    let rows = api.history_with_users("C1", 2).await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0.text, "second");
    assert_eq!(rows[0].1.as_ref().map(|u| u.id.as_str()), Some("U1"));
    assert!(rows[1].1.is_none());
    assert_eq!(api.display_name("U2").await, "U2");
}

async fn reaction(Json(body): Json<Value>) -> Response {
    match body["name"].as_str() {
        Some("thumbsup") => Json(json!({"ok": false, "error": "already_reacted"})).into_response(),
        Some("gone") => Json(json!({"ok": false, "error": "no_reaction"})).into_response(),
        _ => Json(json!({"ok": false, "error": "invalid_name"})).into_response(),
    }
}

#[tokio::test]
async fn test_idempotent_reactions() {
    let router = Router::new()
        .route("/reactions.add", post(reaction))
        .route("/reactions.remove", post(reaction));

    let api = client(serve(router).await);

    api.add_reaction("C1", "1.0", "thumbsup").await.unwrap();
    api.remove_reaction("C1", "1.0", "gone").await.unwrap();
    assert!(matches!(
        api.add_reaction("C1", "1.0", "not-an-emoji").await,
        Err(ApiError::ApiRejected(ref m)) if m == "invalid_name"
    ));
}

#[tokio::test]
async fn test_post_message_in_thread() {
    let router = Router::new().route(
        "/chat.postMessage",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["channel"], "C1");
            assert_eq!(body["thread_ts"], "1.0");
            Json(json!({
                "ok": true,
                "channel": "C1",
                "message": {"ts": "2.0", "user": "U1", "text": body["text"], "thread_ts": "1.0"}
            }))
        }),
    );

    let api = client(serve(router).await);
    let message = api.post_message("C1", "reply", Some("1.0")).await.unwrap();

    assert_eq!(message.text, "reply");
    assert!(message.is_thread_reply());
}

#[tokio::test]
async fn test_missing_access_token() {
    let api = ApiClient::new(ApiConfig::default(), Arc::new(StaticCredentials::new())).unwrap();
    assert!(matches!(api.user("U1").await, Err(ApiError::NotAuthenticated)));
}
