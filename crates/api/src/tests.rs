use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use kanal_infra::config::AppConfig;

use crate::routes;
use crate::state::AppState;

fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".into(),
        port: 0,
        log_level: "debug".into(),
        redis_url: "redis://127.0.0.1:6379".into(),
        cache_backend: "memory".into(),
        jwt_secret: "test-secret".into(),
        auth_dev_bypass_enabled: false,
        cache_first_page_ttl_ms: 5_000,
        cache_history_page_ttl_ms: 60_000,
        cache_unread_ttl_ms: 60_000,
        reaction_lock_ttl_ms: 10_000,
        poll_message_limit: 50,
        poll_deleted_window_ms: 30_000,
        poll_thread_deleted_window_ms: 300_000,
        poll_circuit_fail_threshold: 5,
        poll_circuit_open_ms: 15_000,
        poll_emergency_stop: false,
        reaction_event_retention_ms: 3_600_000,
        deletion_record_retention_ms: 3_600_000,
        retention_sweep_interval_ms: 300_000,
    }
}

fn test_app() -> Router {
    routes::router(AppState::for_tests(test_config()))
}

fn test_token(role: &str, sub: &str) -> String {
    #[derive(serde::Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        role: &'a str,
        exp: usize,
    }
    let claims = Claims {
        sub,
        role,
        exp: 4_102_444_800, // 2100-01-01
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret("test-secret".as_bytes()),
    )
    .expect("token encodes")
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds"),
        None => builder.body(Body::empty()).expect("request builds"),
    };

    let response = app.clone().oneshot(request).await.expect("request runs");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_channel(app: &Router, token: &str, name: &str, members: Vec<&str>) -> i64 {
    let (status, body) = send(
        app,
        Method::POST,
        "/v1/channels",
        Some(token),
        Some(json!({ "name": name, "kind": "public", "members": members })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "channel create: {body}");
    body["id"].as_i64().expect("channel id")
}

async fn send_message(app: &Router, token: &str, channel_id: i64, text: &str) -> i64 {
    let (status, body) = send(
        app,
        Method::POST,
        &format!("/v1/channels/{channel_id}/messages"),
        Some(token),
        Some(json!({ "body": text })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "message send: {body}");
    body["id"].as_i64().expect("message id")
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/v1/channels", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = send(
        &app,
        Method::GET,
        "/v1/channels",
        Some("not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_public() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");
}

#[tokio::test]
async fn send_and_list_round_trip() {
    let app = test_app();
    let token = test_token("user", "alice");

    let channel_id = create_channel(&app, &token, "general", vec![]).await;
    send_message(&app, &token, channel_id, "hello").await;
    send_message(&app, &token, channel_id, "world").await;

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/v1/channels/{channel_id}/messages"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let groups = body["groups"].as_array().expect("groups");
    assert_eq!(groups.len(), 1);
    let messages = groups[0]["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["body"], "hello");
    assert_eq!(messages[1]["body"], "world");
    assert_eq!(body["pagination"]["page"], 1);
}

#[tokio::test]
async fn membership_gates_channel_access() {
    let app = test_app();
    let alice = test_token("user", "alice");
    let mallory = test_token("user", "mallory");

    let channel_id = create_channel(&app, &alice, "private-ish", vec![]).await;

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/v1/channels/{channel_id}/messages"),
        Some(&mallory),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    // Public channels can be joined, after which access works.
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/v1/channels/{channel_id}/join"),
        Some(&mallory),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/v1/channels/{channel_id}/messages"),
        Some(&mallory),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn invalid_channel_payload_is_rejected() {
    let app = test_app();
    let token = test_token("user", "alice");
    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/channels",
        Some(&token),
        Some(json!({ "name": "", "kind": "public" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn toggle_flips_reaction_presence() {
    let app = test_app();
    let token = test_token("user", "alice");
    let channel_id = create_channel(&app, &token, "general", vec![]).await;
    let message_id = send_message(&app, &token, channel_id, "react to me").await;

    let payload = json!({ "target_id": message_id, "is_thread": false, "emoji": "👍" });
    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/reactions/toggle",
        Some(&token),
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reactions"].as_array().expect("reactions").len(), 1);

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/reactions/toggle",
        Some(&token),
        Some(payload),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["reactions"].as_array().expect("reactions").is_empty());
}

#[tokio::test]
async fn batch_reports_partial_success() {
    let app = test_app();
    let token = test_token("user", "alice");
    let channel_id = create_channel(&app, &token, "general", vec![]).await;
    let message_id = send_message(&app, &token, channel_id, "target").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/v1/reactions/batch",
        Some(&token),
        Some(json!({
            "updates": [
                { "target_id": message_id, "is_thread": false, "emoji": "🎉", "op": "add" },
                { "target_id": 999_999, "is_thread": false, "emoji": "🎉", "op": "add" }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["error_count"], 1);
    assert_eq!(body["failed"], false);
}

#[tokio::test]
async fn unread_follows_sends_and_marks() {
    let app = test_app();
    let alice = test_token("user", "alice");
    let bob = test_token("user", "bob");

    let channel_id = create_channel(&app, &alice, "general", vec!["bob"]).await;
    send_message(&app, &alice, channel_id, "one").await;
    send_message(&app, &alice, channel_id, "two").await;

    let (status, body) = send(&app, Method::GET, "/v1/unread", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channels"][channel_id.to_string()], 2);
    assert_eq!(body["total"], 2);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/v1/channels/{channel_id}/read"),
        Some(&bob),
        Some(json!({ "upto_message_id": null })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        Method::GET,
        "/v1/unread?refresh=true",
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn deleting_last_reply_cascades_to_parent() {
    let app = test_app();
    let token = test_token("user", "alice");
    let channel_id = create_channel(&app, &token, "general", vec![]).await;
    let parent_id = send_message(&app, &token, channel_id, "parent").await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/v1/messages/{parent_id}/replies"),
        Some(&token),
        Some(json!({ "body": "only reply" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let reply_id = body["id"].as_i64().expect("reply id");

    let (status, body) = send(
        &app,
        Method::DELETE,
        &format!("/v1/replies/{reply_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);
    assert_eq!(body["cascaded_parent_deleted"], true);

    // Repeating the delete is a no-op success without a second cascade.
    let (status, body) = send(
        &app,
        Method::DELETE,
        &format!("/v1/replies/{reply_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cascaded_parent_deleted"], false);

    // Restoring the reply does not restore the cascaded parent.
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/v1/replies/{reply_id}/restore"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restored"], true);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/v1/messages/{parent_id}/restore"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restored"], true);
}

#[tokio::test]
async fn restore_refreshes_unread_answers() {
    let app = test_app();
    let alice = test_token("user", "alice");
    let bob = test_token("user", "bob");

    let channel_id = create_channel(&app, &alice, "general", vec!["bob"]).await;
    let message_id = send_message(&app, &alice, channel_id, "hello bob").await;

    let (status, body) = send(&app, Method::GET, "/v1/unread", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/v1/messages/{message_id}"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, "/v1/unread", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/v1/messages/{message_id}/restore"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restored"], true);

    // Plain read, no refresh: restore must have evicted the cached answer.
    let (status, body) = send(&app, Method::GET, "/v1/unread", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn delete_requires_ownership() {
    let app = test_app();
    let alice = test_token("user", "alice");
    let bob = test_token("user", "bob");
    let channel_id = create_channel(&app, &alice, "general", vec!["bob"]).await;
    let message_id = send_message(&app, &alice, channel_id, "mine").await;

    let (status, body) = send(
        &app,
        Method::DELETE,
        &format!("/v1/messages/{message_id}"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");
}

#[tokio::test]
async fn poll_goes_quiet_once_watermarks_catch_up() {
    let app = test_app();
    let token = test_token("user", "alice");
    let channel_id = create_channel(&app, &token, "general", vec![]).await;
    let first = send_message(&app, &token, channel_id, "one").await;
    let second = send_message(&app, &token, channel_id, "two").await;

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/v1/channels/{channel_id}/poll?last_message_id={first}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_messages = body["new_messages"].as_array().expect("new messages");
    assert_eq!(new_messages.len(), 1);
    assert_eq!(new_messages[0]["id"].as_i64(), Some(second));

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/v1/channels/{channel_id}/poll?last_message_id={second}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["new_messages"].as_array().expect("new messages").is_empty());
    assert!(body["reaction_updates"].as_array().expect("updates").is_empty());
}

#[tokio::test]
async fn poll_reports_deletions_and_reactions() {
    let app = test_app();
    let token = test_token("user", "alice");
    let channel_id = create_channel(&app, &token, "general", vec![]).await;
    let keep_id = send_message(&app, &token, channel_id, "keep").await;
    let drop_id = send_message(&app, &token, channel_id, "drop").await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/v1/reactions/toggle",
        Some(&token),
        Some(json!({ "target_id": keep_id, "is_thread": false, "emoji": "👀" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/v1/messages/{drop_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/v1/channels/{channel_id}/poll?last_message_id={drop_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_messages"], json!([drop_id]));
    let updates = body["reaction_updates"].as_array().expect("updates");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["target_id"].as_i64(), Some(keep_id));
}

#[tokio::test]
async fn poll_requires_membership() {
    let app = test_app();
    let alice = test_token("user", "alice");
    let mallory = test_token("user", "mallory");
    let channel_id = create_channel(&app, &alice, "general", vec![]).await;

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/v1/channels/{channel_id}/poll"),
        Some(&mallory),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn integrity_report_is_admin_only() {
    let app = test_app();
    let user = test_token("user", "alice");
    let admin = test_token("admin", "root");

    let (status, body) = send(&app, Method::GET, "/v1/integrity", Some(&user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, body) = send(&app, Method::GET, "/v1/integrity", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clean"], true);
}
