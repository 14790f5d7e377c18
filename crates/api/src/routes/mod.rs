use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use kanal_domain::channel::{Channel, ChannelCreate, ChannelKind, ChannelMember};
use kanal_domain::deletion::{DeleteOutcome, EntityRef};
use kanal_domain::feed::{Delta, PollRequest};
use kanal_domain::identity::ActorIdentity;
use kanal_domain::integrity::IntegrityReport;
use kanal_domain::message::{
    default_page_size, HydratedMessage, ListMessagesInput, MessagePage, SendMessageInput,
};
use kanal_domain::reaction::{BatchReport, Reaction, ReactionUpdate};
use kanal_domain::read_state::{ReadCursor, ThreadReadCursor, UnreadCounts};
use kanal_domain::thread::{ThreadInfo, ThreadInfoInput, ThreadMessage, ThreadPage};

use crate::error::{map_domain_error, ApiError};
use crate::middleware::{
    auth_middleware, correlation_id_middleware, metrics_layer, propagate_request_id_layer,
    rate_limit_layer, require_auth_middleware, set_request_id_layer, timeout_layer, trace_layer,
    AuthContext,
};
use crate::observability;
use crate::state::AppState;
use crate::validation::validate;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/channels", post(create_channel).get(list_channels))
        .route("/v1/channels/:channel_id/join", post(join_channel))
        .route(
            "/v1/channels/:channel_id/messages",
            get(list_messages).post(send_message),
        )
        .route(
            "/v1/messages/:message_id/replies",
            post(send_reply).get(list_replies),
        )
        .route("/v1/channels/:channel_id/threads/info", post(thread_info))
        .route("/v1/reactions/toggle", post(toggle_reaction))
        .route("/v1/reactions/batch", post(batch_reactions))
        .route("/v1/channels/:channel_id/read", post(mark_channel_read))
        .route(
            "/v1/threads/:parent_message_id/read",
            post(mark_thread_read),
        )
        .route("/v1/unread", get(unread_counts))
        .route("/v1/channels/:channel_id/poll", get(poll_channel))
        .route("/v1/messages/:message_id", delete(delete_message))
        .route("/v1/messages/:message_id/restore", post(restore_message))
        .route("/v1/replies/:thread_message_id", delete(delete_reply))
        .route(
            "/v1/replies/:thread_message_id/restore",
            post(restore_reply),
        )
        .route("/v1/integrity", get(integrity_report))
        .route_layer(middleware::from_fn(require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(protected)
        .layer(middleware::from_fn(correlation_id_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(propagate_request_id_layer())
        .layer(set_request_id_layer())
        .layer(trace_layer())
        .layer(timeout_layer())
        .layer(middleware::from_fn(metrics_layer));

    // The governor keys on peer IPs, which breaks oneshot-style test clients.
    if !state.config.app_env.eq_ignore_ascii_case("test") {
        app = app.layer(rate_limit_layer());
    }

    app.with_state(state)
}

fn actor_identity(auth: &AuthContext) -> Result<ActorIdentity, ApiError> {
    let user_id = auth.user_id.clone().ok_or(ApiError::Unauthorized)?;
    let username = auth.username.clone().unwrap_or_else(|| user_id.clone());
    Ok(ActorIdentity { user_id, username })
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.app_env,
    }))
}

async fn metrics() -> impl IntoResponse {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, String::new()).into_response(),
    }
}

#[derive(Debug, Deserialize, Validate)]
struct CreateChannelRequest {
    #[validate(length(min = 1, max = 80))]
    name: String,
    kind: ChannelKind,
    #[serde(default)]
    members: Vec<String>,
}

async fn create_channel(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<Channel>), ApiError> {
    validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let channel = state
        .channels
        .create(
            &actor,
            ChannelCreate {
                name: payload.name,
                kind: payload.kind,
                members: payload.members,
            },
        )
        .await
        .map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn list_channels(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let channels = state
        .channels
        .list_for_user(&actor)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(channels))
}

async fn join_channel(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(channel_id): Path<i64>,
) -> Result<Json<ChannelMember>, ApiError> {
    let actor = actor_identity(&auth)?;
    let member = state
        .channels
        .join(&actor, channel_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(member))
}

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size_param")]
    page_size: usize,
    after_id: Option<i64>,
}

fn default_page() -> usize {
    1
}

fn default_page_size_param() -> usize {
    default_page_size()
}

async fn list_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(channel_id): Path<i64>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let actor = actor_identity(&auth)?;
    let page = state
        .messages
        .list(
            &actor,
            ListMessagesInput {
                channel_id,
                page: query.page,
                page_size: query.page_size,
                after_id: query.after_id,
            },
        )
        .await
        .map_err(map_domain_error)?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize, Validate)]
struct SendMessageRequest {
    #[validate(length(max = 4000))]
    body: String,
    #[serde(default)]
    attachment_ids: Vec<String>,
}

async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(channel_id): Path<i64>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<HydratedMessage>), ApiError> {
    validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let message = state
        .messages
        .send(
            &actor,
            SendMessageInput {
                channel_id,
                body: payload.body,
                attachment_ids: payload.attachment_ids,
            },
        )
        .await
        .map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize, Validate)]
struct ReplyRequest {
    #[validate(length(min = 1, max = 4000))]
    body: String,
}

async fn send_reply(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(message_id): Path<i64>,
    Json(payload): Json<ReplyRequest>,
) -> Result<(StatusCode, Json<ThreadMessage>), ApiError> {
    validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let reply = state
        .threads
        .reply(&actor, message_id, payload.body)
        .await
        .map_err(map_domain_error)?;
    Ok((StatusCode::CREATED, Json(reply)))
}

#[derive(Debug, Deserialize)]
struct ListRepliesQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size_param")]
    page_size: usize,
    #[serde(default)]
    include_deleted: bool,
}

async fn list_replies(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(message_id): Path<i64>,
    Query(query): Query<ListRepliesQuery>,
) -> Result<Json<ThreadPage>, ApiError> {
    let actor = actor_identity(&auth)?;
    let page = state
        .threads
        .list_replies(
            &actor,
            message_id,
            query.page,
            query.page_size,
            query.include_deleted,
        )
        .await
        .map_err(map_domain_error)?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize, Validate)]
struct ThreadInfoRequest {
    #[validate(length(min = 1, max = 100))]
    parent_message_ids: Vec<i64>,
    #[serde(default)]
    include_deleted: bool,
}

async fn thread_info(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(channel_id): Path<i64>,
    Json(payload): Json<ThreadInfoRequest>,
) -> Result<Json<HashMap<i64, ThreadInfo>>, ApiError> {
    validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let info = state
        .threads
        .info(
            &actor,
            ThreadInfoInput {
                channel_id,
                parent_message_ids: payload.parent_message_ids,
                include_deleted: payload.include_deleted,
            },
        )
        .await
        .map_err(map_domain_error)?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize, Validate)]
struct ToggleReactionRequest {
    target_id: i64,
    #[serde(default)]
    is_thread: bool,
    #[validate(length(min = 1, max = 32))]
    emoji: String,
}

#[derive(Debug, Serialize)]
struct ReactionSnapshot {
    reactions: Vec<Reaction>,
}

async fn toggle_reaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<ToggleReactionRequest>,
) -> Result<Json<ReactionSnapshot>, ApiError> {
    validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let reactions = state
        .reactions
        .toggle(&actor, payload.target_id, payload.is_thread, &payload.emoji)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(ReactionSnapshot { reactions }))
}

#[derive(Debug, Deserialize, Validate)]
struct BatchReactionRequest {
    #[validate(length(min = 1, max = 50))]
    updates: Vec<ReactionUpdate>,
}

async fn batch_reactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<BatchReactionRequest>,
) -> Result<Json<BatchReport>, ApiError> {
    validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let report = state
        .reactions
        .batch_update(&actor, payload.updates)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct MarkChannelReadRequest {
    upto_message_id: Option<i64>,
}

async fn mark_channel_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(channel_id): Path<i64>,
    Json(payload): Json<MarkChannelReadRequest>,
) -> Result<Json<ReadCursor>, ApiError> {
    let actor = actor_identity(&auth)?;
    let cursor = state
        .unread
        .mark_channel_read(&actor, channel_id, payload.upto_message_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(cursor))
}

#[derive(Debug, Deserialize)]
struct MarkThreadReadRequest {
    upto_ms: Option<i64>,
}

async fn mark_thread_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(parent_message_id): Path<i64>,
    Json(payload): Json<MarkThreadReadRequest>,
) -> Result<Json<ThreadReadCursor>, ApiError> {
    let actor = actor_identity(&auth)?;
    let cursor = state
        .unread
        .mark_thread_read(&actor, parent_message_id, payload.upto_ms)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(cursor))
}

#[derive(Debug, Deserialize)]
struct UnreadQuery {
    #[serde(default)]
    refresh: bool,
}

async fn unread_counts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<UnreadQuery>,
) -> Result<Json<UnreadCounts>, ApiError> {
    let actor = actor_identity(&auth)?;
    let counts = state
        .unread
        .unread_counts(&actor, query.refresh)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(counts))
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    #[serde(default)]
    last_message_id: i64,
    #[serde(default)]
    last_thread_message_id: i64,
    #[serde(default)]
    last_reaction_ts_ms: i64,
    current_thread_id: Option<i64>,
}

async fn poll_channel(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(channel_id): Path<i64>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Delta>, ApiError> {
    let actor = actor_identity(&auth)?;
    let delta = state
        .feed
        .poll(
            &actor,
            PollRequest {
                channel_id,
                last_message_id: query.last_message_id,
                last_thread_message_id: query.last_thread_message_id,
                last_reaction_ts_ms: query.last_reaction_ts_ms,
                current_thread_id: query.current_thread_id,
            },
        )
        .await
        .map_err(map_domain_error)?;

    observability::register_poll_delta("new_messages", delta.new_messages.len());
    observability::register_poll_delta("deleted_messages", delta.deleted_messages.len());
    observability::register_poll_delta("new_thread_messages", delta.new_thread_messages.len());
    observability::register_poll_delta(
        "deleted_thread_messages",
        delta.deleted_thread_messages.len(),
    );
    observability::register_poll_delta("reaction_updates", delta.reaction_updates.len());

    Ok(Json(delta))
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: bool,
    cascaded_parent_deleted: bool,
}

#[derive(Debug, Serialize)]
struct RestoreResponse {
    restored: bool,
}

async fn soft_delete(
    state: &AppState,
    auth: &AuthContext,
    entity: EntityRef,
) -> Result<DeleteOutcome, ApiError> {
    let actor = actor_identity(auth)?;
    let outcome = state
        .ledger
        .soft_delete(&actor, entity)
        .await
        .map_err(map_domain_error)?;
    // Tombstoned rows change page contents and unread answers.
    state.messages.invalidate_channel_caches(outcome.channel_id).await;
    Ok(outcome)
}

async fn delete_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(message_id): Path<i64>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let outcome = soft_delete(&state, &auth, EntityRef::Message(message_id)).await?;
    Ok(Json(DeleteResponse {
        deleted: outcome.deleted,
        cascaded_parent_deleted: outcome.cascaded_parent_deleted,
    }))
}

async fn delete_reply(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(thread_message_id): Path<i64>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let outcome = soft_delete(&state, &auth, EntityRef::Reply(thread_message_id)).await?;
    Ok(Json(DeleteResponse {
        deleted: outcome.deleted,
        cascaded_parent_deleted: outcome.cascaded_parent_deleted,
    }))
}

async fn restore(
    state: &AppState,
    auth: &AuthContext,
    entity: EntityRef,
) -> Result<Json<RestoreResponse>, ApiError> {
    let actor = actor_identity(auth)?;
    let outcome = state
        .ledger
        .restore(&actor, entity)
        .await
        .map_err(map_domain_error)?;
    // Restored rows reappear in pages and unread answers.
    state
        .messages
        .invalidate_channel_caches(outcome.channel_id)
        .await;
    Ok(Json(RestoreResponse {
        restored: outcome.restored,
    }))
}

async fn restore_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(message_id): Path<i64>,
) -> Result<Json<RestoreResponse>, ApiError> {
    restore(&state, &auth, EntityRef::Message(message_id)).await
}

async fn restore_reply(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(thread_message_id): Path<i64>,
) -> Result<Json<RestoreResponse>, ApiError> {
    restore(&state, &auth, EntityRef::Reply(thread_message_id)).await
}

async fn integrity_report(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<IntegrityReport>, ApiError> {
    if !auth.role.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let report = state.integrity.report().await;
    Ok(Json(report))
}
