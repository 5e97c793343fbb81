//! REST surface.
//!
//! Every route except `/health` requires a bearer token. Mutations run
//! through the same engine pipeline as channel intents, so they are fanned
//! out to joined sessions as well.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use parley_core::{CoreError, Draft, NewRoom, PushEndpoint};
use parley_protocol::{MessageView, RoomKind, RoomView, SendMessage, UserId, PROTOCOL_VERSION};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

/// Body of `POST /rooms`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
    #[serde(default)]
    pub member_emails: Vec<String>,
    #[serde(default)]
    pub is_group: bool,
}

/// Body of `PUT /messages/{id}/edit`.
#[derive(Debug, Deserialize)]
pub struct EditRequest {
    #[serde(default)]
    pub text: String,
}

/// Body of `POST /push/subscribe`, a browser push subscription.
#[derive(Debug, Deserialize)]
pub struct PushSubscription {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub keys: Option<serde_json::Value>,
}

/// Ids that do not parse cannot resolve either.
fn parse_id(raw: &str, what: &'static str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| CoreError::NotFound(what).into())
}

/// Liveness check.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.engine.broadcaster().stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "rooms": stats.room_count,
        "sessions": stats.session_count,
    }))
}

/// `GET /rooms`
pub async fn list_rooms(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<RoomView>>> {
    let rooms = state.engine.list_rooms(user.id()).await?;
    Ok(Json(rooms))
}

/// `POST /rooms`, 201 when created, 200 for an existing direct room.
pub async fn create_room(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RoomView>)> {
    let Json(body) = body?;
    let request = NewRoom {
        kind: Some(if body.is_group {
            RoomKind::Group
        } else {
            RoomKind::Direct
        }),
        member_ids: body.member_ids,
        member_emails: body.member_emails,
        name: body.name,
    };

    let outcome = state.engine.create_room(user.id(), request).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.room)))
}

/// `GET /rooms/{id}/messages`
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let room_id = parse_id(&room_id, "room")?;
    let messages = state.engine.list_messages(room_id, user.id()).await?;
    Ok(Json(messages))
}

/// `POST /messages`
pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<SendMessage>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MessageView>)> {
    let Json(body) = body?;
    let draft = Draft {
        text: body.text,
        file_url: body.file_url,
        file_type: body.file_type,
    };
    let message = state.engine.send_message(user.id(), body.room_id, draft).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `PUT /messages/{id}/edit`
pub async fn edit_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(message_id): Path<String>,
    body: Result<Json<EditRequest>, JsonRejection>,
) -> ApiResult<Json<MessageView>> {
    let message_id = parse_id(&message_id, "message")?;
    let Json(body) = body?;
    let message = state
        .engine
        .edit_message(user.id(), message_id, &body.text)
        .await?;
    Ok(Json(message))
}

/// `DELETE /messages/{id}`
pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(message_id): Path<String>,
) -> ApiResult<Json<MessageView>> {
    let message_id = parse_id(&message_id, "message")?;
    let message = state.engine.delete_message(user.id(), message_id).await?;
    Ok(Json(message))
}

/// `POST /push/subscribe`
pub async fn subscribe_push(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<PushSubscription>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(body) = body?;
    if body.endpoint.trim().is_empty() {
        return Err(ApiError::bad_request("Invalid subscription"));
    }
    let endpoint = PushEndpoint {
        endpoint: body.endpoint,
        keys: body.keys,
    };
    let added = state.engine.subscribe_push(user.id(), endpoint).await?;
    debug!(user = %user.id(), added, "Push subscription registered");
    Ok(Json(json!({ "message": "Subscribed to push notifications" })))
}
