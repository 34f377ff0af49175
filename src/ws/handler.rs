//! Axum WebSocket upgrade handler.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::StreamExt;
use serde::Deserialize;
use utoipa::IntoParams;

use super::connection::{Connection, PumpSettings};
use super::dispatch::Dispatcher;
use super::messages::ErrorFrame;
use crate::app_state::AppState;
use crate::auth::bearer_token;
use crate::domain::{Channel, Identity};
use crate::error::HubError;
use crate::hub::ClientHandle;
use crate::lifecycle::{DisconnectHandler, RoomDepartureHandler};

/// Query parameters of the upgrade request.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ConnectParams {
    /// Access token. Falls back to `Authorization: Bearer`.
    pub token: Option<String>,
    /// Room to join. Absent, empty or `"global"` opens a room-less
    /// connection.
    pub room_id: Option<String>,
}

/// `GET /api/v1/ws` — Upgrade to a hub connection.
///
/// A malformed `room_id` fails the upgrade with `400`. Authentication and
/// room admission happen after the upgrade; failures there send one
/// `{"type":"error"}` frame and close the socket.
///
/// # Errors
///
/// Returns [`HubError::InvalidRequest`] for a malformed `room_id`.
#[utoipa::path(
    get,
    path = "/api/v1/ws",
    tag = "Realtime",
    summary = "Open a hub connection",
    description = "Upgrades to a WebSocket. With a `room_id` the connection joins that room (auto-joining if needed); without one it is a global connection used for room-list updates and 1v1 matchmaking.",
    params(ConnectParams),
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 400, description = "Malformed room id", body = crate::error::ErrorResponse),
    )
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Result<Response, HubError> {
    let channel = Channel::from_query(params.room_id.as_deref())
        .map_err(|_| HubError::InvalidRequest("malformed room_id".to_string()))?;
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers).map(str::to_owned));

    Ok(ws
        .max_message_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| serve_socket(socket, state, channel, token)))
}

async fn serve_socket(mut socket: WebSocket, state: AppState, channel: Channel, token: Option<String>) {
    let identity = match admit(&state, channel, token.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::info!(%channel, error = %e, "connection rejected");
            reject(&mut socket, &e).await;
            return;
        }
    };

    let user_id = identity.user_id;
    let (client, outbound) =
        ClientHandle::new(identity, channel, state.config.outbound_queue_capacity);
    let client = Arc::new(client);

    if let Err(e) = state.hub.register(Arc::clone(&client)).await {
        tracing::error!(%user_id, error = %e, "hub refused registration");
        reject(&mut socket, &e).await;
        return;
    }

    let on_disconnect: Option<Box<dyn DisconnectHandler>> = match channel {
        Channel::Room(room_id) => Some(Box::new(RoomDepartureHandler::new(
            Arc::clone(&state.reconciler),
            room_id,
            user_id,
        ))),
        Channel::Global => None,
    };

    let connection = Connection::new(
        Dispatcher::new(client, state.hub.clone()),
        on_disconnect,
        PumpSettings::from_config(&state.config),
    );
    let (sink, stream) = socket.split();
    connection.run(sink, stream, outbound).await;
}

/// Authenticates the caller and admits them to `channel`.
async fn admit(state: &AppState, channel: Channel, token: Option<&str>) -> Result<Identity, HubError> {
    let token = token.ok_or_else(|| HubError::Unauthorized("missing access token".to_string()))?;
    let user_id = state.validator.validate(token)?;
    let profile = state
        .profiles
        .get_profile(user_id)
        .await?
        .ok_or(HubError::UserNotFound(user_id))?;

    if let Channel::Room(room_id) = channel {
        state.rooms.ensure_membership(room_id, user_id).await?;
    }
    Ok(profile.into_identity())
}

async fn reject(socket: &mut WebSocket, error: &HubError) {
    if let Ok(frame) = serde_json::to_string(&ErrorFrame::new(error.to_string())) {
        let _ = socket.send(WsMessage::text(frame)).await;
    }
    let _ = socket.send(WsMessage::Close(None)).await;
}
