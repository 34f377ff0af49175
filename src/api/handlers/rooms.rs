//! Practice room handlers: create, list, get, join, leave.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{
    CreateRoomRequest, JoinRoomResponse, LeaveRoomResponse, PaginationMeta, PaginationParams,
    RoomDetailResponse, RoomFilterParams, RoomListResponse,
};
use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::domain::RoomId;
use crate::error::{ErrorResponse, HubError};
use crate::persistence::{Room, RoomFilter};

/// `POST /practice-rooms` — Open a room hosted by the caller.
///
/// # Errors
///
/// Returns [`HubError`] on invalid fields, a bad token or a storage failure.
#[utoipa::path(
    post,
    path = "/api/v1/practice-rooms",
    tag = "Rooms",
    summary = "Create a practice room",
    description = "Creates an active room owned by the caller, who becomes its host and first member. Global connections receive a `room_created` notice.",
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = Room),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn create_room(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, HubError> {
    let room = state.rooms.create_room(user_id, req.into()).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// `GET /practice-rooms` — List active rooms, newest first.
///
/// # Errors
///
/// Returns [`HubError::PersistenceError`] on storage failures.
#[utoipa::path(
    get,
    path = "/api/v1/practice-rooms",
    tag = "Rooms",
    summary = "List practice rooms",
    description = "Returns a paginated list of active rooms, optionally filtered by theme and type.",
    params(PaginationParams, RoomFilterParams),
    responses(
        (status = 200, description = "Paginated room list", body = RoomListResponse),
    )
)]
pub async fn list_rooms(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<RoomFilterParams>,
) -> Result<impl IntoResponse, HubError> {
    let params = params.clamped();
    let filter = RoomFilter::from(filter);
    let (data, total) = state
        .rooms
        .list_rooms(&filter, params.page, params.per_page)
        .await?;

    Ok(Json(RoomListResponse {
        data,
        pagination: PaginationMeta::new(params.page, params.per_page, total),
    }))
}

/// `GET /practice-rooms/:id` — Room details with members and live presence.
///
/// # Errors
///
/// Returns [`HubError::RoomNotFound`] if the room does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/practice-rooms/{id}",
    tag = "Rooms",
    summary = "Get room details",
    description = "Returns the room row, its membership rows, the number of live connections and the on-mic users.",
    params(
        ("id" = uuid::Uuid, Path, description = "Room UUID"),
    ),
    responses(
        (status = 200, description = "Room details", body = RoomDetailResponse),
        (status = 404, description = "Room not found", body = ErrorResponse),
    )
)]
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<impl IntoResponse, HubError> {
    let details = state.rooms.get_room(room_id).await?;
    let hub = state.rooms.hub();

    Ok(Json(RoomDetailResponse {
        room: details.room,
        members: details.members,
        live_members: hub.room_member_count(room_id).await,
        on_mic_users: hub.on_mic_users(room_id).await,
    }))
}

/// `POST /practice-rooms/:id/join` — Become a member of a room.
///
/// # Errors
///
/// Returns [`HubError::RoomNotFound`], [`HubError::RoomInactive`] or
/// [`HubError::RoomFull`].
#[utoipa::path(
    post,
    path = "/api/v1/practice-rooms/{id}/join",
    tag = "Rooms",
    summary = "Join a room",
    description = "Adds the caller as a member. Joining a room one already belongs to is a no-op.",
    params(
        ("id" = uuid::Uuid, Path, description = "Room UUID"),
    ),
    responses(
        (status = 200, description = "Joined", body = JoinRoomResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 404, description = "Room not found", body = ErrorResponse),
        (status = 409, description = "Room closed or full", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn join_room(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<RoomId>,
) -> Result<impl IntoResponse, HubError> {
    let room = state.rooms.join_room(room_id, user_id).await?;
    state.rooms.monitors().ensure(room_id);

    Ok(Json(JoinRoomResponse {
        room_id,
        current_members: room.current_members,
    }))
}

/// `POST /practice-rooms/:id/leave` — Leave a room.
///
/// Runs the same reconciliation as a dropped room connection: the host
/// role may move to an on-mic member and an empty room is closed.
///
/// # Errors
///
/// Returns [`HubError::RoomNotFound`] or [`HubError::MembershipNotFound`].
#[utoipa::path(
    post,
    path = "/api/v1/practice-rooms/{id}/leave",
    tag = "Rooms",
    summary = "Leave a room",
    description = "Removes the caller's membership and reconciles host succession and room closure.",
    params(
        ("id" = uuid::Uuid, Path, description = "Room UUID"),
    ),
    responses(
        (status = 200, description = "Left", body = LeaveRoomResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 404, description = "Room or membership not found", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn leave_room(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<RoomId>,
) -> Result<impl IntoResponse, HubError> {
    let outcome = state.rooms.leave_room(room_id, user_id).await?;
    Ok(Json(LeaveRoomResponse::new(room_id, outcome)))
}

/// Practice room routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/practice-rooms", post(create_room).get(list_rooms))
        .route("/practice-rooms/{id}", get(get_room))
        .route("/practice-rooms/{id}/join", post(join_room))
        .route("/practice-rooms/{id}/leave", post(leave_room))
}
