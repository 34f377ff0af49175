//! Room DTOs for create, get, list, join and leave.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::PaginationMeta;
use crate::domain::{RoomId, UserId};
use crate::lifecycle::DepartureOutcome;
use crate::persistence::{Room, RoomFilter, RoomMembership};
use crate::service::NewRoom;

/// Request body for `POST /practice-rooms`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateRoomRequest {
    /// Display title.
    pub title: String,
    /// Topic, e.g. `"daily-conversation"`.
    pub theme: String,
    /// Room type, e.g. `"public"`.
    #[serde(rename = "type")]
    pub room_type: String,
    /// Optional long description.
    #[serde(default)]
    pub description: Option<String>,
    /// Capacity. Defaults to the server's configured value.
    #[serde(default)]
    pub max_members: Option<i32>,
}

impl From<CreateRoomRequest> for NewRoom {
    fn from(req: CreateRoomRequest) -> Self {
        Self {
            title: req.title,
            theme: req.theme,
            room_type: req.room_type,
            description: req.description,
            max_members: req.max_members,
        }
    }
}

/// Filters for `GET /practice-rooms`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct RoomFilterParams {
    /// Exact theme match.
    #[serde(default)]
    pub theme: Option<String>,
    /// Exact type match.
    #[serde(default, rename = "type")]
    pub room_type: Option<String>,
}

impl From<RoomFilterParams> for RoomFilter {
    fn from(params: RoomFilterParams) -> Self {
        Self {
            theme: params.theme.filter(|t| !t.is_empty()),
            room_type: params.room_type.filter(|t| !t.is_empty()),
        }
    }
}

/// Paginated response for `GET /practice-rooms`.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomListResponse {
    /// Active rooms, newest first.
    pub data: Vec<Room>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Response body for `GET /practice-rooms/{id}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomDetailResponse {
    /// Room row.
    #[serde(flatten)]
    pub room: Room,
    /// Membership rows, oldest first.
    pub members: Vec<RoomMembership>,
    /// Connections currently live in the room.
    pub live_members: usize,
    /// Users currently on-mic, in the order they went on.
    pub on_mic_users: Vec<UserId>,
}

/// Response body for `POST /practice-rooms/{id}/join`.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinRoomResponse {
    /// Room joined.
    pub room_id: RoomId,
    /// Persisted member count after the join.
    pub current_members: i32,
}

/// Response body for `POST /practice-rooms/{id}/leave`.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaveRoomResponse {
    /// Room left.
    pub room_id: RoomId,
    /// `"host_transferred"`, `"room_closed"` or `"room_kept"`.
    pub outcome: String,
    /// The new host, if the leaver handed over.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_host_id: Option<UserId>,
}

impl LeaveRoomResponse {
    /// Describes a departure outcome.
    #[must_use]
    pub fn new(room_id: RoomId, outcome: DepartureOutcome) -> Self {
        let (outcome, new_host_id) = match outcome {
            DepartureOutcome::HostTransferred(user) => ("host_transferred", Some(user)),
            DepartureOutcome::RoomClosed => ("room_closed", None),
            DepartureOutcome::RoomKept => ("room_kept", None),
        };
        Self {
            room_id,
            outcome: outcome.to_string(),
            new_host_id,
        }
    }
}
