//! OpenAPI document assembled from the handler annotations.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::api::dto::{
    CreateRoomRequest, JoinRoomResponse, LeaveRoomResponse, PaginationMeta, RoomDetailResponse,
    RoomListResponse,
};
use crate::api::handlers::{rooms, system};
use crate::error::{ErrorBody, ErrorResponse};
use crate::persistence::{Room, RoomMembership};

/// The service's OpenAPI description.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "practice-hub", description = "Practice rooms and real-time hub"),
    paths(
        system::health_handler,
        rooms::create_room,
        rooms::list_rooms,
        rooms::get_room,
        rooms::join_room,
        rooms::leave_room,
        crate::ws::handler::ws_handler,
    ),
    components(schemas(
        Room,
        RoomMembership,
        CreateRoomRequest,
        RoomListResponse,
        RoomDetailResponse,
        JoinRoomResponse,
        LeaveRoomResponse,
        PaginationMeta,
        ErrorResponse,
        ErrorBody,
        system::HealthResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "Rooms", description = "Practice room management"),
        (name = "Realtime", description = "WebSocket hub"),
        (name = "System", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[derive(Debug)]
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_room_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/practice-rooms"));
        assert!(doc.paths.paths.contains_key("/api/v1/practice-rooms/{id}/leave"));
        assert!(doc.paths.paths.contains_key("/health"));
    }
}
