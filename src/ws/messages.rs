//! WebSocket wire types: the message envelope and its kind discriminator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{Channel, Identity};

/// Message type discriminator.
///
/// Unknown strings are preserved in [`MessageKind::Other`] so that frames
/// of kinds this server does not understand can still be relayed to the
/// room unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// A member joined (client-originated, relayed).
    Join,
    /// A member left (client-originated, relayed).
    Leave,
    /// Chat message.
    Chat,
    /// Sender went on-mic.
    MicOn,
    /// Sender went off-mic.
    MicOff,
    /// Sender muted without leaving the mic.
    MicMute,
    /// Request to go on-mic.
    MicRequest,
    /// Host approves a mic request.
    MicApprove,
    /// Server-synthesized approval notice.
    MicApproved,
    /// Host rejects a mic request.
    MicReject,
    /// Live membership changed.
    MemberUpdate,
    /// Room metadata changed (e.g. new host).
    RoomUpdate,
    /// A room was created.
    RoomCreated,
    /// A room was closed.
    RoomDeleted,
    /// Room list changed.
    RoomListUpdate,
    /// WebRTC SDP offer.
    WebRtcOffer,
    /// WebRTC SDP answer.
    WebRtcAnswer,
    /// WebRTC ICE candidate.
    WebRtcIce,
    /// Ask to be paired with a random partner.
    MatchRequest,
    /// Withdraw a pairing request.
    MatchCancel,
    /// Accept a proposed pairing.
    MatchAccept,
    /// Reject a proposed pairing.
    MatchReject,
    /// Pairing request expired.
    MatchTimeout,
    /// Pairing found.
    MatchSuccess,
    /// Any other type string.
    Other(String),
}

impl MessageKind {
    /// Returns the wire form of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Chat => "message",
            Self::MicOn => "mic_on",
            Self::MicOff => "mic_off",
            Self::MicMute => "mic_mute",
            Self::MicRequest => "mic_request",
            Self::MicApprove => "mic_approve",
            Self::MicApproved => "mic_approved",
            Self::MicReject => "mic_reject",
            Self::MemberUpdate => "member_update",
            Self::RoomUpdate => "room_update",
            Self::RoomCreated => "room_created",
            Self::RoomDeleted => "room_deleted",
            Self::RoomListUpdate => "room_list_update",
            Self::WebRtcOffer => "webrtc_offer",
            Self::WebRtcAnswer => "webrtc_answer",
            Self::WebRtcIce => "webrtc_ice",
            Self::MatchRequest => "1v1_match_request",
            Self::MatchCancel => "1v1_match_cancel",
            Self::MatchAccept => "1v1_match_accept",
            Self::MatchReject => "1v1_match_reject",
            Self::MatchTimeout => "1v1_match_timeout",
            Self::MatchSuccess => "1v1_match_success",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for MessageKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "message" => Self::Chat,
            "mic_on" => Self::MicOn,
            "mic_off" => Self::MicOff,
            "mic_mute" => Self::MicMute,
            "mic_request" => Self::MicRequest,
            "mic_approve" => Self::MicApprove,
            "mic_approved" => Self::MicApproved,
            "mic_reject" => Self::MicReject,
            "member_update" => Self::MemberUpdate,
            "room_update" => Self::RoomUpdate,
            "room_created" => Self::RoomCreated,
            "room_deleted" => Self::RoomDeleted,
            "room_list_update" => Self::RoomListUpdate,
            "webrtc_offer" => Self::WebRtcOffer,
            "webrtc_answer" => Self::WebRtcAnswer,
            "webrtc_ice" => Self::WebRtcIce,
            "1v1_match_request" => Self::MatchRequest,
            "1v1_match_cancel" => Self::MatchCancel,
            "1v1_match_accept" => Self::MatchAccept,
            "1v1_match_reject" => Self::MatchReject,
            "1v1_match_timeout" => Self::MatchTimeout,
            "1v1_match_success" => Self::MatchSuccess,
            _ => Self::Other(raw),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level WebSocket message envelope, used in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Room id, or `"global"` for room-less connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// Sender (or subject) user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Sender display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Sender avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Free-form text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Kind-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Message {
    /// Creates an empty message of the given kind.
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            room_id: None,
            user_id: None,
            username: None,
            avatar_url: None,
            content: None,
            data: None,
            timestamp: None,
        }
    }

    /// Sets the room field from a channel.
    #[must_use]
    pub fn in_channel(mut self, channel: Channel) -> Self {
        self.room_id = Some(channel.to_string());
        self
    }

    /// Sets all three identity fields.
    #[must_use]
    pub fn from_identity(mut self, identity: &Identity) -> Self {
        self.user_id = Some(identity.user_id.to_string());
        self.username = Some(identity.username.clone());
        self.avatar_url = Some(identity.avatar_url.clone());
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Stamps the current time.
    #[must_use]
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(chrono::Utc::now().timestamp());
        self
    }

    /// Replaces every sender-identity field with server-known values.
    /// Whatever the client claimed is discarded.
    pub fn overwrite_sender(&mut self, identity: &Identity, channel: Channel) {
        self.user_id = Some(identity.user_id.to_string());
        self.username = Some(identity.username.clone());
        self.avatar_url = Some(identity.avatar_url.clone());
        self.room_id = Some(channel.to_string());
        self.timestamp = Some(chrono::Utc::now().timestamp());
    }

    /// Reads a string field out of the payload object.
    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }
}

/// Frame sent once before closing a socket whose authentication failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Always `"error"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable reason.
    pub message: String,
}

impl ErrorFrame {
    /// Creates an error frame with the given reason.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            message: message.into(),
        }
    }
}
