use std::sync::Arc;

use crate::room::models::{Member, MemberRole, RoomDescription};
use crate::room::service::RoomSessionHandle;
use crate::shared::Status;
use crate::stream::StreamDescriptor;

/// Request payload for creating a new room.
///
/// The room type arrives as its wire name so unrecognized values can be
/// rejected explicitly rather than silently coerced.
#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub name: String,
    pub room_type: String,
    pub description: Option<String>,
    pub room_id: Option<String>,
    pub alias: Option<String>,
}

/// Response for room creation. The room is immutable; creating it does not
/// make this client a member.
#[derive(Debug, Clone)]
pub struct CreateRoomResponse {
    pub status: Status,
    pub room: Option<RoomDescription>,
}

/// Request payload for joining a room.
#[derive(Debug, Clone)]
pub struct JoinRoomRequest {
    pub room_id: Option<String>,
    pub alias: Option<String>,
    pub role: MemberRole,
    pub screen_name: Option<String>,
    /// Streams to seed the self member with, typically externally published.
    pub streams: Vec<StreamDescriptor>,
    /// When set, seeded streams get wildcard viewer tokens generated with
    /// these publisher capabilities before the member state is committed.
    pub wildcard_capabilities: Option<Vec<String>>,
}

impl JoinRoomRequest {
    pub fn with_role(role: MemberRole) -> Self {
        Self {
            room_id: None,
            alias: None,
            role,
            screen_name: None,
            streams: Vec::new(),
            wildcard_capabilities: None,
        }
    }

    pub fn room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn screen_name(mut self, screen_name: impl Into<String>) -> Self {
        self.screen_name = Some(screen_name.into());
        self
    }
}

/// Response for a join attempt. A session is present exactly when the status
/// leaves the caller in the room.
#[derive(Clone)]
pub struct JoinRoomResponse {
    pub status: Status,
    pub session: Option<Arc<RoomSessionHandle>>,
}

/// Callback invoked with the full member list on every membership change,
/// starting with an immediate initial snapshot.
pub type MembersChangedCallback = Arc<dyn Fn(Vec<Member>) + Send + Sync>;
