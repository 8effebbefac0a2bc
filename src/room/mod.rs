// Public API - room models plus the join/create/leave state machine
pub use models::{Member, MemberRole, Room, RoomDescription, RoomType};
pub use service::{RoomSessionController, RoomSessionHandle};
pub use types::{
    CreateRoomRequest, CreateRoomResponse, JoinRoomRequest, JoinRoomResponse,
    MembersChangedCallback,
};

pub mod models;
pub mod service;
pub mod types;
