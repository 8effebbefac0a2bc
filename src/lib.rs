// Library crate for the room/session orchestration layer
// This file exposes the public API for integration tests

pub mod config;
pub mod disposable;
pub mod engine;
pub mod features;
pub mod member;
pub mod publish;
pub mod retry;
pub mod room;
pub mod shared;
pub mod stream;
pub mod subscribe;
pub mod token;

// Re-export commonly used types for easier access in tests
pub use config::{Environment, RoomCastConfig};
pub use features::{Feature, FeatureDetector};
pub use publish::{
    PublishMedia, PublishSessionController, PublishToRoomRequest, PublishToRoomResponse,
    PublisherRegistry, RoomPublisher, ViewerStreamSelectionStrategy,
};
pub use room::{
    CreateRoomRequest, CreateRoomResponse, JoinRoomRequest, JoinRoomResponse, Member, MemberRole,
    MembersChangedCallback, Room, RoomSessionController, RoomSessionHandle, RoomType,
};
pub use shared::{RoomCastError, Status};
pub use stream::{StreamDescriptor, StreamInfo, StreamType, TokenField, TrackKind, TrackState};
pub use subscribe::{MemberStreamSubscriber, SubscribeToMemberStreamResponse};
pub use token::WildcardTokenManager;
