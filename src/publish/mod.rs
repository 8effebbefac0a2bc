// Public API - the publish lifecycle for outgoing streams
pub use registry::PublisherRegistry;
pub use service::{PublishSessionController, RoomPublisher};
pub use types::{
    PublishMedia, PublishToRoomRequest, PublishToRoomResponse, ViewerStreamSelectionStrategy,
};

pub mod registry;
pub mod service;
pub mod types;
