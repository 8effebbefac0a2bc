//! Interfaces of the external media engine.
//!
//! Everything the orchestration layer needs from the underlying
//! transport/signaling client is behind these traits: publishing and
//! subscribing, room sessions, token issuance, connectivity. The engine owns
//! rooms, members and media; this layer only observes and requests.

pub mod stub;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::room::models::{Member, MemberRole, Room, RoomDescription};
use crate::shared::{RoomCastError, Status};
use crate::stream::{StreamDescriptor, TrackKind};

/// Connectivity of the underlying transport. Reconnects may come back with a
/// different engine identity; sessions must not survive that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    Online { session_id: String },
    Offline,
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online { .. })
    }
}

/// One media track of a local capture stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub track_id: String,
    pub kind: TrackKind,
    pub enabled: bool,
}

/// A pre-acquired local capture stream handed to publish.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalMediaStream {
    pub stream_id: String,
    pub tracks: Vec<Track>,
}

impl LocalMediaStream {
    pub fn track_enabled(&self, kind: TrackKind) -> bool {
        self.tracks
            .iter()
            .any(|track| track.kind == kind && track.enabled)
    }
}

/// Capture constraints for engine-acquired media.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    pub screen: bool,
}

/// The single media source of a publish, validated before the engine is hit.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// Externally hosted stream pulled by the backend.
    RemoteUri(String),
    /// Engine-acquired capture.
    Constraints(MediaConstraints),
    /// Pre-acquired local stream.
    MediaStream(LocalMediaStream),
}

/// Track enable/disable notification from a live publisher.
#[derive(Debug, Clone)]
pub struct TrackStateChange {
    pub track_id: String,
    pub kind: TrackKind,
    pub enabled: bool,
}

/// Quality-monitor notification for a publisher.
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub retryable: bool,
    pub reason: String,
}

/// Engine-side publish request.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub source: MediaSource,
    pub capabilities: Vec<String>,
    pub tags: Vec<String>,
    /// Extra `name=value` entries for the published stream's info.
    pub stream_info: HashMap<String, String>,
    /// Options passed through to the backend when pulling a remote source.
    pub connect_options: Vec<String>,
}

impl PublishRequest {
    pub fn new(source: MediaSource) -> Self {
        Self {
            source,
            capabilities: Vec::new(),
            tags: Vec::new(),
            stream_info: HashMap::new(),
            connect_options: Vec::new(),
        }
    }
}

/// Result of a publish attempt.
pub struct PublishOutcome {
    pub status: Status,
    pub publisher: Option<Arc<dyn Publisher>>,
}

/// Engine-side subscribe request.
#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    pub stream_id: String,
    pub stream_token: Option<String>,
    pub capabilities: Vec<String>,
}

/// Result of a subscribe attempt.
pub struct SubscribeOutcome {
    pub status: Status,
    pub media_stream: Option<Arc<dyn SubscribedStream>>,
}

/// A live outgoing stream owned by the engine.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn stream_id(&self) -> String;

    /// Snapshot of the underlying capture, when one exists.
    fn stream(&self) -> Option<LocalMediaStream>;

    /// Track enable/disable events for the lifetime of the publisher.
    fn track_events(&self) -> broadcast::Receiver<TrackStateChange>;

    /// Quality-monitor events for the lifetime of the publisher.
    fn monitor_events(&self) -> broadcast::Receiver<MonitorEvent>;

    /// Re-establish the stream after a retryable monitor condition.
    async fn retry(&self);

    async fn stop(&self, reason: &str);
}

/// A live incoming stream owned by the engine.
pub trait SubscribedStream: Send + Sync {
    fn origin_stream_id(&self) -> String;

    /// Whether exactly one track of the kind exists, the precondition for
    /// forwarding member state into the monitor.
    fn has_single_track(&self, kind: TrackKind) -> bool;

    /// Informs the stream monitor of the publisher-side track state.
    fn set_monitor_track_state(&self, kind: TrackKind, enabled: bool);
}

/// Publish/subscribe surface of the media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn publish(&self, request: PublishRequest) -> Result<PublishOutcome, RoomCastError>;

    async fn publish_screen(
        &self,
        request: PublishRequest,
    ) -> Result<PublishOutcome, RoomCastError>;

    /// Publish a remote source pulled by the backend; no local media involved.
    async fn publish_remote(
        &self,
        request: PublishRequest,
    ) -> Result<PublishOutcome, RoomCastError>;

    async fn subscribe(&self, request: SubscribeRequest)
        -> Result<SubscribeOutcome, RoomCastError>;

    async fn subscribe_to_screen(
        &self,
        request: SubscribeRequest,
    ) -> Result<SubscribeOutcome, RoomCastError>;

    /// Current transport connectivity, observable across reconnects.
    fn connectivity(&self) -> watch::Receiver<Connectivity>;

    /// Resolves once the transport is online.
    async fn wait_for_online(&self) -> Result<(), RoomCastError>;

    /// Transport session id while online.
    fn session_id(&self) -> Option<String>;
}

/// Issues scoped viewer tokens for published streams.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn create_stream_token_for_subscribing(
        &self,
        requester_pattern: &str,
        capabilities: &[String],
        stream_id: &str,
        additional_stream_ids: &[String],
    ) -> Result<TokenGrant, RoomCastError>;
}

/// Token issuance result; `status != ok` carries no token.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub status: Status,
    pub stream_token: Option<String>,
}

/// Room create/enter/leave result from the transport.
#[derive(Debug, Clone)]
pub struct RoomOutcome {
    pub status: Status,
    pub room: Option<Room>,
}

/// Result of creating a room; the description is immutable and does not
/// imply membership.
#[derive(Debug, Clone)]
pub struct CreateRoomOutcome {
    pub status: Status,
    pub room: Option<RoomDescription>,
}

/// Specification of a room to create at the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomOptions {
    pub name: String,
    pub room_type: crate::room::models::RoomType,
    pub description: String,
    pub room_id: Option<String>,
    pub alias: Option<String>,
}

/// One transport-level room session. Holds at most one active room and the
/// local self member's uncommitted state.
#[async_trait]
pub trait RoomSession: Send + Sync {
    /// Initializes the self member before entering a room.
    fn start(&self, role: MemberRole, screen_name: &str);

    async fn create_room(&self, options: RoomOptions)
        -> Result<CreateRoomOutcome, RoomCastError>;

    async fn enter_room(
        &self,
        room_id: Option<&str>,
        alias: Option<&str>,
    ) -> Result<RoomOutcome, RoomCastError>;

    async fn leave_room(&self) -> Result<Status, RoomCastError>;

    /// Tears the session down locally; safe to call when already stopped.
    fn stop(&self, reason: &str);

    /// The active room; `None` before entering and after stopping. Reconnects
    /// may swap in a new `Room` value.
    fn observable_active_room(&self) -> watch::Receiver<Option<Room>>;

    /// Local self member snapshot; `None` until `start`.
    fn self_member(&self) -> Option<Member>;

    fn set_self_streams(&self, streams: Vec<StreamDescriptor>);

    fn set_self_role(&self, role: MemberRole);

    /// Pushes pending self changes to the room.
    async fn commit_self(&self) -> Result<Status, RoomCastError>;
}

/// Creates transport-level room sessions.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    async fn create_session(&self) -> Result<Arc<dyn RoomSession>, RoomCastError>;
}
