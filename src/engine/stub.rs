//! In-memory media engine for development and testing.
//!
//! Implements every engine trait against process-local state: rooms are map
//! entries, members travel over watch channels, publishers hand out
//! sequential stream ids, and the token issuer mints real JWTs. Test setups
//! script negative statuses where a scenario needs them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Connectivity, CreateRoomOutcome, LocalMediaStream, MediaEngine, MediaSource, MonitorEvent,
    PublishOutcome, PublishRequest, Publisher, RoomOptions, RoomOutcome, RoomSession,
    RoomTransport, SubscribeOutcome, SubscribeRequest, SubscribedStream, TokenGrant, TokenIssuer,
    Track, TrackStateChange,
};
use crate::room::models::{Member, MemberRole, Room, RoomDescription};
use crate::shared::{RoomCastError, Status};
use crate::stream::TrackKind;

const TRACK_EVENT_CAPACITY: usize = 32;

struct StubRoom {
    options: RoomOptions,
    members_tx: watch::Sender<Vec<Member>>,
}

impl StubRoom {
    fn handle(&self, room_id: &str) -> Room {
        Room::new(
            room_id,
            self.options.alias.clone(),
            self.options.room_type,
            self.members_tx.subscribe(),
        )
    }

    fn description(&self, room_id: &str) -> RoomDescription {
        RoomDescription {
            room_id: room_id.to_string(),
            alias: self.options.alias.clone(),
            room_type: self.options.room_type,
            name: self.options.name.clone(),
            description: self.options.description.clone(),
        }
    }
}

struct StubEngineInner {
    rooms: Mutex<HashMap<String, StubRoom>>,
    connectivity_tx: watch::Sender<Connectivity>,
    next_stream_id: AtomicU64,
    next_room_id: AtomicU64,
    live_publishers: Mutex<Vec<String>>,
    all_publishers: Mutex<Vec<Arc<StubPublisher>>>,
    subscribe_script: Mutex<VecDeque<Status>>,
    subscribe_calls: AtomicU64,
    publish_script: Mutex<VecDeque<Status>>,
    sessions: Mutex<Vec<Arc<StubRoomSession>>>,
    subscribed: Mutex<Vec<Arc<StubSubscribedStream>>>,
}

/// In-memory engine: publish/subscribe surface plus room-session factory.
#[derive(Clone)]
pub struct StubEngine {
    inner: Arc<StubEngineInner>,
}

impl StubEngine {
    pub fn new() -> Self {
        let (connectivity_tx, _) = watch::channel(Connectivity::Online {
            session_id: Uuid::new_v4().to_string(),
        });

        Self {
            inner: Arc::new(StubEngineInner {
                rooms: Mutex::new(HashMap::new()),
                connectivity_tx,
                next_stream_id: AtomicU64::new(1),
                next_room_id: AtomicU64::new(1),
                live_publishers: Mutex::new(Vec::new()),
                all_publishers: Mutex::new(Vec::new()),
                subscribe_script: Mutex::new(VecDeque::new()),
                subscribe_calls: AtomicU64::new(0),
                publish_script: Mutex::new(VecDeque::new()),
                sessions: Mutex::new(Vec::new()),
                subscribed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Drops the transport offline, as a network loss would.
    pub fn go_offline(&self) {
        self.inner.connectivity_tx.send_replace(Connectivity::Offline);
    }

    /// Brings the transport back online under a fresh engine session.
    pub fn go_online(&self) {
        self.inner.connectivity_tx.send_replace(Connectivity::Online {
            session_id: Uuid::new_v4().to_string(),
        });
    }

    /// Queues statuses returned by the next subscribe calls, oldest first.
    pub fn script_subscribe_statuses(&self, statuses: impl IntoIterator<Item = Status>) {
        self.inner
            .subscribe_script
            .lock()
            .unwrap()
            .extend(statuses);
    }

    /// Queues statuses returned by the next publish calls, oldest first.
    pub fn script_publish_statuses(&self, statuses: impl IntoIterator<Item = Status>) {
        self.inner.publish_script.lock().unwrap().extend(statuses);
    }

    pub fn subscribe_call_count(&self) -> u64 {
        self.inner.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Sessions created through [`RoomTransport::create_session`], oldest
    /// first; tests reach through these to script per-session behavior.
    pub fn sessions(&self) -> Vec<Arc<StubRoomSession>> {
        self.inner.sessions.lock().unwrap().clone()
    }

    /// Streams handed out by successful subscribes, oldest first.
    pub fn subscribed_streams(&self) -> Vec<Arc<StubSubscribedStream>> {
        self.inner.subscribed.lock().unwrap().clone()
    }

    /// Stream ids of publishers that are currently live.
    pub fn live_publisher_ids(&self) -> Vec<String> {
        self.inner.live_publishers.lock().unwrap().clone()
    }

    /// Every publisher ever created, oldest first; tests reach through these
    /// to flip track states and emit monitor events.
    pub fn stub_publishers(&self) -> Vec<Arc<StubPublisher>> {
        self.inner.all_publishers.lock().unwrap().clone()
    }

    /// Member snapshot of a room, for assertions.
    pub fn room_members(&self, room_id: &str) -> Vec<Member> {
        self.inner
            .rooms
            .lock()
            .unwrap()
            .get(room_id)
            .map(|room| room.members_tx.borrow().clone())
            .unwrap_or_default()
    }

    fn allocate_stream_id(&self) -> String {
        let n = self.inner.next_stream_id.fetch_add(1, Ordering::SeqCst);
        format!("stream-{n}")
    }

    fn scripted_publish_status(&self) -> Status {
        self.inner
            .publish_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Status::Ok)
    }

    fn make_publisher(&self, stream: Option<LocalMediaStream>) -> Arc<StubPublisher> {
        let stream_id = self.allocate_stream_id();
        let publisher = Arc::new(StubPublisher::new(stream_id.clone(), stream, self.clone()));

        self.inner.live_publishers.lock().unwrap().push(stream_id);
        self.inner.all_publishers.lock().unwrap().push(publisher.clone());

        publisher
    }

    fn release_publisher(&self, stream_id: &str) {
        self.inner
            .live_publishers
            .lock()
            .unwrap()
            .retain(|id| id != stream_id);
    }

    fn stream_for_source(source: &MediaSource) -> Option<LocalMediaStream> {
        match source {
            MediaSource::RemoteUri(_) => None,
            MediaSource::MediaStream(stream) => Some(stream.clone()),
            MediaSource::Constraints(constraints) => {
                let mut tracks = Vec::new();
                if constraints.audio {
                    tracks.push(Track {
                        track_id: format!("audio-{}", Uuid::new_v4()),
                        kind: TrackKind::Audio,
                        enabled: true,
                    });
                }
                if constraints.video || constraints.screen {
                    tracks.push(Track {
                        track_id: format!("video-{}", Uuid::new_v4()),
                        kind: TrackKind::Video,
                        enabled: true,
                    });
                }

                Some(LocalMediaStream {
                    stream_id: Uuid::new_v4().to_string(),
                    tracks,
                })
            }
        }
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for StubEngine {
    async fn publish(&self, request: PublishRequest) -> Result<PublishOutcome, RoomCastError> {
        let status = self.scripted_publish_status();
        if !status.is_ok() {
            return Ok(PublishOutcome {
                status,
                publisher: None,
            });
        }

        let publisher = self.make_publisher(Self::stream_for_source(&request.source));
        debug!(stream_id = %publisher.stream_id, "Stub publish started");

        Ok(PublishOutcome {
            status: Status::Ok,
            publisher: Some(publisher),
        })
    }

    async fn publish_screen(
        &self,
        request: PublishRequest,
    ) -> Result<PublishOutcome, RoomCastError> {
        self.publish(request).await
    }

    async fn publish_remote(
        &self,
        request: PublishRequest,
    ) -> Result<PublishOutcome, RoomCastError> {
        if !matches!(request.source, MediaSource::RemoteUri(_)) {
            return Err(RoomCastError::InvalidArgument(
                "publish_remote requires a remote uri source".to_string(),
            ));
        }

        self.publish(request).await
    }

    async fn subscribe(
        &self,
        request: SubscribeRequest,
    ) -> Result<SubscribeOutcome, RoomCastError> {
        self.inner.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let status = self
            .inner
            .subscribe_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Status::Ok);

        if !status.is_ok() {
            return Ok(SubscribeOutcome {
                status,
                media_stream: None,
            });
        }

        let media_stream = Arc::new(StubSubscribedStream::new(request.stream_id));
        self.inner.subscribed.lock().unwrap().push(media_stream.clone());

        Ok(SubscribeOutcome {
            status: Status::Ok,
            media_stream: Some(media_stream),
        })
    }

    async fn subscribe_to_screen(
        &self,
        request: SubscribeRequest,
    ) -> Result<SubscribeOutcome, RoomCastError> {
        self.subscribe(request).await
    }

    fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.inner.connectivity_tx.subscribe()
    }

    async fn wait_for_online(&self) -> Result<(), RoomCastError> {
        let mut connectivity = self.inner.connectivity_tx.subscribe();

        while !connectivity.borrow().is_online() {
            connectivity
                .changed()
                .await
                .map_err(|_| RoomCastError::transport("engine dropped"))?;
        }

        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        match &*self.inner.connectivity_tx.borrow() {
            Connectivity::Online { session_id } => Some(session_id.clone()),
            Connectivity::Offline => None,
        }
    }
}

#[async_trait]
impl RoomTransport for StubEngine {
    async fn create_session(&self) -> Result<Arc<dyn RoomSession>, RoomCastError> {
        let session = Arc::new(StubRoomSession::new(self.clone()));
        self.inner.sessions.lock().unwrap().push(session.clone());

        Ok(session)
    }
}

/// One transport room session against the shared stub state.
pub struct StubRoomSession {
    engine: StubEngine,
    session_id: String,
    self_member: Mutex<Option<Member>>,
    active_room_tx: watch::Sender<Option<Room>>,
    commit_script: Mutex<VecDeque<Status>>,
    commit_calls: AtomicU64,
    fail_next_leave: AtomicBool,
}

impl StubRoomSession {
    fn new(engine: StubEngine) -> Self {
        let (active_room_tx, _) = watch::channel(None);

        Self {
            engine,
            session_id: Uuid::new_v4().to_string(),
            self_member: Mutex::new(None),
            active_room_tx,
            commit_script: Mutex::new(VecDeque::new()),
            commit_calls: AtomicU64::new(0),
            fail_next_leave: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queues statuses returned by the next commit_self calls, oldest first.
    pub fn script_commit_statuses(&self, statuses: impl IntoIterator<Item = Status>) {
        self.commit_script.lock().unwrap().extend(statuses);
    }

    pub fn commit_call_count(&self) -> u64 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Makes the next leave_room fail at the transport.
    pub fn fail_next_leave(&self) {
        self.fail_next_leave.store(true, Ordering::SeqCst);
    }

    /// Replaces the active room handle with a fresh one (new members
    /// channel), the way a transport reconnect would.
    pub fn simulate_room_handle_change(&self) {
        let room_id = match &*self.active_room_tx.borrow() {
            Some(room) => room.room_id.clone(),
            None => return,
        };

        let mut rooms = self.engine.inner.rooms.lock().unwrap();
        let Some(room) = rooms.get_mut(&room_id) else {
            return;
        };

        let members = room.members_tx.borrow().clone();
        let (members_tx, _) = watch::channel(members);
        room.members_tx = members_tx;

        let handle = room.handle(&room_id);
        drop(rooms);

        self.active_room_tx.send_replace(Some(handle));
    }

    fn remove_self_from_room(&self, room_id: &str) {
        let rooms = self.engine.inner.rooms.lock().unwrap();
        if let Some(room) = rooms.get(room_id) {
            room.members_tx.send_modify(|members| {
                members.retain(|member| member.session_id != self.session_id);
            });
        }
    }
}

#[async_trait]
impl RoomSession for StubRoomSession {
    fn start(&self, role: MemberRole, screen_name: &str) {
        *self.self_member.lock().unwrap() =
            Some(Member::new(screen_name, role, self.session_id.clone()));
    }

    async fn create_room(
        &self,
        options: RoomOptions,
    ) -> Result<CreateRoomOutcome, RoomCastError> {
        let mut rooms = self.engine.inner.rooms.lock().unwrap();

        let existing_id = rooms
            .iter()
            .find(|(id, room)| {
                options.room_id.as_deref() == Some(id.as_str())
                    || (options.alias.is_some() && room.options.alias == options.alias)
            })
            .map(|(id, _)| id.clone());

        if let Some(room_id) = existing_id {
            let room = &rooms[&room_id];
            info!(room_id = %room_id, "Stub room already exists");

            return Ok(CreateRoomOutcome {
                status: Status::AlreadyExists,
                room: Some(room.description(&room_id)),
            });
        }

        let room_id = options.room_id.clone().unwrap_or_else(|| {
            let n = self.engine.inner.next_room_id.fetch_add(1, Ordering::SeqCst);
            format!("room-{n}")
        });
        let (members_tx, _) = watch::channel(Vec::new());
        let room = StubRoom {
            options,
            members_tx,
        };
        let description = room.description(&room_id);

        rooms.insert(room_id.clone(), room);
        info!(room_id = %room_id, "Stub room created");

        Ok(CreateRoomOutcome {
            status: Status::Ok,
            room: Some(description),
        })
    }

    async fn enter_room(
        &self,
        room_id: Option<&str>,
        alias: Option<&str>,
    ) -> Result<RoomOutcome, RoomCastError> {
        let rooms = self.engine.inner.rooms.lock().unwrap();

        let found = rooms.iter().find(|(id, room)| {
            room_id == Some(id.as_str())
                || (alias.is_some() && room.options.alias.as_deref() == alias)
        });

        let Some((room_id, room)) = found else {
            return Ok(RoomOutcome {
                status: Status::NotFound,
                room: None,
            });
        };

        let already_in_room = self
            .active_room_tx
            .borrow()
            .as_ref()
            .is_some_and(|active| active.room_id == *room_id);

        if let Some(member) = self.self_member.lock().unwrap().clone() {
            room.members_tx.send_modify(|members| {
                if !members.iter().any(|m| m.session_id == member.session_id) {
                    members.push(member);
                }
            });
        }

        let handle = room.handle(room_id);
        self.active_room_tx.send_replace(Some(handle.clone()));

        Ok(RoomOutcome {
            status: if already_in_room {
                Status::AlreadyInRoom
            } else {
                Status::Ok
            },
            room: Some(handle),
        })
    }

    async fn leave_room(&self) -> Result<Status, RoomCastError> {
        if self.fail_next_leave.swap(false, Ordering::SeqCst) {
            return Err(RoomCastError::transport("leave request lost"));
        }

        let room_id = match &*self.active_room_tx.borrow() {
            Some(room) => room.room_id.clone(),
            None => return Ok(Status::NotInRoom),
        };

        self.remove_self_from_room(&room_id);
        self.active_room_tx.send_replace(None);

        Ok(Status::Ok)
    }

    fn stop(&self, reason: &str) {
        let room_id = match &*self.active_room_tx.borrow() {
            Some(room) => room.room_id.clone(),
            None => return,
        };

        debug!(room_id = %room_id, reason = %reason, "Stub room session stopped");

        self.remove_self_from_room(&room_id);
        self.active_room_tx.send_replace(None);
    }

    fn observable_active_room(&self) -> watch::Receiver<Option<Room>> {
        self.active_room_tx.subscribe()
    }

    fn self_member(&self) -> Option<Member> {
        self.self_member.lock().unwrap().clone()
    }

    fn set_self_streams(&self, streams: Vec<crate::stream::StreamDescriptor>) {
        if let Some(member) = self.self_member.lock().unwrap().as_mut() {
            member.streams = streams;
        }
    }

    fn set_self_role(&self, role: MemberRole) {
        if let Some(member) = self.self_member.lock().unwrap().as_mut() {
            member.role = role;
        }
    }

    async fn commit_self(&self) -> Result<Status, RoomCastError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.commit_script.lock().unwrap().pop_front();
        if let Some(status) = scripted {
            if !status.is_ok() {
                return Ok(status);
            }
        }

        let room_id = match &*self.active_room_tx.borrow() {
            Some(room) => room.room_id.clone(),
            None => return Ok(Status::NotInRoom),
        };

        let member = match self.self_member.lock().unwrap().clone() {
            Some(member) => member,
            None => return Ok(Status::Failed),
        };

        let rooms = self.engine.inner.rooms.lock().unwrap();
        let Some(room) = rooms.get(&room_id) else {
            return Ok(Status::NotInRoom);
        };

        room.members_tx.send_modify(|members| {
            match members
                .iter_mut()
                .find(|m| m.session_id == member.session_id)
            {
                Some(existing) => *existing = member.clone(),
                None => members.push(member.clone()),
            }
        });

        Ok(Status::Ok)
    }
}

/// Live stub publisher; tests flip track states through it.
pub struct StubPublisher {
    stream_id: String,
    stream: Mutex<Option<LocalMediaStream>>,
    track_events_tx: broadcast::Sender<TrackStateChange>,
    monitor_tx: broadcast::Sender<MonitorEvent>,
    stopped: AtomicBool,
    engine: StubEngine,
}

impl StubPublisher {
    fn new(stream_id: String, stream: Option<LocalMediaStream>, engine: StubEngine) -> Self {
        let (track_events_tx, _) = broadcast::channel(TRACK_EVENT_CAPACITY);
        let (monitor_tx, _) = broadcast::channel(TRACK_EVENT_CAPACITY);

        Self {
            stream_id,
            stream: Mutex::new(stream),
            track_events_tx,
            monitor_tx,
            stopped: AtomicBool::new(false),
            engine,
        }
    }

    /// Flips one track's enabled state and emits the change event.
    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        let mut stream = self.stream.lock().unwrap();
        let Some(stream) = stream.as_mut() else {
            return;
        };
        let Some(track) = stream.tracks.iter_mut().find(|track| track.kind == kind) else {
            return;
        };

        track.enabled = enabled;
        let _ = self.track_events_tx.send(TrackStateChange {
            track_id: track.track_id.clone(),
            kind,
            enabled,
        });
    }

    pub fn emit_monitor_event(&self, retryable: bool, reason: &str) {
        let _ = self.monitor_tx.send(MonitorEvent {
            retryable,
            reason: reason.to_string(),
        });
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for StubPublisher {
    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn stream(&self) -> Option<LocalMediaStream> {
        self.stream.lock().unwrap().clone()
    }

    fn track_events(&self) -> broadcast::Receiver<TrackStateChange> {
        self.track_events_tx.subscribe()
    }

    fn monitor_events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.monitor_tx.subscribe()
    }

    async fn retry(&self) {
        debug!(stream_id = %self.stream_id, "Stub publisher retry");
    }

    async fn stop(&self, reason: &str) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            warn!(stream_id = %self.stream_id, "Stub publisher stopped twice");
            return;
        }

        debug!(stream_id = %self.stream_id, reason = %reason, "Stub publisher stopped");
        self.engine.release_publisher(&self.stream_id);
    }
}

/// Incoming stub stream; records monitor track-state calls for assertions.
pub struct StubSubscribedStream {
    origin_stream_id: String,
    monitor_states: Mutex<Vec<(TrackKind, bool)>>,
}

impl StubSubscribedStream {
    fn new(origin_stream_id: String) -> Self {
        Self {
            origin_stream_id,
            monitor_states: Mutex::new(Vec::new()),
        }
    }

    pub fn monitor_states(&self) -> Vec<(TrackKind, bool)> {
        self.monitor_states.lock().unwrap().clone()
    }
}

impl SubscribedStream for StubSubscribedStream {
    fn origin_stream_id(&self) -> String {
        self.origin_stream_id.clone()
    }

    fn has_single_track(&self, _kind: TrackKind) -> bool {
        true
    }

    fn set_monitor_track_state(&self, kind: TrackKind, enabled: bool) {
        self.monitor_states.lock().unwrap().push((kind, enabled));
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ViewerTokenClaims {
    sub: String,
    capabilities: Vec<String>,
    additional_stream_ids: Vec<String>,
    requester: String,
    exp: usize,
    iat: usize,
}

/// Records one issuance request made against the stub issuer.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedTokenRequest {
    pub requester_pattern: String,
    pub capabilities: Vec<String>,
    pub stream_id: String,
    pub additional_stream_ids: Vec<String>,
}

/// Token issuer minting short-lived JWTs, with scriptable failures.
pub struct StubTokenIssuer {
    secret: String,
    requests: Mutex<Vec<IssuedTokenRequest>>,
    fail_on_capability: Mutex<Option<String>>,
}

impl StubTokenIssuer {
    pub fn new() -> Self {
        Self {
            secret: "stub-viewer-token-secret".to_string(),
            requests: Mutex::new(Vec::new()),
            fail_on_capability: Mutex::new(None),
        }
    }

    /// Makes any issuance that asks for the given capability fail.
    pub fn fail_on_capability(&self, capability: &str) {
        *self.fail_on_capability.lock().unwrap() = Some(capability.to_string());
    }

    pub fn requests(&self) -> Vec<IssuedTokenRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for StubTokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenIssuer for StubTokenIssuer {
    async fn create_stream_token_for_subscribing(
        &self,
        requester_pattern: &str,
        capabilities: &[String],
        stream_id: &str,
        additional_stream_ids: &[String],
    ) -> Result<TokenGrant, RoomCastError> {
        self.requests.lock().unwrap().push(IssuedTokenRequest {
            requester_pattern: requester_pattern.to_string(),
            capabilities: capabilities.to_vec(),
            stream_id: stream_id.to_string(),
            additional_stream_ids: additional_stream_ids.to_vec(),
        });

        let failing = self.fail_on_capability.lock().unwrap().clone();
        if let Some(capability) = failing {
            if capabilities.iter().any(|c| *c == capability) {
                return Ok(TokenGrant {
                    status: Status::Failed,
                    stream_token: None,
                });
            }
        }

        let now = Utc::now();
        let claims = ViewerTokenClaims {
            sub: stream_id.to_string(),
            capabilities: capabilities.to_vec(),
            additional_stream_ids: additional_stream_ids.to_vec(),
            requester: requester_pattern.to_string(),
            exp: (now + ChronoDuration::minutes(10)).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )
        .map_err(|e| RoomCastError::transport(format!("token encoding failed: {e}")))?;

        Ok(TokenGrant {
            status: Status::Ok,
            stream_token: Some(token),
        })
    }
}
