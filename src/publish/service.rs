use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::registry::PublisherRegistry;
use super::types::{
    PublishToRoomRequest, PublishToRoomResponse, ViewerStreamSelectionStrategy,
};
use crate::config::RoomCastConfig;
use crate::disposable::DisposableSet;
use crate::engine::{
    MediaEngine, MediaSource, PublishRequest, Publisher, TokenIssuer, TrackStateChange,
};
use crate::member::{similar_members, valid_stream_ids};
use crate::retry::commit_self_with_retry;
use crate::room::models::{MemberRole, Room, RoomType};
use crate::room::service::RoomSessionController;
use crate::room::types::{JoinRoomRequest, JoinRoomResponse};
use crate::shared::{RoomCastError, Status};
use crate::stream::{uri, StreamDescriptor, StreamType, TrackKind, TrackState};
use crate::token::WildcardTokenManager;

/// The publish lifecycle for outgoing streams: start the publish, keep the
/// room's view of the stream honest (tokens, track states), and unwind it all
/// exactly once on stop.
pub struct PublishSessionController {
    inner: Arc<PublishInner>,
}

struct PublishInner {
    engine: Arc<dyn MediaEngine>,
    room_controller: Arc<RoomSessionController>,
    token_manager: WildcardTokenManager,
    registry: Arc<PublisherRegistry>,
    config: RoomCastConfig,
    publisher_disposables: Mutex<HashMap<String, Arc<DisposableSet>>>,
}

/// Everything a republish (token refresh, member change, stop) needs to know
/// about the original publish request.
#[derive(Clone)]
struct PublishContext {
    member_role: MemberRole,
    stream_type: StreamType,
    capabilities: Vec<String>,
    stream_info: HashMap<String, String>,
    screen_name: String,
    selection_strategy: Option<ViewerStreamSelectionStrategy>,
    wildcard_enabled: bool,
}

impl PublishContext {
    fn join_request(&self, room: &Room) -> JoinRoomRequest {
        JoinRoomRequest {
            room_id: Some(room.room_id.clone()),
            alias: room.alias.clone(),
            role: self.member_role,
            screen_name: Some(self.screen_name.clone()),
            streams: Vec::new(),
            wildcard_capabilities: None,
        }
    }
}

impl PublishSessionController {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        room_controller: Arc<RoomSessionController>,
        token_issuer: Arc<dyn TokenIssuer>,
        config: RoomCastConfig,
    ) -> Self {
        let registry = room_controller.registry();

        Self {
            inner: Arc::new(PublishInner {
                engine,
                room_controller,
                token_manager: WildcardTokenManager::new(token_issuer),
                registry,
                config,
                publisher_disposables: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Publishes into a room, creating it and joining as audience first; the
    /// requested member role is committed together with the tokenized stream.
    #[instrument(skip_all, fields(room_name = %request.room.name))]
    pub async fn publish_to_room(
        &self,
        request: PublishToRoomRequest,
    ) -> Result<PublishToRoomResponse, RoomCastError> {
        let source = request.media.clone().into_source()?;

        self.inner.clone().publish_to_room_inner(request, source).await
    }

    /// Publishes a screen share; same flow with the screen constraint forced.
    pub async fn publish_screen_to_room(
        &self,
        mut request: PublishToRoomRequest,
    ) -> Result<PublishToRoomResponse, RoomCastError> {
        let mut constraints = request.media.media_constraints.take().unwrap_or_default();
        constraints.screen = true;
        request.media.media_constraints = Some(constraints);

        self.publish_to_room(request).await
    }

    /// Stops every live publisher and its bookkeeping.
    pub async fn dispose(&self) {
        let sets = std::mem::take(&mut *self.inner.publisher_disposables.lock().unwrap());
        for (_, set) in sets {
            set.dispose();
        }

        for publisher in self.inner.registry.drain_publishers() {
            publisher.stop("dispose").await;
        }

        info!("Disposed publish session controller");
    }
}

impl PublishInner {
    async fn publish_to_room_inner(
        self: Arc<Self>,
        request: PublishToRoomRequest,
        source: MediaSource,
    ) -> Result<PublishToRoomResponse, RoomCastError> {
        let screen_name = request
            .screen_name
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let create_response = self.room_controller.create_room(request.room.clone()).await?;

        if create_response.status != Status::Ok && create_response.status != Status::AlreadyExists
        {
            return Ok(PublishToRoomResponse::status_only(create_response.status));
        }

        let room_description = create_response
            .room
            .expect("create ok carries the room");

        // Tag the published stream with its room so the backend can relate
        // them; channels use their own tag vocabulary.
        let room_tag = match room_description.room_type {
            RoomType::Channel => format!("channelId:{}", room_description.room_id),
            _ => format!("roomId:{}", room_description.room_id),
        };
        let mut tags = vec![room_tag];
        tags.extend(request.tags.clone());

        let wildcard_enabled = request
            .enable_wildcard_tokens
            .unwrap_or(self.config.wildcard_tokens_enabled);

        if matches!(source, MediaSource::RemoteUri(_)) {
            return self
                .publish_remote_stream(
                    &request,
                    source,
                    tags,
                    &room_description.room_id,
                    &screen_name,
                    wildcard_enabled,
                )
                .await;
        }

        let join_response = self
            .room_controller
            .join_room(
                JoinRoomRequest {
                    room_id: Some(room_description.room_id.clone()),
                    alias: room_description.alias.clone(),
                    role: MemberRole::Audience,
                    screen_name: Some(screen_name.clone()),
                    streams: Vec::new(),
                    wildcard_capabilities: None,
                },
                None,
            )
            .await?;

        if join_response.status != Status::Ok && join_response.status != Status::AlreadyInRoom {
            return Ok(PublishToRoomResponse::status_only(join_response.status));
        }

        let session = join_response.session.expect("joined carries a session");
        let room = session
            .active_room()
            .ok_or_else(|| RoomCastError::transport("joined room but no active room handle"))?;

        let context = PublishContext {
            member_role: request.member_role,
            stream_type: request.stream_type,
            capabilities: request.capabilities.clone(),
            stream_info: request.stream_info.clone(),
            screen_name,
            selection_strategy: request.viewer_stream_selection_strategy,
            wildcard_enabled,
        };

        self.publish_and_update_self(context, source, tags, room, session)
            .await
    }

    async fn publish_remote_stream(
        &self,
        request: &PublishToRoomRequest,
        source: MediaSource,
        tags: Vec<String>,
        room_id: &str,
        screen_name: &str,
        wildcard_enabled: bool,
    ) -> Result<PublishToRoomResponse, RoomCastError> {
        let mut connect_options = vec![
            format!("room-id={room_id}"),
            format!("member-role={}", request.member_role),
            format!("member-stream-type={}", request.stream_type),
            format!("screen-name={screen_name}"),
        ];

        if wildcard_enabled {
            connect_options.push("member-stream-token-type=Wildcard".to_string());
            connect_options.push(format!(
                "member-stream-token-refresh-interval={}",
                self.config.token_refresh_interval.as_millis()
            ));
        }

        let outcome = self
            .engine
            .publish_remote(PublishRequest {
                source,
                capabilities: request.capabilities.clone(),
                tags,
                stream_info: request.stream_info.clone(),
                connect_options,
            })
            .await?;

        if !outcome.status.is_ok() {
            return Ok(PublishToRoomResponse::status_only(outcome.status));
        }

        let publisher = outcome.publisher.expect("ok publish carries a publisher");

        // The backend owns the member entry for remote publishes; nothing to
        // track locally and no room session to hand back.
        Ok(PublishToRoomResponse {
            status: Status::Ok,
            publisher: Some(Arc::new(RoomPublisher::passthrough(publisher))),
            session: None,
        })
    }

    async fn publish_and_update_self(
        self: Arc<Self>,
        context: PublishContext,
        source: MediaSource,
        tags: Vec<String>,
        room: Room,
        session: Arc<crate::room::service::RoomSessionHandle>,
    ) -> Result<PublishToRoomResponse, RoomCastError> {
        let is_screen = matches!(&source, MediaSource::Constraints(c) if c.screen);

        let mut context = context;
        if is_screen {
            context
                .stream_info
                .insert("isScreen".to_string(), "true".to_string());
        }

        let engine_request = PublishRequest {
            source,
            capabilities: context.capabilities.clone(),
            tags,
            stream_info: context.stream_info.clone(),
            connect_options: Vec::new(),
        };

        let outcome = if is_screen {
            self.engine.publish_screen(engine_request).await?
        } else {
            self.engine.publish(engine_request).await?
        };

        if !outcome.status.is_ok() {
            return Ok(PublishToRoomResponse::status_only(outcome.status));
        }

        let publisher = outcome.publisher.expect("ok publish carries a publisher");
        let stream_id = publisher.stream_id();

        // A republish under the same id replaces the earlier registration.
        self.registry.remove_publisher(&room.room_id, &stream_id);
        self.registry.add_publisher(&room.room_id, publisher.clone());

        let disposables = Arc::new(DisposableSet::new());
        self.publisher_disposables
            .lock()
            .unwrap()
            .insert(stream_id.clone(), disposables.clone());

        self.clone()
            .listen_for_track_state_changes(&publisher, &room, &disposables);
        self.listen_for_monitor_events(&publisher, &disposables);

        if context.wildcard_enabled {
            self.clone()
                .start_token_refresh_timer(&publisher, &room, &context, &disposables);
        }

        let room_publisher = Arc::new(RoomPublisher::managed(
            publisher.clone(),
            room.clone(),
            context.clone(),
            Arc::downgrade(&self),
            disposables,
        ));

        let commit = match self
            .clone()
            .create_viewer_tokens_and_commit(&context, &publisher, &room, true)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                // Release everything allocated above before the error leaves.
                room_publisher.stop("publish-setup-failure").await;
                return Err(error);
            }
        };

        Ok(PublishToRoomResponse {
            status: commit.status,
            publisher: Some(room_publisher),
            session: Some(session),
        })
    }

    /// Builds the tokenized member stream for a live publisher and commits it
    /// into the room, optionally arming the similar-member watcher that keeps
    /// high-availability tokens current.
    async fn create_viewer_tokens_and_commit(
        self: Arc<Self>,
        context: &PublishContext,
        publisher: &Arc<dyn Publisher>,
        room: &Room,
        allow_ha_watch: bool,
    ) -> Result<JoinRoomResponse, RoomCastError> {
        let mut stream = self.member_stream_for_publisher(publisher, context);
        stream.append_info("capabilities", &context.capabilities.join(","));

        let join_request = context.join_request(room);

        if !context.wildcard_enabled {
            return self
                .room_controller
                .commit_publisher_stream(room, Some(stream), context.member_role, join_request)
                .await;
        }

        let compose_ha = context.selection_strategy
            == Some(ViewerStreamSelectionStrategy::HighAvailability)
            && room.room_type == RoomType::Channel;

        let additional_stream_ids = if compose_ha {
            let self_session_id = self.self_session_id(room);
            let members = room.members_snapshot();
            valid_stream_ids(&similar_members(
                &context.screen_name,
                &self_session_id,
                &members,
            ))
        } else {
            Vec::new()
        };

        let Some(stream_id) = stream.stream_id() else {
            return Err(RoomCastError::InvalidMemberStream(stream.uri));
        };

        debug!(
            stream_id = %stream_id,
            additional = additional_stream_ids.len(),
            "Creating viewer wildcard stream tokens for published stream"
        );

        let outcome = self
            .token_manager
            .generate(
                &context.capabilities,
                &stream_id,
                &additional_stream_ids,
                stream,
            )
            .await?;

        if !outcome.status.is_ok() {
            return Ok(JoinRoomResponse {
                status: outcome.status,
                session: None,
            });
        }

        let tokenized = outcome.stream.expect("ok outcome carries the stream");

        let response = self
            .room_controller
            .commit_publisher_stream(room, Some(tokenized), context.member_role, join_request)
            .await?;

        if compose_ha && allow_ha_watch && response.status.is_ok() {
            self.watch_similar_members(
                context.clone(),
                publisher.clone(),
                room.clone(),
                additional_stream_ids,
            );
        }

        Ok(response)
    }

    /// Our own session id in the room, for excluding self from
    /// similar-member lookups.
    fn self_session_id(&self, room: &Room) -> String {
        self.room_controller
            .find_active_session(Some(&room.room_id), room.alias.as_deref())
            .and_then(|handle| handle.session().self_member())
            .map(|member| member.session_id)
            .or_else(|| self.engine.session_id())
            .unwrap_or_default()
    }

    /// Member-stream descriptor for a live publisher: canonical URI, track
    /// states from the capture, caller stream-info entries appended in a
    /// stable order.
    fn member_stream_for_publisher(
        &self,
        publisher: &Arc<dyn Publisher>,
        context: &PublishContext,
    ) -> StreamDescriptor {
        let media = publisher.stream();
        let audio_enabled = media
            .as_ref()
            .is_some_and(|m| m.track_enabled(TrackKind::Audio));
        let video_enabled = media
            .as_ref()
            .is_some_and(|m| m.track_enabled(TrackKind::Video));

        let mut descriptor = StreamDescriptor::new(
            uri::uri_for_stream_id(&publisher.stream_id()),
            context.stream_type,
        );
        descriptor.audio_state = TrackState::from_enabled(audio_enabled);
        descriptor.video_state = TrackState::from_enabled(video_enabled);

        let mut keys: Vec<&String> = context.stream_info.keys().collect();
        keys.sort();
        for key in keys {
            descriptor.append_info(key, &context.stream_info[key]);
        }

        descriptor
    }

    fn listen_for_track_state_changes(
        self: Arc<Self>,
        publisher: &Arc<dyn Publisher>,
        room: &Room,
        disposables: &Arc<DisposableSet>,
    ) {
        let mut events = publisher.track_events();
        let weak = Arc::downgrade(&self);
        let stream_id = publisher.stream_id();
        let room = room.clone();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.propagate_track_state(&room, &stream_id, event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        disposables.add_task(task);
    }

    async fn propagate_track_state(&self, room: &Room, stream_id: &str, event: TrackStateChange) {
        let Some(handle) = self
            .room_controller
            .find_active_session(Some(&room.room_id), room.alias.as_deref())
        else {
            return;
        };
        let Some(mut self_member) = handle.session().self_member() else {
            return;
        };

        let state = TrackState::from_enabled(event.enabled);

        if !self_member.set_stream_track_state(stream_id, event.kind, state) {
            warn!(
                stream_id = %stream_id,
                track_id = %event.track_id,
                "Member stream no longer exists, skipping track state update"
            );
            return;
        }

        info!(
            stream_id = %stream_id,
            track_id = %event.track_id,
            state = %state,
            "Track state changed, updating room member stream state"
        );

        handle.session().set_self_streams(self_member.streams);

        if let Err(error) = commit_self_with_retry(handle.session()).await {
            warn!(error = %error, "Unable to commit track state change");
        }
    }

    fn listen_for_monitor_events(
        &self,
        publisher: &Arc<dyn Publisher>,
        disposables: &Arc<DisposableSet>,
    ) {
        let mut events = publisher.monitor_events();
        let publisher = publisher.clone();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.retryable => {
                        info!(reason = %event.reason, "Retrying publish after monitor condition");
                        publisher.retry().await;
                    }
                    Ok(event) => {
                        warn!(reason = %event.reason, "Publisher monitor reported unrecoverable condition");
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        disposables.add_task(task);
    }

    /// Regenerates wildcard tokens on a fixed interval against the CURRENT
    /// room snapshot; membership may have changed since publish time.
    fn start_token_refresh_timer(
        self: Arc<Self>,
        publisher: &Arc<dyn Publisher>,
        room: &Room,
        context: &PublishContext,
        disposables: &Arc<DisposableSet>,
    ) {
        let interval_duration = self.config.token_refresh_interval;
        let weak = Arc::downgrade(&self);
        let publisher = publisher.clone();
        let room = room.clone();
        let context = context.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            // Consume the immediate first tick; the publish path has just
            // generated fresh tokens.
            interval.tick().await;

            loop {
                interval.tick().await;

                let Some(inner) = weak.upgrade() else {
                    break;
                };

                info!(
                    stream_id = %publisher.stream_id(),
                    interval_ms = interval_duration.as_millis() as u64,
                    "Wildcard viewer token refresh interval elapsed, creating new tokens"
                );

                let current_room = inner
                    .room_controller
                    .find_active_session(Some(&room.room_id), room.alias.as_deref())
                    .and_then(|handle| handle.active_room())
                    .unwrap_or_else(|| room.clone());

                match inner
                    .clone()
                    .create_viewer_tokens_and_commit(&context, &publisher, &current_room, false)
                    .await
                {
                    Ok(response) if response.status.is_ok() => {}
                    Ok(response) => {
                        warn!(status = %response.status, "Wildcard token refresh was rejected");
                    }
                    Err(error) => {
                        warn!(error = %error, "Wildcard token refresh failed");
                    }
                }
            }
        });

        disposables.add_task(task);
    }

    /// Regenerates high-availability tokens whenever the set of members
    /// publishing the same content changes, for as long as the stream is
    /// still part of self.
    fn watch_similar_members(
        self: Arc<Self>,
        context: PublishContext,
        publisher: Arc<dyn Publisher>,
        room: Room,
        mut current_ids: Vec<String>,
    ) {
        let weak = Arc::downgrade(&self);
        let stream_id = publisher.stream_id();
        let disposable_key = publisher.stream_id();
        let mut members_rx = room.members();

        let task = tokio::spawn(async move {
            loop {
                if members_rx.changed().await.is_err() {
                    break;
                }

                let Some(inner) = weak.upgrade() else {
                    break;
                };

                let still_published = inner
                    .room_controller
                    .find_active_session(Some(&room.room_id), room.alias.as_deref())
                    .and_then(|handle| handle.session().self_member())
                    .is_some_and(|member| member.stream_by_id(&stream_id).is_some());

                if !still_published {
                    break;
                }

                let members = members_rx.borrow_and_update().clone();
                let self_session_id = inner.self_session_id(&room);
                let new_ids = valid_stream_ids(&similar_members(
                    &context.screen_name,
                    &self_session_id,
                    &members,
                ));

                let unchanged = new_ids.len() == current_ids.len()
                    && new_ids.iter().all(|id| current_ids.contains(id));
                if unchanged {
                    continue;
                }

                debug!(
                    stream_id = %stream_id,
                    "Members with similar content changed, generating new wildcard viewer tokens"
                );
                current_ids = new_ids;

                match inner
                    .clone()
                    .create_viewer_tokens_and_commit(&context, &publisher, &room, false)
                    .await
                {
                    Ok(response) if response.status.is_ok() => {}
                    Ok(response) => {
                        warn!(status = %response.status, "Token regeneration after member change rejected");
                    }
                    Err(error) => {
                        warn!(error = %error, "Token regeneration after member change failed");
                    }
                }
            }
        });

        if let Some(set) = self
            .publisher_disposables
            .lock()
            .unwrap()
            .get(&disposable_key)
        {
            set.add_task(task);
        }
    }
}

/// Caller-facing publisher: the engine handle plus the room-side cleanup the
/// engine knows nothing about. Explicit wrapper; the engine's object is never
/// mutated.
pub struct RoomPublisher {
    publisher: Arc<dyn Publisher>,
    managed: Option<ManagedPublish>,
    stopped: AtomicBool,
}

struct ManagedPublish {
    room: Room,
    context: PublishContext,
    controller: Weak<PublishInner>,
    disposables: Arc<DisposableSet>,
}

impl RoomPublisher {
    fn passthrough(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            managed: None,
            stopped: AtomicBool::new(false),
        }
    }

    fn managed(
        publisher: Arc<dyn Publisher>,
        room: Room,
        context: PublishContext,
        controller: Weak<PublishInner>,
        disposables: Arc<DisposableSet>,
    ) -> Self {
        Self {
            publisher,
            managed: Some(ManagedPublish {
                room,
                context,
                controller,
                disposables,
            }),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn stream_id(&self) -> String {
        self.publisher.stream_id()
    }

    pub fn engine_publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stops the publish and unwinds its room-side state: timers and
    /// listeners die first, the registry forgets the stream, the engine
    /// publisher stops, and the reduced self-stream set is committed when a
    /// session is still active for the room. Calling this twice is a no-op
    /// the second time.
    pub async fn stop(&self, reason: &str) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!(stream_id = %self.stream_id(), "Publisher already stopped");
            return;
        }

        let Some(managed) = &self.managed else {
            self.publisher.stop(reason).await;
            return;
        };

        let stream_id = self.stream_id();

        managed.disposables.dispose();

        if let Some(inner) = managed.controller.upgrade() {
            inner.publisher_disposables.lock().unwrap().remove(&stream_id);
            inner
                .registry
                .remove_publisher(&managed.room.room_id, &stream_id);
        }

        self.publisher.stop(reason).await;

        let Some(inner) = managed.controller.upgrade() else {
            return;
        };

        if inner
            .room_controller
            .find_active_session(Some(&managed.room.room_id), managed.room.alias.as_deref())
            .is_none()
        {
            return;
        }

        let join_request = managed.context.join_request(&managed.room);

        if let Err(error) = inner
            .room_controller
            .commit_publisher_stream(
                &managed.room,
                None,
                managed.context.member_role,
                join_request,
            )
            .await
        {
            warn!(error = %error, stream_id = %stream_id, "Unable to update self after publisher stop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stub::{StubEngine, StubTokenIssuer};
    use crate::engine::{LocalMediaStream, Track};
    use crate::room::types::CreateRoomRequest;

    fn stack(engine: &StubEngine) -> (Arc<RoomSessionController>, PublishSessionController) {
        let issuer = Arc::new(StubTokenIssuer::new());
        let room_controller = Arc::new(RoomSessionController::new(
            Arc::new(engine.clone()),
            Arc::new(engine.clone()),
            issuer.clone(),
            Arc::new(PublisherRegistry::new()),
        ));
        let publish_controller = PublishSessionController::new(
            Arc::new(engine.clone()),
            room_controller.clone(),
            issuer,
            RoomCastConfig::new(),
        );

        (room_controller, publish_controller)
    }

    fn camera_stream() -> LocalMediaStream {
        LocalMediaStream {
            stream_id: "local-camera".to_string(),
            tracks: vec![
                Track {
                    track_id: "audio-1".to_string(),
                    kind: TrackKind::Audio,
                    enabled: true,
                },
                Track {
                    track_id: "video-1".to_string(),
                    kind: TrackKind::Video,
                    enabled: false,
                },
            ],
        }
    }

    fn request() -> PublishToRoomRequest {
        PublishToRoomRequest::new(
            CreateRoomRequest {
                name: "Test123".to_string(),
                room_type: "multi-party-chat".to_string(),
                description: None,
                room_id: None,
                alias: None,
            },
            MemberRole::Presenter,
            StreamType::User,
        )
    }

    #[tokio::test]
    async fn publish_without_a_media_source_fails_fast() {
        let engine = StubEngine::new();
        let (_, publish) = stack(&engine);

        let result = publish.publish_to_room(request()).await;

        assert!(matches!(result, Err(RoomCastError::InvalidArgument(_))));
        // Nothing was created at the transport.
        assert!(engine.live_publisher_ids().is_empty());
    }

    #[tokio::test]
    async fn member_stream_mirrors_the_capture_track_states() {
        let engine = StubEngine::new();
        let (_, publish) = stack(&engine);

        let response = publish
            .publish_to_room(request().user_media_stream(camera_stream()))
            .await
            .unwrap();

        assert_eq!(response.status, Status::Ok);
        let publisher = response.publisher.unwrap();
        let session = response.session.unwrap();

        let member = session.session().self_member().unwrap();
        assert_eq!(member.role, MemberRole::Presenter);
        assert_eq!(member.streams.len(), 1);

        let stream = &member.streams[0];
        assert_eq!(stream.stream_id().as_deref(), Some(publisher.stream_id().as_str()));
        assert_eq!(stream.audio_state, TrackState::TrackEnabled);
        assert_eq!(stream.video_state, TrackState::TrackDisabled);
        // Wildcard mode embedded the always-issued token pair.
        assert!(stream.token(crate::stream::TokenField::RealTime).is_some());
        assert!(stream.token(crate::stream::TokenField::Broadcast).is_some());
    }

    #[tokio::test]
    async fn remote_publish_skips_room_membership() {
        let engine = StubEngine::new();
        let (room_controller, publish) = stack(&engine);

        let response = publish
            .publish_to_room(request().stream_uri("rtmp://origin.example.com/live"))
            .await
            .unwrap();

        assert_eq!(response.status, Status::Ok);
        assert!(response.session.is_none());
        assert!(room_controller.find_active_session(Some("room-1"), None).is_none());
    }

    #[tokio::test]
    async fn stopping_twice_unwinds_exactly_once() {
        let engine = StubEngine::new();
        let (room_controller, publish) = stack(&engine);

        let response = publish
            .publish_to_room(request().user_media_stream(camera_stream()))
            .await
            .unwrap();
        let publisher = response.publisher.unwrap();
        let session = response.session.unwrap();
        let room_id = session.active_room().unwrap().room_id;

        assert_eq!(room_controller.registry().publisher_count(&room_id), 1);

        publisher.stop("done").await;
        publisher.stop("done").await;

        assert!(publisher.is_stopped());
        assert_eq!(room_controller.registry().publisher_count(&room_id), 0);
        assert!(engine.live_publisher_ids().is_empty());

        // Zero streams left: the member fell back to audience.
        let member = session.session().self_member().unwrap();
        assert!(member.streams.is_empty());
        assert_eq!(member.role, MemberRole::Audience);
    }
}
