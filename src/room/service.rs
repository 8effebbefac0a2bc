use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::models::{Member, MemberRole, Room, RoomType};
use super::types::{
    CreateRoomRequest, CreateRoomResponse, JoinRoomRequest, JoinRoomResponse,
    MembersChangedCallback,
};
use crate::disposable::{Disposable, DisposableSet};
use crate::engine::{MediaEngine, RoomOptions, RoomSession, RoomTransport, TokenIssuer};
use crate::member::reconcile_self_streams;
use crate::publish::registry::PublisherRegistry;
use crate::retry::commit_self_with_retry;
use crate::shared::{RoomCastError, Status};
use crate::stream::{uri, StreamDescriptor};
use crate::token::WildcardTokenManager;

/// The room join/create/leave state machine.
///
/// Owns the active-session table (keyed by generated ids) and the membership
/// subscription per room, reconciles "join fresh" against "already in room",
/// and resets every session when the transport changes identity underneath.
pub struct RoomSessionController {
    inner: Arc<ControllerInner>,
}

pub(crate) struct ControllerInner {
    engine: Arc<dyn MediaEngine>,
    transport: Arc<dyn RoomTransport>,
    token_manager: WildcardTokenManager,
    registry: Arc<PublisherRegistry>,
    sessions: Mutex<HashMap<String, Arc<RoomSessionHandle>>>,
    member_subscriptions: Mutex<HashMap<String, Disposable>>,
    disposables: DisposableSet,
    disposed: AtomicBool,
}

impl RoomSessionController {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        transport: Arc<dyn RoomTransport>,
        token_issuer: Arc<dyn TokenIssuer>,
        registry: Arc<PublisherRegistry>,
    ) -> Self {
        let inner = Arc::new(ControllerInner {
            engine: engine.clone(),
            transport,
            token_manager: WildcardTokenManager::new(token_issuer),
            registry,
            sessions: Mutex::new(HashMap::new()),
            member_subscriptions: Mutex::new(HashMap::new()),
            disposables: DisposableSet::new(),
            disposed: AtomicBool::new(false),
        });

        inner.clone().spawn_transport_reset_watcher();

        Self { inner }
    }

    /// Creates a room at the transport. The returned room is immutable and
    /// the caller is NOT a member of it; the session used for creation is
    /// stopped before the response is delivered.
    #[instrument(skip(self, request), fields(room_name = %request.name))]
    pub async fn create_room(
        &self,
        request: CreateRoomRequest,
    ) -> Result<CreateRoomResponse, RoomCastError> {
        if request.name.trim().is_empty() {
            return Err(RoomCastError::InvalidArgument(
                "room name must not be empty".to_string(),
            ));
        }

        let room_type: RoomType = request
            .room_type
            .parse()
            .map_err(|_| RoomCastError::UnsupportedRoomType(request.room_type.clone()))?;

        if request
            .description
            .as_ref()
            .is_some_and(|description| description.trim().is_empty())
        {
            return Err(RoomCastError::InvalidArgument(
                "room description must not be empty when given".to_string(),
            ));
        }

        let description = request
            .description
            .clone()
            .unwrap_or_else(|| room_type.default_description().to_string());

        let (handle, _) = self.inner.clone().create_room_session(None, None).await?;

        let result = handle
            .session()
            .create_room(RoomOptions {
                name: request.name,
                room_type,
                description,
                room_id: request.room_id,
                alias: request.alias,
            })
            .await;

        // Creation does not imply membership; never leave this session active.
        handle.stop("create");

        let outcome = result?;

        Ok(CreateRoomResponse {
            status: outcome.status,
            room: outcome.room,
        })
    }

    /// Joins a room, reusing the session already active for the target when
    /// one exists. With a members-changed callback the caller gets an
    /// immediate snapshot and automatic resubscription whenever the active
    /// room handle is replaced.
    #[instrument(skip_all, fields(room_id = ?request.room_id, alias = ?request.alias))]
    pub async fn join_room(
        &self,
        request: JoinRoomRequest,
        members_changed: Option<MembersChangedCallback>,
    ) -> Result<JoinRoomResponse, RoomCastError> {
        if request
            .screen_name
            .as_ref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(RoomCastError::InvalidArgument(
                "screen name must not be empty when given".to_string(),
            ));
        }

        self.inner
            .clone()
            .join_room_with_options(request, members_changed)
            .await
    }

    /// Stops every session and subscription owned by this controller.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);

        let subscriptions =
            std::mem::take(&mut *self.inner.member_subscriptions.lock().unwrap());
        for (_, subscription) in subscriptions {
            subscription.dispose();
        }

        let sessions = std::mem::take(&mut *self.inner.sessions.lock().unwrap());
        for (_, handle) in sessions {
            handle.session().stop("dispose");
        }

        self.inner.disposables.dispose();

        info!("Disposed room session controller");
    }

    pub fn registry(&self) -> Arc<PublisherRegistry> {
        self.inner.registry.clone()
    }

    /// The session whose active room matches the given id/alias, if any.
    pub fn find_active_session(
        &self,
        room_id: Option<&str>,
        alias: Option<&str>,
    ) -> Option<Arc<RoomSessionHandle>> {
        self.inner.find_active_session(room_id, alias)
    }

    /// Reconciles a publisher stream (or its removal, when `None`) into the
    /// self-stream set and commits it, entering the room first when no
    /// session is active there anymore.
    pub(crate) async fn commit_publisher_stream(
        &self,
        room: &Room,
        publisher_stream: Option<StreamDescriptor>,
        role: MemberRole,
        join_request: JoinRoomRequest,
    ) -> Result<JoinRoomResponse, RoomCastError> {
        let streams = self
            .inner
            .map_publisher_stream_to_member_streams(publisher_stream.as_ref(), room);
        let role = if streams.is_empty() {
            MemberRole::Audience
        } else {
            role
        };

        self.inner
            .clone()
            .update_self_and_enter_room_if_necessary(room, streams, role, join_request)
            .await
    }
}

impl ControllerInner {
    fn spawn_transport_reset_watcher(self: Arc<Self>) {
        let weak = Arc::downgrade(&self);
        let mut connectivity = self.engine.connectivity();

        let handle = tokio::spawn(async move {
            loop {
                if connectivity.changed().await.is_err() {
                    break;
                }

                if connectivity.borrow_and_update().is_online() {
                    continue;
                }

                let Some(inner) = weak.upgrade() else {
                    break;
                };

                inner.reset_after_transport_change().await;
            }
        });

        self.disposables.add_task(handle);
    }

    /// Transport went offline: membership subscriptions die immediately, and
    /// every session that was active gets force-stopped once the transport is
    /// back, so nothing straddles an engine identity change.
    async fn reset_after_transport_change(&self) {
        info!("Resetting room sessions after change in transport");

        let subscriptions = std::mem::take(&mut *self.member_subscriptions.lock().unwrap());
        for (_, subscription) in subscriptions {
            subscription.dispose();
        }

        let sessions = std::mem::take(&mut *self.sessions.lock().unwrap());

        if self.engine.wait_for_online().await.is_err() {
            warn!("Transport gone while waiting to reset room sessions");
        }

        for (_, handle) in sessions {
            handle.session().stop("pcast-change");
        }
    }

    pub(crate) fn find_active_session(
        &self,
        room_id: Option<&str>,
        alias: Option<&str>,
    ) -> Option<Arc<RoomSessionHandle>> {
        if room_id.is_none() && alias.is_none() {
            return None;
        }

        self.sessions
            .lock()
            .unwrap()
            .values()
            .find(|handle| {
                handle
                    .active_room()
                    .is_some_and(|room| room.matches(room_id, alias))
            })
            .cloned()
    }

    /// Reuses the active session for the target room or creates a fresh
    /// transport session keyed by a generated id.
    async fn create_room_session(
        self: Arc<Self>,
        room_id: Option<&str>,
        alias: Option<&str>,
    ) -> Result<(Arc<RoomSessionHandle>, bool), RoomCastError> {
        self.engine.wait_for_online().await?;

        if let Some(active) = self.find_active_session(room_id, alias) {
            debug!("Reusing active room session");
            return Ok((active, true));
        }

        let session = self.transport.create_session().await?;
        let key = Uuid::new_v4().to_string();
        let handle = Arc::new(RoomSessionHandle {
            key: key.clone(),
            session,
            controller: Arc::downgrade(&self),
        });

        self.sessions.lock().unwrap().insert(key, handle.clone());

        Ok((handle, false))
    }

    fn join_room_with_options(
        self: Arc<Self>,
        request: JoinRoomRequest,
        members_changed: Option<MembersChangedCallback>,
    ) -> BoxFuture<'static, Result<JoinRoomResponse, RoomCastError>> {
        Box::pin(async move {
            let (handle, _) = self
                .clone()
                .create_room_session(request.room_id.as_deref(), request.alias.as_deref())
                .await?;
            let active_room = handle.active_room();
            let screen_name = request
                .screen_name
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            if active_room.is_none() {
                handle.session().start(request.role, &screen_name);
            }

            let mut request = request;

            if !request.streams.is_empty() {
                let mut stream = request.streams[0].clone();
                let wildcard = request.wildcard_capabilities.is_some();

                if wildcard && !stream.uri.starts_with(uri::CAST_PREFIX) {
                    // Externally published: bring the id under the canonical
                    // scheme and vouch for it in the registry.
                    stream.uri = format!("{}{}", uri::CAST_PREFIX, stream.uri);
                    self.registry.register_external_uri(stream.bare_uri());
                    request.streams[0] = stream.clone();
                }

                let has_token = stream.has_any_token();

                if wildcard && active_room.is_some() && !has_token {
                    let room = active_room.clone().expect("checked above");
                    let response = self
                        .clone()
                        .create_viewer_tokens_and_update_self(
                            request.wildcard_capabilities.clone().unwrap_or_default(),
                            stream,
                            &room,
                            request.clone(),
                        )
                        .await?;

                    if let Some(callback) = members_changed {
                        self.setup_members_subscription(&handle, callback);
                    }

                    return Ok(JoinRoomResponse {
                        status: response.status,
                        session: Some(handle),
                    });
                }

                // Until tokens exist nobody can watch, so enter as audience;
                // the role is lifted when the tokenized stream is committed.
                let role_to_join = if wildcard && active_room.is_none() && !has_token {
                    MemberRole::Audience
                } else {
                    request.role
                };

                self.update_self_streams_and_role(&handle, request.streams.clone(), role_to_join)
                    .await?;
            }

            if active_room.is_some() {
                if let Some(callback) = members_changed {
                    self.setup_members_subscription(&handle, callback);
                }

                return Ok(JoinRoomResponse {
                    status: Status::Ok,
                    session: Some(handle),
                });
            }

            let outcome = match handle
                .session()
                .enter_room(request.room_id.as_deref(), request.alias.as_deref())
                .await
            {
                Ok(outcome) => outcome,
                Err(error) => {
                    handle.stop("enter-room-failure");
                    return Err(error);
                }
            };

            match outcome.status {
                Status::NotFound => {
                    handle.stop("enter-room-failure");
                    return Ok(JoinRoomResponse {
                        status: Status::RoomNotFound,
                        session: None,
                    });
                }
                Status::Ok | Status::AlreadyInRoom => {}
                status => {
                    handle.stop("enter-room-failure");
                    return Ok(JoinRoomResponse {
                        status,
                        session: None,
                    });
                }
            }

            let entered_status = outcome.status;
            let stream = request.streams.first().cloned();

            if let (Some(stream), Some(room), true) = (
                stream,
                outcome.room.as_ref(),
                request.wildcard_capabilities.is_some(),
            ) {
                if !stream.has_any_token() {
                    let response = self
                        .clone()
                        .create_viewer_tokens_and_update_self(
                            request.wildcard_capabilities.clone().unwrap_or_default(),
                            stream,
                            room,
                            request.clone(),
                        )
                        .await?;

                    if let Some(callback) = members_changed {
                        self.setup_members_subscription(&handle, callback);
                    }

                    return Ok(JoinRoomResponse {
                        status: response.status,
                        session: Some(handle),
                    });
                }
            }

            if let Some(callback) = members_changed {
                self.setup_members_subscription(&handle, callback);
            }

            Ok(JoinRoomResponse {
                status: entered_status,
                session: Some(handle),
            })
        })
    }

    /// Generates wildcard viewer tokens for a seeded stream, then commits the
    /// reconciled self-stream set.
    async fn create_viewer_tokens_and_update_self(
        self: Arc<Self>,
        capabilities: Vec<String>,
        mut stream: StreamDescriptor,
        room: &Room,
        join_request: JoinRoomRequest,
    ) -> Result<JoinRoomResponse, RoomCastError> {
        if stream.info().capabilities.is_none() {
            stream.append_info("capabilities", &capabilities.join(","));
        }

        let Some(stream_id) = stream.stream_id() else {
            return Err(RoomCastError::InvalidMemberStream(stream.uri));
        };

        let outcome = self
            .token_manager
            .generate(&capabilities, &stream_id, &[], stream)
            .await?;

        if !outcome.status.is_ok() {
            return Ok(JoinRoomResponse {
                status: outcome.status,
                session: None,
            });
        }

        let tokenized = outcome.stream.expect("ok outcome carries the stream");
        let role = join_request.role;
        let streams = self.map_publisher_stream_to_member_streams(Some(&tokenized), room);

        self.update_self_and_enter_room_if_necessary(room, streams, role, join_request)
            .await
    }

    /// The self-stream set after folding in a new publisher stream (or a
    /// stop, when `None`), validated against the live-publisher registry.
    pub(crate) fn map_publisher_stream_to_member_streams(
        &self,
        publisher_stream: Option<&StreamDescriptor>,
        room: &Room,
    ) -> Vec<StreamDescriptor> {
        let default_streams: Vec<StreamDescriptor> =
            publisher_stream.cloned().into_iter().collect();

        let Some(handle) =
            self.find_active_session(Some(&room.room_id), room.alias.as_deref())
        else {
            return default_streams;
        };
        let Some(self_member) = handle.session().self_member() else {
            return default_streams;
        };

        if self_member.streams.is_empty() {
            return default_streams;
        }

        reconcile_self_streams(
            &self_member.streams,
            publisher_stream,
            &self.registry.publisher_ids(&room.room_id),
            &self.registry.external_uris(),
        )
    }

    async fn update_self_streams_and_role(
        &self,
        handle: &Arc<RoomSessionHandle>,
        streams: Vec<StreamDescriptor>,
        role: MemberRole,
    ) -> Result<(), RoomCastError> {
        let role = if streams.is_empty() {
            MemberRole::Audience
        } else {
            role
        };

        handle.session().set_self_streams(streams);
        handle.session().set_self_role(role);

        if handle.active_room().is_some() {
            commit_self_with_retry(handle.session()).await?;
        }

        Ok(())
    }

    /// Commits new member state into the room the caller is already in, or
    /// enters the room carrying that state when no session is active there.
    pub(crate) fn update_self_and_enter_room_if_necessary(
        self: Arc<Self>,
        room: &Room,
        streams: Vec<StreamDescriptor>,
        role: MemberRole,
        join_request: JoinRoomRequest,
    ) -> BoxFuture<'static, Result<JoinRoomResponse, RoomCastError>> {
        let this = self;
        let room = room.clone();

        Box::pin(async move {
            if this.disposed.load(Ordering::SeqCst) {
                warn!("Unable to update self after controller disposal");
                return Ok(JoinRoomResponse {
                    status: Status::Failed,
                    session: None,
                });
            }

            let active = this.find_active_session(Some(&room.room_id), room.alias.as_deref());

            match active {
                Some(handle) if handle.active_room().is_some() => {
                    debug!(room_id = %room.room_id, "Committing member state update");

                    let role = if streams.is_empty() {
                        MemberRole::Audience
                    } else {
                        role
                    };
                    handle.session().set_self_streams(streams);
                    handle.session().set_self_role(role);

                    let status = commit_self_with_retry(handle.session()).await?;

                    Ok(JoinRoomResponse {
                        status,
                        session: Some(handle),
                    })
                }
                _ => {
                    info!(room_id = %room.room_id, "Joining room carrying member state");

                    let request = JoinRoomRequest {
                        room_id: Some(room.room_id.clone()),
                        alias: room.alias.clone(),
                        role,
                        streams,
                        ..join_request
                    };

                    this.join_room_with_options(request, None).await
                }
            }
        })
    }

    /// Forwards membership snapshots to the callback, re-attaching to the new
    /// room handle whenever the active-room reference changes, so the caller
    /// never resubscribes manually after an internal reset.
    fn setup_members_subscription(
        &self,
        handle: &Arc<RoomSessionHandle>,
        callback: MembersChangedCallback,
    ) {
        let Some(room) = handle.active_room() else {
            warn!("Unable to setup members subscription, not in room");
            return;
        };

        let room_id = room.room_id.clone();
        let mut active_rx = handle.session().observable_active_room();

        let task = tokio::spawn(async move {
            let mut members_rx: Option<watch::Receiver<Vec<Member>>> = Some(room.members());

            if let Some(rx) = &members_rx {
                callback(rx.borrow().clone());
            }

            loop {
                match &mut members_rx {
                    Some(rx) => {
                        tokio::select! {
                            changed = rx.changed() => match changed {
                                Ok(()) => {
                                    let snapshot = rx.borrow_and_update().clone();
                                    callback(snapshot);
                                }
                                // Members channel gone: the room handle was
                                // replaced, wait for the new one.
                                Err(_) => members_rx = None,
                            },
                            changed = active_rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }

                                let new_room = active_rx.borrow_and_update().clone();
                                match new_room {
                                    Some(new_room) => {
                                        let rx = new_room.members();
                                        callback(rx.borrow().clone());
                                        members_rx = Some(rx);
                                    }
                                    None => members_rx = None,
                                }
                            }
                        }
                    }
                    None => {
                        if active_rx.changed().await.is_err() {
                            break;
                        }

                        let new_room = active_rx.borrow_and_update().clone();
                        if let Some(new_room) = new_room {
                            let rx = new_room.members();
                            callback(rx.borrow().clone());
                            members_rx = Some(rx);
                        }
                    }
                }
            }
        });

        let mut subscriptions = self.member_subscriptions.lock().unwrap();
        if let Some(previous) = subscriptions.insert(room_id, Disposable::from_task(task)) {
            previous.dispose();
        }
    }

    fn dispose_members_subscription(&self, room_id: &str) {
        if let Some(subscription) = self.member_subscriptions.lock().unwrap().remove(room_id) {
            subscription.dispose();
        }
    }
}

/// One logical room session handed to callers: the transport session plus
/// the express-level teardown that keeps the controller's tables honest.
pub struct RoomSessionHandle {
    key: String,
    session: Arc<dyn RoomSession>,
    controller: Weak<ControllerInner>,
}

impl RoomSessionHandle {
    pub fn session(&self) -> &Arc<dyn RoomSession> {
        &self.session
    }

    /// Snapshot of the room this session is currently in.
    pub fn active_room(&self) -> Option<Room> {
        self.session.observable_active_room().borrow().clone()
    }

    /// Leaves the room. The membership subscription dies first; a transport
    /// failure still force-stops the local session so leaving cannot wedge
    /// on an unreachable remote.
    pub async fn leave_room(&self) -> Result<Status, RoomCastError> {
        let room = self.active_room();

        if let (Some(room), Some(inner)) = (&room, self.controller.upgrade()) {
            inner.dispose_members_subscription(&room.room_id);
        }

        match self.session.leave_room().await {
            Err(error) => {
                warn!(error = %error, "Leave failed at the transport, force-stopping locally");
                self.stop("leave-room-failure");
                Err(error)
            }
            Ok(status) if status.is_ok() || status == Status::NotInRoom => {
                info!(
                    room_id = %room.map(|r| r.room_id).unwrap_or_else(|| "uninitialized".to_string()),
                    "Left room"
                );
                self.stop("leave-room");
                Ok(status)
            }
            Ok(status) => Ok(status),
        }
    }

    /// Stops the session locally and forgets it in the controller.
    pub fn stop(&self, reason: &str) {
        if let Some(inner) = self.controller.upgrade() {
            inner.sessions.lock().unwrap().remove(&self.key);
        }

        self.session.stop(reason);
    }
}
