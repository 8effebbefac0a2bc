use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tokio::sync::watch;

use crate::stream::{StreamDescriptor, TrackKind, TrackState};

/// Kind of room, as understood by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RoomType {
    Channel,
    ModeratedChat,
    MultiPartyChat,
    TownHall,
    DirectChat,
}

impl RoomType {
    /// Description substituted when the caller creates a room without one.
    pub fn default_description(self) -> &'static str {
        match self {
            RoomType::Channel => "Room Channel",
            RoomType::ModeratedChat => "Moderated Chat",
            RoomType::MultiPartyChat => "Multi Party Chat",
            RoomType::TownHall => "Town Hall",
            RoomType::DirectChat => "Direct Chat",
        }
    }
}

/// Role a member holds inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum MemberRole {
    Audience,
    Participant,
    Presenter,
    Moderator,
}

/// One room member: self as committed locally, or a read-only observation of
/// a remote participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub screen_name: String,
    pub role: MemberRole,
    pub session_id: String,
    pub streams: Vec<StreamDescriptor>,
}

impl Member {
    pub fn new(screen_name: impl Into<String>, role: MemberRole, session_id: impl Into<String>) -> Self {
        Self {
            screen_name: screen_name.into(),
            role,
            session_id: session_id.into(),
            streams: Vec::new(),
        }
    }

    /// The member stream carrying the given transport-stream id, if any.
    pub fn stream_by_id(&self, stream_id: &str) -> Option<&StreamDescriptor> {
        self.streams
            .iter()
            .find(|stream| stream.stream_id().as_deref() == Some(stream_id))
    }

    /// Sets the audio or video state of the stream with the given id.
    /// Returns false when no such stream exists anymore.
    pub fn set_stream_track_state(
        &mut self,
        stream_id: &str,
        kind: TrackKind,
        state: TrackState,
    ) -> bool {
        let Some(stream) = self
            .streams
            .iter_mut()
            .find(|stream| stream.stream_id().as_deref() == Some(stream_id))
        else {
            return false;
        };

        match kind {
            TrackKind::Audio => stream.audio_state = state,
            TrackKind::Video => stream.video_state = state,
        }

        true
    }
}

/// Non-owning handle to a room living in the media engine.
///
/// A reconnect can replace the engine-side room; a replacement arrives as a
/// whole new `Room` value (with a fresh members channel) through the
/// session's active-room observable.
#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: String,
    pub alias: Option<String>,
    pub room_type: RoomType,
    members: watch::Receiver<Vec<Member>>,
}

impl Room {
    pub fn new(
        room_id: impl Into<String>,
        alias: Option<String>,
        room_type: RoomType,
        members: watch::Receiver<Vec<Member>>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            alias,
            room_type,
            members,
        }
    }

    /// Subscribe-able view of the member list.
    pub fn members(&self) -> watch::Receiver<Vec<Member>> {
        self.members.clone()
    }

    /// Current member list snapshot.
    pub fn members_snapshot(&self) -> Vec<Member> {
        self.members.borrow().clone()
    }

    /// Whether this handle matches a lookup by id or alias.
    pub fn matches(&self, room_id: Option<&str>, alias: Option<&str>) -> bool {
        let id_match = room_id.is_some_and(|id| id == self.room_id);
        let alias_match = alias.is_some_and(|a| Some(a) == self.alias.as_deref());

        id_match || alias_match
    }
}

/// Immutable description of a room as returned by `create_room`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDescription {
    pub room_id: String,
    pub alias: Option<String>,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamType;

    #[test]
    fn room_type_parses_kebab_case_wire_names() {
        assert_eq!(
            "multi-party-chat".parse::<RoomType>().unwrap(),
            RoomType::MultiPartyChat
        );
        assert_eq!(RoomType::TownHall.to_string(), "town-hall");
        assert!("lecture-hall".parse::<RoomType>().is_err());
    }

    #[test]
    fn member_track_state_updates_only_existing_streams() {
        let mut member = Member::new("alice", MemberRole::Presenter, "session-1");
        member
            .streams
            .push(StreamDescriptor::new("cast://stream-1", StreamType::User));

        assert!(member.set_stream_track_state(
            "stream-1",
            TrackKind::Video,
            TrackState::TrackDisabled
        ));
        assert_eq!(member.streams[0].video_state, TrackState::TrackDisabled);
        assert_eq!(member.streams[0].audio_state, TrackState::TrackEnabled);

        assert!(!member.set_stream_track_state(
            "stream-2",
            TrackKind::Audio,
            TrackState::TrackDisabled
        ));
    }

    #[test]
    fn room_matches_by_id_or_alias() {
        let (_tx, rx) = watch::channel(Vec::new());
        let room = Room::new("room-1", Some("lobby".to_string()), RoomType::MultiPartyChat, rx);

        assert!(room.matches(Some("room-1"), None));
        assert!(room.matches(None, Some("lobby")));
        assert!(room.matches(Some("other"), Some("lobby")));
        assert!(!room.matches(Some("other"), Some("main")));
        assert!(!room.matches(None, None));
    }
}
