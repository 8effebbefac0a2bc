use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::service::RoomPublisher;
use crate::engine::{LocalMediaStream, MediaConstraints, MediaSource};
use crate::room::models::MemberRole;
use crate::room::service::RoomSessionHandle;
use crate::room::types::CreateRoomRequest;
use crate::shared::{RoomCastError, Status};
use crate::stream::StreamType;

/// How viewer tokens should select among replicas of the same content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ViewerStreamSelectionStrategy {
    MostRecent,
    HighAvailability,
}

/// The media source of a publish; exactly one variant must be given.
#[derive(Debug, Clone, Default)]
pub struct PublishMedia {
    /// Externally hosted stream the backend should pull.
    pub stream_uri: Option<String>,
    /// Capture constraints for engine-acquired media.
    pub media_constraints: Option<MediaConstraints>,
    /// Pre-acquired local media stream.
    pub user_media_stream: Option<LocalMediaStream>,
}

impl PublishMedia {
    /// The single configured source, or a validation error when zero or more
    /// than one is given.
    pub fn into_source(self) -> Result<MediaSource, RoomCastError> {
        let given = usize::from(self.stream_uri.is_some())
            + usize::from(self.media_constraints.is_some())
            + usize::from(self.user_media_stream.is_some());

        if given != 1 {
            return Err(RoomCastError::InvalidArgument(format!(
                "exactly one media source required, got {given}"
            )));
        }

        if let Some(uri) = self.stream_uri {
            return Ok(MediaSource::RemoteUri(uri));
        }
        if let Some(constraints) = self.media_constraints {
            return Ok(MediaSource::Constraints(constraints));
        }

        Ok(MediaSource::MediaStream(
            self.user_media_stream.expect("one source checked above"),
        ))
    }
}

/// Request payload for publishing into a room, creating and joining it as
/// needed.
#[derive(Debug, Clone)]
pub struct PublishToRoomRequest {
    pub room: CreateRoomRequest,
    pub member_role: MemberRole,
    pub stream_type: StreamType,
    pub media: PublishMedia,
    pub screen_name: Option<String>,
    pub capabilities: Vec<String>,
    pub tags: Vec<String>,
    /// Extra metadata entries appended to the member stream URI.
    pub stream_info: HashMap<String, String>,
    /// Overrides the configured wildcard-token default when set.
    pub enable_wildcard_tokens: Option<bool>,
    pub viewer_stream_selection_strategy: Option<ViewerStreamSelectionStrategy>,
}

impl PublishToRoomRequest {
    pub fn new(room: CreateRoomRequest, member_role: MemberRole, stream_type: StreamType) -> Self {
        Self {
            room,
            member_role,
            stream_type,
            media: PublishMedia::default(),
            screen_name: None,
            capabilities: Vec::new(),
            tags: Vec::new(),
            stream_info: HashMap::new(),
            enable_wildcard_tokens: None,
            viewer_stream_selection_strategy: None,
        }
    }

    pub fn user_media_stream(mut self, stream: LocalMediaStream) -> Self {
        self.media.user_media_stream = Some(stream);
        self
    }

    pub fn media_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.media.media_constraints = Some(constraints);
        self
    }

    pub fn stream_uri(mut self, uri: impl Into<String>) -> Self {
        self.media.stream_uri = Some(uri.into());
        self
    }

    pub fn screen_name(mut self, screen_name: impl Into<String>) -> Self {
        self.screen_name = Some(screen_name.into());
        self
    }

    pub fn capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Response for a publish-to-room attempt. Publisher and session are present
/// exactly on `ok`; remote publishes carry no session.
#[derive(Clone)]
pub struct PublishToRoomResponse {
    pub status: Status,
    pub publisher: Option<Arc<RoomPublisher>>,
    pub session: Option<Arc<RoomSessionHandle>>,
}

impl PublishToRoomResponse {
    pub(crate) fn status_only(status: Status) -> Self {
        Self {
            status,
            publisher: None,
            session: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_media_source_is_enforced() {
        let none = PublishMedia::default();
        assert!(none.into_source().is_err());

        let both = PublishMedia {
            stream_uri: Some("rtmp://example.com/live".to_string()),
            media_constraints: Some(MediaConstraints::default()),
            user_media_stream: None,
        };
        assert!(both.into_source().is_err());

        let one = PublishMedia {
            stream_uri: Some("rtmp://example.com/live".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            one.into_source().unwrap(),
            MediaSource::RemoteUri(_)
        ));
    }
}
