use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::uri;

/// Kind of content a member stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum StreamType {
    User,
    Screen,
}

/// Enabled/disabled state of one media track, as published to the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum TrackState {
    TrackEnabled,
    TrackDisabled,
}

impl TrackState {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            TrackState::TrackEnabled
        } else {
            TrackState::TrackDisabled
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// The wildcard viewer token variants a published stream can carry, each
/// denormalized into its own query parameter of the stream URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenField {
    RealTime,
    Broadcast,
    LiveStream,
    DrmOpenAccess,
    DrmHollywood,
}

impl TokenField {
    pub const fn query_name(self) -> &'static str {
        match self {
            TokenField::RealTime => "streamToken",
            TokenField::Broadcast => "streamTokenForBroadcastStream",
            TokenField::LiveStream => "streamTokenForLiveStream",
            TokenField::DrmOpenAccess => "streamTokenForLiveStreamWithDrmOpenAccess",
            TokenField::DrmHollywood => "streamTokenForLiveStreamWithDrmHollywood",
        }
    }
}

/// One stream belonging to a room member.
///
/// The URI is the wire contract: canonical transport-stream id plus
/// query-encoded metadata. Tokens and capabilities are read and written only
/// through the codec so the struct never drifts from its URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub uri: String,
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    pub audio_state: TrackState,
    pub video_state: TrackState,
}

impl StreamDescriptor {
    pub fn new(uri: impl Into<String>, stream_type: StreamType) -> Self {
        Self {
            uri: uri.into(),
            stream_type,
            audio_state: TrackState::TrackEnabled,
            video_state: TrackState::TrackEnabled,
        }
    }

    /// Canonical transport-stream id, `None` for remote/URL streams.
    pub fn stream_id(&self) -> Option<String> {
        uri::parse_stream_id(&self.uri)
    }

    /// The URI without its query parameters.
    pub fn bare_uri(&self) -> &str {
        uri::strip_query(&self.uri)
    }

    /// Decoded view of the URI's query-encoded metadata.
    pub fn info(&self) -> StreamInfo {
        StreamInfo::from_uri(&self.uri)
    }

    pub fn token(&self, field: TokenField) -> Option<String> {
        uri::query_param(&self.uri, field.query_name())
    }

    pub fn has_any_token(&self) -> bool {
        uri::query_params(&self.uri)
            .iter()
            .any(|(key, _)| key.starts_with(TokenField::RealTime.query_name()))
    }

    /// Appends one metadata entry to the URI query string.
    pub fn append_info(&mut self, name: &str, value: &str) {
        self.uri = uri::append_query_param(&self.uri, name, value);
    }

    pub fn append_token(&mut self, field: TokenField, token: &str) {
        self.append_info(field.query_name(), token);
    }
}

/// Decoded query-parameter metadata of a stream URI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamInfo {
    /// Publisher capabilities, when the publishing client recorded them.
    pub capabilities: Option<Vec<String>>,
    pub is_screen: bool,
    pub stream_token: Option<String>,
    pub stream_token_for_broadcast_stream: Option<String>,
    pub stream_token_for_live_stream: Option<String>,
    pub stream_token_for_live_stream_with_drm_open_access: Option<String>,
    pub stream_token_for_live_stream_with_drm_hollywood: Option<String>,
}

impl StreamInfo {
    pub fn from_uri(stream_uri: &str) -> Self {
        let mut info = StreamInfo::default();

        for (key, value) in uri::query_params(stream_uri) {
            match key.as_str() {
                "capabilities" => {
                    info.capabilities = Some(
                        value
                            .split(',')
                            .filter(|c| !c.is_empty())
                            .map(str::to_string)
                            .collect(),
                    );
                }
                "isScreen" => info.is_screen = value == "true",
                "streamToken" => info.stream_token = Some(value),
                "streamTokenForBroadcastStream" => {
                    info.stream_token_for_broadcast_stream = Some(value);
                }
                "streamTokenForLiveStream" => info.stream_token_for_live_stream = Some(value),
                "streamTokenForLiveStreamWithDrmOpenAccess" => {
                    info.stream_token_for_live_stream_with_drm_open_access = Some(value);
                }
                "streamTokenForLiveStreamWithDrmHollywood" => {
                    info.stream_token_for_live_stream_with_drm_hollywood = Some(value);
                }
                _ => {}
            }
        }

        info
    }

    pub fn token_for(&self, field: TokenField) -> Option<&str> {
        match field {
            TokenField::RealTime => self.stream_token.as_deref(),
            TokenField::Broadcast => self.stream_token_for_broadcast_stream.as_deref(),
            TokenField::LiveStream => self.stream_token_for_live_stream.as_deref(),
            TokenField::DrmOpenAccess => {
                self.stream_token_for_live_stream_with_drm_open_access.as_deref()
            }
            TokenField::DrmHollywood => {
                self.stream_token_for_live_stream_with_drm_hollywood.as_deref()
            }
        }
    }
}
