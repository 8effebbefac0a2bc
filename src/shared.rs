use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// Engine error category signalling an insecure capture device.
pub const DEVICE_INSECURE_CATEGORY: u32 = 6;

#[derive(Error, Debug)]
pub enum RoomCastError {
    /// Malformed caller input. Fails immediately, never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Room type outside the supported set. Programmer error, not a runtime condition.
    #[error("unsupported room type: {0}")]
    UnsupportedRoomType(String),

    /// A member stream whose URI carries no parseable stream id.
    #[error("invalid member stream: unable to parse stream id from uri [{0}]")]
    InvalidMemberStream(String),

    /// Network or protocol failure reported by the media engine.
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        category: Option<u32>,
    },

    /// Self-commit kept failing past the retry budget.
    #[error("unable to update self after {0} attempts")]
    UnableToUpdateSelf(u32),
}

impl RoomCastError {
    pub fn transport(message: impl Into<String>) -> Self {
        RoomCastError::Transport {
            message: message.into(),
            category: None,
        }
    }

    /// Whether this is the engine's insecure-device failure.
    pub fn is_device_insecure(&self) -> bool {
        matches!(
            self,
            RoomCastError::Transport {
                category: Some(DEVICE_INSECURE_CATEGORY),
                ..
            }
        )
    }
}

/// Well-formed negative results are not errors; they travel in the success
/// channel as one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Ok,
    Failed,
    AlreadyExists,
    AlreadyInRoom,
    NotInRoom,
    /// Transport-level "no such room" from enter.
    NotFound,
    /// Caller-facing terminal outcome for a missing room.
    RoomNotFound,
    UnsupportedFeatures,
    NoSupportedFeatures,
    StreamingNotAvailable,
    StreamingNotReady,
    DeviceInsecure,
    Unauthorized,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_kebab_case_names() {
        assert_eq!(Status::StreamingNotReady.to_string(), "streaming-not-ready");
        assert_eq!(Status::AlreadyInRoom.to_string(), "already-in-room");
        assert_eq!(
            Status::from_str("room-not-found").unwrap(),
            Status::RoomNotFound
        );
        assert_eq!(Status::from_str("ok").unwrap(), Status::Ok);
    }

    #[test]
    fn device_insecure_matches_engine_category() {
        let error = RoomCastError::Transport {
            message: "capture device rejected".to_string(),
            category: Some(DEVICE_INSECURE_CATEGORY),
        };
        assert!(error.is_device_insecure());
        assert!(!RoomCastError::transport("offline").is_device_insecure());
    }
}
