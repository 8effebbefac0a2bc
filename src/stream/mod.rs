pub mod models;
pub mod uri;

pub use models::{StreamDescriptor, StreamInfo, StreamType, TokenField, TrackKind, TrackState};
