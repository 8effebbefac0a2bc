pub mod reconciler;
pub mod selector;

pub use reconciler::reconcile_self_streams;
pub use selector::{similar_members, valid_stream_ids};
