// Public API - subscribing to member streams with feature selection and retry
pub use service::{MemberStreamSubscriber, SubscribeToMemberStreamResponse};

pub mod service;
