pub mod manager;

pub use manager::{TokenGeneration, TokenGenerationOutcome, WildcardTokenManager};
