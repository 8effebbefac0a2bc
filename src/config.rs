use std::time::Duration;

use crate::features::Feature;

/// Default interval between wildcard viewer token regenerations.
pub const DEFAULT_TOKEN_REFRESH_INTERVAL: Duration = Duration::from_millis(300_000);

/// Requester pattern used when issuing wildcard viewer tokens.
pub const WILDCARD_REQUESTER: &str = "*";

/// Configuration for the orchestration layer
#[derive(Debug, Clone)]
pub struct RoomCastConfig {
    /// Whether published streams get wildcard viewer tokens embedded in their URIs
    pub wildcard_tokens_enabled: bool,
    /// How often wildcard tokens are regenerated while a publisher is live
    pub token_refresh_interval: Duration,
    /// Viewing features the client wants, in preference order
    pub features: Vec<Feature>,
}

impl RoomCastConfig {
    pub fn new() -> Self {
        // Allow overriding the refresh interval via env var, default 300000 ms
        let token_refresh_interval = std::env::var("ROOMCAST_TOKEN_REFRESH_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TOKEN_REFRESH_INTERVAL);

        Self {
            wildcard_tokens_enabled: true,
            token_refresh_interval,
            features: vec![Feature::RealTime],
        }
    }

    pub fn with_features(mut self, features: Vec<Feature>) -> Self {
        self.features = features;
        self
    }

    pub fn with_wildcard_tokens(mut self, enabled: bool) -> Self {
        self.wildcard_tokens_enabled = enabled;
        self
    }
}

impl Default for RoomCastConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Deployment environment classified from a backend endpoint URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Staging,
    Production,
}

impl Environment {
    /// Tri-state classification: `local` substrings win over `stg`, anything
    /// else is production.
    pub fn classify(endpoint: &str) -> Self {
        let endpoint = endpoint.to_lowercase();

        if endpoint.contains("local") {
            Environment::Local
        } else if endpoint.contains("stg") {
            Environment::Staging
        } else {
            Environment::Production
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_local_endpoints() {
        assert_eq!(
            Environment::classify("https://local.example.com:8443"),
            Environment::Local
        );
    }

    #[test]
    fn classifies_staging_endpoints() {
        assert_eq!(
            Environment::classify("wss://media-stg-us-central.example.com"),
            Environment::Staging
        );
    }

    // A bare truthy check on the substring position would send every
    // non-local endpoint to staging; production must require that "stg"
    // actually appears.
    #[test]
    fn production_is_not_misclassified_as_staging() {
        assert_eq!(
            Environment::classify("https://media.example.com"),
            Environment::Production
        );
        assert_eq!(
            Environment::classify("wss://media-us-east.example.com"),
            Environment::Production
        );
    }
}
