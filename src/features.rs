use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// A downstream viewing feature a client can ask for.
///
/// Each feature maps to at most one engine capability that the publisher must
/// have been granted for the feature to work. Real-time playback needs none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    RealTime,
    Dash,
    Hls,
    Rtmp,
}

impl Feature {
    /// The publisher capability this feature depends on, if any.
    pub fn required_capability(self) -> Option<&'static str> {
        match self {
            Feature::RealTime => None,
            Feature::Dash | Feature::Hls => Some("streaming"),
            Feature::Rtmp => Some("rtmp"),
        }
    }
}

/// Picks the viewing feature to use for a member stream, given what the
/// publisher is capable of and what the client asked for.
#[derive(Debug, Clone)]
pub struct FeatureDetector {
    features: Vec<Feature>,
}

impl FeatureDetector {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Capabilities needed by the requested features, in preference order.
    pub fn feature_capabilities(&self) -> Vec<&'static str> {
        self.features
            .iter()
            .filter_map(|feature| feature.required_capability())
            .collect()
    }

    /// First requested feature the publisher can serve.
    pub fn preferred_feature(&self, publisher_capabilities: &[String]) -> Option<Feature> {
        self.features
            .iter()
            .copied()
            .find(|feature| match feature.required_capability() {
                None => true,
                Some(capability) => publisher_capabilities.iter().any(|c| c == capability),
            })
    }

    /// The feature at a given fallback position, used when a stream predates
    /// published capabilities and selection walks the requested list blindly.
    pub fn feature_at(&self, index: usize) -> Option<Feature> {
        self.features.get(index).copied()
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }
}
