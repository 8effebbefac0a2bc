use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::disposable::DisposableSet;
use crate::engine::{MediaEngine, SubscribeRequest, SubscribedStream};
use crate::features::{Feature, FeatureDetector};
use crate::retry::{retry_while_streaming_not_ready, STREAM_FAILURE_RECOVERED};
use crate::shared::{RoomCastError, Status};
use crate::stream::{StreamDescriptor, StreamInfo, TrackKind, TrackState};

/// Subscribes to another member's stream, picking the viewing feature and the
/// pre-generated token that match what the publisher can serve.
pub struct MemberStreamSubscriber {
    engine: Arc<dyn MediaEngine>,
    detector: FeatureDetector,
}

/// Result of a member-stream subscription.
pub struct SubscribeToMemberStreamResponse {
    pub status: Status,
    pub media_stream: Option<Arc<dyn SubscribedStream>>,
    /// Transport-stream id the subscription originated from.
    pub origin_stream_id: String,
    /// Set to `stream-failure-recovered` when an attempt succeeded only after
    /// the stream had reported not-ready.
    pub reason: Option<String>,
    /// Owns the member-state forwarding attached to this subscription;
    /// dropping it stops the forwarding.
    pub disposables: Arc<DisposableSet>,
}

impl MemberStreamSubscriber {
    pub fn new(engine: Arc<dyn MediaEngine>, features: Vec<Feature>) -> Self {
        Self {
            engine,
            detector: FeatureDetector::new(features),
        }
    }

    /// Subscribes to a member stream.
    ///
    /// Streams that record publisher capabilities get exact feature matching;
    /// streams from older publishers fall back to walking the requested
    /// feature list, inferring capabilities from which wildcard tokens the
    /// URI carries. When `member_track_states` is given, the publisher-side
    /// audio/video states are forwarded into the stream monitor for the life
    /// of the subscription.
    #[instrument(skip_all, fields(uri = %member_stream.uri))]
    pub async fn subscribe_to_member_stream(
        &self,
        member_stream: &StreamDescriptor,
        member_track_states: Option<watch::Receiver<(TrackState, TrackState)>>,
    ) -> Result<SubscribeToMemberStreamResponse, RoomCastError> {
        let Some(stream_id) = member_stream.stream_id() else {
            error!("Invalid member stream, unable to parse stream id from uri");
            return Err(RoomCastError::InvalidMemberStream(
                member_stream.uri.clone(),
            ));
        };

        let info = member_stream.info();
        let is_screen = info.is_screen;

        if let Some(publisher_capabilities) = &info.capabilities {
            let Some(feature) = self.detector.preferred_feature(publisher_capabilities) else {
                warn!(
                    publisher_capabilities = ?publisher_capabilities,
                    requested = ?self.detector.features(),
                    "Unable to find supported feature for member stream"
                );
                return Ok(self.status_response(Status::UnsupportedFeatures, &stream_id));
            };

            let token = token_for_feature(&info, feature);

            info!(
                feature = %feature,
                has_token = token.is_some(),
                "Subscribing to member stream"
            );

            return self
                .subscribe_with_retry(
                    &stream_id,
                    token,
                    subscriber_capabilities(feature),
                    is_screen,
                    member_track_states,
                )
                .await;
        }

        // Older publishers never recorded capabilities; which wildcard
        // tokens exist on the URI implies what the publisher can serve.
        let implied_capabilities: Vec<String> = if info.stream_token_for_live_stream.is_some() {
            vec!["streaming".to_string()]
        } else {
            Vec::new()
        };
        let preferred = self.detector.preferred_feature(&implied_capabilities);

        let mut index = 0;

        loop {
            let Some(feature) = preferred.or_else(|| self.detector.feature_at(index)) else {
                return Ok(self.status_response(Status::NoSupportedFeatures, &stream_id));
            };

            if feature.required_capability() == Some("streaming")
                && info.stream_token_for_live_stream.is_none()
            {
                warn!(stream_id = %stream_id, "Streaming is not available for stream");
                return Ok(self.status_response(Status::StreamingNotAvailable, &stream_id));
            }

            let capabilities = subscriber_capabilities(feature);
            let token = legacy_token_from_info(&info, &capabilities);

            let response = self
                .subscribe_with_retry(
                    &stream_id,
                    token,
                    capabilities,
                    is_screen,
                    member_track_states.clone(),
                )
                .await?;

            let walkable = response.status == Status::Failed
                || response.status == Status::StreamingNotAvailable;

            if walkable && index + 1 < self.detector.feature_count() {
                info!("Attempting to subscribe to member stream with next available feature after failure");
                index += 1;
                continue;
            }

            return Ok(response);
        }
    }

    async fn subscribe_with_retry(
        &self,
        stream_id: &str,
        stream_token: Option<String>,
        capabilities: Vec<String>,
        is_screen: bool,
        member_track_states: Option<watch::Receiver<(TrackState, TrackState)>>,
    ) -> Result<SubscribeToMemberStreamResponse, RoomCastError> {
        let request = SubscribeRequest {
            stream_id: stream_id.to_string(),
            stream_token,
            capabilities,
        };

        let result = retry_while_streaming_not_ready(
            || {
                let engine = self.engine.clone();
                let request = request.clone();
                async move {
                    if is_screen {
                        engine.subscribe_to_screen(request).await
                    } else {
                        engine.subscribe(request).await
                    }
                }
            },
            |outcome| outcome.status,
        )
        .await;

        let retried = match result {
            Ok(retried) => retried,
            Err(error) if error.is_device_insecure() => {
                warn!("Capture device is insecure, subscription rejected");
                return Ok(self.status_response(Status::DeviceInsecure, stream_id));
            }
            Err(error) => return Err(error),
        };

        let outcome = retried.value;
        let disposables = Arc::new(DisposableSet::new());

        if outcome.status.is_ok() {
            if let (Some(media_stream), Some(states)) =
                (&outcome.media_stream, member_track_states)
            {
                attach_member_state_forwarding(media_stream.clone(), states, &disposables);
            }
        }

        Ok(SubscribeToMemberStreamResponse {
            status: outcome.status,
            media_stream: outcome.media_stream,
            origin_stream_id: stream_id.to_string(),
            reason: retried
                .recovered
                .then(|| STREAM_FAILURE_RECOVERED.to_string()),
            disposables,
        })
    }

    fn status_response(&self, status: Status, stream_id: &str) -> SubscribeToMemberStreamResponse {
        SubscribeToMemberStreamResponse {
            status,
            media_stream: None,
            origin_stream_id: stream_id.to_string(),
            reason: None,
            disposables: Arc::new(DisposableSet::new()),
        }
    }
}

fn subscriber_capabilities(feature: Feature) -> Vec<String> {
    feature
        .required_capability()
        .map(str::to_string)
        .into_iter()
        .collect()
}

/// Token variant matching a feature on a capability-carrying stream.
fn token_for_feature(info: &StreamInfo, feature: Feature) -> Option<String> {
    match feature {
        Feature::Rtmp | Feature::Hls | Feature::Dash => {
            info.stream_token_for_live_stream.clone()
        }
        Feature::RealTime => info.stream_token.clone(),
    }
}

/// Token selection for streams from publishers that predate recorded
/// capabilities: pick the most specific token the URI carries for what the
/// subscriber asked.
fn legacy_token_from_info(info: &StreamInfo, capabilities: &[String]) -> Option<String> {
    let has = |c: &str| capabilities.iter().any(|x| x == c);

    // Tokens for both DRM schemes were never generated together.
    if has("drm-open-access") && has("drm-hollywood") {
        return None;
    }

    let live = info.stream_token_for_live_stream.as_ref();
    let is_streaming = live.is_some() && has("streaming");
    let is_rtmp = live.is_some() && has("rtmp");

    if is_streaming && has("drm-open-access") {
        if let Some(token) = &info.stream_token_for_live_stream_with_drm_open_access {
            return Some(token.clone());
        }
    }

    if is_streaming && has("drm-hollywood") {
        if let Some(token) = &info.stream_token_for_live_stream_with_drm_hollywood {
            return Some(token.clone());
        }
    }

    if is_streaming || is_rtmp {
        return live.cloned();
    }

    if has("broadcast") {
        if let Some(token) = &info.stream_token_for_broadcast_stream {
            return Some(token.clone());
        }
    }

    if !has("streaming") && !has("broadcast") && !has("rtmp") {
        return info.stream_token.clone();
    }

    None
}

/// Forwards the publisher-side audio/video states into the stream monitor,
/// starting with an immediate notification; ends with the disposable scope.
fn attach_member_state_forwarding(
    media_stream: Arc<dyn SubscribedStream>,
    mut states: watch::Receiver<(TrackState, TrackState)>,
    disposables: &DisposableSet,
) {
    fn forward(media_stream: &Arc<dyn SubscribedStream>, audio: TrackState, video: TrackState) {
        if media_stream.has_single_track(TrackKind::Audio) {
            media_stream
                .set_monitor_track_state(TrackKind::Audio, audio == TrackState::TrackEnabled);
        }
        if media_stream.has_single_track(TrackKind::Video) {
            media_stream
                .set_monitor_track_state(TrackKind::Video, video == TrackState::TrackEnabled);
        }
    }

    let task = tokio::spawn(async move {
        let (audio, video) = *states.borrow();
        forward(&media_stream, audio, video);

        while states.changed().await.is_ok() {
            let (audio, video) = *states.borrow_and_update();
            forward(&media_stream, audio, video);
        }
    });

    disposables.add_task(task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stub::StubEngine;
    use crate::stream::StreamType;

    fn subscriber(engine: &StubEngine, features: Vec<Feature>) -> MemberStreamSubscriber {
        MemberStreamSubscriber::new(Arc::new(engine.clone()), features)
    }

    fn stream(uri: &str) -> StreamDescriptor {
        StreamDescriptor::new(uri, StreamType::User)
    }

    #[tokio::test]
    async fn subscribes_with_the_preferred_feature_token() {
        let engine = StubEngine::new();
        let subject = subscriber(&engine, vec![Feature::RealTime, Feature::Dash]);

        let response = subject
            .subscribe_to_member_stream(
                &stream("cast://s-1?capabilities=streaming&streamToken=rt&streamTokenForLiveStream=live"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.origin_stream_id, "s-1");
        assert!(response.reason.is_none());
        assert!(response.media_stream.is_some());
    }

    #[tokio::test]
    async fn unsupported_features_when_capabilities_do_not_match() {
        let engine = StubEngine::new();
        let subject = subscriber(&engine, vec![Feature::Rtmp]);

        let response = subject
            .subscribe_to_member_stream(
                &stream("cast://s-1?capabilities=streaming&streamTokenForLiveStream=live"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(response.status, Status::UnsupportedFeatures);
        assert_eq!(engine.subscribe_call_count(), 0);
    }

    #[tokio::test]
    async fn legacy_stream_with_no_matching_feature_has_no_supported_features() {
        let engine = StubEngine::new();
        let subject = subscriber(&engine, Vec::new());

        // Live-stream token implies the publisher can stream, but the client
        // requested nothing usable.
        let response = subject
            .subscribe_to_member_stream(
                &stream("cast://s-1?streamTokenForLiveStream=live"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(response.status, Status::NoSupportedFeatures);
    }

    #[tokio::test]
    async fn legacy_streaming_feature_without_live_token_is_not_available() {
        let engine = StubEngine::new();
        let subject = subscriber(&engine, vec![Feature::Dash]);

        let response = subject
            .subscribe_to_member_stream(&stream("cast://s-1?streamToken=rt"), None)
            .await
            .unwrap();

        assert_eq!(response.status, Status::StreamingNotAvailable);
        assert_eq!(engine.subscribe_call_count(), 0);
    }

    #[tokio::test]
    async fn unparseable_member_stream_is_an_invariant_error() {
        let engine = StubEngine::new();
        let subject = subscriber(&engine, vec![Feature::RealTime]);

        let result = subject
            .subscribe_to_member_stream(&stream("https://example.com/feed"), None)
            .await;

        assert!(matches!(
            result,
            Err(RoomCastError::InvalidMemberStream(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_streaming_not_ready_and_tags_the_reason() {
        let engine = StubEngine::new();
        engine.script_subscribe_statuses([Status::StreamingNotReady, Status::StreamingNotReady]);
        let subject = subscriber(&engine, vec![Feature::RealTime]);

        let response = subject
            .subscribe_to_member_stream(
                &stream("cast://s-1?capabilities=&streamToken=rt"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(response.status, Status::Ok);
        assert_eq!(
            response.reason.as_deref(),
            Some(STREAM_FAILURE_RECOVERED)
        );
        assert_eq!(engine.subscribe_call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn three_not_ready_results_are_terminal() {
        let engine = StubEngine::new();
        engine.script_subscribe_statuses([
            Status::StreamingNotReady,
            Status::StreamingNotReady,
            Status::StreamingNotReady,
        ]);
        let subject = subscriber(&engine, vec![Feature::RealTime]);

        let response = subject
            .subscribe_to_member_stream(
                &stream("cast://s-1?capabilities=&streamToken=rt"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(response.status, Status::StreamingNotReady);
        assert_eq!(engine.subscribe_call_count(), 3);
    }

    #[tokio::test]
    async fn member_track_states_flow_into_the_monitor() {
        let engine = StubEngine::new();
        let subject = subscriber(&engine, vec![Feature::RealTime]);

        let (states_tx, states_rx) =
            watch::channel((TrackState::TrackEnabled, TrackState::TrackEnabled));

        let response = subject
            .subscribe_to_member_stream(
                &stream("cast://s-1?capabilities=&streamToken=rt"),
                Some(states_rx),
            )
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);

        tokio::task::yield_now().await;

        let subscribed = engine.subscribed_streams().pop().unwrap();
        // Initial notification forwarded both tracks as enabled.
        assert!(subscribed
            .monitor_states()
            .contains(&(TrackKind::Audio, true)));

        states_tx
            .send((TrackState::TrackEnabled, TrackState::TrackDisabled))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(subscribed
            .monitor_states()
            .contains(&(TrackKind::Video, false)));

        // Disposal stops the forwarding.
        response.disposables.dispose();
        states_tx
            .send((TrackState::TrackDisabled, TrackState::TrackDisabled))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!subscribed
            .monitor_states()
            .contains(&(TrackKind::Audio, false)));
    }
}
