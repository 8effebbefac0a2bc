use std::sync::Arc;

use roomcast::engine::stub::{StubEngine, StubTokenIssuer};
use roomcast::engine::{LocalMediaStream, Track};
use roomcast::stream::TrackKind;
use roomcast::{
    CreateRoomRequest, Feature, MemberRole, MemberStreamSubscriber, PublishSessionController,
    PublishToRoomRequest, PublisherRegistry, RoomCastConfig, RoomSessionController, StreamType,
};

/// Full orchestration stack over one in-memory engine.
pub struct TestSetup {
    pub engine: StubEngine,
    pub issuer: Arc<StubTokenIssuer>,
    pub room_controller: Arc<RoomSessionController>,
    pub publish_controller: PublishSessionController,
    pub subscriber: MemberStreamSubscriber,
}

/// Builder for wiring the controllers with test-specific knobs.
pub struct TestSetupBuilder {
    features: Vec<Feature>,
    config: RoomCastConfig,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            features: vec![Feature::RealTime],
            config: RoomCastConfig::new(),
        }
    }

    pub fn with_features(mut self, features: Vec<Feature>) -> Self {
        self.features = features;
        self
    }

    pub fn build(self) -> TestSetup {
        init_tracing();

        let engine = StubEngine::new();
        let issuer = Arc::new(StubTokenIssuer::new());

        let room_controller = Arc::new(RoomSessionController::new(
            Arc::new(engine.clone()),
            Arc::new(engine.clone()),
            issuer.clone(),
            Arc::new(PublisherRegistry::new()),
        ));
        let publish_controller = PublishSessionController::new(
            Arc::new(engine.clone()),
            room_controller.clone(),
            issuer.clone(),
            self.config,
        );
        let subscriber = MemberStreamSubscriber::new(Arc::new(engine.clone()), self.features);

        TestSetup {
            engine,
            issuer,
            room_controller,
            publish_controller,
            subscriber,
        }
    }
}

impl Default for TestSetupBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A camera capture with both tracks enabled.
pub fn camera_stream() -> LocalMediaStream {
    LocalMediaStream {
        stream_id: "local-camera".to_string(),
        tracks: vec![
            Track {
                track_id: "audio-1".to_string(),
                kind: TrackKind::Audio,
                enabled: true,
            },
            Track {
                track_id: "video-1".to_string(),
                kind: TrackKind::Video,
                enabled: true,
            },
        ],
    }
}

pub fn room_request(name: &str, room_type: &str) -> CreateRoomRequest {
    CreateRoomRequest {
        name: name.to_string(),
        room_type: room_type.to_string(),
        description: None,
        room_id: None,
        alias: None,
    }
}

pub fn presenter_publish_request(room_name: &str) -> PublishToRoomRequest {
    PublishToRoomRequest::new(
        room_request(room_name, "multi-party-chat"),
        MemberRole::Presenter,
        StreamType::User,
    )
    .user_media_stream(camera_stream())
    .screen_name("presenter-1")
}
