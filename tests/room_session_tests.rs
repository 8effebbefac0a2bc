mod utils;

use roomcast::shared::{RoomCastError, Status};
use roomcast::stream::{StreamDescriptor, StreamType, TokenField};
use roomcast::{Feature, JoinRoomRequest, MemberRole, RoomType};
use utils::{room_request, TestSetupBuilder};

#[tokio::test]
async fn create_room_returns_the_room_without_entering_it() {
    let setup = TestSetupBuilder::new().build();

    let response = setup
        .room_controller
        .create_room(room_request("Test123", "multi-party-chat"))
        .await
        .expect("create should succeed");

    assert_eq!(response.status, Status::Ok);
    let room = response.room.expect("room should be returned");
    assert_eq!(room.name, "Test123");
    assert_eq!(room.room_type, RoomType::MultiPartyChat);

    // The creating session was stopped, so nobody is in the room and no
    // session is active for it.
    assert!(setup.engine.room_members(&room.room_id).is_empty());
    assert!(setup
        .room_controller
        .find_active_session(Some(&room.room_id), None)
        .is_none());
}

#[tokio::test]
async fn creating_the_same_room_twice_reports_already_exists() {
    let setup = TestSetupBuilder::new().build();

    let mut request = room_request("Test123", "multi-party-chat");
    request.alias = Some("lobby".to_string());

    let first = setup.room_controller.create_room(request.clone()).await.unwrap();
    assert_eq!(first.status, Status::Ok);

    let second = setup.room_controller.create_room(request).await.unwrap();
    assert_eq!(second.status, Status::AlreadyExists);
    assert_eq!(
        second.room.unwrap().room_id,
        first.room.unwrap().room_id
    );
}

#[tokio::test]
async fn leave_failure_at_the_transport_still_stops_the_session_locally() {
    let setup = TestSetupBuilder::new().build();

    let created = setup
        .room_controller
        .create_room(room_request("Test123", "multi-party-chat"))
        .await
        .unwrap();
    let room_id = created.room.unwrap().room_id;

    let joined = setup
        .room_controller
        .join_room(
            JoinRoomRequest::with_role(MemberRole::Audience)
                .room_id(room_id.clone())
                .screen_name("alice"),
            None,
        )
        .await
        .unwrap();
    let session = joined.session.unwrap();

    let transport_session = setup.engine.sessions().into_iter().last().unwrap();
    transport_session.fail_next_leave();

    let result = session.leave_room().await;
    assert!(matches!(result, Err(RoomCastError::Transport { .. })));

    // Leaving must not wedge: the local session is gone regardless.
    assert!(setup
        .room_controller
        .find_active_session(Some(&room_id), None)
        .is_none());
}

#[tokio::test]
async fn joining_with_an_external_stream_seeds_tokenized_member_state() {
    let setup = TestSetupBuilder::new().build();

    let created = setup
        .room_controller
        .create_room(room_request("Test123", "channel"))
        .await
        .unwrap();
    let room_id = created.room.unwrap().room_id;

    // A bare stream id published elsewhere; wildcard capabilities ask this
    // client to mint viewer tokens for it.
    let mut request = JoinRoomRequest::with_role(MemberRole::Presenter)
        .room_id(room_id.clone())
        .screen_name("anchor");
    request.streams = vec![StreamDescriptor::new("ext-stream-9", StreamType::User)];
    request.wildcard_capabilities = Some(vec!["streaming".to_string()]);

    let response = setup.room_controller.join_room(request, None).await.unwrap();
    assert_eq!(response.status, Status::Ok);

    let members = setup.engine.room_members(&room_id);
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, MemberRole::Presenter);

    let stream = &members[0].streams[0];
    assert!(stream.uri.starts_with("cast://ext-stream-9"));
    assert!(stream.token(TokenField::RealTime).is_some());
    assert!(stream.token(TokenField::Broadcast).is_some());
    assert!(stream.token(TokenField::LiveStream).is_some());

    // Real-time, broadcast, and the streaming live-stream variant.
    assert_eq!(setup.issuer.request_count(), 3);
}

#[tokio::test]
async fn subscribing_with_no_usable_feature_reports_no_supported_features() {
    let setup = TestSetupBuilder::new().with_features(Vec::new()).build();

    // A legacy stream whose tokens imply streaming capability.
    let stream = StreamDescriptor::new(
        "cast://s-1?streamTokenForLiveStream=live",
        StreamType::User,
    );

    let response = setup
        .subscriber
        .subscribe_to_member_stream(&stream, None)
        .await
        .unwrap();

    assert_eq!(response.status, Status::NoSupportedFeatures);
}

#[tokio::test]
async fn full_cycle_publish_subscribe_with_streaming_feature() {
    let setup = TestSetupBuilder::new()
        .with_features(vec![Feature::Dash, Feature::RealTime])
        .build();

    let publish_response = setup
        .publish_controller
        .publish_to_room(
            utils::presenter_publish_request("Test123")
                .capabilities(vec!["streaming".to_string()]),
        )
        .await
        .unwrap();
    assert_eq!(publish_response.status, Status::Ok);

    let session = publish_response.session.unwrap();
    let member = session.session().self_member().unwrap();

    let response = setup
        .subscriber
        .subscribe_to_member_stream(&member.streams[0], None)
        .await
        .unwrap();

    // Dash is served by the live-stream token the publish embedded.
    assert_eq!(response.status, Status::Ok);
    assert!(response.media_stream.is_some());
}
