use mediasoup::rtp_parameters::MediaKind;
use regex::Regex;

use sfu_core::producer_consumer::ConsumeOutcome;

mod fixture;

async fn produce_audio(sfu: &sfu_core::sfu::Sfu, room_id: &str, peer_id: &str) -> String {
    let transport_id = sfu.create_webrtc_transport(room_id).await.unwrap();
    sfu.connect_transport(transport_id, fixture::dtls_parameters())
        .await
        .unwrap();
    let outcome = sfu
        .produce(
            room_id,
            transport_id,
            MediaKind::Audio,
            fixture::audio_producer_device_parameters(),
            serde_json::json!({}),
            peer_id.to_string(),
        )
        .await
        .unwrap();
    outcome.stream_id
}

// Zero-padded so that lexicographic `streamId` order (which sorts by the
// `<publisherId>_..` prefix first) matches publish order, letting this test
// exercise the same boundary spec.md §8 scenario 1 describes with P1..P11.
fn peer(i: u32) -> String {
    format!("p{i:02}")
}

#[tokio::test]
async fn eleventh_publisher_is_outside_priority_and_consume_is_denied() {
    let sfu = fixture::test_sfu().await;
    sfu.create_media_room("R".into()).await.unwrap();

    let mut stream_ids = Vec::new();
    for i in 1..=11 {
        stream_ids.push(produce_audio(&sfu, "R", &peer(i)).await);
    }

    let consumer_transport = sfu.create_webrtc_transport("R").await.unwrap();
    sfu.connect_transport(consumer_transport, fixture::dtls_parameters())
        .await
        .unwrap();

    // p11's stream (index 10) is outside the top-10 priority cap.
    let outcome = sfu
        .consume(
            "R",
            Some(stream_ids[10].clone()),
            consumer_transport,
            Some(fixture::consumer_device_capabilities()),
            peer(1),
            false,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ConsumeOutcome::NotInPriority));

    // p01's own stream is within the cap and is consumable.
    let outcome = sfu
        .consume(
            "R",
            Some(stream_ids[0].clone()),
            consumer_transport,
            Some(fixture::consumer_device_capabilities()),
            peer(1),
            false,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ConsumeOutcome::Created(_)));
}

#[tokio::test]
async fn pin_creates_a_consumer_and_unpin_removes_it() {
    let sfu = fixture::test_sfu().await;
    sfu.create_media_room("R".into()).await.unwrap();

    for i in 1..=11 {
        produce_audio(&sfu, "R", &peer(i)).await;
    }

    let transport_id = sfu.create_webrtc_transport("R").await.unwrap();
    sfu.connect_transport(transport_id, fixture::dtls_parameters())
        .await
        .unwrap();

    let pin_outcome = sfu
        .pin_user(
            "R",
            &peer(1),
            &peer(11),
            transport_id,
            Some(fixture::consumer_device_capabilities()),
        )
        .await
        .unwrap();
    assert!(!pin_outcome.already_priority);
    assert_eq!(pin_outcome.consumers_created.len(), 1);

    let unpin_outcome = sfu.unpin_user("R", &peer(1), &peer(11)).await.unwrap();
    assert!(!unpin_outcome.still_in_priority);
    assert_eq!(unpin_outcome.consumers_removed.len(), 1);
}

#[tokio::test]
async fn screen_share_metadata_drives_stream_type() {
    let sfu = fixture::test_sfu().await;
    sfu.create_media_room("R".into()).await.unwrap();

    let transport_id = sfu.create_webrtc_transport("R").await.unwrap();
    sfu.connect_transport(transport_id, fixture::dtls_parameters())
        .await
        .unwrap();

    let outcome = sfu
        .produce(
            "R",
            transport_id,
            MediaKind::Video,
            fixture::video_producer_device_parameters(),
            serde_json::json!({ "isScreenShare": true }),
            "P1".to_string(),
        )
        .await
        .unwrap();

    let re = Regex::new(r"^P1_screen_\d+_[a-z0-9]{5}$").unwrap();
    assert!(
        re.is_match(&outcome.stream_id),
        "unexpected stream id {}",
        outcome.stream_id
    );
}

#[tokio::test]
async fn consume_falls_back_to_the_publishers_live_audio_stream() {
    let sfu = fixture::test_sfu().await;
    sfu.create_media_room("R".into()).await.unwrap();

    let real_stream_id = produce_audio(&sfu, "R", "P1").await;

    let consumer_transport = sfu.create_webrtc_transport("R").await.unwrap();
    sfu.connect_transport(consumer_transport, fixture::dtls_parameters())
        .await
        .unwrap();

    let outcome = sfu
        .consume(
            "R",
            Some("P1_audio_999_zzzzz".to_string()),
            consumer_transport,
            Some(fixture::consumer_device_capabilities()),
            "P2".to_string(),
            false,
        )
        .await
        .unwrap();

    match outcome {
        ConsumeOutcome::Created(created) => assert_eq!(created.stream_id, real_stream_id),
        ConsumeOutcome::NotInPriority => panic!("expected a created consumer via fallback lookup"),
    }
}
