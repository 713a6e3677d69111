use mediasoup::rtp_parameters::MediaKind;

mod fixture;

async fn produce_target_audio(sfu: &sfu_core::sfu::Sfu, room_id: &str, target_user_id: &str) {
    let transport_id = sfu.create_webrtc_transport(room_id).await.unwrap();
    sfu.connect_transport(transport_id, fixture::dtls_parameters())
        .await
        .unwrap();
    sfu.produce(
        room_id,
        transport_id,
        MediaKind::Audio,
        fixture::audio_producer_device_parameters(),
        serde_json::json!({}),
        target_user_id.to_string(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn cabin_is_ref_counted_and_torn_down_on_last_release() {
    let sfu = fixture::test_sfu().await;
    sfu.create_media_room("R".into()).await.unwrap();
    produce_target_audio(&sfu, "R", "T").await;

    let first = sfu
        .create_cabin("R", "A", "T", "vi", "en", 40000, 40002, 12345)
        .await
        .unwrap();
    assert_eq!(first.stream_id, "translated_T_vi_en");
    assert_eq!(first.sfu_listen_port, 40002);

    // A second listener joins the same (room, target, language pair) cabin:
    // same streamId, no new transports.
    let second = sfu
        .create_cabin("R", "B", "T", "vi", "en", 40000, 40002, 12345)
        .await
        .unwrap();
    assert_eq!(second.stream_id, first.stream_id);

    let room = sfu.get_room("R").unwrap();
    let translated_count = room
        .streams_sorted_by_id()
        .iter()
        .filter(|s| s.stream_id == "translated_T_vi_en")
        .count();
    assert_eq!(translated_count, 1);

    // Releasing the first listener only decrements; the cabin survives.
    let outcome_a = sfu.destroy_cabin("R", "A", "T", "vi", "en").unwrap();
    assert!(!outcome_a.torn_down);
    let still_there = room
        .streams_sorted_by_id()
        .iter()
        .any(|s| s.stream_id == "translated_T_vi_en");
    assert!(still_there);

    // Releasing the last listener actually tears it down.
    let outcome_b = sfu.destroy_cabin("R", "B", "T", "vi", "en").unwrap();
    assert!(outcome_b.torn_down);
    let gone = room
        .streams_sorted_by_id()
        .iter()
        .any(|s| s.stream_id == "translated_T_vi_en");
    assert!(!gone);
}

#[tokio::test]
async fn list_cabins_is_scoped_to_room_and_listener() {
    let sfu = fixture::test_sfu().await;
    sfu.create_media_room("R1".into()).await.unwrap();
    sfu.create_media_room("R2".into()).await.unwrap();
    produce_target_audio(&sfu, "R1", "T").await;
    produce_target_audio(&sfu, "R2", "T").await;

    sfu.create_cabin("R1", "A", "T", "vi", "en", 41000, 41002, 11111)
        .await
        .unwrap();
    sfu.create_cabin("R2", "A", "T", "fr", "en", 42000, 42002, 22222)
        .await
        .unwrap();

    let in_r1 = sfu.list_cabins("R1", "A");
    assert_eq!(in_r1.len(), 1);
    assert_eq!(in_r1[0].target_user_id, "T");
    assert_eq!(in_r1[0].source_language, "vi");

    let not_a_listener = sfu.list_cabins("R1", "Z");
    assert!(not_a_listener.is_empty());
}

#[tokio::test]
async fn destroy_unknown_cabin_is_not_found() {
    let sfu = fixture::test_sfu().await;
    sfu.create_media_room("R".into()).await.unwrap();
    let result = sfu.destroy_cabin("R", "A", "T", "vi", "en");
    assert!(result.is_err());
}
