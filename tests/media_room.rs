use sfu_core::error::SfuError;

mod fixture;

#[tokio::test]
async fn create_media_room_is_idempotent_and_returns_the_same_router() {
    let sfu = fixture::test_sfu().await;

    let room1 = sfu.create_media_room("room-a".into()).await.unwrap();
    let room2 = sfu.create_media_room("room-a".into()).await.unwrap();

    assert_eq!(room1.router.id(), room2.router.id());
}

#[tokio::test]
async fn get_room_fails_for_unknown_room() {
    let sfu = fixture::test_sfu().await;
    match sfu.get_room("nope") {
        Err(SfuError::NotFound(_, id)) => assert_eq!(id, "nope"),
        other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn close_media_room_removes_it_from_the_registry() {
    let sfu = fixture::test_sfu().await;
    sfu.create_media_room("room-b".into()).await.unwrap();

    sfu.close_media_room("room-b").unwrap();

    assert!(sfu.get_room("room-b").is_err());
    // closing twice is a NotFound, not a panic.
    assert!(sfu.close_media_room("room-b").is_err());
}

#[tokio::test]
async fn room_to_worker_affinity_is_stable() {
    let sfu = fixture::test_sfu_with_workers(4).await;
    let room1 = sfu.create_media_room("stable-room".into()).await.unwrap();
    sfu.close_media_room("stable-room").unwrap();
    let room2 = sfu.create_media_room("stable-room".into()).await.unwrap();

    assert_eq!(room1.worker_index, room2.worker_index);
}
