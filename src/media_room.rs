//! Media Room Registry (spec §4.2) and the [`MediaRoom`] data model (spec §3).

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::num::{NonZeroU32, NonZeroU8};
use std::sync::{Arc, Mutex};

use mediasoup::consumer::Consumer;
use mediasoup::producer::{Producer, ProducerId};
use mediasoup::router::{Router, RouterOptions};
use mediasoup::rtp_parameters::{
    MimeTypeAudio, MimeTypeVideo, RtcpFeedback, RtpCodecCapability, RtpCodecParametersParameters,
};

use crate::error::{NotFoundKind, SfuError, SfuResult};
use crate::stream::{RoomId, Stream, StreamId};
use crate::worker_pool::WorkerPool;

/// Codecs the router supports: Opus (48kHz/2ch), VP8, VP9, H264 with two
/// profile-level-ids (spec §4.2).
pub fn media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability::Audio {
            mime_type: MimeTypeAudio::Opus,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(48000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::from([("useinbandfec", 1u32.into())]),
            rtcp_feedback: vec![RtcpFeedback::TransportCc],
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp8,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: video_feedback(),
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp9,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: video_feedback(),
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::H264,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::from([
                ("level-asymmetry-allowed", 1u32.into()),
                ("packetization-mode", 1u32.into()),
                ("profile-level-id", "42e01f".into()),
            ]),
            rtcp_feedback: video_feedback(),
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::H264,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::from([
                ("level-asymmetry-allowed", 1u32.into()),
                ("packetization-mode", 1u32.into()),
                ("profile-level-id", "4d0032".into()),
            ]),
            rtcp_feedback: video_feedback(),
        },
    ]
}

fn video_feedback() -> Vec<RtcpFeedback> {
    vec![
        RtcpFeedback::Nack,
        RtcpFeedback::NackPli,
        RtcpFeedback::CcmFir,
        RtcpFeedback::GoogRemb,
        RtcpFeedback::TransportCc,
    ]
}

/// Per-room mutable state (spec §3 MediaRoom, §5 "serialisable per-room").
pub(crate) struct RoomState {
    pub producers: HashMap<StreamId, Producer>,
    pub consumers: HashMap<StreamId, Vec<Consumer>>,
    pub streams: HashMap<StreamId, Stream>,
    pub producer_to_stream: HashMap<ProducerId, StreamId>,
}

impl RoomState {
    fn new() -> Self {
        Self {
            producers: HashMap::new(),
            consumers: HashMap::new(),
            streams: HashMap::new(),
            producer_to_stream: HashMap::new(),
        }
    }
}

/// Emitted on the room's broadcast channel when a consumer is evicted
/// because its producer closed (spec §4.4 Consume rule 5, "notify the
/// caller via consumer-closed").
#[derive(Debug, Clone)]
pub struct ConsumerClosedNotice {
    pub stream_id: StreamId,
    pub consumer_id: mediasoup::consumer::ConsumerId,
}

pub struct MediaRoom {
    pub id: RoomId,
    pub router: Router,
    pub worker_index: usize,
    pub(crate) state: Mutex<RoomState>,
    pub(crate) consumer_closed_tx: tokio::sync::broadcast::Sender<ConsumerClosedNotice>,
}

impl MediaRoom {
    pub fn streams_sorted_by_id(&self) -> Vec<Stream> {
        let state = self.state.lock().unwrap();
        let mut streams: Vec<Stream> = state.streams.values().cloned().collect();
        streams.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        streams
    }

    pub fn stream(&self, stream_id: &str) -> Option<Stream> {
        self.state.lock().unwrap().streams.get(stream_id).cloned()
    }

    pub fn subscribe_consumer_closed(
        &self,
    ) -> tokio::sync::broadcast::Receiver<ConsumerClosedNotice> {
        self.consumer_closed_tx.subscribe()
    }
}

pub struct RoomRegistry {
    worker_pool: Arc<WorkerPool>,
    rooms: Mutex<HashMap<RoomId, Arc<MediaRoom>>>,
}

impl RoomRegistry {
    pub fn new(worker_pool: Arc<WorkerPool>) -> Self {
        Self {
            worker_pool,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_room(&self, room_id: &str) -> Option<Arc<MediaRoom>> {
        self.rooms.lock().unwrap().get(room_id).cloned()
    }

    /// Idempotent: returns the existing room if present, otherwise picks a
    /// worker by `roomId` and creates a router (spec §4.2).
    pub async fn create_media_room(&self, room_id: RoomId) -> SfuResult<Arc<MediaRoom>> {
        if let Some(room) = self.get_room(&room_id) {
            return Ok(room);
        }

        let worker_index = self.worker_pool.pick_for_room(&room_id)?;
        let router = self
            .worker_pool
            .with_worker(worker_index, |w| w.clone())?
            .create_router(RouterOptions::new(media_codecs()))
            .await
            .map_err(|e| SfuError::Other(anyhow::anyhow!(e)))?;

        let room = Arc::new(MediaRoom {
            id: room_id.clone(),
            router,
            worker_index,
            state: Mutex::new(RoomState::new()),
            consumer_closed_tx: tokio::sync::broadcast::channel(32).0,
        });

        let mut rooms = self.rooms.lock().unwrap();
        match rooms.entry(room_id) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(v) => {
                v.insert(room.clone());
                self.worker_pool.note_room_created(worker_index);
                Ok(room)
            }
        }
    }

    /// Returns the existing router or creates one, same as `create_media_room`.
    pub async fn get_media_router(
        &self,
        room_id: RoomId,
    ) -> SfuResult<mediasoup::router::Router> {
        Ok(self.create_media_room(room_id).await?.router.clone())
    }

    /// Close the router (cascades to transports/producers/consumers inside
    /// mediasoup) and evict the room from the registry (spec §4.2). Speaker
    /// table and cabin teardown are driven by the caller (the `Sfu` facade),
    /// which owns those other registries.
    pub fn close_media_room(&self, room_id: &str) -> SfuResult<Arc<MediaRoom>> {
        let room = self
            .rooms
            .lock()
            .unwrap()
            .remove(room_id)
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Room, room_id.to_string()))?;
        room.router.close();
        self.worker_pool.note_room_closed(room.worker_index);
        log::debug!("closed media room {room_id}");
        Ok(room)
    }
}
