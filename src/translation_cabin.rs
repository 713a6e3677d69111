//! Translation Cabin Manager (spec §4.7): ref-counted Plain-RTP bridges to
//! an external translation service, one per `(room, target user, language
//! pair)`.
//!
//! Wire shape: the audio service performs STT+translation+TTS externally.
//! The cabin feeds it the target's microphone as plain RTP (`sendTransport`,
//! comedia=false, fixed ingress `(audioServiceHost, 35000)`) and receives
//! translated audio back on `receiveTransport` (comedia=true, listening on
//! the caller-supplied `sendPort`), republishing it as a normal SFU stream.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::num::{NonZeroU32, NonZeroU8};
use std::sync::Mutex;
use std::time::Instant;

use mediasoup::consumer::{Consumer, ConsumerOptions};
use mediasoup::data_structures::ListenInfo;
use mediasoup::plain_transport::{PlainTransport, PlainTransportOptions, PlainTransportRemoteParameters};
use mediasoup::producer::{Producer, ProducerOptions};
use mediasoup::router::Router;
use mediasoup::rtp_parameters::{
    MediaKind, MimeTypeAudio, RtcpParameters, RtpCodecParameters, RtpCodecParametersParameters,
    RtpEncodingParameters, RtpParameters,
};
use mediasoup::transport::Transport;

use crate::config::AUDIO_SERVICE_INGRESS_PORT;
use crate::error::{NotFoundKind, SfuError, SfuResult};
use crate::media_room::MediaRoom;
use crate::stream::{PeerId, RoomId, Stream, StreamId, StreamType};

fn cabin_id(room_id: &str, target_user_id: &str, source_language: &str, target_language: &str) -> String {
    format!("{room_id}_{target_user_id}_{source_language}_{target_language}")
}

/// `translated_<targetUserId>_<sourceLanguage>_<targetLanguage>` (spec §3).
fn translated_stream_id(target_user_id: &str, source_language: &str, target_language: &str) -> String {
    format!("translated_{target_user_id}_{source_language}_{target_language}")
}

struct Cabin {
    send_transport: PlainTransport,
    receive_transport: PlainTransport,
    #[allow(dead_code)]
    consumer: Consumer,
    #[allow(dead_code)]
    producer: Producer,
    stream_id: StreamId,
    target_user_id: PeerId,
    source_language: String,
    target_language: String,
    /// Non-empty iff the cabin is alive; one entry per listener currently
    /// subscribed to the translated stream (spec §3 invariant).
    consumers: HashSet<PeerId>,
    #[allow(dead_code)]
    created_at: Instant,
}

pub struct CreateCabinOutcome {
    pub stream_id: StreamId,
    pub sfu_listen_port: u16,
    pub consumer_ssrc: Option<u32>,
}

pub struct DestroyCabinOutcome {
    /// `true` once the last listener left and the cabin was actually torn
    /// down — callers surface this as the `"10001"` sentinel (spec §4.7).
    pub torn_down: bool,
}

pub struct CabinProjection {
    pub target_user_id: PeerId,
    pub source_language: String,
    pub target_language: String,
}

#[derive(Default)]
pub struct CabinManager {
    cabins: Mutex<HashMap<String, Cabin>>,
}

impl CabinManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cabins `userId` is currently listening to, restricted to this room
    /// (spec §4.7 "List").
    pub fn list_cabins(&self, room_id: &RoomId, user_id: &str) -> Vec<CabinProjection> {
        let prefix = format!("{room_id}_");
        self.cabins
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, cabin)| id.starts_with(&prefix) && cabin.consumers.contains(user_id))
            .map(|(_, cabin)| CabinProjection {
                target_user_id: cabin.target_user_id.clone(),
                source_language: cabin.source_language.clone(),
                target_language: cabin.target_language.clone(),
            })
            .collect()
    }

    /// Create (or join) the cabin bridging `targetUserId`'s audio into the
    /// translation service and back, per spec §4.7 steps 1-7.
    ///
    /// `audio_service_rx_port` is accepted for wire-contract parity with
    /// `AllocatePort`'s `audio_port` field but is not used to pick the
    /// ingress address: the SFU always sends to the fixed
    /// `(audioServiceHost, 35000)` ingress (spec §5 "Fixed external ports"),
    /// matching design note 5's observation that some port fields in this
    /// RPC are redundant/vestigial rather than load-bearing.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_cabin(
        &self,
        room: &MediaRoom,
        router: &Router,
        listen_info: ListenInfo,
        audio_service_host: IpAddr,
        source_user_id: &str,
        target_user_id: &str,
        source_language: &str,
        target_language: &str,
        _audio_service_rx_port: u16,
        sfu_listen_port: u16,
        ssrc: u32,
    ) -> SfuResult<CreateCabinOutcome> {
        let id = cabin_id(&room.id, target_user_id, source_language, target_language);

        {
            let mut cabins = self.cabins.lock().unwrap();
            if let Some(cabin) = cabins.get_mut(&id) {
                cabin.consumers.insert(source_user_id.to_string());
                return Ok(CreateCabinOutcome {
                    stream_id: cabin.stream_id.clone(),
                    sfu_listen_port: cabin.receive_transport.tuple().local_port(),
                    consumer_ssrc: None,
                });
            }
        }

        let target_producer_id = find_target_audio_producer(room, target_user_id)
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Producer, target_user_id.to_string()))?;

        let mut send_options = PlainTransportOptions::new(listen_info.clone());
        send_options.comedia = false;
        send_options.rtcp_mux = true;
        let send_transport = router
            .create_plain_transport(send_options)
            .await
            .map_err(|e| SfuError::Other(anyhow::anyhow!(e)))?;

        if let Err(e) = send_transport
            .connect(PlainTransportRemoteParameters {
                ip: audio_service_host,
                port: AUDIO_SERVICE_INGRESS_PORT,
                rtcp_port: None,
            })
            .await
        {
            send_transport.close();
            return Err(SfuError::Upstream(e.to_string()));
        }

        let send_rtp_capabilities = router.rtp_capabilities().clone().into();
        let mut consumer_options = ConsumerOptions::new(target_producer_id, send_rtp_capabilities);
        consumer_options.paused = true;
        let consumer = match send_transport.consume(consumer_options).await {
            Ok(c) => c,
            Err(e) => {
                send_transport.close();
                return Err(SfuError::Other(anyhow::anyhow!(e)));
            }
        };
        if let Err(e) = consumer.resume().await {
            send_transport.close();
            return Err(SfuError::Other(anyhow::anyhow!(e)));
        }

        let recv_listen_info = ListenInfo {
            port: Some(sfu_listen_port),
            ..listen_info
        };
        let mut recv_options = PlainTransportOptions::new(recv_listen_info);
        recv_options.comedia = true;
        recv_options.rtcp_mux = true;
        let receive_transport = match router.create_plain_transport(recv_options).await {
            Ok(t) => t,
            Err(e) => {
                send_transport.close();
                return Err(SfuError::Other(anyhow::anyhow!(e)));
            }
        };

        let stream_id = translated_stream_id(target_user_id, source_language, target_language);
        let rtp_parameters = translated_rtp_parameters(&id, target_user_id, ssrc);
        let producer = match receive_transport
            .produce(ProducerOptions::new(MediaKind::Audio, rtp_parameters.clone()))
            .await
        {
            Ok(p) => p,
            Err(e) => {
                send_transport.close();
                receive_transport.close();
                return Err(SfuError::Other(anyhow::anyhow!(e)));
            }
        };

        let stream = Stream {
            stream_id: stream_id.clone(),
            publisher_id: target_user_id.to_string(),
            producer_id: producer.id(),
            room_id: room.id.clone(),
            rtp_parameters,
            metadata: serde_json::json!({ "type": "translated_audio", "cabinId": id }),
            stream_type: StreamType::TranslatedAudio,
        };
        {
            let mut state = room.state.lock().unwrap();
            state
                .producer_to_stream
                .insert(producer.id(), stream_id.clone());
            state.producers.insert(stream_id.clone(), producer.clone());
            state.streams.insert(stream_id.clone(), stream);
        }

        let consumer_ssrc = consumer
            .rtp_parameters()
            .encodings
            .first()
            .and_then(|e| e.ssrc);
        let sfu_listen_port = receive_transport.tuple().local_port();

        self.cabins.lock().unwrap().insert(
            id.clone(),
            Cabin {
                send_transport,
                receive_transport,
                consumer,
                producer,
                stream_id: stream_id.clone(),
                target_user_id: target_user_id.to_string(),
                source_language: source_language.to_string(),
                target_language: target_language.to_string(),
                consumers: HashSet::from([source_user_id.to_string()]),
                created_at: Instant::now(),
            },
        );

        log::info!("cabin {id} created (target={target_user_id}, {source_language}->{target_language})");

        Ok(CreateCabinOutcome {
            stream_id,
            sfu_listen_port,
            consumer_ssrc,
        })
    }

    /// Drop `sourceUserId` from the cabin's listener set; tear down only
    /// once it's empty (spec §4.7 "Destroy (ref-counted)").
    pub fn destroy_cabin(
        &self,
        room: &MediaRoom,
        room_id: &str,
        source_user_id: &str,
        target_user_id: &str,
        source_language: &str,
        target_language: &str,
    ) -> SfuResult<DestroyCabinOutcome> {
        let id = cabin_id(room_id, target_user_id, source_language, target_language);
        let mut cabins = self.cabins.lock().unwrap();
        let cabin = cabins
            .get_mut(&id)
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Cabin, id.clone()))?;

        cabin.consumers.remove(source_user_id);
        if !cabin.consumers.is_empty() {
            return Ok(DestroyCabinOutcome { torn_down: false });
        }

        let cabin = cabins.remove(&id).expect("just matched above");
        drop(cabins);
        self.teardown(room, &id, cabin);
        Ok(DestroyCabinOutcome { torn_down: true })
    }

    /// Unconditional teardown of every cabin in a room, called from the
    /// room-close cascade regardless of ref-count (spec §4.2, §4.7).
    pub fn clear_room_cabins(&self, room: &MediaRoom) {
        let prefix = format!("{}_", room.id);
        let ids: Vec<String> = {
            let cabins = self.cabins.lock().unwrap();
            cabins.keys().filter(|id| id.starts_with(&prefix)).cloned().collect()
        };
        for id in ids {
            if let Some(cabin) = self.cabins.lock().unwrap().remove(&id) {
                self.teardown(room, &id, cabin);
            }
        }
    }

    fn teardown(&self, room: &MediaRoom, id: &str, cabin: Cabin) {
        cabin.receive_transport.close();
        cabin.send_transport.close();

        let mut state = room.state.lock().unwrap();
        if let Some(stream) = state.streams.remove(&cabin.stream_id) {
            state.producer_to_stream.remove(&stream.producer_id);
        }
        state.producers.remove(&cabin.stream_id);
        drop(state);

        log::info!("cabin {id} torn down");
    }
}

/// Scans the room's live streams for the target's WebRTC audio producer:
/// stream key starting with `"<targetUserId>_audio_"`, kind audio (spec
/// §4.7 step 2).
fn find_target_audio_producer(room: &MediaRoom, target_user_id: &str) -> Option<mediasoup::producer::ProducerId> {
    let prefix = format!("{target_user_id}_audio_");
    let state = room.state.lock().unwrap();
    state
        .streams
        .values()
        .find(|s| s.stream_type == StreamType::Audio && s.stream_id.starts_with(&prefix))
        .map(|s| s.producer_id)
}

/// Opus/48k/2ch, payload type 100, single encoding carrying the caller's
/// SSRC, `mid = translated_<cabinId>`, `cname = translated_<targetUserId>`
/// (spec §4.7 step 5).
fn translated_rtp_parameters(cabin_id: &str, target_user_id: &str, ssrc: u32) -> RtpParameters {
    RtpParameters {
        mid: Some(format!("translated_{cabin_id}")),
        codecs: vec![RtpCodecParameters::Audio {
            mime_type: MimeTypeAudio::Opus,
            payload_type: 100,
            clock_rate: NonZeroU32::new(48000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::from([("useinbandfec", 1u32.into())]),
            rtcp_feedback: vec![],
        }],
        header_extensions: vec![],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(ssrc),
            ..RtpEncodingParameters::default()
        }],
        rtcp: RtcpParameters {
            cname: Some(format!("translated_{target_user_id}")),
            ..RtcpParameters::default()
        },
    }
}
