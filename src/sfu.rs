//! Top-level facade (spec.md §6 "the core"): wires the worker pool, room/
//! transport registries, producer/consumer engine, active-speaker tracker,
//! and cabin manager behind the operations the RPC layer calls.

use std::net::IpAddr;
use std::sync::Arc;

use mediasoup::consumer::ConsumerId;
use mediasoup::data_structures::{DtlsParameters, ListenInfo, Protocol};
use mediasoup::rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters};
use mediasoup::transport::TransportId;
use mediasoup::webrtc_transport::WebRtcTransportListenInfos;

use crate::active_speaker::ActiveSpeakerTracker;
use crate::config::Config;
use crate::error::{NotFoundKind, SfuError, SfuResult};
use crate::media_room::{MediaRoom, RoomRegistry};
use crate::producer_consumer::{
    ConsumeOutcome, PinOutcome, ProduceOutcome, ProducerConsumerEngine, UnpinOutcome,
};
use crate::stream::{PeerId, RoomId, Stream, StreamId};
use crate::transport_registry::{ConnectOutcome, TransportRegistry};
use crate::translation_cabin::{
    CabinManager, CabinProjection, CreateCabinOutcome, DestroyCabinOutcome,
};
use crate::worker_pool::WorkerPool;

pub struct Sfu {
    worker_pool: Arc<WorkerPool>,
    rooms: RoomRegistry,
    transports: TransportRegistry,
    engine: ProducerConsumerEngine,
    speakers: ActiveSpeakerTracker,
    cabins: CabinManager,
    listen_ip: IpAddr,
    announced_ip: Option<IpAddr>,
    audio_service_host: IpAddr,
}

impl Sfu {
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let listen_ip = config.mediasoup_listen_ip;
        let announced_ip = config.mediasoup_announced_ip;
        let audio_service_host = config.audio_service_host;
        let sweep_interval = config.active_speaker_sweep_interval;
        let threshold = config.active_speaker_threshold;
        let inactivity = config.active_speaker_inactivity;

        let worker_pool = Arc::new(WorkerPool::initialise(config).await?);
        let local_pool = tokio_local::new_local_pool(worker_pool.worker_count().max(1));
        let transports = TransportRegistry::new();

        let sfu = Arc::new(Self {
            rooms: RoomRegistry::new(worker_pool.clone()),
            engine: ProducerConsumerEngine::new(transports.clone(), local_pool, worker_pool.clone()),
            transports,
            speakers: ActiveSpeakerTracker::new(threshold, inactivity),
            cabins: CabinManager::new(),
            worker_pool,
            listen_ip,
            announced_ip,
            audio_service_host,
        });

        sfu.clone().spawn_speaker_sweeper(sweep_interval);
        Ok(sfu)
    }

    fn spawn_speaker_sweeper(self: Arc<Self>, interval: std::time::Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.speakers.sweep();
            }
        });
    }

    fn listen_info(&self, protocol: Protocol) -> ListenInfo {
        ListenInfo {
            protocol,
            ip: self.listen_ip,
            announced_address: self.announced_ip.map(|ip| ip.to_string()),
            expose_internal_ip: false,
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }

    fn listen_infos(&self) -> WebRtcTransportListenInfos {
        WebRtcTransportListenInfos::new(self.listen_info(Protocol::Udp))
            .insert(self.listen_info(Protocol::Tcp))
    }

    pub async fn create_media_room(&self, room_id: RoomId) -> SfuResult<Arc<MediaRoom>> {
        self.rooms.create_media_room(room_id).await
    }

    pub fn get_room(&self, room_id: &str) -> SfuResult<Arc<MediaRoom>> {
        self.rooms
            .get_room(room_id)
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Room, room_id.to_string()))
    }

    /// Cascades per spec.md §4.2/§4.7: close the router (which itself closes
    /// every transport/producer/consumer it owns), clear the active-speaker
    /// table, and tear down every cabin, unconditionally.
    pub fn close_media_room(&self, room_id: &str) -> SfuResult<()> {
        let room = self.rooms.close_media_room(room_id)?;
        self.cabins.clear_room_cabins(&room);
        self.speakers.clear_room(room_id);
        Ok(())
    }

    /// Consumer-closed notices (spec §4.4 rule 5) for peers who want to push
    /// evictions to a live client via a GraphQL subscription.
    pub fn subscribe_consumer_closed(
        &self,
        room_id: &str,
    ) -> SfuResult<tokio::sync::broadcast::Receiver<crate::media_room::ConsumerClosedNotice>> {
        let room = self.get_room(room_id)?;
        Ok(room.subscribe_consumer_closed())
    }

    pub async fn create_webrtc_transport(&self, room_id: &str) -> SfuResult<TransportId> {
        let room = self.get_room(room_id)?;
        let webrtc_server = self.worker_pool.webrtc_server(room.worker_index).ok();
        let transport = self
            .transports
            .create_webrtc_transport(&room.router, webrtc_server, self.listen_infos())
            .await?;
        Ok(transport.id())
    }

    pub async fn connect_transport(
        &self,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> SfuResult<ConnectOutcome> {
        self.transports
            .connect_transport(transport_id, dtls_parameters)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn produce(
        &self,
        room_id: &str,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        metadata: serde_json::Value,
        peer_id: PeerId,
    ) -> SfuResult<ProduceOutcome> {
        let room = self.get_room(room_id)?;
        self.engine
            .produce(&room, transport_id, kind, rtp_parameters, metadata, peer_id)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn consume(
        &self,
        room_id: &str,
        stream_id: Option<StreamId>,
        transport_id: TransportId,
        rtp_capabilities: Option<RtpCapabilities>,
        peer_id: PeerId,
        force_pin: bool,
    ) -> SfuResult<ConsumeOutcome> {
        let room = self.get_room(room_id)?;
        self.engine
            .consume(&room, stream_id, transport_id, rtp_capabilities, peer_id, force_pin)
            .await
    }

    pub async fn resume_consumer(&self, room_id: &str, consumer_id: ConsumerId) -> SfuResult<()> {
        let room = self.get_room(room_id)?;
        self.engine.resume_consumer(&room, consumer_id).await
    }

    pub fn priority_streams(&self, room_id: &str) -> SfuResult<Vec<Stream>> {
        let room = self.get_room(room_id)?;
        Ok(self.engine.priority_streams(&room))
    }

    pub async fn pin_user(
        &self,
        room_id: &str,
        pinner: &str,
        pinned: &str,
        transport_id: TransportId,
        rtp_capabilities: Option<RtpCapabilities>,
    ) -> SfuResult<PinOutcome> {
        let room = self.get_room(room_id)?;
        self.engine
            .pin_user(&room, pinner, pinned, transport_id, rtp_capabilities)
            .await
    }

    pub async fn unpin_user(
        &self,
        room_id: &str,
        unpinner: &str,
        unpinned: &str,
    ) -> SfuResult<UnpinOutcome> {
        let room = self.get_room(room_id)?;
        self.engine.unpin_user(&room, unpinner, unpinned).await
    }

    pub fn unpublish_stream(&self, room_id: &str, stream_id: &str) -> SfuResult<()> {
        let room = self.get_room(room_id)?;
        self.engine.unpublish_stream(&room, stream_id)
    }

    pub fn remove_participant_media(&self, room_id: &str, peer_id: &str) -> SfuResult<Vec<StreamId>> {
        let room = self.get_room(room_id)?;
        Ok(self.engine.remove_participant_media(&room, peer_id))
    }

    pub fn update_stream_metadata(
        &self,
        room_id: &str,
        stream_id: &str,
        patch: serde_json::Value,
    ) -> SfuResult<()> {
        let room = self.get_room(room_id)?;
        self.engine.update_stream_metadata(&room, stream_id, patch)
    }

    pub fn mark_speaking(&self, room_id: &str, peer_id: &str) {
        self.speakers.mark_speaking(room_id, peer_id);
    }

    pub fn mark_stop_speaking(&self, room_id: &str, peer_id: &str) {
        self.speakers.mark_stop_speaking(room_id, peer_id);
    }

    pub fn active_speakers(&self, room_id: &str) -> Vec<PeerId> {
        self.speakers.active_speakers(room_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_cabin(
        &self,
        room_id: &str,
        source_user_id: &str,
        target_user_id: &str,
        source_language: &str,
        target_language: &str,
        audio_service_rx_port: u16,
        sfu_listen_port: u16,
        ssrc: u32,
    ) -> SfuResult<CreateCabinOutcome> {
        let room = self.get_room(room_id)?;
        self.cabins
            .create_cabin(
                &room,
                &room.router,
                self.listen_info(Protocol::Udp),
                self.audio_service_host,
                source_user_id,
                target_user_id,
                source_language,
                target_language,
                audio_service_rx_port,
                sfu_listen_port,
                ssrc,
            )
            .await
    }

    pub fn list_cabins(&self, room_id: &str, user_id: &str) -> Vec<CabinProjection> {
        self.cabins.list_cabins(&room_id.to_string(), user_id)
    }

    pub fn destroy_cabin(
        &self,
        room_id: &str,
        source_user_id: &str,
        target_user_id: &str,
        source_language: &str,
        target_language: &str,
    ) -> SfuResult<DestroyCabinOutcome> {
        let room = self.get_room(room_id)?;
        self.cabins.destroy_cabin(
            &room,
            room_id,
            source_user_id,
            target_user_id,
            source_language,
            target_language,
        )
    }
}
