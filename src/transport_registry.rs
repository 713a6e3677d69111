//! Transport Registry (spec §4.3).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use mediasoup::data_structures::DtlsParameters;
use mediasoup::router::Router;
use mediasoup::sctp_parameters::NumSctpStreams;
use mediasoup::transport::{Transport, TransportId};
use mediasoup::webrtc_server::WebRtcServer;
use mediasoup::webrtc_transport::{
    WebRtcTransport, WebRtcTransportListenInfos, WebRtcTransportOptions,
    WebRtcTransportRemoteParameters,
};

use crate::error::{NotFoundKind, SfuError, SfuResult};

const SCTP_STREAMS: NumSctpStreams = NumSctpStreams {
    os: 1024,
    mis: 1024,
};
const MAX_SCTP_MESSAGE_SIZE: u32 = 262144;
const INITIAL_OUTGOING_BITRATE: u32 = 1_000_000;

struct Shared {
    transports: Mutex<HashMap<TransportId, WebRtcTransport>>,
    connected: Mutex<HashSet<TransportId>>,
}

#[derive(Clone)]
pub struct TransportRegistry {
    shared: Arc<Shared>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                transports: Mutex::new(HashMap::new()),
                connected: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Create via the room's router, preferring the worker-local WebRTC
    /// server; fall back to per-transport `listenIps` if no server is
    /// available. Enables UDP+TCP, preferUdp, SCTP (OS=MIS=1024,
    /// max message 262144), initial outgoing bitrate 1 Mbps (spec §4.3).
    pub async fn create_webrtc_transport(
        &self,
        router: &Router,
        webrtc_server: Option<WebRtcServer>,
        fallback_listen_infos: WebRtcTransportListenInfos,
    ) -> SfuResult<WebRtcTransport> {
        let mut options = match webrtc_server {
            Some(server) => WebRtcTransportOptions::new_with_server(server),
            None => WebRtcTransportOptions::new(fallback_listen_infos),
        };
        options.enable_udp = true;
        options.enable_tcp = true;
        options.prefer_udp = true;
        options.enable_sctp = true;
        options.num_sctp_streams = SCTP_STREAMS;
        options.max_sctp_message_size = MAX_SCTP_MESSAGE_SIZE;
        options.sctp_send_buffer_size = MAX_SCTP_MESSAGE_SIZE;
        options.initial_available_outgoing_bitrate = INITIAL_OUTGOING_BITRATE;

        let transport = router
            .create_webrtc_transport(options)
            .await
            .map_err(|e| SfuError::Other(anyhow::anyhow!(e)))?;

        self.register(transport.clone());
        Ok(transport)
    }

    fn register(&self, transport: WebRtcTransport) {
        let id = transport.id();
        self.shared
            .transports
            .lock()
            .unwrap()
            .insert(id, transport.clone());

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        transport
            .on_router_close(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.transports.lock().unwrap().remove(&id);
                    shared.connected.lock().unwrap().remove(&id);
                }
            })
            .detach();

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        transport
            .on_close(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.transports.lock().unwrap().remove(&id);
                    shared.connected.lock().unwrap().remove(&id);
                }
            })
            .detach();
    }

    pub fn get(&self, id: TransportId) -> Option<WebRtcTransport> {
        self.shared.transports.lock().unwrap().get(&id).cloned()
    }

    /// Idempotent: if already connected, return a non-fatal success with no
    /// DTLS re-handshake; otherwise connect and mark it (spec §4.3, §7
    /// `AlreadyConnected`). Fails with `NotFound` if unknown.
    pub async fn connect_transport(
        &self,
        id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> SfuResult<ConnectOutcome> {
        let transport = self
            .get(id)
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Transport, id.to_string()))?;

        if self.shared.connected.lock().unwrap().contains(&id) {
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        transport
            .connect(WebRtcTransportRemoteParameters { dtls_parameters })
            .await
            .map_err(|e| SfuError::Other(anyhow::anyhow!(e)))?;

        self.shared.connected.lock().unwrap().insert(id);
        Ok(ConnectOutcome::Connected)
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
}
