//! Worker Pool (spec §4.1): shards media workers across CPU cores, each
//! with a disjoint RTC port window and one worker-attached [`WebRtcServer`].

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use mediasoup::data_structures::{ListenInfo, Protocol};
use mediasoup::webrtc_server::{WebRtcServer, WebRtcServerListenInfos, WebRtcServerOptions};
use mediasoup::worker::{Worker, WorkerSettings};
use mediasoup::worker_manager::WorkerManager;

use crate::config::Config;
use crate::error::{SfuError, SfuResult};

/// One media worker plus the WebRTC server bound to its port and the RTC
/// port window it owns (spec §4.1).
pub struct WorkerSlot {
    pub worker: Worker,
    pub webrtc_server: WebRtcServer,
    pub rtc_port_range: std::ops::RangeInclusive<u16>,
    /// Crude load estimate: rooms*10 + consumers*5 + producers*2 (spec §4.1).
    pub rooms: AtomicU32,
    pub producers: AtomicU32,
    pub consumers: AtomicU32,
}

impl WorkerSlot {
    fn load(&self) -> u32 {
        self.rooms.load(Ordering::Relaxed) * 10
            + self.consumers.load(Ordering::Relaxed) * 5
            + self.producers.load(Ordering::Relaxed) * 2
    }
}

pub struct WorkerPool {
    worker_manager: WorkerManager,
    config: Config,
    slots: Mutex<Vec<Option<WorkerSlot>>>,
}

impl WorkerPool {
    /// Spawn `min(cpuCount, 16)` workers, each with its own RTC port window
    /// and worker-attached WebRTC server. Fails fatally on bootstrap
    /// failure, per spec §4.1.
    pub async fn initialise(config: Config) -> anyhow::Result<Self> {
        let worker_manager = WorkerManager::new();
        let mut slots = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let slot = spawn_worker(&worker_manager, &config, index).await?;
            slots.push(Some(slot));
        }
        log::info!("worker pool initialised with {} workers", slots.len());
        Ok(Self {
            worker_manager,
            config,
            slots: Mutex::new(slots),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Deterministic room->worker affinity: `index = sum(charCodes(roomId)) mod N`.
    /// Stable across calls with the same `roomId` (spec §4.1, §8).
    pub fn pick_for_room(&self, room_id: &str) -> SfuResult<usize> {
        let n = self.worker_count();
        if n == 0 {
            return Err(SfuError::Other(anyhow::anyhow!("worker pool is empty")));
        }
        let sum: u32 = room_id.chars().map(|c| c as u32).sum();
        Ok((sum as usize) % n)
    }

    /// Compares the tracked load vector across workers; ties broken by
    /// lowest index (spec §4.1).
    pub fn pick_least_loaded(&self) -> SfuResult<usize> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s.load())))
            .min_by_key(|(_, load)| *load)
            .map(|(i, _)| i)
            .ok_or_else(|| SfuError::Other(anyhow::anyhow!("worker pool is empty")))
    }

    pub fn with_worker<R>(&self, index: usize, f: impl FnOnce(&Worker) -> R) -> SfuResult<R> {
        let slots = self.slots.lock().unwrap();
        match slots.get(index).and_then(|s| s.as_ref()) {
            Some(slot) => Ok(f(&slot.worker)),
            None => Err(SfuError::WorkerDied(index)),
        }
    }

    pub fn webrtc_server(&self, index: usize) -> SfuResult<WebRtcServer> {
        let slots = self.slots.lock().unwrap();
        slots
            .get(index)
            .and_then(|s| s.as_ref())
            .map(|s| s.webrtc_server.clone())
            .ok_or(SfuError::WorkerDied(index))
    }

    pub fn note_room_created(&self, index: usize) {
        self.adjust(index, |s| {
            s.rooms.fetch_add(1, Ordering::Relaxed);
        });
    }
    pub fn note_room_closed(&self, index: usize) {
        self.adjust(index, |s| {
            s.rooms.fetch_sub(1, Ordering::Relaxed);
        });
    }
    pub fn note_producer_created(&self, index: usize) {
        self.adjust(index, |s| {
            s.producers.fetch_add(1, Ordering::Relaxed);
        });
    }
    pub fn note_producer_closed(&self, index: usize) {
        self.adjust(index, |s| {
            s.producers.fetch_sub(1, Ordering::Relaxed);
        });
    }
    pub fn note_consumer_created(&self, index: usize) {
        self.adjust(index, |s| {
            s.consumers.fetch_add(1, Ordering::Relaxed);
        });
    }
    pub fn note_consumer_closed(&self, index: usize) {
        self.adjust(index, |s| {
            s.consumers.fetch_sub(1, Ordering::Relaxed);
        });
    }
    pub fn note_consumer_closed_n(&self, index: usize, n: usize) {
        self.adjust(index, |s| {
            s.consumers.fetch_sub(n as u32, Ordering::Relaxed);
        });
    }

    fn adjust(&self, index: usize, f: impl FnOnce(&WorkerSlot)) {
        let slots = self.slots.lock().unwrap();
        if let Some(Some(slot)) = slots.get(index) {
            f(slot);
        }
    }

    /// The platform requires fatal recovery on worker death: deregister the
    /// dead worker, spawn a replacement with the same port window, and
    /// re-install the `died` handler. Rooms previously on it are lost — no
    /// automatic migration (spec §4.1, §7 `WorkerDied`).
    pub async fn replace_dead_worker(self: &std::sync::Arc<Self>, index: usize) -> anyhow::Result<()> {
        log::error!("worker {index} died, spawning replacement");
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(index) {
                *slot = None;
            }
        }
        let slot = spawn_worker(&self.worker_manager, &self.config, index).await?;
        let mut slots = self.slots.lock().unwrap();
        if let Some(entry) = slots.get_mut(index) {
            *entry = Some(slot);
        }
        Ok(())
    }
}

async fn spawn_worker(
    worker_manager: &WorkerManager,
    config: &Config,
    index: usize,
) -> anyhow::Result<WorkerSlot> {
    let rtc_port_range = config.rtc_base_port + index as u16 * config.rtc_worker_window
        ..=config.rtc_base_port + (index as u16 + 1) * config.rtc_worker_window - 1;

    let mut settings = WorkerSettings::default();
    settings.rtc_ports_range = rtc_port_range.clone();

    let worker = worker_manager.create_worker(settings).await?;

    let webrtc_port = config.mediasoup_port + index as u16;
    let listen_ip = config.mediasoup_listen_ip;
    let announced_ip = config.mediasoup_announced_ip;

    let udp_info = listen_info(listen_ip, announced_ip, webrtc_port, Protocol::Udp);
    let tcp_info = listen_info(listen_ip, announced_ip, webrtc_port, Protocol::Tcp);
    let listen_infos = WebRtcServerListenInfos::new(udp_info).insert(tcp_info);

    let webrtc_server = worker
        .create_webrtc_server(WebRtcServerOptions::new(listen_infos))
        .await?;

    let worker_index = index;
    worker
        .on_dead(move |_result| {
            log::error!("mediasoup worker {worker_index} reported dead");
        })
        .detach();

    log::info!(
        "worker {index} ready: rtc ports {:?}, webrtc server on {}:{}",
        rtc_port_range,
        listen_ip,
        webrtc_port
    );

    Ok(WorkerSlot {
        worker,
        webrtc_server,
        rtc_port_range,
        rooms: AtomicU32::new(0),
        producers: AtomicU32::new(0),
        consumers: AtomicU32::new(0),
    })
}

fn listen_info(ip: IpAddr, announced_ip: Option<IpAddr>, port: u16, protocol: Protocol) -> ListenInfo {
    let _ = SocketAddr::new(ip, port); // validate the combination is a real socket address
    ListenInfo {
        protocol,
        ip,
        announced_address: announced_ip.map(|ip| ip.to_string()),
        expose_internal_ip: false,
        port: Some(port),
        port_range: None,
        flags: None,
        send_buffer_size: None,
        recv_buffer_size: None,
    }
}
