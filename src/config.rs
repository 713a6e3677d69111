use std::net::IpAddr;
use std::time::Duration;

/// Process-wide configuration, assembled from environment variables per
/// spec §6 "Configuration (enumerated)", with typed defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub mediasoup_listen_ip: IpAddr,
    pub mediasoup_announced_ip: Option<IpAddr>,
    pub mediasoup_port: u16,
    pub rtc_base_port: u16,
    pub rtc_worker_window: u16,

    pub use_ice_servers: bool,
    pub stun_server_url: Option<String>,
    pub turn_server_url: Option<String>,
    pub turn_server_username: Option<String>,
    pub turn_server_password: Option<String>,

    pub audio_service_host: IpAddr,

    pub worker_count: usize,

    pub active_speaker_threshold: Duration,
    pub active_speaker_sweep_interval: Duration,
    pub active_speaker_inactivity: Duration,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let worker_count = env_or("SFU_WORKER_COUNT", 0usize);
        let worker_count = if worker_count == 0 {
            num_cpus().min(16)
        } else {
            worker_count.min(16)
        };

        Config {
            mediasoup_listen_ip: env_or("MEDIASOUP_LISTEN_IP", "0.0.0.0".parse().unwrap()),
            mediasoup_announced_ip: env_opt("MEDIASOUP_ANNOUNCED_IP")
                .and_then(|v| v.parse().ok()),
            mediasoup_port: env_or("MEDIASOUP_PORT", 55555),
            rtc_base_port: env_or("RTC_BASE_PORT", 10000),
            rtc_worker_window: env_or("RTC_WORKER_WINDOW", 1000),

            use_ice_servers: env_or("USE_ICE_SERVERS", false),
            stun_server_url: env_opt("STUN_SERVER_URL"),
            turn_server_url: env_opt("TURN_SERVER_URL"),
            turn_server_username: env_opt("TURN_SERVER_USERNAME"),
            turn_server_password: env_opt("TURN_SERVER_PASSWORD"),

            audio_service_host: env_or("AUDIO_SERVICE_HOST", "127.0.0.1".parse().unwrap()),

            worker_count,

            active_speaker_threshold: Duration::from_millis(env_or(
                "ACTIVE_SPEAKER_THRESHOLD_MS",
                2000,
            )),
            active_speaker_sweep_interval: Duration::from_millis(env_or(
                "ACTIVE_SPEAKER_SWEEP_MS",
                5000,
            )),
            active_speaker_inactivity: Duration::from_millis(env_or(
                "ACTIVE_SPEAKER_INACTIVITY_MS",
                5000,
            )),
        }
    }
}

/// Fixed external port the audio service listens on for the SFU's plain
/// transport sends (spec §5 "Fixed external ports").
pub const AUDIO_SERVICE_INGRESS_PORT: u16 = 35000;

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
