pub mod active_speaker;
pub mod cmdline;
pub mod config;
pub mod error;
pub mod media_room;
pub mod producer_consumer;
pub mod rpc;
pub mod sfu;
pub mod stream;
pub mod transport_registry;
pub mod translation_cabin;
pub mod worker_pool;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
