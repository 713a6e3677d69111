//! Stream data model (spec §3) and `streamId` derivation (spec §4.4).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use mediasoup::producer::ProducerId;
use mediasoup::rtp_parameters::RtpParameters;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{SfuError, SfuResult};

pub type RoomId = String;
pub type PeerId = String;
pub type StreamId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Audio,
    Video,
    Screen,
    ScreenAudio,
    TranslatedAudio,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Audio => "audio",
            StreamType::Video => "video",
            StreamType::Screen => "screen",
            StreamType::ScreenAudio => "screen_audio",
            StreamType::TranslatedAudio => "translated_audio",
        }
    }
}

/// An SFU-level abstraction tying `(publisher, producer, rtpParameters,
/// metadata)` to a stable id used by clients (spec §3, glossary).
#[derive(Debug, Clone)]
pub struct Stream {
    pub stream_id: StreamId,
    pub publisher_id: PeerId,
    pub producer_id: ProducerId,
    pub room_id: RoomId,
    pub rtp_parameters: RtpParameters,
    pub metadata: serde_json::Value,
    pub stream_type: StreamType,
}

/// Detect screen share from caller metadata first, then producer-side app
/// data, per spec §9 "Screen-share detection" (metadata wins on conflict).
pub fn detect_stream_type(
    kind_is_video: bool,
    caller_metadata: &serde_json::Value,
    producer_app_data: Option<&serde_json::Value>,
) -> StreamType {
    let is_screen_share = |v: &serde_json::Value| -> Option<bool> {
        if v.get("isScreenShare").and_then(|x| x.as_bool()) == Some(true) {
            return Some(true);
        }
        match v.get("type").and_then(|x| x.as_str()) {
            Some("screen") | Some("screen_audio") => Some(true),
            Some(_) => Some(false),
            None => None,
        }
    };

    let from_metadata = is_screen_share(caller_metadata);
    let is_screen = match from_metadata {
        Some(v) => v,
        None => producer_app_data
            .and_then(is_screen_share)
            .unwrap_or(false),
    };

    if is_screen {
        if kind_is_video {
            StreamType::Screen
        } else {
            StreamType::ScreenAudio
        }
    } else if kind_is_video {
        StreamType::Video
    } else {
        StreamType::Audio
    }
}

fn rand5() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..5)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// `<publisherId>_<streamType>_<unixMillis>_<rand5>`, retried up to 10 times
/// on collision with the registry, appending a counter suffix (spec §3, §4.4).
pub fn generate_stream_id(
    publisher_id: &str,
    stream_type: StreamType,
    existing: &HashMap<StreamId, Stream>,
) -> SfuResult<StreamId> {
    let millis = unix_millis();
    for attempt in 0..10 {
        let mut id = format!(
            "{}_{}_{}_{}",
            publisher_id,
            stream_type.as_str(),
            millis,
            rand5()
        );
        if attempt > 0 {
            id.push_str(&attempt.to_string());
        }
        if !existing.contains_key(&id) {
            return Ok(id);
        }
    }
    Err(SfuError::ResourceExhausted(format!(
        "could not derive a unique streamId for publisher {publisher_id} after 10 attempts"
    )))
}
