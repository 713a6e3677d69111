//! Active-Speaker Tracker (spec §4.5): per-room last-spoke timestamps, a
//! query window, and a periodic sweep that evicts stale entries.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::stream::{PeerId, RoomId};

#[derive(Default)]
struct RoomSpeakers {
    last_spoke: HashMap<PeerId, Instant>,
}

/// Tracks, per room, the last instant each peer was reported as speaking.
/// `active_speakers` answers "who has spoken in the last `threshold`"; the
/// sweep task forgets peers untouched for `inactivity` so the maps don't
/// grow unboundedly across a long-lived room (spec §4.5).
pub struct ActiveSpeakerTracker {
    rooms: Mutex<HashMap<RoomId, RoomSpeakers>>,
    threshold: Duration,
    inactivity: Duration,
}

impl ActiveSpeakerTracker {
    pub fn new(threshold: Duration, inactivity: Duration) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            threshold,
            inactivity,
        }
    }

    pub fn mark_speaking(&self, room_id: &str, peer_id: &str) {
        let mut rooms = self.rooms.lock().unwrap();
        rooms
            .entry(room_id.to_string())
            .or_default()
            .last_spoke
            .insert(peer_id.to_string(), Instant::now());
    }

    /// Stop-speaking is an explicit signal, distinct from simply timing out:
    /// it removes the entry immediately rather than waiting for the sweep.
    pub fn mark_stop_speaking(&self, room_id: &str, peer_id: &str) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(speakers) = rooms.get_mut(room_id) {
            speakers.last_spoke.remove(peer_id);
        }
    }

    /// Peers whose last `mark_speaking` was within `threshold` of now,
    /// ordered most-recent first (spec §4.5).
    pub fn active_speakers(&self, room_id: &str) -> Vec<PeerId> {
        let rooms = self.rooms.lock().unwrap();
        let Some(speakers) = rooms.get(room_id) else {
            return vec![];
        };
        let now = Instant::now();
        let mut active: Vec<(PeerId, Instant)> = speakers
            .last_spoke
            .iter()
            .filter(|(_, at)| now.duration_since(**at) <= self.threshold)
            .map(|(peer, at)| (peer.clone(), *at))
            .collect();
        active.sort_by(|a, b| b.1.cmp(&a.1));
        active.into_iter().map(|(peer, _)| peer).collect()
    }

    pub fn clear_room(&self, room_id: &str) {
        self.rooms.lock().unwrap().remove(room_id);
    }

    /// One sweep pass: drop any peer untouched for longer than `inactivity`,
    /// and any room left with no tracked peers. Intended to be driven by a
    /// periodic `tokio::time::interval` in the caller (spec §4.5).
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut rooms = self.rooms.lock().unwrap();
        rooms.retain(|_, speakers| {
            speakers
                .last_spoke
                .retain(|_, at| now.duration_since(*at) <= self.inactivity);
            !speakers.last_spoke.is_empty()
        });
    }
}
