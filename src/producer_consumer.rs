//! Producer/Consumer Engine (spec §4.4): produce, consume, resume, priority
//! admission, pin/unpin overrides, unpublish, and participant media removal.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use mediasoup::consumer::{Consumer, ConsumerId, ConsumerOptions};
use mediasoup::producer::{Producer, ProducerId, ProducerOptions};
use mediasoup::rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters};
use mediasoup::transport::{Transport, TransportId};

use crate::error::{NotFoundKind, SfuError, SfuResult};
use crate::media_room::MediaRoom;
use crate::stream::{self, PeerId, Stream, StreamId, StreamType};
use crate::transport_registry::TransportRegistry;
use crate::worker_pool::WorkerPool;

/// Only the first 10 streams (by sorted `streamId`) auto-admit consumers
/// (spec §4.4 "Priority policy", glossary).
pub const PRIORITY_CAP: usize = 10;

pub struct ProducerConsumerEngine {
    transports: TransportRegistry,
    local_pool: tokio_local::LocalPoolHandle,
    worker_pool: Arc<WorkerPool>,
}

pub struct ProduceOutcome {
    pub producer_id: ProducerId,
    pub stream_id: StreamId,
    pub is_priority: bool,
    pub total_streams: usize,
}

/// `consume` never fails just because the stream is out of priority — that's
/// a successful, structured non-admission (spec §7 `AdmissionDenied`).
pub enum ConsumeOutcome {
    Created(Box<ConsumeCreated>),
    NotInPriority,
}

pub struct ConsumeCreated {
    pub consumer_id: ConsumerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub stream_id: StreamId,
    pub producer_id: ProducerId,
}

pub struct PinOutcome {
    pub already_priority: bool,
    pub consumers_created: Vec<StreamId>,
}

pub struct UnpinOutcome {
    pub still_in_priority: bool,
    pub consumers_removed: Vec<ConsumerId>,
}

impl ProducerConsumerEngine {
    pub fn new(
        transports: TransportRegistry,
        local_pool: tokio_local::LocalPoolHandle,
        worker_pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            transports,
            local_pool,
            worker_pool,
        }
    }

    /// The first `PRIORITY_CAP` streams in a room, sorted ascending by
    /// `streamId` (an approximate "first-in wins" cap, since streamIds embed
    /// the creation timestamp). Recomputed lazily on every call — no
    /// invalidation needed (spec §4.4).
    pub fn priority_streams(&self, room: &MediaRoom) -> Vec<Stream> {
        let mut streams = room.streams_sorted_by_id();
        streams.truncate(PRIORITY_CAP);
        streams
    }

    pub fn prioritised_users(&self, room: &MediaRoom) -> HashSet<PeerId> {
        self.priority_streams(room)
            .into_iter()
            .map(|s| s.publisher_id)
            .collect()
    }

    /// Create a producer on `transport_id`, derive a `streamId`, and
    /// register the Stream (spec §4.4 "Produce").
    pub async fn produce(
        &self,
        room: &Arc<MediaRoom>,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        metadata: serde_json::Value,
        peer_id: PeerId,
    ) -> SfuResult<ProduceOutcome> {
        let transport = self
            .transports
            .get(transport_id)
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Transport, transport_id.to_string()))?;

        let stream_type = stream::detect_stream_type(kind == MediaKind::Video, &metadata, None);

        let stream_id = {
            let state = room.state.lock().unwrap();
            stream::generate_stream_id(&peer_id, stream_type, &state.streams)?
        };

        let local_pool = self.local_pool.clone();
        let producer: Producer = local_pool
            .spawn_pinned(move || async move {
                transport
                    .produce(ProducerOptions::new(kind, rtp_parameters))
                    .await
            })
            .await
            .map_err(|_| SfuError::Other(anyhow::anyhow!("producer creation task was dropped")))?
            .map_err(|e| SfuError::Other(anyhow::anyhow!(e)))?;

        self.subscribe_producer_transport_close(room, &stream_id, &producer);

        let stream = Stream {
            stream_id: stream_id.clone(),
            publisher_id: peer_id,
            producer_id: producer.id(),
            room_id: room.id.clone(),
            rtp_parameters: producer.rtp_parameters().clone(),
            metadata,
            stream_type,
        };

        let total_streams = {
            let mut state = room.state.lock().unwrap();
            state
                .producer_to_stream
                .insert(producer.id(), stream_id.clone());
            state.streams.insert(stream_id.clone(), stream);
            state.producers.insert(stream_id.clone(), producer.clone());
            state.streams.len()
        };
        self.worker_pool.note_producer_created(room.worker_index);

        let is_priority = self
            .priority_streams(room)
            .iter()
            .any(|s| s.stream_id == stream_id);

        log::trace!("+producer {} streamId={} (room {})", producer.id(), stream_id, room.id);

        Ok(ProduceOutcome {
            producer_id: producer.id(),
            stream_id,
            is_priority,
            total_streams,
        })
    }

    /// On `transportclose`, remove the producer and its Stream from the
    /// room's registries (spec §4.4 "Produce": "Subscribe to transportclose:
    /// on close, remove producer and Stream entries"). Each consumer of this
    /// producer evicts itself independently via its own `producerclose`
    /// hook (`register_consumer`); mediasoup closes those consumers as part
    /// of closing the producer, so no double bookkeeping is needed here.
    fn subscribe_producer_transport_close(
        &self,
        room: &Arc<MediaRoom>,
        stream_id: &str,
        producer: &Producer,
    ) {
        let weak_room: Weak<MediaRoom> = Arc::downgrade(room);
        let worker_pool = self.worker_pool.clone();
        let stream_id = stream_id.to_string();
        producer
            .on_transport_close(move || {
                if let Some(room) = weak_room.upgrade() {
                    let mut state = room.state.lock().unwrap();
                    state.producers.remove(&stream_id);
                    if let Some(stream) = state.streams.remove(&stream_id) {
                        state.producer_to_stream.remove(&stream.producer_id);
                    }
                    drop(state);
                    worker_pool.note_producer_closed(room.worker_index);
                    log::trace!("-producer streamId={} (transport closed, room {})", stream_id, room.id);
                }
            })
            .detach();
    }

    /// Consume rules (spec §4.4):
    /// 1. Missing `streamId` → fallback lookup by same publisher+kind, retried once.
    /// 2. Admission: denied (non-fatal) unless `forcePin` or publisher is prioritised.
    /// 3. Missing rtpCapabilities → fall back to router capabilities.
    /// 4. `router.canConsume` must hold.
    /// 5. Created paused; subscribes to producerclose for eviction + notice.
    #[allow(clippy::too_many_arguments)]
    pub async fn consume(
        &self,
        room: &Arc<MediaRoom>,
        stream_id: Option<StreamId>,
        transport_id: TransportId,
        rtp_capabilities: Option<RtpCapabilities>,
        peer_id: PeerId,
        force_pin: bool,
    ) -> SfuResult<ConsumeOutcome> {
        let stream_id = match stream_id {
            Some(id) if room.stream(&id).is_some() => id,
            Some(id) => self.fallback_stream_lookup(room, &id)?,
            None => return Err(SfuError::InvalidArgument("missing streamId".into())),
        };

        let stream = room
            .stream(&stream_id)
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Stream, stream_id.clone()))?;

        if !force_pin && !self.prioritised_users(room).contains(&stream.publisher_id) {
            return Ok(ConsumeOutcome::NotInPriority);
        }

        let transport = self
            .transports
            .get(transport_id)
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Transport, transport_id.to_string()))?;

        let rtp_capabilities = match rtp_capabilities {
            Some(caps) if !caps.codecs.is_empty() => caps,
            _ => room.router.rtp_capabilities().clone().into(),
        };

        if !room
            .router
            .can_consume(&stream.producer_id, &rtp_capabilities)
        {
            return Err(SfuError::CannotConsume);
        }

        let producer_id = stream.producer_id;
        let local_pool = self.local_pool.clone();
        let consumer: Consumer = local_pool
            .spawn_pinned(move || async move {
                let mut options = ConsumerOptions::new(producer_id, rtp_capabilities);
                options.paused = true;
                transport.consume(options).await
            })
            .await
            .map_err(|_| SfuError::Other(anyhow::anyhow!("consumer creation task was dropped")))?
            .map_err(|e| SfuError::Other(anyhow::anyhow!(e)))?;

        self.register_consumer(room, &stream_id, consumer.clone());
        self.worker_pool.note_consumer_created(room.worker_index);

        log::trace!(
            "+consumer {} for streamId={} (peer {}, room {})",
            consumer.id(),
            stream_id,
            peer_id,
            room.id
        );

        Ok(ConsumeOutcome::Created(Box::new(ConsumeCreated {
            consumer_id: consumer.id(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters().clone(),
            stream_id,
            producer_id,
        })))
    }

    /// `streamId` missing: parse as `<peerId>_<kind>_…` and retry once
    /// against any live stream from the same publisher with the same media
    /// kind (spec §4.4 rule 1, §8 scenario 6).
    fn fallback_stream_lookup(&self, room: &MediaRoom, attempted_id: &str) -> SfuResult<StreamId> {
        let mut parts = attempted_id.splitn(3, '_');
        let publisher_id = parts
            .next()
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Stream, attempted_id.to_string()))?;
        let kind = parts
            .next()
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Stream, attempted_id.to_string()))?;

        let state = room.state.lock().unwrap();
        state
            .streams
            .values()
            .find(|s| s.publisher_id == publisher_id && s.stream_type.as_str() == kind)
            .map(|s| s.stream_id.clone())
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Stream, attempted_id.to_string()))
    }

    /// Registers the consumer under its stream and subscribes to
    /// `producerclose`: evicts the consumer from the registry and notifies
    /// the caller via the room's `consumer-closed` broadcast (spec §4.4 rule
    /// 5).
    fn register_consumer(&self, room: &Arc<MediaRoom>, stream_id: &str, consumer: Consumer) {
        {
            let mut state = room.state.lock().unwrap();
            state
                .consumers
                .entry(stream_id.to_string())
                .or_default()
                .push(consumer.clone());
        }

        let weak_room: Weak<MediaRoom> = Arc::downgrade(room);
        let worker_pool = self.worker_pool.clone();
        let stream_id = stream_id.to_string();
        let consumer_id = consumer.id();
        consumer
            .on_producer_close(move || {
                if let Some(room) = weak_room.upgrade() {
                    {
                        let mut state = room.state.lock().unwrap();
                        if let Some(list) = state.consumers.get_mut(&stream_id) {
                            list.retain(|c| c.id() != consumer_id);
                        }
                    }
                    worker_pool.note_consumer_closed(room.worker_index);
                    let _ = room.consumer_closed_tx.send(crate::media_room::ConsumerClosedNotice {
                        stream_id: stream_id.clone(),
                        consumer_id,
                    });
                }
            })
            .detach();
    }

    /// Resume a consumer found by id anywhere in the room; resumes exactly
    /// once (spec §4.4 "Resume").
    pub async fn resume_consumer(&self, room: &MediaRoom, consumer_id: ConsumerId) -> SfuResult<()> {
        let consumer = {
            let state = room.state.lock().unwrap();
            state
                .consumers
                .values()
                .flatten()
                .find(|c| c.id() == consumer_id)
                .cloned()
        }
        .ok_or_else(|| SfuError::NotFound(NotFoundKind::Consumer, consumer_id.to_string()))?;

        consumer
            .resume()
            .await
            .map_err(|e| SfuError::Other(anyhow::anyhow!(e)))
    }

    /// `pinUser`: if any of `pinned`'s streams are already in priority,
    /// report `alreadyPriority` and create nothing. Otherwise force-pin a
    /// consumer onto each of `pinned`'s streams, best-effort (spec §4.4).
    ///
    /// `pinner` is accepted for wire-contract parity with `PinUser`'s
    /// `pinner_peer_id` field; admission only depends on the pinned user's
    /// priority standing, never on who requested the pin.
    #[allow(clippy::too_many_arguments)]
    pub async fn pin_user(
        &self,
        room: &Arc<MediaRoom>,
        _pinner: &str,
        pinned: &str,
        transport_id: TransportId,
        rtp_capabilities: Option<RtpCapabilities>,
    ) -> SfuResult<PinOutcome> {
        if self.prioritised_users(room).contains(pinned) {
            return Ok(PinOutcome {
                already_priority: true,
                consumers_created: vec![],
            });
        }

        let stream_ids: Vec<StreamId> = {
            let state = room.state.lock().unwrap();
            state
                .streams
                .values()
                .filter(|s| s.publisher_id == pinned)
                .map(|s| s.stream_id.clone())
                .collect()
        };

        let mut created = vec![];
        for stream_id in stream_ids {
            let outcome = self
                .consume(
                    room,
                    Some(stream_id.clone()),
                    transport_id,
                    rtp_capabilities.clone(),
                    pinned.to_string(),
                    true,
                )
                .await;
            if let Ok(ConsumeOutcome::Created(_)) = outcome {
                created.push(stream_id);
            }
        }

        Ok(PinOutcome {
            already_priority: false,
            consumers_created: created,
        })
    }

    /// `unpinUser`: if `unpinned` still has a stream in priority, report
    /// `stillInPriority` and remove nothing. Otherwise close every consumer
    /// currently attached to `unpinned`'s streams.
    ///
    /// NOTE (spec §9 open question 1): this closes *every* consumer on the
    /// unpinned user's streams, not only `unpinner`'s own — `unpinner` is
    /// accepted (wire-contract parity with `unpinner_peer_id`) but
    /// deliberately unused, reproducing observed (likely buggy) upstream
    /// behaviour verbatim. Do not "fix" it here; see DESIGN.md.
    pub async fn unpin_user(
        &self,
        room: &Arc<MediaRoom>,
        _unpinner: &str,
        unpinned: &str,
    ) -> SfuResult<UnpinOutcome> {
        if self.prioritised_users(room).contains(unpinned) {
            return Ok(UnpinOutcome {
                still_in_priority: true,
                consumers_removed: vec![],
            });
        }

        let stream_ids: Vec<StreamId> = {
            let state = room.state.lock().unwrap();
            state
                .streams
                .values()
                .filter(|s| s.publisher_id == unpinned)
                .map(|s| s.stream_id.clone())
                .collect()
        };

        let mut removed = vec![];
        for stream_id in stream_ids {
            let consumers = {
                let mut state = room.state.lock().unwrap();
                state.consumers.remove(&stream_id).unwrap_or_default()
            };
            for consumer in consumers {
                removed.push(consumer.id());
                consumer.close();
                self.worker_pool.note_consumer_closed(room.worker_index);
            }
        }

        Ok(UnpinOutcome {
            still_in_priority: false,
            consumers_removed: removed,
        })
    }

    /// Close producer, then all consumers for that streamId, then delete
    /// the Stream and producer mappings (spec §4.4 "Unpublish").
    pub fn unpublish_stream(&self, room: &MediaRoom, stream_id: &str) -> SfuResult<()> {
        let (producer, consumers) = {
            let mut state = room.state.lock().unwrap();
            let producer = state
                .producers
                .remove(stream_id)
                .ok_or_else(|| SfuError::NotFound(NotFoundKind::Stream, stream_id.to_string()))?;
            let consumers = state.consumers.remove(stream_id).unwrap_or_default();
            if let Some(stream) = state.streams.remove(stream_id) {
                state.producer_to_stream.remove(&stream.producer_id);
            }
            (producer, consumers)
        };

        for consumer in &consumers {
            consumer.close();
        }
        self.worker_pool
            .note_consumer_closed_n(room.worker_index, consumers.len());
        producer.close();
        self.worker_pool.note_producer_closed(room.worker_index);

        log::trace!("-stream {} (room {})", stream_id, room.id);
        Ok(())
    }

    /// Close every stream published by `peer_id`, returning the removed
    /// stream ids (spec §4.4 "removeParticipantMedia").
    pub fn remove_participant_media(&self, room: &MediaRoom, peer_id: &str) -> Vec<StreamId> {
        let stream_ids: Vec<StreamId> = {
            let state = room.state.lock().unwrap();
            state
                .streams
                .values()
                .filter(|s| s.publisher_id == peer_id)
                .map(|s| s.stream_id.clone())
                .collect()
        };
        for stream_id in &stream_ids {
            let _ = self.unpublish_stream(room, stream_id);
        }
        stream_ids
    }

    /// Shallow-merge `patch` into the stream's metadata; no invariants
    /// re-evaluated (spec §4.4 "Update stream metadata").
    pub fn update_stream_metadata(
        &self,
        room: &MediaRoom,
        stream_id: &str,
        patch: serde_json::Value,
    ) -> SfuResult<()> {
        let mut state = room.state.lock().unwrap();
        let stream = state
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| SfuError::NotFound(NotFoundKind::Stream, stream_id.to_string()))?;
        if let (Some(existing), Some(patch_obj)) = (stream.metadata.as_object_mut(), patch.as_object())
        {
            for (k, v) in patch_obj {
                existing.insert(k.clone(), v.clone());
            }
        } else {
            stream.metadata = patch;
        }
        Ok(())
    }
}
