//! `QueryRoot`/`MutationRoot`: one GraphQL field per spec §6 RPC, delegating
//! to the [`Sfu`] facade and wrapping results in the wire shapes from
//! `rpc::wire`.

use std::sync::Arc;

use async_graphql::{Context, InputObject, Object, Result, Schema, SimpleObject, Subscription};
use futures::{Stream, StreamExt};
use mediasoup::rtp_parameters::{MediaKind as MsMediaKind, RtpCapabilities, RtpParameters};
use tokio_stream::wrappers::BroadcastStream;

use crate::producer_consumer::ConsumeOutcome;
use crate::sfu::Sfu;

use super::wire::{ConsumerId, DtlsParameters, JsonString, MediaKind, StatusReply, StreamWire, TransportId};

fn sfu(ctx: &Context<'_>) -> Arc<Sfu> {
    ctx.data_unchecked::<Arc<Sfu>>().clone()
}

#[derive(InputObject)]
struct ConnectTransportParams {
    transport_id: TransportId,
    dtls_parameters: DtlsParameters,
}

#[derive(InputObject)]
struct CreateProducerParams {
    room_id: String,
    transport_id: TransportId,
    kind: MediaKind,
    rtp_parameters: JsonString,
    metadata: JsonString,
    participant_id: String,
}

#[derive(InputObject)]
struct CreateConsumerParams {
    room_id: String,
    stream_id: Option<String>,
    transport_id: TransportId,
    rtp_capabilities: Option<JsonString>,
    participant_id: String,
}

#[derive(SimpleObject)]
struct ProducerData {
    producer_id: String,
    stream_id: String,
    is_priority: bool,
    total_streams: i32,
}

#[derive(SimpleObject)]
struct ConsumerData {
    consumer_id: Option<String>,
    kind: Option<String>,
    rtp_parameters: Option<JsonString>,
    stream_id: Option<String>,
    producer_id: Option<String>,
    message: Option<String>,
}

#[derive(SimpleObject)]
struct PinData {
    success: bool,
    message: String,
    already_priority: bool,
    consumers_created: Vec<String>,
}

#[derive(SimpleObject)]
struct UnpinData {
    success: bool,
    message: String,
    still_in_priority: bool,
    consumers_removed: Vec<String>,
}

#[derive(SimpleObject)]
struct CabinData {
    success: bool,
    message: Option<String>,
    stream_id: Option<String>,
    sfu_listen_port: Option<i32>,
    consumer_ssrc: Option<i32>,
}

#[derive(SimpleObject)]
struct CabinProjectionData {
    target_user_id: String,
    source_language: String,
    target_language: String,
}

#[derive(Default)]
pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn get_media_router(&self, ctx: &Context<'_>, room_id: String) -> Result<JsonString> {
        let room = sfu(ctx).create_media_room(room_id).await?;
        Ok(JsonString::from_serialize(
            &room.router.rtp_capabilities().clone(),
        )?)
    }

    async fn get_streams(&self, ctx: &Context<'_>, room_id: String) -> Result<Vec<StreamWire>> {
        let room = sfu(ctx).get_room(&room_id)?;
        room.streams_sorted_by_id()
            .iter()
            .map(StreamWire::from_stream)
            .collect()
    }

    async fn get_active_speakers(&self, ctx: &Context<'_>, room_id: String) -> Result<Vec<String>> {
        Ok(sfu(ctx).active_speakers(&room_id))
    }

    async fn list_translation_cabin(
        &self,
        ctx: &Context<'_>,
        room_id: String,
        user_id: String,
    ) -> Result<Vec<CabinProjectionData>> {
        Ok(sfu(ctx)
            .list_cabins(&room_id, &user_id)
            .into_iter()
            .map(|c| CabinProjectionData {
                target_user_id: c.target_user_id,
                source_language: c.source_language,
                target_language: c.target_language,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn create_media_room(&self, ctx: &Context<'_>, room_id: String) -> Result<StatusReply> {
        sfu(ctx).create_media_room(room_id).await?;
        Ok(StatusReply::ok("created"))
    }

    async fn create_transport(&self, ctx: &Context<'_>, room_id: String) -> Result<TransportId> {
        let id = sfu(ctx).create_webrtc_transport(&room_id).await?;
        Ok(TransportId(id))
    }

    async fn connect_transport(
        &self,
        ctx: &Context<'_>,
        params: ConnectTransportParams,
    ) -> Result<StatusReply> {
        use crate::transport_registry::ConnectOutcome;
        let outcome = sfu(ctx)
            .connect_transport(params.transport_id.0, params.dtls_parameters.0)
            .await?;
        Ok(match outcome {
            ConnectOutcome::Connected => StatusReply::ok("connected"),
            ConnectOutcome::AlreadyConnected => StatusReply::failed("already connected"),
        })
    }

    async fn create_producer(&self, ctx: &Context<'_>, params: CreateProducerParams) -> Result<ProducerData> {
        let rtp_parameters: RtpParameters = params.rtp_parameters.parse()?;
        let metadata: serde_json::Value = params.metadata.parse()?;
        let kind: MsMediaKind = params.kind.0;

        let outcome = sfu(ctx)
            .produce(
                &params.room_id,
                params.transport_id.0,
                kind,
                rtp_parameters,
                metadata,
                params.participant_id,
            )
            .await?;

        Ok(ProducerData {
            producer_id: outcome.producer_id.to_string(),
            stream_id: outcome.stream_id,
            is_priority: outcome.is_priority,
            total_streams: outcome.total_streams as i32,
        })
    }

    async fn create_consumer(&self, ctx: &Context<'_>, params: CreateConsumerParams) -> Result<ConsumerData> {
        let rtp_capabilities: Option<RtpCapabilities> = match &params.rtp_capabilities {
            Some(json) => Some(json.parse()?),
            None => None,
        };

        let outcome = sfu(ctx)
            .consume(
                &params.room_id,
                params.stream_id,
                params.transport_id.0,
                rtp_capabilities,
                params.participant_id,
                false,
            )
            .await?;

        Ok(match outcome {
            ConsumeOutcome::Created(created) => ConsumerData {
                consumer_id: Some(created.consumer_id.to_string()),
                kind: Some(format!("{:?}", created.kind)),
                rtp_parameters: Some(JsonString::from_serialize(&created.rtp_parameters)?),
                stream_id: Some(created.stream_id),
                producer_id: Some(created.producer_id.to_string()),
                message: None,
            },
            ConsumeOutcome::NotInPriority => ConsumerData {
                consumer_id: None,
                kind: None,
                rtp_parameters: None,
                stream_id: None,
                producer_id: None,
                message: Some("Stream not in priority list".to_string()),
            },
        })
    }

    async fn resume_consumer(
        &self,
        ctx: &Context<'_>,
        room_id: String,
        consumer_id: ConsumerId,
    ) -> Result<StatusReply> {
        sfu(ctx).resume_consumer(&room_id, consumer_id.0).await?;
        Ok(StatusReply::ok("resumed"))
    }

    async fn update_stream(
        &self,
        ctx: &Context<'_>,
        room_id: String,
        stream_id: String,
        metadata: JsonString,
    ) -> Result<StatusReply> {
        let patch: serde_json::Value = metadata.parse()?;
        sfu(ctx).update_stream_metadata(&room_id, &stream_id, patch)?;
        Ok(StatusReply::ok("updated"))
    }

    async fn unpublish_stream(
        &self,
        ctx: &Context<'_>,
        room_id: String,
        stream_id: String,
    ) -> Result<StatusReply> {
        sfu(ctx).unpublish_stream(&room_id, &stream_id)?;
        Ok(StatusReply::ok("unpublished"))
    }

    async fn remove_participant_media(
        &self,
        ctx: &Context<'_>,
        room_id: String,
        participant_id: String,
    ) -> Result<Vec<String>> {
        Ok(sfu(ctx).remove_participant_media(&room_id, &participant_id)?)
    }

    async fn pin_user(
        &self,
        ctx: &Context<'_>,
        room_id: String,
        pinner_peer_id: String,
        pinned_peer_id: String,
        transport_id: TransportId,
        rtp_capabilities: Option<JsonString>,
    ) -> Result<PinData> {
        let rtp_capabilities: Option<RtpCapabilities> = match &rtp_capabilities {
            Some(json) => Some(json.parse()?),
            None => None,
        };
        let outcome = sfu(ctx)
            .pin_user(
                &room_id,
                &pinner_peer_id,
                &pinned_peer_id,
                transport_id.0,
                rtp_capabilities,
            )
            .await?;
        Ok(PinData {
            success: !outcome.already_priority,
            message: if outcome.already_priority {
                "already in priority".to_string()
            } else {
                "pinned".to_string()
            },
            already_priority: outcome.already_priority,
            consumers_created: outcome.consumers_created,
        })
    }

    async fn unpin_user(
        &self,
        ctx: &Context<'_>,
        room_id: String,
        unpinner_peer_id: String,
        unpinned_peer_id: String,
    ) -> Result<UnpinData> {
        let outcome = sfu(ctx)
            .unpin_user(&room_id, &unpinner_peer_id, &unpinned_peer_id)
            .await?;
        Ok(UnpinData {
            success: !outcome.still_in_priority,
            message: if outcome.still_in_priority {
                "still in priority".to_string()
            } else {
                "unpinned".to_string()
            },
            still_in_priority: outcome.still_in_priority,
            consumers_removed: outcome
                .consumers_removed
                .into_iter()
                .map(|id| id.to_string())
                .collect(),
        })
    }

    async fn handle_speaking(&self, ctx: &Context<'_>, room_id: String, peer_id: String) -> Result<StatusReply> {
        sfu(ctx).mark_speaking(&room_id, &peer_id);
        Ok(StatusReply::ok("ok"))
    }

    async fn handle_stop_speaking(
        &self,
        ctx: &Context<'_>,
        room_id: String,
        peer_id: String,
    ) -> Result<StatusReply> {
        sfu(ctx).mark_stop_speaking(&room_id, &peer_id);
        Ok(StatusReply::ok("ok"))
    }

    #[allow(clippy::too_many_arguments)]
    async fn allocate_port(
        &self,
        ctx: &Context<'_>,
        room_id: String,
        source_user_id: String,
        target_user_id: String,
        source_language: String,
        target_language: String,
        audio_port: i32,
        send_port: i32,
        ssrc: i32,
    ) -> Result<CabinData> {
        let outcome = sfu(ctx)
            .create_cabin(
                &room_id,
                &source_user_id,
                &target_user_id,
                &source_language,
                &target_language,
                audio_port as u16,
                send_port as u16,
                ssrc as u32,
            )
            .await?;
        Ok(CabinData {
            success: true,
            message: None,
            stream_id: Some(outcome.stream_id),
            sfu_listen_port: Some(outcome.sfu_listen_port as i32),
            consumer_ssrc: outcome.consumer_ssrc.map(|s| s as i32),
        })
    }

    async fn destroy_translation_cabin(
        &self,
        ctx: &Context<'_>,
        room_id: String,
        source_user_id: String,
        target_user_id: String,
        source_language: String,
        target_language: String,
    ) -> Result<StatusReply> {
        let outcome = sfu(ctx).destroy_cabin(
            &room_id,
            &source_user_id,
            &target_user_id,
            &source_language,
            &target_language,
        )?;
        Ok(StatusReply::ok(if outcome.torn_down {
            "10001"
        } else {
            "decremented"
        }))
    }
}

#[derive(SimpleObject)]
struct ConsumerClosedEvent {
    stream_id: String,
    consumer_id: String,
}

#[derive(Default)]
pub struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    /// Pushes an event whenever the engine evicts one of the caller's
    /// consumers to make room for a newly-pinned peer (spec §4.4 rule 5).
    async fn consumer_closed(
        &self,
        ctx: &Context<'_>,
        room_id: String,
    ) -> Result<impl Stream<Item = Result<ConsumerClosedEvent>>> {
        let rx = sfu(ctx).subscribe_consumer_closed(&room_id)?;
        Ok(BroadcastStream::new(rx).map(|event| match event {
            Ok(notice) => Ok(ConsumerClosedEvent {
                stream_id: notice.stream_id,
                consumer_id: notice.consumer_id.to_string(),
            }),
            Err(_) => Err("consumer-closed broadcast buffer overflowed".into()),
        }))
    }
}

pub type ApiSchema = Schema<QueryRoot, MutationRoot, SubscriptionRoot>;

pub fn schema(sfu: Arc<Sfu>) -> ApiSchema {
    ApiSchema::build(QueryRoot, MutationRoot, SubscriptionRoot)
        .data(sfu)
        .finish()
}
