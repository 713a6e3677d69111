//! Wire shapes for the external RPC surface (spec §6). Field names are the
//! contract; camelCase conversion is the gateway's job, never this layer's.

use async_graphql::{scalar, SimpleObject};
use serde::{Deserialize, Serialize};

use crate::stream::Stream;

#[derive(Deserialize, Serialize, Clone)]
#[serde(transparent)]
pub struct TransportId(pub mediasoup::transport::TransportId);
scalar!(TransportId);

#[derive(Deserialize, Serialize, Clone)]
#[serde(transparent)]
pub struct ConsumerId(pub mediasoup::consumer::ConsumerId);
scalar!(ConsumerId);

#[derive(Deserialize, Serialize, Clone)]
#[serde(transparent)]
pub struct ProducerId(pub mediasoup::producer::ProducerId);
scalar!(ProducerId);

#[derive(Deserialize, Serialize, Clone)]
#[serde(transparent)]
pub struct MediaKind(pub mediasoup::rtp_parameters::MediaKind);
scalar!(MediaKind);

#[derive(Deserialize, Serialize, Clone)]
#[serde(transparent)]
pub struct DtlsParameters(pub mediasoup::data_structures::DtlsParameters);
scalar!(DtlsParameters);

/// `rtp_parameters`/`rtp_capabilities`/`metadata` all cross the wire as
/// JSON strings per spec §6, parsed with `serde_json` at the RPC boundary.
#[derive(Deserialize, Serialize, Clone, Default)]
pub struct JsonString(pub String);
scalar!(JsonString);

impl JsonString {
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> async_graphql::Result<T> {
        serde_json::from_str(&self.0).map_err(|e| format!("invalid JSON: {e}").into())
    }

    pub fn from_value(value: &serde_json::Value) -> Self {
        Self(value.to_string())
    }

    pub fn from_serialize<T: Serialize>(value: &T) -> async_graphql::Result<Self> {
        Ok(Self(serde_json::to_string(value).map_err(|e| e.to_string())?))
    }
}

/// Stream wire shape (spec §6): `{stream_id, publisher_id, producer_id,
/// metadata, rtp_parameters, room_id}`, both JSON fields serialised.
#[derive(SimpleObject, Clone)]
pub struct StreamWire {
    pub stream_id: String,
    pub publisher_id: String,
    pub producer_id: String,
    pub room_id: String,
    pub metadata: JsonString,
    pub rtp_parameters: JsonString,
}

impl StreamWire {
    pub fn from_stream(stream: &Stream) -> async_graphql::Result<Self> {
        Ok(Self {
            stream_id: stream.stream_id.clone(),
            publisher_id: stream.publisher_id.clone(),
            producer_id: stream.producer_id.to_string(),
            room_id: stream.room_id.clone(),
            metadata: JsonString::from_value(&stream.metadata),
            rtp_parameters: JsonString::from_serialize(&stream.rtp_parameters)?,
        })
    }
}

#[derive(SimpleObject, Clone)]
pub struct StatusReply {
    pub status: bool,
    pub message: String,
}

impl StatusReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: false,
            message: message.into(),
        }
    }
}
