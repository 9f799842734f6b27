//! Streaming protocol generation: a thin hand-rolled client for the
//! store's gRPC KV and Watch services over a shared [`Channel`].

use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;
use tonic::async_trait;
use tonic::client::Grpc;
use tonic::codec::CompressionEncoding;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::Request;
use tracing::debug;

use super::proto::watch_request::RequestUnion;
use super::proto::EventType;
use super::proto::RangeRequest;
use super::proto::RangeResponse;
use super::proto::WatchCreateRequest;
use super::proto::WatchRequest;
use super::proto::WatchResponse;
use super::EventStream;
use super::StreamKv;
use super::WatchBatch;
use crate::ChangeEvent;
use crate::Error;
use crate::Result;

const KV_RANGE_PATH: &str = "/etcdserverpb.KV/Range";
const WATCH_PATH: &str = "/etcdserverpb.Watch/Watch";

/// gRPC client for the streaming protocol generation.
///
/// Cheap to clone; every call builds a fresh `Grpc` facade over the shared
/// channel, so `&self` methods need no interior locking.
#[derive(Clone)]
pub struct GrpcKv {
    channel: Channel,
    request_timeout: Duration,
    compression: bool,
}

impl GrpcKv {
    pub fn new(channel: Channel, request_timeout: Duration, enable_compression: bool) -> Self {
        Self {
            channel,
            request_timeout,
            compression: enable_compression,
        }
    }

    fn grpc(&self) -> Grpc<Channel> {
        let mut grpc = Grpc::new(self.channel.clone());
        if self.compression {
            grpc = grpc
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }
        grpc
    }
}

#[async_trait]
impl StreamKv for GrpcKv {
    async fn range(&self, key: &str) -> Result<Option<String>> {
        let mut grpc = self.grpc();
        grpc.ready().await?;

        let codec: ProstCodec<RangeRequest, RangeResponse> = ProstCodec::default();
        let request = RangeRequest {
            key: key.as_bytes().to_vec(),
            limit: 1,
            ..Default::default()
        };

        let response = timeout(
            self.request_timeout,
            grpc.unary(
                Request::new(request),
                PathAndQuery::from_static(KV_RANGE_PATH),
                codec,
            ),
        )
        .await
        .map_err(|_| Error::Timeout(self.request_timeout))??;

        match response.into_inner().kvs.into_iter().next() {
            Some(kv) => Ok(Some(decode_utf8(kv.value, "value")?)),
            None => Ok(None),
        }
    }

    async fn watch(&self, prefix: &str, start_revision: i64) -> Result<EventStream> {
        let mut grpc = self.grpc();
        grpc.ready().await?;

        let codec: ProstCodec<WatchRequest, WatchResponse> = ProstCodec::default();
        let create = WatchRequest {
            request_union: Some(RequestUnion::CreateRequest(WatchCreateRequest {
                key: prefix.as_bytes().to_vec(),
                range_end: prefix_range_end(prefix.as_bytes()),
                start_revision,
            })),
        };

        let response = grpc
            .streaming(
                Request::new(tokio_stream::once(create)),
                PathAndQuery::from_static(WATCH_PATH),
                codec,
            )
            .await?;

        debug!(prefix, start_revision, "watch stream opened");

        let inbound = response.into_inner().map(|item| match item {
            Ok(resp) => batch_from_response(resp),
            Err(status) => Err(Error::Grpc(status)),
        });
        Ok(Box::pin(inbound))
    }
}

/// Exclusive upper bound for a prefix watch: the prefix with its last
/// non-0xff byte incremented. An empty prefix (or all-0xff) watches the
/// whole keyspace, encoded as `[0]`.
pub(crate) fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    vec![0]
}

pub(crate) fn batch_from_response(resp: WatchResponse) -> Result<WatchBatch> {
    if resp.canceled {
        if resp.compact_revision > 0 {
            return Err(Error::Compacted(resp.compact_revision));
        }
        return Err(Error::StreamClosed);
    }

    let revision = resp.header.map(|h| h.revision).unwrap_or(0);
    let mut events = Vec::with_capacity(resp.events.len());
    for event in resp.events {
        let kv = event
            .kv
            .ok_or_else(|| Error::InvalidResponse("change event without a key-value".to_string()))?;
        let key = decode_utf8(kv.key, "key")?;
        let value = match EventType::try_from(event.r#type) {
            Ok(EventType::Put) => Some(decode_utf8(kv.value, "value")?),
            Ok(EventType::Delete) => None,
            Err(_) => {
                return Err(Error::InvalidResponse(format!(
                    "unknown change event type {}",
                    event.r#type
                )))
            }
        };
        events.push(ChangeEvent { key, value });
    }

    Ok(WatchBatch { events, revision })
}

fn decode_utf8(bytes: Vec<u8>, what: &str) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| Error::InvalidResponse(format!("non-utf8 {what}")))
}
