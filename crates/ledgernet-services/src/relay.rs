//! Relayed private and sub-node data.
//!
//! Three request types share one flow: check the payload size, hash the
//! data, keep the record and answer with the hash. A record already held
//! under the same hash is left as it was; the sender still gets the hash.

use std::marker::PhantomData;
use std::sync::Arc;

use ledgernet_core::message::{
    HashResponse, PrivateDataRequest, PrivateFileRequest, SubNodeDataRequest,
};
use ledgernet_core::vote::now_millis;
use ledgernet_core::{Hash, RequestType, WireMessage};

use crate::client::{ClientError, PeerClient};
use crate::context::NodeContext;
use crate::dispatch::{HandlerError, UnaryHandler};
use crate::storage::{RelayPayload, RelayRecord};

/// A request whose data is relayed and stored as-is.
pub trait Relayable: WireMessage + Send + Sized {
    const REQUEST_TYPE: RequestType;

    fn data(&self) -> &[u8];

    fn into_payload(self) -> RelayPayload;
}

impl Relayable for PrivateDataRequest {
    const REQUEST_TYPE: RequestType = RequestType::PrivateData;

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn into_payload(self) -> RelayPayload {
        RelayPayload::PrivateData(self)
    }
}

impl Relayable for PrivateFileRequest {
    const REQUEST_TYPE: RequestType = RequestType::PrivateFile;

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn into_payload(self) -> RelayPayload {
        RelayPayload::PrivateFile(self)
    }
}

impl Relayable for SubNodeDataRequest {
    const REQUEST_TYPE: RequestType = RequestType::SubNodeData;

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn into_payload(self) -> RelayPayload {
        RelayPayload::SubNodeData(self)
    }
}

pub struct RelayHandler<R> {
    ctx: Arc<NodeContext>,
    _request: PhantomData<fn() -> R>,
}

impl<R: Relayable> RelayHandler<R> {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self {
            ctx,
            _request: PhantomData,
        }
    }
}

impl<R: Relayable> UnaryHandler for RelayHandler<R> {
    type Request = R;
    type Response = HashResponse;

    fn respond(&self, request: R) -> Result<Option<HashResponse>, HandlerError> {
        let len = request.data().len();
        let hash = self.ctx.crypto.hash(request.data());
        let payload = request.into_payload();
        let task_uuid = payload.task_uuid().to_string();
        let stored = self.ctx.ledger.store_relayed(RelayRecord {
            hash,
            received_at: now_millis(),
            payload,
        })?;
        tracing::debug!(
            kind = ?R::REQUEST_TYPE,
            %task_uuid,
            hash = %hex::encode(hash),
            len,
            stored,
            "relayed data received"
        );
        Ok(Some(HashResponse { hash }))
    }

    fn max_request_len(&self) -> usize {
        self.ctx.limits().max_relay_payload
    }
}

impl PeerClient {
    /// Hand `request` to `host`; returns the hash the peer stored it under.
    pub async fn relay<R>(&self, host: &str, request: &R) -> Result<Hash, ClientError>
    where
        R: Relayable + Sync,
    {
        let resp: HashResponse = self.request(host, R::REQUEST_TYPE, request).await?;
        Ok(resp.hash)
    }
}
