//! Stop-network submissions and block confirmation queries.

use std::sync::Arc;

use ledgernet_core::message::{ConfirmRequest, HashResponse, StopNetworkRequest};
use ledgernet_core::wire::ZERO_HASH;
use ledgernet_core::{Hash, RequestType};

use crate::client::{ClientError, PeerClient};
use crate::context::NodeContext;
use crate::dispatch::{HandlerError, UnaryHandler};
use crate::storage::PendingTransaction;

/// Accepts a stop-network transaction and queues it ahead of ordinary
/// traffic. Answers with the transaction hash.
pub struct StopNetworkHandler {
    ctx: Arc<NodeContext>,
}

impl StopNetworkHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

impl UnaryHandler for StopNetworkHandler {
    type Request = StopNetworkRequest;
    type Response = HashResponse;

    fn respond(&self, request: StopNetworkRequest) -> Result<Option<HashResponse>, HandlerError> {
        if request.data.is_empty() {
            return Err(HandlerError::Rejected("empty stop-network transaction".into()));
        }

        let hash = self.ctx.crypto.hash(&request.data);
        let queued = self.ctx.ledger.insert_pending_tx(PendingTransaction {
            hash,
            data: request.data,
            high_priority: true,
        })?;
        tracing::warn!(hash = %hex::encode(hash), queued, "stop-network transaction received");
        Ok(Some(HashResponse { hash }))
    }

    fn max_request_len(&self) -> usize {
        self.ctx.limits().max_tx_size
    }
}

/// Answers with the hash of the requested block, or all zeros when the
/// block is unknown.
pub struct ConfirmationHandler {
    ctx: Arc<NodeContext>,
}

impl ConfirmationHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

impl UnaryHandler for ConfirmationHandler {
    type Request = ConfirmRequest;
    type Response = HashResponse;

    fn respond(&self, request: ConfirmRequest) -> Result<Option<HashResponse>, HandlerError> {
        let block_id = i64::from(request.block_id.get());
        let hash = self.ctx.ledger.block_hash(block_id)?.unwrap_or(ZERO_HASH);
        Ok(Some(HashResponse { hash }))
    }
}

impl PeerClient {
    /// Submit a stop-network transaction; returns the hash the peer computed.
    pub async fn stop_network(&self, host: &str, data: Vec<u8>) -> Result<Hash, ClientError> {
        let resp: HashResponse = self
            .request(host, RequestType::StopNetwork, &StopNetworkRequest { data })
            .await?;
        Ok(resp.hash)
    }

    /// The peer's hash for `block_id`, or `None` if it does not have the block.
    pub async fn check_confirmation(&self, host: &str, block_id: u32) -> Result<Option<Hash>, ClientError> {
        let resp: HashResponse = self
            .request(host, RequestType::Confirmation, &ConfirmRequest::new(block_id))
            .await?;
        Ok((resp.hash != ZERO_HASH).then_some(resp.hash))
    }
}
