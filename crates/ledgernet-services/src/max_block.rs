//! Find the most advanced peer.
//!
//! Every host is asked for its highest block id in parallel. Hosts are
//! shuffled first so repeated calls spread load; results are taken in
//! arrival order and the first host to report the greatest height wins.

use std::sync::Arc;

use ledgernet_core::message::{MaxBlockRequest, MaxBlockResponse};
use ledgernet_core::RequestType;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, PeerClient};
use crate::context::NodeContext;
use crate::dispatch::{HandlerError, UnaryHandler};

pub struct MaxBlockHandler {
    ctx: Arc<NodeContext>,
}

impl MaxBlockHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

impl UnaryHandler for MaxBlockHandler {
    type Request = MaxBlockRequest;
    type Response = MaxBlockResponse;

    fn respond(&self, _request: MaxBlockRequest) -> Result<Option<MaxBlockResponse>, HandlerError> {
        Ok(Some(MaxBlockResponse::new(self.ctx.ledger.max_block_id()?)))
    }
}

/// The winner of a discovery round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestPeer {
    pub host: String,
    pub block_id: i64,
}

impl PeerClient {
    pub async fn max_block_id(&self, host: &str) -> Result<i64, ClientError> {
        let resp: MaxBlockResponse = self
            .request(host, RequestType::MaxBlock, &MaxBlockRequest)
            .await?;
        Ok(resp.block_id.get())
    }

    /// Query every host and return the one with the greatest block id.
    ///
    /// `cancel` is checked before each query is dispatched. Queries already
    /// in flight are left to finish on their own deadline.
    pub async fn host_with_max_block(
        &self,
        hosts: &[String],
        cancel: &CancellationToken,
    ) -> Result<BestPeer, ClientError> {
        if hosts.is_empty() {
            return Err(ClientError::NoPeersReachable);
        }
        let mut order = hosts.to_vec();
        order.shuffle(&mut rand::thread_rng());

        let (results_tx, mut results_rx) = mpsc::channel(order.len());
        for host in order {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            let client = self.clone();
            let results = results_tx.clone();
            tokio::spawn(async move {
                let result = client.max_block_id(&host).await;
                let _ = results.send((host, result)).await;
            });
        }
        drop(results_tx);

        let mut best: Option<BestPeer> = None;
        let mut failed = 0usize;
        while let Some((host, result)) = results_rx.recv().await {
            match result {
                Ok(block_id) => {
                    tracing::trace!(%host, block_id, "max block reported");
                    if best.as_ref().map_or(block_id > -1, |b| block_id > b.block_id) {
                        best = Some(BestPeer { host, block_id });
                    }
                }
                Err(e) => {
                    tracing::debug!(%host, error = %e, "max block query failed");
                    failed += 1;
                }
            }
        }

        match best {
            Some(best) => Ok(best),
            None if failed == hosts.len() => Err(ClientError::NoPeersReachable),
            None => Err(ClientError::NoHeightReported),
        }
    }
}
