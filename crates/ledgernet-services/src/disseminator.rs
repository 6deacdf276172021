//! Gossip of blocks and transactions.
//!
//! Validators announce a block (or just a batch of transaction hashes) with a
//! `FullNodes` session. The receiver queues blocks it has not seen, answers
//! with the hashes it lacks, and stores whatever bodies come back. Nodes
//! that do not validate push raw transaction batches with `NotFullNodes`.
//!
//! Size violations are treated as "nothing received": logged, session closed,
//! nothing stored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use ledgernet_core::crypto;
use ledgernet_core::message::{
    AnnouncedBlock, DisseminationRequest, GossipPacket, NeedTxResponse, TxBatchAck, TxBodies,
};
use ledgernet_core::wire::{put_slice, send_message, write_slice};
use ledgernet_core::{Hash, RequestType, WireError, WireMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::client::{ClientError, FanOutReport, PeerClient};
use crate::context::NodeContext;
use crate::dispatch::{within_limit, HandlerError, PeerStream, RequestHandler};
use crate::storage::{PendingBlock, PendingTransaction};

// ── Receiving ─────────────────────────────────────────────────────────────────

/// Handles block announcements and tx-hash gossip from validators.
pub struct FullNodesHandler {
    ctx: Arc<NodeContext>,
}

impl FullNodesHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    async fn serve(&self, stream: &mut dyn PeerStream) -> Result<(), HandlerError> {
        let max = self.ctx.limits().max_tx_batch_size;
        let Some(request) = within_limit(DisseminationRequest::decode_with_max(&mut *stream, max).await)?
        else {
            return Ok(());
        };
        let packet = GossipPacket::parse(&request.data)?;

        if let Some(block) = packet.block {
            self.accept_announcement(packet.sender_position, block)?;
        }

        let wanted = self.unknown_transactions(&packet.tx_hashes)?;
        send_message(
            &mut *stream,
            &NeedTxResponse {
                hashes: wanted.clone(),
            },
        )
        .await?;
        if wanted.is_empty() {
            return Ok(());
        }

        let Some(bodies) = within_limit(TxBodies::decode_with_max(&mut *stream, max).await)? else {
            return Ok(());
        };
        let wanted: HashSet<Hash> = wanted.into_iter().collect();
        let saved = save_transactions(&self.ctx, bodies.bodies, Some(&wanted))?;
        tracing::debug!(
            sender = packet.sender_position,
            announced = packet.tx_hashes.len(),
            requested = wanted.len(),
            saved,
            "gossip processed"
        );
        Ok(())
    }

    fn accept_announcement(&self, sender: i64, block: AnnouncedBlock) -> Result<(), HandlerError> {
        if self.ctx.directory.is_banned(sender) {
            tracing::debug!(sender, block_id = block.block_id, "announcement from banned node ignored");
            return Ok(());
        }
        let ledger = &self.ctx.ledger;
        if ledger.pending_block_exists(&block.block_hash)? {
            return Ok(());
        }
        let tip = ledger.chain_tip()?;
        let block_id = i64::from(block.block_id);
        if block_id < tip.block_id {
            tracing::trace!(sender, block_id, tip = tip.block_id, "stale announcement");
            return Ok(());
        }
        if ledger.insert_pending_block(PendingBlock {
            hash: block.block_hash,
            block_id,
            node_position: sender,
        })? {
            tracing::debug!(
                sender,
                block_id,
                hash = %hex::encode(block.block_hash),
                "queued announced block"
            );
        }
        Ok(())
    }

    /// Hashes not in the log, not applied and not pending. Duplicates
    /// within one packet are asked for once.
    fn unknown_transactions(&self, hashes: &[Hash]) -> Result<Vec<Hash>, HandlerError> {
        let ledger = &self.ctx.ledger;
        let mut seen = HashSet::with_capacity(hashes.len());
        let mut wanted = Vec::new();
        for hash in hashes {
            if !seen.insert(*hash) {
                continue;
            }
            if ledger.tx_in_log(hash)? || ledger.tx_applied(hash)? || ledger.tx_pending(hash)? {
                continue;
            }
            wanted.push(*hash);
        }
        Ok(wanted)
    }
}

impl RequestHandler for FullNodesHandler {
    fn handle<'a>(
        &'a self,
        stream: &'a mut dyn PeerStream,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(self.serve(stream))
    }
}

/// Handles raw transaction batches from non-validating nodes.
pub struct NotFullNodesHandler {
    ctx: Arc<NodeContext>,
}

impl NotFullNodesHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    async fn serve(&self, stream: &mut dyn PeerStream) -> Result<(), HandlerError> {
        let max = self.ctx.limits().max_tx_batch_size;
        let Some(request) = within_limit(DisseminationRequest::decode_with_max(&mut *stream, max).await)?
        else {
            return Ok(());
        };
        let batch = TxBodies::from_concatenated(&request.data)?;
        let received = batch.bodies.len();
        let saved = save_transactions(&self.ctx, batch.bodies, None)?;
        tracing::debug!(received, saved, "transaction batch processed");
        let accepted = u32::try_from(saved).unwrap_or(u32::MAX);
        send_message(&mut *stream, &TxBatchAck::new(accepted)).await?;
        Ok(())
    }
}

impl RequestHandler for NotFullNodesHandler {
    fn handle<'a>(
        &'a self,
        stream: &'a mut dyn PeerStream,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(self.serve(stream))
    }
}

/// Queue transaction bodies. Empty, oversize and already-processed bodies
/// are skipped, as are bodies whose hash is not in `wanted` when a need-list
/// was sent. Returns how many were newly queued.
fn save_transactions(
    ctx: &NodeContext,
    bodies: Vec<Vec<u8>>,
    wanted: Option<&HashSet<Hash>>,
) -> Result<usize, HandlerError> {
    let max_tx_size = ctx.limits().max_tx_size;
    let mut saved = 0;
    for body in bodies {
        if body.is_empty() {
            continue;
        }
        if body.len() > max_tx_size {
            tracing::warn!(len = body.len(), max = max_tx_size, "transaction over size limit, skipped");
            continue;
        }
        let hash = ctx.crypto.hash(&body);
        if wanted.is_some_and(|w| !w.contains(&hash)) {
            tracing::debug!(hash = %hex::encode(hash), "unrequested transaction body, skipped");
            continue;
        }
        if ctx.ledger.tx_in_log(&hash)? || ctx.ledger.tx_applied(&hash)? {
            continue;
        }
        if ctx.ledger.insert_pending_tx(PendingTransaction {
            hash,
            data: body,
            high_priority: false,
        })? {
            saved += 1;
        }
    }
    Ok(saved)
}

// ── Sending ───────────────────────────────────────────────────────────────────

/// A transaction body with its hash, ready to gossip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingTx {
    pub hash: Hash,
    pub data: Bytes,
}

impl OutgoingTx {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            hash: crypto::hash(&data),
            data,
        }
    }
}

impl PeerClient {
    /// Push a transaction batch to every host. Used by nodes that do not
    /// validate; the receivers answer with how many they queued.
    pub async fn send_transactions_to_all(
        &self,
        hosts: &[String],
        txs: &[Vec<u8>],
    ) -> Result<FanOutReport, ClientError> {
        if txs.is_empty() {
            return Ok(FanOutReport::default());
        }
        let bodies = TxBodies {
            bodies: txs.to_vec(),
        };
        let request = Arc::new(DisseminationRequest {
            data: bodies.concatenated()?.to_vec(),
        });
        self.fan_out(hosts, |client, host| {
            let request = request.clone();
            async move { client.push_transactions(&host, &request).await.map(|_| ()) }
        })
        .await
    }

    /// One `NotFullNodes` session. Returns the receiver's accepted count.
    pub async fn push_transactions(
        &self,
        host: &str,
        request: &DisseminationRequest,
    ) -> Result<u32, ClientError> {
        let ack: TxBatchAck = self.request(host, RequestType::NotFullNodes, request).await?;
        Ok(ack.accepted.get())
    }

    /// Announce `block` (if any) and offer `txs` to every host. Each host
    /// gets only the bodies it asks for.
    pub async fn send_full_block_to_all(
        &self,
        hosts: &[String],
        block: Option<AnnouncedBlock>,
        txs: &[OutgoingTx],
    ) -> Result<FanOutReport, ClientError> {
        let packet = GossipPacket {
            sender_position: self.settings().node_position,
            block,
            tx_hashes: txs.iter().map(|t| t.hash).collect(),
        };
        let request = Arc::new(DisseminationRequest {
            data: packet.to_bytes()?,
        });
        let bodies: Arc<HashMap<Hash, Bytes>> =
            Arc::new(txs.iter().map(|t| (t.hash, t.data.clone())).collect());

        self.fan_out(hosts, |client, host| {
            let request = request.clone();
            let bodies = bodies.clone();
            async move { client.gossip_to(&host, &request, &bodies).await.map(|_| ()) }
        })
        .await
    }

    /// One `FullNodes` session. Returns how many bodies the peer asked for
    /// and received.
    pub async fn gossip_to(
        &self,
        host: &str,
        request: &DisseminationRequest,
        bodies: &HashMap<Hash, Bytes>,
    ) -> Result<usize, ClientError> {
        let mut stream = self.open(host, RequestType::FullNodes).await?;
        self.within_deadline(host, async {
            send_message(&mut stream, request).await?;
            let need = NeedTxResponse::decode(&mut stream).await?;
            if need.hashes.is_empty() {
                return Ok(0);
            }

            let estimate: usize = need
                .hashes
                .iter()
                .filter_map(|h| bodies.get(h))
                .map(|b| b.len() + 4)
                .sum();
            let mut buf = self.pool().get_pooled(estimate);
            buf.clear();
            let mut sent = 0;
            for hash in &need.hashes {
                match bodies.get(hash) {
                    Some(body) if !body.is_empty() => {
                        put_slice(&mut buf, body)?;
                        sent += 1;
                    }
                    _ => tracing::trace!(%host, hash = %hex::encode(hash), "peer asked for a body we do not hold"),
                }
            }
            write_slice(&mut stream, &buf).await?;

            // The peer closes once the bodies are stored.
            stream.shutdown().await.map_err(WireError::from)?;
            let mut tail = Vec::new();
            stream.read_to_end(&mut tail).await.map_err(WireError::from)?;
            Ok(sent)
        })
        .await
    }
}
