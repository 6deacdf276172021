//! Bulk transfer of consecutive historical blocks.
//!
//! The server answers with a count/total header followed by up to
//! `BLOCKS_PER_REQUEST` length-prefixed bodies. The client reads every body
//! into one pooled buffer sized to the declared total, splits each block off
//! as a `Bytes` view, and hands it to the consumer through a channel. The
//! buffer goes back to the pool once the consumer drops the `BlockStream`
//! (or the caller's cancellation token fires). Its allocation is reused only
//! if every block handed out has been dropped by then; `fetch_blocks` keeps
//! the blocks, so the pool receives a fresh buffer instead.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use ledgernet_core::message::{BlockCollectionHeader, BlockCollectionRequest};
use ledgernet_core::wire::{put_fixed, put_slice, send_message, BLOCKS_PER_REQUEST};
use ledgernet_core::{RequestType, WireError, WireMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, PeerClient};
use crate::context::NodeContext;
use crate::dispatch::{HandlerError, PeerStream, RequestHandler};

// ── Server ────────────────────────────────────────────────────────────────────

pub struct BlockCollectionHandler {
    ctx: Arc<NodeContext>,
}

impl BlockCollectionHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    async fn serve(&self, stream: &mut dyn PeerStream) -> Result<(), HandlerError> {
        let request = BlockCollectionRequest::decode(&mut *stream).await?;
        let start = i64::from(request.start_block_id.get());
        let reverse = request.is_reverse();

        let ledger = &self.ctx.ledger;
        let blocks = if reverse {
            ledger.blocks_down_from(start, BLOCKS_PER_REQUEST)?
        } else {
            ledger.blocks_after(start - 1, BLOCKS_PER_REQUEST)?
        };
        let total: usize = blocks.iter().map(|b| b.data.len()).sum();

        let mut out = self
            .ctx
            .pool
            .get_pooled(std::mem::size_of::<BlockCollectionHeader>() + total + 4 * blocks.len());
        out.clear();
        put_fixed(&mut out, &BlockCollectionHeader::new(blocks.len() as i64, total as i64));
        for block in &blocks {
            put_slice(&mut out, &block.data)?;
        }
        stream.write_all(&out).await.map_err(WireError::from)?;
        stream.flush().await.map_err(WireError::from)?;

        tracing::debug!(start, reverse, count = blocks.len(), total, "served block collection");
        Ok(())
    }
}

impl RequestHandler for BlockCollectionHandler {
    fn handle<'a>(
        &'a self,
        stream: &'a mut dyn PeerStream,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(self.serve(stream))
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Block bodies arriving from one collection session.
///
/// Yields at most `block_count` bodies, in the order the server chose. When
/// the sequence ends early, `take_error` says why. Dropping the stream tells
/// the producer the shared buffer may be reused.
pub struct BlockStream {
    blocks: mpsc::Receiver<Bytes>,
    errors: mpsc::Receiver<ClientError>,
    block_count: usize,
    total_len: usize,
    done: CancellationToken,
}

impl BlockStream {
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub async fn next_block(&mut self) -> Option<Bytes> {
        self.blocks.recv().await
    }

    /// The failure that ended the sequence, once `next_block` returned `None`.
    pub fn take_error(&mut self) -> Option<ClientError> {
        self.errors.try_recv().ok()
    }

    /// Drain every block. Fails if the producer hit an error part-way.
    pub async fn collect(mut self) -> Result<Vec<Bytes>, ClientError> {
        let mut out = Vec::with_capacity(self.block_count);
        while let Some(block) = self.next_block().await {
            out.push(block);
        }
        match self.take_error() {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}

impl Drop for BlockStream {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

impl PeerClient {
    /// Start collecting blocks from `host`.
    ///
    /// Ascending collection starts at `start_block_id`; reverse collection
    /// walks down from it. `cancel` is checked before dialing and between
    /// blocks, never during a blocked read.
    pub async fn collect_blocks(
        &self,
        host: &str,
        start_block_id: u32,
        reverse: bool,
        cancel: &CancellationToken,
    ) -> Result<BlockStream, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let mut stream = self.open(host, RequestType::BlockCollection).await?;
        let deadline = Instant::now() + self.settings().session_timeout();

        let header = timeout_at(deadline, async {
            send_message(&mut stream, &BlockCollectionRequest::new(start_block_id, reverse)).await?;
            BlockCollectionHeader::decode(&mut stream).await
        })
        .await
        .map_err(|_| ClientError::Timeout {
            host: host.to_string(),
        })??;

        let count = header.block_count.get();
        let total = header.total_len.get();
        if count == 0 {
            return Err(ClientError::NoBlocks {
                host: host.to_string(),
                start_block_id,
            });
        }
        let max_block_size = self.settings().limits.max_block_size;
        if count < 0 || count as usize > BLOCKS_PER_REQUEST {
            return Err(ClientError::protocol(host, format!("block count {count} out of range")));
        }
        let count = count as usize;
        if total < 0 || total as u128 > count as u128 * max_block_size as u128 {
            return Err(ClientError::protocol(host, format!("total length {total} out of range")));
        }
        let total = total as usize;

        let (block_tx, block_rx) = mpsc::channel(count);
        let (error_tx, error_rx) = mpsc::channel(1);
        let done = cancel.child_token();
        let mut buf = self.pool().get_pooled(total);
        let producer_done = done.clone();
        let host_owned = host.to_string();

        tokio::spawn(async move {
            buf.clear();
            let limits = BodyLimits {
                count,
                total,
                max_block_size,
            };
            let read = timeout_at(
                deadline,
                read_bodies(&mut stream, &mut buf, limits, &block_tx, &producer_done, &host_owned),
            )
            .await;
            let outcome = read.unwrap_or_else(|_| {
                Err(ClientError::Timeout {
                    host: host_owned.clone(),
                })
            });
            if let Err(e) = outcome {
                tracing::warn!(host = %host_owned, error = %e, "block collection ended early");
                let _ = error_tx.send(e).await;
            }
            drop(block_tx);
            drop(stream);

            // The consumer may still hold views into `buf`.
            producer_done.cancelled().await;
            drop(buf);
        });

        tracing::debug!(%host, start_block_id, reverse, count, total, "collecting blocks");
        Ok(BlockStream {
            blocks: block_rx,
            errors: error_rx,
            block_count: count,
            total_len: total,
            done,
        })
    }

    /// Collect and drain in one call.
    pub async fn fetch_blocks(
        &self,
        host: &str,
        start_block_id: u32,
        reverse: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Bytes>, ClientError> {
        self.collect_blocks(host, start_block_id, reverse, cancel)
            .await?
            .collect()
            .await
    }
}

#[derive(Clone, Copy)]
struct BodyLimits {
    count: usize,
    total: usize,
    max_block_size: usize,
}

async fn read_bodies<R>(
    stream: &mut R,
    buf: &mut BytesMut,
    limits: BodyLimits,
    blocks: &mpsc::Sender<Bytes>,
    done: &CancellationToken,
    host: &str,
) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut consumed = 0usize;
    for _ in 0..limits.count {
        if done.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let size = stream.read_u32_le().await.map_err(WireError::from)? as usize;
        if size > limits.max_block_size {
            return Err(WireError::SizeExceeded {
                len: size,
                max: limits.max_block_size,
            }
            .into());
        }
        if consumed + size > limits.total {
            return Err(ClientError::protocol(host, "block bodies exceed declared total"));
        }
        buf.resize(size, 0);
        stream.read_exact(&mut buf[..size]).await.map_err(WireError::from)?;
        consumed += size;
        if blocks.send(buf.split_to(size).freeze()).await.is_err() {
            return Err(ClientError::Cancelled);
        }
    }
    Ok(())
}
