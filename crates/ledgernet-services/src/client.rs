//! Outbound side of the protocol.
//!
//! Every call dials a fresh connection, writes the session tag and runs one
//! exchange under the session deadline. The per-message calls live next to
//! their handlers (`disseminator`, `block_collection`, `max_block`, `voting`,
//! `relay`, `control`) as further `impl PeerClient` blocks.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ledgernet_core::crypto::CryptoError;
use ledgernet_core::wire::{send_message, write_type_tag};
use ledgernet_core::{RequestType, WireError, WireMessage};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::buffer_pool::BufferPool;
use crate::context::NetworkSettings;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {host}: {source}")]
    Dial {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session with {host} timed out")]
    Timeout { host: String },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("no peers reachable")]
    NoPeersReachable,

    #[error("{host} has no blocks from {start_block_id}")]
    NoBlocks { host: String, start_block_id: u32 },

    #[error("no peer reported a block height")]
    NoHeightReported,

    #[error("protocol violation from {host}: {reason}")]
    Protocol { host: String, reason: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    pub(crate) fn protocol(host: &str, reason: impl Into<String>) -> Self {
        ClientError::Protocol {
            host: host.to_string(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a successful fan-out: at least one host succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub attempted: usize,
    pub failed: usize,
}

impl FanOutReport {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed
    }
}

/// Dials peers. Cheap to clone; shares settings and the buffer pool.
#[derive(Clone)]
pub struct PeerClient {
    settings: Arc<NetworkSettings>,
    pool: BufferPool,
}

impl PeerClient {
    pub fn new(settings: Arc<NetworkSettings>, pool: BufferPool) -> Self {
        Self { settings, pool }
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Dial `host` and announce the session type.
    pub(crate) async fn open(
        &self,
        host: &str,
        request_type: RequestType,
    ) -> Result<TcpStream, ClientError> {
        let mut stream = timeout(self.settings.connect_timeout, TcpStream::connect(host))
            .await
            .map_err(|_| ClientError::Timeout {
                host: host.to_string(),
            })?
            .map_err(|source| ClientError::Dial {
                host: host.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(%host, error = %e, "set_nodelay failed");
        }
        write_type_tag(&mut stream, request_type).await?;
        tracing::trace!(%host, %request_type, "session opened");
        Ok(stream)
    }

    /// Bound `exchange` by the session deadline.
    pub(crate) async fn within_deadline<T>(
        &self,
        host: &str,
        exchange: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        timeout(self.settings.session_timeout(), exchange)
            .await
            .map_err(|_| ClientError::Timeout {
                host: host.to_string(),
            })?
    }

    /// One request, one response.
    pub(crate) async fn request<Req, Resp>(
        &self,
        host: &str,
        request_type: RequestType,
        request: &Req,
    ) -> Result<Resp, ClientError>
    where
        Req: WireMessage + Sync,
        Resp: WireMessage + Send,
    {
        let mut stream = self.open(host, request_type).await?;
        self.within_deadline(host, async {
            send_message(&mut stream, request).await?;
            Ok(Resp::decode(&mut stream).await?)
        })
        .await
    }

    /// Run `op` against every host concurrently and wait for all of them.
    ///
    /// Succeeds when at least one host succeeded, or when `hosts` is empty.
    /// Individual failures are logged and counted.
    pub async fn fan_out<F, Fut>(&self, hosts: &[String], op: F) -> Result<FanOutReport, ClientError>
    where
        F: Fn(PeerClient, String) -> Fut,
        Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        if hosts.is_empty() {
            return Ok(FanOutReport::default());
        }

        let failures = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();
        for host in hosts {
            let exchange = op(self.clone(), host.clone());
            let failures = failures.clone();
            let host = host.clone();
            tasks.spawn(async move {
                if let Err(e) = exchange.await {
                    tracing::warn!(%host, error = %e, "peer exchange failed");
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "fan-out task aborted");
                failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        let failed = failures.load(Ordering::Relaxed);
        if failed >= hosts.len() {
            return Err(ClientError::NoPeersReachable);
        }
        Ok(FanOutReport {
            attempted: hosts.len(),
            failed,
        })
    }
}
