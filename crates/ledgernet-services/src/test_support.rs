//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use ledgernet_core::config::LimitsConfig;
use ledgernet_core::crypto::{Ed25519Crypto, NodeKeys, Signer};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::buffer_pool::BufferPool;
use crate::context::{NetworkSettings, NodeContext};
use crate::directory::{PeerInfo, StaticDirectory};
use crate::dispatch::{HandlerError, RequestDispatcher, RequestHandler, Server};
use crate::storage::MemoryLedger;

pub(crate) struct TestNode {
    pub ctx: Arc<NodeContext>,
    pub ledger: Arc<MemoryLedger>,
    pub directory: Arc<StaticDirectory>,
    pub keys: Arc<NodeKeys>,
}

impl TestNode {
    pub fn new() -> Self {
        Self::build(NodeKeys::generate(), |_| {})
    }

    pub fn with_limits(adjust: impl FnOnce(&mut LimitsConfig)) -> Self {
        Self::build(NodeKeys::generate(), adjust)
    }

    pub fn with_keys(keys: NodeKeys) -> Self {
        Self::build(keys, |_| {})
    }

    fn build(keys: NodeKeys, adjust: impl FnOnce(&mut LimitsConfig)) -> Self {
        let mut settings = NetworkSettings {
            tcp_address: "127.0.0.1:7078".into(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            ..NetworkSettings::default()
        };
        adjust(&mut settings.limits);

        let ledger = Arc::new(MemoryLedger::new());
        let directory = Arc::new(StaticDirectory::new());
        let keys = Arc::new(keys);
        let ctx = Arc::new(NodeContext {
            settings: Arc::new(settings),
            ledger: ledger.clone(),
            directory: directory.clone(),
            crypto: Arc::new(Ed25519Crypto),
            signer: keys.clone(),
            pool: BufferPool::new(),
        });
        Self {
            ctx,
            ledger,
            directory,
            keys,
        }
    }

    /// Register `keys` in this node's directory under `tcp_address`.
    pub fn register_peer(&self, position: i64, tcp_address: &str, keys: &NodeKeys) -> PeerInfo {
        let info = PeerInfo::new(position, tcp_address, keys.public_key().unwrap());
        self.directory.register(info.clone());
        info
    }
}

/// Run `handler` against one end of an in-memory pipe; return the other end.
pub(crate) fn serve_once<H>(handler: Arc<H>) -> (DuplexStream, JoinHandle<Result<(), HandlerError>>)
where
    H: RequestHandler + 'static,
{
    let (client, mut server) = duplex(1 << 20);
    let task = tokio::spawn(async move { handler.handle(&mut server).await });
    (client, task)
}

/// Serve `node` on an ephemeral loopback port. Keep the sender alive for as
/// long as the server should run.
pub(crate) async fn spawn_server(node: &TestNode) -> (String, broadcast::Sender<()>) {
    let dispatcher = Arc::new(RequestDispatcher::for_node(node.ctx.clone()));
    let server = Server::bind("127.0.0.1:0", dispatcher, node.ctx.settings.session_timeout())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(server.run(shutdown_rx));
    (addr, shutdown_tx)
}
