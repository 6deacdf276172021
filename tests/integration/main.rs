//! Ledgernet integration test harness.
//!
//! Every test starts real request dispatchers on 127.0.0.1:0 and drives
//! them with the same `PeerClient` a daemon would use. Collaborators are
//! the in-memory implementations, so tests can seed and inspect state
//! directly.

use std::sync::Arc;
use std::time::Duration;

use ledgernet_core::crypto::{Ed25519Crypto, NodeKeys, Signer};
use ledgernet_services::storage::StoredBlock;
use ledgernet_services::{
    BufferPool, MemoryLedger, NetworkSettings, NodeContext, PeerClient, PeerInfo,
    RequestDispatcher, Server, StaticDirectory,
};
use tokio::sync::broadcast;

mod blocks;
mod control;
mod discovery;
mod dissemination;
mod voting;

// ── Harness ───────────────────────────────────────────────────────────────────

/// One running node.
pub struct Node {
    pub ctx: Arc<NodeContext>,
    pub ledger: Arc<MemoryLedger>,
    pub directory: Arc<StaticDirectory>,
    pub keys: Arc<NodeKeys>,
    pub addr: String,
    _shutdown: broadcast::Sender<()>,
}

impl Node {
    pub async fn spawn(position: i64) -> Node {
        Self::spawn_with(position, |_| {}).await
    }

    /// Start a node after letting `adjust` tweak its settings.
    pub async fn spawn_with(position: i64, adjust: impl FnOnce(&mut NetworkSettings)) -> Node {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut settings = NetworkSettings {
            node_position: position,
            tcp_address: addr.clone(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            ..NetworkSettings::default()
        };
        adjust(&mut settings);

        let ledger = Arc::new(MemoryLedger::new());
        let directory = Arc::new(StaticDirectory::new());
        let keys = Arc::new(NodeKeys::generate());
        let ctx = Arc::new(NodeContext {
            settings: Arc::new(settings),
            ledger: ledger.clone(),
            directory: directory.clone(),
            crypto: Arc::new(Ed25519Crypto),
            signer: keys.clone(),
            pool: BufferPool::new(),
        });

        let dispatcher = Arc::new(RequestDispatcher::for_node(ctx.clone()));
        let server = Server::bind(&addr, dispatcher, ctx.settings.session_timeout())
            .await
            .unwrap();
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(server.run(shutdown_rx));

        Node {
            ctx,
            ledger,
            directory,
            keys,
            addr,
            _shutdown: shutdown,
        }
    }

    pub fn client(&self) -> PeerClient {
        self.ctx.client()
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo::new(
            self.ctx.settings.node_position,
            self.addr.clone(),
            self.keys.public_key().unwrap(),
        )
    }

    /// Make every node in `nodes` know every other one.
    pub fn mesh(nodes: &[&Node]) {
        for a in nodes {
            for b in nodes {
                a.directory.register(b.info());
            }
        }
    }

    /// Store blocks `1..=height`; block `n` has body `[n; n]`.
    pub fn grow_to(&self, height: i64) {
        for id in 1..=height {
            self.ledger
                .push_block(StoredBlock {
                    block_id: id,
                    hash: block_hash(id),
                    data: block_body(id),
                })
                .unwrap();
        }
    }
}

pub fn block_hash(id: i64) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&id.to_be_bytes());
    hash[31] = 1;
    hash
}

pub fn block_body(id: i64) -> Vec<u8> {
    vec![id as u8; id as usize]
}

/// An address nothing listens on.
pub async fn dead_host() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// A node answers on the address it was started with.
#[tokio::test]
async fn test_node_serves_on_loopback() {
    let node = Node::spawn(0).await;
    node.grow_to(2);
    assert_eq!(node.client().max_block_id(&node.addr).await.unwrap(), 2);
}

/// Raw garbage on a fresh connection is dropped without taking the server down.
#[tokio::test]
async fn test_unknown_tag_does_not_kill_server() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let node = Node::spawn(0).await;
    let mut stream = tokio::net::TcpStream::connect(&node.addr).await.unwrap();
    stream.write_all(&0xbeefu16.to_le_bytes()).await.unwrap();
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(3), stream.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    assert_eq!(node.client().max_block_id(&node.addr).await.unwrap(), 0);
}
