//! ledgernet-services — the peer-to-peer exchanges a node serves and drives.
//! Inbound sessions go through `dispatch`; outbound ones through `PeerClient`.

pub mod block_collection;
pub mod buffer_pool;
pub mod client;
pub mod context;
pub mod control;
pub mod directory;
pub mod dispatch;
pub mod disseminator;
pub mod max_block;
pub mod relay;
pub mod storage;
pub mod voting;

#[cfg(test)]
mod test_support;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use client::{ClientError, FanOutReport, PeerClient};
pub use context::{NetworkSettings, NodeContext};
pub use directory::{NodeDirectory, PeerInfo, StaticDirectory};
pub use dispatch::{HandlerError, RequestDispatcher, RequestHandler, Server};
pub use storage::{Ledger, MemoryLedger, StorageError};
