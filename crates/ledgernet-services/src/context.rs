//! Node-wide collaborators, built once at startup and shared by the
//! dispatcher, every handler and every client call.

use std::sync::Arc;
use std::time::Duration;

use ledgernet_core::config::{LedgernetConfig, LimitsConfig};
use ledgernet_core::crypto::{Crypto, Signer};

use crate::buffer_pool::BufferPool;
use crate::client::PeerClient;
use crate::directory::NodeDirectory;
use crate::storage::Ledger;

/// Network parameters resolved from config.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub node_position: i64,
    pub tcp_address: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub limits: LimitsConfig,
}

impl NetworkSettings {
    pub fn from_config(config: &LedgernetConfig) -> Self {
        Self {
            node_position: config.network.node_position,
            tcp_address: config.network.tcp_address.clone(),
            connect_timeout: config.network.connect_timeout(),
            read_timeout: config.network.read_timeout(),
            write_timeout: config.network.write_timeout(),
            limits: config.limits.clone(),
        }
    }

    /// Budget for one whole exchange after the connection is open. Covers
    /// the read and the write leg of the session.
    pub fn session_timeout(&self) -> Duration {
        self.read_timeout + self.write_timeout
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self::from_config(&LedgernetConfig::default())
    }
}

pub struct NodeContext {
    pub settings: Arc<NetworkSettings>,
    pub ledger: Arc<dyn Ledger>,
    pub directory: Arc<dyn NodeDirectory>,
    pub crypto: Arc<dyn Crypto>,
    pub signer: Arc<dyn Signer>,
    pub pool: BufferPool,
}

impl NodeContext {
    pub fn client(&self) -> PeerClient {
        PeerClient::new(self.settings.clone(), self.pool.clone())
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.settings.limits
    }
}
