//! Node directory: who the validators are, where they listen, which keys
//! they sign with, and who is currently banned.
//!
//! Announcements from a banned position are ignored; transactions in the
//! same packet are still accepted. Candidates that want votes must be
//! registered here so validators can check their signatures.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use ledgernet_core::config::DirectoryConfig;
use ledgernet_core::crypto::{address_of, PUBLIC_KEY_SIZE};

/// One known node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub position: i64,
    pub tcp_address: String,
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    /// Derived from `public_key`.
    pub address: String,
}

impl PeerInfo {
    pub fn new(position: i64, tcp_address: impl Into<String>, public_key: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self {
            position,
            tcp_address: tcp_address.into(),
            public_key,
            address: address_of(&public_key),
        }
    }
}

pub trait NodeDirectory: Send + Sync {
    fn node_by_position(&self, position: i64) -> Option<PeerInfo>;

    fn is_banned(&self, position: i64) -> bool;

    /// Public key registered for an account address.
    fn public_key_for(&self, address: &str) -> Option<[u8; PUBLIC_KEY_SIZE]>;

    fn peer_by_tcp_address(&self, tcp_address: &str) -> Option<PeerInfo>;

    fn peers(&self) -> Vec<PeerInfo>;

    /// Every peer's TCP address except `own`, ordered by position.
    fn hosts_except(&self, own: &str) -> Vec<String> {
        let mut peers = self.peers();
        peers.sort_by_key(|p| p.position);
        peers
            .into_iter()
            .map(|p| p.tcp_address)
            .filter(|a| a != own)
            .collect()
    }
}

/// Directory seeded from config and mutable at runtime.
#[derive(Clone, Default)]
pub struct StaticDirectory {
    by_position: Arc<DashMap<i64, PeerInfo>>,
    banned: Arc<DashSet<i64>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load peers and bans from config. Peers with a malformed public key are
    /// skipped with a warning.
    pub fn from_config(config: &DirectoryConfig) -> Self {
        let directory = Self::new();
        for peer in &config.peers {
            let key = hex::decode(&peer.public_key)
                .ok()
                .and_then(|bytes| <[u8; PUBLIC_KEY_SIZE]>::try_from(bytes.as_slice()).ok());
            match key {
                Some(key) => directory.register(PeerInfo::new(peer.position, &peer.tcp_address, key)),
                None => tracing::warn!(
                    position = peer.position,
                    tcp_address = %peer.tcp_address,
                    "skipping peer with malformed public key"
                ),
            }
        }
        for position in &config.banned_positions {
            directory.ban(*position);
        }
        directory
    }

    /// Add or replace the node at `info.position`.
    pub fn register(&self, info: PeerInfo) {
        self.by_position.insert(info.position, info);
    }

    pub fn ban(&self, position: i64) {
        tracing::info!(position, "node banned");
        self.banned.insert(position);
    }

    pub fn unban(&self, position: i64) {
        if self.banned.remove(&position).is_some() {
            tracing::info!(position, "node unbanned");
        }
    }
}

impl NodeDirectory for StaticDirectory {
    fn node_by_position(&self, position: i64) -> Option<PeerInfo> {
        self.by_position.get(&position).map(|p| p.clone())
    }

    fn is_banned(&self, position: i64) -> bool {
        self.banned.contains(&position)
    }

    fn public_key_for(&self, address: &str) -> Option<[u8; PUBLIC_KEY_SIZE]> {
        self.by_position
            .iter()
            .find(|p| p.address == address)
            .map(|p| p.public_key)
    }

    fn peer_by_tcp_address(&self, tcp_address: &str) -> Option<PeerInfo> {
        self.by_position
            .iter()
            .find(|p| p.tcp_address == tcp_address)
            .map(|p| p.clone())
    }

    fn peers(&self) -> Vec<PeerInfo> {
        self.by_position.iter().map(|p| p.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgernet_core::config::PeerConfig;

    #[test]
    fn from_config_skips_bad_keys_and_applies_bans() {
        let config = DirectoryConfig {
            banned_positions: vec![2],
            peers: vec![
                PeerConfig {
                    position: 1,
                    tcp_address: "10.0.0.1:7078".into(),
                    public_key: hex::encode([1u8; 32]),
                },
                PeerConfig {
                    position: 2,
                    tcp_address: "10.0.0.2:7078".into(),
                    public_key: "zz".into(),
                },
            ],
        };
        let dir = StaticDirectory::from_config(&config);
        assert!(dir.node_by_position(1).is_some());
        assert!(dir.node_by_position(2).is_none());
        assert!(dir.is_banned(2));
        assert!(!dir.is_banned(1));
    }

    #[test]
    fn lookups_by_address_and_tcp_address() {
        let dir = StaticDirectory::new();
        let info = PeerInfo::new(3, "10.0.0.3:7078", [3u8; 32]);
        dir.register(info.clone());

        assert_eq!(dir.public_key_for(&info.address), Some([3u8; 32]));
        assert_eq!(dir.peer_by_tcp_address("10.0.0.3:7078"), Some(info));
        assert!(dir.public_key_for("unknown").is_none());
    }

    #[test]
    fn hosts_except_excludes_self_in_position_order() {
        let dir = StaticDirectory::new();
        dir.register(PeerInfo::new(2, "b:1", [2u8; 32]));
        dir.register(PeerInfo::new(0, "self:1", [0u8; 32]));
        dir.register(PeerInfo::new(1, "a:1", [1u8; 32]));
        assert_eq!(dir.hosts_except("self:1"), vec!["a:1".to_string(), "b:1".to_string()]);
    }

    #[test]
    fn unban_restores() {
        let dir = StaticDirectory::new();
        dir.ban(4);
        assert!(dir.is_banned(4));
        dir.unban(4);
        assert!(!dir.is_banned(4));
    }
}
