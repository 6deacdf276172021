//! Candidate voting payloads.
//!
//! A candidate sends a signed `VoteMessage` to each validator; the validator
//! echoes it back with `agree`, `message` and `signature` rewritten. Both
//! travel as JSON inside a length-prefixed frame.
//!
//! Two canonical sign-strings exist:
//!   candidate: height,local,tcp,ecosystem,hash,timestamp
//!   verdict:   candidate string + ,agree,message

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const MSG_NOT_SYNCED: &str = "Not synced to latest block";
pub const MSG_TIME_FAILED: &str = "Time verification failed";
pub const MSG_SIGNATURE_FAILED: &str = "Signature verification failed";
pub const MSG_PASSED: &str = "Passed the verification";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteMessage {
    pub chain_height: i64,
    pub local_address: String,
    pub tcp_address: String,
    pub ecosystem_id: i64,
    /// Hex-encoded hash of the sender's last known block.
    pub block_hash: String,
    pub agree: bool,
    pub message: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl VoteMessage {
    /// What the candidate signs.
    pub fn candidate_sign_string(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.chain_height,
            self.local_address,
            self.tcp_address,
            self.ecosystem_id,
            self.block_hash,
            self.timestamp
        )
    }

    /// What the validator signs. Covers the verdict as well.
    pub fn verdict_sign_string(&self) -> String {
        format!(
            "{},{},{}",
            self.candidate_sign_string(),
            self.agree,
            self.message
        )
    }
}

/// Votes gathered by a candidate, broadcast to every peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConnectionTally {
    pub responses: Vec<VoteMessage>,
    pub agree_quantity: i64,
    pub local_address: String,
    /// Unix milliseconds at which collection finished.
    pub timestamp: i64,
}

impl NodeConnectionTally {
    /// The candidate's advertised TCP address, as echoed by the validators.
    pub fn tcp_address(&self) -> Option<&str> {
        self.responses
            .iter()
            .map(|r| r.tcp_address.as_str())
            .find(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastAck {
    pub recorded: bool,
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
