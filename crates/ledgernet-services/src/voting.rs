//! Candidate voting.
//!
//! A candidate asks each validator to vouch for it. The validator runs three
//! checks in order (height, clock, signature), writes its verdict into the
//! message, signs the verdict and sends the message back. A failed check is
//! an ordinary answer with `agree = false`; only missing or unusable local
//! key material aborts the exchange.
//!
//! The candidate then broadcasts the tally of verified answers. Receivers
//! record positive tallies. Whether a tally is enough for admission is
//! decided by `QuorumPolicy`, which the handlers never consult.

use std::sync::Arc;

use ledgernet_core::message::{JsonFrame, MAX_JSON_FRAME_LEN};
use ledgernet_core::vote::{
    now_millis, BroadcastAck, NodeConnectionTally, VoteMessage, MSG_NOT_SYNCED, MSG_PASSED,
    MSG_SIGNATURE_FAILED, MSG_TIME_FAILED,
};
use ledgernet_core::RequestType;
use tokio::task::JoinSet;

use crate::client::{ClientError, FanOutReport, PeerClient};
use crate::context::NodeContext;
use crate::dispatch::{HandlerError, UnaryHandler};
use crate::storage::CandidateNodeRecord;

// ── Local view ────────────────────────────────────────────────────────────────

/// This node's own view, unsigned, as a `VoteMessage`.
pub fn local_view(ctx: &NodeContext, now: i64) -> Result<VoteMessage, HandlerError> {
    let tip = ctx.ledger.chain_tip()?;
    let public_key = ctx.signer.public_key()?;
    Ok(VoteMessage {
        chain_height: tip.block_id,
        local_address: ctx.crypto.address_of(&public_key),
        tcp_address: ctx.settings.tcp_address.clone(),
        ecosystem_id: 0,
        block_hash: hex::encode(tip.hash),
        agree: false,
        message: String::new(),
        timestamp: now,
        signature: Vec::new(),
    })
}

/// A signed vote request from this node as candidate.
pub fn build_vote_request(ctx: &NodeContext, now: i64) -> Result<VoteMessage, HandlerError> {
    let mut vote = local_view(ctx, now)?;
    vote.signature = ctx.signer.sign(vote.candidate_sign_string().as_bytes())?;
    Ok(vote)
}

/// Judge a candidate's request as validator. Returns the signed verdict.
pub fn judge_vote(ctx: &NodeContext, mut vote: VoteMessage, now: i64) -> Result<VoteMessage, HandlerError> {
    let own = local_view(ctx, now)?;

    let (agree, message) = if vote.chain_height < own.chain_height {
        (false, MSG_NOT_SYNCED)
    } else if vote.timestamp >= own.timestamp {
        (false, MSG_TIME_FAILED)
    } else if candidate_signature_valid(ctx, &vote) {
        (true, MSG_PASSED)
    } else {
        (false, MSG_SIGNATURE_FAILED)
    };

    vote.agree = agree;
    vote.message = message.to_string();
    vote.signature = ctx.signer.sign(vote.verdict_sign_string().as_bytes())?;
    Ok(vote)
}

/// An unregistered address counts as a bad signature.
fn candidate_signature_valid(ctx: &NodeContext, vote: &VoteMessage) -> bool {
    let Some(public_key) = ctx.directory.public_key_for(&vote.local_address) else {
        tracing::debug!(address = %vote.local_address, "vote from unregistered candidate");
        return false;
    };
    match ctx.crypto.verify(
        &public_key,
        vote.candidate_sign_string().as_bytes(),
        &vote.signature,
    ) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::debug!(address = %vote.local_address, error = %e, "candidate signature unusable");
            false
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

pub struct CandidateVotingHandler {
    ctx: Arc<NodeContext>,
}

impl CandidateVotingHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

impl UnaryHandler for CandidateVotingHandler {
    type Request = JsonFrame<VoteMessage>;
    type Response = JsonFrame<VoteMessage>;

    fn respond(
        &self,
        request: JsonFrame<VoteMessage>,
    ) -> Result<Option<JsonFrame<VoteMessage>>, HandlerError> {
        let vote = request.value()?;
        let candidate = vote.local_address.clone();
        let verdict = judge_vote(&self.ctx, vote, now_millis())?;
        tracing::info!(
            %candidate,
            agree = verdict.agree,
            message = %verdict.message,
            "vote judged"
        );
        Ok(Some(JsonFrame::new(&verdict)?))
    }

    fn max_request_len(&self) -> usize {
        MAX_JSON_FRAME_LEN
    }
}

pub struct NodeConnectionBroadcastHandler {
    ctx: Arc<NodeContext>,
}

impl NodeConnectionBroadcastHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

impl UnaryHandler for NodeConnectionBroadcastHandler {
    type Request = JsonFrame<NodeConnectionTally>;
    type Response = JsonFrame<BroadcastAck>;

    fn respond(
        &self,
        request: JsonFrame<NodeConnectionTally>,
    ) -> Result<Option<JsonFrame<BroadcastAck>>, HandlerError> {
        let tally = request.value()?;
        let recorded = tally.agree_quantity > 0;
        if recorded {
            self.ctx.ledger.upsert_candidate(CandidateNodeRecord {
                address: tally.local_address.clone(),
                tcp_address: tally.tcp_address().unwrap_or_default().to_string(),
                reply_count: tally.agree_quantity,
                reply_timestamp: tally.timestamp,
                raw_payload: request.raw,
            })?;
            tracing::info!(
                candidate = %tally.local_address,
                agree = tally.agree_quantity,
                "candidate tally recorded"
            );
        }
        Ok(Some(JsonFrame::new(&BroadcastAck { recorded })?))
    }

    fn max_request_len(&self) -> usize {
        MAX_JSON_FRAME_LEN
    }
}

// ── Quorum ────────────────────────────────────────────────────────────────────

/// Admission threshold: strictly more than `numerator / denominator` of the
/// validator set must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumPolicy {
    pub numerator: u32,
    pub denominator: u32,
}

impl QuorumPolicy {
    pub const TWO_THIRDS: QuorumPolicy = QuorumPolicy {
        numerator: 2,
        denominator: 3,
    };

    pub const MAJORITY: QuorumPolicy = QuorumPolicy {
        numerator: 1,
        denominator: 2,
    };

    pub fn admits(&self, agree_quantity: i64, validators: usize) -> bool {
        if validators == 0 || agree_quantity <= 0 || self.denominator == 0 {
            return false;
        }
        agree_quantity as u128 * self.denominator as u128
            > validators as u128 * self.numerator as u128
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

impl PeerClient {
    /// Send a signed vote request to one validator and return its verdict.
    pub async fn request_vote(&self, host: &str, vote: &VoteMessage) -> Result<VoteMessage, ClientError> {
        let frame = JsonFrame::new(vote)?;
        let resp: JsonFrame<VoteMessage> = self
            .request(host, RequestType::CandidateVoting, &frame)
            .await?;
        Ok(resp.value()?)
    }

    /// Send a tally to every host.
    pub async fn broadcast_tally(
        &self,
        hosts: &[String],
        tally: &NodeConnectionTally,
    ) -> Result<FanOutReport, ClientError> {
        let frame = Arc::new(JsonFrame::new(tally)?);
        self.fan_out(hosts, |client, host| {
            let frame = frame.clone();
            async move {
                let ack: JsonFrame<BroadcastAck> = client
                    .request(&host, RequestType::NodeConnectionBroadcast, frame.as_ref())
                    .await?;
                tracing::trace!(%host, recorded = ack.value()?.recorded, "tally delivered");
                Ok(())
            }
        })
        .await
    }
}

/// Ask every validator for a vote on this node and tally the answers.
pub async fn collect_votes(ctx: &NodeContext, hosts: &[String]) -> Result<NodeConnectionTally, ClientError> {
    let request = build_vote_request(ctx, now_millis()).map_err(|e| match e {
        HandlerError::Crypto(e) => ClientError::Crypto(e),
        HandlerError::Storage(e) => ClientError::Storage(e),
        HandlerError::Wire(e) => ClientError::Wire(e),
        HandlerError::Rejected(reason) => ClientError::protocol("local", reason),
    })?;
    tally_votes(ctx, hosts, request).await
}

/// Send `request` to every validator and tally the verified answers.
///
/// An answer counts only if its verdict signature checks out against the
/// key registered for the host it came from.
pub async fn tally_votes(
    ctx: &NodeContext,
    hosts: &[String],
    request: VoteMessage,
) -> Result<NodeConnectionTally, ClientError> {
    if hosts.is_empty() {
        return Err(ClientError::NoPeersReachable);
    }
    let request = Arc::new(request);

    let mut tasks = JoinSet::new();
    for host in hosts {
        let client = ctx.client();
        let request = request.clone();
        let host = host.clone();
        tasks.spawn(async move {
            let result = client.request_vote(&host, &request).await;
            (host, result)
        });
    }

    let mut tally = NodeConnectionTally {
        local_address: request.local_address.clone(),
        ..NodeConnectionTally::default()
    };
    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (host, result) = match joined {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "vote task aborted");
                failed += 1;
                continue;
            }
        };
        let verdict = match result {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(%host, error = %e, "vote request failed");
                failed += 1;
                continue;
            }
        };
        if !verdict_signature_valid(ctx, &host, &verdict) {
            tracing::warn!(%host, "discarding vote with unverifiable signature");
            continue;
        }
        if verdict.agree {
            tally.agree_quantity += 1;
        }
        tally.responses.push(verdict);
    }

    if failed == hosts.len() {
        return Err(ClientError::NoPeersReachable);
    }
    tally.timestamp = now_millis();
    tracing::info!(
        asked = hosts.len(),
        answered = tally.responses.len(),
        agree = tally.agree_quantity,
        "votes collected"
    );
    Ok(tally)
}

fn verdict_signature_valid(ctx: &NodeContext, host: &str, verdict: &VoteMessage) -> bool {
    let Some(validator) = ctx.directory.peer_by_tcp_address(host) else {
        return false;
    };
    ctx.crypto
        .verify(
            &validator.public_key,
            verdict.verdict_sign_string().as_bytes(),
            &verdict.signature,
        )
        .unwrap_or(false)
}
