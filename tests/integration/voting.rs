use ledgernet_core::vote::{now_millis, MSG_NOT_SYNCED, MSG_PASSED, MSG_SIGNATURE_FAILED, MSG_TIME_FAILED};
use ledgernet_services::voting::{build_vote_request, collect_votes, tally_votes, QuorumPolicy};
use ledgernet_services::{Ledger, NodeDirectory};

use crate::*;

/// Three validators: two at or below the candidate's height agree, the one
/// ahead of it reports the candidate as not synced.
#[tokio::test]
async fn test_voting_round_and_tally_broadcast() {
    let candidate = Node::spawn(10).await;
    let v1 = Node::spawn(1).await;
    let v2 = Node::spawn(2).await;
    let v3 = Node::spawn(3).await;
    Node::mesh(&[&candidate, &v1, &v2, &v3]);
    candidate.grow_to(8);
    v1.grow_to(8);
    v2.grow_to(3);
    v3.grow_to(12);

    let hosts = candidate.directory.hosts_except(&candidate.addr);
    assert_eq!(hosts.len(), 3);

    let request = build_vote_request(&candidate.ctx, now_millis() - 1_000).unwrap();
    let tally = tally_votes(&candidate.ctx, &hosts, request).await.unwrap();
    assert_eq!(tally.responses.len(), 3);
    assert_eq!(tally.agree_quantity, 2);

    let passed = tally.responses.iter().filter(|r| r.message == MSG_PASSED).count();
    let behind = tally.responses.iter().filter(|r| r.message == MSG_NOT_SYNCED).count();
    assert_eq!((passed, behind), (2, 1));
    assert!(!QuorumPolicy::TWO_THIRDS.admits(tally.agree_quantity, hosts.len()));
    assert!(QuorumPolicy::MAJORITY.admits(tally.agree_quantity, hosts.len()));

    let report = candidate.client().broadcast_tally(&hosts, &tally).await.unwrap();
    assert_eq!(report.succeeded(), 3);
    for validator in [&v1, &v2, &v3] {
        let record = validator.ledger.candidate(&tally.local_address).unwrap().unwrap();
        assert_eq!(record.reply_count, 2);
        assert_eq!(record.tcp_address, candidate.addr);
    }
}

/// A request stamped in the future fails the time check; an unknown
/// candidate fails the signature check.
#[tokio::test]
async fn test_validator_rejections() {
    let candidate = Node::spawn(10).await;
    let stranger = Node::spawn(11).await;
    let validator = Node::spawn(1).await;
    Node::mesh(&[&candidate, &validator]);
    stranger.directory.register(validator.info());

    let future = build_vote_request(&candidate.ctx, now_millis() + 60_000).unwrap();
    let verdict = candidate.client().request_vote(&validator.addr, &future).await.unwrap();
    assert!(!verdict.agree);
    assert_eq!(verdict.message, MSG_TIME_FAILED);

    let unknown = build_vote_request(&stranger.ctx, now_millis() - 1_000).unwrap();
    let verdict = stranger.client().request_vote(&validator.addr, &unknown).await.unwrap();
    assert!(!verdict.agree);
    assert_eq!(verdict.message, MSG_SIGNATURE_FAILED);
}

/// Zero agreements are broadcast but not recorded.
#[tokio::test]
async fn test_empty_tally_is_not_recorded() {
    let candidate = Node::spawn(10).await;
    let validator = Node::spawn(1).await;
    Node::mesh(&[&candidate, &validator]);
    validator.grow_to(5);

    let tally = collect_votes(&candidate.ctx, &[validator.addr.clone()]).await.unwrap();
    assert_eq!(tally.agree_quantity, 0);
    assert_eq!(tally.responses[0].message, MSG_NOT_SYNCED);

    candidate
        .client()
        .broadcast_tally(&[validator.addr.clone()], &tally)
        .await
        .unwrap();
    assert!(validator.ledger.candidate(&tally.local_address).unwrap().is_none());
}
