use ledgernet_services::max_block::BestPeer;
use ledgernet_services::ClientError;
use tokio_util::sync::CancellationToken;

use crate::*;

/// Heights {5, 9, unreachable} pick the node at 9.
#[tokio::test]
async fn test_highest_peer_wins() {
    let me = Node::spawn(0).await;
    let low = Node::spawn(1).await;
    let high = Node::spawn(2).await;
    low.grow_to(5);
    high.grow_to(9);

    let hosts = vec![low.addr.clone(), dead_host().await, high.addr.clone()];
    for _ in 0..3 {
        let best = me
            .client()
            .host_with_max_block(&hosts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            best,
            BestPeer {
                host: high.addr.clone(),
                block_id: 9
            }
        );
    }
}

/// Equal heights resolve to one of the tied hosts.
#[tokio::test]
async fn test_tie_picks_a_tied_host() {
    let me = Node::spawn(0).await;
    let a = Node::spawn(1).await;
    let b = Node::spawn(2).await;
    a.grow_to(4);
    b.grow_to(4);

    let best = me
        .client()
        .host_with_max_block(&[a.addr.clone(), b.addr.clone()], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(best.block_id, 4);
    assert!(best.host == a.addr || best.host == b.addr);
}

#[tokio::test]
async fn test_no_reachable_peer() {
    let me = Node::spawn(0).await;
    let err = me
        .client()
        .host_with_max_block(&[dead_host().await], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoPeersReachable));

    let err = me
        .client()
        .host_with_max_block(&[], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoPeersReachable));
}
