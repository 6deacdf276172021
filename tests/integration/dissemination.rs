use std::collections::HashMap;

use ledgernet_core::crypto;
use ledgernet_core::message::{AnnouncedBlock, DisseminationRequest, GossipPacket};
use ledgernet_services::disseminator::OutgoingTx;
use ledgernet_services::storage::PendingTransaction;
use ledgernet_services::{ClientError, Ledger, NodeDirectory};

use crate::*;

fn txs(bodies: &[&str]) -> Vec<OutgoingTx> {
    bodies.iter().map(|b| OutgoingTx::new(b.as_bytes().to_vec())).collect()
}

/// A validator's gossip reaches every peer: the block is queued and every
/// transaction body lands in the pending pool.
#[tokio::test]
async fn test_full_block_gossip_reaches_all_peers() {
    let sender = Node::spawn(1).await;
    let a = Node::spawn(2).await;
    let b = Node::spawn(3).await;
    Node::mesh(&[&sender, &a, &b]);

    let block = AnnouncedBlock {
        block_id: 1,
        block_hash: block_hash(1),
    };
    let outgoing = txs(&["tx-one", "tx-two"]);
    let hosts = sender.directory.hosts_except(&sender.addr);

    let report = sender
        .client()
        .send_full_block_to_all(&hosts, Some(block), &outgoing)
        .await
        .unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.failed, 0);

    for node in [&a, &b] {
        let pending = node.ledger.pending_block(&block_hash(1)).unwrap();
        assert_eq!(pending.block_id, 1);
        assert_eq!(pending.node_position, 1);
        for tx in &outgoing {
            assert_eq!(node.ledger.pending_tx(&tx.hash).unwrap().data, tx.data.to_vec());
        }
    }
}

/// One reachable peer out of two is still a success; zero is not.
#[tokio::test]
async fn test_fan_out_tolerates_partial_failure_only() {
    let sender = Node::spawn(1).await;
    let alive = Node::spawn(2).await;
    let outgoing = txs(&["payload"]);

    let report = sender
        .client()
        .send_full_block_to_all(&[alive.addr.clone(), dead_host().await], None, &outgoing)
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded(), 1);
    assert!(alive.ledger.pending_tx(&outgoing[0].hash).is_some());

    let err = sender
        .client()
        .send_full_block_to_all(&[dead_host().await, dead_host().await], None, &outgoing)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoPeersReachable));

    let empty = sender.client().send_full_block_to_all(&[], None, &outgoing).await.unwrap();
    assert_eq!(empty.attempted, 0);
}

/// Only bodies the receiver does not already know are transferred.
#[tokio::test]
async fn test_receiver_asks_only_for_unknown_bodies() {
    let sender = Node::spawn(1).await;
    let receiver = Node::spawn(2).await;
    let outgoing = txs(&["known-in-log", "already-pending", "fresh"]);

    receiver.ledger.record_in_log(outgoing[0].hash);
    receiver
        .ledger
        .insert_pending_tx(PendingTransaction {
            hash: outgoing[1].hash,
            data: outgoing[1].data.to_vec(),
            high_priority: false,
        })
        .unwrap();

    let packet = GossipPacket {
        sender_position: 1,
        block: None,
        tx_hashes: outgoing.iter().map(|t| t.hash).collect(),
    };
    let request = DisseminationRequest {
        data: packet.to_bytes().unwrap(),
    };
    let bodies: HashMap<_, _> = outgoing.iter().map(|t| (t.hash, t.data.clone())).collect();

    let sent = sender
        .client()
        .gossip_to(&receiver.addr, &request, &bodies)
        .await
        .unwrap();
    assert_eq!(sent, 1);
    assert!(receiver.ledger.pending_tx(&outgoing[2].hash).is_some());
    assert!(receiver.ledger.pending_tx(&outgoing[0].hash).is_none());
    assert_eq!(receiver.ledger.pending_tx_count(), 2);
}

/// Announcements from banned positions and behind the local tip are dropped.
#[tokio::test]
async fn test_banned_and_stale_announcements_are_ignored() {
    let sender = Node::spawn(7).await;
    let receiver = Node::spawn(2).await;
    receiver.grow_to(5);

    let stale = AnnouncedBlock {
        block_id: 4,
        block_hash: [0x44; 32],
    };
    sender
        .client()
        .send_full_block_to_all(&[receiver.addr.clone()], Some(stale), &[])
        .await
        .unwrap();
    assert!(receiver.ledger.pending_block(&[0x44; 32]).is_none());

    receiver.directory.ban(7);
    let fresh = AnnouncedBlock {
        block_id: 6,
        block_hash: [0x66; 32],
    };
    sender
        .client()
        .send_full_block_to_all(&[receiver.addr.clone()], Some(fresh), &[])
        .await
        .unwrap();
    assert!(receiver.ledger.pending_block(&[0x66; 32]).is_none());

    receiver.directory.unban(7);
    sender
        .client()
        .send_full_block_to_all(&[receiver.addr.clone()], Some(fresh), &[])
        .await
        .unwrap();
    assert!(receiver.ledger.pending_block(&[0x66; 32]).is_some());
    assert_eq!(receiver.ledger.chain_tip().unwrap().block_id, 5);
}

/// Non-validating nodes push whole batches; oversize and duplicate bodies
/// are not counted.
#[tokio::test]
async fn test_transaction_batch_push() {
    let sender = Node::spawn(9).await;
    let a = Node::spawn_with(1, |s| s.limits.max_tx_size = 8).await;
    let b = Node::spawn_with(2, |s| s.limits.max_tx_size = 8).await;

    let batch = vec![b"small".to_vec(), b"way-too-large".to_vec(), b"small".to_vec()];
    let report = sender
        .client()
        .send_transactions_to_all(&[a.addr.clone(), b.addr.clone()], &batch)
        .await
        .unwrap();
    assert_eq!(report.succeeded(), 2);

    for node in [&a, &b] {
        assert_eq!(node.ledger.pending_tx_count(), 1);
        assert!(node.ledger.pending_tx(&crypto::hash(b"small")).is_some());
    }

    let request = DisseminationRequest {
        data: ledgernet_core::message::TxBodies {
            bodies: vec![b"small".to_vec(), b"other".to_vec()],
        }
        .concatenated()
        .unwrap()
        .to_vec(),
    };
    let accepted = sender.client().push_transactions(&a.addr, &request).await.unwrap();
    assert_eq!(accepted, 1);
}
