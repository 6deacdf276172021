use ledgernet_core::crypto;
use ledgernet_core::message::{PrivateDataRequest, PrivateFileRequest, SubNodeDataRequest};
use ledgernet_services::storage::RelayPayload;
use ledgernet_services::ClientError;

use crate::*;

/// A stop-network submission is queued ahead of ordinary transactions and
/// answered with its hash.
#[tokio::test]
async fn test_stop_network_submission() {
    let operator = Node::spawn(0).await;
    let validator = Node::spawn(1).await;

    let cert = b"stop at height 500".to_vec();
    let hash = operator.client().stop_network(&validator.addr, cert.clone()).await.unwrap();
    assert_eq!(hash, crypto::hash(&cert));
    assert!(validator.ledger.pending_tx(&hash).unwrap().high_priority);

    // Rejected submissions close the session without an answer.
    let err = operator
        .client()
        .stop_network(&validator.addr, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Wire(_)));
}

/// Confirmation answers with the stored hash, or nothing for unknown blocks.
#[tokio::test]
async fn test_block_confirmation() {
    let me = Node::spawn(0).await;
    let peer = Node::spawn(1).await;
    peer.grow_to(3);

    let client = me.client();
    assert_eq!(client.check_confirmation(&peer.addr, 2).await.unwrap(), Some(block_hash(2)));
    assert_eq!(client.check_confirmation(&peer.addr, 9).await.unwrap(), None);
}

/// All three relay kinds are stored by data hash on the receiving node.
#[tokio::test]
async fn test_private_data_relay() {
    let sender = Node::spawn(0).await;
    let receiver = Node::spawn(1).await;
    let client = sender.client();

    let private = PrivateDataRequest {
        task_uuid: "task-a".into(),
        data_type: "json".into(),
        data_info: "{}".into(),
        transfer_mode: "direct".into(),
        data: b"{\"k\":1}".to_vec(),
    };
    let file = PrivateFileRequest {
        task_uuid: "task-b".into(),
        task_name: "report".into(),
        file_name: "report.pdf".into(),
        mime_type: "application/pdf".into(),
        data: vec![0x25, 0x50, 0x44, 0x46],
        ..PrivateFileRequest::default()
    };
    let shard = SubNodeDataRequest {
        task_uuid: "task-c".into(),
        data_uuid: "shard-1".into(),
        data: vec![7; 64],
        ..SubNodeDataRequest::default()
    };

    let h_private = client.relay(&receiver.addr, &private).await.unwrap();
    let h_file = client.relay(&receiver.addr, &file).await.unwrap();
    let h_shard = client.relay(&receiver.addr, &shard).await.unwrap();

    assert_eq!(
        receiver.ledger.relayed(&h_private).unwrap().payload,
        RelayPayload::PrivateData(private)
    );
    assert_eq!(
        receiver.ledger.relayed(&h_file).unwrap().payload,
        RelayPayload::PrivateFile(file)
    );
    let stored = receiver.ledger.relayed(&h_shard).unwrap();
    assert_eq!(stored.hash, crypto::hash(&[7; 64]));
    assert_eq!(stored.payload.data(), &[7; 64][..]);
}

/// Relay payloads over the receiver's limit are refused.
#[tokio::test]
async fn test_relay_limit() {
    let sender = Node::spawn(0).await;
    let receiver = Node::spawn_with(1, |s| s.limits.max_relay_payload = 16).await;

    let big = SubNodeDataRequest {
        data: vec![1; 17],
        ..SubNodeDataRequest::default()
    };
    assert!(sender.client().relay(&receiver.addr, &big).await.is_err());
    assert!(receiver.ledger.relayed(&crypto::hash(&[1; 17])).is_none());
}
