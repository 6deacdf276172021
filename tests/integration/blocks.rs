use ledgernet_core::wire::BLOCKS_PER_REQUEST;
use ledgernet_services::ClientError;
use tokio_util::sync::CancellationToken;

use crate::*;

/// Forward collection yields consecutive blocks with their stored lengths.
#[tokio::test]
async fn test_forward_collection_is_ordered() {
    let source = Node::spawn(1).await;
    let syncing = Node::spawn(2).await;
    source.grow_to(6);

    let mut stream = syncing
        .client()
        .collect_blocks(&source.addr, 3, false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stream.block_count(), 4);
    assert_eq!(stream.total_len(), 3 + 4 + 5 + 6);

    let mut seen = Vec::new();
    while let Some(block) = stream.next_block().await {
        seen.push(block);
    }
    assert!(stream.take_error().is_none());
    let expected: Vec<Vec<u8>> = (3..=6).map(block_body).collect();
    assert_eq!(seen.iter().map(|b| b.to_vec()).collect::<Vec<_>>(), expected);
}

/// Reverse collection walks down from the start block.
#[tokio::test]
async fn test_reverse_collection_walks_down() {
    let source = Node::spawn(1).await;
    let syncing = Node::spawn(2).await;
    source.grow_to(4);

    let blocks = syncing
        .client()
        .fetch_blocks(&source.addr, 3, true, &CancellationToken::new())
        .await
        .unwrap();
    let lengths: Vec<usize> = blocks.iter().map(|b| b.len()).collect();
    assert_eq!(lengths, vec![3, 2, 1]);
}

/// A long chain is served one capped page at a time.
#[tokio::test]
async fn test_collection_is_paged() {
    let source = Node::spawn(1).await;
    let syncing = Node::spawn(2).await;
    let height = BLOCKS_PER_REQUEST as i64 + 20;
    source.grow_to(height);

    let client = syncing.client();
    let cancel = CancellationToken::new();
    let first = client.fetch_blocks(&source.addr, 1, false, &cancel).await.unwrap();
    assert_eq!(first.len(), BLOCKS_PER_REQUEST);

    let next = BLOCKS_PER_REQUEST as u32 + 1;
    let second = client.fetch_blocks(&source.addr, next, false, &cancel).await.unwrap();
    assert_eq!(second.len(), 20);
    assert_eq!(second[0].len(), next as usize);
}

/// Asking past the tip is an explicit "no blocks", not an empty success.
#[tokio::test]
async fn test_past_tip_reports_no_blocks() {
    let source = Node::spawn(1).await;
    let syncing = Node::spawn(2).await;
    source.grow_to(2);

    let err = syncing
        .client()
        .fetch_blocks(&source.addr, 3, false, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoBlocks { start_block_id: 3, .. }));

    let err = syncing
        .client()
        .fetch_blocks(&dead_host().await, 1, false, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Dial { .. }));
}

/// Blocks larger than the receiver accepts end the stream with an error.
#[tokio::test]
async fn test_oversized_block_is_refused() {
    let source = Node::spawn(1).await;
    let syncing = Node::spawn_with(2, |s| s.limits.max_block_size = 2).await;
    source.grow_to(3);

    let result = syncing
        .client()
        .fetch_blocks(&source.addr, 1, false, &CancellationToken::new())
        .await;
    assert!(result.is_err());
}
