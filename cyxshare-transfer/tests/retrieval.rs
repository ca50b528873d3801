//! Retrieval integration tests
//!
//! Drives upload -> plan -> multi-node fetch -> reassembly against the
//! in-memory network with scripted node failures.
//!
//! Run with: cargo test --package cyxshare-transfer --test retrieval

use bytes::Bytes;
use cyxshare_core::{CyxShareError, EncryptionKey, FetchFailure, LayoutParams, RootDigest};
use cyxshare_transfer::{
    CancellationToken, CryptoEnvelope, FetchPath, MemoryNetwork, NodeBehavior, RetrievalExecutor,
    RetrievalPath, ShardConfig, StorageLocation, StorageNetwork, TaskState, TransferConfig,
    Uploader,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const CHUNK: u64 = 16;
const MAX_CHUNKS: u64 = 4;
const SEGMENT: u64 = CHUNK * MAX_CHUNKS;

fn params() -> LayoutParams {
    LayoutParams::new(CHUNK, MAX_CHUNKS).unwrap()
}

fn config() -> TransferConfig {
    TransferConfig::default()
        .with_layout(params())
        .with_fetch_timeout(Duration::from_millis(500))
}

/// Generate test file data of specified size
fn generate_file(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 % 256) as u8).collect()
}

fn executor(network: &Arc<MemoryNetwork>, config: TransferConfig) -> RetrievalExecutor {
    RetrievalExecutor::new(network.clone(), config)
}

#[tokio::test]
async fn test_failover_records_one_attempt_per_node() {
    let network = Arc::new(MemoryNetwork::new(params()));
    network.add_node_with(StorageLocation::new("down", "mem://down", 0), NodeBehavior::Offline);
    network.add_node_with(StorageLocation::new("empty", "mem://empty", 1), NodeBehavior::Missing);
    network.add_node_with(
        StorageLocation::new("syncing", "mem://syncing", 2),
        NodeBehavior::Unfinalized,
    );
    network.add_node(StorageLocation::new("good", "mem://good", 3));

    let original = generate_file((SEGMENT * 3) as usize);
    let root = network.insert_file(original.clone());

    let retrieval = executor(&network, config().with_retrieval_path(RetrievalPath::RichOnly))
        .retrieve(&root, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(retrieval.payload.as_bytes(), original.as_slice());
    for segment in 0..3 {
        assert_eq!(retrieval.report.attempts_for(segment), 4);
    }

    let attempts = &retrieval.report.tasks[0].attempts;
    let ranks: Vec<usize> = attempts.iter().map(|a| a.rank).collect();
    assert_eq!(ranks, vec![0, 1, 2, 3]);
    assert!(matches!(attempts[0].failure, Some(FetchFailure::Unreachable(_))));
    assert_eq!(attempts[1].failure, Some(FetchFailure::NotFound));
    assert_eq!(attempts[2].failure, Some(FetchFailure::NotFinalized));
    assert!(attempts[3].succeeded());
    assert_eq!(retrieval.report.tasks[0].state, TaskState::Succeeded);
}

#[tokio::test]
async fn test_hanging_first_node_does_not_stall_retrieve() {
    let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 2));
    let original = generate_file((SEGMENT * 2 + 3) as usize);
    let root = network.insert_file(original.clone());
    network.set_behavior("node-0", NodeBehavior::Hang);

    let executor = executor(&network, config().with_fetch_timeout(Duration::from_millis(50)));
    let retrieval = tokio::time::timeout(
        Duration::from_secs(2),
        executor.retrieve(&root, &CancellationToken::new()),
    )
    .await
    .expect("retrieve stalled on a hanging node")
    .unwrap();

    assert_eq!(retrieval.payload.as_bytes(), original.as_slice());
    for task in &retrieval.report.tasks {
        assert_eq!(task.attempts[0].node_id, "node-0");
        assert_eq!(task.attempts[0].failure, Some(FetchFailure::Timeout));
        assert!(task.attempts[1].succeeded());
    }
}

#[tokio::test]
async fn test_exhaustion_never_returns_partial_file() {
    let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 3));
    // Whole segments, so truncation is detectable on both paths
    let root = network.insert_file(generate_file((SEGMENT * 4) as usize));
    for node in ["node-0", "node-1", "node-2"] {
        network.set_behavior(node, NodeBehavior::Truncated);
    }

    let err = executor(&network, config())
        .retrieve(&root, &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        CyxShareError::Exhausted {
            root: failed_root,
            failed_segments,
            total,
        } => {
            assert_eq!(failed_root, &root);
            assert!(!failed_segments.is_empty());
            assert_eq!(*total, 4);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert!(!err.is_integrity_failure());
}

#[tokio::test]
async fn test_exhaustion_drops_in_flight_siblings() {
    let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 2));
    let root = network.insert_file(generate_file((SEGMENT * 2) as usize));
    network.set_behavior("node-0", NodeBehavior::Truncated);
    network.set_behavior("node-1", NodeBehavior::Truncated);
    // Segment 1 is still in flight when segment 0 runs out of nodes
    network.delay_segment(1, Duration::from_secs(60));

    let executor = executor(
        &network,
        config()
            .with_retrieval_path(RetrievalPath::RichOnly)
            .with_fetch_timeout(Duration::from_secs(30)),
    );
    let err = tokio::time::timeout(
        Duration::from_secs(2),
        executor.retrieve(&root, &CancellationToken::new()),
    )
    .await
    .expect("exhaustion waited for in-flight siblings")
    .unwrap_err();

    match err {
        CyxShareError::Exhausted {
            failed_segments,
            total,
            ..
        } => {
            assert_eq!(failed_segments, vec![0]);
            assert_eq!(total, 2);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_out_of_order_completion_reassembles_in_order() {
    let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 1));
    let original = generate_file((SEGMENT * 3) as usize);
    let root = network.insert_file(original.clone());
    network.delay_segment(0, Duration::from_millis(150));
    network.delay_segment(1, Duration::from_millis(75));

    let retrieval = executor(&network, config().with_concurrency(4))
        .retrieve(&root, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(retrieval.report.completion_order, vec![2, 1, 0]);
    assert_eq!(retrieval.payload.as_bytes(), original.as_slice());
}

#[tokio::test]
async fn test_rich_and_direct_paths_are_byte_identical() {
    let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 2));

    for size in [1, CHUNK - 1, CHUNK + 3, SEGMENT, SEGMENT * 5 + 9] {
        let original = generate_file(size as usize);
        let root = network.insert_file(original.clone());

        let rich = executor(&network, config().with_retrieval_path(RetrievalPath::RichOnly))
            .download(&root)
            .await
            .unwrap();
        let direct = executor(&network, config().with_retrieval_path(RetrievalPath::DirectOnly))
            .download(&root)
            .await
            .unwrap();

        assert_eq!(rich.as_bytes(), direct.as_bytes(), "size {}", size);
        assert_eq!(rich.as_bytes(), original.as_slice(), "size {}", size);
    }
}

#[tokio::test]
async fn test_direct_path_takes_over_when_rich_fails() {
    let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 2));
    let original = generate_file((SEGMENT * 2 + 5) as usize);
    let root = network.insert_file(original.clone());
    network.set_behavior("node-0", NodeBehavior::NoProof);
    network.set_behavior("node-1", NodeBehavior::NoProof);

    let retrieval = executor(&network, config().with_verify_proofs(true))
        .retrieve(&root, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(retrieval.payload.as_bytes(), original.as_slice());
    for task in &retrieval.report.tasks {
        // two rejected rich attempts, then the first direct attempt
        assert_eq!(task.attempts.len(), 3);
        assert_eq!(task.attempts[0].failure, Some(FetchFailure::ProofRejected));
        assert_eq!(task.attempts[2].path, FetchPath::Direct);
        assert!(task.attempts[2].succeeded());
    }
}

#[tokio::test]
async fn test_sharded_nodes_serve_only_their_segments() {
    let network = Arc::new(MemoryNetwork::new(params()));
    network.add_node(StorageLocation::new("even", "mem://even", 0).with_shard(ShardConfig::new(2, 0)));
    network.add_node(StorageLocation::new("odd", "mem://odd", 1).with_shard(ShardConfig::new(2, 1)));

    let original = generate_file((SEGMENT * 4) as usize);
    let root = network.insert_file(original.clone());

    let payload = executor(&network, config()).download(&root).await.unwrap();
    assert_eq!(payload.as_bytes(), original.as_slice());
    assert_eq!(network.fetch_count("even"), 2);
    assert_eq!(network.fetch_count("odd"), 2);
}

#[tokio::test]
async fn test_cancellation_discards_in_flight_download() {
    let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 1));
    let root = network.insert_file(generate_file((SEGMENT * 2) as usize));

    let executor = executor(&network, config().with_fetch_timeout(Duration::from_secs(30)));
    let nodes = network.discover_nodes(&root).await.unwrap();
    let info = network.file_info(&nodes[0], &root).await.unwrap().unwrap();
    let plan = executor.planner().plan_download(&root, &info, &nodes).unwrap();
    network.set_behavior("node-0", NodeBehavior::Hang);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = executor.execute(&plan, &cancel).await.unwrap_err();
    assert!(matches!(err, CyxShareError::Cancelled { .. }));
}

#[tokio::test]
async fn test_not_finalized_everywhere_is_fetch_error() {
    let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 2));
    let root = network.insert_file(generate_file(100));
    network.set_behavior("node-0", NodeBehavior::Unfinalized);
    network.set_behavior("node-1", NodeBehavior::Unfinalized);

    let err = executor(&network, config()).download(&root).await.unwrap_err();
    assert!(matches!(
        err,
        CyxShareError::Fetch {
            failure: FetchFailure::NotFinalized,
            ..
        }
    ));
}

/// encrypt -> upload -> download -> verify -> decrypt for boundary sizes
#[tokio::test]
async fn test_encrypted_round_trip_boundary_sizes() {
    let envelope = CryptoEnvelope::default();

    for layout in [params(), LayoutParams::default()] {
        let network = Arc::new(MemoryNetwork::with_healthy_nodes(layout, 2));
        let uploader = Uploader::new(network.clone(), layout);
        let executor = RetrievalExecutor::new(network.clone(), TransferConfig::default().with_layout(layout));

        let chunk = layout.chunk_size() as usize;
        let sizes = [0, 1, chunk - 1, chunk, layout.segment_size() as usize + 1];
        for size in sizes {
            let original = generate_file(size);
            let key = EncryptionKey::generate();

            let sealed = envelope.seal(&original, &key).unwrap();
            let receipt = uploader.upload(sealed.ciphertext.clone()).await.unwrap();
            let payload = executor.download(&receipt.root).await.unwrap();
            let plaintext = envelope.open(payload, &key, &sealed.iv).unwrap();

            assert_eq!(plaintext.as_ref(), original.as_slice(), "size {}", size);
        }
    }
}

#[tokio::test]
async fn test_plaintext_round_trip_boundary_sizes() {
    let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 1));
    let uploader = Uploader::new(network.clone(), params());
    let executor = executor(&network, config());
    let envelope = CryptoEnvelope::default();

    for size in [0, 1, CHUNK - 1, CHUNK, SEGMENT + 1] {
        let original = Bytes::from(generate_file(size as usize));
        let receipt = uploader.upload(original.clone()).await.unwrap();
        let payload = executor.download(&receipt.root).await.unwrap();
        assert_eq!(envelope.pass_through(payload), original, "size {}", size);
    }
}

#[tokio::test]
async fn test_wrong_key_never_yields_plaintext() {
    let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 1));
    let uploader = Uploader::new(network.clone(), params());
    let executor = executor(&network, config());
    let envelope = CryptoEnvelope::default();

    let sealed = envelope.seal(b"attack at dawn", &EncryptionKey::generate()).unwrap();
    let receipt = uploader.upload(sealed.ciphertext).await.unwrap();
    let payload = executor.download(&receipt.root).await.unwrap();

    let err = envelope
        .open(payload, &EncryptionKey::generate(), &sealed.iv)
        .unwrap_err();
    assert!(matches!(err, CyxShareError::Decryption(_)));
    assert_ne!(receipt.root, RootDigest::empty());
}

fn retrieval_paths() -> impl Strategy<Value = RetrievalPath> {
    prop::sample::select(vec![
        RetrievalPath::RichThenDirect,
        RetrievalPath::RichOnly,
        RetrievalPath::DirectOnly,
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Whatever order segments arrive in, reassembly yields the original bytes
    #[test]
    fn prop_reassembly_is_order_independent(
        size in 0u64..SEGMENT * 6,
        delays in prop::collection::vec(0u64..15, 6),
        path in retrieval_paths(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (payload, mut completed, segments) = runtime.block_on(async {
            let network = Arc::new(MemoryNetwork::with_healthy_nodes(params(), 2));
            let original = generate_file(size as usize);
            let root = network.insert_file(original.clone());
            for (segment, delay) in delays.iter().enumerate() {
                network.delay_segment(segment as u64, Duration::from_millis(*delay));
            }

            let retrieval = executor(&network, config().with_concurrency(6).with_retrieval_path(path))
                .retrieve(&root, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(retrieval.payload.as_bytes(), original.as_slice());
            let segments = retrieval.report.tasks.len() as u64;
            (retrieval.payload, retrieval.report.completion_order, segments)
        });

        prop_assert_eq!(payload.len() as u64, size);
        completed.sort_unstable();
        prop_assert_eq!(completed, (0..segments).collect::<Vec<u64>>());
    }
}
