//! Share flow integration tests
//!
//! Share on one client, fetch on another, with the in-memory network
//! standing in for storage nodes.
//!
//! Run with: cargo test --package cyxshare-pointer --test share_flow

use bytes::Bytes;
use cyxshare_core::{CyxShareError, FileHandle, LayoutParams, ShareCodeFormat};
use cyxshare_pointer::{
    DecryptionKey, Encryption, MemoryPointerCache, MemoryPointerIndex, PointerIndex,
    ProtocolConfig, ShareOptions, ShareService, SledPointerCache,
};
use cyxshare_transfer::{
    CancellationToken, KeyCustody, MemoryNetwork, NodeBehavior, TransferConfig,
};
use std::sync::Arc;
use tempfile::TempDir;

fn layout() -> LayoutParams {
    LayoutParams::new(32, 4).unwrap()
}

fn network() -> Arc<MemoryNetwork> {
    Arc::new(MemoryNetwork::with_healthy_nodes(layout(), 3))
}

fn client(network: &Arc<MemoryNetwork>) -> ShareService {
    ShareService::new(
        network.clone(),
        TransferConfig::default().with_layout(layout()),
        ProtocolConfig::default(),
    )
}

fn file(len: usize) -> (FileHandle, Bytes) {
    let data: Vec<u8> = (0..len).map(|i| (i * 13 % 251) as u8).collect();
    (
        FileHandle::new("report.pdf", len as u64).with_mime_type("application/pdf"),
        Bytes::from(data),
    )
}

#[tokio::test]
async fn test_resolve_through_index_on_fresh_client() {
    let network = network();
    let index = Arc::new(MemoryPointerIndex::new());
    let sender = client(&network)
        .with_cache(Arc::new(MemoryPointerCache::new()))
        .with_index(index.clone());
    let receiver = client(&network).with_index(index.clone());

    let (handle, data) = file(500);
    let shared = sender
        .share(handle, data.clone(), ShareOptions::plaintext(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(index.contains(shared.code.as_str()).await.unwrap());

    let fetched = receiver
        .fetch(shared.code.as_str(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fetched.data, data);
    assert_eq!(fetched.record.file_name, "report.pdf");
    assert_eq!(fetched.record.mime_type, "application/pdf");
    assert_eq!(fetched.record.root_digest, shared.record.root_digest);
}

#[tokio::test]
async fn test_fresh_client_without_index_cannot_resolve() {
    let network = network();
    let sender = client(&network).with_cache(Arc::new(MemoryPointerCache::new()));
    let receiver = client(&network);

    let (handle, data) = file(64);
    let shared = sender
        .share(handle, data, ShareOptions::plaintext(), &CancellationToken::new())
        .await
        .unwrap();

    let err = receiver
        .fetch(shared.code.as_str(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CyxShareError::UnresolvedShareCode { .. }));
}

#[tokio::test]
async fn test_malformed_code_fails_without_network_calls() {
    let network = network();
    let receiver = client(&network).with_index(Arc::new(MemoryPointerIndex::new()));

    for code in ["", "cyx://share-abcd-efgh", "http://share-abcd-efgh-ijkl-mnop"] {
        let err = receiver
            .fetch(code, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CyxShareError::InvalidShareCode { .. }), "{}", code);
    }
    assert!(network.fetches().is_empty());
}

#[tokio::test]
async fn test_embedded_key_custody() {
    let network = network();
    let index = Arc::new(MemoryPointerIndex::new());
    let sender = client(&network).with_index(index.clone());
    let receiver = client(&network).with_index(index);

    let (handle, data) = file(300);
    let options = ShareOptions::encrypted(Encryption::RandomKey)
        .with_custody(KeyCustody::EmbedInRecord)
        .with_uploader("alice");
    let shared = sender
        .share(handle, data.clone(), options, &CancellationToken::new())
        .await
        .unwrap();
    assert!(shared.record.encryption_key.is_some());
    assert_eq!(shared.record.uploader, "alice");
    // ciphertext carries the GCM tag, the record carries the plaintext size
    assert_eq!(shared.record.file_size, 300);

    let fetched = receiver
        .fetch(shared.code.as_str(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fetched.data, data);
}

#[tokio::test]
async fn test_passphrase_share() {
    let network = network();
    let index = Arc::new(MemoryPointerIndex::new());
    let sender = client(&network).with_index(index.clone());
    let receiver = client(&network).with_index(index);

    let (handle, data) = file(129);
    let shared = sender
        .share(
            handle,
            data.clone(),
            ShareOptions::encrypted(Encryption::Passphrase("correct horse".to_string())),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(shared.record.key_salt.is_some());
    assert!(shared.record.encryption_key.is_none());

    let err = receiver
        .fetch(
            shared.code.as_str(),
            Some(DecryptionKey::Passphrase("wrong horse".to_string())),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CyxShareError::Decryption(_)));

    let fetched = receiver
        .fetch(
            shared.code.as_str(),
            Some(DecryptionKey::Passphrase("correct horse".to_string())),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(fetched.data, data);
}

#[tokio::test]
async fn test_fetch_fails_over_from_broken_nodes() {
    let network = network();
    let index = Arc::new(MemoryPointerIndex::new());
    let service = client(&network).with_index(index);

    let (handle, data) = file(1000);
    let shared = service
        .share(handle, data.clone(), ShareOptions::plaintext(), &CancellationToken::new())
        .await
        .unwrap();

    network.set_behavior("node-0", NodeBehavior::Truncated);
    network.set_behavior("node-1", NodeBehavior::Offline);

    let fetched = service
        .fetch(shared.code.as_str(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fetched.data, data);
    assert!(!fetched.report.failed_over_segments().is_empty());
}

#[tokio::test]
async fn test_sled_cache_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let network = network();
    let (handle, data) = file(77);

    let code = {
        let cache = Arc::new(SledPointerCache::open(temp_dir.path()).unwrap());
        let sender = client(&network).with_cache(cache.clone());
        let shared = sender
            .share(handle, data.clone(), ShareOptions::plaintext(), &CancellationToken::new())
            .await
            .unwrap();
        cache.flush().unwrap();
        shared.code
    };

    let cache = Arc::new(SledPointerCache::open(temp_dir.path()).unwrap());
    let fetched = client(&network)
        .with_cache(cache)
        .fetch(code.as_str(), None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fetched.data, data);
}

#[tokio::test]
async fn test_custom_code_format() {
    let network = network();
    let format = ShareCodeFormat::new("acme", "drop");
    let service = ShareService::new(
        network.clone(),
        TransferConfig::default().with_layout(layout()),
        ProtocolConfig::default()
            .with_format(format.clone())
            .with_collision_check(true),
    )
    .with_index(Arc::new(MemoryPointerIndex::new()));

    let (handle, data) = file(10);
    let shared = service
        .share(handle, data, ShareOptions::plaintext(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(shared.code.as_str().starts_with("acme://drop-"));
    assert!(format.validate(shared.code.as_str()));
    assert!(!ShareCodeFormat::default().validate(shared.code.as_str()));
}
