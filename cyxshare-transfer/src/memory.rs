//! In-memory storage network
//!
//! Used for testing and development. Not persistent. Every node serves the
//! same file set; per-node behaviors script the failures the retrieval
//! executor has to survive.

use crate::config::FetchPath;
use crate::network::{
    FileInfo, SegmentPayload, SegmentResponse, StorageLocation, StorageNetwork, Submission,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use cyxshare_core::segment::split_num;
use cyxshare_core::{
    compute_layout, CyxShareError, LayoutParams, MerkleTree, Result, RootDigest,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How a simulated node answers requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBehavior {
    /// Serves correct data with proofs
    Healthy,
    /// Every call fails as if the node were unreachable
    Offline,
    /// Knows nothing about any file
    Missing,
    /// Knows the file but reports it as not finalized
    Unfinalized,
    /// Serves segments with the first byte flipped
    Corrupt,
    /// Serves segments one byte short
    Truncated,
    /// Serves correct segments without proofs
    NoProof,
    /// Healthy, after a delay
    Slow(Duration),
    /// Never answers
    Hang,
    /// Healthy, but answers file-info requests with this metadata
    MisreportsInfo(FileInfo),
}

/// One segment request seen by the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    pub node_id: String,
    pub segment: u64,
    pub path: FetchPath,
}

struct MemoryNode {
    location: StorageLocation,
    behavior: NodeBehavior,
}

struct StoredFile {
    data: Bytes,
    info: FileInfo,
    tree: MerkleTree,
}

/// In-memory storage network
pub struct MemoryNetwork {
    params: LayoutParams,
    nodes: RwLock<Vec<MemoryNode>>,
    files: RwLock<HashMap<RootDigest, StoredFile>>,
    /// Extra latency per file-local segment, on every node
    segment_delays: RwLock<HashMap<u64, Duration>>,
    fetches: Mutex<Vec<FetchRecord>>,
    /// Root reported back by `submit_file` instead of the real one
    echo_override: RwLock<Option<RootDigest>>,
    next_segment: AtomicU64,
    next_tx: AtomicU64,
    submissions: AtomicU64,
}

impl MemoryNetwork {
    /// Create an empty network with no nodes
    pub fn new(params: LayoutParams) -> Self {
        Self {
            params,
            nodes: RwLock::new(Vec::new()),
            files: RwLock::new(HashMap::new()),
            segment_delays: RwLock::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            echo_override: RwLock::new(None),
            next_segment: AtomicU64::new(0),
            next_tx: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
        }
    }

    /// Create a network of `count` healthy nodes ranked in order
    pub fn with_healthy_nodes(params: LayoutParams, count: usize) -> Self {
        let network = Self::new(params);
        for i in 0..count {
            network.add_node(StorageLocation::new(
                format!("node-{}", i),
                format!("mem://node-{}", i),
                i as u32,
            ));
        }
        network
    }

    pub fn params(&self) -> &LayoutParams {
        &self.params
    }

    pub fn add_node(&self, location: StorageLocation) {
        self.add_node_with(location, NodeBehavior::Healthy);
    }

    pub fn add_node_with(&self, location: StorageLocation, behavior: NodeBehavior) {
        self.nodes.write().push(MemoryNode { location, behavior });
    }

    /// Change the behavior of a node; returns false if the node is unknown
    pub fn set_behavior(&self, node_id: &str, behavior: NodeBehavior) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.iter_mut().find(|n| n.location.node_id == node_id) {
            Some(node) => {
                node.behavior = behavior;
                true
            }
            None => false,
        }
    }

    /// Delay every answer for a file-local segment
    pub fn delay_segment(&self, segment_index: u64, delay: Duration) {
        self.segment_delays.write().insert(segment_index, delay);
    }

    /// Make `submit_file` echo a different root than the one stored
    pub fn override_submission_root(&self, root: Option<RootDigest>) {
        *self.echo_override.write() = root;
    }

    /// Store a file directly, bypassing `submit_file` accounting
    pub fn insert_file(&self, data: impl Into<Bytes>) -> RootDigest {
        self.store(data.into()).0
    }

    pub fn contains(&self, root: &RootDigest) -> bool {
        self.files.read().contains_key(root)
    }

    /// All segment requests seen so far, in arrival order
    pub fn fetches(&self) -> Vec<FetchRecord> {
        self.fetches.lock().clone()
    }

    /// Segment requests served to one node
    pub fn fetch_count(&self, node_id: &str) -> usize {
        self.fetches
            .lock()
            .iter()
            .filter(|f| f.node_id == node_id)
            .count()
    }

    /// Segment requests for one file-local segment, on any node
    pub fn fetches_for_segment(&self, segment: u64) -> usize {
        self.fetches
            .lock()
            .iter()
            .filter(|f| f.segment == segment)
            .count()
    }

    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Store `data`, returning its root and transaction reference.
    /// Re-storing identical bytes keeps the original transaction.
    fn store(&self, data: Bytes) -> (RootDigest, String) {
        let tree = MerkleTree::from_data(&data, &self.params);
        let root = tree.root();

        let mut files = self.files.write();
        if let Some(existing) = files.get(&root) {
            return (root, format!("tx-{}", existing.info.tx_seq));
        }

        let layout = compute_layout(data.len() as u64, &self.params);
        let segments = layout.segment_count().max(1);
        // Files start on a segment boundary of the entry flow
        let start_segment = self.next_segment.fetch_add(segments, Ordering::SeqCst);
        let tx_seq = self.next_tx.fetch_add(1, Ordering::SeqCst);

        let info = FileInfo {
            tx_seq,
            start_entry_index: start_segment * self.params.max_chunks_per_segment(),
            size: data.len() as u64,
            finalized: true,
        };
        files.insert(root, StoredFile { data, info, tree });

        (root, format!("tx-{}", tx_seq))
    }

    fn behavior_of(&self, node: &StorageLocation) -> NodeBehavior {
        self.nodes
            .read()
            .iter()
            .find(|n| n.location.node_id == node.node_id)
            .map(|n| n.behavior.clone())
            .unwrap_or(NodeBehavior::Offline)
    }

    fn record_fetch(&self, node: &StorageLocation, segment: u64, path: FetchPath) {
        self.fetches.lock().push(FetchRecord {
            node_id: node.node_id.clone(),
            segment,
            path,
        });
    }

    /// Sleep as the behavior and segment dictate. Returns an error for
    /// nodes that cannot be reached. No lock is held while sleeping.
    async fn simulate_latency(
        &self,
        node: &StorageLocation,
        behavior: &NodeBehavior,
        segment: Option<u64>,
    ) -> Result<()> {
        let segment_delay = segment.and_then(|s| self.segment_delays.read().get(&s).copied());
        if let Some(delay) = segment_delay {
            tokio::time::sleep(delay).await;
        }

        match behavior {
            NodeBehavior::Offline => Err(CyxShareError::Network(format!(
                "node {} is offline",
                node.node_id
            ))),
            NodeBehavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            NodeBehavior::Hang => {
                futures::future::pending::<()>().await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn damage(behavior: &NodeBehavior, data: Bytes) -> Bytes {
        match behavior {
            NodeBehavior::Corrupt if !data.is_empty() => {
                let mut damaged = BytesMut::from(&data[..]);
                damaged[0] ^= 0xFF;
                damaged.freeze()
            }
            NodeBehavior::Truncated if !data.is_empty() => data.slice(..data.len() - 1),
            _ => data,
        }
    }
}

#[async_trait]
impl StorageNetwork for MemoryNetwork {
    async fn discover_nodes(&self, root: &RootDigest) -> Result<Vec<StorageLocation>> {
        if !self.contains(root) {
            return Ok(Vec::new());
        }
        let mut locations: Vec<StorageLocation> = self
            .nodes
            .read()
            .iter()
            .map(|n| n.location.clone())
            .collect();
        locations.sort_by_key(|l| l.rank);
        Ok(locations)
    }

    async fn file_info(
        &self,
        node: &StorageLocation,
        root: &RootDigest,
    ) -> Result<Option<FileInfo>> {
        let behavior = self.behavior_of(node);
        self.simulate_latency(node, &behavior, None).await?;

        let info = self.files.read().get(root).map(|f| f.info);
        Ok(match behavior {
            NodeBehavior::Missing => None,
            NodeBehavior::Unfinalized => info.map(|i| FileInfo {
                finalized: false,
                ..i
            }),
            NodeBehavior::MisreportsInfo(claimed) => info.map(|_| claimed),
            _ => info,
        })
    }

    async fn fetch_segment(
        &self,
        node: &StorageLocation,
        root: &RootDigest,
        segment_index: u64,
    ) -> Result<SegmentResponse> {
        self.record_fetch(node, segment_index, FetchPath::Rich);
        let behavior = self.behavior_of(node);
        self.simulate_latency(node, &behavior, Some(segment_index))
            .await?;

        match behavior {
            NodeBehavior::Missing => return Ok(SegmentResponse::NotFound),
            NodeBehavior::Unfinalized => return Ok(SegmentResponse::NotFinalized),
            _ => {}
        }

        let files = self.files.read();
        let Some(file) = files.get(root) else {
            return Ok(SegmentResponse::NotFound);
        };
        let layout = compute_layout(file.info.size, &self.params);
        let (Some(range), Some(proof)) = (layout.byte_range(segment_index), file.tree.proof(segment_index))
        else {
            return Ok(SegmentResponse::NotFound);
        };

        let data = file.data.slice(range.start as usize..range.end as usize);
        let mut payload = SegmentPayload::new(Self::damage(&behavior, data));
        if behavior != NodeBehavior::NoProof {
            payload = payload.with_proof(proof);
        }
        Ok(SegmentResponse::Segment(payload))
    }

    async fn download_segment_range(
        &self,
        node: &StorageLocation,
        root: &RootDigest,
        start_entry: u64,
        end_entry: u64,
    ) -> Result<SegmentResponse> {
        let segment = start_entry / self.params.max_chunks_per_segment();
        self.record_fetch(node, segment, FetchPath::Direct);
        let behavior = self.behavior_of(node);
        self.simulate_latency(node, &behavior, Some(segment)).await?;

        match behavior {
            NodeBehavior::Missing => return Ok(SegmentResponse::NotFound),
            NodeBehavior::Unfinalized => return Ok(SegmentResponse::NotFinalized),
            _ => {}
        }

        let files = self.files.read();
        let Some(file) = files.get(root) else {
            return Ok(SegmentResponse::NotFound);
        };

        let chunk_count = split_num(file.info.size, self.params.chunk_size());
        if start_entry >= end_entry || end_entry > chunk_count {
            return Ok(SegmentResponse::Malformed(format!(
                "entry range {}..{} outside file of {} entries",
                start_entry, end_entry, chunk_count
            )));
        }

        let chunk_size = self.params.chunk_size();
        let start = (start_entry * chunk_size) as usize;
        let end = ((end_entry * chunk_size).min(file.info.size)) as usize;
        let padded_len = ((end_entry - start_entry) * chunk_size) as usize;

        // Entries are stored whole, so the tail chunk comes back zero-padded
        let mut buf = BytesMut::with_capacity(padded_len);
        buf.extend_from_slice(&file.data[start..end]);
        buf.resize(padded_len, 0);

        Ok(SegmentResponse::Segment(SegmentPayload::new(Self::damage(
            &behavior,
            buf.freeze(),
        ))))
    }

    async fn submit_file(&self, data: Bytes) -> Result<Submission> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let (root, transaction_ref) = self.store(data);
        let echoed = (*self.echo_override.read()).unwrap_or(root);
        Ok(Submission {
            root: echoed,
            transaction_ref: Some(transaction_ref),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LayoutParams {
        LayoutParams::new(16, 4).unwrap()
    }

    fn data(size: usize) -> Bytes {
        (0..size).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[tokio::test]
    async fn test_submit_and_discover() {
        let network = MemoryNetwork::with_healthy_nodes(params(), 3);
        let submission = network.submit_file(data(200)).await.unwrap();

        let nodes = network.discover_nodes(&submission.root).await.unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].node_id, "node-0");
        assert_eq!(submission.transaction_ref.as_deref(), Some("tx-0"));
        assert_eq!(network.submission_count(), 1);

        let unknown = RootDigest::from_bytes([9u8; 32]);
        assert!(network.discover_nodes(&unknown).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_files_start_on_segment_boundary() {
        let network = MemoryNetwork::with_healthy_nodes(params(), 1);
        let a = network.insert_file(data(100)); // 7 chunks, 2 segments
        let b = network.insert_file(data(10));
        let node = network.discover_nodes(&b).await.unwrap().remove(0);

        let info_a = network.file_info(&node, &a).await.unwrap().unwrap();
        let info_b = network.file_info(&node, &b).await.unwrap().unwrap();
        assert_eq!(info_a.start_entry_index, 0);
        assert_eq!(info_b.start_entry_index, 8);
        assert_eq!(info_b.tx_seq, 1);
    }

    #[tokio::test]
    async fn test_direct_range_is_padded() {
        let network = MemoryNetwork::with_healthy_nodes(params(), 1);
        let root = network.insert_file(data(70));
        let node = network.discover_nodes(&root).await.unwrap().remove(0);

        // Segment 1 holds entries 4..5 (bytes 64..70)
        let response = network
            .download_segment_range(&node, &root, 4, 5)
            .await
            .unwrap();
        let SegmentResponse::Segment(payload) = response else {
            panic!("expected segment");
        };
        assert_eq!(payload.data.len(), 16);
        assert_eq!(&payload.data[..6], &data(70)[64..]);
        assert!(payload.data[6..].iter().all(|b| *b == 0));
        assert!(payload.proof.is_none());
    }

    #[tokio::test]
    async fn test_behaviors() {
        let network = MemoryNetwork::with_healthy_nodes(params(), 1);
        let root = network.insert_file(data(50));
        let node = network.discover_nodes(&root).await.unwrap().remove(0);

        network.set_behavior("node-0", NodeBehavior::Missing);
        assert_eq!(
            network.fetch_segment(&node, &root, 0).await.unwrap(),
            SegmentResponse::NotFound
        );

        network.set_behavior("node-0", NodeBehavior::Offline);
        assert!(network.fetch_segment(&node, &root, 0).await.is_err());

        network.set_behavior("node-0", NodeBehavior::Unfinalized);
        let info = network.file_info(&node, &root).await.unwrap().unwrap();
        assert!(!info.finalized);

        assert_eq!(network.fetch_count("node-0"), 2);
        assert!(!network.set_behavior("node-9", NodeBehavior::Healthy));
    }

    #[tokio::test]
    async fn test_submission_echo_override() {
        let network = MemoryNetwork::with_healthy_nodes(params(), 1);
        let fake = RootDigest::from_bytes([1u8; 32]);
        network.override_submission_root(Some(fake));

        let submission = network.submit_file(data(10)).await.unwrap();
        assert_eq!(submission.root, fake);
    }
}
