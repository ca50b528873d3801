//! Storage network capability
//!
//! Everything the transfer pipeline needs from a content-addressed storage
//! network, expressed as one async trait. Node responses are tagged
//! variants so every call site handles "not found" and "not finalized"
//! explicitly instead of guessing at optional fields.

use async_trait::async_trait;
use bytes::Bytes;
use cyxshare_core::{Result, RootDigest, SegmentProof};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which slice of the segment space a node stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardConfig {
    pub num_shard: u64,
    pub shard_id: u64,
}

impl ShardConfig {
    pub fn new(num_shard: u64, shard_id: u64) -> Self {
        Self {
            num_shard,
            shard_id,
        }
    }

    /// Whether this shard stores the given flow segment.
    ///
    /// A malformed config (`num_shard == 0` or `shard_id >= num_shard`)
    /// covers nothing.
    pub fn covers(&self, flow_segment: u64) -> bool {
        self.num_shard > 0
            && self.shard_id < self.num_shard
            && flow_segment % self.num_shard == self.shard_id
    }
}

/// A storage node that may hold a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    /// Stable node identifier
    pub node_id: String,
    /// Address the client talks to
    pub endpoint: String,
    /// Lower rank is tried first
    pub rank: u32,
    /// Shard served by the node; `None` means it stores every segment
    #[serde(default)]
    pub shard: Option<ShardConfig>,
}

impl StorageLocation {
    pub fn new(node_id: impl Into<String>, endpoint: impl Into<String>, rank: u32) -> Self {
        Self {
            node_id: node_id.into(),
            endpoint: endpoint.into(),
            rank,
            shard: None,
        }
    }

    pub fn with_shard(mut self, shard: ShardConfig) -> Self {
        self.shard = Some(shard);
        self
    }

    pub fn covers(&self, flow_segment: u64) -> bool {
        self.shard.map_or(true, |shard| shard.covers(flow_segment))
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.endpoint)
    }
}

/// Transaction metadata a node reports for a stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub tx_seq: u64,
    /// Position of the file's first chunk in the network's entry flow
    pub start_entry_index: u64,
    /// Stored byte size
    pub size: u64,
    pub finalized: bool,
}

/// Segment bytes as returned by a node, with an optional inclusion proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPayload {
    pub data: Bytes,
    pub proof: Option<SegmentProof>,
}

impl SegmentPayload {
    pub fn new(data: Bytes) -> Self {
        Self { data, proof: None }
    }

    pub fn with_proof(mut self, proof: SegmentProof) -> Self {
        self.proof = Some(proof);
        self
    }
}

/// Answer of one node to one segment request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentResponse {
    Segment(SegmentPayload),
    NotFound,
    NotFinalized,
    Malformed(String),
}

/// Result of submitting a file to the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Root the network computed for the stored bytes
    pub root: RootDigest,
    pub transaction_ref: Option<String>,
}

/// Capability contract of a content-addressed storage network.
///
/// An `Err` from any method means the node (or indexer) could not be
/// reached; the retrieval executor treats it as a fetch failure and fails
/// over. Implementations must not hold locks across the network call.
#[async_trait]
pub trait StorageNetwork: Send + Sync {
    /// Nodes that may hold the file with this root, best first
    async fn discover_nodes(&self, root: &RootDigest) -> Result<Vec<StorageLocation>>;

    /// Transaction metadata for `root` as seen by `node`; `None` if unknown
    async fn file_info(&self, node: &StorageLocation, root: &RootDigest)
        -> Result<Option<FileInfo>>;

    /// Rich path: one file-local segment, unpadded, with its proof when the
    /// node can produce one
    async fn fetch_segment(
        &self,
        node: &StorageLocation,
        root: &RootDigest,
        segment_index: u64,
    ) -> Result<SegmentResponse>;

    /// Direct path: raw entries `[start_entry, end_entry)` of the file.
    ///
    /// The last chunk of a file may come back zero-padded to the chunk size;
    /// callers trim to the byte range they expect.
    async fn download_segment_range(
        &self,
        node: &StorageLocation,
        root: &RootDigest,
        start_entry: u64,
        end_entry: u64,
    ) -> Result<SegmentResponse>;

    /// Store a file and return the root the network computed for it
    async fn submit_file(&self, data: Bytes) -> Result<Submission>;
}
