//! Integrity anchor
//!
//! The root digest of a file is a BLAKE3 Merkle root over its segments.
//! Each segment (unpadded bytes, as delimited by [`ChunkLayout`]) becomes a
//! leaf; leaves and inner nodes are domain-separated so a leaf can never be
//! confused with an inner node. An odd node at the end of a level is
//! promoted unchanged to the next level.
//!
//! The root depends only on the file bytes and the layout parameters. It is
//! computed before any network call and is the only key the retrieval path
//! needs.

use crate::error::{CyxShareError, Result};
use crate::segment::{ChunkLayout, LayoutParams};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Digest size in bytes
pub const DIGEST_SIZE: usize = 32;

const LEAF_DOMAIN: u8 = 0x00;
const NODE_DOMAIN: u8 = 0x01;

/// Content root of a whole file
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootDigest([u8; DIGEST_SIZE]);

impl RootDigest {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest bytes
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Lowercase `0x`-prefixed hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse from hex, with or without the `0x` prefix
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(digits).map_err(|e| CyxShareError::InvalidDigest(e.to_string()))?;

        if bytes.len() != DIGEST_SIZE {
            return Err(CyxShareError::InvalidDigest(format!(
                "Invalid length: expected {}, got {}",
                DIGEST_SIZE,
                bytes.len()
            )));
        }

        let mut arr = [0u8; DIGEST_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Root of a file with no segments
    pub fn empty() -> Self {
        Self(*blake3::hash(&[]).as_bytes())
    }

    /// Verify that `data` hashes to this root under `params`
    pub fn verify(&self, data: &[u8], params: &LayoutParams) -> bool {
        compute_root_digest_with(data, params) == *self
    }
}

impl fmt::Debug for RootDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootDigest({})", &self.to_hex()[..18])
    }
}

impl fmt::Display for RootDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for RootDigest {
    type Err = CyxShareError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for RootDigest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RootDigest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Leaf hash of one segment
pub fn leaf_hash(segment: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_DOMAIN]);
    hasher.update(segment);
    *hasher.finalize().as_bytes()
}

fn node_hash(left: &[u8; DIGEST_SIZE], right: &[u8; DIGEST_SIZE]) -> [u8; DIGEST_SIZE] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_DOMAIN]);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// Segment leaves of `data` under `params`, hashed in parallel
pub fn segment_leaves(data: &[u8], params: &LayoutParams) -> Vec<[u8; DIGEST_SIZE]> {
    let layout = ChunkLayout::compute(data.len() as u64, params);
    layout
        .spans()
        .par_iter()
        .map(|span| {
            let range = span.byte_range(layout.byte_length(), params);
            leaf_hash(&data[range.start as usize..range.end as usize])
        })
        .collect()
}

/// Compute the root digest of `data` with default layout parameters
pub fn compute_root_digest(data: &[u8]) -> RootDigest {
    compute_root_digest_with(data, &LayoutParams::default())
}

/// Compute the root digest of `data` with explicit layout parameters
pub fn compute_root_digest_with(data: &[u8], params: &LayoutParams) -> RootDigest {
    MerkleTree::from_leaves(segment_leaves(data, params)).root()
}

/// Binary Merkle tree over segment leaves
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// levels[0] are the leaves, the last level holds the root
    levels: Vec<Vec<[u8; DIGEST_SIZE]>>,
}

impl MerkleTree {
    /// Build a tree from leaf hashes
    pub fn from_leaves(leaves: Vec<[u8; DIGEST_SIZE]>) -> Self {
        let mut levels = vec![leaves];
        while levels.last().is_some_and(|level| level.len() > 1) {
            let current = &levels[levels.len() - 1];
            let next: Vec<[u8; DIGEST_SIZE]> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => node_hash(left, right),
                    _ => pair[0],
                })
                .collect();
            levels.push(next);
        }
        Self { levels }
    }

    /// Build a tree directly from file data
    pub fn from_data(data: &[u8], params: &LayoutParams) -> Self {
        Self::from_leaves(segment_leaves(data, params))
    }

    /// Number of leaves (segments)
    pub fn leaf_count(&self) -> u64 {
        self.levels[0].len() as u64
    }

    pub fn root(&self) -> RootDigest {
        match self.levels.last().and_then(|level| level.first()) {
            Some(root) => RootDigest(*root),
            None => RootDigest::empty(),
        }
    }

    /// Inclusion proof for one segment
    pub fn proof(&self, segment_index: u64) -> Option<SegmentProof> {
        let leaf_count = self.leaf_count();
        if segment_index >= leaf_count {
            return None;
        }

        let mut siblings = Vec::new();
        let mut position = segment_index as usize;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = position ^ 1;
            if sibling < level.len() {
                siblings.push(level[sibling]);
            }
            position /= 2;
        }

        Some(SegmentProof {
            segment_index,
            segment_count: leaf_count,
            siblings,
        })
    }
}

/// Merkle inclusion proof of one segment against a root digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentProof {
    pub segment_index: u64,
    pub segment_count: u64,
    pub siblings: Vec<[u8; DIGEST_SIZE]>,
}

impl SegmentProof {
    /// Check that `segment` is leaf `segment_index` of the tree rooted at `root`
    pub fn verify(&self, root: &RootDigest, segment: &[u8]) -> bool {
        if self.segment_index >= self.segment_count {
            return false;
        }

        let mut current = leaf_hash(segment);
        let mut position = self.segment_index;
        let mut width = self.segment_count;
        let mut siblings = self.siblings.iter();

        while width > 1 {
            let is_right = position % 2 == 1;
            let has_sibling = is_right || position + 1 < width;
            if has_sibling {
                let Some(sibling) = siblings.next() else {
                    return false;
                };
                current = if is_right {
                    node_hash(sibling, &current)
                } else {
                    node_hash(&current, sibling)
                };
            }
            position /= 2;
            width = width.div_ceil(2);
        }

        siblings.next().is_none() && current == root.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> LayoutParams {
        LayoutParams::new(16, 4).unwrap()
    }

    fn pattern(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_root_is_stable() {
        let data = pattern(10_000);
        let a = compute_root_digest_with(&data, &small_params());
        let b = compute_root_digest_with(&data, &small_params());
        assert_eq!(a, b);
    }

    #[test]
    fn test_one_byte_change_changes_root() {
        let data = pattern(10_000);
        let mut altered = data.clone();
        altered[5_000] ^= 0x01;

        assert_ne!(
            compute_root_digest_with(&data, &small_params()),
            compute_root_digest_with(&altered, &small_params())
        );
    }

    #[test]
    fn test_empty_file_root() {
        assert_eq!(compute_root_digest(&[]), RootDigest::empty());
        assert_ne!(compute_root_digest(&[0u8]), RootDigest::empty());
    }

    #[test]
    fn test_single_segment_root_is_leaf() {
        let data = pattern(40);
        let root = compute_root_digest_with(&data, &small_params());
        assert_eq!(root.as_bytes(), &leaf_hash(&data));
    }

    #[test]
    fn test_hex_roundtrip() {
        let root = compute_root_digest(b"hello world");
        let hex = root.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(RootDigest::from_hex(&hex).unwrap(), root);
        assert_eq!(RootDigest::from_hex(&hex[2..]).unwrap(), root);
        assert!(RootDigest::from_hex("0x1234").is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let root = compute_root_digest(b"abc");
        let json = serde_json::to_string(&root).unwrap();
        assert_eq!(json, format!("\"{}\"", root.to_hex()));
        let back: RootDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, root);
    }

    #[test]
    fn test_proofs_verify_for_every_segment() {
        let params = small_params();
        // 7 segments: exercises odd-level promotion
        let data = pattern(16 * 4 * 6 + 5);
        let layout = ChunkLayout::compute(data.len() as u64, &params);
        let tree = MerkleTree::from_data(&data, &params);
        let root = tree.root();
        assert_eq!(tree.leaf_count(), 7);

        for span in layout.spans() {
            let range = span.byte_range(data.len() as u64, &params);
            let segment = &data[range.start as usize..range.end as usize];
            let proof = tree.proof(span.index).unwrap();
            assert!(proof.verify(&root, segment), "segment {}", span.index);
        }
        assert!(tree.proof(7).is_none());
    }

    #[test]
    fn test_proof_rejects_tampered_segment() {
        let params = small_params();
        let data = pattern(16 * 4 * 3);
        let tree = MerkleTree::from_data(&data, &params);
        let proof = tree.proof(1).unwrap();

        let mut segment = data[64..128].to_vec();
        assert!(proof.verify(&tree.root(), &segment));
        segment[0] ^= 0xFF;
        assert!(!proof.verify(&tree.root(), &segment));
    }

    #[test]
    fn test_proof_rejects_wrong_position() {
        let params = small_params();
        let data = pattern(16 * 4 * 4);
        let tree = MerkleTree::from_data(&data, &params);

        let mut proof = tree.proof(0).unwrap();
        proof.segment_index = 1;
        assert!(!proof.verify(&tree.root(), &data[..64]));
    }
}
