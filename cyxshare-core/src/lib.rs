//! CyxShare Core Library
//!
//! Pure building blocks for the CyxShare segmented transfer pipeline.
//! This crate provides:
//! - Segment layout math shared by upload planning and download reassembly
//! - The root digest (BLAKE3 Merkle root over segments) and segment proofs
//! - The encryption capability and its AES-256-GCM implementation
//! - Share-code generation and validation
//! - The pointer record schema
//! - Common error handling
//!
//! Nothing in here performs I/O.

pub mod crypto;
pub mod digest;
pub mod error;
pub mod record;
pub mod segment;
pub mod share_code;

pub use crypto::{Aes256GcmCipher, Cipher, EncryptionKey, Iv};
pub use digest::{compute_root_digest, compute_root_digest_with, MerkleTree, RootDigest, SegmentProof};
pub use error::{CyxShareError, FetchFailure, Result, Stage};
pub use record::{FileHandle, PointerRecord, PublishedPointer, RECORD_VERSION};
pub use segment::{
    compute_layout, entry_range_for_segment, segment_bounds, segment_index_for_entry,
    ChunkLayout, LayoutParams, SegmentSpan,
};
pub use share_code::{ShareCode, ShareCodeFormat};

/// Chunk size constants
///
/// A chunk is the smallest addressable unit on the storage network; a
/// segment groups up to `DEFAULT_MAX_CHUNKS_PER_SEGMENT` of them and is the
/// unit of fail-over and parallel fetch.
pub const DEFAULT_CHUNK_SIZE: u64 = 256; // 256 B
pub const DEFAULT_MAX_CHUNKS_PER_SEGMENT: u64 = 1024;
pub const DEFAULT_SEGMENT_SIZE: u64 = DEFAULT_CHUNK_SIZE * DEFAULT_MAX_CHUNKS_PER_SEGMENT; // 256 KB

/// Read layout parameters from environment, falling back to compile-time defaults.
/// Returns (chunk_size, max_chunks_per_segment).
///
/// Override at runtime via CYXSHARE_CHUNK_SIZE / CYXSHARE_MAX_CHUNKS_PER_SEGMENT.
pub fn layout_config_from_env() -> (u64, u64) {
    let chunk_size = std::env::var("CYXSHARE_CHUNK_SIZE")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_CHUNK_SIZE);
    let max_chunks = std::env::var("CYXSHARE_MAX_CHUNKS_PER_SEGMENT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_CHUNKS_PER_SEGMENT);
    (chunk_size, max_chunks)
}
