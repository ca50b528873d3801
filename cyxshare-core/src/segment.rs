//! Segment layout math
//!
//! A file is cut into fixed-size chunks; consecutive chunks are grouped into
//! segments of at most `max_chunks_per_segment`. Upload planning, the root
//! digest and download reassembly all go through the functions in this
//! module so they cannot disagree on boundaries.
//!
//! All arithmetic is exact integer math on `u64`.

use crate::error::{CyxShareError, Result};
use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNKS_PER_SEGMENT};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Chunk size and segment width used by a storage network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayoutParams {
    chunk_size: u64,
    max_chunks_per_segment: u64,
}

impl LayoutParams {
    /// Create layout parameters (both values must be non-zero)
    pub fn new(chunk_size: u64, max_chunks_per_segment: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CyxShareError::InvalidLayout(
                "chunk size must be non-zero".to_string(),
            ));
        }
        if max_chunks_per_segment == 0 {
            return Err(CyxShareError::InvalidLayout(
                "max chunks per segment must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            chunk_size,
            max_chunks_per_segment,
        })
    }

    /// Layout parameters from CYXSHARE_* env vars, falling back to defaults
    pub fn from_env() -> Self {
        let (chunk_size, max_chunks_per_segment) = crate::layout_config_from_env();
        Self {
            chunk_size,
            max_chunks_per_segment,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn max_chunks_per_segment(&self) -> u64 {
        self.max_chunks_per_segment
    }

    /// Bytes in a full segment
    pub fn segment_size(&self) -> u64 {
        self.chunk_size * self.max_chunks_per_segment
    }
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks_per_segment: DEFAULT_MAX_CHUNKS_PER_SEGMENT,
        }
    }
}

/// Chunks covered by one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpan {
    /// Segment index within the file
    pub index: u64,
    /// First chunk (entry) of the segment, file-relative
    pub start_chunk: u64,
    /// Number of chunks in the segment
    pub chunk_count: u64,
}

impl SegmentSpan {
    /// One past the last chunk of the segment
    pub fn end_chunk(&self) -> u64 {
        self.start_chunk + self.chunk_count
    }

    /// Byte range of the segment within a file of `byte_length` bytes.
    ///
    /// The last chunk of a file may be partial; the range is clipped to the
    /// file length so padding never shows up in reassembled output.
    pub fn byte_range(&self, byte_length: u64, params: &LayoutParams) -> Range<u64> {
        let start = (self.start_chunk * params.chunk_size()).min(byte_length);
        let end = (self.end_chunk() * params.chunk_size()).min(byte_length);
        start..end
    }
}

/// Derived, immutable chunk/segment layout of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLayout {
    byte_length: u64,
    params: LayoutParams,
    chunk_count: u64,
    spans: Vec<SegmentSpan>,
}

impl ChunkLayout {
    /// Compute the layout for a file of `byte_length` bytes.
    ///
    /// Total for every length: a zero-length file yields an empty layout.
    pub fn compute(byte_length: u64, params: &LayoutParams) -> Self {
        let chunk_count = split_num(byte_length, params.chunk_size());
        let segment_count = split_num(chunk_count, params.max_chunks_per_segment());

        let spans = (0..segment_count)
            .map(|index| {
                let start_chunk = index * params.max_chunks_per_segment();
                let chunk_count =
                    (chunk_count - start_chunk).min(params.max_chunks_per_segment());
                SegmentSpan {
                    index,
                    start_chunk,
                    chunk_count,
                }
            })
            .collect();

        Self {
            byte_length,
            params: *params,
            chunk_count,
            spans,
        }
    }

    pub fn byte_length(&self) -> u64 {
        self.byte_length
    }

    pub fn params(&self) -> &LayoutParams {
        &self.params
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    pub fn segment_count(&self) -> u64 {
        self.spans.len() as u64
    }

    pub fn spans(&self) -> &[SegmentSpan] {
        &self.spans
    }

    pub fn span(&self, segment_index: u64) -> Option<&SegmentSpan> {
        usize::try_from(segment_index)
            .ok()
            .and_then(|i| self.spans.get(i))
    }

    /// Whether the file has no chunks at all
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Byte range of a segment, clipped to the file length
    pub fn byte_range(&self, segment_index: u64) -> Option<Range<u64>> {
        self.span(segment_index)
            .map(|span| span.byte_range(self.byte_length, &self.params))
    }
}

/// Compute the layout of a file (see [`ChunkLayout::compute`])
pub fn compute_layout(byte_length: u64, params: &LayoutParams) -> ChunkLayout {
    ChunkLayout::compute(byte_length, params)
}

/// Number of `unit`-sized pieces needed to hold `total` (ceiling division)
pub fn split_num(total: u64, unit: u64) -> u64 {
    total.div_ceil(unit)
}

/// Segment that holds a given entry (chunk) index
pub fn segment_index_for_entry(entry_index: u64, max_chunks_per_segment: u64) -> u64 {
    entry_index / max_chunks_per_segment
}

/// Entry range `[start, end)` of a segment within a layout
pub fn entry_range_for_segment(segment_index: u64, layout: &ChunkLayout) -> Option<(u64, u64)> {
    layout
        .span(segment_index)
        .map(|span| (span.start_chunk, span.end_chunk()))
}

/// Inclusive flow-segment bounds of a transaction.
///
/// `start_entry_index` is the position of the file's first chunk in the
/// network's global entry flow and `size` its byte size. Returns `None` for
/// an empty transaction, which occupies no segment. Both values come from
/// storage nodes, so a transaction running past the end of the entry flow
/// is a [`CyxShareError::InvalidLayout`].
pub fn segment_bounds(
    start_entry_index: u64,
    size: u64,
    params: &LayoutParams,
) -> Result<Option<(u64, u64)>> {
    let entries = split_num(size, params.chunk_size());
    if entries == 0 {
        return Ok(None);
    }
    let last_entry = start_entry_index.checked_add(entries - 1).ok_or_else(|| {
        CyxShareError::InvalidLayout(format!(
            "transaction of {} entries at entry {} overflows the entry flow",
            entries, start_entry_index
        ))
    })?;

    let start = segment_index_for_entry(start_entry_index, params.max_chunks_per_segment());
    let end = segment_index_for_entry(last_entry, params.max_chunks_per_segment());
    Ok(Some((start, end)))
}
