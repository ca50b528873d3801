//! Transfer Planner
//!
//! Turns a root digest into a list of per-segment fetch tasks:
//! - Discovers candidate nodes through the storage network
//! - Looks up the transaction metadata (entry position, size, finalization)
//! - Derives the flow-segment bounds with exact integer math
//! - Ranks and shard-filters the candidates of every task
//!
//! A plan is immutable once built; the executor fails over along each
//! task's candidate list without re-planning.

use crate::config::TransferConfig;
use crate::network::{FileInfo, StorageLocation, StorageNetwork};
use cyxshare_core::{
    compute_layout, segment_bounds, ChunkLayout, CyxShareError, FetchFailure, LayoutParams,
    Result, RootDigest,
};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Fetch task for one segment
#[derive(Debug, Clone)]
pub struct SegmentTask {
    /// File-local segment index
    pub segment_index: u64,
    /// Segment index in the network's entry flow
    pub flow_segment: u64,
    /// File-local entries `[start, end)`
    pub entry_range: (u64, u64),
    /// Bytes this segment contributes to the file
    pub byte_range: Range<u64>,
    /// Nodes to try, best first
    pub candidates: Arc<[StorageLocation]>,
}

impl SegmentTask {
    /// Expected unpadded segment length
    pub fn byte_len(&self) -> u64 {
        self.byte_range.end - self.byte_range.start
    }
}

/// Download plan for one file
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub root: RootDigest,
    pub file_info: FileInfo,
    pub layout: ChunkLayout,
    /// One task per segment, ascending
    pub tasks: Vec<SegmentTask>,
}

impl TransferPlan {
    pub fn segment_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn byte_length(&self) -> u64 {
        self.layout.byte_length()
    }
}

/// Builds download plans
#[derive(Debug, Clone)]
pub struct TransferPlanner {
    params: LayoutParams,
    /// Timeout of a single discovery or file-info request
    attempt_timeout: Duration,
    max_file_size: u64,
}

impl Default for TransferPlanner {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

impl TransferPlanner {
    pub fn new(params: LayoutParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Planner with the layout, attempt timeout and size limit of `config`
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            params: config.layout,
            attempt_timeout: config.fetch_timeout,
            max_file_size: config.max_file_size,
        }
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn params(&self) -> &LayoutParams {
        &self.params
    }

    /// Discover nodes, look up the file and plan its download.
    ///
    /// Nodes are asked for file info in rank order. A node that times out,
    /// fails, or reports metadata that cannot be planned is skipped.
    #[instrument(skip(self, network, root), fields(root = %root))]
    pub async fn prepare(
        &self,
        network: &dyn StorageNetwork,
        root: &RootDigest,
    ) -> Result<TransferPlan> {
        let candidates = match timeout(self.attempt_timeout, network.discover_nodes(root)).await {
            Ok(candidates) => candidates?,
            Err(_) => {
                warn!(root = %root, timeout = ?self.attempt_timeout, "Node discovery timed out");
                return Err(CyxShareError::Network(format!(
                    "node discovery timed out after {:?}",
                    self.attempt_timeout
                )));
            }
        };
        if candidates.is_empty() {
            return Err(CyxShareError::NoLocation { root: *root });
        }
        let ranked = rank(&candidates);

        find_file_info(network, root, &ranked, self.attempt_timeout, |info| {
            self.plan_download(root, info, &ranked)
        })
        .await
    }

    /// Build one task per segment in the transaction's flow-segment bounds
    pub fn plan_download(
        &self,
        root: &RootDigest,
        file_info: &FileInfo,
        candidates: &[StorageLocation],
    ) -> Result<TransferPlan> {
        if candidates.is_empty() {
            return Err(CyxShareError::NoLocation { root: *root });
        }
        if file_info.size > self.max_file_size {
            return Err(CyxShareError::InvalidLayout(format!(
                "file of {} bytes exceeds the {} byte limit",
                file_info.size, self.max_file_size
            )));
        }
        let ranked = rank(candidates);
        let bounds = segment_bounds(file_info.start_entry_index, file_info.size, &self.params)?;
        let layout = compute_layout(file_info.size, &self.params);

        let Some((start, end)) = bounds else {
            debug!(root = %root, "Empty file, nothing to fetch");
            return Ok(TransferPlan {
                root: *root,
                file_info: *file_info,
                layout,
                tasks: Vec::new(),
            });
        };

        let flow_segments = end - start + 1;
        if flow_segments != layout.segment_count() {
            return Err(CyxShareError::InvalidLayout(format!(
                "transaction at entry {} spans {} flow segments but the file has {}",
                file_info.start_entry_index,
                flow_segments,
                layout.segment_count()
            )));
        }

        let mut tasks = Vec::with_capacity(layout.segment_count() as usize);
        for span in layout.spans() {
            let flow_segment = start + span.index;
            let covering: Vec<StorageLocation> = ranked
                .iter()
                .filter(|node| node.covers(flow_segment))
                .cloned()
                .collect();

            if covering.is_empty() {
                warn!(
                    root = %root,
                    segment = span.index,
                    flow_segment = flow_segment,
                    "No candidate node stores segment"
                );
                return Err(CyxShareError::NoLocation { root: *root });
            }

            tasks.push(SegmentTask {
                segment_index: span.index,
                flow_segment,
                entry_range: (span.start_chunk, span.end_chunk()),
                byte_range: span.byte_range(file_info.size, &self.params),
                candidates: covering.into(),
            });
        }

        info!(
            root = %root,
            segments = tasks.len(),
            candidates = ranked.len(),
            "Planned download"
        );

        Ok(TransferPlan {
            root: *root,
            file_info: *file_info,
            layout,
            tasks,
        })
    }
}

/// Stable sort by rank
fn rank(candidates: &[StorageLocation]) -> Vec<StorageLocation> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by_key(|node| node.rank);
    ranked
}

/// Ask candidates in rank order for the file's transaction metadata.
///
/// The first finalized answer wins. Unreachable nodes, nodes that do not
/// know the file and nodes that miss `attempt_timeout` are skipped.
pub async fn lookup_file_info(
    network: &dyn StorageNetwork,
    root: &RootDigest,
    candidates: &[StorageLocation],
    attempt_timeout: Duration,
) -> Result<FileInfo> {
    find_file_info(network, root, candidates, attempt_timeout, |info| Ok(*info)).await
}

/// Walk the candidates until `accept` takes a finalized answer.
///
/// An answer `accept` rejects with `InvalidLayout` counts against that node
/// only; any other rejection ends the walk.
async fn find_file_info<T>(
    network: &dyn StorageNetwork,
    root: &RootDigest,
    candidates: &[StorageLocation],
    attempt_timeout: Duration,
    mut accept: impl FnMut(&FileInfo) -> Result<T>,
) -> Result<T> {
    let mut not_finalized: Option<&StorageLocation> = None;
    let mut rejected: Option<CyxShareError> = None;
    let mut last_failure: Option<(&StorageLocation, FetchFailure)> = None;

    for node in candidates {
        let answer = match timeout(attempt_timeout, network.file_info(node, root)).await {
            Ok(answer) => answer,
            Err(_) => {
                warn!(node = %node, root = %root, "File info request timed out");
                last_failure = Some((node, FetchFailure::Timeout));
                continue;
            }
        };

        match answer {
            Ok(Some(info)) if info.finalized => match accept(&info) {
                Ok(value) => return Ok(value),
                Err(e @ CyxShareError::InvalidLayout(_)) => {
                    warn!(node = %node, error = %e, "Rejected file info from node");
                    rejected = Some(e);
                }
                Err(e) => return Err(e),
            },
            Ok(Some(_)) => {
                debug!(node = %node, root = %root, "File not finalized on node");
                not_finalized.get_or_insert(node);
            }
            Ok(None) => {
                debug!(node = %node, root = %root, "File unknown to node");
            }
            Err(e) => {
                warn!(node = %node, error = %e, "Failed to get file info from node");
                last_failure = Some((node, FetchFailure::Unreachable(e.to_string())));
            }
        }
    }

    if let Some(e) = rejected {
        return Err(e);
    }
    if let Some(node) = not_finalized {
        return Err(CyxShareError::Fetch {
            root: *root,
            node: node.node_id.clone(),
            segment: 0,
            failure: FetchFailure::NotFinalized,
        });
    }
    if let Some((node, failure)) = last_failure {
        return Err(CyxShareError::Fetch {
            root: *root,
            node: node.node_id.clone(),
            segment: 0,
            failure,
        });
    }
    Err(CyxShareError::NoLocation { root: *root })
}
