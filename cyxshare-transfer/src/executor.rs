//! Multi-Node Retrieval Executor
//!
//! Executes download plans with:
//! - Bounded concurrent segment fetches
//! - Per-task fail-over along the ranked candidate list
//! - A rich (segment + proof) phase followed by a direct range phase
//! - Per-attempt timeouts and caller cancellation
//! - In-order reassembly and a root check before anything is returned
//!
//! Each task moves through
//! `Pending -> Fetching(rank) -> Succeeded | FailingOver(rank + 1) | Exhausted`.
//! A download succeeds only if every task succeeds; a task that exhausts
//! the last phase aborts the download and drops its in-flight siblings.

use crate::config::{FetchPath, TransferConfig};
use crate::network::{SegmentResponse, StorageLocation, StorageNetwork};
use crate::planner::{SegmentTask, TransferPlan, TransferPlanner};
use bytes::{Bytes, BytesMut};
use cyxshare_core::{
    compute_root_digest_with, CyxShareError, FetchFailure, Result, RootDigest, Stage,
};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Per-task fetch state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Fetching { rank: usize },
    FailingOver { next_rank: usize },
    Succeeded,
    Exhausted,
}

impl TaskState {
    /// Rank of the node to try next, if the task is not finished
    fn next_rank(&self) -> Option<usize> {
        match self {
            TaskState::Pending => Some(0),
            TaskState::FailingOver { next_rank } => Some(*next_rank),
            _ => None,
        }
    }

    fn on_failure(self, candidates: usize) -> Self {
        match self {
            TaskState::Fetching { rank } if rank + 1 < candidates => TaskState::FailingOver {
                next_rank: rank + 1,
            },
            _ => TaskState::Exhausted,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Exhausted)
    }
}

/// One node attempt for one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub node_id: String,
    pub rank: usize,
    pub path: FetchPath,
    /// `None` on success
    pub failure: Option<FetchFailure>,
    pub elapsed: Duration,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Final state and attempt history of one task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub segment_index: u64,
    pub state: TaskState,
    pub attempts: Vec<AttemptRecord>,
}

impl TaskOutcome {
    fn new(segment_index: u64) -> Self {
        Self {
            segment_index,
            state: TaskState::Pending,
            attempts: Vec::new(),
        }
    }
}

/// What happened during a successful download
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub root: RootDigest,
    /// Outcomes in ascending segment order
    pub tasks: Vec<TaskOutcome>,
    /// Segment indices in the order their fetches completed
    pub completion_order: Vec<u64>,
    pub bytes: u64,
    pub duration: Duration,
}

impl DownloadReport {
    /// Attempts made for one segment across all phases
    pub fn attempts_for(&self, segment_index: u64) -> usize {
        self.tasks
            .iter()
            .find(|t| t.segment_index == segment_index)
            .map_or(0, |t| t.attempts.len())
    }

    pub fn total_attempts(&self) -> usize {
        self.tasks.iter().map(|t| t.attempts.len()).sum()
    }

    /// Segments that needed more than one attempt
    pub fn failed_over_segments(&self) -> Vec<u64> {
        self.tasks
            .iter()
            .filter(|t| t.attempts.len() > 1)
            .map(|t| t.segment_index)
            .collect()
    }

    /// Summary string
    pub fn summary(&self) -> String {
        format!(
            "{} segments, {} bytes, {} attempts ({} failed over) in {:?}",
            self.tasks.len(),
            self.bytes,
            self.total_attempts(),
            self.failed_over_segments().len(),
            self.duration
        )
    }
}

/// Reassembled bytes whose root digest has been checked.
///
/// Only the executor can build one, so anything that consumes a
/// `VerifiedPayload` runs strictly after verification.
#[derive(Debug, Clone)]
pub struct VerifiedPayload {
    root: RootDigest,
    data: Bytes,
}

impl VerifiedPayload {
    pub fn root(&self) -> &RootDigest {
        &self.root
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// A verified download together with its report
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub payload: VerifiedPayload,
    pub report: DownloadReport,
}

/// Result of running one task through one phase
struct TaskRun {
    state: TaskState,
    attempts: Vec<AttemptRecord>,
    data: Option<Bytes>,
}

/// Multi-node retrieval executor
pub struct RetrievalExecutor {
    network: Arc<dyn StorageNetwork>,
    planner: TransferPlanner,
    config: TransferConfig,
}

impl RetrievalExecutor {
    /// Create a new executor
    pub fn new(network: Arc<dyn StorageNetwork>, config: TransferConfig) -> Self {
        Self {
            network,
            planner: TransferPlanner::from_config(&config),
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn planner(&self) -> &TransferPlanner {
        &self.planner
    }

    /// Download and verify the file addressed by `root`
    pub async fn download(&self, root: &RootDigest) -> Result<VerifiedPayload> {
        self.retrieve(root, &CancellationToken::new())
            .await
            .map(|retrieval| retrieval.payload)
    }

    /// Plan and execute a download, honoring `cancel` at every network boundary
    #[instrument(skip(self, root, cancel), fields(root = %root))]
    pub async fn retrieve(
        &self,
        root: &RootDigest,
        cancel: &CancellationToken,
    ) -> Result<Retrieval> {
        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CyxShareError::Cancelled { stage: Stage::Plan });
            }
            plan = self.planner.prepare(self.network.as_ref(), root) => plan?,
        };

        self.execute(&plan, cancel).await
    }

    /// Execute a plan
    pub async fn execute(
        &self,
        plan: &TransferPlan,
        cancel: &CancellationToken,
    ) -> Result<Retrieval> {
        let start = Instant::now();
        let total = plan.tasks.len();

        let mut outcomes: BTreeMap<u64, TaskOutcome> = plan
            .tasks
            .iter()
            .map(|task| (task.segment_index, TaskOutcome::new(task.segment_index)))
            .collect();
        // Segments wait here until every task is done
        let mut buffers: BTreeMap<u64, Bytes> = BTreeMap::new();
        let mut completion_order = Vec::with_capacity(total);

        let phases = self.config.retrieval_path.phases();
        let mut pending: Vec<&SegmentTask> = plan.tasks.iter().collect();

        for (phase, &path) in phases.iter().enumerate() {
            if pending.is_empty() {
                break;
            }
            let last_phase = phase + 1 == phases.len();

            debug!(
                root = %plan.root,
                path = %path,
                tasks = pending.len(),
                "Starting fetch phase"
            );

            let mut exhausted: Vec<&SegmentTask> = Vec::new();
            {
                let fetches = stream::iter(pending.iter().copied())
                    .map(|task| self.run_task(plan, task, path))
                    .buffer_unordered(self.config.concurrency.max(1));
                let mut fetches = std::pin::pin!(fetches);

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            warn!(root = %plan.root, "Download cancelled");
                            return Err(CyxShareError::Cancelled { stage: Stage::Fetch });
                        }
                        next = fetches.next() => next,
                    };
                    let Some((task, run)) = next else {
                        break;
                    };

                    let outcome = outcomes
                        .entry(task.segment_index)
                        .or_insert_with(|| TaskOutcome::new(task.segment_index));
                    outcome.attempts.extend(run.attempts);
                    outcome.state = run.state;

                    match run.data {
                        Some(data) => {
                            completion_order.push(task.segment_index);
                            buffers.insert(task.segment_index, data);
                        }
                        None if last_phase => {
                            // Returning drops the stream and with it every in-flight sibling
                            error!(
                                root = %plan.root,
                                segment = task.segment_index,
                                attempts = outcome.attempts.len(),
                                "Segment exhausted every candidate node"
                            );
                            return Err(CyxShareError::Exhausted {
                                root: plan.root,
                                failed_segments: vec![task.segment_index],
                                total,
                            });
                        }
                        None => {
                            warn!(
                                root = %plan.root,
                                segment = task.segment_index,
                                path = %path,
                                "Segment exhausted on this path, deferring to next"
                            );
                            exhausted.push(task);
                        }
                    }
                }
            }

            pending = exhausted;
        }

        if buffers.len() != total {
            let failed_segments: Vec<u64> = plan
                .tasks
                .iter()
                .map(|task| task.segment_index)
                .filter(|index| !buffers.contains_key(index))
                .collect();
            return Err(CyxShareError::Exhausted {
                root: plan.root,
                failed_segments,
                total,
            });
        }

        let mut assembled = BytesMut::with_capacity(plan.byte_length() as usize);
        for segment in buffers.values() {
            assembled.extend_from_slice(segment);
        }
        let data = assembled.freeze();

        let actual = compute_root_digest_with(&data, &self.config.layout);
        if actual != plan.root {
            error!(
                expected = %plan.root,
                actual = %actual,
                "Reassembled file does not match its root digest"
            );
            return Err(CyxShareError::Integrity {
                expected: plan.root,
                actual,
            });
        }

        let report = DownloadReport {
            root: plan.root,
            tasks: outcomes.into_values().collect(),
            completion_order,
            bytes: data.len() as u64,
            duration: start.elapsed(),
        };
        info!(root = %plan.root, summary = %report.summary(), "Download complete");

        Ok(Retrieval {
            payload: VerifiedPayload {
                root: plan.root,
                data,
            },
            report,
        })
    }

    /// Walk one task's candidates on one path until a node serves it
    async fn run_task<'t>(
        &self,
        plan: &TransferPlan,
        task: &'t SegmentTask,
        path: FetchPath,
    ) -> (&'t SegmentTask, TaskRun) {
        let mut state = TaskState::Pending;
        let mut attempts = Vec::new();
        let mut data = None;

        while let Some(rank) = state.next_rank() {
            let Some(node) = task.candidates.get(rank) else {
                state = TaskState::Exhausted;
                break;
            };
            state = TaskState::Fetching { rank };

            debug!(
                segment = task.segment_index,
                node = %node,
                rank = rank,
                path = %path,
                "Fetching segment"
            );

            let started = Instant::now();
            let result = match timeout(
                self.config.fetch_timeout,
                self.fetch_once(plan, task, node, path),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchFailure::Timeout),
            };
            let elapsed = started.elapsed();

            match result {
                Ok(segment) => {
                    attempts.push(AttemptRecord {
                        node_id: node.node_id.clone(),
                        rank,
                        path,
                        failure: None,
                        elapsed,
                    });
                    state = TaskState::Succeeded;
                    data = Some(segment);
                }
                Err(failure) => {
                    warn!(
                        segment = task.segment_index,
                        node = %node,
                        rank = rank,
                        path = %path,
                        failure = %failure,
                        "Segment fetch failed"
                    );
                    attempts.push(AttemptRecord {
                        node_id: node.node_id.clone(),
                        rank,
                        path,
                        failure: Some(failure),
                        elapsed,
                    });
                    state = state.on_failure(task.candidates.len());
                }
            }
        }

        (
            task,
            TaskRun {
                state,
                attempts,
                data,
            },
        )
    }

    /// One attempt against one node, returning the unpadded segment bytes
    async fn fetch_once(
        &self,
        plan: &TransferPlan,
        task: &SegmentTask,
        node: &StorageLocation,
        path: FetchPath,
    ) -> std::result::Result<Bytes, FetchFailure> {
        let response = match path {
            FetchPath::Rich => {
                self.network
                    .fetch_segment(node, &plan.root, task.segment_index)
                    .await
            }
            FetchPath::Direct => {
                self.network
                    .download_segment_range(
                        node,
                        &plan.root,
                        task.entry_range.0,
                        task.entry_range.1,
                    )
                    .await
            }
        }
        .map_err(|e| FetchFailure::Unreachable(e.to_string()))?;

        let payload = match response {
            SegmentResponse::Segment(payload) => payload,
            SegmentResponse::NotFound => return Err(FetchFailure::NotFound),
            SegmentResponse::NotFinalized => return Err(FetchFailure::NotFinalized),
            SegmentResponse::Malformed(reason) => return Err(FetchFailure::Malformed(reason)),
        };

        let expected = task.byte_len() as usize;
        match path {
            FetchPath::Rich => {
                if payload.data.len() != expected {
                    return Err(FetchFailure::Malformed(format!(
                        "expected {} bytes, got {}",
                        expected,
                        payload.data.len()
                    )));
                }
                if self.config.verify_proofs {
                    let accepted = payload.proof.as_ref().is_some_and(|proof| {
                        proof.segment_index == task.segment_index
                            && proof.segment_count == plan.layout.segment_count()
                            && proof.verify(&plan.root, &payload.data)
                    });
                    if !accepted {
                        return Err(FetchFailure::ProofRejected);
                    }
                }
                Ok(payload.data)
            }
            FetchPath::Direct => {
                let padded = (task.entry_range.1 - task.entry_range.0)
                    * self.config.layout.chunk_size();
                if payload.data.len() < expected || payload.data.len() as u64 > padded {
                    return Err(FetchFailure::Malformed(format!(
                        "expected {}..={} bytes, got {}",
                        expected,
                        padded,
                        payload.data.len()
                    )));
                }
                Ok(payload.data.slice(..expected))
            }
        }
    }
}
