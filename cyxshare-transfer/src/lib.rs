//! CyxShare Transfer
//!
//! Moves files between a client and a content-addressed storage network:
//! - `network`: the storage network capability and its response types
//! - `memory`: an in-memory network with scriptable node failures
//! - `planner`: turns a root digest into per-segment fetch tasks
//! - `executor`: multi-node retrieval with fail-over and verification
//! - `upload`: single-submission uploads with a root echo check
//! - `envelope`: encrypt-before-upload, decrypt-after-verify sequencing

pub mod config;
pub mod envelope;
pub mod executor;
pub mod memory;
pub mod network;
pub mod planner;
pub mod upload;

pub use config::{FetchPath, RetrievalPath, TransferConfig, DEFAULT_MAX_FILE_SIZE};
pub use envelope::{CryptoEnvelope, KeyCustody, Sealed, SealingKey};
pub use executor::{
    AttemptRecord, DownloadReport, Retrieval, RetrievalExecutor, TaskOutcome, TaskState,
    VerifiedPayload,
};
pub use memory::{MemoryNetwork, NodeBehavior};
pub use network::{
    FileInfo, SegmentPayload, SegmentResponse, ShardConfig, StorageLocation, StorageNetwork,
    Submission,
};
pub use planner::{SegmentTask, TransferPlan, TransferPlanner};
pub use upload::{UploadReceipt, Uploader};

pub use tokio_util::sync::CancellationToken;
