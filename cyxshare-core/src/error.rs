//! Error types for CyxShare
//!
//! Provides a unified error type for all CyxShare operations. Node-level
//! failures are absorbed by the retrieval executor through fail-over; the
//! variants below are what reaches a caller.

use crate::digest::RootDigest;
use std::fmt;
use thiserror::Error;

/// Result type alias for CyxShare operations
pub type Result<T> = std::result::Result<T, CyxShareError>;

/// Pipeline stage an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validate,
    Encrypt,
    Submit,
    Pointer,
    Discover,
    Plan,
    Fetch,
    Verify,
    Decrypt,
    Config,
    Io,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Encrypt => "encrypt",
            Stage::Submit => "submit",
            Stage::Pointer => "pointer",
            Stage::Discover => "discover",
            Stage::Plan => "plan",
            Stage::Fetch => "fetch",
            Stage::Verify => "verify",
            Stage::Decrypt => "decrypt",
            Stage::Config => "config",
            Stage::Io => "io",
        };
        f.write_str(name)
    }
}

/// Why a single node failed to serve a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    NotFound,
    NotFinalized,
    Malformed(String),
    ProofRejected,
    Unreachable(String),
    Timeout,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::NotFound => f.write_str("not found"),
            FetchFailure::NotFinalized => f.write_str("file not finalized"),
            FetchFailure::Malformed(reason) => write!(f, "malformed segment: {}", reason),
            FetchFailure::ProofRejected => f.write_str("segment proof rejected"),
            FetchFailure::Unreachable(reason) => write!(f, "unreachable: {}", reason),
            FetchFailure::Timeout => f.write_str("timed out"),
        }
    }
}

/// Unified error type for CyxShare
#[derive(Error, Debug)]
pub enum CyxShareError {
    // ===== Share Code Errors =====
    #[error("Invalid share code format: {code}")]
    InvalidShareCode { code: String },

    #[error("Share code {code} could not be resolved: {reason}")]
    UnresolvedShareCode { code: String, reason: String },

    // ===== Location Errors =====
    #[error("No storage locations known for {root}")]
    NoLocation { root: RootDigest },

    // ===== Fetch Errors =====
    #[error("Segment {segment} of {root} from {node}: {failure}")]
    Fetch {
        root: RootDigest,
        node: String,
        segment: u64,
        failure: FetchFailure,
    },

    /// A task ran out of candidate nodes on the last retrieval path. The
    /// download stops at the first such task and drops in-flight siblings,
    /// so `failed_segments` lists what was known exhausted at that point.
    #[error("Download of {root} incomplete: segments {failed_segments:?} of {total} exhausted every node")]
    Exhausted {
        root: RootDigest,
        failed_segments: Vec<u64>,
        total: usize,
    },

    // ===== Integrity Errors =====
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity {
        expected: RootDigest,
        actual: RootDigest,
    },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    // ===== Cryptography Errors =====
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Storage network error: {0}")]
    Network(String),

    // ===== Submission Errors =====
    #[error("Submission failed: {0}")]
    Submission(String),

    // ===== Pointer Errors =====
    #[error("Invalid pointer record: {0}")]
    InvalidRecord(String),

    #[error("Pointer cache error: {0}")]
    Cache(String),

    #[error("Pointer index error: {0}")]
    Index(String),

    // ===== Layout Errors =====
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    // ===== Control Errors =====
    #[error("Operation cancelled during {stage}")]
    Cancelled { stage: Stage },

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CyxShareError {
    /// Stage of the pipeline this error belongs to
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidShareCode { .. } | Self::InvalidDigest(_) => Stage::Validate,
            Self::UnresolvedShareCode { .. }
            | Self::InvalidRecord(_)
            | Self::Cache(_)
            | Self::Index(_)
            | Self::Serialization(_) => Stage::Pointer,
            Self::NoLocation { .. } => Stage::Discover,
            Self::Fetch { .. } | Self::Exhausted { .. } | Self::Network(_) => Stage::Fetch,
            Self::Integrity { .. } => Stage::Verify,
            Self::Encryption(_) | Self::InvalidKeyLength { .. } => Stage::Encrypt,
            Self::Decryption(_) => Stage::Decrypt,
            Self::Submission(_) => Stage::Submit,
            Self::InvalidLayout(_) => Stage::Plan,
            Self::Cancelled { stage } => *stage,
            Self::Io(_) => Stage::Io,
            Self::Configuration(_) => Stage::Config,
        }
    }

    /// Whether a higher layer may retry the whole operation later.
    ///
    /// Integrity, format and encryption failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoLocation { .. }
                | Self::Fetch { .. }
                | Self::Exhausted { .. }
                | Self::Network(_)
        )
    }

    /// Whether this error reports corrupted content
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Root digest the error concerns, if any
    pub fn root(&self) -> Option<&RootDigest> {
        match self {
            Self::NoLocation { root }
            | Self::Fetch { root, .. }
            | Self::Exhausted { root, .. } => Some(root),
            Self::Integrity { expected, .. } => Some(expected),
            _ => None,
        }
    }

    /// Share code the error concerns, if any
    pub fn share_code(&self) -> Option<&str> {
        match self {
            Self::InvalidShareCode { code } | Self::UnresolvedShareCode { code, .. } => {
                Some(code.as_str())
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CyxShareError {
    fn from(err: serde_json::Error) -> Self {
        CyxShareError::Serialization(err.to_string())
    }
}
