//! Transfer configuration

use cyxshare_core::{CyxShareError, LayoutParams};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which retrieval path(s) the executor uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalPath {
    /// Segment+proof download first, direct range download for what is left
    #[default]
    RichThenDirect,
    RichOnly,
    DirectOnly,
}

impl RetrievalPath {
    /// Fetch paths in the order they are attempted
    pub fn phases(&self) -> &'static [FetchPath] {
        match self {
            RetrievalPath::RichThenDirect => &[FetchPath::Rich, FetchPath::Direct],
            RetrievalPath::RichOnly => &[FetchPath::Rich],
            RetrievalPath::DirectOnly => &[FetchPath::Direct],
        }
    }
}

impl fmt::Display for RetrievalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetrievalPath::RichThenDirect => "rich-then-direct",
            RetrievalPath::RichOnly => "rich-only",
            RetrievalPath::DirectOnly => "direct-only",
        };
        f.write_str(name)
    }
}

impl FromStr for RetrievalPath {
    type Err = CyxShareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rich-then-direct" | "auto" => Ok(RetrievalPath::RichThenDirect),
            "rich-only" | "rich" => Ok(RetrievalPath::RichOnly),
            "direct-only" | "direct" => Ok(RetrievalPath::DirectOnly),
            other => Err(CyxShareError::Configuration(format!(
                "unknown retrieval path: {}",
                other
            ))),
        }
    }
}

/// One of the two ways a segment can be fetched from a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchPath {
    /// Structured segment download with proof
    Rich,
    /// Raw entry-range download
    Direct,
}

impl fmt::Display for FetchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchPath::Rich => f.write_str("rich"),
            FetchPath::Direct => f.write_str("direct"),
        }
    }
}

/// Largest file a download will plan for (4 GiB); the executor holds the
/// whole file in memory until its root is checked
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Segment layout used by the storage network
    pub layout: LayoutParams,
    /// Maximum concurrent segment fetches per download
    pub concurrency: usize,
    /// Timeout of a single node attempt
    pub fetch_timeout: Duration,
    /// Check each rich-path segment against its proof before accepting it
    pub verify_proofs: bool,
    pub retrieval_path: RetrievalPath,
    /// File sizes reported by nodes above this are rejected at planning
    pub max_file_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            layout: LayoutParams::default(),
            concurrency: 8,
            fetch_timeout: Duration::from_secs(30),
            verify_proofs: false,
            retrieval_path: RetrievalPath::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl TransferConfig {
    pub fn with_layout(mut self, layout: LayoutParams) -> Self {
        self.layout = layout;
        self
    }

    /// Set the concurrency limit (at least one fetch is always allowed)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn with_verify_proofs(mut self, verify_proofs: bool) -> Self {
        self.verify_proofs = verify_proofs;
        self
    }

    pub fn with_retrieval_path(mut self, retrieval_path: RetrievalPath) -> Self {
        self.retrieval_path = retrieval_path;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.concurrency, 8);
        assert!(!config.verify_proofs);
        assert_eq!(config.retrieval_path, RetrievalPath::RichThenDirect);
        assert_eq!(config.layout, LayoutParams::default());
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn test_concurrency_floor() {
        assert_eq!(TransferConfig::default().with_concurrency(0).concurrency, 1);
    }

    #[test]
    fn test_retrieval_path_parse() {
        assert_eq!("direct".parse::<RetrievalPath>().unwrap(), RetrievalPath::DirectOnly);
        assert_eq!(
            "Rich-Then-Direct".parse::<RetrievalPath>().unwrap(),
            RetrievalPath::RichThenDirect
        );
        assert!("sideways".parse::<RetrievalPath>().is_err());
        assert_eq!(RetrievalPath::RichOnly.to_string(), "rich-only");
    }

    #[test]
    fn test_phases() {
        assert_eq!(
            RetrievalPath::RichThenDirect.phases(),
            &[FetchPath::Rich, FetchPath::Direct]
        );
        assert_eq!(RetrievalPath::DirectOnly.phases(), &[FetchPath::Direct]);
    }
}
