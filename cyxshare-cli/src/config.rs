//! Configuration management
//!
//! Handles storing and loading CLI configuration.
//! Config directory: ~/.cyxshare/ (cross-platform)
//!
//! Config file format (~/.cyxshare/config.toml):
//! ```toml
//! [network]
//! indexer_url = "http://localhost:5678"
//!
//! [share]
//! scheme = "cyx"
//! namespace = "share"
//!
//! [transfer]
//! concurrency = 8
//! timeout_secs = 30
//! verify_proofs = false
//! retrieval_path = "rich-then-direct"
//!
//! [index]
//! redis_url = "redis://localhost:6379"
//!
//! [cache]
//! enabled = true
//! ```

use anyhow::{Context, Result};
use cyxshare_core::{LayoutParams, ShareCodeFormat};
use cyxshare_pointer::{ProtocolConfig, RedisIndexConfig};
use cyxshare_transfer::{RetrievalPath, TransferConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// CyxShare configuration, the structure of ~/.cyxshare/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CyxShareConfig {
    /// Storage network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Share-code settings
    #[serde(default)]
    pub share: ShareSettings,

    /// Download and upload settings
    #[serde(default)]
    pub transfer: TransferSettings,

    /// Pointer index settings
    #[serde(default)]
    pub index: IndexSettings,

    /// Local pointer cache settings
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Storage network connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Indexer URL used for node discovery and submissions
    #[serde(default = "default_indexer_url")]
    pub indexer_url: String,

    /// Bearer token sent with every request
    #[serde(default = "default_auth_token", skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            indexer_url: default_indexer_url(),
            auth_token: default_auth_token(),
        }
    }
}

fn default_indexer_url() -> String {
    std::env::var("CYXSHARE_INDEXER_URL").unwrap_or_else(|_| "http://localhost:5678".to_string())
}

fn default_auth_token() -> Option<String> {
    std::env::var("CYXSHARE_AUTH_TOKEN").ok()
}

/// Share-code settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSettings {
    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Name stored as the uploader of published records
    #[serde(default)]
    pub uploader: Option<String>,

    /// Re-mint codes already present in the index
    #[serde(default)]
    pub check_collisions: bool,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            namespace: default_namespace(),
            uploader: None,
            check_collisions: false,
        }
    }
}

fn default_scheme() -> String {
    std::env::var("CYXSHARE_SCHEME").unwrap_or_else(|_| "cyx".to_string())
}

fn default_namespace() -> String {
    std::env::var("CYXSHARE_NAMESPACE").unwrap_or_else(|_| "share".to_string())
}

/// Transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Segments fetched in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-node attempt timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub verify_proofs: bool,

    #[serde(default)]
    pub retrieval_path: RetrievalPath,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            verify_proofs: false,
            retrieval_path: RetrievalPath::default(),
        }
    }
}

fn default_concurrency() -> usize {
    std::env::var("CYXSHARE_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8)
}

fn default_timeout_secs() -> u64 {
    std::env::var("CYXSHARE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30)
}

/// Pointer index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Redis URL; without one, codes only resolve from the local cache
    #[serde(default = "default_redis_url", skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    #[serde(default = "default_index_prefix")]
    pub prefix: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            prefix: default_index_prefix(),
        }
    }
}

fn default_redis_url() -> Option<String> {
    std::env::var("CYXSHARE_REDIS_URL").ok()
}

fn default_index_prefix() -> String {
    "cyxshare".to_string()
}

/// Local pointer cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Defaults to ~/.cyxshare/pointers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

impl CyxShareConfig {
    /// Share-code grammar from the `[share]` section
    pub fn code_format(&self) -> ShareCodeFormat {
        ShareCodeFormat::new(self.share.scheme.clone(), self.share.namespace.clone())
    }

    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig::default()
            .with_format(self.code_format())
            .with_collision_check(self.share.check_collisions)
    }

    /// Transfer settings, with layout taken from the environment
    pub fn transfer_config(&self) -> Result<TransferConfig> {
        let (chunk_size, max_chunks) = cyxshare_core::layout_config_from_env();
        let layout = LayoutParams::new(chunk_size, max_chunks)?;
        Ok(TransferConfig::default()
            .with_layout(layout)
            .with_concurrency(self.transfer.concurrency)
            .with_fetch_timeout(Duration::from_secs(self.transfer.timeout_secs))
            .with_verify_proofs(self.transfer.verify_proofs)
            .with_retrieval_path(self.transfer.retrieval_path))
    }

    pub fn redis_config(&self) -> Option<RedisIndexConfig> {
        self.index.redis_url.as_ref().map(|url| RedisIndexConfig {
            url: url.clone(),
            prefix: self.index.prefix.clone(),
        })
    }

    /// Sled directory for the pointer cache, if enabled
    pub fn cache_path(&self) -> Result<Option<PathBuf>> {
        if !self.cache.enabled {
            return Ok(None);
        }
        match &self.cache.path {
            Some(path) => Ok(Some(path.clone())),
            None => Ok(Some(config_dir()?.join("pointers"))),
        }
    }

    /// Set a value by dotted key, as used by `cyxshare config set`
    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "network.indexer_url" => self.network.indexer_url = value,
            "network.auth_token" => self.network.auth_token = Some(value),
            "share.scheme" => self.share.scheme = value,
            "share.namespace" => self.share.namespace = value,
            "share.uploader" => self.share.uploader = Some(value),
            "share.check_collisions" => {
                self.share.check_collisions = value.parse().context("expected true or false")?
            }
            "transfer.concurrency" => {
                self.transfer.concurrency = value.parse().context("expected a number")?
            }
            "transfer.timeout_secs" => {
                self.transfer.timeout_secs = value.parse().context("expected a number")?
            }
            "transfer.verify_proofs" => {
                self.transfer.verify_proofs = value.parse().context("expected true or false")?
            }
            "transfer.retrieval_path" => self.transfer.retrieval_path = value.parse()?,
            "index.redis_url" => self.index.redis_url = Some(value),
            "index.prefix" => self.index.prefix = value,
            "cache.enabled" => {
                self.cache.enabled = value.parse().context("expected true or false")?
            }
            "cache.path" => self.cache.path = Some(PathBuf::from(value)),
            _ => {
                anyhow::bail!(
                    "Unknown config key: {}. Valid keys: {}",
                    key,
                    CONFIG_KEYS.join(", ")
                );
            }
        }
        Ok(())
    }
}

/// Keys accepted by [`CyxShareConfig::set`]
pub const CONFIG_KEYS: &[&str] = &[
    "network.indexer_url",
    "network.auth_token",
    "share.scheme",
    "share.namespace",
    "share.uploader",
    "share.check_collisions",
    "transfer.concurrency",
    "transfer.timeout_secs",
    "transfer.verify_proofs",
    "transfer.retrieval_path",
    "index.redis_url",
    "index.prefix",
    "cache.enabled",
    "cache.path",
];

/// Get the config directory path (~/.cyxshare/)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let config_dir = home.join(".cyxshare");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory ~/.cyxshare/")?;
    }

    Ok(config_dir)
}

/// Get the config file path
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration from file
/// Falls back to defaults if file doesn't exist
pub fn load_config() -> CyxShareConfig {
    match config_file_path() {
        Ok(path) if path.exists() => match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    CyxShareConfig::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                CyxShareConfig::default()
            }
        },
        _ => CyxShareConfig::default(),
    }
}

/// Save configuration to file
pub fn save_config(config: &CyxShareConfig) -> Result<()> {
    let path = config_file_path()?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(&path, content).context("Failed to write config file")?;
    Ok(())
}
