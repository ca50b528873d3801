//! CyxShare CLI
//!
//! Command-line client for sharing files over a content-addressed storage
//! network.
//!
//! # Commands
//! - `upload` - Upload a file and print its share code
//! - `download` - Download a file by share code
//! - `resolve` - Show the pointer record behind a share code
//! - `validate` - Check a share code against the grammar
//! - `generate` - Print fresh share codes
//! - `config` - Show or edit configuration
//!
//! # Configuration
//! Config file: ~/.cyxshare/config.toml
//! Pointer cache: ~/.cyxshare/pointers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod client;
mod commands;
mod config;
mod symbols;

use client::HttpStorageNetwork;
use commands::{code, download, resolve, upload};
use cyxshare_pointer::{RedisPointerIndex, ShareService, SledPointerCache};
use cyxshare_transfer::{CancellationToken, RetrievalPath};

#[derive(Parser)]
#[command(name = "cyxshare")]
#[command(about = "Share files over decentralized storage with short codes")]
#[command(version)]
struct Cli {
    /// Indexer URL (overrides config file)
    #[arg(long, global = true, env = "CYXSHARE_INDEXER_URL")]
    indexer: Option<String>,

    /// Bearer token for the storage network
    #[arg(long, global = true, env = "CYXSHARE_AUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Redis URL of the pointer index
    #[arg(long, global = true, env = "CYXSHARE_REDIS_URL")]
    redis: Option<String>,

    /// Pointer cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Disable the local pointer cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Retrieval path: rich-then-direct, rich-only or direct-only
    #[arg(long, global = true)]
    retrieval: Option<RetrievalPath>,

    /// Segments fetched in parallel
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Verify segment proofs on the rich path
    #[arg(long, global = true)]
    verify_proofs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file and print its share code
    Upload {
        /// Path to file
        path: String,

        /// Encrypt with a fresh random key
        #[arg(short, long)]
        encrypt: bool,

        /// Encrypt with a key derived from this passphrase
        #[arg(short, long, env = "CYXSHARE_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,

        /// Store the key in the pointer record (anyone with the code can decrypt)
        #[arg(long)]
        store_key: bool,
    },

    /// Download a file by share code
    Download {
        /// Share code
        code: String,

        /// Base64 key for encrypted shares
        #[arg(short, long)]
        key: Option<String>,

        /// Passphrase for encrypted shares
        #[arg(short, long, env = "CYXSHARE_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,

        /// Output path (file or directory)
        #[arg(short, long, default_value = ".")]
        output: String,
    },

    /// Show the pointer record behind a share code
    Resolve {
        /// Share code
        code: String,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a share code against the grammar
    Validate {
        /// Share code
        code: String,
    },

    /// Print fresh share codes
    Generate {
        /// Number of codes
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Show config file path
    Path,

    /// Initialize config file with defaults
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., network.indexer_url, transfer.concurrency)
        key: String,
        /// Value to set
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration from ~/.cyxshare/config.toml
    let mut cfg = config::load_config();

    // CLI args override config file
    if let Some(indexer) = cli.indexer {
        cfg.network.indexer_url = indexer;
    }
    if cli.token.is_some() {
        cfg.network.auth_token = cli.token;
    }
    if cli.redis.is_some() {
        cfg.index.redis_url = cli.redis;
    }
    if let Some(dir) = cli.cache_dir {
        cfg.cache.path = Some(dir);
    }
    if cli.no_cache {
        cfg.cache.enabled = false;
    }
    if let Some(path) = cli.retrieval {
        cfg.transfer.retrieval_path = path;
    }
    if let Some(concurrency) = cli.concurrency {
        cfg.transfer.concurrency = concurrency;
    }
    if cli.verify_proofs {
        cfg.transfer.verify_proofs = true;
    }

    // Ctrl-C cancels whatever transfer is running
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    match cli.command {
        Commands::Upload {
            path,
            encrypt,
            passphrase,
            store_key,
        } => {
            let service = build_service(&cfg).await?;
            let config = upload::UploadConfig {
                path,
                encrypt,
                passphrase,
                store_key,
                uploader: cfg.share.uploader.clone(),
            };
            commands::upload(&service, config, &cancel).await?;
        }

        Commands::Download {
            code,
            key,
            passphrase,
            output,
        } => {
            let service = build_service(&cfg).await?;
            let config = download::DownloadConfig {
                code,
                key,
                passphrase,
                output,
            };
            commands::download(&service, config, &cancel).await?;
        }

        Commands::Resolve { code, json } => {
            let service = build_service(&cfg).await?;
            let config = resolve::ResolveConfig { code, json };
            commands::resolve(&service, config, &cancel).await?;
        }

        Commands::Validate { code: share_code } => {
            if !code::validate(&cfg.code_format(), &share_code) {
                std::process::exit(1);
            }
        }

        Commands::Generate { count } => {
            code::generate(&cfg.code_format(), count)?;
        }

        Commands::Config { command } => {
            handle_config_command(command)?;
        }
    }

    Ok(())
}

/// Wire the HTTP network, pointer cache and pointer index into a service
async fn build_service(cfg: &config::CyxShareConfig) -> Result<ShareService> {
    let network = HttpStorageNetwork::new(
        &cfg.network.indexer_url,
        cfg.network.auth_token.clone(),
        Duration::from_secs(cfg.transfer.timeout_secs.max(1) * 4),
    )?;

    let mut service = ShareService::new(
        Arc::new(network),
        cfg.transfer_config()?,
        cfg.protocol_config(),
    );

    if let Some(path) = cfg.cache_path()? {
        let cache = SledPointerCache::open(&path)
            .with_context(|| format!("Failed to open pointer cache at {}", path.display()))?;
        service = service.with_cache(Arc::new(cache));
    }

    if let Some(redis) = cfg.redis_config() {
        let index = RedisPointerIndex::connect(redis)
            .await
            .context("Failed to connect to pointer index")?;
        service = service.with_index(Arc::new(index));
    }

    Ok(service)
}

/// Handle config subcommands
fn handle_config_command(command: Option<ConfigCommands>) -> Result<()> {
    use console::style;

    match command {
        None | Some(ConfigCommands::Show) => {
            let cfg = config::load_config();
            println!();
            println!("{}", style("CyxShare Configuration").bold().underlined());
            println!();
            println!("{}", style("[network]").cyan());
            println!("  indexer_url = \"{}\"", cfg.network.indexer_url);
            if cfg.network.auth_token.is_some() {
                println!("  auth_token = \"********\"");
            }
            println!();
            println!("{}", style("[share]").cyan());
            println!("  scheme = \"{}\"", cfg.share.scheme);
            println!("  namespace = \"{}\"", cfg.share.namespace);
            if let Some(uploader) = &cfg.share.uploader {
                println!("  uploader = \"{}\"", uploader);
            }
            println!("  check_collisions = {}", cfg.share.check_collisions);
            println!();
            println!("{}", style("[transfer]").cyan());
            println!("  concurrency = {}", cfg.transfer.concurrency);
            println!("  timeout_secs = {}", cfg.transfer.timeout_secs);
            println!("  verify_proofs = {}", cfg.transfer.verify_proofs);
            println!("  retrieval_path = \"{}\"", cfg.transfer.retrieval_path);
            println!();
            println!("{}", style("[index]").cyan());
            match &cfg.index.redis_url {
                Some(url) => println!("  redis_url = \"{}\"", url),
                None => println!(
                    "  {}",
                    style("(none: codes resolve only from the local cache)").dim()
                ),
            }
            println!("  prefix = \"{}\"", cfg.index.prefix);
            println!();
            println!("{}", style("[cache]").cyan());
            println!("  enabled = {}", cfg.cache.enabled);
            if let Ok(Some(path)) = cfg.cache_path() {
                println!("  path = \"{}\"", path.display());
            }
            println!();

            if let Ok(path) = config::config_file_path() {
                println!("{} {}", style("Config file:").dim(), path.display());
                if !path.exists() {
                    println!(
                        "{} Run '{}' to create it",
                        style("(not created yet)").yellow(),
                        style("cyxshare config init").green()
                    );
                }
            }
        }

        Some(ConfigCommands::Path) => {
            if let Ok(path) = config::config_file_path() {
                println!("{}", path.display());
            }
        }

        Some(ConfigCommands::Init { force }) => {
            let path = config::config_file_path()?;
            if path.exists() && !force {
                println!(
                    "{} Config file already exists at {}",
                    style(symbols::WARN).yellow(),
                    path.display()
                );
                println!("Use --force to overwrite");
                return Ok(());
            }

            config::save_config(&config::CyxShareConfig::default())?;
            println!(
                "{} Config file created at {}",
                style(symbols::CHECK).green(),
                path.display()
            );
        }

        Some(ConfigCommands::Set { key, value }) => {
            let mut cfg = config::load_config();
            cfg.set(&key, value)?;
            config::save_config(&cfg)?;
            println!("{} Configuration updated", style(symbols::CHECK).green());
        }
    }

    Ok(())
}
