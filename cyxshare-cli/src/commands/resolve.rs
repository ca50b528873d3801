//! Resolve Command
//!
//! Looks up the pointer record behind a share code without downloading
//! the file itself.

use super::{field, format_bytes};
use crate::symbols;
use anyhow::{Context, Result};
use console::style;
use cyxshare_pointer::ShareService;
use cyxshare_transfer::CancellationToken;

/// Resolve configuration
pub struct ResolveConfig {
    pub code: String,
    /// Print the raw record as JSON
    pub json: bool,
}

/// Run resolve command
pub async fn run(
    service: &ShareService,
    config: ResolveConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let record = service
        .protocol()
        .resolve(&config.code, cancel)
        .await
        .context("Failed to resolve share code")?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!();
    println!("{} {}", symbols::LINK, style(&record.share_code).cyan().bold());
    field("File", &record.file_name);
    field("Size", format_bytes(record.file_size));
    field("Type", &record.mime_type);
    field("Root", record.root_digest);
    field("Uploaded", record.upload_time.format("%Y-%m-%d %H:%M:%S UTC"));
    if !record.uploader.is_empty() {
        field("Uploader", &record.uploader);
    }
    if let Some(tx) = &record.transaction_ref {
        field("Transaction", tx);
    }

    let encryption = match (record.is_encrypted, &record.key_salt, &record.encryption_key) {
        (false, _, _) => "none".to_string(),
        (true, Some(_), _) => format!("{} passphrase required", symbols::LOCK),
        (true, None, Some(_)) => format!("{} key stored in record", symbols::LOCK),
        (true, None, None) => format!("{} key required", symbols::LOCK),
    };
    field("Encryption", encryption);

    Ok(())
}
