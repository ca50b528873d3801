//! Upload Command
//!
//! Uploads a file and prints the share code for it.

use super::{field, format_bytes, spinner};
use crate::symbols;
use anyhow::{Context, Result};
use bytes::Bytes;
use console::style;
use cyxshare_core::FileHandle;
use cyxshare_pointer::{Encryption, ShareOptions, ShareService};
use cyxshare_transfer::{CancellationToken, KeyCustody};
use std::path::Path;
use tokio::fs;

/// Upload configuration
pub struct UploadConfig {
    pub path: String,
    pub encrypt: bool,
    pub passphrase: Option<String>,
    /// Write the key into the pointer record
    pub store_key: bool,
    pub uploader: Option<String>,
}

impl UploadConfig {
    fn options(&self) -> Result<ShareOptions> {
        let encryption = match (&self.passphrase, self.encrypt) {
            (Some(passphrase), _) => Encryption::Passphrase(passphrase.clone()),
            (None, true) => Encryption::RandomKey,
            (None, false) => Encryption::None,
        };
        if self.store_key && matches!(encryption, Encryption::None) {
            anyhow::bail!("--store-key needs --encrypt or --passphrase");
        }

        let custody = if self.store_key {
            KeyCustody::EmbedInRecord
        } else {
            KeyCustody::SelfCustody
        };
        let mut options = ShareOptions::encrypted(encryption).with_custody(custody);
        if let Some(uploader) = &self.uploader {
            options = options.with_uploader(uploader.clone());
        }
        Ok(options)
    }
}

/// Run upload command
pub async fn run(
    service: &ShareService,
    config: UploadConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let path = Path::new(&config.path);
    if !path.is_file() {
        anyhow::bail!("Not a file: {}", config.path);
    }
    let options = config.options()?;

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let data = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();
    let handle = FileHandle::new(file_name, data.len() as u64).with_mime_type(mime_type);

    let pb = spinner(format!("Uploading {}", file_name))?;
    let result = service
        .share(handle, Bytes::from(data), options, cancel)
        .await;
    pb.finish_and_clear();
    let shared = result.context("Failed to share file")?;

    println!(
        "\n{} {}",
        style(symbols::CHECK).green(),
        style("File shared").green().bold()
    );
    field("Share code", style(&shared.code).cyan().bold());
    field("Root", shared.record.root_digest);
    field("Size", format_bytes(shared.record.file_size));
    if let Some(tx) = &shared.pointer.transaction_ref {
        field("Transaction", tx);
    }

    if shared.record.is_encrypted {
        if shared.record.key_salt.is_some() {
            field("Encryption", format!("{} passphrase", symbols::LOCK));
        } else if shared.record.encryption_key.is_some() {
            field("Encryption", format!("{} key stored in record", symbols::LOCK));
        } else if let Some(key) = &shared.key {
            field("Encryption", format!("{} self custody", symbols::LOCK));
            field("Key", key.to_base64());
            println!(
                "\n{} Keep this key. Without it the file cannot be decrypted.",
                style(symbols::WARN).yellow()
            );
        }
    }

    Ok(())
}
