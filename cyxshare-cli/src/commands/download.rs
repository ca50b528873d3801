//! Download Command
//!
//! Resolves a share code, downloads and verifies the file, and writes it
//! to disk.

use super::{field, format_bytes, spinner};
use crate::symbols;
use anyhow::{Context, Result};
use console::style;
use cyxshare_core::EncryptionKey;
use cyxshare_pointer::{DecryptionKey, ShareService};
use cyxshare_transfer::CancellationToken;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Download configuration
pub struct DownloadConfig {
    pub code: String,
    /// Base64 key for self-custody shares
    pub key: Option<String>,
    pub passphrase: Option<String>,
    pub output: String,
}

impl DownloadConfig {
    fn decryption_key(&self) -> Result<Option<DecryptionKey>> {
        match (&self.key, &self.passphrase) {
            (Some(_), Some(_)) => anyhow::bail!("Use either --key or --passphrase, not both"),
            (Some(key), None) => {
                let key = EncryptionKey::from_base64(key).context("Invalid --key")?;
                Ok(Some(DecryptionKey::Key(key)))
            }
            (None, Some(passphrase)) => Ok(Some(DecryptionKey::Passphrase(passphrase.clone()))),
            (None, None) => Ok(None),
        }
    }
}

/// Run download command
pub async fn run(
    service: &ShareService,
    config: DownloadConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let key = config.decryption_key()?;

    let pb = spinner(format!("Fetching {}", config.code))?;
    let result = service.fetch(&config.code, key, cancel).await;
    pb.finish_and_clear();
    let fetched = result.context("Failed to fetch file")?;

    let file_path = output_path(Path::new(&config.output), &fetched.record.file_name);
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&file_path, &fetched.data)
        .await
        .with_context(|| format!("Failed to write {}", file_path.display()))?;

    println!(
        "\n{} {}",
        style(symbols::CHECK).green(),
        style("File downloaded and verified").green().bold()
    );
    field("Saved to", file_path.display());
    field("Size", format_bytes(fetched.data.len() as u64));
    field("Root", fetched.record.root_digest);
    field("Transfer", fetched.report.summary());

    let failed_over = fetched.report.failed_over_segments();
    if !failed_over.is_empty() {
        println!(
            "{} {} segment(s) needed fail-over",
            style(symbols::WARN).yellow(),
            failed_over.len()
        );
    }

    Ok(())
}

/// Directory outputs get the record's file name; anything else is used as is
fn output_path(output: &Path, file_name: &str) -> PathBuf {
    if output.is_dir() {
        // never let a record place files outside the output directory
        let name = Path::new(file_name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "download".into());
        output.join(name)
    } else {
        output.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_path_in_directory() {
        let dir = TempDir::new().unwrap();
        assert_eq!(output_path(dir.path(), "report.pdf"), dir.path().join("report.pdf"));
        assert_eq!(
            output_path(dir.path(), "../../etc/passwd"),
            dir.path().join("passwd")
        );
        assert_eq!(output_path(dir.path(), ".."), dir.path().join("download"));
    }

    #[test]
    fn test_output_path_explicit_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.bin");
        assert_eq!(output_path(&target, "report.pdf"), target);
    }

    #[test]
    fn test_key_and_passphrase_are_exclusive() {
        let config = DownloadConfig {
            code: String::new(),
            key: Some(EncryptionKey::generate().to_base64()),
            passphrase: Some("pw".to_string()),
            output: ".".to_string(),
        };
        assert!(config.decryption_key().is_err());
    }
}
