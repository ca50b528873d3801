//! Share codes
//!
//! A share code is a random, human-shareable handle for an uploaded file:
//!
//! `<scheme>://<namespace>-xxxx-xxxx-xxxx-xxxx`
//!
//! where each `x` is drawn uniformly from `[a-z0-9]`. Codes are not derived
//! from content and are unique only probabilistically; generation does not
//! check for collisions. Validation is a pure grammar check and says nothing
//! about whether a pointer record exists for the code.

use crate::error::{CyxShareError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of dash-separated groups after the namespace
pub const CODE_GROUPS: usize = 4;

/// Characters per group
pub const GROUP_LEN: usize = 4;

/// Code alphabet (lowercase alphanumerics)
pub const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub const DEFAULT_SCHEME: &str = "cyx";
pub const DEFAULT_NAMESPACE: &str = "share";

/// Scheme and namespace of the share codes a deployment mints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareCodeFormat {
    pub scheme: String,
    pub namespace: String,
}

impl Default for ShareCodeFormat {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl ShareCodeFormat {
    pub fn new(scheme: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            namespace: namespace.into(),
        }
    }

    /// Everything before the first group, e.g. `cyx://share-`
    pub fn prefix(&self) -> String {
        format!("{}://{}-", self.scheme, self.namespace)
    }

    /// Mint a new random code
    pub fn generate(&self) -> ShareCode {
        self.generate_with(&mut rand::thread_rng())
    }

    /// Mint a new code from a caller-supplied random source
    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> ShareCode {
        let groups: Vec<String> = (0..CODE_GROUPS)
            .map(|_| {
                (0..GROUP_LEN)
                    .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                    .collect()
            })
            .collect();

        ShareCode(format!("{}{}", self.prefix(), groups.join("-")))
    }

    /// Pure grammar check
    pub fn validate(&self, code: &str) -> bool {
        let Some(body) = code.strip_prefix(self.prefix().as_str()) else {
            return false;
        };

        let groups: Vec<&str> = body.split('-').collect();
        groups.len() == CODE_GROUPS
            && groups.iter().all(|group| {
                group.len() == GROUP_LEN
                    && group
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            })
    }

    /// Validate and wrap a code
    pub fn parse(&self, code: &str) -> Result<ShareCode> {
        if self.validate(code) {
            Ok(ShareCode(code.to_string()))
        } else {
            Err(CyxShareError::InvalidShareCode {
                code: code.to_string(),
            })
        }
    }
}

/// A grammar-checked share code
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareCode(String);

impl ShareCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareCode({})", self.0)
    }
}

impl fmt::Display for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShareCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Mint a code in the default format
pub fn generate() -> ShareCode {
    ShareCodeFormat::default().generate()
}

/// Grammar check against the default format
pub fn validate(code: &str) -> bool {
    ShareCodeFormat::default().validate(code)
}
