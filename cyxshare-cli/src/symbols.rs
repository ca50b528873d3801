//! Cross-platform console symbols
//!
//! ASCII fallbacks on Windows.

/// Checkmark symbol
#[cfg(windows)]
pub const CHECK: &str = "[OK]";
#[cfg(not(windows))]
pub const CHECK: &str = "\u{2713}";

/// Cross/error symbol
#[cfg(windows)]
pub const CROSS: &str = "[X]";
#[cfg(not(windows))]
pub const CROSS: &str = "\u{2717}";

/// Warning symbol
#[cfg(windows)]
pub const WARN: &str = "[!]";
#[cfg(not(windows))]
pub const WARN: &str = "!";

/// Lock symbol, shown for encrypted shares
#[cfg(windows)]
pub const LOCK: &str = "[L]";
#[cfg(not(windows))]
pub const LOCK: &str = "\u{1F512}";

/// Link symbol, shown next to share codes
#[cfg(windows)]
pub const LINK: &str = "[>]";
#[cfg(not(windows))]
pub const LINK: &str = "\u{1F517}";
