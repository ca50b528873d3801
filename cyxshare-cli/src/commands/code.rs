//! Share code commands
//!
//! `validate` and `generate` work offline against the configured grammar.

use crate::symbols;
use anyhow::Result;
use console::style;
use cyxshare_core::ShareCodeFormat;

/// Check a code against the grammar. Returns whether it is valid.
pub fn validate(format: &ShareCodeFormat, code: &str) -> bool {
    let valid = format.validate(code);
    if valid {
        println!("{} {} is a valid share code", style(symbols::CHECK).green(), code);
    } else {
        println!(
            "{} {} is not a valid share code (expected {}xxxx-xxxx-xxxx-xxxx, lowercase a-z and 0-9)",
            style(symbols::CROSS).red(),
            code,
            format.prefix()
        );
    }
    valid
}

/// Print `count` fresh codes. Collisions are not checked.
pub fn generate(format: &ShareCodeFormat, count: usize) -> Result<()> {
    if count == 0 {
        anyhow::bail!("--count must be at least 1");
    }
    for _ in 0..count {
        println!("{}", format.generate());
    }
    Ok(())
}
