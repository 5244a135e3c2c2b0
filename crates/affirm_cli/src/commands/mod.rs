//! CLI subcommands.
//!
//! Each subcommand returns a JSON document for stdout and whether the
//! operation succeeded; `main` prints it and sets the exit status.

pub mod keys;
pub mod score;
pub mod sign;
pub mod verify;

use color_eyre::eyre::{Result, WrapErr};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::Read;
use std::path::Path;

/// Result of one subcommand
#[derive(Debug)]
pub struct CommandOutput {
    /// Document printed to stdout
    pub body: Value,
    /// Exit successfully
    pub success: bool,
}

impl CommandOutput {
    /// Successful output
    pub fn ok(body: Value) -> Self {
        Self { body, success: true }
    }
}

/// Read a JSON document from `path`, or stdin when `path` is `-`
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).wrap_err("reading stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?
    };
    serde_json::from_str(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}
