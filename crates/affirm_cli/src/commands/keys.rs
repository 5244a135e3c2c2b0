//! `affirm keygen`, `affirm rotate` and `affirm keyset`.

use super::CommandOutput;
use crate::config::AffirmConfig;
use crate::keyfile::{open_key_store, save_history, write_key_file};
use affirm_certify::Signer;
use affirm_core::{Clock, KeyId};
use clap::Args;
use color_eyre::eyre::{bail, Result};
use serde_json::json;
use std::sync::Arc;

/// Arguments for `affirm keygen`
#[derive(Debug, Args)]
pub struct KeygenArgs {
    /// Overwrite an existing key file
    #[arg(long)]
    pub force: bool,
}

/// Generate a fresh signing key into the configured key file
pub fn keygen(args: &KeygenArgs, config: &AffirmConfig, clock: Arc<dyn Clock>) -> Result<CommandOutput> {
    if config.key_file.exists() && !args.force {
        bail!(
            "key file {} already exists; use `affirm rotate` or pass --force",
            config.key_file.display()
        );
    }
    let now = clock.now();
    let signer = Signer::generate();
    let kid = KeyId::dated(&config.keys.kid_prefix, now);
    write_key_file(&config.key_file, &signer, &kid, now, &config.keys.issuer)?;

    Ok(CommandOutput::ok(json!({
        "kid": kid,
        "public_key_b64": signer.public_key().to_base64(),
        "key_file": config.key_file,
    })))
}

/// Retire the current key into history and install a new one
pub fn rotate(config: &AffirmConfig, clock: Arc<dyn Clock>) -> Result<CommandOutput> {
    let store = open_key_store(config, clock)?;
    let rotation = store.rotate()?;

    // The retired key must reach history before the key file is replaced
    save_history(config, &store)?;
    write_key_file(
        &config.key_file,
        &rotation.signer,
        &rotation.current.kid,
        rotation.current.created,
        &rotation.current.issuer,
    )?;

    Ok(CommandOutput::ok(json!({
        "kid": rotation.current.kid,
        "public_key_b64": rotation.current.public_key.to_base64(),
        "retired": rotation.retired.map(|r| r.kid),
        "history": store.snapshot()?.history.len(),
    })))
}

/// Publishable keyset
pub fn keyset(config: &AffirmConfig, clock: Arc<dyn Clock>) -> Result<CommandOutput> {
    let store = open_key_store(config, clock)?;
    Ok(CommandOutput::ok(serde_json::to_value(store.keyset()?)?))
}
