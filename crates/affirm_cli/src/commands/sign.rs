//! `affirm sign`.

use super::{read_json, CommandOutput};
use crate::config::AffirmConfig;
use crate::keyfile::open_key_store;
use affirm_certify::{AttestationAuthority, HttpAnchor};
use affirm_core::Clock;
use clap::Args;
use color_eyre::eyre::Result;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments for `affirm sign`
#[derive(Debug, Args)]
pub struct SignArgs {
    /// JSON content to sign (`-` for stdin)
    pub content: PathBuf,

    /// Forward the attestation to this ledger (overrides `anchor_url`)
    #[arg(long, value_name = "URL")]
    pub anchor: Option<String>,

    /// Do not anchor even if `anchor_url` is configured
    #[arg(long, conflicts_with = "anchor")]
    pub no_anchor: bool,
}

/// Authority over the configured key, anchoring to `anchor_url` if set
pub fn authority(config: &AffirmConfig, anchor_url: Option<&str>, clock: Arc<dyn Clock>) -> Result<AttestationAuthority> {
    let keys = open_key_store(config, clock)?;
    let authority = AttestationAuthority::new(keys, config.authority.clone());
    Ok(match anchor_url {
        Some(url) => authority.with_anchor(Arc::new(HttpAnchor::new(url, config.authority.anchor_timeout())?)),
        None => authority,
    })
}

/// Sign a JSON document into an attestation
pub async fn execute(args: &SignArgs, config: &AffirmConfig, clock: Arc<dyn Clock>) -> Result<CommandOutput> {
    let content: Value = read_json(&args.content)?;
    let anchor_url = if args.no_anchor {
        None
    } else {
        args.anchor.as_deref().or(config.anchor_url.as_deref())
    };

    let authority = authority(config, anchor_url, clock)?;
    let attestation = authority.attest_and_anchor(&content).await?;
    Ok(CommandOutput::ok(attestation.to_value()))
}
