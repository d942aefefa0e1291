//! CLI command implementations.

pub(crate) mod config;
pub(crate) mod context;
pub(crate) mod doctor;
pub(crate) mod entry;

use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use serde_json::Value;

use hivemind_config::Config;
use hivemind_context::{ContextManager, JsonMap};

/// Connect the configured backend.
pub(crate) async fn open_manager(config: &Config) -> Result<ContextManager> {
    ContextManager::from_config(config)
        .await
        .context("failed to open the context store")
}

/// Parse a JSON value given on the command line.
pub(crate) fn parse_json(raw: &str, what: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{what} is not valid JSON"))
}

/// Parse a JSON object given on the command line.
pub(crate) fn parse_object(raw: &str, what: &str) -> Result<JsonMap> {
    match parse_json(raw, what)? {
        Value::Object(map) => Ok(map),
        other => bail!("{what} must be a JSON object, got {other}"),
    }
}

pub(crate) fn ttl_from_secs(secs: Option<u64>) -> Result<Option<Duration>> {
    match secs {
        Some(0) => bail!("--ttl must be at least 1 second"),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}
