//! Save logs to and from editable JSON.
//!
//! The input is the pickled `log` member of a save, already taken out of
//! the save archive.

use anyhow::{Context, Result};
use rpycdec::{decode, encode, from_json, to_json, ClassRegistry};
use serde_json::Value as Json;
use tracing::debug;

pub fn log_to_json(log: &[u8], registry: &ClassRegistry) -> Result<Json> {
    let decoded = decode(log, registry).context("decode save log")?;
    debug!(
        protocol = decoded.protocol,
        objects = decoded.graph.len(),
        "decoded save log"
    );
    Ok(to_json(&decoded.graph, &decoded.root)?)
}

pub fn json_to_log(json: &Json, registry: &ClassRegistry) -> Result<Vec<u8>> {
    let (graph, root) = from_json(json, registry).context("restore save graph")?;
    encode(&graph, &root).context("encode save log")
}
