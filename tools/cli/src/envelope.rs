//! Compiled-script envelopes.
//!
//! Current files start with `RENPY RPC2` followed by a table of
//! `(slot, start, length)` little-endian `u32` triples that ends at slot 0.
//! Each slot is zlib compressed on its own. Older files are a single zlib
//! stream holding what is now slot 1.

use std::io::Read;

use anyhow::{bail, Context, Result};
use flate2::read::ZlibDecoder;
use rpycdec::RPC2_MAGIC;
use tracing::debug;

/// Slots tried, in order, for the statement payload.
pub const SCRIPT_SLOTS: [u32; 2] = [1, 2];

/// One row of the slot table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub slot: u32,
    pub start: u32,
    pub length: u32,
}

pub fn is_rpc2(data: &[u8]) -> bool {
    data.starts_with(RPC2_MAGIC)
}

/// Parses the slot table of an RPC2 file.
pub fn slot_table(data: &[u8]) -> Result<Vec<Slot>> {
    if !is_rpc2(data) {
        bail!("not an RPC2 file");
    }
    let mut slots = Vec::new();
    let mut pos = RPC2_MAGIC.len();
    loop {
        let Some(row) = data.get(pos..pos + 12) else {
            bail!("slot table truncated at byte {pos}");
        };
        let field = |i: usize| u32::from_le_bytes([row[i], row[i + 1], row[i + 2], row[i + 3]]);
        let slot = Slot {
            slot: field(0),
            start: field(4),
            length: field(8),
        };
        if slot.slot == 0 {
            return Ok(slots);
        }
        slots.push(slot);
        pos += 12;
    }
}

/// Decompressed contents of `slot`, or `None` when the file has no such
/// slot.
pub fn read_slot(data: &[u8], slot: u32) -> Result<Option<Vec<u8>>> {
    if !is_rpc2(data) {
        if slot != 1 {
            return Ok(None);
        }
        return inflate(data).map(Some).context("inflate legacy script");
    }
    let Some(entry) = slot_table(data)?.into_iter().find(|s| s.slot == slot) else {
        return Ok(None);
    };
    let start = entry.start as usize;
    let end = start + entry.length as usize;
    let Some(raw) = data.get(start..end) else {
        bail!(
            "slot {slot} spans bytes {start}..{end} of a {} byte file",
            data.len()
        );
    };
    inflate(raw)
        .map(Some)
        .with_context(|| format!("inflate slot {slot}"))
}

/// The pickled `(data, statements)` payload of a compiled script.
pub fn script_payload(data: &[u8]) -> Result<Vec<u8>> {
    for slot in SCRIPT_SLOTS {
        match read_slot(data, slot)? {
            Some(payload) if !payload.is_empty() => {
                debug!(slot, bytes = payload.len(), "using envelope slot");
                return Ok(payload);
            }
            _ => debug!(slot, "envelope slot is absent or empty"),
        }
    }
    bail!("no script payload in slots {SCRIPT_SLOTS:?}")
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
