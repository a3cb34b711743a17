//! RPA-3.0 archive index.
//!
//! An archive starts with a one-line header naming the offset of a
//! compressed index and the key its offsets and lengths are obfuscated
//! with. Decompression belongs to the caller; this module parses the header
//! and decodes the index payload through the `archive` profile. That profile
//! resolves only the primitive builtins (`set`, `frozenset`, `bytes` through
//! `_codecs.encode`, `bytearray`, `object`); every other class is unknown.
//! Python 2 strings in an index stay raw bytes.

use std::collections::BTreeMap;

use num_traits::ToPrimitive;

use crate::error::IndexError;
use crate::pickle::{decode_with_limits, Graph, Object, Value};
use crate::registry::{ClassRegistry, Profile};
use crate::resource::DecodeLimits;
use crate::version::RPA3_MAGIC;

/// Parsed `RPA-3.0 <offset> <key>` header line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub index_offset: u64,
    pub key: u64,
    /// Length of the header line including its newline.
    pub len: usize,
}

impl ArchiveHeader {
    pub fn parse(data: &[u8]) -> Result<Self, IndexError> {
        let malformed = |reason: &str| IndexError::MalformedIndex {
            entry: "header".to_string(),
            reason: reason.to_string(),
        };
        if !data.starts_with(RPA3_MAGIC) {
            return Err(malformed("not an RPA-3.0 archive"));
        }
        let end = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| malformed("header line is not terminated"))?;
        let line = std::str::from_utf8(&data[RPA3_MAGIC.len()..end])
            .map_err(|_| malformed("header is not ASCII"))?;
        let mut fields = line.split_ascii_whitespace();
        let (Some(offset), Some(key)) = (fields.next(), fields.next()) else {
            return Err(malformed("header needs an index offset and a key"));
        };
        let index_offset =
            u64::from_str_radix(offset, 16).map_err(|_| malformed("index offset is not hex"))?;
        let key = u64::from_str_radix(key, 16).map_err(|_| malformed("key is not hex"))?;
        Ok(Self {
            index_offset,
            key,
            len: end + 1,
        })
    }
}

/// One stored segment of an archive member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u64,
    pub length: u64,
    /// Bytes stored in the index instead of the archive body; they precede
    /// the segment's data.
    pub prefix: Vec<u8>,
}

/// Member name to its segments, in storage order.
pub type ArchiveIndex = BTreeMap<String, Vec<IndexEntry>>;

/// Decodes an index payload whose offsets and lengths are stored as is.
pub fn read_index(payload: &[u8]) -> Result<ArchiveIndex, IndexError> {
    read_index_with_key(payload, 0)
}

/// Decodes an index payload and removes the `key` obfuscation from every
/// offset and length.
pub fn read_index_with_key(payload: &[u8], key: u64) -> Result<ArchiveIndex, IndexError> {
    let registry = ClassRegistry::builtin(Profile::Archive);
    let decoded = decode_with_limits(payload, registry, DecodeLimits::default())?;
    let graph = &decoded.graph;
    let Some(Object::Dict(mapping)) = graph.resolve(&decoded.root) else {
        return Err(IndexError::MalformedIndex {
            entry: "<root>".to_string(),
            reason: "index is not a mapping".to_string(),
        });
    };
    let mut index = ArchiveIndex::new();
    for (name, segments) in mapping.iter() {
        let name = member_name(name)?;
        let segments = graph
            .sequence(segments)
            .ok_or_else(|| malformed(&name, "segments are not a list"))?;
        let mut entries = Vec::with_capacity(segments.len());
        for segment in segments {
            entries.push(segment_entry(graph, &name, segment, key)?);
        }
        index.insert(name, entries);
    }
    Ok(index)
}

fn member_name(value: &Value) -> Result<String, IndexError> {
    match value {
        Value::Str(name) => Ok(name.to_string()),
        Value::Bytes(name) => String::from_utf8(name.to_vec()).map_err(|_| {
            IndexError::MalformedIndex {
                entry: String::from_utf8_lossy(name).into_owned(),
                reason: "member name is not UTF-8".to_string(),
            }
        }),
        other => Err(IndexError::MalformedIndex {
            entry: format!("<{}>", other.type_name()),
            reason: "member name is not text".to_string(),
        }),
    }
}

fn segment_entry(
    graph: &Graph,
    name: &str,
    segment: &Value,
    key: u64,
) -> Result<IndexEntry, IndexError> {
    let fields = graph
        .sequence(segment)
        .ok_or_else(|| malformed(name, "segment is not a tuple"))?;
    let (offset, length, prefix) = match fields {
        [offset, length] => (offset, length, None),
        [offset, length, prefix] => (offset, length, Some(prefix)),
        _ => return Err(malformed(name, "segment needs 2 or 3 fields")),
    };
    let offset = unsigned(offset).ok_or_else(|| malformed(name, "offset is not an integer"))?;
    let length = unsigned(length).ok_or_else(|| malformed(name, "length is not an integer"))?;
    let prefix = match prefix {
        None | Some(Value::None) => Vec::new(),
        Some(Value::Bytes(bytes)) => bytes.to_vec(),
        // Text prefixes hold raw bytes as Latin-1 code points.
        Some(Value::Str(text)) => text
            .chars()
            .map(|ch| u8::try_from(u32::from(ch)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| malformed(name, "prefix is not Latin-1"))?,
        Some(_) => return Err(malformed(name, "prefix is not text or bytes")),
    };
    Ok(IndexEntry {
        offset: offset ^ key,
        length: length ^ key,
        prefix,
    })
}

fn unsigned(value: &Value) -> Option<u64> {
    match value {
        Value::Int(value) => u64::try_from(*value).ok(),
        Value::BigInt(value) => value.to_u64(),
        _ => None,
    }
}

fn malformed(entry: &str, reason: &str) -> IndexError {
    IndexError::MalformedIndex {
        entry: entry.to_string(),
        reason: reason.to_string(),
    }
}
