//! Producer schema versions and format constants.
//!
//! Two families of compiled scripts exist in the wild: the ones written by
//! Python 2 era toolchains (slot based node state, `renpy.ast.PyExpr` text
//! atoms) and the ones written by Python 3 era toolchains (dict based node
//! state, `renpy.astsupport.PyExpr`, parameter signatures). Rendering rules
//! are selected per schema, never guessed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pickle::{Graph, Object, State};
use crate::registry::Family;

/// Highest bytecode protocol the decoder understands.
pub const HIGHEST_PROTOCOL: u8 = 5;

/// Protocol written by the encoder.
pub const ENCODE_PROTOCOL: u8 = 4;

/// Protocol written by the encoder when the graph holds a bytearray.
pub const ENCODE_PROTOCOL_BYTEARRAY: u8 = 5;

/// Magic bytes of the slotted compiled-script envelope.
pub const RPC2_MAGIC: &[u8] = b"RENPY RPC2";

/// Magic bytes of the version 3 archive header.
pub const RPA3_MAGIC: &[u8] = b"RPA-3.0 ";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    Legacy,
    Current,
}

impl Schema {
    pub const ALL: [Schema; 2] = [Schema::Legacy, Schema::Current];

    pub fn name(self) -> &'static str {
        match self {
            Schema::Legacy => "legacy",
            Schema::Current => "current",
        }
    }

    /// One level of block indentation in generated source.
    pub fn indent_unit(self) -> &'static str {
        match self {
            Schema::Legacy => "    ",
            Schema::Current => "  ",
        }
    }

    /// Picks the schema a decoded graph was most likely produced with.
    ///
    /// Python 2 producers declare `__slots__` on every node class, so their
    /// nodes arrive with `(None, slots)` state. Anything else is current.
    pub fn infer(graph: &Graph) -> Schema {
        let legacy = graph.objects().any(|object| match object {
            Object::Instance(instance) => {
                instance.class.kind.is_some_and(|kind| kind.family() != Family::Support)
                    && matches!(instance.state, State::Pair { has_slots: true, .. })
            }
            _ => false,
        });
        if legacy {
            Schema::Legacy
        } else {
            Schema::Current
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Schema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" | "7" | "py2" => Ok(Schema::Legacy),
            "current" | "8" | "py3" => Ok(Schema::Current),
            other => Err(format!("unknown schema `{other}` (expected legacy or current)")),
        }
    }
}
