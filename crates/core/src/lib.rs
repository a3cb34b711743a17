//! Restricted decoder, encoder and source generator for compiled Ren'Py
//! scripts, save logs and archive indexes.

mod archive;
mod codegen;
mod decompile;
mod error;
mod interchange;
mod model;
mod pickle;
mod registry;
mod resource;
mod version;

pub use archive::{read_index, read_index_with_key, ArchiveHeader, ArchiveIndex, IndexEntry};
pub use codegen::{encode_say_string, generate, indent, supports};
pub use decompile::{decompile, decompile_with_limits, Decompiled};
pub use error::{
    CatalogError, DecodeError, EncodeError, Error, ErrorKind, IndexError, InterchangeError,
    RegistryError, RenderError, Result,
};
pub use interchange::{from_json, from_json_with_limits, to_json, to_json_with_limits};
pub use model::{lift, lift_with_limits, Link, Meta, Node, Term};
pub use pickle::{
    decode, decode_with_limits, disasm, encode, encode_with_limits, instructions, Argument,
    Construction, Decoded, Fields, Graph, Instance, Instruction, Mapping, ObjId, Object, Opcode,
    Operand, State, Support, Value,
};
pub use registry::{
    BuiltinKind, ClassDescriptor, ClassRegistry, Family, NodeKind, Policy, Profile,
};
pub use resource::DecodeLimits;
pub use version::{
    Schema, ENCODE_PROTOCOL, ENCODE_PROTOCOL_BYTEARRAY, HIGHEST_PROTOCOL, RPA3_MAGIC, RPC2_MAGIC,
};
