//! Restricted reader and writer for the pickle bytecode.
//!
//! Decoding runs a stack machine over the stream but never calls anything:
//! every class name goes through a [`ClassRegistry`](crate::ClassRegistry)
//! profile and is rebuilt from its catalog policy.

mod decode;
mod disasm;
mod encode;
mod opcode;
mod value;

pub use decode::{decode, decode_with_limits, Decoded};
pub use disasm::{disasm, instructions, Argument, Instruction};
pub use encode::{encode, encode_with_limits};
pub use opcode::{Opcode, Operand, Support};
pub use value::{
    Construction, Fields, Graph, Instance, Mapping, ObjId, Object, State, Value,
};

#[cfg(test)]
#[path = "../tests/decode_tests.rs"]
mod decode_tests;

#[cfg(test)]
#[path = "../tests/encode_tests.rs"]
mod encode_tests;
