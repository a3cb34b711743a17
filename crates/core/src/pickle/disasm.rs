use std::fmt::Write as _;

use crate::error::DecodeError;

use super::opcode::{Opcode, Operand, Reader};

/// One decoded instruction. Nothing is executed, so forbidden opcodes are
/// listed like any other.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: Opcode,
    pub argument: Argument,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Argument {
    None,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Global { module: String, name: String },
}

impl std::fmt::Display for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Argument::None => Ok(()),
            Argument::Int(value) => write!(f, "{value}"),
            Argument::Float(value) => write!(f, "{value:?}"),
            Argument::Text(text) => write!(f, "{text:?}"),
            Argument::Bytes(bytes) => {
                f.write_str("b'")?;
                for &byte in bytes {
                    match byte {
                        b'\'' | b'\\' => write!(f, "\\{}", byte as char)?,
                        0x20..=0x7e => write!(f, "{}", byte as char)?,
                        _ => write!(f, "\\x{byte:02x}")?,
                    }
                }
                f.write_str("'")
            }
            Argument::Global { module, name } => write!(f, "{module} {name}"),
        }
    }
}

/// Splits a stream into instructions up to and including `STOP`.
pub fn instructions(input: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut reader = Reader::new(input);
    let mut out = Vec::new();
    loop {
        let offset = reader.pos();
        let byte = reader.u8(offset, "STOP")?;
        let opcode = Opcode::from_byte(byte).ok_or_else(|| DecodeError::UnsupportedOpcode {
            offset,
            opcode: format!("0x{byte:02x}"),
        })?;
        let name = opcode.name();
        let argument = match opcode.operand() {
            Operand::None => Argument::None,
            Operand::U1 => Argument::Int(i64::from(reader.u8(offset, name)?)),
            Operand::U2 => Argument::Int(i64::from(reader.u16(offset, name)?)),
            Operand::I4 => Argument::Int(i64::from(reader.i32(offset, name)?)),
            Operand::U4 => Argument::Int(i64::from(reader.u32(offset, name)?)),
            Operand::U8 => Argument::Int(reader.u64(offset, name)? as i64),
            Operand::F8 => Argument::Float(reader.f64_be(offset, name)?),
            Operand::Line => Argument::Text(lossy(reader.line(offset, name)?)),
            Operand::Lines2 => Argument::Global {
                module: lossy(reader.line(offset, name)?),
                name: lossy(reader.line(offset, name)?),
            },
            Operand::Sized1 => {
                let len = usize::from(reader.u8(offset, name)?);
                payload(opcode, reader.take(len, offset, name)?)
            }
            Operand::Sized4 => {
                let len = reader.u32(offset, name)? as usize;
                payload(opcode, reader.take(len, offset, name)?)
            }
            Operand::Sized8 => {
                let len = usize::try_from(reader.u64(offset, name)?).map_err(|_| {
                    DecodeError::TruncatedStream {
                        offset,
                        opcode: name,
                        needed: usize::MAX,
                    }
                })?;
                payload(opcode, reader.take(len, offset, name)?)
            }
        };
        out.push(Instruction {
            offset,
            opcode,
            argument,
        });
        if opcode == Opcode::Stop {
            return Ok(out);
        }
    }
}

/// Human-readable listing, one instruction per line, indented between each
/// `MARK` and the opcode that consumes it.
pub fn disasm(input: &[u8]) -> Result<String, DecodeError> {
    let mut text = String::new();
    let mut depth = 0usize;
    for instruction in instructions(input)? {
        if consumes_mark(instruction.opcode) {
            depth = depth.saturating_sub(1);
        }
        let _ = write!(
            text,
            "{:6}: {:indent$}{}",
            instruction.offset,
            "",
            instruction.opcode.name(),
            indent = depth * 4,
        );
        if instruction.argument != Argument::None {
            let _ = write!(text, " {}", instruction.argument);
        }
        text.push('\n');
        if instruction.opcode == Opcode::Mark {
            depth += 1;
        }
    }
    Ok(text)
}

fn consumes_mark(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::PopMark
            | Opcode::List
            | Opcode::Tuple
            | Opcode::Dict
            | Opcode::Appends
            | Opcode::SetItems
            | Opcode::AddItems
            | Opcode::FrozenSet
            | Opcode::Inst
            | Opcode::Obj
    )
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn payload(opcode: Opcode, bytes: &[u8]) -> Argument {
    match opcode {
        Opcode::Long1 | Opcode::Long4 => {
            let value = num_bigint::BigInt::from_signed_bytes_le(bytes);
            Argument::Text(value.to_string())
        }
        Opcode::BinUnicode | Opcode::ShortBinUnicode | Opcode::BinUnicode8 => {
            Argument::Text(lossy(bytes))
        }
        _ => Argument::Bytes(bytes.to_vec()),
    }
}
