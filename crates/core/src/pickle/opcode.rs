use crate::error::DecodeError;

/// Inline operand layout following an opcode tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    None,
    U1,
    U2,
    I4,
    U4,
    U8,
    F8,
    /// Newline-terminated text.
    Line,
    /// Two newline-terminated texts (module, name).
    Lines2,
    /// Payload prefixed by a 1-byte length.
    Sized1,
    /// Payload prefixed by a 4-byte little-endian length.
    Sized4,
    /// Payload prefixed by an 8-byte little-endian length.
    Sized8,
}

/// Whether the decoder executes, rejects or does not implement an opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Support {
    Allowed,
    /// Would run producer code or reach outside the stream.
    Forbidden,
    Unsupported,
}

macro_rules! opcodes {
    ($($variant:ident = $byte:literal, $name:literal, $operand:ident, $support:ident;)*) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $($byte => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn byte(self) -> u8 {
                match self {
                    $(Opcode::$variant => $byte,)*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            pub fn operand(self) -> Operand {
                match self {
                    $(Opcode::$variant => Operand::$operand,)*
                }
            }

            pub fn support(self) -> Support {
                match self {
                    $(Opcode::$variant => Support::$support,)*
                }
            }
        }
    };
}

opcodes! {
    Mark = b'(', "MARK", None, Allowed;
    Stop = b'.', "STOP", None, Allowed;
    Pop = b'0', "POP", None, Allowed;
    PopMark = b'1', "POP_MARK", None, Allowed;
    Dup = b'2', "DUP", None, Allowed;
    Float = b'F', "FLOAT", Line, Allowed;
    Int = b'I', "INT", Line, Allowed;
    BinInt = b'J', "BININT", I4, Allowed;
    BinInt1 = b'K', "BININT1", U1, Allowed;
    Long = b'L', "LONG", Line, Allowed;
    BinInt2 = b'M', "BININT2", U2, Allowed;
    None = b'N', "NONE", None, Allowed;
    PersId = b'P', "PERSID", Line, Forbidden;
    BinPersId = b'Q', "BINPERSID", None, Forbidden;
    Reduce = b'R', "REDUCE", None, Allowed;
    String = b'S', "STRING", Line, Allowed;
    BinString = b'T', "BINSTRING", Sized4, Allowed;
    ShortBinString = b'U', "SHORT_BINSTRING", Sized1, Allowed;
    Unicode = b'V', "UNICODE", Line, Allowed;
    BinUnicode = b'X', "BINUNICODE", Sized4, Allowed;
    Append = b'a', "APPEND", None, Allowed;
    Build = b'b', "BUILD", None, Allowed;
    Global = b'c', "GLOBAL", Lines2, Allowed;
    Dict = b'd', "DICT", None, Allowed;
    EmptyDict = b'}', "EMPTY_DICT", None, Allowed;
    Appends = b'e', "APPENDS", None, Allowed;
    Get = b'g', "GET", Line, Allowed;
    BinGet = b'h', "BINGET", U1, Allowed;
    Inst = b'i', "INST", Lines2, Forbidden;
    LongBinGet = b'j', "LONG_BINGET", U4, Allowed;
    List = b'l', "LIST", None, Allowed;
    EmptyList = b']', "EMPTY_LIST", None, Allowed;
    Obj = b'o', "OBJ", None, Forbidden;
    Put = b'p', "PUT", Line, Allowed;
    BinPut = b'q', "BINPUT", U1, Allowed;
    LongBinPut = b'r', "LONG_BINPUT", U4, Allowed;
    SetItem = b's', "SETITEM", None, Allowed;
    Tuple = b't', "TUPLE", None, Allowed;
    EmptyTuple = b')', "EMPTY_TUPLE", None, Allowed;
    SetItems = b'u', "SETITEMS", None, Allowed;
    BinFloat = b'G', "BINFLOAT", F8, Allowed;
    Proto = 0x80, "PROTO", U1, Allowed;
    NewObj = 0x81, "NEWOBJ", None, Allowed;
    Ext1 = 0x82, "EXT1", U1, Unsupported;
    Ext2 = 0x83, "EXT2", U2, Unsupported;
    Ext4 = 0x84, "EXT4", I4, Unsupported;
    Tuple1 = 0x85, "TUPLE1", None, Allowed;
    Tuple2 = 0x86, "TUPLE2", None, Allowed;
    Tuple3 = 0x87, "TUPLE3", None, Allowed;
    NewTrue = 0x88, "NEWTRUE", None, Allowed;
    NewFalse = 0x89, "NEWFALSE", None, Allowed;
    Long1 = 0x8a, "LONG1", Sized1, Allowed;
    Long4 = 0x8b, "LONG4", Sized4, Allowed;
    BinBytes = b'B', "BINBYTES", Sized4, Allowed;
    ShortBinBytes = b'C', "SHORT_BINBYTES", Sized1, Allowed;
    ShortBinUnicode = 0x8c, "SHORT_BINUNICODE", Sized1, Allowed;
    BinUnicode8 = 0x8d, "BINUNICODE8", Sized8, Allowed;
    BinBytes8 = 0x8e, "BINBYTES8", Sized8, Allowed;
    EmptySet = 0x8f, "EMPTY_SET", None, Allowed;
    AddItems = 0x90, "ADDITEMS", None, Allowed;
    FrozenSet = 0x91, "FROZENSET", None, Allowed;
    NewObjEx = 0x92, "NEWOBJ_EX", None, Allowed;
    StackGlobal = 0x93, "STACK_GLOBAL", None, Allowed;
    Memoize = 0x94, "MEMOIZE", None, Allowed;
    Frame = 0x95, "FRAME", U8, Allowed;
    ByteArray8 = 0x96, "BYTEARRAY8", Sized8, Allowed;
    NextBuffer = 0x97, "NEXT_BUFFER", None, Unsupported;
    ReadonlyBuffer = 0x98, "READONLY_BUFFER", None, Unsupported;
}

/// Bounds-checked cursor over a byte stream. Every read reports the offset
/// of the opcode being decoded, not the position of the failing read.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn take(
        &mut self,
        len: usize,
        offset: usize,
        opcode: &'static str,
    ) -> Result<&'a [u8], DecodeError> {
        let remaining = self.data.len() - self.pos;
        if len > remaining {
            return Err(truncated(offset, opcode, len - remaining));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(
        &mut self,
        offset: usize,
        opcode: &'static str,
    ) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, offset, opcode)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self, offset: usize, opcode: &'static str) -> Result<u8, DecodeError> {
        Ok(self.array::<1>(offset, opcode)?[0])
    }

    pub(crate) fn u16(&mut self, offset: usize, opcode: &'static str) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array(offset, opcode)?))
    }

    pub(crate) fn i32(&mut self, offset: usize, opcode: &'static str) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array(offset, opcode)?))
    }

    pub(crate) fn u32(&mut self, offset: usize, opcode: &'static str) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array(offset, opcode)?))
    }

    pub(crate) fn u64(&mut self, offset: usize, opcode: &'static str) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array(offset, opcode)?))
    }

    pub(crate) fn f64_be(
        &mut self,
        offset: usize,
        opcode: &'static str,
    ) -> Result<f64, DecodeError> {
        Ok(f64::from_be_bytes(self.array(offset, opcode)?))
    }

    /// Reads up to (not including) the next `\n` and consumes the newline.
    pub(crate) fn line(
        &mut self,
        offset: usize,
        opcode: &'static str,
    ) -> Result<&'a [u8], DecodeError> {
        let rest = &self.data[self.pos..];
        let Some(end) = rest.iter().position(|&b| b == b'\n') else {
            return Err(truncated(offset, opcode, 1));
        };
        self.pos += end + 1;
        Ok(&rest[..end])
    }
}

#[cold]
#[inline(never)]
fn truncated(offset: usize, opcode: &'static str, needed: usize) -> DecodeError {
    DecodeError::TruncatedStream {
        offset,
        opcode,
        needed,
    }
}
