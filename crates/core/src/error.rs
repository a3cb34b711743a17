use miette::Diagnostic;
use thiserror::Error;

use crate::version::Schema;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification shared by every error raised in this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Stream,
    Registry,
    Render,
    Encode,
    Index,
    Interchange,
    Catalog,
}

#[derive(Debug, Error, Diagnostic)]
pub enum DecodeError {
    #[error("input is empty")]
    #[diagnostic(code("rpyc.empty_stream"))]
    EmptyStream,
    #[error("stream truncated at offset {offset}: {opcode} needs {needed} more byte(s)")]
    #[diagnostic(code("rpyc.truncated_stream"))]
    TruncatedStream {
        offset: usize,
        opcode: &'static str,
        needed: usize,
    },
    #[error("stack underflow at offset {offset} while executing {opcode}")]
    #[diagnostic(code("rpyc.stack_underflow"))]
    StackUnderflow { offset: usize, opcode: &'static str },
    #[error("{opcode} at offset {offset} found no MARK")]
    #[diagnostic(code("rpyc.missing_mark"))]
    MissingMark { offset: usize, opcode: &'static str },
    #[error("back-reference slot {slot} fetched at offset {offset} was never recorded")]
    #[diagnostic(code("rpyc.dangling_back_reference"))]
    DanglingBackReference { offset: usize, slot: u64 },
    #[error("class `{name}` at offset {offset} is not in the catalog")]
    #[diagnostic(
        code("rpyc.unknown_class"),
        help("extend the class catalog with an entry for this name")
    )]
    UnknownClass { offset: usize, name: String },
    #[error("forbidden opcode {opcode} at offset {offset}: {reason}")]
    #[diagnostic(code("rpyc.forbidden_opcode"))]
    ForbiddenOpcode {
        offset: usize,
        opcode: &'static str,
        reason: String,
    },
    #[error("unsupported opcode {opcode} at offset {offset}")]
    #[diagnostic(code("rpyc.unsupported_opcode"))]
    UnsupportedOpcode { offset: usize, opcode: String },
    #[error("invalid operand for {opcode} at offset {offset}: {reason}")]
    #[diagnostic(code("rpyc.invalid_operand"))]
    InvalidOperand {
        offset: usize,
        opcode: &'static str,
        reason: String,
    },
    #[error("limit `{limit}` ({max}) exceeded at offset {offset}")]
    #[diagnostic(code("rpyc.limit_exceeded"))]
    LimitExceeded {
        offset: usize,
        limit: &'static str,
        max: usize,
    },
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::UnknownClass { .. } => ErrorKind::Registry,
            _ => ErrorKind::Stream,
        }
    }

    /// Byte offset of the opcode that failed, if the failure is tied to one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            DecodeError::EmptyStream => None,
            DecodeError::TruncatedStream { offset, .. }
            | DecodeError::StackUnderflow { offset, .. }
            | DecodeError::MissingMark { offset, .. }
            | DecodeError::DanglingBackReference { offset, .. }
            | DecodeError::UnknownClass { offset, .. }
            | DecodeError::ForbiddenOpcode { offset, .. }
            | DecodeError::UnsupportedOpcode { offset, .. }
            | DecodeError::InvalidOperand { offset, .. }
            | DecodeError::LimitExceeded { offset, .. } => Some(*offset),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("class `{name}` is not registered")]
    #[diagnostic(code("rpyc.not_registered"))]
    NotRegistered { name: String },
}

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("failed to parse class catalog: {0}")]
    #[diagnostic(code("catalog.parse_error"))]
    Parse(#[from] toml::de::Error),
    #[error("class `{name}` is already registered")]
    #[diagnostic(code("catalog.duplicate"), help("catalog extension is append-only"))]
    Duplicate { name: String },
    #[error("invalid catalog entry `{name}`: {reason}")]
    #[diagnostic(code("catalog.invalid_entry"))]
    InvalidEntry { name: String, reason: String },
    #[error("catalog section `{name}` does not exist")]
    #[diagnostic(code("catalog.unknown_section"))]
    UnknownSection { name: String },
}

#[derive(Debug, Error, Diagnostic)]
pub enum RenderError {
    #[error("no rendering rule for `{kind}` under the {schema} schema")]
    #[diagnostic(code("render.unsupported_node"))]
    UnsupportedNodeForVersion { kind: String, schema: Schema },
    #[error("`{kind}` uses `{feature}`, which the {schema} schema cannot express")]
    #[diagnostic(code("render.unsupported_feature"))]
    UnsupportedFeature {
        kind: String,
        feature: &'static str,
        schema: Schema,
    },
    #[error("`{class}` is missing field `{field}`")]
    #[diagnostic(code("render.missing_field"))]
    MissingField { class: String, field: String },
    #[error("field `{field}` of `{class}` is not {expected}")]
    #[diagnostic(code("render.malformed_field"))]
    MalformedField {
        class: String,
        field: String,
        expected: &'static str,
    },
    #[error("expected {expected}, found `{found}`")]
    #[diagnostic(code("render.unexpected_class"))]
    UnexpectedClass {
        expected: &'static str,
        found: String,
    },
    #[error("block nesting deeper than {max}")]
    #[diagnostic(code("render.depth_exceeded"))]
    DepthExceeded { max: usize },
    #[error("`{class}` contains itself as a child block")]
    #[diagnostic(code("render.cyclic_block"))]
    CyclicBlock { class: String },
}

#[derive(Debug, Error, Diagnostic)]
pub enum EncodeError {
    #[error("value cannot be encoded: {reason}")]
    #[diagnostic(code("encode.unencodable_value"))]
    UnencodableValue { reason: String },
    #[error("object #{id} is not part of the graph")]
    #[diagnostic(code("encode.dangling_object"))]
    DanglingObject { id: u32 },
    #[error("`{class}` is reachable from its own constructor arguments")]
    #[diagnostic(code("encode.recursive_constructor"))]
    RecursiveConstructor { class: String },
    #[error("object nesting exceeds the limit of {max}")]
    #[diagnostic(code("encode.depth_exceeded"))]
    DepthExceeded { max: usize },
}

#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Decode(#[from] DecodeError),
    #[error("malformed archive index entry `{entry}`: {reason}")]
    #[diagnostic(code("archive.malformed_index"))]
    MalformedIndex { entry: String, reason: String },
}

#[derive(Debug, Error, Diagnostic)]
pub enum InterchangeError {
    #[error("malformed interchange value at {path}: {reason}")]
    #[diagnostic(code("interchange.malformed"))]
    Malformed { path: String, reason: String },
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),
    #[error("`$ref` {id} at {path} does not name an earlier `$id`")]
    #[diagnostic(code("interchange.dangling_ref"))]
    DanglingRef { path: String, id: u64 },
    #[error("object nesting at {path} exceeds the limit of {max}")]
    #[diagnostic(code("interchange.depth_exceeded"))]
    DepthExceeded { path: String, max: usize },
}

/// Union of every failure the library can report.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Interchange(#[from] InterchangeError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Decode(err) => err.kind(),
            Error::Registry(_) => ErrorKind::Registry,
            Error::Catalog(_) => ErrorKind::Catalog,
            Error::Render(_) => ErrorKind::Render,
            Error::Encode(_) => ErrorKind::Encode,
            Error::Index(_) => ErrorKind::Index,
            Error::Interchange(_) => ErrorKind::Interchange,
        }
    }
}
