//! Typed view of a decoded script graph.
//!
//! [`lift`] turns the arena graph into an owned tree of [`Term`]s. Every
//! catalog class with a [`NodeKind`] becomes a [`Node`] tagged with that
//! kind; all of its fields are kept, including ones no renderer reads.
//! Back links between statements (`next`, `statement_start`, ...) are kept
//! as [`Link`]s instead of being followed.

mod lift;

use std::borrow::Cow;
use std::sync::Arc;

use crate::error::RenderError;
use crate::pickle::{ObjId, Value};
use crate::registry::{ClassDescriptor, NodeKind};
use crate::version::Schema;

pub use lift::{lift, lift_with_limits};

#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    /// Any non-reference value, including class references.
    Prim(Value),
    List(Vec<Term>),
    Tuple(Vec<Term>),
    Dict(Vec<(Term, Term)>),
    Set(Vec<Term>),
    ByteArray(Vec<u8>),
    Node(Box<Node>),
    Link(Link),
}

/// A reference to another statement that is rendered elsewhere.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub id: ObjId,
    pub kind: Option<NodeKind>,
}

/// Source position and nesting of a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Meta {
    pub filename: Option<String>,
    pub linenumber: Option<i64>,
    /// Number of enclosing nodes at lift time.
    pub depth: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: ObjId,
    pub class: Arc<ClassDescriptor>,
    pub kind: Option<NodeKind>,
    pub schema: Schema,
    pub meta: Meta,
    /// Dict state, slot state and named constructor arguments, merged.
    pub fields: Vec<(Arc<str>, Term)>,
    /// Constructor arguments the catalog has no name for.
    pub extra_args: Vec<Term>,
    /// `BUILD` state that was not a field mapping.
    pub state: Option<Term>,
    pub items: Vec<Term>,
    pub entries: Vec<(Term, Term)>,
}

impl Term {
    pub fn none() -> Self {
        Term::Prim(Value::None)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Term::Prim(Value::None))
    }

    /// Python truthiness as the renderers need it.
    pub fn is_truthy(&self) -> bool {
        match self {
            Term::Prim(value) => value.is_truthy(),
            Term::List(items) | Term::Tuple(items) | Term::Set(items) => !items.is_empty(),
            Term::Dict(entries) => !entries.is_empty(),
            Term::ByteArray(bytes) => !bytes.is_empty(),
            Term::Node(node) => match node.kind {
                Some(NodeKind::PyExpr) => node
                    .text("expr")
                    .ok()
                    .flatten()
                    .is_some_and(|text| !text.is_empty()),
                _ => true,
            },
            Term::Link(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Term::Prim(value) => value.as_str(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Term::Prim(value) => value.as_int(),
            _ => None,
        }
    }

    /// Source text of a string, an expression atom or a code block.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Term::Prim(Value::Str(text)) => Some(Cow::Borrowed(text)),
            Term::Prim(Value::Bytes(bytes)) => Some(String::from_utf8_lossy(bytes)),
            Term::Node(node) => node.source_text(),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Term::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Term]> {
        match self {
            Term::List(items) | Term::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<NodeKind> {
        match self {
            Term::Node(node) => node.kind,
            Term::Link(link) => link.kind,
            _ => None,
        }
    }
}

impl Node {
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.fields
            .iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, term)| term)
    }

    /// The field, unless it is absent or `None`.
    pub fn opt(&self, name: &str) -> Option<&Term> {
        self.get(name).filter(|term| !term.is_none())
    }

    pub fn require(&self, name: &str) -> Result<&Term, RenderError> {
        self.opt(name).ok_or_else(|| RenderError::MissingField {
            class: self.class.qualified().to_string(),
            field: name.to_string(),
        })
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get(name).is_some_and(Term::is_truthy)
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>, RenderError> {
        match self.opt(name) {
            None => Ok(None),
            Some(term) => term
                .as_int()
                .map(Some)
                .ok_or_else(|| self.malformed(name, "an integer")),
        }
    }

    /// Text of a string or expression field; absent, `None` and empty
    /// strings are all `None`.
    pub fn text(&self, name: &str) -> Result<Option<Cow<'_, str>>, RenderError> {
        match self.opt(name) {
            None => Ok(None),
            Some(term) => match term.as_text() {
                Some(text) if text.is_empty() => Ok(None),
                Some(text) => Ok(Some(text)),
                None => Err(self.malformed(name, "text")),
            },
        }
    }

    pub fn require_text(&self, name: &str) -> Result<Cow<'_, str>, RenderError> {
        self.text(name)?.ok_or_else(|| RenderError::MissingField {
            class: self.class.qualified().to_string(),
            field: name.to_string(),
        })
    }

    /// Elements of a list or tuple field; absent or `None` is empty.
    pub fn seq(&self, name: &str) -> Result<&[Term], RenderError> {
        match self.opt(name) {
            None => Ok(&[]),
            Some(term) => term.as_seq().ok_or_else(|| self.malformed(name, "a sequence")),
        }
    }

    pub fn node(&self, name: &str) -> Result<Option<&Node>, RenderError> {
        match self.opt(name) {
            None => Ok(None),
            Some(Term::Node(node)) => Ok(Some(node)),
            Some(_) => Err(self.malformed(name, "a node")),
        }
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        match self.get(name) {
            Some(Term::Link(link)) => Some(link),
            _ => None,
        }
    }

    pub fn class_name(&self) -> &str {
        self.class.qualified()
    }

    pub fn malformed(&self, field: &str, expected: &'static str) -> RenderError {
        RenderError::MalformedField {
            class: self.class.qualified().to_string(),
            field: field.to_string(),
            expected,
        }
    }

    /// Text carried by expression atoms and code blocks.
    pub fn source_text(&self) -> Option<Cow<'_, str>> {
        match self.kind? {
            NodeKind::PyExpr => self.get("expr").and_then(Term::as_text),
            // Code blocks pickle as `(version, source, location, mode, py)`.
            NodeKind::PyCode => {
                let source = match self.state.as_ref() {
                    Some(Term::Tuple(parts)) => parts.get(1),
                    _ => self.get("source"),
                };
                source.and_then(Term::as_text)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "../tests/model_tests.rs"]
mod tests;
