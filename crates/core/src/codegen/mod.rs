//! Script source generation.
//!
//! Rendering is a pure function of `(term, schema, indent)`. Each node kind
//! is looked up in [`supports`] first, so a kind without a rule for the
//! requested schema fails with `UnsupportedNodeForVersion` instead of being
//! rendered with another schema's rule.

mod atl;
mod screen;
mod stmt;
mod support;
mod text;

use crate::error::RenderError;
use crate::model::{Node, Term};
use crate::registry::{Family, NodeKind};
use crate::version::Schema;

pub use text::{encode_say_string, indent};

/// Renders a statement list or a single node, indented by `indent` levels.
pub fn generate(term: &Term, schema: Schema, indent: usize) -> Result<String, RenderError> {
    let cx = Cx { schema };
    let code = match term {
        Term::List(items) => cx.block(items)?,
        Term::Node(node) => cx.node(node)?,
        other => return Err(unexpected("a statement or statement list", other)),
    };
    Ok(text::indent(&code, indent, schema))
}

/// Whether `kind` has a rendering rule under `schema`.
pub fn supports(kind: NodeKind, schema: Schema) -> bool {
    match schema {
        Schema::Current => true,
        Schema::Legacy => !matches!(
            kind,
            NodeKind::ShowLayer
                | NodeKind::TranslateBlock
                | NodeKind::TranslateEarlyBlock
                | NodeKind::TranslateSay
                | NodeKind::AtlContainsExpr
                | NodeKind::AtlTime
                | NodeKind::AtlEvent
                | NodeKind::SlShowIf
                | NodeKind::Signature
                | NodeKind::Parameter
        ),
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Cx {
    pub(crate) schema: Schema,
}

/// Statements folded into a menu header by the block walker.
#[derive(Clone, Copy, Default)]
pub(crate) struct MenuContext<'a> {
    pub(crate) label: Option<&'a Node>,
    pub(crate) caption: Option<&'a Node>,
}

impl Cx {
    pub(crate) fn indent(&self, code: &str) -> String {
        text::indent(code, 1, self.schema)
    }

    /// `head:` followed by the indented body, or just `head` without one.
    pub(crate) fn labeled(&self, head: &str, body: Option<String>) -> String {
        match body {
            Some(body) if !body.is_empty() => format!("{head}:\n{}", self.indent(&body)),
            _ => head.to_string(),
        }
    }

    /// `head:` and the body, with `pass` standing in for an empty one.
    pub(crate) fn suite(&self, head: &str, term: Option<&Term>) -> Result<String, RenderError> {
        let body = self
            .body(term)?
            .filter(|body| !body.is_empty())
            .unwrap_or_else(|| "pass".to_string());
        Ok(format!("{head}:\n{}", self.indent(&body)))
    }

    /// Renders one node after checking the kind/schema table.
    pub(crate) fn node(&self, node: &Node) -> Result<String, RenderError> {
        let Some(kind) = node.kind else {
            return Err(RenderError::UnexpectedClass {
                expected: "a script node",
                found: node.class_name().to_string(),
            });
        };
        if !supports(kind, self.schema) || node.class.only_in(other(self.schema)) {
            return Err(RenderError::UnsupportedNodeForVersion {
                kind: kind.name().to_string(),
                schema: self.schema,
            });
        }
        match kind.family() {
            Family::Statement => stmt::render(self, kind, node),
            Family::Atl => atl::render(self, kind, node),
            Family::Screen => screen::render(self, kind, node),
            Family::Support => support::render(self, kind, node),
        }
    }

    /// Renders any term that stands for a block: a statement list, a single
    /// node, or `None` (an empty block).
    pub(crate) fn body(&self, term: Option<&Term>) -> Result<Option<String>, RenderError> {
        match term {
            None => Ok(None),
            Some(Term::List(items)) | Some(Term::Tuple(items)) if items.is_empty() => Ok(None),
            Some(Term::List(items)) | Some(Term::Tuple(items)) => self.block(items).map(Some),
            Some(Term::Node(node)) => self.node(node).map(Some),
            Some(term) if term.is_none() => Ok(None),
            Some(other) => Err(unexpected("a block", other)),
        }
    }

    /// Walks a statement list, folding the multi-statement patterns the
    /// compiler splits apart back into single source statements.
    pub(crate) fn block(&self, items: &[Term]) -> Result<String, RenderError> {
        let mut lines: Vec<String> = Vec::with_capacity(items.len());
        let mut index = 0;
        while index < items.len() {
            let item = &items[index];
            let Term::Node(node) = item else {
                if item.is_none() {
                    lines.push("pass".to_string());
                    index += 1;
                    continue;
                }
                return Err(unexpected("a statement", item));
            };
            let next = items.get(index + 1).and_then(Term::as_node);
            let after = items.get(index + 2).and_then(Term::as_node);
            match node.kind {
                Some(NodeKind::Say) if is(next, NodeKind::Menu) => {
                    let menu = self.checked(next)?;
                    let cx = MenuContext {
                        label: None,
                        caption: Some(node),
                    };
                    lines.push(stmt::menu(self, menu, cx)?);
                    index += 2;
                    continue;
                }
                Some(NodeKind::Label)
                    if (is(next, NodeKind::Say) || is(next, NodeKind::UserStatement))
                        && is(after, NodeKind::Menu) =>
                {
                    let menu = self.checked(after)?;
                    let cx = MenuContext {
                        label: Some(node),
                        caption: next,
                    };
                    lines.push(stmt::menu(self, menu, cx)?);
                    index += 3;
                    continue;
                }
                Some(NodeKind::Label) if is(next, NodeKind::Menu) => {
                    let menu = self.checked(next)?;
                    let cx = MenuContext {
                        label: Some(node),
                        caption: None,
                    };
                    lines.push(stmt::menu(self, menu, cx)?);
                    index += 2;
                    continue;
                }
                Some(NodeKind::With) => {
                    if let (Some(inner), Some(close)) = (next, after) {
                        if let Some(paired) = paired_with(node, close)? {
                            let code = self.node(inner)?;
                            lines.push(text::append_first_line(&code, &format!(" with {paired}")));
                            index += 3;
                            continue;
                        }
                    }
                }
                Some(NodeKind::Call) if is(next, NodeKind::Label) => {
                    let label = self.checked(next)?;
                    let from = label.require_text("name")?;
                    let code = self.node(node)?;
                    lines.push(format!("{code} from {from}"));
                    index += 2;
                    if items
                        .get(index)
                        .and_then(Term::as_node)
                        .is_some_and(|n| n.kind == Some(NodeKind::Pass))
                    {
                        index += 1;
                    }
                    continue;
                }
                Some(NodeKind::Return)
                    if items.len() > 1
                        && index + 1 == items.len()
                        && node.opt("expression").is_none() =>
                {
                    index += 1;
                    continue;
                }
                Some(NodeKind::EndTranslate) | Some(NodeKind::PostUserStatement) => {
                    index += 1;
                    continue;
                }
                _ => {}
            }
            lines.push(self.node(node)?);
            index += 1;
        }
        Ok(lines.join("\n"))
    }

    fn checked<'a>(&self, node: Option<&'a Node>) -> Result<&'a Node, RenderError> {
        node.ok_or(RenderError::UnexpectedClass {
            expected: "a following statement",
            found: "end of block".to_string(),
        })
    }
}

fn is(node: Option<&Node>, kind: NodeKind) -> bool {
    node.is_some_and(|node| node.kind == Some(kind))
}

fn other(schema: Schema) -> Schema {
    match schema {
        Schema::Legacy => Schema::Current,
        Schema::Current => Schema::Legacy,
    }
}

/// `with None` opening a `show x with dissolve` pair, closed by a `with`
/// whose expression is the pair's transition.
fn paired_with(open: &Node, close: &Node) -> Result<Option<String>, RenderError> {
    if close.kind != Some(NodeKind::With) {
        return Ok(None);
    }
    let expr = open.text("expr")?;
    if expr.as_deref().is_some_and(|expr| expr != "None") {
        return Ok(None);
    }
    let Some(paired) = open.text("paired")? else {
        return Ok(None);
    };
    match close.text("expr")? {
        Some(closing) if closing == paired => Ok(Some(paired.into_owned())),
        _ => Ok(None),
    }
}

pub(crate) fn unexpected(expected: &'static str, found: &Term) -> RenderError {
    let found = match found {
        Term::Node(node) => node.class_name().to_string(),
        Term::Prim(value) => value.type_name().to_string(),
        Term::List(_) => "list".to_string(),
        Term::Tuple(_) => "tuple".to_string(),
        Term::Dict(_) => "dict".to_string(),
        Term::Set(_) => "set".to_string(),
        Term::ByteArray(_) => "bytearray".to_string(),
        Term::Link(_) => "statement link".to_string(),
    };
    RenderError::UnexpectedClass { expected, found }
}

#[cfg(test)]
#[path = "../tests/codegen_tests.rs"]
mod tests;
