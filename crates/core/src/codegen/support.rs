//! Expression atoms, code blocks and call/definition argument lists.

use crate::error::RenderError;
use crate::model::{Node, Term};
use crate::pickle::Value;
use crate::registry::NodeKind;
use crate::version::Schema;

use super::{unexpected, Cx};

pub(super) fn render(cx: &Cx, kind: NodeKind, node: &Node) -> Result<String, RenderError> {
    match kind {
        NodeKind::PyExpr | NodeKind::PyCode => Ok(node
            .source_text()
            .map(|text| text.into_owned())
            .unwrap_or_default()),
        NodeKind::ArgumentInfo => arguments(cx, node),
        NodeKind::ParameterInfo => parameters(cx, node),
        NodeKind::Signature => signature(cx, node),
        NodeKind::Parameter => parameter(cx, node),
        NodeKind::SubParse => Ok(cx.body(node.get("block"))?.unwrap_or_default()),
        other => Err(RenderError::UnsupportedNodeForVersion {
            kind: other.name().to_string(),
            schema: cx.schema,
        }),
    }
}

/// Source text of an expression-like term.
pub(crate) fn expr(cx: &Cx, term: &Term) -> Result<String, RenderError> {
    match term {
        Term::Prim(Value::Str(text)) => Ok(text.to_string()),
        Term::Prim(Value::Bytes(bytes)) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Term::Prim(Value::None) => Ok("None".to_string()),
        Term::Prim(Value::Bool(flag)) => Ok(if *flag { "True" } else { "False" }.to_string()),
        Term::Prim(Value::Int(value)) => Ok(value.to_string()),
        Term::Prim(Value::BigInt(value)) => Ok(value.to_string()),
        Term::Prim(Value::Float(value)) => Ok(format!("{value:?}")),
        Term::Node(node) => cx.node(node),
        other => Err(unexpected("an expression", other)),
    }
}

/// Text of an optional expression field.
pub(crate) fn opt_expr(cx: &Cx, node: &Node, field: &str) -> Result<Option<String>, RenderError> {
    match node.opt(field) {
        None => Ok(None),
        Some(term) => {
            let text = expr(cx, term)?;
            Ok((!text.is_empty()).then_some(text))
        }
    }
}

/// Comma separated expressions of a list field.
pub(crate) fn expr_list(cx: &Cx, node: &Node, field: &str) -> Result<String, RenderError> {
    let parts = node
        .seq(field)?
        .iter()
        .map(|term| expr(cx, term))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(", "))
}

/// Renders an argument list node, or an empty string for `None`.
pub(crate) fn call_args(cx: &Cx, node: &Node, field: &str) -> Result<String, RenderError> {
    match node.opt(field) {
        None => Ok(String::new()),
        Some(term) => expr(cx, term),
    }
}

fn arguments(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let starred = indexes(node, "starred_indexes");
    let doublestarred = indexes(node, "doublestarred_indexes");
    let mut parts = Vec::new();
    for (index, argument) in node.seq("arguments")?.iter().enumerate() {
        let pair = argument
            .as_seq()
            .filter(|pair| pair.len() == 2)
            .ok_or_else(|| node.malformed("arguments", "a list of (name, expression) pairs"))?;
        let value = expr(cx, &pair[1])?;
        let value = if starred.contains(&(index as i64)) {
            format!("*{value}")
        } else if doublestarred.contains(&(index as i64)) {
            format!("**{value}")
        } else {
            value
        };
        match pair[0].as_text() {
            Some(name) if !pair[0].is_none() => parts.push(format!("{name}={value}")),
            _ => parts.push(value),
        }
    }
    if cx.schema == Schema::Legacy {
        if let Some(extrapos) = opt_expr(cx, node, "extrapos")? {
            parts.push(format!("*{extrapos}"));
        }
        if let Some(extrakw) = opt_expr(cx, node, "extrakw")? {
            parts.push(format!("**{extrakw}"));
        }
    }
    Ok(format!("({})", parts.join(", ")))
}

fn indexes(node: &Node, field: &str) -> Vec<i64> {
    match node.opt(field) {
        Some(Term::Set(items)) | Some(Term::List(items)) | Some(Term::Tuple(items)) => {
            items.iter().filter_map(Term::as_int).collect()
        }
        _ => Vec::new(),
    }
}

fn parameters(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let positional: Vec<String> = node
        .seq("positional")?
        .iter()
        .filter_map(|name| name.as_text().map(|name| name.into_owned()))
        .collect();
    let mut leading = Vec::new();
    let mut named = Vec::new();
    for parameter in node.seq("parameters")? {
        let pair = parameter
            .as_seq()
            .filter(|pair| pair.len() == 2)
            .ok_or_else(|| node.malformed("parameters", "a list of (name, default) pairs"))?;
        let name = pair[0]
            .as_text()
            .ok_or_else(|| node.malformed("parameters", "a list of (name, default) pairs"))?;
        let rendered = if pair[1].is_none() {
            name.to_string()
        } else {
            format!("{name}={}", expr(cx, &pair[1])?)
        };
        if positional.iter().any(|p| *p == name) {
            leading.push(rendered);
        } else {
            named.push(rendered);
        }
    }
    let mut parts = leading;
    let extrapos = node.text("extrapos")?;
    if let Some(extrapos) = &extrapos {
        parts.push(format!("*{extrapos}"));
    }
    if !named.is_empty() {
        if extrapos.is_none() {
            parts.push("*".to_string());
        }
        parts.extend(named);
    }
    if let Some(extrakw) = node.text("extrakw")? {
        parts.push(format!("**{extrakw}"));
    }
    Ok(format!("({})", parts.join(", ")))
}

const POSITIONAL_ONLY: i64 = 0;
const VAR_POSITIONAL: i64 = 2;
const KEYWORD_ONLY: i64 = 3;
const VAR_KEYWORD: i64 = 4;

fn signature(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let params: Vec<&Node> = match node.opt("parameters") {
        None => Vec::new(),
        Some(Term::Dict(entries)) => entries.iter().filter_map(|(_, v)| v.as_node()).collect(),
        Some(Term::List(items)) | Some(Term::Tuple(items)) => {
            items.iter().filter_map(Term::as_node).collect()
        }
        Some(_) => return Err(node.malformed("parameters", "a mapping of parameters")),
    };
    let mut parts = Vec::new();
    let mut previous = None;
    for param in params {
        let kind = param.int("kind")?.unwrap_or(1);
        if previous == Some(POSITIONAL_ONLY) && kind != POSITIONAL_ONLY {
            parts.push("/".to_string());
        }
        if kind == KEYWORD_ONLY && !matches!(previous, Some(VAR_POSITIONAL) | Some(KEYWORD_ONLY)) {
            parts.push("*".to_string());
        }
        parts.push(parameter(cx, param)?);
        previous = Some(kind);
    }
    if previous == Some(POSITIONAL_ONLY) {
        parts.push("/".to_string());
    }
    Ok(format!("({})", parts.join(", ")))
}

fn parameter(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let name = node.require_text("name")?;
    let prefix = match node.int("kind")? {
        Some(VAR_POSITIONAL) => "*",
        Some(VAR_KEYWORD) => "**",
        _ => "",
    };
    match opt_expr(cx, node, "default")? {
        Some(default) => Ok(format!("{prefix}{name}={default}")),
        None => Ok(format!("{prefix}{name}")),
    }
}

/// `hide` target: the name plus the layer it is hidden on.
pub(crate) fn imspec_hide(cx: &Cx, imspec: &[Term]) -> Result<String, RenderError> {
    let spec = Imspec::parse(imspec)?;
    let name = spec.name(cx)?;
    match spec.layer.filter(|t| t.is_truthy()) {
        Some(layer) => Ok(format!("{name} onlayer {}", expr(cx, layer)?)),
        None => Ok(name),
    }
}

/// Full image specification with layer, transforms, tag and ordering.
pub(crate) fn imspec_expr(cx: &Cx, imspec: &[Term]) -> Result<String, RenderError> {
    let spec = Imspec::parse(imspec)?;
    let mut parts = vec![spec.name(cx)?];
    if let Some(layer) = spec.layer.filter(|t| t.is_truthy()) {
        parts.push(format!("onlayer {}", expr(cx, layer)?));
    }
    if let Some(at) = spec.at_list.and_then(Term::as_seq).filter(|s| !s.is_empty()) {
        let at = at.iter().map(|t| expr(cx, t)).collect::<Result<Vec<_>, _>>()?;
        parts.push(format!("at {}", at.join(", ")));
    }
    if let Some(tag) = spec.tag.filter(|t| t.is_truthy()) {
        parts.push(format!("as {}", expr(cx, tag)?));
    }
    if let Some(zorder) = spec.zorder.filter(|t| t.is_truthy()) {
        parts.push(format!("zorder {}", expr(cx, zorder)?));
    }
    if let Some(behind) = spec.behind.and_then(Term::as_seq).filter(|s| !s.is_empty()) {
        let behind = behind.iter().map(|t| expr(cx, t)).collect::<Result<Vec<_>, _>>()?;
        parts.push(format!("behind {}", behind.join(", ")));
    }
    Ok(parts.join(" "))
}

/// `(name, at_list, layer)` or `(name, expression, tag, at_list, layer,
/// zorder[, behind])`.
struct Imspec<'a> {
    name: &'a Term,
    expression: Option<&'a Term>,
    tag: Option<&'a Term>,
    at_list: Option<&'a Term>,
    layer: Option<&'a Term>,
    zorder: Option<&'a Term>,
    behind: Option<&'a Term>,
}

impl<'a> Imspec<'a> {
    fn parse(items: &'a [Term]) -> Result<Self, RenderError> {
        match items.len() {
            3 => Ok(Self {
                name: &items[0],
                expression: None,
                tag: None,
                at_list: Some(&items[1]),
                layer: Some(&items[2]),
                zorder: None,
                behind: None,
            }),
            6 | 7 => Ok(Self {
                name: &items[0],
                expression: Some(&items[1]),
                tag: Some(&items[2]),
                at_list: Some(&items[3]),
                layer: Some(&items[4]),
                zorder: Some(&items[5]),
                behind: items.get(6),
            }),
            _ => Err(RenderError::UnexpectedClass {
                expected: "an image specification of 3, 6 or 7 items",
                found: format!("{} items", items.len()),
            }),
        }
    }

    fn name(&self, cx: &Cx) -> Result<String, RenderError> {
        if let Some(expression) = self.expression.filter(|t| t.is_truthy()) {
            return Ok(format!("expression {}", expr(cx, expression)?));
        }
        image_name(self.name)
    }
}

/// Space separated words of an image name tuple.
pub(crate) fn image_name(term: &Term) -> Result<String, RenderError> {
    match term {
        Term::Tuple(words) | Term::List(words) => Ok(words
            .iter()
            .filter_map(|word| word.as_text().map(|w| w.into_owned()))
            .collect::<Vec<_>>()
            .join(" ")),
        other => other
            .as_text()
            .map(|text| text.into_owned())
            .ok_or_else(|| unexpected("an image name", other)),
    }
}
