//! Screen language.

use crate::error::RenderError;
use crate::model::{Node, Term};
use crate::pickle::Value;
use crate::registry::NodeKind;

use super::stmt::conditional;
use super::support::{call_args, expr, opt_expr};
use super::text::properties;
use super::{unexpected, Cx};

/// Screen attributes kept as source text, with the value each one has when
/// the statement leaves it out.
const SCREEN_ATTRIBUTES: &[(&str, &str)] = &[
    ("modal", "False"),
    ("zorder", "0"),
    ("variant", "None"),
    ("predict", "None"),
    ("sensitive", "True"),
    ("roll_forward", "None"),
    ("layer", "'screens'"),
];

pub(super) fn render(cx: &Cx, kind: NodeKind, node: &Node) -> Result<String, RenderError> {
    match kind {
        NodeKind::SlScreen => screen(cx, node),
        NodeKind::SlDisplayable => displayable(cx, node),
        NodeKind::SlIf => conditional(cx, node, "if"),
        NodeKind::SlShowIf => conditional(cx, node, "showif"),
        NodeKind::SlFor => {
            let mut head = format!("for {}", node.require_text("variable")?);
            if let Some(index) = opt_expr(cx, node, "index_expression")? {
                head.push_str(&format!(" index {index}"));
            }
            head.push_str(&format!(" in {}", node.require_text("expression")?));
            let body = contents(cx, node)?;
            let body = if body.is_empty() { "pass".to_string() } else { body };
            Ok(format!("{head}:\n{}", cx.indent(&body)))
        }
        NodeKind::SlPython => {
            let code = opt_expr(cx, node, "code")?.unwrap_or_default();
            if code.trim().is_empty() {
                Ok("pass".to_string())
            } else if code.contains('\n') {
                Ok(format!("python:\n{}", cx.indent(&code)))
            } else {
                Ok(format!("$ {code}"))
            }
        }
        NodeKind::SlPass => Ok("pass".to_string()),
        NodeKind::SlDefault => Ok(format!(
            "default {} = {}",
            node.require_text("variable")?,
            expr(cx, node.require("expression")?)?
        )),
        NodeKind::SlUse => use_screen(cx, node),
        NodeKind::SlTransclude => Ok("transclude".to_string()),
        NodeKind::SlBlock => contents(cx, node),
        NodeKind::SlContinue => Ok("continue".to_string()),
        NodeKind::SlBreak => Ok("break".to_string()),
        other => Err(RenderError::UnsupportedNodeForVersion {
            kind: other.name().to_string(),
            schema: cx.schema,
        }),
    }
}

/// Keyword properties (one per line) followed by the children.
fn contents(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut parts = Vec::new();
    let keywords = keywords(cx, node)?;
    if !keywords.is_empty() {
        parts.push(properties(&keywords, true));
    }
    let children = node.seq("children")?;
    if !children.is_empty() {
        parts.push(cx.block(children)?);
    }
    Ok(parts.join("\n"))
}

fn keywords(cx: &Cx, node: &Node) -> Result<Vec<(String, Option<String>)>, RenderError> {
    let mut out = Vec::new();
    for keyword in node.seq("keyword")? {
        let Some([name, value]) = keyword.as_seq() else {
            return Err(node.malformed("keyword", "a list of (name, expression) pairs"));
        };
        let name = name
            .as_text()
            .ok_or_else(|| node.malformed("keyword", "a list of (name, expression) pairs"))?;
        let value = if value.is_none() {
            None
        } else {
            Some(expr(cx, value)?)
        };
        out.push((name.into_owned(), value));
    }
    Ok(out)
}

fn screen(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut head = "screen".to_string();
    if let Some(name) = node.text("name")? {
        head.push_str(&format!(" {name}{}", call_args(cx, node, "parameters")?));
    }
    let mut props = keywords(cx, node)?;
    if let Some(tag) = node.text("tag")? {
        props.push(("tag".to_string(), Some(tag.into_owned())));
    }
    for (attribute, default) in SCREEN_ATTRIBUTES {
        if let Some(value) = opt_expr(cx, node, attribute)? {
            if value != *default {
                props.push((attribute.to_string(), Some(value)));
            }
        }
    }
    let mut parts = Vec::new();
    if !props.is_empty() {
        parts.push(properties(&props, true));
    }
    let children = node.seq("children")?;
    if !children.is_empty() {
        parts.push(cx.block(children)?);
    }
    if parts.is_empty() {
        parts.push("pass".to_string());
    }
    Ok(format!("{head}:\n{}", cx.indent(&parts.join("\n"))))
}

fn displayable(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut head = displayable_name(node)?;
    match node.opt("positional") {
        None => {}
        Some(Term::List(items)) | Some(Term::Tuple(items)) => {
            for item in items {
                head.push(' ');
                head.push_str(&expr(cx, item)?);
            }
        }
        Some(single) => {
            head.push(' ');
            head.push_str(&expr(cx, single)?);
        }
    }
    let keywords = keywords(cx, node)?;
    let children = node.seq("children")?;
    if children.is_empty() {
        if !keywords.is_empty() {
            head.push(' ');
            head.push_str(&properties(&keywords, false));
        }
        return Ok(head);
    }
    let mut parts = Vec::new();
    if !keywords.is_empty() {
        parts.push(properties(&keywords, true));
    }
    parts.push(cx.block(children)?);
    Ok(format!("{head}:\n{}", cx.indent(&parts.join("\n"))))
}

/// Statement keyword of a displayable: its recorded name, or one derived
/// from the function the displayable is created with.
fn displayable_name(node: &Node) -> Result<String, RenderError> {
    if let Some(name) = node.text("name")? {
        return Ok(name.into_owned());
    }
    let function = match node.opt("displayable") {
        Some(Term::Prim(Value::Global(class))) => class.name().to_lowercase(),
        Some(other) => return Err(unexpected("a displayable function", other)),
        None => {
            return Err(RenderError::MissingField {
                class: node.class_name().to_string(),
                field: "displayable".to_string(),
            })
        }
    };
    let name = if let Some(stripped) = function.strip_prefix("sl2") {
        stripped.to_string()
    } else if function == "onevent" {
        "on".to_string()
    } else {
        function.replace('_', "")
    };
    if matches!(name.as_str(), "multibox" | "window") {
        if let Some(style) = node.text("style")? {
            return Ok(style.into_owned());
        }
    }
    Ok(name)
}

fn use_screen(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut head = "use".to_string();
    match node.opt("target") {
        Some(Term::Node(target)) if target.kind == Some(NodeKind::PyExpr) => {
            head.push_str(&format!(" expression {} pass", cx.node(target)?));
        }
        Some(target) => match target.as_text() {
            Some(name) => head.push_str(&format!(" {name}")),
            None => return Err(unexpected("a screen name", target)),
        },
        None => {
            return Err(RenderError::MissingField {
                class: node.class_name().to_string(),
                field: "target".to_string(),
            })
        }
    }
    let args = call_args(cx, node, "args")?;
    if !args.is_empty() {
        if head.ends_with(" pass") {
            head.push(' ');
        }
        head.push_str(&args);
    }
    if let Some(id) = opt_expr(cx, node, "id")? {
        head.push_str(&format!(" id {id}"));
    }
    match node.opt("block") {
        Some(block) => {
            let body = cx.body(Some(block))?.filter(|b| !b.is_empty());
            Ok(cx.labeled(&head, body))
        }
        None => Ok(head),
    }
}
