use crate::error::RenderError;
use crate::model::{Node, Term};
use crate::pickle::Value;
use crate::registry::NodeKind;
use crate::version::Schema;

use super::support::{call_args, expr, expr_list, image_name, imspec_expr, imspec_hide, opt_expr};
use super::text::{encode_say_string, properties};
use super::{atl, unexpected, Cx, MenuContext};

pub(super) fn render(cx: &Cx, kind: NodeKind, node: &Node) -> Result<String, RenderError> {
    match kind {
        NodeKind::Say => say(cx, node),
        NodeKind::TranslateSay => translate_say(cx, node),
        NodeKind::Init => init(cx, node),
        NodeKind::Label => label(cx, node),
        NodeKind::Python => python(cx, node, false),
        NodeKind::EarlyPython => early_python(cx, node),
        NodeKind::Image => image(cx, node),
        NodeKind::Transform => transform(cx, node),
        NodeKind::Show => {
            let head = format!("show {}", imspec_expr(cx, node.seq("imspec")?)?);
            Ok(cx.labeled(&head, atl::body(cx, node.opt("atl"))?))
        }
        NodeKind::ShowLayer => show_layer(cx, node),
        NodeKind::Scene => scene(cx, node),
        NodeKind::Hide => Ok(format!("hide {}", imspec_hide(cx, node.seq("imspec")?)?)),
        NodeKind::With => Ok(format!(
            "with {}",
            opt_expr(cx, node, "expr")?.unwrap_or_else(|| "None".to_string())
        )),
        NodeKind::Call => call(cx, node),
        NodeKind::Return => match opt_expr(cx, node, "expression")? {
            Some(value) => Ok(format!("return {value}")),
            None => Ok("return".to_string()),
        },
        NodeKind::Menu => menu(cx, node, MenuContext::default()),
        NodeKind::Jump => {
            let target = node.require_text("target")?;
            if matches!(node.get("expression"), Some(Term::Prim(Value::Bool(true)))) {
                Ok(format!("jump expression {target}"))
            } else {
                Ok(format!("jump {target}"))
            }
        }
        NodeKind::Pass => Ok("pass".to_string()),
        NodeKind::While => {
            let head = format!("while {}", node.require_text("condition")?);
            cx.suite(&head, node.opt("block"))
        }
        NodeKind::If => conditional(cx, node, "if"),
        NodeKind::UserStatement => user_statement(cx, node),
        NodeKind::PostUserStatement | NodeKind::EndTranslate => Ok(String::new()),
        NodeKind::Define => define(cx, node, None),
        NodeKind::Default => {
            let var = qualified_var(node)?;
            Ok(format!("default {var} = {}", expr(cx, node.require("code")?)?))
        }
        NodeKind::Screen => match node.node("screen")? {
            Some(screen) => cx.node(screen),
            None => Err(RenderError::MissingField {
                class: node.class_name().to_string(),
                field: "screen".to_string(),
            }),
        },
        NodeKind::Translate => translate(cx, node),
        NodeKind::TranslateString => {
            let language = language(node)?;
            let old = node.text("old")?.unwrap_or_default();
            let new = node.text("new")?.unwrap_or_default();
            let body = format!(
                "old {}\nnew {}",
                encode_say_string(&old),
                encode_say_string(&new)
            );
            Ok(format!("translate {language} strings:\n{}", cx.indent(&body)))
        }
        NodeKind::TranslatePython => {
            let head = format!("translate {} python", language(node)?);
            let code = opt_expr(cx, node, "code")?.unwrap_or_else(|| "pass".to_string());
            Ok(format!("{head}:\n{}", cx.indent(&code)))
        }
        NodeKind::TranslateBlock | NodeKind::TranslateEarlyBlock => translate_block(cx, node),
        NodeKind::Style => style(cx, node),
        NodeKind::Testcase => {
            let head = format!("testcase {}", node.require_text("label")?);
            cx.suite(&head, node.opt("test"))
        }
        NodeKind::Camera => camera(cx, node),
        other => Err(RenderError::UnsupportedNodeForVersion {
            kind: other.name().to_string(),
            schema: cx.schema,
        }),
    }
}

fn say(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut parts = say_parts(cx, node)?;
    if cx.schema == Schema::Current {
        if let Some(id) = node.text("identifier")? {
            parts.push(format!("id {id}"));
        }
    }
    let args = call_args(cx, node, "arguments")?;
    if !args.is_empty() {
        parts.push(args);
    }
    Ok(parts.join(" "))
}

fn say_parts(cx: &Cx, node: &Node) -> Result<Vec<String>, RenderError> {
    let mut parts = Vec::new();
    if let Some(who) = node.text("who")? {
        parts.push(who.into_owned());
    }
    for attribute in node.seq("attributes")? {
        parts.push(expr(cx, attribute)?);
    }
    let temporary = node.seq("temporary_attributes")?;
    if !temporary.is_empty() {
        parts.push("@".to_string());
        for attribute in temporary {
            parts.push(expr(cx, attribute)?);
        }
    }
    parts.push(encode_say_string(&node.text("what")?.unwrap_or_default()));
    if cx.schema == Schema::Current
        && matches!(node.get("interact"), Some(Term::Prim(Value::Bool(false))))
    {
        parts.push("nointeract".to_string());
    }
    if let Some(with) = opt_expr(cx, node, "with_")? {
        parts.push(format!("with {with}"));
    }
    Ok(parts)
}

/// A dialogue line compiled together with its translation identifier. The
/// identifier is generated, so it is only written back inside a translation.
fn translate_say(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut parts = say_parts(cx, node)?;
    let args = call_args(cx, node, "arguments")?;
    if !args.is_empty() {
        parts.push(args);
    }
    let line = parts.join(" ");
    match (node.text("language")?, node.text("identifier")?) {
        (Some(language), Some(identifier)) => Ok(format!(
            "translate {language} {identifier}:\n{}",
            cx.indent(&line)
        )),
        _ => Ok(line),
    }
}

fn init(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let priority = node.int("priority")?.unwrap_or(0);
    let block = node.seq("block")?;
    match cx.schema {
        Schema::Legacy if priority == -500 && !block.is_empty() => return cx.block(block),
        Schema::Legacy => {}
        Schema::Current => {
            if let [Term::Node(child)] = block {
                match child.kind {
                    Some(NodeKind::Python) => {
                        let code = python(cx, child, true)?;
                        return Ok(format!("{} {code}", init_head(priority)));
                    }
                    Some(NodeKind::EarlyPython) => {
                        return Ok(format!("{} {}", init_head(priority), cx.node(child)?));
                    }
                    Some(NodeKind::Screen) if priority == -500 => return cx.node(child),
                    Some(NodeKind::Image) if priority == 500 => return cx.node(child),
                    Some(NodeKind::Define) => return define(cx, child, Some(priority)),
                    Some(NodeKind::Default) | Some(NodeKind::Transform) if priority == 0 => {
                        return cx.node(child);
                    }
                    _ => {}
                }
            }
            if priority == 0
                && !block.is_empty()
                && block
                    .iter()
                    .all(|item| item.kind() == Some(NodeKind::TranslateString))
            {
                return cx.block(block);
            }
        }
    }
    let head = init_head(priority);
    if block.is_empty() {
        return Ok(format!("{head}:\n{}", cx.indent("pass")));
    }
    let inner = cx.block(block)?;
    if inner.contains('\n') {
        Ok(format!("{head}:\n{}", cx.indent(&inner)))
    } else {
        Ok(format!("{head} {inner}"))
    }
}

fn init_head(priority: i64) -> String {
    if priority == 0 {
        "init".to_string()
    } else {
        format!("init {priority}")
    }
}

fn label(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let name = match node.text("name")? {
        Some(name) => name,
        None => node.require_text("_name")?,
    };
    let mut head = format!("label {name}{}", call_args(cx, node, "parameters")?);
    if cx.schema == Schema::Current && node.flag("hide") {
        head.push_str(" hide");
    }
    cx.suite(&head, node.opt("block"))
}

/// `None` and the bare `store` namespace both mean the default store.
fn store_name(node: &Node) -> Result<Option<String>, RenderError> {
    Ok(node.text("store")?.and_then(|store| {
        let store = &*store;
        if store == "store" {
            None
        } else {
            Some(store.strip_prefix("store.").unwrap_or(store).to_string())
        }
    }))
}

fn python(cx: &Cx, node: &Node, block_form: bool) -> Result<String, RenderError> {
    let code = opt_expr(cx, node, "code")?.unwrap_or_default();
    let store = store_name(node)?;
    let hide = node.flag("hide");
    if !block_form && store.is_none() && !hide && !code.is_empty() && !code.contains('\n') {
        return Ok(format!("$ {code}"));
    }
    let mut head = "python".to_string();
    if let Some(store) = store {
        head.push_str(&format!(" in {store}"));
    }
    if hide {
        head.push_str(" hide");
    }
    Ok(python_block(cx, &head, &code))
}

fn early_python(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let code = opt_expr(cx, node, "code")?.unwrap_or_default();
    let mut head = "python early".to_string();
    if let Some(store) = store_name(node)? {
        head.push_str(&format!(" in {store}"));
    }
    if node.flag("hide") {
        head.push_str(" hide");
    }
    Ok(python_block(cx, &head, &code))
}

fn python_block(cx: &Cx, head: &str, code: &str) -> String {
    let code = if code.trim().is_empty() { "pass" } else { code };
    format!("{head}:\n{}", cx.indent(code))
}

fn image(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut head = "image".to_string();
    if let Some(name) = node.opt("imgname") {
        head.push(' ');
        head.push_str(&image_name(name)?);
    }
    let code = node.opt("code");
    let atl_block = node.opt("atl");
    if cx.schema == Schema::Legacy && code.is_some() && atl_block.is_some() {
        return Err(RenderError::UnsupportedFeature {
            kind: NodeKind::Image.name().to_string(),
            feature: "code together with an ATL block",
            schema: cx.schema,
        });
    }
    if let Some(code) = code {
        return Ok(format!("{head} = {}", expr(cx, code)?));
    }
    Ok(cx.labeled(&head, atl::body(cx, atl_block)?))
}

fn transform(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut head = "transform".to_string();
    if let Some(name) = node.text("varname")? {
        head.push_str(&format!(" {name}{}", call_args(cx, node, "parameters")?));
    }
    Ok(cx.labeled(&head, atl::body(cx, node.opt("atl"))?))
}

fn show_layer(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let layer = node.text("layer")?;
    let mut head = format!("show layer {}", layer.as_deref().unwrap_or("master"));
    let at_list = expr_list(cx, node, "at_list")?;
    if !at_list.is_empty() {
        head.push_str(&format!(" at {at_list}"));
    }
    Ok(cx.labeled(&head, atl::body(cx, node.opt("atl"))?))
}

fn scene(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut head = "scene".to_string();
    match node.opt("imspec") {
        Some(Term::Tuple(imspec)) | Some(Term::List(imspec)) => {
            head.push_str(&format!(" {}", imspec_expr(cx, imspec)?));
        }
        Some(other) => return Err(unexpected("an image specification", other)),
        None => {
            if let Some(layer) = node.text("layer")? {
                head.push_str(&format!(" onlayer {layer}"));
            }
        }
    }
    Ok(cx.labeled(&head, atl::body(cx, node.opt("atl"))?))
}

fn camera(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut head = "camera".to_string();
    if let Some(layer) = node.text("layer")? {
        head.push_str(&format!(" {layer}"));
    }
    let at_list = expr_list(cx, node, "at_list")?;
    if !at_list.is_empty() {
        if cx.schema == Schema::Legacy {
            return Err(RenderError::UnsupportedFeature {
                kind: NodeKind::Camera.name().to_string(),
                feature: "at_list",
                schema: cx.schema,
            });
        }
        head.push_str(&format!(" at {at_list}"));
    }
    Ok(cx.labeled(&head, atl::body(cx, node.opt("atl"))?))
}

fn call(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let args = call_args(cx, node, "arguments")?;
    let target = match node.opt("expression") {
        Some(Term::Prim(Value::Bool(true))) => {
            Some(format!("expression {}", node.require_text("label")?))
        }
        Some(Term::Prim(Value::Bool(false))) | None => None,
        Some(expression) => Some(format!("expression {}", expr(cx, expression)?)),
    };
    match target {
        Some(target) if args.is_empty() => Ok(format!("call {target}")),
        // Arguments directly after an expression would be read as a call
        // inside the expression.
        Some(target) => Ok(format!("call {target} pass {args}")),
        None => Ok(format!("call {}{args}", node.require_text("label")?)),
    }
}

/// `if`/`elif`/`else` chains. Entries after the first unconditional one
/// are unreachable and dropped.
pub(crate) fn conditional(cx: &Cx, node: &Node, keyword: &str) -> Result<String, RenderError> {
    let mut out = Vec::new();
    for (index, entry) in node.seq("entries")?.iter().enumerate() {
        let (condition, block) = match entry.as_seq() {
            Some([condition, block]) => (condition, block),
            _ => return Err(node.malformed("entries", "a list of (condition, block) pairs")),
        };
        let condition = if condition.is_none() {
            None
        } else {
            Some(expr(cx, condition)?).filter(|c| c != "True")
        };
        let head = match (index, condition) {
            (0, Some(condition)) => format!("{keyword} {condition}"),
            (0, None) => format!("{keyword} True"),
            (_, Some(condition)) => format!("elif {condition}"),
            (_, None) => "else".to_string(),
        };
        let last = index > 0 && head == "else";
        out.push(cx.suite(&head, Some(block))?);
        if last {
            break;
        }
    }
    Ok(out.join("\n"))
}

fn user_statement(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let line = node.require_text("line")?.into_owned();
    let block = grouped_lines(cx, node.seq("block")?)?;
    if block.is_empty() {
        Ok(line)
    } else {
        Ok(format!("{line}\n{}", cx.indent(&block)))
    }
}

/// Raw source lines a user statement carries as its block: either
/// `GroupedLine` records or `(filename, number, text, block)` tuples.
fn grouped_lines(cx: &Cx, lines: &[Term]) -> Result<String, RenderError> {
    let mut out = Vec::new();
    for line in lines {
        let (text, block) = match line {
            Term::Node(node) => (node.require_text("text")?.into_owned(), node.seq("block")?),
            Term::Tuple(parts) | Term::List(parts) if parts.len() >= 4 => {
                let text = parts[2]
                    .as_text()
                    .ok_or_else(|| unexpected("a source line", &parts[2]))?
                    .into_owned();
                (text, parts[3].as_seq().unwrap_or(&[]))
            }
            other => return Err(unexpected("a source line", other)),
        };
        out.push(text);
        let nested = grouped_lines(cx, block)?;
        if !nested.is_empty() {
            out.push(cx.indent(&nested));
        }
    }
    Ok(out.join("\n"))
}

/// `store.name` without the default store prefix, plus any subscript.
fn qualified_var(node: &Node) -> Result<String, RenderError> {
    let name = node.require_text("varname")?;
    Ok(match store_name(node)? {
        Some(store) => format!("{store}.{name}"),
        None => name.into_owned(),
    })
}

fn define(cx: &Cx, node: &Node, priority: Option<i64>) -> Result<String, RenderError> {
    let mut head = "define".to_string();
    let priority = match priority {
        Some(priority) => Some(priority),
        None => node.int("priority")?,
    };
    if let Some(priority) = priority.filter(|p| *p != 0) {
        head.push_str(&format!(" {priority}"));
    }
    let mut var = qualified_var(node)?;
    if let Some(index) = opt_expr(cx, node, "index")? {
        var.push_str(&format!("[{index}]"));
    }
    let operator = node.text("operator")?;
    let operator = operator.as_deref().unwrap_or("=");
    Ok(format!(
        "{head} {var} {operator} {}",
        expr(cx, node.require("code")?)?
    ))
}

fn language(node: &Node) -> Result<String, RenderError> {
    Ok(node
        .text("language")?
        .map(|l| l.into_owned())
        .unwrap_or_else(|| "None".to_string()))
}

fn translate(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let language = language(node)?;
    let identifier = node.require_text("identifier")?;
    let mut head = format!("translate {language} {identifier}");
    if let Some(alternate) = node.text("alternate")? {
        head.push_str(&format!(" alternate {alternate}"));
    }
    cx.suite(&head, node.opt("block"))
}

/// `translate <language> style ...` and `translate <language> python:`
/// blocks each wrap exactly the statements they translate.
fn translate_block(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let language = language(node)?;
    let mut out = Vec::new();
    for item in node.seq("block")? {
        let Term::Node(child) = item else {
            return Err(unexpected("a statement", item));
        };
        let code = match child.kind {
            Some(NodeKind::Python) => python(cx, child, true)?,
            _ => cx.node(child)?,
        };
        out.push(format!("translate {language} {code}"));
    }
    Ok(out.join("\n"))
}

fn style(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let mut head = format!("style {}", node.require_text("style_name")?);
    if let Some(parent) = node.text("parent")? {
        head.push_str(&format!(" is {parent}"));
    }
    let mut props: Vec<(String, Option<String>)> = Vec::new();
    match node.opt("properties") {
        None => {}
        Some(Term::Dict(entries)) => {
            for (key, value) in entries {
                let key = key
                    .as_text()
                    .ok_or_else(|| node.malformed("properties", "a string-keyed mapping"))?;
                props.push((key.into_owned(), Some(expr(cx, value)?)));
            }
        }
        Some(_) => return Err(node.malformed("properties", "a string-keyed mapping")),
    }
    let delattr = node.seq("delattr")?;
    let variant = opt_expr(cx, node, "variant")?;
    match cx.schema {
        Schema::Legacy => {
            if !delattr.is_empty() {
                return Err(RenderError::UnsupportedFeature {
                    kind: NodeKind::Style.name().to_string(),
                    feature: "delattr",
                    schema: cx.schema,
                });
            }
            if let Some(variant) = variant {
                props.push(("variant".to_string(), Some(variant)));
            }
            if node.flag("clear") {
                props.push(("clear".to_string(), None));
            }
            if let Some(take) = node.text("take")? {
                props.push(("take".to_string(), Some(take.into_owned())));
            }
            if props.is_empty() {
                return Ok(head);
            }
            Ok(format!("{head}:\n{}", cx.indent(&properties(&props, true))))
        }
        Schema::Current => {
            if node.flag("clear") {
                props.push(("clear".to_string(), None));
            }
            if let Some(take) = node.text("take")? {
                props.push(("take".to_string(), Some(take.into_owned())));
            }
            for name in delattr {
                props.push(("del".to_string(), Some(expr(cx, name)?)));
            }
            if let Some(variant) = variant {
                props.push(("variant".to_string(), Some(variant)));
            }
            match props.len() {
                0 => Ok(head),
                1 | 2 => Ok(format!("{head} {}", properties(&props, false))),
                _ => Ok(format!("{head}:\n{}", cx.indent(&properties(&props, true)))),
            }
        }
    }
}

/// Renders a menu together with the label and caption statements the block
/// walker folded into it.
pub(crate) fn menu(cx: &Cx, node: &Node, context: MenuContext<'_>) -> Result<String, RenderError> {
    let mut head = "menu".to_string();
    let args = call_args(cx, node, "arguments")?;
    match context.label {
        Some(label) => {
            head.push_str(&format!(" {}{args}", label.require_text("name")?));
        }
        None if !args.is_empty() => head.push_str(&format!(" {args}")),
        None => {}
    }
    let mut lines = Vec::new();
    if let Some(with) = opt_expr(cx, node, "with_")? {
        lines.push(format!("with {with}"));
    }
    if let Some(set) = opt_expr(cx, node, "set")? {
        lines.push(format!("set {set}"));
    }
    if let Some(caption) = context.caption {
        lines.push(cx.node(caption)?);
    }
    let item_arguments = node.seq("item_arguments")?;
    for (index, item) in node.seq("items")?.iter().enumerate() {
        let (text, condition, block) = match item.as_seq() {
            Some([text, condition, block]) => (text, condition, block),
            _ => return Err(node.malformed("items", "a list of (label, condition, block) triples")),
        };
        let text = text
            .as_text()
            .ok_or_else(|| node.malformed("items", "a list of (label, condition, block) triples"))?;
        let mut choice = encode_say_string(&text);
        if let Some(arguments) = item_arguments.get(index).filter(|a| !a.is_none()) {
            choice.push_str(&expr(cx, arguments)?);
        }
        if !condition.is_none() {
            let condition = expr(cx, condition)?;
            if condition != "True" {
                choice.push_str(&format!(" if {condition}"));
            }
        }
        if block.is_none() {
            lines.push(choice);
        } else {
            lines.push(cx.suite(&choice, Some(block))?);
        }
    }
    if lines.is_empty() {
        lines.push("pass".to_string());
    }
    Ok(format!("{head}:\n{}", cx.indent(&lines.join("\n"))))
}
