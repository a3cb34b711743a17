use crate::error::RenderError;
use crate::model::{Node, Term};
use crate::registry::NodeKind;
use crate::version::Schema;

use super::support::{expr, opt_expr};
use super::Cx;

pub(super) fn render(cx: &Cx, kind: NodeKind, node: &Node) -> Result<String, RenderError> {
    match kind {
        NodeKind::AtlBlock => Ok(format!("block:\n{}", cx.indent(&statements(cx, node)?))),
        NodeKind::AtlMultipurpose => multipurpose(cx, node),
        NodeKind::AtlContainsExpr => prefixed("contains", opt_expr(cx, node, "expression")?),
        NodeKind::AtlChild => blocks(cx, node.seq("children")?, "contains"),
        NodeKind::AtlRepeat => prefixed("repeat", opt_expr(cx, node, "repeats")?),
        NodeKind::AtlParallel => blocks(cx, node.seq("blocks")?, "parallel"),
        NodeKind::AtlChoice => {
            let mut out = Vec::new();
            for choice in node.seq("choices")? {
                let Some([chance, block]) = choice.as_seq() else {
                    return Err(node.malformed("choices", "a list of (chance, block) pairs"));
                };
                let head = format!("choice {}", expr(cx, chance)?);
                out.push(suite(cx, &head, block)?);
            }
            Ok(out.join("\n"))
        }
        NodeKind::AtlTime => prefixed("time", opt_expr(cx, node, "time")?),
        NodeKind::AtlOn => {
            let Some(Term::Dict(handlers)) = node.opt("handlers") else {
                return Err(node.malformed("handlers", "a mapping of event names to blocks"));
            };
            let mut out = Vec::new();
            for (name, block) in handlers {
                let head = format!("on {}", expr(cx, name)?);
                out.push(suite(cx, &head, block)?);
            }
            Ok(out.join("\n"))
        }
        NodeKind::AtlEvent => prefixed("event", node.text("name")?.map(|n| n.into_owned())),
        NodeKind::AtlFunction => prefixed("function", opt_expr(cx, node, "expr")?),
        other => Err(RenderError::UnsupportedNodeForVersion {
            kind: other.name().to_string(),
            schema: cx.schema,
        }),
    }
}

/// Statements of the ATL block a statement carries in its `atl` field.
pub(crate) fn body(cx: &Cx, term: Option<&Term>) -> Result<Option<String>, RenderError> {
    match term {
        Some(Term::Node(node)) if node.kind == Some(NodeKind::AtlBlock) => {
            statements(cx, node).map(Some)
        }
        other => cx.body(other),
    }
}

fn statements(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let animation = node.flag("animation");
    if animation && cx.schema == Schema::Legacy {
        return Err(RenderError::UnsupportedFeature {
            kind: NodeKind::AtlBlock.name().to_string(),
            feature: "animation",
            schema: cx.schema,
        });
    }
    let items = node.seq("statements")?;
    if let [Term::Node(inner)] = items {
        if !animation && inner.kind == Some(NodeKind::AtlBlock) {
            return statements(cx, inner);
        }
    }
    let mut lines = Vec::new();
    if animation {
        lines.push("animation".to_string());
    }
    if items.is_empty() {
        lines.push("pass".to_string());
    } else {
        lines.push(cx.block(items)?);
    }
    Ok(lines.join("\n"))
}

fn suite(cx: &Cx, head: &str, block: &Term) -> Result<String, RenderError> {
    let code = body(cx, Some(block))?
        .filter(|code| !code.is_empty())
        .unwrap_or_else(|| "pass".to_string());
    Ok(format!("{head}:\n{}", cx.indent(&code)))
}

/// One `keyword:` suite per block; an empty list still renders one.
fn blocks(cx: &Cx, items: &[Term], keyword: &str) -> Result<String, RenderError> {
    if items.is_empty() {
        return Ok(format!("{keyword}:\n{}", cx.indent("pass")));
    }
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(suite(cx, keyword, item)?);
    }
    Ok(out.join("\n"))
}

fn prefixed(keyword: &str, operand: Option<String>) -> Result<String, RenderError> {
    Ok(match operand {
        Some(operand) => format!("{keyword} {operand}"),
        None => keyword.to_string(),
    })
}

/// Interpolation: an optional warper and duration followed by property
/// targets, spline knots, child expressions and rotation keywords.
fn multipurpose(cx: &Cx, node: &Node) -> Result<String, RenderError> {
    let warp_function = opt_expr(cx, node, "warp_function")?;
    let revolution = node.text("revolution")?;
    let circles = opt_expr(cx, node, "circles")?.filter(|c| c != "0");
    let splines = node.seq("splines")?;
    if cx.schema == Schema::Legacy {
        let feature = if warp_function.is_some() {
            Some("warp_function")
        } else if revolution.is_some() {
            Some("revolution")
        } else if circles.is_some() {
            Some("circles")
        } else if !splines.is_empty() {
            Some("splines")
        } else {
            None
        };
        if let Some(feature) = feature {
            return Err(RenderError::UnsupportedFeature {
                kind: NodeKind::AtlMultipurpose.name().to_string(),
                feature,
                schema: cx.schema,
            });
        }
    }

    let duration = opt_expr(cx, node, "duration")?.unwrap_or_else(|| "0".to_string());
    let start = match (&warp_function, node.text("warper")?) {
        (Some(function), _) => Some(format!("warp {function} {duration}")),
        (None, Some(warper)) => Some(format!("{warper} {duration}")),
        (None, None) => None,
    };

    let mut items = Vec::new();
    if let Some(revolution) = revolution {
        items.push(revolution.into_owned());
    }
    if let Some(circles) = circles {
        items.push(format!("circles {circles}"));
    }
    for property in node.seq("properties")? {
        let Some([name, value]) = property.as_seq() else {
            return Err(node.malformed("properties", "a list of (name, value) pairs"));
        };
        items.push(format!("{} {}", expr(cx, name)?, expr(cx, value)?));
    }
    for spline in splines {
        let Some([name, Term::List(knots) | Term::Tuple(knots)]) = spline.as_seq() else {
            return Err(node.malformed("splines", "a list of (name, knots) pairs"));
        };
        let Some((last, knots)) = knots.split_last() else {
            return Err(node.malformed("splines", "a non-empty knot list"));
        };
        let mut text = format!("{} {}", expr(cx, name)?, expr(cx, last)?);
        for knot in knots {
            text.push_str(&format!(" knot {}", expr(cx, knot)?));
        }
        items.push(text);
    }
    for expression in node.seq("expressions")? {
        let Some([child, with]) = expression.as_seq() else {
            return Err(node.malformed("expressions", "a list of (expression, with) pairs"));
        };
        let child = expr(cx, child)?;
        if with.is_none() {
            items.push(child);
        } else {
            items.push(format!("{child} with {}", expr(cx, with)?));
        }
    }

    let Some(start) = start else {
        return Ok(if items.is_empty() {
            "pass".to_string()
        } else {
            items.join(" ")
        });
    };
    match (cx.schema, items.len()) {
        (_, 0) => Ok(start),
        (Schema::Current, n) if n >= 3 => Ok(format!("{start}:\n{}", cx.indent(&items.join(" ")))),
        _ => Ok(format!("{start} {}", items.join(" "))),
    }
}
