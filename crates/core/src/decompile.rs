//! Decode, lift and render in one call.

use crate::codegen::generate;
use crate::error::{RenderError, Result};
use crate::model::lift_with_limits;
use crate::pickle::{decode_with_limits, Object, Value};
use crate::registry::ClassRegistry;
use crate::resource::DecodeLimits;
use crate::version::Schema;

/// Regenerated source of one compiled script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decompiled {
    pub source: String,
    /// Schema the source was rendered with, explicit or inferred.
    pub schema: Schema,
    /// Protocol declared by the payload.
    pub protocol: u8,
}

/// Turns a decompressed script payload back into source text.
///
/// The payload is either `(data, statements)` or a bare statement list.
/// Without an explicit `schema` the one the graph was written with is
/// inferred.
pub fn decompile(
    payload: &[u8],
    registry: &ClassRegistry,
    schema: Option<Schema>,
) -> Result<Decompiled> {
    decompile_with_limits(payload, registry, schema, DecodeLimits::default())
}

pub fn decompile_with_limits(
    payload: &[u8],
    registry: &ClassRegistry,
    schema: Option<Schema>,
    limits: DecodeLimits,
) -> Result<Decompiled> {
    let decoded = decode_with_limits(payload, registry, limits)?;
    let schema = schema.unwrap_or_else(|| Schema::infer(&decoded.graph));
    let statements = match decoded.graph.resolve(&decoded.root) {
        Some(Object::Tuple(parts)) if parts.len() == 2 => parts[1].clone(),
        Some(Object::List(_)) => decoded.root.clone(),
        _ => {
            return Err(RenderError::UnexpectedClass {
                expected: "a (data, statements) pair or a statement list",
                found: root_name(&decoded.graph, &decoded.root).to_string(),
            }
            .into())
        }
    };
    let term = lift_with_limits(&decoded.graph, &statements, schema, &limits)?;
    let mut source = generate(&term, schema, 0)?;
    if !source.is_empty() {
        source.push('\n');
    }
    Ok(Decompiled {
        source,
        schema,
        protocol: decoded.protocol,
    })
}

fn root_name(graph: &crate::pickle::Graph, root: &Value) -> &'static str {
    match graph.resolve(root) {
        Some(object) => object.type_name(),
        None => root.type_name(),
    }
}
