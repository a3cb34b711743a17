use std::collections::HashSet;
use std::sync::Arc;

use crate::error::RenderError;
use crate::pickle::{Graph, Instance, ObjId, Object, State, Value};
use crate::resource::DecodeLimits;
use crate::version::Schema;

use super::{Link, Meta, Node, Term};

/// Fields that point at sibling or parent statements rather than owning
/// them.
const LINK_FIELDS: &[&str] = &["next", "statement_start", "parent", "after", "ast"];

pub fn lift(graph: &Graph, root: &Value, schema: Schema) -> Result<Term, RenderError> {
    lift_with_limits(graph, root, schema, &DecodeLimits::default())
}

pub fn lift_with_limits(
    graph: &Graph,
    root: &Value,
    schema: Schema,
    limits: &DecodeLimits,
) -> Result<Term, RenderError> {
    let mut lifter = Lifter {
        graph,
        schema,
        max_depth: limits.max_nesting,
        active: HashSet::new(),
    };
    lifter.value(root, 0)
}

struct Lifter<'g> {
    graph: &'g Graph,
    schema: Schema,
    max_depth: usize,
    /// Objects on the current path; meeting one again is a cycle.
    active: HashSet<ObjId>,
}

impl Lifter<'_> {
    fn value(&mut self, value: &Value, depth: usize) -> Result<Term, RenderError> {
        let Value::Ref(id) = value else {
            return Ok(Term::Prim(value.clone()));
        };
        if depth > self.max_depth {
            return Err(RenderError::DepthExceeded {
                max: self.max_depth,
            });
        }
        let graph = self.graph;
        let Some(object) = graph.get(*id) else {
            return Err(RenderError::UnexpectedClass {
                expected: "an object of this graph",
                found: format!("#{}", id.raw()),
            });
        };
        if !self.active.insert(*id) {
            let class = match object {
                Object::Instance(instance) => instance.class.qualified().to_string(),
                other => other.type_name().to_string(),
            };
            return Err(RenderError::CyclicBlock { class });
        }
        let term = match object {
            Object::List(items) => Term::List(self.values(items, depth)?),
            Object::Tuple(items) => Term::Tuple(self.values(items, depth)?),
            Object::Set(items) | Object::FrozenSet(items) => Term::Set(self.values(items, depth)?),
            Object::Dict(mapping) => {
                let mut entries = Vec::with_capacity(mapping.len());
                for (key, value) in mapping.iter() {
                    entries.push((self.value(key, depth + 1)?, self.value(value, depth + 1)?));
                }
                Term::Dict(entries)
            }
            Object::ByteArray(bytes) => Term::ByteArray(bytes.clone()),
            Object::Instance(instance) => Term::Node(Box::new(self.node(*id, instance, depth)?)),
        };
        self.active.remove(id);
        Ok(term)
    }

    fn values(&mut self, items: &[Value], depth: usize) -> Result<Vec<Term>, RenderError> {
        items
            .iter()
            .map(|item| self.value(item, depth + 1))
            .collect()
    }

    fn node(&mut self, id: ObjId, instance: &Instance, depth: usize) -> Result<Node, RenderError> {
        let mut node = Node {
            id,
            class: Arc::clone(&instance.class),
            kind: instance.class.kind,
            schema: self.schema,
            meta: Meta {
                depth,
                ..Meta::default()
            },
            fields: Vec::new(),
            extra_args: Vec::new(),
            state: None,
            items: self.values(&instance.items, depth)?,
            entries: Vec::new(),
        };
        for name in instance.field_names() {
            let Some(value) = instance.field(name) else {
                continue;
            };
            let term = if LINK_FIELDS.contains(&name) {
                self.link(value)
            } else {
                self.value(value, depth + 1)?
            };
            node.fields.push((Arc::from(name), term));
        }
        let named = instance.class.args.len();
        for arg in instance.args.iter().skip(named) {
            node.extra_args.push(self.value(arg, depth + 1)?);
        }
        if let State::Opaque(state) = &instance.state {
            node.state = Some(self.value(state, depth + 1)?);
        }
        for (key, value) in instance.entries.iter() {
            node.entries
                .push((self.value(key, depth + 1)?, self.value(value, depth + 1)?));
        }
        node.meta.filename = node
            .get("filename")
            .and_then(Term::as_str)
            .map(str::to_string);
        node.meta.linenumber = node.get("linenumber").and_then(Term::as_int);
        Ok(node)
    }

    fn link(&self, value: &Value) -> Term {
        match value {
            Value::Ref(id) => Term::Link(Link {
                id: *id,
                kind: self.graph.instance(value).and_then(|i| i.class.kind),
            }),
            other => Term::Prim(other.clone()),
        }
    }
}
