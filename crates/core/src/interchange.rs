//! JSON form of a decoded graph, for editing save data by hand.
//!
//! Lists become arrays and dicts with plain string keys become objects.
//! Everything JSON has no native shape for is a single-key marker object:
//!
//! | value       | JSON                                         |
//! |-------------|----------------------------------------------|
//! | tuple       | `{"__tuple__": [...]}`                       |
//! | set         | `{"__set__": [...]}`                         |
//! | frozenset   | `{"__frozenset__": [...]}`                   |
//! | bytes       | `{"__bytes__": "hex"}`                       |
//! | bytearray   | `{"__bytearray__": "hex"}`                   |
//! | other dicts | `{"__dict__": [[key, value], ...]}`          |
//! | big int     | `{"__bigint__": "digits"}`                   |
//! | inf / nan   | `{"__float__": "inf"}`                       |
//! | class       | `{"__global__": [module, name]}`             |
//! | instance    | `{"__class__": [module, name], ...}`         |
//!
//! An object reachable more than once carries `"$id": n` where it is
//! written out and is replaced by `{"$ref": n}` everywhere else, so sharing
//! and cycles survive the round trip. Restoring resolves every class through
//! a [`ClassRegistry`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use num_bigint::BigInt;
use serde_json::{json, Map, Number, Value as Json};

use crate::error::InterchangeError;
use crate::pickle::{Construction, Fields, Graph, Instance, Mapping, ObjId, Object, State, Value};
use crate::registry::{ClassDescriptor, ClassRegistry};
use crate::resource::DecodeLimits;

const ID: &str = "$id";
const REF: &str = "$ref";

/// Converts the graph reachable from `root` to JSON.
pub fn to_json(graph: &Graph, root: &Value) -> Result<Json, InterchangeError> {
    to_json_with_limits(graph, root, &DecodeLimits::default())
}

/// [`to_json`] refusing object nesting deeper than `limits.max_object_depth`.
pub fn to_json_with_limits(
    graph: &Graph,
    root: &Value,
    limits: &DecodeLimits,
) -> Result<Json, InterchangeError> {
    let shared = shared_objects(graph, root)?;
    let mut writer = Writer {
        graph,
        shared,
        ids: HashMap::new(),
        depth: 0,
        max_depth: limits.max_object_depth,
    };
    writer.value(root)
}

/// Rebuilds a graph from JSON produced by [`to_json`] (possibly edited).
pub fn from_json(json: &Json, registry: &ClassRegistry) -> Result<(Graph, Value), InterchangeError> {
    from_json_with_limits(json, registry, &DecodeLimits::default())
}

pub fn from_json_with_limits(
    json: &Json,
    registry: &ClassRegistry,
    limits: &DecodeLimits,
) -> Result<(Graph, Value), InterchangeError> {
    let mut reader = Reader {
        registry,
        graph: Graph::new(),
        slots: HashMap::new(),
        filled: HashSet::new(),
        depth: 0,
        max_depth: limits.max_object_depth,
    };
    reader.reserve(json)?;
    let root = reader.value(json, "$")?;
    reader.finish()?;
    Ok((reader.graph, root))
}

/// Objects with more than one incoming reference, counting `root` itself.
fn shared_objects(graph: &Graph, root: &Value) -> Result<HashSet<ObjId>, InterchangeError> {
    let mut counts: HashMap<ObjId, usize> = HashMap::new();
    let mut pending: Vec<Value> = vec![root.clone()];
    while let Some(value) = pending.pop() {
        let Value::Ref(id) = value else {
            continue;
        };
        let count = counts.entry(id).or_insert(0);
        *count += 1;
        if *count > 1 {
            continue;
        }
        let object = graph.get(id).ok_or_else(|| dangling(id))?;
        children(object, &mut pending);
    }
    Ok(counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id)
        .collect())
}

fn children(object: &Object, out: &mut Vec<Value>) {
    match object {
        Object::List(items) | Object::Tuple(items) | Object::Set(items) | Object::FrozenSet(items) => {
            out.extend(items.iter().cloned())
        }
        Object::Dict(mapping) => mapping_values(mapping, out),
        Object::ByteArray(_) => {}
        Object::Instance(instance) => {
            out.extend(instance.args.iter().cloned());
            out.extend(instance.dict.iter().map(|(_, v)| v.clone()));
            out.extend(instance.slots.iter().map(|(_, v)| v.clone()));
            if let State::Opaque(state) = &instance.state {
                out.push(state.clone());
            }
            out.extend(instance.items.iter().cloned());
            mapping_values(&instance.entries, out);
            out.extend(instance.members.iter().cloned());
        }
    }
}

fn mapping_values(mapping: &Mapping, out: &mut Vec<Value>) {
    for (key, value) in mapping.iter() {
        out.push(key.clone());
        out.push(value.clone());
    }
}

fn dangling(id: ObjId) -> InterchangeError {
    InterchangeError::Malformed {
        path: format!("#{}", id.raw()),
        reason: "object is not part of the graph".to_string(),
    }
}

struct Writer<'g> {
    graph: &'g Graph,
    shared: HashSet<ObjId>,
    ids: HashMap<ObjId, u64>,
    depth: usize,
    max_depth: usize,
}

impl Writer<'_> {
    fn value(&mut self, value: &Value) -> Result<Json, InterchangeError> {
        Ok(match value {
            Value::None => Json::Null,
            Value::Bool(flag) => Json::Bool(*flag),
            Value::Int(int) => Json::from(*int),
            Value::BigInt(int) => json!({ "__bigint__": int.to_string() }),
            Value::Float(float) => match Number::from_f64(*float) {
                Some(number) => Json::Number(number),
                None => json!({ "__float__": float.to_string() }),
            },
            Value::Str(text) => Json::String(text.to_string()),
            Value::Bytes(bytes) => json!({ "__bytes__": hex(bytes) }),
            Value::Global(class) => json!({ "__global__": class_pair(class) }),
            Value::Ref(id) => return self.object(*id),
        })
    }

    fn values(&mut self, values: &[Value]) -> Result<Json, InterchangeError> {
        values
            .iter()
            .map(|value| self.value(value))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array)
    }

    fn object(&mut self, id: ObjId) -> Result<Json, InterchangeError> {
        if let Some(existing) = self.ids.get(&id) {
            return Ok(json!({ "$ref": existing }));
        }
        if self.depth >= self.max_depth {
            return Err(InterchangeError::DepthExceeded {
                path: format!("#{}", id.raw()),
                max: self.max_depth,
            });
        }
        self.depth += 1;
        let out = self.fresh_object(id);
        self.depth -= 1;
        out
    }

    fn fresh_object(&mut self, id: ObjId) -> Result<Json, InterchangeError> {
        let shared = self.shared.contains(&id);
        if shared {
            let next = self.ids.len() as u64;
            self.ids.insert(id, next);
        }
        let graph = self.graph;
        let object = graph.get(id).ok_or_else(|| dangling(id))?;
        let mut out = match object {
            Object::List(items) => {
                let items = self.values(items)?;
                if !shared {
                    return Ok(items);
                }
                marker("__list__", items)
            }
            Object::Tuple(items) => marker("__tuple__", self.values(items)?),
            Object::Set(items) => marker("__set__", self.values(items)?),
            Object::FrozenSet(items) => marker("__frozenset__", self.values(items)?),
            Object::ByteArray(bytes) => marker("__bytearray__", Json::String(hex(bytes))),
            Object::Dict(mapping) => self.mapping(mapping)?,
            Object::Instance(instance) => self.instance(instance)?,
        };
        if shared {
            out.insert(ID.to_string(), Json::from(self.ids[&id]));
        }
        Ok(Json::Object(out))
    }

    fn mapping(&mut self, mapping: &Mapping) -> Result<Map<String, Json>, InterchangeError> {
        let plain = mapping.iter().all(|(key, _)| {
            key.as_str()
                .is_some_and(|key| !key.starts_with("__") && !key.starts_with('$'))
        });
        if plain {
            let mut out = Map::new();
            for (key, value) in mapping.iter() {
                if let Some(key) = key.as_str() {
                    out.insert(key.to_string(), self.value(value)?);
                }
            }
            return Ok(out);
        }
        Ok(marker("__dict__", self.pairs(mapping)?))
    }

    fn pairs(&mut self, mapping: &Mapping) -> Result<Json, InterchangeError> {
        let mut pairs = Vec::with_capacity(mapping.len());
        for (key, value) in mapping.iter() {
            pairs.push(Json::Array(vec![self.value(key)?, self.value(value)?]));
        }
        Ok(Json::Array(pairs))
    }

    fn fields(&mut self, fields: &Fields) -> Result<Json, InterchangeError> {
        let mut out = Map::new();
        for (name, value) in fields.iter() {
            out.insert(name.to_string(), self.value(value)?);
        }
        Ok(Json::Object(out))
    }

    fn instance(&mut self, instance: &Instance) -> Result<Map<String, Json>, InterchangeError> {
        let mut out = Map::new();
        out.insert("__class__".to_string(), class_pair(&instance.class));
        let construction = match instance.construction {
            Construction::NewObj => "newobj",
            Construction::Reduce => "reduce",
            Construction::Reconstructor => "reconstructor",
        };
        out.insert("construction".to_string(), Json::from(construction));
        if let Some(reconstructor) = &instance.reconstructor {
            out.insert("reconstructor".to_string(), class_pair(reconstructor));
        }
        if let Some(base) = &instance.base {
            out.insert("base".to_string(), class_pair(base));
        }
        if !instance.args.is_empty() {
            out.insert("args".to_string(), self.values(&instance.args)?);
        }
        match &instance.state {
            State::Unset => {}
            State::Dict => {
                out.insert("state".to_string(), Json::from("dict"));
                out.insert("dict".to_string(), self.fields(&instance.dict)?);
            }
            State::Pair {
                has_dict,
                has_slots,
            } => {
                out.insert("state".to_string(), Json::from("pair"));
                if *has_dict {
                    out.insert("dict".to_string(), self.fields(&instance.dict)?);
                }
                if *has_slots {
                    out.insert("slots".to_string(), self.fields(&instance.slots)?);
                }
            }
            State::Opaque(state) => {
                out.insert("state".to_string(), Json::from("opaque"));
                out.insert("value".to_string(), self.value(state)?);
            }
        }
        if !instance.items.is_empty() {
            out.insert("items".to_string(), self.values(&instance.items)?);
        }
        if !instance.entries.is_empty() {
            out.insert("entries".to_string(), self.pairs(&instance.entries)?);
        }
        if !instance.members.is_empty() {
            out.insert("members".to_string(), self.values(&instance.members)?);
        }
        Ok(out)
    }
}

fn marker(name: &str, value: Json) -> Map<String, Json> {
    let mut out = Map::new();
    out.insert(name.to_string(), value);
    out
}

fn class_pair(class: &ClassDescriptor) -> Json {
    json!([class.module(), class.name()])
}

fn hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(DIGITS[usize::from(byte >> 4)]));
        out.push(char::from(DIGITS[usize::from(byte & 0x0f)]));
    }
    out
}

fn unhex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

struct Reader<'r> {
    registry: &'r ClassRegistry,
    graph: Graph,
    /// Arena slot reserved for every `$id`, so a `$ref` may appear before
    /// the object it names.
    slots: HashMap<u64, ObjId>,
    filled: HashSet<u64>,
    depth: usize,
    max_depth: usize,
}

impl Reader<'_> {
    /// Walks the document in order with an explicit stack, so arbitrarily
    /// deep input cannot exhaust the call stack here.
    fn reserve(&mut self, json: &Json) -> Result<(), InterchangeError> {
        let mut pending = vec![(json, "$".to_string())];
        while let Some((json, path)) = pending.pop() {
            match json {
                Json::Array(items) => {
                    for (index, item) in items.iter().enumerate().rev() {
                        pending.push((item, format!("{path}[{index}]")));
                    }
                }
                Json::Object(map) => {
                    if let Some(id) = map.get(ID) {
                        let id = id
                            .as_u64()
                            .ok_or_else(|| malformed(&path, "`$id` is not a count"))?;
                        let slot = self.graph.alloc(Object::List(Vec::new()));
                        if self.slots.insert(id, slot).is_some() {
                            return Err(malformed(&path, "`$id` is used twice"));
                        }
                    }
                    for (key, value) in map.iter().rev() {
                        pending.push((value, format!("{path}.{key}")));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn value(&mut self, json: &Json, path: &str) -> Result<Value, InterchangeError> {
        match json {
            Json::Null => Ok(Value::None),
            Json::Bool(flag) => Ok(Value::Bool(*flag)),
            Json::Number(number) => number_value(number, path),
            Json::String(text) => Ok(Value::str(text)),
            Json::Array(items) => {
                self.enter(path)?;
                let items = self.values(items, path);
                self.depth -= 1;
                Ok(Value::Ref(self.graph.alloc(Object::List(items?))))
            }
            Json::Object(map) => {
                self.enter(path)?;
                let value = self.object(map, path);
                self.depth -= 1;
                value
            }
        }
    }

    fn enter(&mut self, path: &str) -> Result<(), InterchangeError> {
        if self.depth >= self.max_depth {
            return Err(self.too_deep(path));
        }
        self.depth += 1;
        Ok(())
    }

    fn too_deep(&self, path: &str) -> InterchangeError {
        InterchangeError::DepthExceeded {
            path: path.to_string(),
            max: self.max_depth,
        }
    }

    fn values(&mut self, items: &[Json], path: &str) -> Result<Vec<Value>, InterchangeError> {
        items
            .iter()
            .enumerate()
            .map(|(index, item)| self.value(item, &format!("{path}[{index}]")))
            .collect()
    }

    fn list(&mut self, json: &Json, path: &str) -> Result<Vec<Value>, InterchangeError> {
        match json {
            Json::Array(items) => self.values(items, path),
            _ => Err(malformed(path, "expected an array")),
        }
    }

    fn object(&mut self, map: &Map<String, Json>, path: &str) -> Result<Value, InterchangeError> {
        if let Some(target) = map.get(REF) {
            if map.len() != 1 {
                return Err(malformed(path, "`$ref` must stand alone"));
            }
            let id = target
                .as_u64()
                .ok_or_else(|| malformed(path, "`$ref` is not a count"))?;
            return match self.slots.get(&id) {
                Some(slot) => Ok(Value::Ref(*slot)),
                None => Err(InterchangeError::DanglingRef {
                    path: path.to_string(),
                    id,
                }),
            };
        }
        let id = map.get(ID).and_then(Json::as_u64);
        let body: Vec<(&String, &Json)> = map.iter().filter(|(key, _)| *key != ID).collect();

        if let [(key, inner)] = body.as_slice() {
            let inner_path = format!("{path}.{key}");
            let primitive = match key.as_str() {
                "__bytes__" => Some(Value::Bytes(Arc::from(hex_field(inner, &inner_path)?))),
                "__bigint__" => {
                    let digits = inner
                        .as_str()
                        .ok_or_else(|| malformed(&inner_path, "expected decimal digits"))?;
                    let value = digits
                        .parse::<BigInt>()
                        .map_err(|_| malformed(&inner_path, "expected decimal digits"))?;
                    Some(Value::BigInt(value))
                }
                "__float__" => {
                    let value = inner
                        .as_str()
                        .and_then(|text| text.parse::<f64>().ok())
                        .ok_or_else(|| malformed(&inner_path, "expected inf, -inf or NaN"))?;
                    Some(Value::Float(value))
                }
                "__global__" => Some(Value::Global(self.class(inner, &inner_path)?)),
                _ => None,
            };
            if let Some(primitive) = primitive {
                if id.is_some() {
                    return Err(malformed(path, "primitive values cannot carry `$id`"));
                }
                return Ok(primitive);
            }
            let object = match key.as_str() {
                "__list__" => Some(Object::List(self.list(inner, &inner_path)?)),
                "__tuple__" => Some(Object::Tuple(self.list(inner, &inner_path)?)),
                "__set__" => Some(Object::Set(self.list(inner, &inner_path)?)),
                "__frozenset__" => Some(Object::FrozenSet(self.list(inner, &inner_path)?)),
                "__bytearray__" => Some(Object::ByteArray(hex_field(inner, &inner_path)?)),
                "__dict__" => Some(Object::Dict(self.pairs(inner, &inner_path)?)),
                _ => None,
            };
            if let Some(object) = object {
                return Ok(self.place(id, object));
            }
        }

        let object = if map.contains_key("__class__") {
            Object::Instance(self.instance(map, path)?)
        } else {
            let mut mapping = Mapping::new();
            for (key, value) in body {
                let value = self.value(value, &format!("{path}.{key}"))?;
                mapping.insert(Value::str(key), value);
            }
            Object::Dict(mapping)
        };
        Ok(self.place(id, object))
    }

    /// Stores `object` in its reserved slot, or in a fresh one.
    fn place(&mut self, id: Option<u64>, object: Object) -> Value {
        match id.and_then(|id| self.slots.get(&id).copied().map(|slot| (id, slot))) {
            Some((id, slot)) => {
                self.filled.insert(id);
                if let Some(reserved) = self.graph.get_mut(slot) {
                    *reserved = object;
                }
                Value::Ref(slot)
            }
            None => Value::Ref(self.graph.alloc(object)),
        }
    }

    fn pairs(&mut self, json: &Json, path: &str) -> Result<Mapping, InterchangeError> {
        let Json::Array(pairs) = json else {
            return Err(malformed(path, "expected a list of [key, value] pairs"));
        };
        let mut mapping = Mapping::new();
        for (index, pair) in pairs.iter().enumerate() {
            let pair_path = format!("{path}[{index}]");
            let Some([key, value]) = pair.as_array().map(Vec::as_slice) else {
                return Err(malformed(&pair_path, "expected a [key, value] pair"));
            };
            let key = self.value(key, &format!("{pair_path}[0]"))?;
            let value = self.value(value, &format!("{pair_path}[1]"))?;
            mapping.insert(key, value);
        }
        Ok(mapping)
    }

    fn fields(&mut self, json: Option<&Json>, path: &str) -> Result<Fields, InterchangeError> {
        let mut fields = Fields::new();
        let Some(json) = json else {
            return Ok(fields);
        };
        let Json::Object(map) = json else {
            return Err(malformed(path, "expected an object of fields"));
        };
        for (name, value) in map {
            let value = self.value(value, &format!("{path}.{name}"))?;
            fields.set(Arc::from(name.as_str()), value);
        }
        Ok(fields)
    }

    fn class(&self, json: &Json, path: &str) -> Result<Arc<ClassDescriptor>, InterchangeError> {
        let pair = json.as_array().map(Vec::as_slice);
        let Some([Json::String(module), Json::String(name)]) = pair else {
            return Err(malformed(path, "expected a [module, name] pair"));
        };
        Ok(self.registry.resolve_parts(module, name)?)
    }

    fn instance(&mut self, map: &Map<String, Json>, path: &str) -> Result<Instance, InterchangeError> {
        let field = |name: &str| map.get(name).filter(|value| !value.is_null());
        let class = match map.get("__class__") {
            Some(class) => self.class(class, &format!("{path}.__class__"))?,
            None => return Err(malformed(path, "instance has no `__class__`")),
        };
        let construction = match field("construction").and_then(Json::as_str) {
            None | Some("newobj") => Construction::NewObj,
            Some("reduce") => Construction::Reduce,
            Some("reconstructor") => Construction::Reconstructor,
            Some(_) => {
                return Err(malformed(
                    path,
                    "construction must be newobj, reduce or reconstructor",
                ))
            }
        };
        if construction != Construction::Reconstructor && !class.is_constructible() {
            return Err(malformed(path, "class is a reference and cannot be constructed"));
        }
        let args = match field("args") {
            Some(args) => self.list(args, &format!("{path}.args"))?,
            None => Vec::new(),
        };
        let mut instance = Instance::new(class, construction, args);
        if let Some(reconstructor) = field("reconstructor") {
            let reconstructor = self.class(reconstructor, &format!("{path}.reconstructor"))?;
            instance.reconstructor = Some(reconstructor);
        }
        if let Some(base) = field("base") {
            instance.base = Some(self.class(base, &format!("{path}.base"))?);
        }
        let dict = field("dict");
        let slots = field("slots");
        instance.dict = self.fields(dict, &format!("{path}.dict"))?;
        instance.slots = self.fields(slots, &format!("{path}.slots"))?;
        instance.state = match field("state").and_then(Json::as_str) {
            None => State::Unset,
            Some("dict") => State::Dict,
            Some("pair") => State::Pair {
                has_dict: dict.is_some(),
                has_slots: slots.is_some(),
            },
            Some("opaque") => {
                let value = field("value").unwrap_or(&Json::Null);
                State::Opaque(self.value(value, &format!("{path}.value"))?)
            }
            Some(_) => return Err(malformed(path, "state must be dict, pair or opaque")),
        };
        let accepts_items = instance.class.accepts_items();
        if let Some(items) = field("items") {
            instance.items = self.list(items, &format!("{path}.items"))?;
        }
        if let Some(entries) = field("entries") {
            instance.entries = self.pairs(entries, &format!("{path}.entries"))?;
        }
        if let Some(members) = field("members") {
            instance.members = self.list(members, &format!("{path}.members"))?;
        }
        let has_items = !instance.items.is_empty()
            || !instance.entries.is_empty()
            || !instance.members.is_empty();
        if has_items && !accepts_items {
            return Err(malformed(path, "class does not accept items"));
        }
        Ok(instance)
    }

    /// Every reserved slot must have been filled by its `$id` object.
    fn finish(&self) -> Result<(), InterchangeError> {
        match self.slots.keys().find(|id| !self.filled.contains(id)) {
            Some(id) => Err(InterchangeError::DanglingRef {
                path: "$".to_string(),
                id: *id,
            }),
            None => Ok(()),
        }
    }
}

fn number_value(number: &Number, path: &str) -> Result<Value, InterchangeError> {
    if let Some(int) = number.as_i64() {
        Ok(Value::Int(int))
    } else if let Some(int) = number.as_u64() {
        Ok(Value::BigInt(BigInt::from(int)))
    } else if let Some(float) = number.as_f64() {
        Ok(Value::Float(float))
    } else {
        Err(malformed(path, "number out of range"))
    }
}

fn hex_field(json: &Json, path: &str) -> Result<Vec<u8>, InterchangeError> {
    json.as_str()
        .and_then(unhex)
        .ok_or_else(|| malformed(path, "expected hex digits"))
}

fn malformed(path: &str, reason: &str) -> InterchangeError {
    InterchangeError::Malformed {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
