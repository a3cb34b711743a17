//! Decoded object graph.
//!
//! Composite objects live in an arena owned by [`Graph`] and are addressed by
//! [`ObjId`]. A [`Value`] is either an immutable primitive or a reference into
//! the arena, so shared and cyclic structure is represented exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use num_bigint::BigInt;

use crate::registry::ClassDescriptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(u32);

impl ObjId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    /// A catalog class or callable used as a value.
    Global(Arc<ClassDescriptor>),
    Ref(ObjId),
}

impl Value {
    pub fn str(text: &str) -> Self {
        Value::Str(Arc::from(text))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<ObjId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Python-style truthiness for primitives. References are always true;
    /// callers that care about empty containers inspect the object itself.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::BigInt(value) => value.sign() != num_bigint::Sign::NoSign,
            Value::Float(value) => *value != 0.0,
            Value::Str(text) => !text.is_empty(),
            Value::Bytes(bytes) => !bytes.is_empty(),
            Value::Global(_) | Value::Ref(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::BigInt(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Global(_) => "global",
            Value::Ref(_) => "object",
        }
    }
}

/// Primitive equality; references compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Global(a), Value::Global(b)) => a.qualified() == b.qualified(),
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

/// Hashable projection of a [`Value`], used to index mapping keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Key {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(u64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Global(String),
    Ref(ObjId),
}

impl From<&Value> for Key {
    fn from(value: &Value) -> Self {
        match value {
            Value::None => Key::None,
            Value::Bool(v) => Key::Bool(*v),
            Value::Int(v) => Key::Int(*v),
            Value::BigInt(v) => Key::BigInt(v.clone()),
            Value::Float(v) => Key::Float(v.to_bits()),
            Value::Str(v) => Key::Str(Arc::clone(v)),
            Value::Bytes(v) => Key::Bytes(Arc::clone(v)),
            Value::Global(class) => Key::Global(class.qualified().to_string()),
            Value::Ref(id) => Key::Ref(*id),
        }
    }
}

/// Insertion-ordered mapping with last-write-wins key replacement.
#[derive(Clone, Debug, Default)]
pub struct Mapping {
    entries: Vec<(Value, Value)>,
    index: HashMap<Key, usize>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        let probe = Key::from(&key);
        if let Some(&slot) = self.index.get(&probe) {
            self.entries[slot].1 = value;
            return;
        }
        self.index.insert(probe, self.entries.len());
        self.entries.push((key, value));
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.index
            .get(&Key::from(key))
            .map(|&slot| &self.entries[slot].1)
    }

    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.get(&Value::str(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }
}

impl PartialEq for Mapping {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FromIterator<(Value, Value)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut mapping = Mapping::new();
        for (key, value) in iter {
            mapping.insert(key, value);
        }
        mapping
    }
}

/// Named attributes of an instance, in the order they were set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fields(Vec<(Arc<str>, Value)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: Arc<str>, value: Value) {
        if let Some(slot) = self.0.iter_mut().find(|(key, _)| *key == name) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_ref(), value))
    }
}

/// How an instance came into existence in the byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Construction {
    NewObj,
    Reduce,
    Reconstructor,
}

/// Shape of the state last applied with `BUILD`.
#[derive(Clone, Debug, PartialEq)]
pub enum State {
    Unset,
    /// A string-keyed mapping spread into `Instance::dict`.
    Dict,
    /// `(dict | None, slots | None)`.
    Pair { has_dict: bool, has_slots: bool },
    /// Anything else, kept verbatim.
    Opaque(Value),
}

#[derive(Clone, Debug)]
pub struct Instance {
    pub class: Arc<ClassDescriptor>,
    pub construction: Construction,
    /// Reconstructor callable and base class, for `Construction::Reconstructor`.
    pub reconstructor: Option<Arc<ClassDescriptor>>,
    pub base: Option<Arc<ClassDescriptor>>,
    pub args: Vec<Value>,
    pub dict: Fields,
    pub slots: Fields,
    pub state: State,
    /// Targets of `APPEND(S)`.
    pub items: Vec<Value>,
    /// Targets of `SETITEM(S)`.
    pub entries: Mapping,
    /// Targets of `ADDITEMS`.
    pub members: Vec<Value>,
}

impl Instance {
    pub fn new(class: Arc<ClassDescriptor>, construction: Construction, args: Vec<Value>) -> Self {
        Self {
            class,
            construction,
            reconstructor: None,
            base: None,
            args,
            dict: Fields::new(),
            slots: Fields::new(),
            state: State::Unset,
            items: Vec::new(),
            entries: Mapping::new(),
            members: Vec::new(),
        }
    }

    /// Looks a field up in the dict state, then the slot state, then the
    /// named constructor arguments.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.dict
            .get(name)
            .or_else(|| self.slots.get(name))
            .or_else(|| self.arg(name))
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.class
            .args
            .iter()
            .position(|arg| arg == name)
            .and_then(|index| self.args.get(index))
    }

    /// Every field name this instance carries, in a stable order.
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        let named_args = self
            .class
            .args
            .iter()
            .take(self.args.len())
            .map(String::as_str);
        for name in self
            .dict
            .iter()
            .map(|(name, _)| name)
            .chain(self.slots.iter().map(|(name, _)| name))
            .chain(named_args)
        {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

#[derive(Clone, Debug)]
pub enum Object {
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Mapping),
    Set(Vec<Value>),
    FrozenSet(Vec<Value>),
    ByteArray(Vec<u8>),
    Instance(Instance),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::List(_) => "list",
            Object::Tuple(_) => "tuple",
            Object::Dict(_) => "dict",
            Object::Set(_) => "set",
            Object::FrozenSet(_) => "frozenset",
            Object::ByteArray(_) => "bytearray",
            Object::Instance(_) => "instance",
        }
    }
}

/// Arena of composite objects produced by one decode call.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    objects: Vec<Object>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, object: Object) -> ObjId {
        let id = ObjId(self.objects.len() as u32);
        self.objects.push(object);
        id
    }

    pub fn get(&self, id: ObjId) -> Option<&Object> {
        self.objects.get(id.index())
    }

    pub fn get_mut(&mut self, id: ObjId) -> Option<&mut Object> {
        self.objects.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.iter()
    }

    /// Follows a value to its object, if it is a reference.
    pub fn resolve<'a>(&'a self, value: &Value) -> Option<&'a Object> {
        value.as_ref_id().and_then(|id| self.get(id))
    }

    pub fn instance(&self, value: &Value) -> Option<&Instance> {
        match self.resolve(value) {
            Some(Object::Instance(instance)) => Some(instance),
            _ => None,
        }
    }

    /// Elements of a list or tuple.
    pub fn sequence<'a>(&'a self, value: &Value) -> Option<&'a [Value]> {
        match self.resolve(value) {
            Some(Object::List(items)) | Some(Object::Tuple(items)) => Some(items),
            _ => None,
        }
    }

    /// Structural equality of `self_root` in `self` against `other_root` in
    /// `other`. Shared objects must be shared in both graphs and cycles must
    /// close at the same place.
    pub fn isomorphic(&self, self_root: &Value, other: &Graph, other_root: &Value) -> bool {
        let mut matcher = Isomorphism {
            left: self,
            right: other,
            forward: HashMap::new(),
            backward: HashMap::new(),
        };
        matcher.values(self_root, other_root)
    }
}

struct Isomorphism<'a> {
    left: &'a Graph,
    right: &'a Graph,
    forward: HashMap<ObjId, ObjId>,
    backward: HashMap<ObjId, ObjId>,
}

impl Isomorphism<'_> {
    fn values(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Ref(a), Value::Ref(b)) => self.objects(*a, *b),
            (Value::Ref(_), _) | (_, Value::Ref(_)) => false,
            _ => a == b,
        }
    }

    fn all(&mut self, a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.values(x, y))
    }

    fn fields(&mut self, a: &Fields, b: &Fields) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && self.values(va, vb))
    }

    fn mappings(&mut self, a: &Mapping, b: &Mapping) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b.iter())
                .all(|((ka, va), (kb, vb))| self.values(ka, kb) && self.values(va, vb))
    }

    fn objects(&mut self, a: ObjId, b: ObjId) -> bool {
        match (self.forward.get(&a), self.backward.get(&b)) {
            (Some(seen_b), Some(seen_a)) => return *seen_b == b && *seen_a == a,
            (None, None) => {}
            _ => return false,
        }
        self.forward.insert(a, b);
        self.backward.insert(b, a);
        let (left, right) = (self.left, self.right);
        let (Some(x), Some(y)) = (left.get(a), right.get(b)) else {
            return false;
        };
        match (x, y) {
            (Object::List(x), Object::List(y))
            | (Object::Tuple(x), Object::Tuple(y))
            | (Object::Set(x), Object::Set(y))
            | (Object::FrozenSet(x), Object::FrozenSet(y)) => self.all(x, y),
            (Object::Dict(x), Object::Dict(y)) => self.mappings(x, y),
            (Object::ByteArray(x), Object::ByteArray(y)) => x == y,
            (Object::Instance(x), Object::Instance(y)) => {
                x.class.qualified() == y.class.qualified()
                    && x.construction == y.construction
                    && x.base.as_ref().map(|c| c.qualified())
                        == y.base.as_ref().map(|c| c.qualified())
                    && self.all(&x.args, &y.args)
                    && self.fields(&x.dict, &y.dict)
                    && self.fields(&x.slots, &y.slots)
                    && self.states(&x.state, &y.state)
                    && self.all(&x.items, &y.items)
                    && self.mappings(&x.entries, &y.entries)
                    && self.all(&x.members, &y.members)
            }
            _ => false,
        }
    }

    fn states(&mut self, a: &State, b: &State) -> bool {
        match (a, b) {
            (State::Opaque(a), State::Opaque(b)) => self.values(a, b),
            _ => a == b,
        }
    }
}
