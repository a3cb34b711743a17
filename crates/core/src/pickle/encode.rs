use std::collections::HashMap;

use num_bigint::BigInt;

use crate::error::EncodeError;
use crate::registry::ClassDescriptor;
use crate::resource::DecodeLimits;
use crate::version::{ENCODE_PROTOCOL, ENCODE_PROTOCOL_BYTEARRAY};

use super::opcode::Opcode;
use super::value::{Construction, Fields, Graph, Instance, Mapping, ObjId, Object, State, Value};

/// Serializes the graph reachable from `root`.
///
/// Every composite object gets a memo slot the first time it is written and
/// is fetched from that slot afterwards, so sharing and cycles survive a
/// decode of the output.
pub fn encode(graph: &Graph, root: &Value) -> Result<Vec<u8>, EncodeError> {
    encode_with_limits(graph, root, &DecodeLimits::default())
}

/// [`encode`] with the nesting ceiling taken from `limits.max_object_depth`.
pub fn encode_with_limits(
    graph: &Graph,
    root: &Value,
    limits: &DecodeLimits,
) -> Result<Vec<u8>, EncodeError> {
    let mut encoder = Encoder {
        graph,
        out: Vec::new(),
        memo: HashMap::new(),
        active: HashMap::new(),
        depth: 0,
        max_depth: limits.max_object_depth,
    };
    let protocol = if graph.objects().any(|o| matches!(o, Object::ByteArray(_))) {
        ENCODE_PROTOCOL_BYTEARRAY
    } else {
        ENCODE_PROTOCOL
    };
    encoder.op(Opcode::Proto);
    encoder.out.push(protocol);
    encoder.value(root)?;
    encoder.op(Opcode::Stop);
    Ok(encoder.out)
}

struct Encoder<'g> {
    graph: &'g Graph,
    out: Vec<u8>,
    memo: HashMap<ObjId, u32>,
    /// Objects whose constructor is still being written, with entry counts.
    active: HashMap<ObjId, u32>,
    depth: usize,
    max_depth: usize,
}

impl<'g> Encoder<'g> {
    fn op(&mut self, op: Opcode) {
        self.out.push(op.byte());
    }

    fn value(&mut self, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::None => self.op(Opcode::None),
            Value::Bool(true) => self.op(Opcode::NewTrue),
            Value::Bool(false) => self.op(Opcode::NewFalse),
            Value::Int(value) => self.int(*value),
            Value::BigInt(value) => self.long(value),
            Value::Float(value) => {
                self.op(Opcode::BinFloat);
                self.out.extend_from_slice(&value.to_be_bytes());
            }
            Value::Str(text) => self.text(text),
            Value::Bytes(bytes) => self.bytes(bytes),
            Value::Global(class) => self.global(class),
            Value::Ref(id) => self.object(*id)?,
        }
        Ok(())
    }

    fn int(&mut self, value: i64) {
        match value {
            0..=0xff => {
                self.op(Opcode::BinInt1);
                self.out.push(value as u8);
            }
            0x100..=0xffff => {
                self.op(Opcode::BinInt2);
                self.out.extend_from_slice(&(value as u16).to_le_bytes());
            }
            _ => match i32::try_from(value) {
                Ok(small) => {
                    self.op(Opcode::BinInt);
                    self.out.extend_from_slice(&small.to_le_bytes());
                }
                Err(_) => self.long(&BigInt::from(value)),
            },
        }
    }

    fn long(&mut self, value: &BigInt) {
        let bytes = value.to_signed_bytes_le();
        match u8::try_from(bytes.len()) {
            Ok(len) => {
                self.op(Opcode::Long1);
                self.out.push(len);
            }
            Err(_) => {
                self.op(Opcode::Long4);
                self.out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            }
        }
        self.out.extend_from_slice(&bytes);
    }

    fn text(&mut self, text: &str) {
        let bytes = text.as_bytes();
        self.sized(
            bytes,
            Opcode::ShortBinUnicode,
            Opcode::BinUnicode,
            Opcode::BinUnicode8,
        );
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.sized(
            bytes,
            Opcode::ShortBinBytes,
            Opcode::BinBytes,
            Opcode::BinBytes8,
        );
    }

    fn sized(&mut self, bytes: &[u8], short: Opcode, long: Opcode, huge: Opcode) {
        if let Ok(len) = u8::try_from(bytes.len()) {
            self.op(short);
            self.out.push(len);
        } else if let Ok(len) = u32::try_from(bytes.len()) {
            self.op(long);
            self.out.extend_from_slice(&len.to_le_bytes());
        } else {
            self.op(huge);
            self.out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        }
        self.out.extend_from_slice(bytes);
    }

    fn global(&mut self, class: &ClassDescriptor) {
        self.op(Opcode::Global);
        self.out.extend_from_slice(class.module().as_bytes());
        self.out.push(b'\n');
        self.out.extend_from_slice(class.name().as_bytes());
        self.out.push(b'\n');
    }

    fn memoize(&mut self, id: ObjId) {
        let slot = self.memo.len() as u32;
        self.memo.insert(id, slot);
        self.put(slot);
    }

    fn put(&mut self, slot: u32) {
        match u8::try_from(slot) {
            Ok(slot) => {
                self.op(Opcode::BinPut);
                self.out.push(slot);
            }
            Err(_) => {
                self.op(Opcode::LongBinPut);
                self.out.extend_from_slice(&slot.to_le_bytes());
            }
        }
    }

    fn get(&mut self, slot: u32) {
        match u8::try_from(slot) {
            Ok(slot) => {
                self.op(Opcode::BinGet);
                self.out.push(slot);
            }
            Err(_) => {
                self.op(Opcode::LongBinGet);
                self.out.extend_from_slice(&slot.to_le_bytes());
            }
        }
    }

    fn object(&mut self, id: ObjId) -> Result<(), EncodeError> {
        if let Some(&slot) = self.memo.get(&id) {
            self.get(slot);
            return Ok(());
        }
        let graph = self.graph;
        let object = graph
            .get(id)
            .ok_or(EncodeError::DanglingObject { id: id.raw() })?;
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(EncodeError::DepthExceeded {
                max: self.max_depth,
            });
        }
        match object {
            Object::List(items) => {
                self.op(Opcode::EmptyList);
                self.memoize(id);
                self.batch(items, Opcode::Appends)?;
            }
            Object::Dict(mapping) => {
                self.op(Opcode::EmptyDict);
                self.memoize(id);
                self.entries(mapping)?;
            }
            Object::Set(items) => {
                self.op(Opcode::EmptySet);
                self.memoize(id);
                self.batch(items, Opcode::AddItems)?;
            }
            Object::ByteArray(bytes) => {
                self.op(Opcode::ByteArray8);
                self.out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
                self.out.extend_from_slice(bytes);
                self.memoize(id);
            }
            Object::Tuple(items) => self.immutable(id, items, Opcode::Tuple, "tuple")?,
            Object::FrozenSet(items) => {
                self.immutable(id, items, Opcode::FrozenSet, "frozenset")?
            }
            Object::Instance(instance) => self.instance(id, instance)?,
        }
        self.depth -= 1;
        Ok(())
    }

    /// Tuples and frozensets are built from their items, so an item that
    /// leads back to the container memoizes it first. In that case the
    /// finished copy is discarded and the memoized one fetched.
    fn immutable(
        &mut self,
        id: ObjId,
        items: &[Value],
        build: Opcode,
        what: &str,
    ) -> Result<(), EncodeError> {
        if items.is_empty() && build == Opcode::Tuple {
            self.op(Opcode::EmptyTuple);
            self.memoize(id);
            return Ok(());
        }
        let entered = self.active.entry(id).or_insert(0);
        *entered += 1;
        if *entered > 2 {
            return Err(EncodeError::RecursiveConstructor {
                class: what.to_string(),
            });
        }
        self.op(Opcode::Mark);
        for item in items {
            self.value(item)?;
        }
        self.leave(id);
        if let Some(&slot) = self.memo.get(&id) {
            self.op(Opcode::PopMark);
            self.get(slot);
        } else {
            self.op(build);
            self.memoize(id);
        }
        Ok(())
    }

    fn leave(&mut self, id: ObjId) {
        if let Some(count) = self.active.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.active.remove(&id);
            }
        }
    }

    fn batch(&mut self, items: &[Value], op: Opcode) -> Result<(), EncodeError> {
        if items.is_empty() {
            return Ok(());
        }
        self.op(Opcode::Mark);
        for item in items {
            self.value(item)?;
        }
        self.op(op);
        Ok(())
    }

    fn entries(&mut self, mapping: &Mapping) -> Result<(), EncodeError> {
        if mapping.is_empty() {
            return Ok(());
        }
        self.op(Opcode::Mark);
        for (key, value) in mapping.iter() {
            self.value(key)?;
            self.value(value)?;
        }
        self.op(Opcode::SetItems);
        Ok(())
    }

    fn args(&mut self, args: &[Value]) -> Result<(), EncodeError> {
        if args.is_empty() {
            self.op(Opcode::EmptyTuple);
            return Ok(());
        }
        self.op(Opcode::Mark);
        for arg in args {
            self.value(arg)?;
        }
        self.op(Opcode::Tuple);
        Ok(())
    }

    /// An instance reached again from its own constructor arguments (through
    /// a list or dict written there) is written in full by the inner visit.
    /// The outer copy is then popped and the memoized one fetched.
    fn instance(&mut self, id: ObjId, instance: &Instance) -> Result<(), EncodeError> {
        let class = instance.class.qualified();
        let entered = self.active.entry(id).or_insert(0);
        *entered += 1;
        if *entered > 2 {
            return Err(EncodeError::RecursiveConstructor {
                class: class.to_string(),
            });
        }
        match instance.construction {
            Construction::NewObj => {
                self.global(&instance.class);
                self.args(&instance.args)?;
                self.op(Opcode::NewObj);
            }
            Construction::Reduce => {
                self.global(&instance.class);
                self.args(&instance.args)?;
                self.op(Opcode::Reduce);
            }
            Construction::Reconstructor => {
                let (Some(reconstructor), Some(base)) = (&instance.reconstructor, &instance.base)
                else {
                    return Err(EncodeError::UnencodableValue {
                        reason: format!("`{class}` lost its reconstructor arguments"),
                    });
                };
                self.global(reconstructor);
                self.op(Opcode::Mark);
                self.global(&instance.class);
                self.global(base);
                match instance.args.first() {
                    Some(state) => self.value(state)?,
                    None => self.op(Opcode::None),
                }
                self.op(Opcode::Tuple);
                self.op(Opcode::Reduce);
            }
        }
        self.leave(id);
        if let Some(&slot) = self.memo.get(&id) {
            self.op(Opcode::Pop);
            self.get(slot);
            return Ok(());
        }
        self.memoize(id);
        self.batch(&instance.items, Opcode::Appends)?;
        self.entries(&instance.entries)?;
        self.batch(&instance.members, Opcode::AddItems)?;
        match &instance.state {
            State::Unset => {}
            State::Dict => {
                self.fields(&instance.dict)?;
                self.op(Opcode::Build);
            }
            State::Pair {
                has_dict,
                has_slots,
            } => {
                self.optional_fields(*has_dict, &instance.dict)?;
                self.optional_fields(*has_slots, &instance.slots)?;
                self.op(Opcode::Tuple2);
                self.op(Opcode::Build);
            }
            State::Opaque(state) => {
                self.value(state)?;
                self.op(Opcode::Build);
            }
        }
        Ok(())
    }

    fn fields(&mut self, fields: &Fields) -> Result<(), EncodeError> {
        self.op(Opcode::EmptyDict);
        if fields.is_empty() {
            return Ok(());
        }
        self.op(Opcode::Mark);
        for (name, value) in fields.iter() {
            self.text(name);
            self.value(value)?;
        }
        self.op(Opcode::SetItems);
        Ok(())
    }

    fn optional_fields(&mut self, present: bool, fields: &Fields) -> Result<(), EncodeError> {
        if present {
            self.fields(fields)
        } else {
            self.op(Opcode::None);
            Ok(())
        }
    }
}
