use std::collections::HashMap;
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::error::DecodeError;
use crate::registry::{BuiltinKind, ClassDescriptor, ClassRegistry, Policy, Profile};
use crate::resource::DecodeLimits;
use crate::version::HIGHEST_PROTOCOL;

use super::opcode::{Opcode, Reader, Support};
use super::value::{Construction, Graph, Instance, Mapping, ObjId, Object, State, Value};

/// Result of one successful decode call.
#[derive(Clone, Debug)]
pub struct Decoded {
    pub graph: Graph,
    pub root: Value,
    /// Protocol declared by the stream's `PROTO` opcode, 0 when absent.
    pub protocol: u8,
}

pub fn decode(input: &[u8], registry: &ClassRegistry) -> Result<Decoded, DecodeError> {
    decode_with_limits(input, registry, DecodeLimits::default())
}

pub fn decode_with_limits(
    input: &[u8],
    registry: &ClassRegistry,
    limits: DecodeLimits,
) -> Result<Decoded, DecodeError> {
    Decoder::new(input, registry, limits).run()
}

/// Single-use interpreter over one stream.
struct Decoder<'a> {
    reader: Reader<'a>,
    registry: &'a ClassRegistry,
    limits: DecodeLimits,
    graph: Graph,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u64, Value>,
    protocol: u8,
    offset: usize,
    op: &'static str,
    /// Archive indexes store raw prefix bytes in Python 2 `str`, so there
    /// they are never read as text.
    py2_bytes: bool,
}

impl<'a> Decoder<'a> {
    fn new(input: &'a [u8], registry: &'a ClassRegistry, limits: DecodeLimits) -> Self {
        Self {
            reader: Reader::new(input),
            registry,
            limits,
            graph: Graph::new(),
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
            protocol: 0,
            offset: 0,
            op: "",
            py2_bytes: registry.profile() == Profile::Archive,
        }
    }

    fn run(mut self) -> Result<Decoded, DecodeError> {
        if self.reader.is_empty() {
            return Err(DecodeError::EmptyStream);
        }
        loop {
            self.offset = self.reader.pos();
            self.op = "opcode";
            let byte = self.reader.u8(self.offset, "STOP")?;
            let Some(op) = Opcode::from_byte(byte) else {
                return Err(DecodeError::UnsupportedOpcode {
                    offset: self.offset,
                    opcode: format!("0x{byte:02x}"),
                });
            };
            self.op = op.name();
            match op.support() {
                Support::Allowed => {}
                Support::Forbidden => {
                    return Err(self.forbidden(
                        "opcode executes producer code or reaches outside the stream",
                    ))
                }
                Support::Unsupported => {
                    return Err(DecodeError::UnsupportedOpcode {
                        offset: self.offset,
                        opcode: op.name().to_string(),
                    })
                }
            }
            if op == Opcode::Stop {
                let root = self.pop()?;
                return Ok(Decoded {
                    graph: self.graph,
                    root,
                    protocol: self.protocol,
                });
            }
            self.step(op)?;
        }
    }

    fn step(&mut self, op: Opcode) -> Result<(), DecodeError> {
        match op {
            Opcode::Proto => {
                let protocol = self.reader.u8(self.offset, self.op)?;
                if protocol > HIGHEST_PROTOCOL {
                    return Err(self.invalid(format!("protocol {protocol} is not supported")));
                }
                self.protocol = protocol;
            }
            Opcode::Frame => {
                self.reader.u64(self.offset, self.op)?;
            }
            Opcode::Mark => {
                if self.marks.len() >= self.limits.max_marks {
                    return Err(self.limit("max_marks", self.limits.max_marks));
                }
                self.marks.push(self.stack.len());
            }
            Opcode::Pop => {
                if self.stack.len() > self.mark_floor() {
                    self.stack.pop();
                } else {
                    self.pop_mark()?;
                }
            }
            Opcode::PopMark => {
                self.pop_mark()?;
            }
            Opcode::Dup => {
                let top = self.top()?.clone();
                self.push(top)?;
            }
            Opcode::None => self.push(Value::None)?,
            Opcode::NewTrue => self.push(Value::Bool(true))?,
            Opcode::NewFalse => self.push(Value::Bool(false))?,
            Opcode::Int => {
                let line = self.text_line()?;
                let value = match line.as_str() {
                    "00" => Value::Bool(false),
                    "01" => Value::Bool(true),
                    text => self.parse_int(text)?,
                };
                self.push(value)?;
            }
            Opcode::Long => {
                let line = self.text_line()?;
                let value = self.parse_int(line.trim_end_matches('L'))?;
                self.push(value)?;
            }
            Opcode::BinInt => {
                let value = self.reader.i32(self.offset, self.op)?;
                self.push(Value::Int(i64::from(value)))?;
            }
            Opcode::BinInt1 => {
                let value = self.reader.u8(self.offset, self.op)?;
                self.push(Value::Int(i64::from(value)))?;
            }
            Opcode::BinInt2 => {
                let value = self.reader.u16(self.offset, self.op)?;
                self.push(Value::Int(i64::from(value)))?;
            }
            Opcode::Long1 => {
                let len = usize::from(self.reader.u8(self.offset, self.op)?);
                let bytes = self.reader.take(len, self.offset, self.op)?;
                self.push(long_value(bytes))?;
            }
            Opcode::Long4 => {
                let len = self.reader.i32(self.offset, self.op)?;
                let len = self.signed_len(len)?;
                let bytes = self.reader.take(len, self.offset, self.op)?;
                self.push(long_value(bytes))?;
            }
            Opcode::Float => {
                let line = self.text_line()?;
                let value = line
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| self.invalid(format!("`{line}` is not a float")))?;
                self.push(Value::Float(value))?;
            }
            Opcode::BinFloat => {
                let value = self.reader.f64_be(self.offset, self.op)?;
                self.push(Value::Float(value))?;
            }
            Opcode::String => {
                let line = self.reader.line(self.offset, self.op)?;
                let bytes = unquote(line).ok_or_else(|| self.invalid("malformed quoted string"))?;
                self.push(self.py2_string(bytes))?;
            }
            Opcode::BinString => {
                let len = self.reader.i32(self.offset, self.op)?;
                let len = self.signed_len(len)?;
                let bytes = self.reader.take(len, self.offset, self.op)?;
                self.push(self.py2_string(bytes.to_vec()))?;
            }
            Opcode::ShortBinString => {
                let bytes = self.sized1()?;
                self.push(self.py2_string(bytes.to_vec()))?;
            }
            Opcode::Unicode => {
                let line = self.reader.line(self.offset, self.op)?;
                let text = raw_unicode_escape(line)
                    .ok_or_else(|| self.invalid("malformed raw-unicode-escape text"))?;
                self.push(Value::Str(Arc::from(text)))?;
            }
            Opcode::BinUnicode => {
                let len = self.reader.u32(self.offset, self.op)? as u64;
                let bytes = self.sized(len)?;
                let text = self.utf8(bytes)?;
                self.push(text)?;
            }
            Opcode::ShortBinUnicode => {
                let bytes = self.sized1()?;
                let text = self.utf8(bytes)?;
                self.push(text)?;
            }
            Opcode::BinUnicode8 => {
                let len = self.reader.u64(self.offset, self.op)?;
                let bytes = self.sized(len)?;
                let text = self.utf8(bytes)?;
                self.push(text)?;
            }
            Opcode::BinBytes => {
                let len = self.reader.u32(self.offset, self.op)? as u64;
                let bytes = self.sized(len)?;
                self.push(Value::Bytes(Arc::from(bytes)))?;
            }
            Opcode::ShortBinBytes => {
                let bytes = self.sized1()?;
                self.push(Value::Bytes(Arc::from(bytes)))?;
            }
            Opcode::BinBytes8 => {
                let len = self.reader.u64(self.offset, self.op)?;
                let bytes = self.sized(len)?;
                self.push(Value::Bytes(Arc::from(bytes)))?;
            }
            Opcode::ByteArray8 => {
                let len = self.reader.u64(self.offset, self.op)?;
                let bytes = self.sized(len)?.to_vec();
                let id = self.alloc(Object::ByteArray(bytes))?;
                self.push(Value::Ref(id))?;
            }
            Opcode::EmptyList => self.push_new(Object::List(Vec::new()))?,
            Opcode::EmptyTuple => self.push_new(Object::Tuple(Vec::new()))?,
            Opcode::EmptyDict => self.push_new(Object::Dict(Mapping::new()))?,
            Opcode::EmptySet => self.push_new(Object::Set(Vec::new()))?,
            Opcode::List => {
                let items = self.pop_mark()?;
                self.push_new(Object::List(items))?;
            }
            Opcode::Tuple => {
                let items = self.pop_mark()?;
                self.push_new(Object::Tuple(items))?;
            }
            Opcode::Tuple1 | Opcode::Tuple2 | Opcode::Tuple3 => {
                let count = match op {
                    Opcode::Tuple1 => 1,
                    Opcode::Tuple2 => 2,
                    _ => 3,
                };
                if self.stack.len() < self.mark_floor() + count {
                    return Err(self.underflow());
                }
                let items = self.stack.split_off(self.stack.len() - count);
                self.push_new(Object::Tuple(items))?;
            }
            Opcode::FrozenSet => {
                let items = self.pop_mark()?;
                self.push_new(Object::FrozenSet(items))?;
            }
            Opcode::Dict => {
                let items = self.pop_mark()?;
                if items.len() % 2 != 0 {
                    return Err(self.invalid("odd number of items for DICT"));
                }
                let mapping = pairs(items).collect();
                self.push_new(Object::Dict(mapping))?;
            }
            Opcode::Append => {
                let value = self.pop()?;
                self.append(vec![value])?;
            }
            Opcode::Appends => {
                let items = self.pop_mark()?;
                self.append(items)?;
            }
            Opcode::SetItem => {
                let value = self.pop()?;
                let key = self.pop()?;
                self.set_items(vec![key, value])?;
            }
            Opcode::SetItems => {
                let items = self.pop_mark()?;
                if items.len() % 2 != 0 {
                    return Err(self.invalid("odd number of items for SETITEMS"));
                }
                self.set_items(items)?;
            }
            Opcode::AddItems => {
                let items = self.pop_mark()?;
                self.add_items(items)?;
            }
            Opcode::Global => {
                let module = self.text_line()?;
                let name = self.text_line()?;
                let class = self.resolve(&module, &name)?;
                self.push(Value::Global(class))?;
            }
            Opcode::StackGlobal => {
                let name = self.pop()?;
                let module = self.pop()?;
                let (Value::Str(module), Value::Str(name)) = (module, name) else {
                    return Err(self.invalid("STACK_GLOBAL operands must be strings"));
                };
                let class = self.resolve(&module, &name)?;
                self.push(Value::Global(class))?;
            }
            Opcode::NewObj => {
                let args = self.pop()?;
                let class = self.pop()?;
                let class = self.callable(class)?;
                let args = self.tuple_items(&args)?;
                self.construct(class, Construction::NewObj, args)?;
            }
            Opcode::NewObjEx => {
                let kwargs = self.pop()?;
                let args = self.pop()?;
                let class = self.pop()?;
                match self.graph.resolve(&kwargs) {
                    Some(Object::Dict(mapping)) if mapping.is_empty() => {}
                    _ => return Err(self.invalid("keyword constructor arguments are not supported")),
                }
                let class = self.callable(class)?;
                let args = self.tuple_items(&args)?;
                self.construct(class, Construction::NewObj, args)?;
            }
            Opcode::Reduce => {
                let args = self.pop()?;
                let callable = self.pop()?;
                let callable = self.callable(callable)?;
                let args = self.tuple_items(&args)?;
                self.construct(callable, Construction::Reduce, args)?;
            }
            Opcode::Build => {
                let state = self.pop()?;
                let target = self.top()?.clone();
                self.build(&target, state)?;
            }
            Opcode::Put => {
                let line = self.text_line()?;
                let slot = line
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| self.invalid(format!("`{line}` is not a memo slot")))?;
                self.memo_put(slot)?;
            }
            Opcode::BinPut => {
                let slot = self.reader.u8(self.offset, self.op)?;
                self.memo_put(u64::from(slot))?;
            }
            Opcode::LongBinPut => {
                let slot = self.reader.u32(self.offset, self.op)?;
                self.memo_put(u64::from(slot))?;
            }
            Opcode::Memoize => {
                let slot = self.memo.len() as u64;
                self.memo_put(slot)?;
            }
            Opcode::Get => {
                let line = self.text_line()?;
                let slot = line
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| self.invalid(format!("`{line}` is not a memo slot")))?;
                self.memo_get(slot)?;
            }
            Opcode::BinGet => {
                let slot = self.reader.u8(self.offset, self.op)?;
                self.memo_get(u64::from(slot))?;
            }
            Opcode::LongBinGet => {
                let slot = self.reader.u32(self.offset, self.op)?;
                self.memo_get(u64::from(slot))?;
            }
            Opcode::Stop
            | Opcode::PersId
            | Opcode::BinPersId
            | Opcode::Inst
            | Opcode::Obj
            | Opcode::Ext1
            | Opcode::Ext2
            | Opcode::Ext4
            | Opcode::NextBuffer
            | Opcode::ReadonlyBuffer => {
                return Err(DecodeError::UnsupportedOpcode {
                    offset: self.offset,
                    opcode: op.name().to_string(),
                })
            }
        }
        Ok(())
    }

    fn mark_floor(&self) -> usize {
        self.marks.last().copied().unwrap_or(0)
    }

    fn push(&mut self, value: Value) -> Result<(), DecodeError> {
        if self.stack.len() >= self.limits.max_stack_depth {
            return Err(self.limit("max_stack_depth", self.limits.max_stack_depth));
        }
        self.stack.push(value);
        Ok(())
    }

    fn push_new(&mut self, object: Object) -> Result<(), DecodeError> {
        let id = self.alloc(object)?;
        self.push(Value::Ref(id))
    }

    fn pop(&mut self) -> Result<Value, DecodeError> {
        if self.stack.len() <= self.mark_floor() {
            return Err(self.underflow());
        }
        self.stack.pop().ok_or_else(|| self.underflow())
    }

    fn top(&self) -> Result<&Value, DecodeError> {
        if self.stack.len() <= self.mark_floor() {
            return Err(self.underflow());
        }
        self.stack.last().ok_or_else(|| self.underflow())
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>, DecodeError> {
        let Some(mark) = self.marks.pop() else {
            return Err(DecodeError::MissingMark {
                offset: self.offset,
                opcode: self.op,
            });
        };
        let items = self.stack.split_off(mark);
        self.check_len(items.len())?;
        Ok(items)
    }

    fn alloc(&mut self, object: Object) -> Result<ObjId, DecodeError> {
        if self.graph.len() >= self.limits.max_objects {
            return Err(self.limit("max_objects", self.limits.max_objects));
        }
        Ok(self.graph.alloc(object))
    }

    fn memo_put(&mut self, slot: u64) -> Result<(), DecodeError> {
        let value = self.top()?.clone();
        if !self.memo.contains_key(&slot) && self.memo.len() >= self.limits.max_memo_entries {
            return Err(self.limit("max_memo_entries", self.limits.max_memo_entries));
        }
        self.memo.insert(slot, value);
        Ok(())
    }

    fn memo_get(&mut self, slot: u64) -> Result<(), DecodeError> {
        let value = self
            .memo
            .get(&slot)
            .cloned()
            .ok_or(DecodeError::DanglingBackReference {
                offset: self.offset,
                slot,
            })?;
        self.push(value)
    }

    fn text_line(&mut self) -> Result<String, DecodeError> {
        let line = self.reader.line(self.offset, self.op)?;
        if line.len() > self.limits.max_operand_len {
            return Err(self.limit("max_operand_len", self.limits.max_operand_len));
        }
        std::str::from_utf8(line)
            .map(|text| text.trim_end_matches('\r').to_string())
            .map_err(|_| self.invalid("operand is not valid text"))
    }

    fn parse_int(&self, text: &str) -> Result<Value, DecodeError> {
        let text = text.trim();
        if let Ok(value) = text.parse::<i64>() {
            return Ok(Value::Int(value));
        }
        text.parse::<BigInt>()
            .map(Value::BigInt)
            .map_err(|_| self.invalid(format!("`{text}` is not an integer")))
    }

    fn signed_len(&self, len: i32) -> Result<usize, DecodeError> {
        usize::try_from(len).map_err(|_| self.invalid(format!("negative length {len}")))
    }

    fn sized1(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.reader.u8(self.offset, self.op)?;
        self.reader.take(usize::from(len), self.offset, self.op)
    }

    fn sized(&mut self, len: u64) -> Result<&'a [u8], DecodeError> {
        let max = self.limits.max_operand_len;
        let len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= max)
            .ok_or_else(|| self.limit("max_operand_len", max))?;
        self.reader.take(len, self.offset, self.op)
    }

    /// Python 2 `str` payloads: text when they are valid UTF-8, bytes
    /// otherwise.
    fn py2_string(&self, bytes: Vec<u8>) -> Value {
        if self.py2_bytes {
            return Value::Bytes(Arc::from(bytes));
        }
        match String::from_utf8(bytes) {
            Ok(text) => Value::Str(Arc::from(text)),
            Err(err) => Value::Bytes(Arc::from(err.into_bytes())),
        }
    }

    fn utf8(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        std::str::from_utf8(bytes)
            .map(|text| Value::Str(Arc::from(text)))
            .map_err(|_| self.invalid("text is not valid UTF-8"))
    }

    fn resolve(&self, module: &str, name: &str) -> Result<Arc<ClassDescriptor>, DecodeError> {
        self.registry
            .resolve_parts(module, name)
            .map_err(|_| DecodeError::UnknownClass {
                offset: self.offset,
                name: format!("{module}.{name}"),
            })
    }

    fn callable(&self, value: Value) -> Result<Arc<ClassDescriptor>, DecodeError> {
        match value {
            Value::Global(class) => Ok(class),
            other => Err(self.forbidden(format!(
                "only catalog classes can be called, found {}",
                other.type_name()
            ))),
        }
    }

    fn tuple_items(&self, value: &Value) -> Result<Vec<Value>, DecodeError> {
        match self.graph.resolve(value) {
            Some(Object::Tuple(items)) => Ok(items.clone()),
            _ => Err(self.invalid("constructor arguments must be a tuple")),
        }
    }

    fn construct(
        &mut self,
        class: Arc<ClassDescriptor>,
        construction: Construction,
        args: Vec<Value>,
    ) -> Result<(), DecodeError> {
        match class.policy {
            Policy::Reference => Err(self.forbidden(format!(
                "`{}` is a reference and cannot be called",
                class.qualified()
            ))),
            Policy::Reconstructor => {
                if construction != Construction::Reduce {
                    return Err(self.forbidden(format!(
                        "`{}` can only be applied with REDUCE",
                        class.qualified()
                    )));
                }
                self.reconstruct(class, args)
            }
            Policy::Builtin => {
                let value = self.builtin(class, args)?;
                self.push(value)
            }
            Policy::Record | Policy::Positional | Policy::Container => {
                let id = self.alloc(Object::Instance(Instance::new(class, construction, args)))?;
                self.push(Value::Ref(id))
            }
        }
    }

    fn reconstruct(
        &mut self,
        reconstructor: Arc<ClassDescriptor>,
        args: Vec<Value>,
    ) -> Result<(), DecodeError> {
        let [class, base, state] = <[Value; 3]>::try_from(args)
            .map_err(|_| self.invalid("_reconstructor takes (cls, base, state)"))?;
        let (Value::Global(class), Value::Global(base)) = (class, base) else {
            return Err(self.invalid("_reconstructor class and base must be globals"));
        };
        if !matches!(class.policy, Policy::Record | Policy::Container) {
            return Err(self.forbidden(format!(
                "`{}` cannot be rebuilt by _reconstructor",
                class.qualified()
            )));
        }
        let mut instance = Instance::new(class, Construction::Reconstructor, Vec::new());
        instance.reconstructor = Some(reconstructor);
        instance.base = Some(base);
        if !state.is_none() {
            instance.args.push(state);
        }
        let id = self.alloc(Object::Instance(instance))?;
        self.push(Value::Ref(id))
    }

    fn builtin(
        &mut self,
        class: Arc<ClassDescriptor>,
        args: Vec<Value>,
    ) -> Result<Value, DecodeError> {
        let Some(kind) = class.builtin else {
            return Err(self.invalid(format!("`{}` has no builtin recipe", class.qualified())));
        };
        match kind {
            BuiltinKind::Set | BuiltinKind::FrozenSet => {
                let items = match args.as_slice() {
                    [] => Vec::new(),
                    [iterable] => self.iterable(iterable)?,
                    _ => return Err(self.invalid("set takes at most one argument")),
                };
                let object = if kind == BuiltinKind::Set {
                    Object::Set(items)
                } else {
                    Object::FrozenSet(items)
                };
                Ok(Value::Ref(self.alloc(object)?))
            }
            BuiltinKind::Bytes => Ok(Value::Bytes(Arc::from(self.byte_args(&args)?))),
            BuiltinKind::ByteArray => {
                let bytes = self.byte_args(&args)?;
                Ok(Value::Ref(self.alloc(Object::ByteArray(bytes))?))
            }
            BuiltinKind::Object => {
                if !args.is_empty() {
                    return Err(self.invalid("object() takes no arguments"));
                }
                let instance = Instance::new(class, Construction::Reduce, Vec::new());
                Ok(Value::Ref(self.alloc(Object::Instance(instance))?))
            }
        }
    }

    fn iterable(&self, value: &Value) -> Result<Vec<Value>, DecodeError> {
        match self.graph.resolve(value) {
            Some(Object::List(items))
            | Some(Object::Tuple(items))
            | Some(Object::Set(items))
            | Some(Object::FrozenSet(items)) => Ok(items.clone()),
            _ => Err(self.invalid("expected a list, tuple or set")),
        }
    }

    /// `bytes()`, `bytes(b)`, and `_codecs.encode(text, encoding)`.
    fn byte_args(&self, args: &[Value]) -> Result<Vec<u8>, DecodeError> {
        match args {
            [] => Ok(Vec::new()),
            [Value::Bytes(bytes)] => Ok(bytes.to_vec()),
            [Value::Str(text), Value::Str(encoding)] => {
                match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
                    "latin1" | "latin-1" | "iso-8859-1" => text
                        .chars()
                        .map(|c| u8::try_from(u32::from(c)).ok())
                        .collect::<Option<Vec<u8>>>()
                        .ok_or_else(|| self.invalid("text is not representable in latin-1")),
                    "utf8" | "utf-8" => Ok(text.as_bytes().to_vec()),
                    other => Err(self.invalid(format!("unsupported encoding `{other}`"))),
                }
            }
            [Value::Ref(_)] => match self.graph.resolve(&args[0]) {
                Some(Object::ByteArray(bytes)) => Ok(bytes.clone()),
                _ => Err(self.invalid("unsupported bytes constructor argument")),
            },
            _ => Err(self.invalid("unsupported bytes constructor arguments")),
        }
    }

    fn check_len(&self, len: usize) -> Result<(), DecodeError> {
        if len > self.limits.max_container_len {
            return Err(self.limit("max_container_len", self.limits.max_container_len));
        }
        Ok(())
    }

    fn target(&self) -> Result<ObjId, DecodeError> {
        self.top()?
            .as_ref_id()
            .ok_or_else(|| self.invalid("target is not a mutable object"))
    }

    fn append(&mut self, values: Vec<Value>) -> Result<(), DecodeError> {
        let id = self.target()?;
        let max = self.limits.max_container_len;
        let offset = self.offset;
        let items = match self.graph.get_mut(id) {
            Some(Object::List(items)) => items,
            Some(Object::Instance(instance)) if instance.class.accepts_items() => {
                &mut instance.items
            }
            _ => return Err(self.invalid("APPEND target is not a list")),
        };
        if items.len() + values.len() > max {
            return Err(DecodeError::LimitExceeded {
                offset,
                limit: "max_container_len",
                max,
            });
        }
        items.extend(values);
        Ok(())
    }

    fn set_items(&mut self, flat: Vec<Value>) -> Result<(), DecodeError> {
        let id = self.target()?;
        let max = self.limits.max_container_len;
        let offset = self.offset;
        let mapping = match self.graph.get_mut(id) {
            Some(Object::Dict(mapping)) => mapping,
            Some(Object::Instance(instance)) if instance.class.accepts_items() => {
                &mut instance.entries
            }
            _ => return Err(self.invalid("SETITEM target is not a dict")),
        };
        for (key, value) in pairs(flat) {
            mapping.insert(key, value);
        }
        if mapping.len() > max {
            return Err(DecodeError::LimitExceeded {
                offset,
                limit: "max_container_len",
                max,
            });
        }
        Ok(())
    }

    fn add_items(&mut self, values: Vec<Value>) -> Result<(), DecodeError> {
        let id = self.target()?;
        let max = self.limits.max_container_len;
        let offset = self.offset;
        let members = match self.graph.get_mut(id) {
            Some(Object::Set(members)) => members,
            Some(Object::Instance(instance)) if instance.class.accepts_items() => {
                &mut instance.members
            }
            _ => return Err(self.invalid("ADDITEMS target is not a set")),
        };
        for value in values {
            if !members.contains(&value) {
                members.push(value);
            }
        }
        if members.len() > max {
            return Err(DecodeError::LimitExceeded {
                offset,
                limit: "max_container_len",
                max,
            });
        }
        Ok(())
    }

    /// Applies `BUILD` state the way a plain `__setstate__` would: a dict
    /// becomes attributes, a `(dict, slots)` pair fills both, anything else
    /// is kept opaque.
    fn build(&mut self, target: &Value, state: Value) -> Result<(), DecodeError> {
        let Some(id) = target.as_ref_id() else {
            return Err(self.invalid("BUILD target is not an object"));
        };
        if !matches!(self.graph.get(id), Some(Object::Instance(_))) {
            return Err(self.invalid("BUILD target is not a class instance"));
        }
        let shape = self.state_shape(&state);
        let Some(Object::Instance(instance)) = self.graph.get_mut(id) else {
            return Ok(());
        };
        match shape {
            Shape::Dict(fields) => {
                for (name, value) in fields {
                    instance.dict.set(name, value);
                }
                if matches!(instance.state, State::Unset) {
                    instance.state = State::Dict;
                }
            }
            Shape::Pair { dict, slots } => {
                let has_dict = dict.is_some();
                let has_slots = slots.is_some();
                for (name, value) in dict.into_iter().flatten() {
                    instance.dict.set(name, value);
                }
                for (name, value) in slots.into_iter().flatten() {
                    instance.slots.set(name, value);
                }
                instance.state = State::Pair {
                    has_dict,
                    has_slots,
                };
            }
            Shape::Opaque => instance.state = State::Opaque(state),
        }
        Ok(())
    }

    fn state_shape(&self, state: &Value) -> Shape {
        match self.graph.resolve(state) {
            Some(Object::Dict(mapping)) => match string_fields(mapping) {
                Some(fields) => Shape::Dict(fields),
                None => Shape::Opaque,
            },
            Some(Object::Tuple(items)) if items.len() == 2 => {
                let dict = self.optional_fields(&items[0]);
                let slots = self.optional_fields(&items[1]);
                match (dict, slots) {
                    (Some(dict), Some(slots)) if dict.is_some() || slots.is_some() => {
                        Shape::Pair { dict, slots }
                    }
                    _ => Shape::Opaque,
                }
            }
            _ => Shape::Opaque,
        }
    }

    /// `Some(None)` for `None`, `Some(Some(fields))` for a string-keyed dict.
    fn optional_fields(&self, value: &Value) -> Option<Option<Vec<(Arc<str>, Value)>>> {
        if value.is_none() {
            return Some(None);
        }
        match self.graph.resolve(value) {
            Some(Object::Dict(mapping)) => string_fields(mapping).map(Some),
            _ => None,
        }
    }

    fn underflow(&self) -> DecodeError {
        DecodeError::StackUnderflow {
            offset: self.offset,
            opcode: self.op,
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> DecodeError {
        DecodeError::InvalidOperand {
            offset: self.offset,
            opcode: self.op,
            reason: reason.into(),
        }
    }

    fn forbidden(&self, reason: impl Into<String>) -> DecodeError {
        DecodeError::ForbiddenOpcode {
            offset: self.offset,
            opcode: self.op,
            reason: reason.into(),
        }
    }

    fn limit(&self, limit: &'static str, max: usize) -> DecodeError {
        DecodeError::LimitExceeded {
            offset: self.offset,
            limit,
            max,
        }
    }
}

enum Shape {
    Dict(Vec<(Arc<str>, Value)>),
    Pair {
        dict: Option<Vec<(Arc<str>, Value)>>,
        slots: Option<Vec<(Arc<str>, Value)>>,
    },
    Opaque,
}

fn string_fields(mapping: &Mapping) -> Option<Vec<(Arc<str>, Value)>> {
    mapping
        .iter()
        .map(|(key, value)| match key {
            Value::Str(name) => Some((Arc::clone(name), value.clone())),
            _ => None,
        })
        .collect()
}

fn pairs(flat: Vec<Value>) -> impl Iterator<Item = (Value, Value)> {
    let mut iter = flat.into_iter();
    std::iter::from_fn(move || Some((iter.next()?, iter.next()?)))
}

fn long_value(bytes: &[u8]) -> Value {
    let value = BigInt::from_signed_bytes_le(bytes);
    match value.to_i64() {
        Some(small) => Value::Int(small),
        None => Value::BigInt(value),
    }
}


/// Undoes the `repr()` quoting used by protocol 0 `STRING`.
fn unquote(line: &[u8]) -> Option<Vec<u8>> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let (&first, rest) = line.split_first()?;
    let (&last, body) = rest.split_last()?;
    if first != last || !(first == b'\'' || first == b'"') {
        return None;
    }
    let mut out = Vec::with_capacity(body.len());
    let mut iter = body.iter().copied().peekable();
    while let Some(byte) = iter.next() {
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        let escaped = iter.next()?;
        match escaped {
            b'\\' | b'\'' | b'"' => out.push(escaped),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'x' => {
                let hi = hex_digit(iter.next()?)?;
                let lo = hex_digit(iter.next()?)?;
                out.push(hi << 4 | lo);
            }
            b'0'..=b'7' => {
                let mut value = u32::from(escaped - b'0');
                for _ in 0..2 {
                    match iter.peek() {
                        Some(&digit @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(digit - b'0');
                            iter.next();
                        }
                        _ => break,
                    }
                }
                out.push(u8::try_from(value).ok()?);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

/// Decodes protocol 0 `UNICODE` payloads: latin-1 bytes plus `\uXXXX` and
/// `\UXXXXXXXX` escapes.
fn raw_unicode_escape(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let byte = line[i];
        if byte == b'\\' && i + 1 < line.len() && matches!(line[i + 1], b'u' | b'U') {
            let width = if line[i + 1] == b'u' { 4 } else { 8 };
            let digits = line.get(i + 2..i + 2 + width)?;
            let mut code = 0u32;
            for &digit in digits {
                code = code.checked_mul(16)? + u32::from(hex_digit(digit)?);
            }
            out.push(char::from_u32(code)?);
            i += 2 + width;
        } else {
            out.push(char::from(byte));
            i += 1;
        }
    }
    Some(out)
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
