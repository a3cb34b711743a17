#![allow(dead_code)]

use std::sync::Arc;

use rpycdec::{
    encode, ClassRegistry, Construction, Graph, Instance, Object, Opcode, Profile, Schema, State,
    Value,
};

/// Hand-assembled opcode streams for inputs the encoder never writes.
#[derive(Default)]
pub struct StreamBuilder {
    bytes: Vec<u8>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proto(self, version: u8) -> Self {
        self.op(Opcode::Proto).raw(&[version])
    }

    pub fn op(mut self, opcode: Opcode) -> Self {
        self.bytes.push(opcode.byte());
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn int(self, value: u8) -> Self {
        self.op(Opcode::BinInt1).raw(&[value])
    }

    pub fn text(self, value: &str) -> Self {
        let len = u32::try_from(value.len()).expect("short text");
        self.op(Opcode::BinUnicode)
            .raw(&len.to_le_bytes())
            .raw(value.as_bytes())
    }

    /// `GLOBAL module\nname\n`, the protocol 2 way of naming a class.
    pub fn global(self, module: &str, name: &str) -> Self {
        self.op(Opcode::Global)
            .raw(module.as_bytes())
            .raw(b"\n")
            .raw(name.as_bytes())
            .raw(b"\n")
    }

    pub fn stop(self) -> Vec<u8> {
        self.op(Opcode::Stop).bytes
    }
}

/// Builds statement graphs the way a producer of `schema` lays them out:
/// slot state for legacy producers, dict state for current ones.
pub struct ScriptBuilder {
    pub graph: Graph,
    pub schema: Schema,
}

impl ScriptBuilder {
    pub fn new(schema: Schema) -> Self {
        Self {
            graph: Graph::new(),
            schema,
        }
    }

    pub fn node(&mut self, class: &str, fields: Vec<(&str, Value)>) -> Value {
        let class = ClassRegistry::builtin(Profile::Script)
            .resolve(class)
            .expect("class is in the script catalog");
        let mut node = Instance::new(class, Construction::NewObj, Vec::new());
        let legacy = self.schema == Schema::Legacy;
        let mut fields = fields;
        fields.insert(0, ("filename", Value::str("game/script.rpy")));
        fields.insert(1, ("linenumber", Value::Int(1)));
        for (name, value) in fields {
            let target = if legacy { &mut node.slots } else { &mut node.dict };
            target.set(Arc::from(name), value);
        }
        node.state = if legacy {
            State::Pair {
                has_dict: false,
                has_slots: true,
            }
        } else {
            State::Dict
        };
        Value::Ref(self.graph.alloc(Object::Instance(node)))
    }

    /// An expression atom of the schema's expression class.
    pub fn expr(&mut self, text: &str) -> Value {
        let class = match self.schema {
            Schema::Legacy => "renpy.ast.PyExpr",
            Schema::Current => "renpy.astsupport.PyExpr",
        };
        let class = ClassRegistry::builtin(Profile::Script)
            .resolve(class)
            .expect("expression class is registered");
        let args = vec![
            Value::str(text),
            Value::str("game/script.rpy"),
            Value::Int(1),
        ];
        Value::Ref(self.graph.alloc(Object::Instance(Instance::new(
            class,
            Construction::NewObj,
            args,
        ))))
    }

    /// A code object whose source travels in its opaque state tuple.
    pub fn code(&mut self, source: &str) -> Value {
        let class = ClassRegistry::builtin(Profile::Script)
            .resolve("renpy.ast.PyCode")
            .expect("PyCode is registered");
        let state = self.tuple(vec![
            Value::Int(1),
            Value::str(source),
            Value::None,
            Value::str("exec"),
        ]);
        let mut code = Instance::new(class, Construction::NewObj, Vec::new());
        code.state = State::Opaque(state);
        Value::Ref(self.graph.alloc(Object::Instance(code)))
    }

    pub fn list(&mut self, items: Vec<Value>) -> Value {
        Value::Ref(self.graph.alloc(Object::List(items)))
    }

    pub fn tuple(&mut self, items: Vec<Value>) -> Value {
        Value::Ref(self.graph.alloc(Object::Tuple(items)))
    }

    /// Wraps `statements` in the `(data, statements)` root of a compiled
    /// script and encodes it.
    pub fn payload(mut self, statements: Vec<Value>) -> Vec<u8> {
        let root = self.root(statements);
        encode(&self.graph, &root).expect("script graph encodes")
    }

    pub fn root(&mut self, statements: Vec<Value>) -> Value {
        let mut data = rpycdec::Mapping::new();
        data.insert(Value::str("version"), Value::Int(5_003_000));
        data.insert(Value::str("key"), Value::str("unlocked"));
        let data = Value::Ref(self.graph.alloc(Object::Dict(data)));
        let statements = self.list(statements);
        self.tuple(vec![data, statements])
    }
}

/// Two labels with dialogue, an inline python line and a menu.
pub fn sample_script(schema: Schema) -> Vec<u8> {
    let mut b = ScriptBuilder::new(schema);
    let say = b.node(
        "renpy.ast.Say",
        vec![
            ("who", Value::str("e")),
            ("what", Value::str("Hello, world.")),
            ("with_", Value::None),
            ("interact", Value::Bool(false)),
        ],
    );
    let code = b.code("renpy.pause(1)");
    let python = b.node(
        "renpy.ast.Python",
        vec![("code", code), ("hide", Value::Bool(false)), ("store", Value::str("store"))],
    );
    let jump = b.node(
        "renpy.ast.Jump",
        vec![("target", Value::str("yes")), ("expression", Value::Bool(false))],
    );
    let yes_block = b.list(vec![jump]);
    let pass = b.node("renpy.ast.Pass", Vec::new());
    let no_block = b.list(vec![pass]);
    let condition = b.expr("True");
    let yes = b.tuple(vec![Value::str("Yes"), condition.clone(), yes_block]);
    let no = b.tuple(vec![Value::str("No"), condition, no_block]);
    let items = b.list(vec![yes, no]);
    let menu = b.node("renpy.ast.Menu", vec![("items", items), ("with_", Value::None)]);
    let ret = b.node("renpy.ast.Return", vec![("expression", Value::None)]);
    let start_block = b.list(vec![say, python, menu, ret]);
    let start = b.node(
        "renpy.ast.Label",
        vec![
            ("name", Value::str("start")),
            ("block", start_block),
            ("parameters", Value::None),
        ],
    );
    let good = b.node(
        "renpy.ast.Say",
        vec![("who", Value::None), ("what", Value::str("Good."))],
    );
    let yes_label_block = b.list(vec![good]);
    let yes_label = b.node(
        "renpy.ast.Label",
        vec![("name", Value::str("yes")), ("block", yes_label_block)],
    );
    b.payload(vec![start, yes_label])
}
