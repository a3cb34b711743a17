mod common;

use std::sync::Arc;

use rpycdec::{
    decode, encode, from_json, from_json_with_limits, to_json, to_json_with_limits, ClassRegistry,
    Construction, DecodeLimits, Graph, Instance, InterchangeError, Mapping, Object, Profile, State,
    Value,
};
use serde_json::json;

fn save() -> &'static ClassRegistry {
    ClassRegistry::builtin(Profile::Save)
}

fn restore(json: &serde_json::Value) -> (Graph, Value) {
    from_json(json, save()).expect("json restores")
}

fn assert_roundtrip(graph: &Graph, root: &Value) -> serde_json::Value {
    let json = to_json(graph, root).expect("graph converts");
    let (restored, restored_root) = restore(&json);
    assert!(
        graph.isomorphic(root, &restored, &restored_root),
        "restored graph differs: {json}"
    );
    json
}

#[test]
fn plain_values_map_to_plain_json() {
    let mut graph = Graph::new();
    let mut mapping = Mapping::new();
    mapping.insert(Value::str("name"), Value::str("Eileen"));
    mapping.insert(Value::str("points"), Value::Int(3));
    mapping.insert(Value::str("ratio"), Value::Float(0.5));
    mapping.insert(Value::str("seen"), Value::Bool(true));
    mapping.insert(Value::str("nothing"), Value::None);
    let items = Value::Ref(graph.alloc(Object::List(vec![Value::Int(1), Value::str("a")])));
    mapping.insert(Value::str("items"), items);
    let root = Value::Ref(graph.alloc(Object::Dict(mapping)));
    let json = assert_roundtrip(&graph, &root);
    assert_eq!(
        json,
        json!({
            "name": "Eileen",
            "points": 3,
            "ratio": 0.5,
            "seen": true,
            "nothing": null,
            "items": [1, "a"],
        })
    );
}

#[test]
fn markers_for_shapes_json_lacks() {
    let mut graph = Graph::new();
    let tuple = Value::Ref(graph.alloc(Object::Tuple(vec![Value::Int(1)])));
    let set = Value::Ref(graph.alloc(Object::Set(vec![Value::Int(2)])));
    let frozen = Value::Ref(graph.alloc(Object::FrozenSet(vec![Value::Int(3)])));
    let bytearray = Value::Ref(graph.alloc(Object::ByteArray(vec![0xde, 0xad])));
    let mut keyed = Mapping::new();
    keyed.insert(Value::Int(1), Value::str("one"));
    let keyed = Value::Ref(graph.alloc(Object::Dict(keyed)));
    let items = vec![
        tuple,
        set,
        frozen,
        bytearray,
        keyed,
        Value::Bytes(Arc::from(&b"\x00\xff"[..])),
        Value::BigInt("123456789012345678901234567890".parse().expect("integer")),
        Value::Float(f64::INFINITY),
        Value::Global(save().resolve("renpy.display.layout.Null").expect("registered")),
    ];
    let root = Value::Ref(graph.alloc(Object::List(items)));
    let json = assert_roundtrip(&graph, &root);
    assert_eq!(
        json,
        json!([
            {"__tuple__": [1]},
            {"__set__": [2]},
            {"__frozenset__": [3]},
            {"__bytearray__": "dead"},
            {"__dict__": [[1, "one"]]},
            {"__bytes__": "00ff"},
            {"__bigint__": "123456789012345678901234567890"},
            {"__float__": "inf"},
            {"__global__": ["renpy.display.layout", "Null"]},
        ])
    );
}

#[test]
fn keys_that_look_like_markers_are_escaped() {
    let mut graph = Graph::new();
    let mut mapping = Mapping::new();
    mapping.insert(Value::str("__tuple__"), Value::Int(1));
    let root = Value::Ref(graph.alloc(Object::Dict(mapping)));
    let json = assert_roundtrip(&graph, &root);
    assert_eq!(json, json!({"__dict__": [["__tuple__", 1]]}));
}

#[test]
fn shared_objects_carry_ids() {
    let mut graph = Graph::new();
    let shared = graph.alloc(Object::List(vec![Value::Int(7)]));
    let root = Value::Ref(graph.alloc(Object::Tuple(vec![
        Value::Ref(shared),
        Value::Ref(shared),
    ])));
    let json = assert_roundtrip(&graph, &root);
    assert_eq!(
        json,
        json!({"__tuple__": [{"__list__": [7], "$id": 0}, {"$ref": 0}]})
    );
}

#[test]
fn cycles_survive() {
    let mut graph = Graph::new();
    let list = graph.alloc(Object::List(Vec::new()));
    if let Some(Object::List(items)) = graph.get_mut(list) {
        items.push(Value::Ref(list));
    }
    let json = assert_roundtrip(&graph, &Value::Ref(list));
    assert_eq!(json, json!({"__list__": [{"$ref": 0}], "$id": 0}));
}

#[test]
fn references_may_precede_their_target() {
    let json = json!([{"$ref": 4}, {"__list__": [], "$id": 4}]);
    let (graph, root) = restore(&json);
    let items = graph.sequence(&root).expect("list");
    assert_eq!(items[0], items[1]);
}

#[test]
fn instances_keep_their_construction() {
    let mut graph = Graph::new();
    let mut inventory = Instance::new(
        save().resolve("store.Inventory").expect("store namespace"),
        Construction::NewObj,
        Vec::new(),
    );
    inventory.dict.set(Arc::from("gold"), Value::Int(10));
    inventory.state = State::Dict;
    let mut ordered = Instance::new(
        save().resolve("collections.OrderedDict").expect("registered"),
        Construction::Reconstructor,
        Vec::new(),
    );
    ordered.reconstructor = Some(save().resolve("copy_reg._reconstructor").expect("registered"));
    ordered.base = Some(save().resolve("__builtin__.dict").expect("registered"));
    ordered.entries.insert(Value::str("a"), Value::Int(1));
    let items = vec![
        Value::Ref(graph.alloc(Object::Instance(inventory))),
        Value::Ref(graph.alloc(Object::Instance(ordered))),
    ];
    let root = Value::Ref(graph.alloc(Object::List(items)));
    let json = assert_roundtrip(&graph, &root);
    assert_eq!(
        json[0],
        json!({
            "__class__": ["store", "Inventory"],
            "construction": "newobj",
            "state": "dict",
            "dict": {"gold": 10},
        })
    );
    assert_eq!(json[1]["construction"], "reconstructor");
    assert_eq!(json[1]["entries"], json!([["a", 1]]));
}

#[test]
fn edited_json_encodes() {
    let json = json!({
        "version": 5003000,
        "log": [{
            "__class__": ["renpy.revertable", "RevertableList"],
            "items": [1, 2, 3],
        }],
    });
    let (graph, root) = restore(&json);
    let bytes = encode(&graph, &root).expect("restored graph encodes");
    let decoded = decode(&bytes, save()).expect("decodes");
    assert!(graph.isomorphic(&root, &decoded.graph, &decoded.root));
    let back = to_json(&decoded.graph, &decoded.root).expect("converts");
    assert_eq!(back["log"][0]["items"], json!([1, 2, 3]));
    assert_eq!(back["log"][0]["construction"], "newobj");
}

#[test]
fn restoring_rejects_bad_input() {
    let cases = [
        (json!({"__bytes__": "abc"}), "$.__bytes__"),
        (json!({"__tuple__": 1}), "$.__tuple__"),
        (json!({"__dict__": [[1]]}), "$.__dict__[0]"),
        (json!({"__class__": "store.Thing"}), "$.__class__"),
        (json!([{"$ref": 0, "x": 1}]), "$[0]"),
        (json!({"__class__": ["store", "Thing"], "state": "odd"}), "$"),
        (
            json!({"__class__": ["renpy.ast", "Say"], "items": [1]}),
            "$",
        ),
        (json!({"__class__": ["builtins", "list"]}), "$"),
        (json!([{"__list__": [], "$id": 1}, {"__tuple__": [], "$id": 1}]), "$[1]"),
    ];
    for (json, expected) in cases {
        match from_json(&json, save()) {
            Err(InterchangeError::Malformed { path, .. }) => assert_eq!(path, expected, "{json}"),
            other => panic!("unexpected result for {json}: {other:?}"),
        }
    }
}

#[test]
fn restoring_checks_the_registry() {
    let json = json!({"__global__": ["os", "system"]});
    assert!(matches!(
        from_json(&json, save()),
        Err(InterchangeError::Registry(_))
    ));
}

#[test]
fn unresolved_references() {
    assert!(matches!(
        from_json(&json!([{"$ref": 3}]), save()),
        Err(InterchangeError::DanglingRef { id: 3, .. })
    ));
}

fn nested_lists(graph: &mut Graph, depth: usize) -> Value {
    let mut value = Value::Ref(graph.alloc(Object::List(Vec::new())));
    for _ in 1..depth {
        value = Value::Ref(graph.alloc(Object::List(vec![value])));
    }
    value
}

#[test]
fn conversion_depth_is_bounded() {
    let mut graph = Graph::new();
    let deep = nested_lists(&mut graph, 5_000);
    assert!(matches!(
        to_json(&graph, &deep),
        Err(InterchangeError::DepthExceeded { max: 1_000, .. })
    ));

    let limits = DecodeLimits {
        max_object_depth: 8,
        ..DecodeLimits::default()
    };
    let mut graph = Graph::new();
    let fits = nested_lists(&mut graph, 8);
    let too_deep = nested_lists(&mut graph, 9);
    to_json_with_limits(&graph, &fits, &limits).expect("eight levels convert");
    assert!(matches!(
        to_json_with_limits(&graph, &too_deep, &limits),
        Err(InterchangeError::DepthExceeded { max: 8, .. })
    ));
}

#[test]
fn restoring_depth_is_bounded() {
    let mut deep = json!([]);
    for _ in 1..2_000 {
        deep = serde_json::Value::Array(vec![deep]);
    }
    assert!(matches!(
        from_json(&deep, save()),
        Err(InterchangeError::DepthExceeded { max: 1_000, .. })
    ));

    let limits = DecodeLimits {
        max_object_depth: 3,
        ..DecodeLimits::default()
    };
    from_json_with_limits(&json!([[[]]]), save(), &limits).expect("three levels restore");
    match from_json_with_limits(&json!({"a": [[[]]]}), save(), &limits) {
        Err(InterchangeError::DepthExceeded { path, max: 3 }) => assert_eq!(path, "$.a[0][0]"),
        other => panic!("unexpected result: {other:?}"),
    }
}
