use super::*;
use crate::pickle::{Construction, Graph, Instance, Object, State};
use crate::registry::{ClassRegistry, Profile};
use crate::resource::DecodeLimits;

fn instance(name: &str) -> Instance {
    let class = ClassRegistry::builtin(Profile::Script)
        .resolve(name)
        .expect("class is registered");
    let mut instance = Instance::new(class, Construction::NewObj, Vec::new());
    instance.state = State::Dict;
    instance
}

fn with_fields(name: &str, fields: Vec<(&str, Value)>) -> Instance {
    let mut node = instance(name);
    for (key, value) in fields {
        node.dict.set(Arc::from(key), value);
    }
    node
}

fn lifted(graph: &Graph, root: ObjId) -> Node {
    match lift(graph, &Value::Ref(root), Schema::Current).expect("graph lifts") {
        Term::Node(node) => *node,
        other => panic!("expected a node, got {other:?}"),
    }
}

#[test]
fn nodes_keep_every_field() {
    let mut graph = Graph::new();
    let say = graph.alloc(Object::Instance(with_fields(
        "renpy.ast.Say",
        vec![
            ("filename", Value::str("game/script.rpy")),
            ("linenumber", Value::Int(10)),
            ("who", Value::str("e")),
            ("what", Value::str("Hello")),
            ("rollback", Value::str("normal")),
        ],
    )));
    let node = lifted(&graph, say);
    assert_eq!(node.kind, Some(NodeKind::Say));
    assert_eq!(node.fields.len(), 5);
    assert_eq!(node.meta.filename.as_deref(), Some("game/script.rpy"));
    assert_eq!(node.meta.linenumber, Some(10));
    assert_eq!(node.get("rollback").and_then(Term::as_str), Some("normal"));
    assert_eq!(node.text("who").expect("text").as_deref(), Some("e"));
}

#[test]
fn statement_links_are_not_followed() {
    let mut graph = Graph::new();
    let target = graph.alloc(Object::Instance(instance("renpy.ast.Pass")));
    let say = graph.alloc(Object::Instance(with_fields(
        "renpy.ast.Say",
        vec![("what", Value::str("x")), ("next", Value::Ref(target))],
    )));
    let node = lifted(&graph, say);
    let link = node.link("next").expect("next is a link");
    assert_eq!(link.id, target);
    assert_eq!(link.kind, Some(NodeKind::Pass));
    assert_eq!(node.opt("next").and_then(Term::kind), Some(NodeKind::Pass));
}

#[test]
fn link_cycles_are_fine() {
    let mut graph = Graph::new();
    let label = graph.alloc(Object::Instance(instance("renpy.ast.Label")));
    let body = graph.alloc(Object::List(Vec::new()));
    let ret = graph.alloc(Object::Instance(with_fields(
        "renpy.ast.Return",
        vec![("next", Value::Ref(label))],
    )));
    if let Some(Object::List(items)) = graph.get_mut(body) {
        items.push(Value::Ref(ret));
    }
    if let Some(Object::Instance(node)) = graph.get_mut(label) {
        node.dict.set(Arc::from("name"), Value::str("start"));
        node.dict.set(Arc::from("block"), Value::Ref(body));
    }
    let node = lifted(&graph, label);
    assert_eq!(node.seq("block").expect("block").len(), 1);
}

#[test]
fn owned_cycles_are_rejected() {
    let mut graph = Graph::new();
    let body = graph.alloc(Object::List(Vec::new()));
    let label = graph.alloc(Object::Instance(with_fields(
        "renpy.ast.Label",
        vec![("block", Value::Ref(body))],
    )));
    if let Some(Object::List(items)) = graph.get_mut(body) {
        items.push(Value::Ref(label));
    }
    let err = lift(&graph, &Value::Ref(label), Schema::Current).expect_err("cycle");
    assert!(matches!(err, RenderError::CyclicBlock { class } if class == "renpy.ast.Label"));
}

#[test]
fn shared_children_are_lifted_twice() {
    let mut graph = Graph::new();
    let shared = graph.alloc(Object::List(vec![Value::Int(1)]));
    let root = graph.alloc(Object::Tuple(vec![Value::Ref(shared), Value::Ref(shared)]));
    let term = lift(&graph, &Value::Ref(root), Schema::Legacy).expect("DAG lifts");
    let one = Term::List(vec![Term::Prim(Value::Int(1))]);
    assert_eq!(term, Term::Tuple(vec![one.clone(), one]));
}

#[test]
fn nesting_limit() {
    let mut graph = Graph::new();
    let mut inner = Value::None;
    for _ in 0..10 {
        inner = Value::Ref(graph.alloc(Object::List(vec![inner])));
    }
    let limits = DecodeLimits {
        max_nesting: 4,
        ..DecodeLimits::default()
    };
    assert!(matches!(
        lift_with_limits(&graph, &inner, Schema::Current, &limits),
        Err(RenderError::DepthExceeded { max: 4 })
    ));
    assert!(lift(&graph, &inner, Schema::Current).is_ok());
}

#[test]
fn unnamed_arguments_and_opaque_state() {
    let mut graph = Graph::new();
    let class = ClassRegistry::builtin(Profile::Script)
        .resolve("renpy.ast.PyExpr")
        .expect("registered");
    let mut expr = Instance::new(
        class,
        Construction::NewObj,
        vec![
            Value::str("a"),
            Value::str("f.rpy"),
            Value::Int(1),
            Value::None,
            Value::Int(99),
        ],
    );
    expr.state = State::Opaque(Value::Int(2));
    let id = graph.alloc(Object::Instance(expr));
    let node = lifted(&graph, id);
    assert_eq!(node.extra_args, vec![Term::Prim(Value::Int(99))]);
    assert_eq!(node.state, Some(Term::Prim(Value::Int(2))));
    assert_eq!(node.source_text().as_deref(), Some("a"));
    assert!(node.opt("py").is_none());
    assert!(node.get("py").is_some());
}

#[test]
fn code_blocks_read_their_source_from_state() {
    let mut graph = Graph::new();
    let state = graph.alloc(Object::Tuple(vec![
        Value::Int(1),
        Value::str("x = 1"),
        Value::None,
        Value::str("exec"),
    ]));
    let mut code = instance("renpy.ast.PyCode");
    code.state = State::Opaque(Value::Ref(state));
    let id = graph.alloc(Object::Instance(code));
    let node = lifted(&graph, id);
    assert_eq!(node.source_text().as_deref(), Some("x = 1"));
    assert_eq!(Term::Node(Box::new(node)).as_text().as_deref(), Some("x = 1"));
}

#[test]
fn accessor_errors_name_the_field() {
    let mut graph = Graph::new();
    let jump = graph.alloc(Object::Instance(with_fields(
        "renpy.ast.Jump",
        vec![("target", Value::Int(3)), ("expression", Value::Bool(false))],
    )));
    let node = lifted(&graph, jump);
    assert!(matches!(
        node.text("target"),
        Err(RenderError::MalformedField { ref field, expected: "text", .. }) if field == "target"
    ));
    assert!(matches!(
        node.require("missing"),
        Err(RenderError::MissingField { ref field, .. }) if field == "missing"
    ));
    assert_eq!(node.int("target").expect("integer"), Some(3));
    assert!(!node.flag("expression"));
    assert!(node.seq("absent").expect("empty").is_empty());
    assert!(node.node("absent").expect("absent").is_none());
}

#[test]
fn truthiness() {
    assert!(!Term::none().is_truthy());
    assert!(!Term::List(Vec::new()).is_truthy());
    assert!(Term::Prim(Value::str("x")).is_truthy());
    assert!(!Term::Prim(Value::Int(0)).is_truthy());
    assert!(Term::Dict(vec![(Term::none(), Term::none())]).is_truthy());
}

#[test]
fn schema_inference_follows_node_state() {
    let mut graph = Graph::new();
    let mut expr = instance("renpy.ast.PyCode");
    expr.state = State::Pair {
        has_dict: false,
        has_slots: true,
    };
    graph.alloc(Object::Instance(expr));
    assert_eq!(Schema::infer(&graph), Schema::Current);

    let mut say = instance("renpy.ast.Say");
    say.state = State::Pair {
        has_dict: false,
        has_slots: true,
    };
    graph.alloc(Object::Instance(say));
    assert_eq!(Schema::infer(&graph), Schema::Legacy);
}

#[test]
fn schema_names_parse() {
    for (text, schema) in [
        ("legacy", Schema::Legacy),
        ("7", Schema::Legacy),
        ("PY2", Schema::Legacy),
        ("current", Schema::Current),
        ("8", Schema::Current),
        ("py3", Schema::Current),
    ] {
        assert_eq!(text.parse::<Schema>(), Ok(schema));
    }
    assert!("9".parse::<Schema>().is_err());
    assert_eq!(Schema::Legacy.indent_unit(), "    ");
    assert_eq!(Schema::Current.indent_unit(), "  ");
}
