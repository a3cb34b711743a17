use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use rpycdec::{
    decode, decompile, encode, from_json, lift, to_json, ClassRegistry, Construction, Graph,
    Instance, Mapping, Object, Profile, Schema, State, Value,
};

fn node(graph: &mut Graph, class: &str, fields: Vec<(&str, Value)>) -> Value {
    let class = ClassRegistry::builtin(Profile::Script)
        .resolve(class)
        .expect("registered");
    let mut instance = Instance::new(class, Construction::NewObj, Vec::new());
    for (name, value) in fields {
        instance.dict.set(Arc::from(name), value);
    }
    instance.state = State::Dict;
    Value::Ref(graph.alloc(Object::Instance(instance)))
}

/// `labels` labels of `lines` dialogue lines each, wrapped like a compiled
/// script.
fn script_graph(labels: usize, lines: usize) -> (Graph, Value) {
    let mut graph = Graph::new();
    let mut statements = Vec::with_capacity(labels);
    for label in 0..labels {
        let block = (0..lines)
            .map(|line| {
                node(
                    &mut graph,
                    "renpy.ast.Say",
                    vec![
                        ("who", Value::str("e")),
                        ("what", Value::str(&format!("Line {line} of scene {label}."))),
                        ("with_", Value::None),
                    ],
                )
            })
            .collect();
        let block = Value::Ref(graph.alloc(Object::List(block)));
        let name = format!("scene_{label}");
        statements.push(node(
            &mut graph,
            "renpy.ast.Label",
            vec![("name", Value::str(&name)), ("block", block)],
        ));
    }
    let mut data = Mapping::new();
    data.insert(Value::str("version"), Value::Int(5_003_000));
    let data = Value::Ref(graph.alloc(Object::Dict(data)));
    let statements = Value::Ref(graph.alloc(Object::List(statements)));
    let root = Value::Ref(graph.alloc(Object::Tuple(vec![data, statements])));
    (graph, root)
}

fn bench_decode(c: &mut Criterion) {
    let (graph, root) = script_graph(50, 40);
    let payload = encode(&graph, &root).expect("encode");
    let registry = ClassRegistry::builtin(Profile::Script);
    c.bench_function("decode_script", |b| {
        b.iter(|| decode(&payload, registry).expect("decode"))
    });
}

fn bench_encode(c: &mut Criterion) {
    let (graph, root) = script_graph(50, 40);
    c.bench_function("encode_script", |b| {
        b.iter(|| encode(&graph, &root).expect("encode"))
    });
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompile");
    let registry = ClassRegistry::builtin(Profile::Script);
    for labels in [1usize, 10, 100] {
        let (graph, root) = script_graph(labels, 20);
        let payload = encode(&graph, &root).expect("encode");
        group.bench_function(format!("labels_{labels}"), |b| {
            b.iter(|| decompile(&payload, registry, Some(Schema::Current)).expect("decompile"))
        });
    }
    group.finish();
}

fn bench_lift(c: &mut Criterion) {
    let (graph, root) = script_graph(50, 40);
    c.bench_function("lift_script", |b| {
        b.iter(|| lift(&graph, &root, Schema::Current).expect("lift"))
    });
}

fn bench_interchange(c: &mut Criterion) {
    let (graph, root) = script_graph(20, 20);
    let json = to_json(&graph, &root).expect("to_json");
    let registry = ClassRegistry::builtin(Profile::Save);
    c.bench_function("to_json", |b| {
        b.iter(|| to_json(&graph, &root).expect("to_json"))
    });
    c.bench_function("from_json", |b| {
        b.iter_batched(
            || json.clone(),
            |json| from_json(&json, registry).expect("from_json"),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    core_benches,
    bench_decode,
    bench_encode,
    bench_generate,
    bench_lift,
    bench_interchange
);
criterion_main!(core_benches);
