mod common;

use common::{sample_script, StreamBuilder};
use rpycdec::{
    decode, decompile, encode, ClassRegistry, DecodeError, Object, Opcode, Profile, Schema, Value,
};

fn script() -> &'static ClassRegistry {
    ClassRegistry::builtin(Profile::Script)
}

#[test]
fn scripts_survive_reencoding() {
    for schema in Schema::ALL {
        let payload = sample_script(schema);
        let first = decode(&payload, script()).expect("decodes");
        let again = encode(&first.graph, &first.root).expect("re-encodes");
        assert_eq!(again, payload, "{schema} payload is not a fixed point");
        let second = decode(&again, script()).expect("decodes again");
        assert!(first
            .graph
            .isomorphic(&first.root, &second.graph, &second.root));
        assert_eq!(
            decompile(&again, script(), None).expect("decompiles").source,
            decompile(&payload, script(), None).expect("decompiles").source,
        );
    }
}

#[test]
fn protocol_two_stream_reencodes_as_four() {
    // (['a', 'a'],) with the string memoized once, as py2 producers write it.
    let payload = StreamBuilder::new()
        .proto(2)
        .op(Opcode::EmptyList)
        .op(Opcode::BinPut)
        .raw(&[0])
        .op(Opcode::Mark)
        .op(Opcode::ShortBinString)
        .raw(&[1])
        .raw(b"a")
        .op(Opcode::BinPut)
        .raw(&[1])
        .op(Opcode::BinGet)
        .raw(&[1])
        .op(Opcode::Appends)
        .op(Opcode::Tuple1)
        .stop();
    let first = decode(&payload, script()).expect("decodes");
    assert_eq!(first.protocol, 2);
    let list = first.graph.sequence(&first.root).expect("tuple")[0].clone();
    assert_eq!(
        first.graph.sequence(&list).expect("list"),
        &[Value::str("a"), Value::str("a")]
    );

    let again = encode(&first.graph, &first.root).expect("re-encodes");
    assert_eq!(&again[..2], &[0x80, 4]);
    let second = decode(&again, script()).expect("decodes again");
    assert!(first
        .graph
        .isomorphic(&first.root, &second.graph, &second.root));
}

#[test]
fn every_truncation_is_an_error() {
    let payload = sample_script(Schema::Current);
    for len in 0..payload.len() {
        match decode(&payload[..len], script()) {
            Err(DecodeError::EmptyStream) => assert_eq!(len, 0),
            Err(DecodeError::TruncatedStream { offset, .. }) => assert!(offset <= len),
            Err(other) => panic!("prefix of {len} bytes failed with {other}"),
            Ok(_) => panic!("prefix of {len} bytes decoded"),
        }
    }
}

#[test]
fn trailing_bytes_after_stop_are_ignored() {
    let mut payload = sample_script(Schema::Legacy);
    let expected = decode(&payload, script()).expect("decodes");
    payload.extend_from_slice(b"\x00garbage");
    let decoded = decode(&payload, script()).expect("decodes");
    assert!(expected
        .graph
        .isomorphic(&expected.root, &decoded.graph, &decoded.root));
}

#[test]
fn save_graphs_need_the_save_profile() {
    let mut graph = rpycdec::Graph::new();
    let class = ClassRegistry::builtin(Profile::Save)
        .resolve("store.Inventory")
        .expect("store namespace");
    let instance = rpycdec::Instance::new(class, rpycdec::Construction::NewObj, Vec::new());
    let root = Value::Ref(graph.alloc(Object::Instance(instance)));
    let bytes = encode(&graph, &root).expect("encodes");
    assert!(decode(&bytes, ClassRegistry::builtin(Profile::Save)).is_ok());
    assert!(matches!(
        decode(&bytes, script()),
        Err(DecodeError::UnknownClass { ref name, .. }) if name == "store.Inventory"
    ));
}
