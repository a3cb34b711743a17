mod common;

use common::{sample_script, ScriptBuilder, StreamBuilder};
use rpycdec::{
    decompile, decompile_with_limits, ClassRegistry, DecodeLimits, Error, ErrorKind, Opcode,
    Profile, RenderError, Schema,
};

fn script() -> &'static ClassRegistry {
    ClassRegistry::builtin(Profile::Script)
}

#[test]
fn legacy_script_is_inferred_and_rendered() {
    let out = decompile(&sample_script(Schema::Legacy), script(), None).expect("decompiles");
    assert_eq!(out.schema, Schema::Legacy);
    assert_eq!(out.protocol, 4);
    assert_eq!(
        out.source,
        "label start:\n    e \"Hello, world.\"\n    $ renpy.pause(1)\n    menu:\n        \"Yes\":\n            jump yes\n        \"No\":\n            pass\nlabel yes:\n    \"Good.\"\n"
    );
}

#[test]
fn current_script_is_inferred_and_rendered() {
    let out = decompile(&sample_script(Schema::Current), script(), None).expect("decompiles");
    assert_eq!(out.schema, Schema::Current);
    assert_eq!(
        out.source,
        "label start:\n  e \"Hello, world.\" nointeract\n  $ renpy.pause(1)\n  menu:\n    \"Yes\":\n      jump yes\n    \"No\":\n      pass\nlabel yes:\n  \"Good.\"\n"
    );
}

#[test]
fn explicit_schema_overrides_inference() {
    let out = decompile(&sample_script(Schema::Current), script(), Some(Schema::Legacy))
        .expect("decompiles");
    assert_eq!(out.schema, Schema::Legacy);
    assert!(out.source.starts_with("label start:\n    e \"Hello, world.\"\n"));
    assert!(!out.source.contains("nointeract"));
}

#[test]
fn current_only_classes_fail_under_legacy() {
    let mut b = ScriptBuilder::new(Schema::Current);
    let value = b.expr("points * 2");
    let ret = b.node("renpy.ast.Return", vec![("expression", value)]);
    let payload = b.payload(vec![ret]);

    let current = decompile(&payload, script(), None).expect("decompiles");
    assert_eq!(current.source, "return points * 2\n");

    let err = decompile(&payload, script(), Some(Schema::Legacy)).expect_err("py_expr is current");
    assert_eq!(err.kind(), ErrorKind::Render);
    assert!(matches!(
        err,
        Error::Render(RenderError::UnsupportedNodeForVersion { ref kind, schema: Schema::Legacy })
            if kind == "py_expr"
    ));
}

#[test]
fn bare_statement_list_root() {
    let mut b = ScriptBuilder::new(Schema::Current);
    let pass = b.node("renpy.ast.Pass", Vec::new());
    let root = b.list(vec![pass]);
    let payload = rpycdec::encode(&b.graph, &root).expect("encodes");
    let out = decompile(&payload, script(), None).expect("decompiles");
    assert_eq!(out.source, "pass\n");
}

#[test]
fn empty_script_has_no_text() {
    let payload = ScriptBuilder::new(Schema::Current).payload(Vec::new());
    let out = decompile(&payload, script(), None).expect("decompiles");
    assert_eq!(out.source, "");
}

#[test]
fn root_must_hold_statements() {
    let payload = StreamBuilder::new().proto(2).int(7).stop();
    let err = decompile(&payload, script(), None).expect_err("an int is not a script");
    assert!(matches!(
        err,
        Error::Render(RenderError::UnexpectedClass { ref found, .. }) if found == "int"
    ));
}

#[test]
fn decode_errors_pass_through() {
    let payload = StreamBuilder::new()
        .proto(2)
        .global("os", "system")
        .stop();
    let err = decompile(&payload, script(), None).expect_err("os.system is not registered");
    assert_eq!(err.kind(), ErrorKind::Registry);

    let payload = StreamBuilder::new().proto(2).op(Opcode::EmptyList).stop();
    let err = decompile(&payload[..payload.len() - 1], script(), None).expect_err("no STOP");
    assert_eq!(err.kind(), ErrorKind::Stream);
}

#[test]
fn nesting_limit_applies_to_statements() {
    let mut b = ScriptBuilder::new(Schema::Current);
    let mut inner = b.node("renpy.ast.Pass", Vec::new());
    for _ in 0..8 {
        let block = b.list(vec![inner]);
        let condition = b.expr("x");
        let entry = b.tuple(vec![condition, block]);
        let entries = b.list(vec![entry]);
        inner = b.node("renpy.ast.If", vec![("entries", entries)]);
    }
    let payload = b.payload(vec![inner]);
    let limits = DecodeLimits {
        max_nesting: 6,
        ..DecodeLimits::default()
    };
    let err = decompile_with_limits(&payload, script(), None, limits).expect_err("too deep");
    assert!(matches!(err, Error::Render(RenderError::DepthExceeded { max: 6 })));

    let out = decompile(&payload, script(), None).expect("default limits allow it");
    assert!(out.source.starts_with("if x:\n  if x:\n"));
    assert!(out.source.ends_with("pass\n"));
}

#[test]
fn output_is_deterministic() {
    for schema in [Schema::Legacy, Schema::Current] {
        let payload = sample_script(schema);
        assert_eq!(payload, sample_script(schema), "payload differs between builds");
        let first = decompile(&payload, script(), None).expect("decompiles");
        for _ in 0..3 {
            let again = decompile(&payload, script(), None).expect("decompiles");
            assert_eq!(again.source, first.source);
            assert_eq!(again.schema, first.schema);
        }
    }
}
