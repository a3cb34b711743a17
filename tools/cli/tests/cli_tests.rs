use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use rpycdec::{
    encode, ClassRegistry, Construction, Graph, Instance, Mapping, Object, Profile, State, Value,
    RPC2_MAGIC, RPA3_MAGIC,
};
use rpycdec_cli::{archive, batch, envelope, save};
use tempfile::tempdir;

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("compress");
    encoder.finish().expect("finish zlib stream")
}

/// An RPC2 file holding `slots` in order.
fn rpc2(slots: &[(u32, &[u8])]) -> Vec<u8> {
    let compressed: Vec<Vec<u8>> = slots.iter().map(|(_, data)| zlib(data)).collect();
    let mut out = RPC2_MAGIC.to_vec();
    let mut start = RPC2_MAGIC.len() + 12 * (slots.len() + 1);
    for ((slot, _), data) in slots.iter().zip(&compressed) {
        for field in [*slot as usize, start, data.len()] {
            out.extend_from_slice(&(field as u32).to_le_bytes());
        }
        start += data.len();
    }
    out.extend_from_slice(&[0; 12]);
    for data in &compressed {
        out.extend_from_slice(data);
    }
    out
}

/// `[pass]` as a current producer pickles it.
fn pass_script() -> Vec<u8> {
    let class = ClassRegistry::builtin(Profile::Script)
        .resolve("renpy.ast.Pass")
        .expect("Pass is registered");
    let mut graph = Graph::new();
    let mut node = Instance::new(class, Construction::NewObj, Vec::new());
    node.dict
        .set(Arc::from("filename"), Value::str("game/script.rpy"));
    node.dict.set(Arc::from("linenumber"), Value::Int(1));
    node.state = State::Dict;
    let node = Value::Ref(graph.alloc(Object::Instance(node)));
    let root = Value::Ref(graph.alloc(Object::List(vec![node])));
    encode(&graph, &root).expect("script encodes")
}

/// An RPA-3.0 archive with its index obfuscated by `key`.
fn rpa3(members: &[(&str, &[u8], &[u8])], key: u64) -> Vec<u8> {
    const HEADER_LEN: usize = 34;
    let mut body = Vec::new();
    let mut graph = Graph::new();
    let mut index = Mapping::new();
    for (name, prefix, data) in members {
        let offset = (HEADER_LEN + body.len()) as u64;
        body.extend_from_slice(data);
        let segment = graph.alloc(Object::Tuple(vec![
            Value::Int((offset ^ key) as i64),
            Value::Int((data.len() as u64 ^ key) as i64),
            Value::Bytes(Arc::from(*prefix)),
        ]));
        let segments = graph.alloc(Object::List(vec![Value::Ref(segment)]));
        index.insert(Value::str(name), Value::Ref(segments));
    }
    let root = Value::Ref(graph.alloc(Object::Dict(index)));
    let index = zlib(&encode(&graph, &root).expect("index encodes"));

    let mut out = format!(
        "{}{:016x} {:08x}\n",
        String::from_utf8_lossy(RPA3_MAGIC),
        HEADER_LEN + body.len(),
        key
    )
    .into_bytes();
    assert_eq!(out.len(), HEADER_LEN);
    out.extend_from_slice(&body);
    out.extend_from_slice(&index);
    out
}

#[test]
fn script_payload_comes_from_the_first_filled_slot() {
    let payload = pass_script();
    let file = rpc2(&[(1, &payload), (2, &b"unused"[..])]);
    assert_eq!(
        envelope::script_payload(&file).expect("slot 1"),
        payload
    );

    let file = rpc2(&[(1, &b""[..]), (2, &payload)]);
    assert_eq!(
        envelope::script_payload(&file).expect("falls back to slot 2"),
        payload
    );
}

#[test]
fn legacy_envelope_is_one_zlib_stream() {
    let payload = pass_script();
    let file = zlib(&payload);
    assert!(!envelope::is_rpc2(&file));
    assert_eq!(envelope::script_payload(&file).expect("legacy"), payload);
    assert!(envelope::read_slot(&file, 2).expect("no slot 2").is_none());
}

#[test]
fn slot_table_bounds_are_checked() {
    let mut file = rpc2(&[(1, &pass_script())]);
    let len = file.len() as u32;
    // Stretch slot 1 past the end of the file.
    let length_at = RPC2_MAGIC.len() + 8;
    file[length_at..length_at + 4].copy_from_slice(&len.to_le_bytes());
    let err = envelope::script_payload(&file).expect_err("slot runs past the end");
    assert!(format!("{err:#}").contains("slot 1 spans"));

    let truncated = &file[..RPC2_MAGIC.len() + 6];
    let err = envelope::slot_table(truncated).expect_err("table is cut short");
    assert!(err.to_string().contains("truncated"));
}

#[test]
fn compiled_script_names_map_to_sources() {
    assert_eq!(
        batch::source_path(Path::new("game/script.rpyc")),
        Path::new("game/script.rpy")
    );
    assert_eq!(
        batch::source_path(Path::new("lib.rpymc")),
        Path::new("lib.rpym")
    );
    assert!(batch::is_compiled_script(Path::new("a/b.rpyc")));
    assert!(!batch::is_compiled_script(Path::new("a/b.rpy")));
}

#[test]
fn batch_skips_broken_files_and_continues() {
    let dir = tempdir().expect("tempdir");
    let game = dir.path().join("game");
    fs::create_dir_all(game.join("sub")).expect("mkdir");
    fs::write(game.join("a.rpyc"), rpc2(&[(1, &pass_script())])).expect("write a");
    fs::write(game.join("broken.rpyc"), b"not zlib at all").expect("write broken");
    fs::write(game.join("sub/c.rpyc"), zlib(&pass_script())).expect("write c");
    fs::write(game.join("notes.txt"), b"ignored").expect("write notes");

    let out = dir.path().join("out");
    let registry = ClassRegistry::builtin(Profile::Script);
    let report = batch::decompile_path(&game, Some(out.as_path()), registry, None).expect("walks");

    assert!(!report.is_clean());
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].0.ends_with("broken.rpyc"));
    assert_eq!(report.written.len(), 2);
    assert_eq!(
        fs::read_to_string(out.join("a.rpy")).expect("a.rpy"),
        "pass\n"
    );
    assert_eq!(
        fs::read_to_string(out.join("sub/c.rpy")).expect("sub/c.rpy"),
        "pass\n"
    );
    assert!(!out.join("broken.rpy").exists());
}

#[test]
fn single_file_lands_next_to_its_input() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("script.rpyc");
    fs::write(&input, rpc2(&[(1, &pass_script())])).expect("write");
    let registry = ClassRegistry::builtin(Profile::Script);
    let report = batch::decompile_path(&input, None, registry, None).expect("runs");
    assert!(report.is_clean());
    assert_eq!(report.written, vec![dir.path().join("script.rpy")]);
}

#[test]
fn archive_members_are_extracted_with_prefixes() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("data.rpa");
    let file = rpa3(
        &[
            ("images/bg.png", &b"\x89PN"[..], &b"G body"[..]),
            ("script.rpy", &b""[..], &b"label start:\n"[..]),
        ],
        0x4242_4242,
    );
    fs::write(&path, file).expect("write archive");

    let listing = archive::list(&path).expect("lists");
    assert_eq!(
        listing,
        vec![
            archive::MemberListing {
                name: "images/bg.png".to_string(),
                size: 9,
                segments: 1,
            },
            archive::MemberListing {
                name: "script.rpy".to_string(),
                size: 13,
                segments: 1,
            },
        ]
    );

    let out = dir.path().join("out");
    let report = archive::extract(&path, &out).expect("extracts");
    assert_eq!(report.written.len(), 2);
    assert!(report.skipped.is_empty());
    assert_eq!(
        fs::read(out.join("images/bg.png")).expect("bg"),
        b"\x89PNG body"
    );
    assert_eq!(
        fs::read(out.join("script.rpy")).expect("script"),
        b"label start:\n"
    );
}

#[test]
fn members_outside_the_output_directory_are_skipped() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("evil.rpa");
    let file = rpa3(
        &[
            ("../escape.txt", &b""[..], &b"x"[..]),
            ("ok.txt", &b""[..], &b"y"[..]),
        ],
        0,
    );
    fs::write(&path, file).expect("write archive");
    let out = dir.path().join("out");
    let report = archive::extract(&path, &out).expect("extracts");
    assert_eq!(report.skipped, vec!["../escape.txt".to_string()]);
    assert!(!dir.path().join("escape.txt").exists());
    assert_eq!(fs::read(out.join("ok.txt")).expect("ok"), b"y");
}

#[test]
fn safe_join_rejects_escapes() {
    let root = Path::new("out");
    assert_eq!(
        archive::safe_join(root, "a\\b.txt"),
        Some(root.join("a").join("b.txt"))
    );
    assert_eq!(archive::safe_join(root, "./a"), Some(root.join("a")));
    assert!(archive::safe_join(root, "/etc/passwd").is_none());
    assert!(archive::safe_join(root, "a/../../b").is_none());
    assert!(archive::safe_join(root, "").is_none());
    assert!(archive::safe_join(root, ".").is_none());
}

#[test]
fn save_log_round_trips_through_json() {
    let registry = ClassRegistry::builtin(Profile::Save);
    let mut graph = Graph::new();
    let mut store = Mapping::new();
    store.insert(Value::str("points"), Value::Int(3));
    store.insert(Value::str("name"), Value::str("Eileen"));
    let items = graph.alloc(Object::List(vec![Value::str("key"), Value::str("map")]));
    store.insert(Value::str("items"), Value::Ref(items));
    let root = Value::Ref(graph.alloc(Object::Dict(store)));
    let log = encode(&graph, &root).expect("log encodes");

    let json = save::log_to_json(&log, registry).expect("to json");
    assert_eq!(json["points"], 3);
    assert_eq!(json["name"], "Eileen");
    assert_eq!(json["items"], serde_json::json!(["key", "map"]));

    let mut edited = json.clone();
    edited["points"] = serde_json::json!(10);
    let restored = save::json_to_log(&edited, registry).expect("to log");
    let again = save::log_to_json(&restored, registry).expect("decodes again");
    assert_eq!(again["points"], 10);
    assert_eq!(again["items"], json["items"]);
}

#[test]
fn save_namespaces_need_no_catalog() {
    let registry = ClassRegistry::builtin(Profile::Save);
    let class = registry.resolve("store.Inventory").expect("store namespace");
    let mut graph = Graph::new();
    let root = Value::Ref(graph.alloc(Object::Instance(Instance::new(
        class,
        Construction::NewObj,
        Vec::new(),
    ))));
    let log = encode(&graph, &root).expect("encodes");
    let json = save::log_to_json(&log, registry).expect("to json");
    assert_eq!(json["__class__"], "store.Inventory");
}

#[test]
fn binary_exits_non_zero_when_a_file_fails() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("good.rpyc"), rpc2(&[(1, &pass_script())])).expect("write");
    fs::write(dir.path().join("bad.rpyc"), b"junk").expect("write");

    let status = Command::new(env!("CARGO_BIN_EXE_rpycdec"))
        .arg("-q")
        .arg("decompile")
        .arg(dir.path())
        .status()
        .expect("runs");
    assert!(!status.success());
    assert_eq!(
        fs::read_to_string(dir.path().join("good.rpy")).expect("good.rpy"),
        "pass\n"
    );
}

#[test]
fn binary_lists_archive_members_as_json() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("data.rpa");
    fs::write(&path, rpa3(&[("a.txt", &b""[..], &b"abc"[..])], 7)).expect("write");

    let output = Command::new(env!("CARGO_BIN_EXE_rpycdec"))
        .args(["-q", "extract", "--list"])
        .arg(&path)
        .output()
        .expect("runs");
    assert!(output.status.success());
    let listing: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is json");
    assert_eq!(
        listing,
        serde_json::json!([{ "name": "a.txt", "size": 3, "segments": 1 }])
    );
}
