use miette::Diagnostic;

use super::*;

#[test]
fn embedded_catalog_loads_for_every_profile() {
    for profile in [Profile::Archive, Profile::Script, Profile::Save] {
        let registry = ClassRegistry::from_toml(BUILTIN_CATALOG, profile)
            .unwrap_or_else(|err| panic!("{} catalog: {err}", profile.section()));
        assert_eq!(registry.profile(), profile);
        assert!(!registry.is_empty());
    }
}

#[test]
fn archive_profile_has_primitives_only() {
    let archive = ClassRegistry::builtin(Profile::Archive);
    assert!(archive.resolve("builtins.set").is_ok());
    for name in ["renpy.ast.Say", "collections.OrderedDict", "copy_reg._reconstructor"] {
        assert!(
            matches!(archive.resolve(name), Err(RegistryError::NotRegistered { .. })),
            "{name} should not resolve in the archive profile"
        );
    }
}

#[test]
fn script_profile_has_no_namespaces() {
    let script = ClassRegistry::builtin(Profile::Script);
    let say = script.resolve("renpy.ast.Say").expect("Say is registered");
    assert_eq!(say.kind, Some(NodeKind::Say));
    assert_eq!(say.policy, Policy::Record);
    assert!(script.resolve("store.Inventory").is_err());
    assert!(script.resolve("renpy.revertable.RevertableList").is_err());
}

#[test]
fn save_profile_falls_back_to_namespaces() {
    let save = ClassRegistry::builtin(Profile::Save);
    let game = save.resolve("store.Inventory").expect("store namespace");
    assert_eq!(game.policy, Policy::Container);
    assert!(game.kind.is_none());

    // Exact entries win over the namespace rule.
    let list = save.resolve("renpy.revertable.RevertableList").expect("registered");
    assert_eq!(list.policy, Policy::Container);
    let null = save.resolve("renpy.display.layout.Null").expect("registered");
    assert_eq!(null.policy, Policy::Reference);

    assert!(save.resolve("store.").is_err());
    assert!(save.resolve("os.system").is_err());
}

#[test]
fn resolve_parts_keeps_the_module_split() {
    let save = ClassRegistry::builtin(Profile::Save);
    let nested = save
        .resolve_parts("store.inventory", "Bag")
        .expect("store namespace");
    assert_eq!(nested.module(), "store.inventory");
    assert_eq!(nested.name(), "Bag");
    assert_eq!(nested.qualified(), "store.inventory.Bag");

    let script = ClassRegistry::builtin(Profile::Script);
    let expr = script
        .resolve_parts("renpy.astsupport", "PyExpr")
        .expect("registered");
    assert_eq!(expr.arg_name(5), Some("column"));
    assert!(expr.only_in(Schema::Current));
}

#[test]
fn schema_restricted_entries() {
    let save = ClassRegistry::builtin(Profile::Save);
    let legacy = save.resolve("renpy.python.RevertableList").expect("registered");
    assert!(legacy.only_in(Schema::Legacy));
    assert!(!legacy.only_in(Schema::Current));
    let say = save.resolve("renpy.ast.Say").expect("registered");
    assert!(!say.only_in(Schema::Legacy));
    assert!(!say.only_in(Schema::Current));
}

#[test]
fn policies_gate_construction_and_items() {
    let script = ClassRegistry::builtin(Profile::Script);
    let reference = script.resolve("builtins.list").expect("registered");
    assert!(!reference.is_constructible());
    let container = script.resolve("collections.OrderedDict").expect("registered");
    assert!(container.is_constructible());
    assert!(container.accepts_items());
    let record = script.resolve("renpy.ast.Label").expect("registered");
    assert!(!record.accepts_items());
}

#[test]
fn extension_appends_new_classes() {
    let mut registry = ClassRegistry::builtin(Profile::Script).clone();
    let before = registry.len();
    registry
        .extend_from_toml(
            r#"
[section.script]
class = [
    { name = "game.custom.Node", policy = "record", kind = "pass" },
]
"#,
        )
        .expect("extension applies");
    assert_eq!(registry.len(), before + 1);
    let custom = registry.resolve("game.custom.Node").expect("added");
    assert_eq!(custom.kind, Some(NodeKind::Pass));
}

#[test]
fn extension_ignores_other_profiles() {
    let mut registry = ClassRegistry::builtin(Profile::Archive).clone();
    registry
        .extend_from_toml(
            r#"
[section.save]
class = [{ name = "game.Thing", policy = "record" }]
"#,
        )
        .expect("nothing to apply");
    assert!(registry.resolve("game.Thing").is_err());
}

#[test]
fn redefinition_is_an_error() {
    let mut registry = ClassRegistry::builtin(Profile::Script).clone();
    let err = registry
        .extend_from_toml(
            r#"
[section.script]
class = [{ name = "renpy.ast.Say", policy = "record" }]
"#,
        )
        .expect_err("duplicate");
    assert!(matches!(err, CatalogError::Duplicate { name } if name == "renpy.ast.Say"));
}

#[test]
fn invalid_entries_are_rejected() {
    let cases = [
        r#"[section.script]
class = [{ name = "Unqualified", policy = "record" }]"#,
        r#"[section.script]
class = [{ name = "a.b", policy = "builtin" }]"#,
        r#"[section.script]
class = [{ name = "a.b", policy = "record", builtin = "set" }]"#,
        r#"[section.script]
namespace = [{ prefix = "game.", policy = "reference" }]"#,
        r#"[section.script]
namespace = [{ prefix = "game", policy = "record" }]"#,
    ];
    for source in cases {
        let result = ClassRegistry::from_toml(source, Profile::Script);
        assert!(
            matches!(result, Err(CatalogError::InvalidEntry { .. })),
            "accepted {source}"
        );
    }
}

#[test]
fn unknown_fields_and_sections_are_rejected() {
    assert!(matches!(
        ClassRegistry::from_toml(
            r#"[section.script]
class = [{ name = "a.b", policy = "record", callable = true }]"#,
            Profile::Script,
        ),
        Err(CatalogError::Parse(_))
    ));
    assert!(matches!(
        ClassRegistry::from_toml(
            r#"[section.script]
include = ["missing"]"#,
            Profile::Script,
        ),
        Err(CatalogError::UnknownSection { name }) if name == "missing"
    ));
}

#[test]
fn catalog_errors_carry_dotted_codes() {
    let duplicate = ClassRegistry::builtin(Profile::Script)
        .clone()
        .extend_from_toml(
            r#"[section.script]
class = [{ name = "renpy.ast.Pass", policy = "record" }]"#,
        )
        .expect_err("duplicate");
    let missing = ClassRegistry::from_toml(
        r#"[section.script]
include = ["missing"]"#,
        Profile::Script,
    )
    .expect_err("unknown section");
    for (err, expected) in [
        (duplicate, "catalog.duplicate"),
        (missing, "catalog.unknown_section"),
    ] {
        let code = err.code().map(|code| code.to_string());
        assert_eq!(code.as_deref(), Some(expected));
    }
}

#[test]
fn includes_are_loaded_once() {
    let registry = ClassRegistry::from_toml(
        r#"
[section.base]
class = [{ name = "a.A", policy = "record" }]

[section.left]
include = ["base"]

[section.script]
include = ["base", "left"]
"#,
        Profile::Script,
    )
    .expect("diamond includes load");
    assert_eq!(registry.names(), vec!["a.A"]);
}

#[test]
fn node_kind_names() {
    assert_eq!(NodeKind::SlShowIf.name(), "sl_showif");
    assert_eq!(NodeKind::AtlMultipurpose.family(), Family::Atl);
    assert_eq!(NodeKind::SlUse.family(), Family::Screen);
    assert_eq!(NodeKind::PyExpr.family(), Family::Support);
    assert_eq!(NodeKind::Say.family(), Family::Statement);
    assert_eq!(NodeKind::TranslateSay.to_string(), "translate_say");
}
