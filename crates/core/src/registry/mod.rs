//! Closed catalog of class names the decoder may materialize.
//!
//! Every name is mapped to a local, inert recipe. Nothing here imports,
//! loads or calls code by name: a class that is not in the catalog (and not
//! covered by an explicit namespace rule of the active profile) is rejected.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, RegistryError};
use crate::version::Schema;

const BUILTIN_CATALOG: &str = include_str!("catalog.toml");

static ARCHIVE: Lazy<ClassRegistry> = Lazy::new(|| embedded(Profile::Archive));
static SCRIPT: Lazy<ClassRegistry> = Lazy::new(|| embedded(Profile::Script));
static SAVE: Lazy<ClassRegistry> = Lazy::new(|| embedded(Profile::Save));

fn embedded(profile: Profile) -> ClassRegistry {
    // Guarded by `embedded_catalog_loads_for_every_profile`.
    ClassRegistry::from_toml(BUILTIN_CATALOG, profile).expect("embedded class catalog is valid")
}

/// Which restricted loader a registry stands in for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Archive indexes: primitives only.
    Archive,
    /// Compiled scripts.
    Script,
    /// Save logs: scripts plus rollback containers and the user store.
    Save,
}

impl Profile {
    pub fn section(self) -> &'static str {
        match self {
            Profile::Archive => "archive",
            Profile::Script => "script",
            Profile::Save => "save",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Constructed empty, then filled by `BUILD`.
    Record,
    /// Constructor arguments are kept under the descriptor's argument names.
    Positional,
    /// List, dict or set subclass: accepts items as well as state.
    Container,
    /// A primitive rebuilt locally from its reducer arguments.
    Builtin,
    /// `copyreg._reconstructor(cls, base, state)`.
    Reconstructor,
    /// Usable as a value, never callable.
    Reference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinKind {
    Set,
    FrozenSet,
    Bytes,
    ByteArray,
    Object,
}

macro_rules! node_kinds {
    ($($variant:ident => $name:literal,)*) => {
        /// Object model variant a catalog class maps onto.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum NodeKind {
            $(#[serde(rename = $name)] $variant,)*
        }

        impl NodeKind {
            pub fn name(self) -> &'static str {
                match self {
                    $(NodeKind::$variant => $name,)*
                }
            }
        }
    };
}

node_kinds! {
    Say => "say",
    Init => "init",
    Label => "label",
    Python => "python",
    EarlyPython => "early_python",
    Image => "image",
    Transform => "transform",
    Show => "show",
    ShowLayer => "show_layer",
    Scene => "scene",
    Hide => "hide",
    With => "with",
    Call => "call",
    Return => "return",
    Menu => "menu",
    Jump => "jump",
    Pass => "pass",
    While => "while",
    If => "if",
    UserStatement => "user_statement",
    PostUserStatement => "post_user_statement",
    Define => "define",
    Default => "default",
    Screen => "screen",
    Translate => "translate",
    EndTranslate => "end_translate",
    TranslateString => "translate_string",
    TranslatePython => "translate_python",
    TranslateBlock => "translate_block",
    TranslateEarlyBlock => "translate_early_block",
    TranslateSay => "translate_say",
    Style => "style",
    Testcase => "testcase",
    Camera => "camera",
    AtlBlock => "atl_block",
    AtlMultipurpose => "atl_multipurpose",
    AtlContainsExpr => "atl_contains_expr",
    AtlChild => "atl_child",
    AtlRepeat => "atl_repeat",
    AtlParallel => "atl_parallel",
    AtlChoice => "atl_choice",
    AtlTime => "atl_time",
    AtlOn => "atl_on",
    AtlEvent => "atl_event",
    AtlFunction => "atl_function",
    SlScreen => "sl_screen",
    SlDisplayable => "sl_displayable",
    SlIf => "sl_if",
    SlShowIf => "sl_showif",
    SlFor => "sl_for",
    SlPython => "sl_python",
    SlPass => "sl_pass",
    SlDefault => "sl_default",
    SlUse => "sl_use",
    SlTransclude => "sl_transclude",
    SlBlock => "sl_block",
    SlContinue => "sl_continue",
    SlBreak => "sl_break",
    PyExpr => "py_expr",
    PyCode => "py_code",
    ArgumentInfo => "argument_info",
    ParameterInfo => "parameter_info",
    Signature => "signature",
    Parameter => "parameter",
    SubParse => "sub_parse",
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    Statement,
    Atl,
    Screen,
    Support,
}

impl NodeKind {
    pub fn family(self) -> Family {
        let name = self.name();
        if name.starts_with("atl_") {
            Family::Atl
        } else if name.starts_with("sl_") {
            Family::Screen
        } else if matches!(
            self,
            NodeKind::PyExpr
                | NodeKind::PyCode
                | NodeKind::ArgumentInfo
                | NodeKind::ParameterInfo
                | NodeKind::Signature
                | NodeKind::Parameter
                | NodeKind::SubParse
        ) {
            Family::Support
        } else {
            Family::Statement
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Local recipe for one class name.
#[derive(Clone, Debug)]
pub struct ClassDescriptor {
    qualified: String,
    split: usize,
    pub policy: Policy,
    pub kind: Option<NodeKind>,
    pub builtin: Option<BuiltinKind>,
    pub args: Vec<String>,
    /// Schemas whose producers emit this class; empty means all of them.
    pub schemas: Vec<Schema>,
}

impl ClassDescriptor {
    fn new(qualified: &str, policy: Policy) -> Self {
        let split = qualified.rfind('.').unwrap_or(0);
        Self {
            qualified: qualified.to_string(),
            split,
            policy,
            kind: None,
            builtin: None,
            args: Vec::new(),
            schemas: Vec::new(),
        }
    }

    pub fn qualified(&self) -> &str {
        &self.qualified
    }

    pub fn module(&self) -> &str {
        &self.qualified[..self.split]
    }

    pub fn name(&self) -> &str {
        if self.split == 0 {
            &self.qualified
        } else {
            &self.qualified[self.split + 1..]
        }
    }

    /// Name of the constructor argument at `index`, if the catalog names it.
    pub fn arg_name(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Whether `NEWOBJ` / `REDUCE` may build an instance of this class.
    pub fn is_constructible(&self) -> bool {
        !matches!(self.policy, Policy::Reference)
    }

    /// Whether `APPEND`, `SETITEM` and `ADDITEMS` may target instances of it.
    pub fn accepts_items(&self) -> bool {
        matches!(self.policy, Policy::Container)
    }

    pub fn only_in(&self, schema: Schema) -> bool {
        !self.schemas.is_empty() && self.schemas.iter().all(|s| *s == schema)
    }
}

impl PartialEq for ClassDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.qualified == other.qualified
    }
}

#[derive(Clone, Debug)]
struct Namespace {
    prefix: String,
    policy: Policy,
}

/// A read-only mapping from qualified class name to [`ClassDescriptor`].
#[derive(Clone, Debug)]
pub struct ClassRegistry {
    profile: Profile,
    classes: HashMap<String, Arc<ClassDescriptor>>,
    namespaces: Vec<Namespace>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDoc {
    #[serde(default)]
    section: BTreeMap<String, SectionDoc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SectionDoc {
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    class: Vec<ClassDoc>,
    #[serde(default)]
    namespace: Vec<NamespaceDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassDoc {
    name: String,
    policy: Policy,
    #[serde(default)]
    kind: Option<NodeKind>,
    #[serde(default)]
    builtin: Option<BuiltinKind>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    schemas: Vec<Schema>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NamespaceDoc {
    prefix: String,
    policy: Policy,
}

impl ClassRegistry {
    /// The embedded catalog for `profile`, shared process-wide.
    pub fn builtin(profile: Profile) -> &'static ClassRegistry {
        match profile {
            Profile::Archive => Lazy::force(&ARCHIVE),
            Profile::Script => Lazy::force(&SCRIPT),
            Profile::Save => Lazy::force(&SAVE),
        }
    }

    /// An empty registry; every lookup fails until entries are added.
    pub fn empty(profile: Profile) -> Self {
        Self {
            profile,
            classes: HashMap::new(),
            namespaces: Vec::new(),
        }
    }

    pub fn from_toml(source: &str, profile: Profile) -> Result<Self, CatalogError> {
        let mut registry = Self::empty(profile);
        registry.extend_from_toml(source)?;
        Ok(registry)
    }

    /// Appends the section named after this registry's profile (and the
    /// sections it includes) from another catalog document. Redefining a
    /// name that is already registered is an error.
    pub fn extend_from_toml(&mut self, source: &str) -> Result<(), CatalogError> {
        let doc: CatalogDoc = toml::from_str(source)?;
        if !doc.section.contains_key(self.profile.section()) {
            return Ok(());
        }
        let mut visited = BTreeSet::new();
        self.load_section(&doc, self.profile.section(), &mut visited)
    }

    fn load_section(
        &mut self,
        doc: &CatalogDoc,
        name: &str,
        visited: &mut BTreeSet<String>,
    ) -> Result<(), CatalogError> {
        if !visited.insert(name.to_string()) {
            return Ok(());
        }
        let section = doc
            .section
            .get(name)
            .ok_or_else(|| CatalogError::UnknownSection {
                name: name.to_string(),
            })?;
        for include in &section.include {
            self.load_section(doc, include, visited)?;
        }
        for entry in &section.class {
            self.insert(entry)?;
        }
        for namespace in &section.namespace {
            if !matches!(namespace.policy, Policy::Record | Policy::Container) {
                return Err(CatalogError::InvalidEntry {
                    name: namespace.prefix.clone(),
                    reason: "namespace rules may only declare record or container policies"
                        .to_string(),
                });
            }
            if !namespace.prefix.ends_with('.') {
                return Err(CatalogError::InvalidEntry {
                    name: namespace.prefix.clone(),
                    reason: "namespace prefixes must end with `.`".to_string(),
                });
            }
            self.namespaces.push(Namespace {
                prefix: namespace.prefix.clone(),
                policy: namespace.policy,
            });
        }
        Ok(())
    }

    fn insert(&mut self, entry: &ClassDoc) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidEntry {
            name: entry.name.clone(),
            reason: reason.to_string(),
        };
        if !entry.name.contains('.') {
            return Err(invalid("class names must be module-qualified"));
        }
        match (entry.policy, entry.builtin) {
            (Policy::Builtin, None) => return Err(invalid("builtin policy needs `builtin`")),
            (Policy::Builtin, Some(_)) => {}
            (_, Some(_)) => return Err(invalid("`builtin` is only valid with builtin policy")),
            _ => {}
        }
        if self.classes.contains_key(&entry.name) {
            return Err(CatalogError::Duplicate {
                name: entry.name.clone(),
            });
        }
        let mut descriptor = ClassDescriptor::new(&entry.name, entry.policy);
        descriptor.kind = entry.kind;
        descriptor.builtin = entry.builtin;
        descriptor.args = entry.args.clone();
        descriptor.schemas = entry.schemas.clone();
        self.classes.insert(entry.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.namespaces.is_empty()
    }

    pub fn resolve(&self, qualified: &str) -> Result<Arc<ClassDescriptor>, RegistryError> {
        self.lookup(qualified, None)
    }

    /// Resolves a `module` / `name` pair as it appears in `GLOBAL` operands.
    pub fn resolve_parts(
        &self,
        module: &str,
        name: &str,
    ) -> Result<Arc<ClassDescriptor>, RegistryError> {
        self.lookup(&format!("{module}.{name}"), Some(module.len()))
    }

    fn lookup(
        &self,
        qualified: &str,
        split: Option<usize>,
    ) -> Result<Arc<ClassDescriptor>, RegistryError> {
        if let Some(descriptor) = self.classes.get(qualified) {
            return Ok(Arc::clone(descriptor));
        }
        self.namespaces
            .iter()
            .find(|namespace| {
                qualified.len() > namespace.prefix.len() && qualified.starts_with(&namespace.prefix)
            })
            .map(|namespace| {
                let mut descriptor = ClassDescriptor::new(qualified, namespace.policy);
                if let Some(split) = split {
                    descriptor.split = split;
                }
                Arc::new(descriptor)
            })
            .ok_or_else(|| RegistryError::NotRegistered {
                name: qualified.to_string(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
#[path = "../tests/registry_tests.rs"]
mod tests;
