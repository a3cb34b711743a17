//! File-level plumbing around the `rpycdec` core: compiled-script envelopes,
//! archive extraction, directory batches and save logs.

pub mod archive;
pub mod batch;
pub mod envelope;
pub mod save;

use std::borrow::Cow;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rpycdec::{ClassRegistry, Profile};

/// Builtin registry for `profile`, extended with an operator catalog file
/// when one is given.
pub fn load_registry(
    profile: Profile,
    catalog: Option<&Path>,
) -> Result<Cow<'static, ClassRegistry>> {
    let builtin = ClassRegistry::builtin(profile);
    let Some(catalog) = catalog else {
        return Ok(Cow::Borrowed(builtin));
    };
    let source =
        fs::read_to_string(catalog).with_context(|| format!("read {}", catalog.display()))?;
    let mut registry = builtin.clone();
    registry
        .extend_from_toml(&source)
        .with_context(|| format!("apply catalog {}", catalog.display()))?;
    Ok(Cow::Owned(registry))
}

/// Writes `data` to `path`, creating missing parent directories.
pub fn write_output(path: &Path, data: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, data).with_context(|| format!("write {}", path.display()))
}
