//! Decompiling single files and whole directory trees.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rpycdec::{decompile, ClassRegistry, Decompiled, Error as CoreError, Schema};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::envelope::script_payload;
use crate::write_output;

/// Extensions of compiled scripts and compiled modules.
pub const COMPILED_EXTENSIONS: [&str; 2] = ["rpyc", "rpymc"];

#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, anyhow::Error)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub fn is_compiled_script(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| COMPILED_EXTENSIONS.contains(&ext))
}

/// `script.rpyc` becomes `script.rpy`, `lib.rpymc` becomes `lib.rpym`.
pub fn source_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_suffix('c') {
        Some(stripped) => PathBuf::from(stripped),
        None => path.to_path_buf(),
    }
}

/// Decompiles one compiled script file to `output`.
pub fn decompile_file(
    input: &Path,
    output: &Path,
    registry: &ClassRegistry,
    schema: Option<Schema>,
) -> Result<Decompiled> {
    let data = fs::read(input).with_context(|| format!("read {}", input.display()))?;
    let payload = script_payload(&data)?;
    let decompiled = decompile(&payload, registry, schema)?;
    write_output(output, &decompiled.source)?;
    info!(
        path = %output.display(),
        schema = %decompiled.schema,
        protocol = decompiled.protocol,
        "decompiled"
    );
    Ok(decompiled)
}

/// Decompiles `input`, a file or a directory tree.
///
/// For a tree every compiled script below `input` is written to the same
/// relative place below `output` (or next to itself). A file that fails is
/// reported and skipped; the rest of the tree is still processed.
pub fn decompile_path(
    input: &Path,
    output: Option<&Path>,
    registry: &ClassRegistry,
    schema: Option<Schema>,
) -> Result<BatchReport> {
    let mut report = BatchReport::default();
    if !input.is_dir() {
        let dest = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| source_path(input));
        record(&mut report, input, dest, registry, schema);
        return Ok(report);
    }
    let out_root = output.unwrap_or(input);
    for entry in WalkDir::new(input).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", input.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_compiled_script(path) {
            continue;
        }
        let relative = path.strip_prefix(input).unwrap_or(path);
        let dest = source_path(&out_root.join(relative));
        record(&mut report, path, dest, registry, schema);
    }
    Ok(report)
}

fn record(
    report: &mut BatchReport,
    input: &Path,
    dest: PathBuf,
    registry: &ClassRegistry,
    schema: Option<Schema>,
) {
    match decompile_file(input, &dest, registry, schema) {
        Ok(_) => report.written.push(dest),
        Err(err) => {
            let kind = err.downcast_ref::<CoreError>().map(CoreError::kind);
            warn!(path = %input.display(), kind = ?kind, "skipping: {err:#}");
            report.failed.push((input.to_path_buf(), err));
        }
    }
}
