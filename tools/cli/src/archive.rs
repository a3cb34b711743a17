//! RPA-3.0 member extraction.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::ZlibDecoder;
use rpycdec::{read_index_with_key, ArchiveHeader, ArchiveIndex};
use serde::Serialize;
use tracing::{info, warn};

use crate::write_output;

/// A header line is far shorter than this.
const HEADER_PROBE: u64 = 256;

/// One member as printed by `extract --list`.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MemberListing {
    pub name: String,
    pub size: u64,
    pub segments: usize,
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub written: Vec<PathBuf>,
    /// Members whose names would land outside the output directory.
    pub skipped: Vec<String>,
}

/// Reads the header and the decompressed index of the archive at `path`.
pub fn open_index(path: &Path) -> Result<(File, ArchiveIndex)> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut head = Vec::new();
    (&mut file).take(HEADER_PROBE).read_to_end(&mut head)?;
    let header = ArchiveHeader::parse(&head).context("read archive header")?;

    file.seek(SeekFrom::Start(header.index_offset))?;
    let mut payload = Vec::new();
    ZlibDecoder::new(&mut file)
        .read_to_end(&mut payload)
        .context("inflate archive index")?;
    let index = read_index_with_key(&payload, header.key).context("decode archive index")?;
    Ok((file, index))
}

pub fn list(path: &Path) -> Result<Vec<MemberListing>> {
    let (_, index) = open_index(path)?;
    Ok(index
        .iter()
        .map(|(name, segments)| MemberListing {
            name: name.clone(),
            size: segments
                .iter()
                .map(|s| s.length + s.prefix.len() as u64)
                .sum(),
            segments: segments.len(),
        })
        .collect())
}

/// Writes every member of the archive at `path` below `out_dir`.
///
/// A member is its segments in order, each one its stored prefix followed
/// by `length` bytes read at `offset`.
pub fn extract(path: &Path, out_dir: &Path) -> Result<ExtractReport> {
    let (mut file, index) = open_index(path)?;
    let mut report = ExtractReport::default();
    for (name, segments) in &index {
        let Some(dest) = safe_join(out_dir, name) else {
            warn!(member = %name, "skipping member outside the output directory");
            report.skipped.push(name.clone());
            continue;
        };
        let mut data = Vec::new();
        for segment in segments {
            data.extend_from_slice(&segment.prefix);
            file.seek(SeekFrom::Start(segment.offset))?;
            let start = data.len();
            (&mut file).take(segment.length).read_to_end(&mut data)?;
            let read = (data.len() - start) as u64;
            if read != segment.length {
                warn!(
                    member = %name,
                    expected = segment.length,
                    read,
                    "segment runs past the end of the archive"
                );
            }
        }
        write_output(&dest, &data)?;
        info!(path = %dest.display(), bytes = data.len(), "extracted");
        report.written.push(dest);
    }
    Ok(report)
}

/// `root` joined with the archive member `name`, or `None` when the name is
/// absolute or climbs out of `root`.
pub fn safe_join(root: &Path, name: &str) -> Option<PathBuf> {
    let name = name.replace('\\', "/");
    let mut out = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(&name).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (depth > 0).then_some(out)
}
