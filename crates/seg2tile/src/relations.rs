//! Access to per-segment FSP-FPP relation containers.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Variable name of the relation matrix inside every segment container.
pub const REL_VAR_NAME: &str = "FspFppDtf";

/// Relation matrix column count: FspX, FspY, FppX, FppY, Dtf, FilledDepth.
pub const REL_COLS: usize = 6;

pub const SEGMENT_FILE_PREFIX: &str = "segment_";
pub const SEGMENT_FILE_EXT: &str = "segr";

/// One FSP-FPP relation as stored by the segment library: a flood source
/// pixel, one pool pixel it floods, the distance-to-flood and the filled
/// depth (still relative to the source water surface at this point).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Relation {
    pub fsp_x: f64,
    pub fsp_y: f64,
    pub fpp_x: f64,
    pub fpp_y: f64,
    pub dtf: f64,
    pub filled_depth: f64,
}

/// All `segment_*.segr` files directly under `dir`, sorted by path so that
/// every traversal of the library is deterministic.
pub fn segment_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if name.starts_with(SEGMENT_FILE_PREFIX) && ext.eq_ignore_ascii_case(SEGMENT_FILE_EXT) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Read a segment's full relation set. Either container sub-format is
/// accepted; any read failure is fatal for the build.
pub fn read_segment_relations(path: &Path) -> Result<Vec<Relation>> {
    let matrix = segrel::read_variable(path, REL_VAR_NAME)
        .with_context(|| format!("reading segment relations from {}", path.display()))?;

    if matrix.cols() != REL_COLS {
        bail!(
            "{}: relation matrix has {} columns, expected {}",
            path.display(),
            matrix.cols(),
            REL_COLS
        );
    }
    let data = matrix
        .as_f64()
        .with_context(|| format!("{}: relation matrix is not f64", path.display()))?;

    Ok(data
        .chunks_exact(REL_COLS)
        .map(|c| Relation {
            fsp_x: c[0],
            fsp_y: c[1],
            fpp_x: c[2],
            fpp_y: c[3],
            dtf: c[4],
            filled_depth: c[5],
        })
        .collect())
}

#[cfg(test)]
pub fn write_segment_relations(
    path: &Path,
    rels: &[Relation],
    version: segrel::Version,
) -> Result<()> {
    let mut data = Vec::with_capacity(rels.len() * REL_COLS);
    for r in rels {
        data.extend_from_slice(&[r.fsp_x, r.fsp_y, r.fpp_x, r.fpp_y, r.dtf, r.filled_depth]);
    }
    let mut file = segrel::SegrFile::new();
    file.push(
        REL_VAR_NAME,
        segrel::Matrix::from_f64(rels.len(), REL_COLS, data)?,
    );
    segrel::write_file(path, &file, version)?;
    Ok(())
}
