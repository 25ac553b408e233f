//! The segment-to-tile conversion pipeline.
//!
//! Per-tile row sets are computed in parallel over the deterministic grid
//! order; tile IDs, tile files and the two index tables are then produced by
//! a single sequential merge pass, so the output is byte-identical to a
//! serial run. A whole build is one atomic batch job: any failure aborts it
//! and a rerun starts from scratch.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use crate::encode::{self, TileFormat, TileRelation};
use crate::extent::{self, Extent, SegmentExtent};
use crate::grid::{self, GridTile};
use crate::index::{self, FspIndexRow, TileIndexRow};
use crate::info::{self, FspRecord, LibraryMetadata};
use crate::relations::{self, Relation};

#[derive(Debug, Clone)]
pub struct TileOptions {
    /// Segment-based library folder.
    pub library: PathBuf,
    /// Tiled-library output folder.
    pub output: PathBuf,
    /// Cell size in ground units.
    pub cell_size: f64,
    /// Tile side length as a number of cells.
    pub tile_size: u32,
    pub format: TileFormat,
}

/// A segment extent in the R-tree, carrying its position in the sorted
/// segment list.
struct SegmentEnvelope {
    index: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for SegmentEnvelope {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Everything known about one non-empty tile before an ID is assigned.
struct BuiltTile {
    rect: Extent,
    /// Padded external extent of the FPPs present in the tile.
    fpp_ext: Extent,
    /// Padded external extent of the FSPs flooding into the tile.
    fsp_ext: Extent,
    rows: Vec<TileRelation>,
    /// Per-FSP DTF range, ordered by FSP ID.
    fsp_stats: Vec<(i32, f32, f32)>,
    distinct_fpps: usize,
}

/// Convert a segment-based library into a tiled library.
pub fn tile_library(opts: &TileOptions) -> Result<()> {
    fs::create_dir_all(&opts.output)
        .with_context(|| format!("creating {}", opts.output.display()))?;

    // The info tables travel with the tiled library unchanged.
    for name in [info::FSP_INFO_FILE, info::SEG_INFO_FILE] {
        fs::copy(opts.library.join(name), opts.output.join(name))
            .with_context(|| format!("copying {name}"))?;
    }

    // Metadata: tile/cell size plus the opaque spatial-reference text.
    let sr_text = fs::read_to_string(opts.library.join(info::PRJ_FILE))
        .with_context(|| format!("reading {}", info::PRJ_FILE))?;
    info::write_metadata(
        &opts.output.join(info::METADATA_FILE),
        &LibraryMetadata {
            tile_size: opts.tile_size,
            cell_size: opts.cell_size,
            spatial_reference: sr_text,
        },
    )?;

    let (lib_ext, seg_exts) = extent::calculate_library_extent(&opts.library, opts.cell_size)?;
    let Some(lib_ext) = lib_ext else {
        index::write_fsp_index(&opts.output.join(index::FSP_INDEX_FILE), &[])?;
        index::write_tile_index(&opts.output.join(index::TILE_INDEX_FILE), &[])?;
        warn!("empty library: wrote metadata and header-only indexes");
        return Ok(());
    };

    let step = f64::from(opts.tile_size) * opts.cell_size;
    let tiles = grid::tile_grid(&lib_ext, step, step, true);
    info!("number of possible tiles: {}", tiles.len());

    // Library-wide FSP coordinate table, keyed on raw bit patterns: the
    // join back to FSP IDs must be bit-exact.
    let fsps: Vec<FspRecord> = info::read_records(&opts.library.join(info::FSP_INFO_FILE))?;
    let mut fsp_ids = HashMap::with_capacity(fsps.len());
    for f in &fsps {
        fsp_ids.insert((f.fsp_x.to_bits(), f.fsp_y.to_bits()), f.fsp_id);
    }

    let rtree = RTree::bulk_load(
        seg_exts
            .iter()
            .enumerate()
            .map(|(index, s)| SegmentEnvelope {
                index,
                env: AABB::from_corners(
                    [s.extent.min_x, s.extent.min_y],
                    [s.extent.max_x, s.extent.max_y],
                ),
            })
            .collect(),
    );

    info!("building tiles (re-grouping FSP-FPP relations)...");
    let built: Vec<Option<BuiltTile>> = tiles
        .par_iter()
        .map(|tile| build_tile(tile, &rtree, &seg_exts, opts.cell_size, &fsp_ids))
        .collect::<Result<_>>()?;

    // Sequential merge: assign contiguous IDs to non-empty tiles in grid
    // order, write their files, accumulate both indexes.
    let mut fsp_index: Vec<FspIndexRow> = Vec::new();
    let mut tile_index: Vec<TileIndexRow> = Vec::new();
    let mut tile_id: u32 = 1;
    for tile in built.into_iter().flatten() {
        let file_name = encode::tile_file_name(opts.format, tile_id);
        encode::write_tile(&opts.output.join(&file_name), &tile.rows, opts.format)?;

        let mut min_dtf = f32::INFINITY;
        let mut max_dtf = f32::NEG_INFINITY;
        for &(fsp_id, lo, hi) in &tile.fsp_stats {
            min_dtf = min_dtf.min(lo);
            max_dtf = max_dtf.max(hi);
            fsp_index.push(FspIndexRow {
                fsp_id,
                tile_id,
                min_dtf: lo,
                max_dtf: hi,
            });
        }

        info!(
            "tile {}: {} relations, {} FSPs, {} FPPs -> {}",
            tile_id,
            tile.rows.len(),
            tile.fsp_stats.len(),
            tile.distinct_fpps,
            file_name
        );
        tile_index.push(TileIndexRow {
            tile_id,
            min_x: tile.rect.min_x,
            max_x: tile.rect.max_x,
            min_y: tile.rect.min_y,
            max_y: tile.rect.max_y,
            fpp_min_x: tile.fpp_ext.min_x,
            fpp_max_x: tile.fpp_ext.max_x,
            fpp_min_y: tile.fpp_ext.min_y,
            fpp_max_y: tile.fpp_ext.max_y,
            fsp_min_x: tile.fsp_ext.min_x,
            fsp_max_x: tile.fsp_ext.max_x,
            fsp_min_y: tile.fsp_ext.min_y,
            fsp_max_y: tile.fsp_ext.max_y,
            min_dtf,
            max_dtf,
            num_of_rels: tile.rows.len() as u64,
            num_of_fpps: tile.distinct_fpps as u64,
        });
        tile_id += 1;
    }

    info!("built {} tiles", tile_id - 1);
    index::write_fsp_index(&opts.output.join(index::FSP_INDEX_FILE), &fsp_index)?;
    index::write_tile_index(&opts.output.join(index::TILE_INDEX_FILE), &tile_index)?;
    Ok(())
}

/// Tile ownership test. Intervals are half-open so FPPs exactly on a shared
/// edge belong to exactly one tile; the final interval on each axis keeps
/// its upper boundary.
#[inline]
fn in_tile(r: &Relation, tile: &GridTile) -> bool {
    let e = &tile.extent;
    let in_x = r.fpp_x >= e.min_x && (r.fpp_x < e.max_x || (tile.last_col && r.fpp_x <= e.max_x));
    let in_y = r.fpp_y >= e.min_y && (r.fpp_y < e.max_y || (tile.last_row && r.fpp_y <= e.max_y));
    in_x && in_y
}

fn build_tile(
    tile: &GridTile,
    rtree: &RTree<SegmentEnvelope>,
    seg_exts: &[SegmentExtent],
    cell_size: f64,
    fsp_ids: &HashMap<(u64, u64), i32>,
) -> Result<Option<BuiltTile>> {
    let rect = tile.extent;
    let query = AABB::from_corners([rect.min_x, rect.min_y], [rect.max_x, rect.max_y]);

    // R-tree iteration order is arbitrary; sort so row concatenation order
    // (and therefore file bytes) never depends on tree shape.
    let mut hits: Vec<usize> = rtree
        .locate_in_envelope_intersecting(&query)
        .map(|e| e.index)
        .collect();
    hits.sort_unstable();

    let mut kept: Vec<Relation> = Vec::new();
    for &i in &hits {
        debug_assert!(rect.overlaps(&seg_exts[i].extent));
        let rels = relations::read_segment_relations(&seg_exts[i].path)?;
        kept.extend(rels.into_iter().filter(|r| in_tile(r, tile)));
    }
    if kept.is_empty() {
        return Ok(None);
    }
    debug_assert!(kept.iter().all(|r| rect.contains(r.fpp_x, r.fpp_y)));
    debug!(
        "tile ({}, {}, {}, {}): {} overlapping segments, {} relations",
        rect.min_x,
        rect.max_x,
        rect.min_y,
        rect.max_y,
        hits.len(),
        kept.len()
    );

    // Cell-center sub-extents of what the tile actually holds.
    let mut fsp_ext = Extent::EMPTY;
    let mut fpp_ext = Extent::EMPTY;
    for r in &kept {
        fsp_ext.include(r.fsp_x, r.fsp_y);
        fpp_ext.include(r.fpp_x, r.fpp_y);
    }

    // Reduce rows: grid-local pixel coordinates (origin at the tile's
    // top-left FPP), FSP IDs resolved by exact coordinate match, filled
    // depth re-based against the DTF.
    let mut rows = Vec::with_capacity(kept.len());
    let mut stats: BTreeMap<i32, (f32, f32)> = BTreeMap::new();
    let mut fpps: HashSet<(i32, i32)> = HashSet::with_capacity(kept.len());
    for r in &kept {
        let col = ((r.fpp_x - fpp_ext.min_x) / cell_size).round() as i32;
        let row = ((fpp_ext.max_y - r.fpp_y) / cell_size).round() as i32;
        let fsp_id = *fsp_ids
            .get(&(r.fsp_x.to_bits(), r.fsp_y.to_bits()))
            .with_context(|| {
                format!(
                    "no FSP ID for source pixel at ({}, {}); fsp_info.csv does not match the segment files",
                    r.fsp_x, r.fsp_y
                )
            })?;

        let dtf = r.dtf as f32;
        rows.push(TileRelation {
            fsp_id,
            col,
            row,
            dtf,
            filled_depth: (r.filled_depth - r.dtf) as f32,
        });
        fpps.insert((col, row));
        stats
            .entry(fsp_id)
            .and_modify(|(lo, hi)| {
                *lo = lo.min(dtf);
                *hi = hi.max(dtf);
            })
            .or_insert((dtf, dtf));
    }

    let half_cell = cell_size / 2.0;
    Ok(Some(BuiltTile {
        rect,
        fpp_ext: fpp_ext.padded(half_cell),
        fsp_ext: fsp_ext.padded(half_cell),
        rows,
        fsp_stats: stats.into_iter().map(|(id, (lo, hi))| (id, lo, hi)).collect(),
        distinct_fpps: fpps.len(),
    }))
}
