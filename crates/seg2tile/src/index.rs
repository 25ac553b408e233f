//! The two cross-reference tables persisted at the end of a tile build.
//!
//! Rows accumulate in plain vectors for the whole build and are written
//! exactly once; both tables are immutable after that.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::info;

pub const FSP_INDEX_FILE: &str = "tile_fsp_index.csv";
pub const TILE_INDEX_FILE: &str = "tile_tile_index.csv";

pub const FSP_INDEX_HEADER: &[&str] = &["FspId", "TileId", "MinDtf", "MaxDtf"];
pub const TILE_INDEX_HEADER: &[&str] = &[
    "TileId", "MinX", "MaxX", "MinY", "MaxY", "FppMinX", "FppMaxX", "FppMinY", "FppMaxY",
    "FspMinX", "FspMaxX", "FspMinY", "FspMaxY", "MinDtf", "MaxDtf", "NumOfRels", "NumOfFpps",
];

/// FSP-to-tile membership: one row per (FSP, tile) pair, with the DTF range
/// that FSP contributes to the tile. One FSP may flood pixels in several
/// tiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FspIndexRow {
    #[serde(rename = "FspId")]
    pub fsp_id: i32,
    #[serde(rename = "TileId")]
    pub tile_id: u32,
    #[serde(rename = "MinDtf")]
    pub min_dtf: f32,
    #[serde(rename = "MaxDtf")]
    pub max_dtf: f32,
}

/// One summary row per non-empty tile: the tile rectangle, the FPP and FSP
/// sub-extents actually present, the aggregate DTF range, and row counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileIndexRow {
    #[serde(rename = "TileId")]
    pub tile_id: u32,
    #[serde(rename = "MinX")]
    pub min_x: f64,
    #[serde(rename = "MaxX")]
    pub max_x: f64,
    #[serde(rename = "MinY")]
    pub min_y: f64,
    #[serde(rename = "MaxY")]
    pub max_y: f64,
    #[serde(rename = "FppMinX")]
    pub fpp_min_x: f64,
    #[serde(rename = "FppMaxX")]
    pub fpp_max_x: f64,
    #[serde(rename = "FppMinY")]
    pub fpp_min_y: f64,
    #[serde(rename = "FppMaxY")]
    pub fpp_max_y: f64,
    #[serde(rename = "FspMinX")]
    pub fsp_min_x: f64,
    #[serde(rename = "FspMaxX")]
    pub fsp_max_x: f64,
    #[serde(rename = "FspMinY")]
    pub fsp_min_y: f64,
    #[serde(rename = "FspMaxY")]
    pub fsp_max_y: f64,
    #[serde(rename = "MinDtf")]
    pub min_dtf: f32,
    #[serde(rename = "MaxDtf")]
    pub max_dtf: f32,
    #[serde(rename = "NumOfRels")]
    pub num_of_rels: u64,
    #[serde(rename = "NumOfFpps")]
    pub num_of_fpps: u64,
}

pub fn write_fsp_index(path: &Path, rows: &[FspIndexRow]) -> Result<()> {
    info::write_records(path, rows, FSP_INDEX_HEADER)
}

pub fn write_tile_index(path: &Path, rows: &[TileIndexRow]) -> Result<()> {
    info::write_records(path, rows, TILE_INDEX_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fsp_index_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FSP_INDEX_FILE);
        let rows = vec![
            FspIndexRow { fsp_id: 3, tile_id: 1, min_dtf: 0.25, max_dtf: 4.5 },
            FspIndexRow { fsp_id: 3, tile_id: 2, min_dtf: 1.0, max_dtf: 2.0 },
        ];
        write_fsp_index(&path, &rows).unwrap();
        let back: Vec<FspIndexRow> = info::read_records(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn tile_index_header_matches_the_serialized_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TILE_INDEX_FILE);
        let row = TileIndexRow {
            tile_id: 1,
            min_x: 0.0,
            max_x: 50.0,
            min_y: 0.0,
            max_y: 50.0,
            fpp_min_x: 0.0,
            fpp_max_x: 40.0,
            fpp_min_y: 0.0,
            fpp_max_y: 40.0,
            fsp_min_x: 5.0,
            fsp_max_x: 35.0,
            fsp_min_y: 5.0,
            fsp_max_y: 35.0,
            min_dtf: 0.0,
            max_dtf: 9.5,
            num_of_rels: 12,
            num_of_fpps: 7,
        };
        write_tile_index(&path, &[row]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, TILE_INDEX_HEADER.join(","));

        // The header-only empty form must agree with the serialized form.
        write_tile_index(&path, &[]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), header);
    }
}
