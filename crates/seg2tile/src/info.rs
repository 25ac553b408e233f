//! The library info tables and metadata file.
//!
//! `fsp_info.csv` and `segment_info.csv` are read and rewritten in place by
//! the distance and stream-order passes, then copied verbatim into the tiled
//! library. Coordinates must survive the text round trip bit-exactly: the
//! tile build joins on raw f64 bit patterns. Rust's float parsing is
//! correctly rounded and the csv writer emits shortest round-trip forms, so
//! no extra precision handling is needed here.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

pub const FSP_INFO_FILE: &str = "fsp_info.csv";
pub const SEG_INFO_FILE: &str = "segment_info.csv";
pub const STREAM_ORDER_FILE: &str = "stream_order_info.csv";
pub const PRJ_FILE: &str = "SpatialReference.prj";
pub const METADATA_FILE: &str = "CellSizeSpatialReference.json";

pub const FSP_HEADER: &[&str] = &[
    "FspId", "FspX", "FspY", "SegId", "FilledElev", "DsDist", "StrOrd",
];
pub const SEG_HEADER: &[&str] = &[
    "SegId", "CellCount", "DsSegId", "StFac", "EdFac", "Length", "DsDist", "StrOrd",
];
pub const STREAM_ORDER_HEADER: &[&str] =
    &["StrOrd", "DsStrOrd", "JunctionFspX", "JunctionFspY"];

/// One flood source pixel. `ds_dist` and `str_ord` are absent until the
/// distance and stream-order passes have run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FspRecord {
    #[serde(rename = "FspId")]
    pub fsp_id: i32,
    #[serde(rename = "FspX")]
    pub fsp_x: f64,
    #[serde(rename = "FspY")]
    pub fsp_y: f64,
    #[serde(rename = "SegId")]
    pub seg_id: i32,
    #[serde(rename = "FilledElev")]
    pub filled_elev: f64,
    #[serde(rename = "DsDist", default)]
    pub ds_dist: Option<f64>,
    #[serde(rename = "StrOrd", default)]
    pub str_ord: Option<i32>,
}

/// One stream segment. Downstream segment ID 0 means this segment is an
/// outlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    #[serde(rename = "SegId")]
    pub seg_id: i32,
    #[serde(rename = "CellCount")]
    pub cell_count: i64,
    #[serde(rename = "DsSegId")]
    pub ds_seg_id: i32,
    #[serde(rename = "StFac")]
    pub st_fac: f64,
    #[serde(rename = "EdFac")]
    pub ed_fac: f64,
    #[serde(rename = "Length", default)]
    pub length: Option<f64>,
    #[serde(rename = "DsDist", default)]
    pub ds_dist: Option<f64>,
    #[serde(rename = "StrOrd", default)]
    pub str_ord: Option<i32>,
}

/// One row of the stream-order network table: where a stream order joins its
/// downstream order. Order 0 marks water leaving the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOrderRecord {
    #[serde(rename = "StrOrd")]
    pub str_ord: i32,
    #[serde(rename = "DsStrOrd")]
    pub ds_str_ord: i32,
    #[serde(rename = "JunctionFspX")]
    pub junction_fsp_x: f64,
    #[serde(rename = "JunctionFspY")]
    pub junction_fsp_y: f64,
}

/// External `SegId -> StrOrd` mapping consumed by the stream-order pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentOrderRecord {
    #[serde(rename = "SegId")]
    pub seg_id: i32,
    #[serde(rename = "StrOrd")]
    pub str_ord: i32,
}

/// Tiled-library metadata: everything a consumer needs to interpret tile
/// files, plus the opaque spatial-reference text passed through from the
/// segment library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryMetadata {
    #[serde(rename = "TileSize")]
    pub tile_size: u32,
    #[serde(rename = "CellSize")]
    pub cell_size: f64,
    #[serde(rename = "SpatialReference")]
    pub spatial_reference: String,
}

pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let mut out = Vec::new();
    for record in reader.deserialize() {
        out.push(record.with_context(|| format!("parsing {}", path.display()))?);
    }
    Ok(out)
}

/// Write a table. The header is written explicitly when there are no
/// records (serde-derived headers only appear with the first row).
pub fn write_records<T: Serialize>(path: &Path, records: &[T], header: &[&str]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    if records.is_empty() {
        writer.write_record(header)?;
    }
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .flush()
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn write_metadata(path: &Path, metadata: &LibraryMetadata) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer(file, metadata)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn read_metadata(path: &Path) -> Result<LibraryMetadata> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fsp_table_round_trips_without_optional_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FSP_INFO_FILE);
        std::fs::write(
            &path,
            "FspId,FspX,FspY,SegId,FilledElev\n1,0.5,1.5,7,330.25\n2,2.5,1.5,7,331.0\n",
        )
        .unwrap();

        let fsps: Vec<FspRecord> = read_records(&path).unwrap();
        assert_eq!(fsps.len(), 2);
        assert_eq!(fsps[0].fsp_id, 1);
        assert_eq!(fsps[0].ds_dist, None);
        assert_eq!(fsps[0].str_ord, None);

        write_records(&path, &fsps, FSP_HEADER).unwrap();
        let back: Vec<FspRecord> = read_records(&path).unwrap();
        assert_eq!(back, fsps);
    }

    #[test]
    fn coordinates_survive_the_text_round_trip_bit_exactly() {
        // A coordinate a lossy fast-path parse would round to a neighbor
        // value, breaking the bit-exact FSP join downstream.
        let x = -1003.7918248322967_f64;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FSP_INFO_FILE);

        let fsps = vec![FspRecord {
            fsp_id: 22246,
            fsp_x: x,
            fsp_y: 0.1 + 0.2,
            seg_id: 1,
            filled_elev: 0.0,
            ds_dist: None,
            str_ord: None,
        }];
        write_records(&path, &fsps, FSP_HEADER).unwrap();
        let back: Vec<FspRecord> = read_records(&path).unwrap();
        assert_eq!(back[0].fsp_x.to_bits(), fsps[0].fsp_x.to_bits());
        assert_eq!(back[0].fsp_y.to_bits(), fsps[0].fsp_y.to_bits());
    }

    #[test]
    fn empty_table_still_writes_a_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");
        write_records::<StreamOrderRecord>(&path, &[], STREAM_ORDER_HEADER).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), "StrOrd,DsStrOrd,JunctionFspX,JunctionFspY");
        let rows: Vec<StreamOrderRecord> = read_records(&path).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn metadata_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(METADATA_FILE);
        let meta = LibraryMetadata {
            tile_size: 500,
            cell_size: 10.0,
            spatial_reference: "PROJCS[\"test\"]".to_owned(),
        };
        write_metadata(&path, &meta).unwrap();
        assert_eq!(read_metadata(&path).unwrap(), meta);
    }
}
