//! Tile relation file encodings.
//!
//! A non-empty tile persists its reduced relation rows in one of two
//! encodings: snappy-compressed parquet, or a SEGR container holding the
//! integer columns and the float columns as two separate matrices.

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, Float32Array, Int32Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema};
use clap::ValueEnum;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub const TILE_FILE_STEM: &str = "tile";

/// Variable names of the split-binary encoding.
pub const TILE_INT_VAR: &str = "FspFpps";
pub const TILE_FLOAT_VAR: &str = "DtfFilledDepth";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TileFormat {
    /// Snappy-compressed parquet, one file per tile.
    Snappy,
    /// SEGR split-binary: an i32 `[FspId, FppCol, FppRow]` matrix plus an
    /// f32 `[Dtf, FilledDepth]` matrix.
    Segr,
}

/// One relation reduced to its persisted tile form: FSP identity, tile-local
/// pixel position, and the two depth values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRelation {
    pub fsp_id: i32,
    pub col: i32,
    pub row: i32,
    pub dtf: f32,
    pub filled_depth: f32,
}

pub fn tile_file_name(format: TileFormat, tile_id: u32) -> String {
    match format {
        TileFormat::Snappy => format!("{TILE_FILE_STEM}_{tile_id}.snz"),
        TileFormat::Segr => format!("{TILE_FILE_STEM}_{tile_id}.segr"),
    }
}

pub fn write_tile(path: &Path, rows: &[TileRelation], format: TileFormat) -> Result<()> {
    match format {
        TileFormat::Snappy => write_tile_parquet(path, rows),
        TileFormat::Segr => write_tile_segr(path, rows),
    }
    .with_context(|| format!("writing tile file {}", path.display()))
}

fn tile_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("FspId", DataType::Int32, false),
        Field::new("FppCol", DataType::Int32, false),
        Field::new("FppRow", DataType::Int32, false),
        Field::new("Dtf", DataType::Float32, false),
        Field::new("FilledDepth", DataType::Float32, false),
    ]))
}

fn write_tile_parquet(path: &Path, rows: &[TileRelation]) -> Result<()> {
    let schema = tile_schema();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.fsp_id))),
        Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.col))),
        Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.row))),
        Arc::new(Float32Array::from_iter_values(rows.iter().map(|r| r.dtf))),
        Arc::new(Float32Array::from_iter_values(
            rows.iter().map(|r| r.filled_depth),
        )),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn write_tile_segr(path: &Path, rows: &[TileRelation]) -> Result<()> {
    let mut ints = Vec::with_capacity(rows.len() * 3);
    let mut floats = Vec::with_capacity(rows.len() * 2);
    for r in rows {
        ints.extend_from_slice(&[r.fsp_id, r.col, r.row]);
        floats.extend_from_slice(&[r.dtf, r.filled_depth]);
    }

    let mut file = segrel::SegrFile::new();
    file.push(TILE_INT_VAR, segrel::Matrix::from_i32(rows.len(), 3, ints)?);
    file.push(
        TILE_FLOAT_VAR,
        segrel::Matrix::from_f32(rows.len(), 2, floats)?,
    );
    segrel::write_file(path, &file, segrel::Version::V2)?;
    Ok(())
}

/// Read a tile file back into rows. Test-only: the build never re-reads its
/// own tiles, but the round-trip properties do.
#[cfg(test)]
pub fn read_tile(path: &Path, format: TileFormat) -> Result<Vec<TileRelation>> {
    match format {
        TileFormat::Snappy => read_tile_parquet(path),
        TileFormat::Segr => read_tile_segr(path),
    }
}

#[cfg(test)]
fn read_tile_parquet(path: &Path) -> Result<Vec<TileRelation>> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut out = Vec::new();
    for batch in reader {
        let batch = batch?;
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .context("FspId column type")?;
        let cols = batch
            .column(1)
            .as_any()
            .downcast_ref::<Int32Array>()
            .context("FppCol column type")?;
        let rows_ = batch
            .column(2)
            .as_any()
            .downcast_ref::<Int32Array>()
            .context("FppRow column type")?;
        let dtfs = batch
            .column(3)
            .as_any()
            .downcast_ref::<Float32Array>()
            .context("Dtf column type")?;
        let fills = batch
            .column(4)
            .as_any()
            .downcast_ref::<Float32Array>()
            .context("FilledDepth column type")?;
        for i in 0..batch.num_rows() {
            out.push(TileRelation {
                fsp_id: ids.value(i),
                col: cols.value(i),
                row: rows_.value(i),
                dtf: dtfs.value(i),
                filled_depth: fills.value(i),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
fn read_tile_segr(path: &Path) -> Result<Vec<TileRelation>> {
    let file = segrel::read_file(path)?;
    let ints = file
        .variable(TILE_INT_VAR)
        .context("missing integer matrix")?;
    let floats = file
        .variable(TILE_FLOAT_VAR)
        .context("missing float matrix")?;
    let ints_data = ints.as_i32().context("integer matrix dtype")?;
    let floats_data = floats.as_f32().context("float matrix dtype")?;

    Ok(ints_data
        .chunks_exact(3)
        .zip(floats_data.chunks_exact(2))
        .map(|(i, f)| TileRelation {
            fsp_id: i[0],
            col: i[1],
            row: i[2],
            dtf: f[0],
            filled_depth: f[1],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_rows() -> Vec<TileRelation> {
        vec![
            TileRelation { fsp_id: 1, col: 0, row: 0, dtf: 0.5, filled_depth: 1.0 },
            TileRelation { fsp_id: 1, col: 1, row: 0, dtf: 1.5, filled_depth: 0.25 },
            TileRelation { fsp_id: 9, col: 4, row: 3, dtf: 3.0, filled_depth: 2.75 },
        ]
    }

    #[test]
    fn file_names_carry_the_tile_id() {
        assert_eq!(tile_file_name(TileFormat::Snappy, 7), "tile_7.snz");
        assert_eq!(tile_file_name(TileFormat::Segr, 12), "tile_12.segr");
    }

    #[test]
    fn parquet_encoding_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tile_1.snz");
        let rows = sample_rows();
        write_tile(&path, &rows, TileFormat::Snappy).unwrap();
        assert_eq!(read_tile(&path, TileFormat::Snappy).unwrap(), rows);
    }

    #[test]
    fn segr_encoding_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tile_1.segr");
        let rows = sample_rows();
        write_tile(&path, &rows, TileFormat::Segr).unwrap();
        assert_eq!(read_tile(&path, TileFormat::Segr).unwrap(), rows);
    }

    #[test]
    fn both_encodings_carry_identical_logical_rows() {
        let dir = TempDir::new().unwrap();
        let rows = sample_rows();
        let p1 = dir.path().join("tile_1.snz");
        let p2 = dir.path().join("tile_1.segr");
        write_tile(&p1, &rows, TileFormat::Snappy).unwrap();
        write_tile(&p2, &rows, TileFormat::Segr).unwrap();
        assert_eq!(
            read_tile(&p1, TileFormat::Snappy).unwrap(),
            read_tile(&p2, TileFormat::Segr).unwrap()
        );
    }
}
