//! SEGR: container format for per-segment flood-relation matrices.
//!
//! A SEGR file holds named 2-D numeric matrices. Two generations of the
//! upstream segment-library producer wrote two incompatible body layouts;
//! both are still in circulation, so the reader probes the header version
//! and dispatches to the matching decode strategy:
//!
//! - Version 1 stores each matrix payload raw, in row-major element order,
//!   and is read directly.
//! - Version 2 stores each payload zlib-compressed, in column-major element
//!   order; the decoded matrix is transposed before it is returned so both
//!   versions yield the same logical orientation.
//!
//! File layout (little-endian):
//!   00  : [u8;4]  magic = b"SEGR"
//!   04  : u32     version (1 or 2)
//!   08  : u32     variable count
//!   ..  : for each variable:
//!           u16 name_len, name bytes (UTF-8)
//!           u8  dtype (0 = f64, 1 = f32, 2 = i32)
//!           u32 rows
//!           u32 cols
//!           v1: rows*cols elements, raw LE, row-major
//!           v2: u32 comp_len, zlib stream of rows*cols elements, LE,
//!               column-major
//!
//! Any structural problem (bad magic, unknown version, unknown dtype, size
//! overflow, truncation, inflate failure) is an `io::Error`; a present file
//! never decodes to silently-empty data.

use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::path::Path;

pub const SEGR_MAGIC: [u8; 4] = *b"SEGR";

/// Body layout generation. `V1` is the legacy producer, `V2` the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Version {
    V1 = 1,
    V2 = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Dtype {
    F64 = 0,
    F32 = 1,
    I32 = 2,
}

impl Dtype {
    #[inline]
    pub fn size_of(self) -> usize {
        match self {
            Dtype::F64 => 8,
            Dtype::F32 => 4,
            Dtype::I32 => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    F64(Vec<f64>),
    F32(Vec<f32>),
    I32(Vec<i32>),
}

impl Values {
    #[inline]
    fn len(&self) -> usize {
        match self {
            Values::F64(v) => v.len(),
            Values::F32(v) => v.len(),
            Values::I32(v) => v.len(),
        }
    }

    #[inline]
    fn dtype(&self) -> Dtype {
        match self {
            Values::F64(_) => Dtype::F64,
            Values::F32(_) => Dtype::F32,
            Values::I32(_) => Dtype::I32,
        }
    }
}

/// A dense 2-D matrix in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    values: Values,
}

impl Matrix {
    pub fn from_f64(rows: usize, cols: usize, data: Vec<f64>) -> io::Result<Self> {
        Self::new(rows, cols, Values::F64(data))
    }

    pub fn from_f32(rows: usize, cols: usize, data: Vec<f32>) -> io::Result<Self> {
        Self::new(rows, cols, Values::F32(data))
    }

    pub fn from_i32(rows: usize, cols: usize, data: Vec<i32>) -> io::Result<Self> {
        Self::new(rows, cols, Values::I32(data))
    }

    fn new(rows: usize, cols: usize, values: Values) -> io::Result<Self> {
        let want = rows
            .checked_mul(cols)
            .ok_or_else(|| bad("matrix size overflow"))?;
        if values.len() != want {
            return Err(bad("matrix data length does not match rows*cols"));
        }
        Ok(Self { rows, cols, values })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn dtype(&self) -> Dtype {
        self.values.dtype()
    }

    /// Row-major element slice, if this is an f64 matrix.
    #[inline]
    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.values {
            Values::F64(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.values {
            Values::F32(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.values {
            Values::I32(v) => Some(v),
            _ => None,
        }
    }
}

/// A decoded container: named matrices in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct SegrFile {
    pub variables: Vec<(String, Matrix)>,
}

impl SegrFile {
    pub fn new() -> Self {
        Self { variables: Vec::new() }
    }

    #[inline]
    pub fn variable(&self, name: &str) -> Option<&Matrix> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    pub fn push(&mut self, name: impl Into<String>, matrix: Matrix) {
        self.variables.push((name.into(), matrix));
    }
}

impl Default for SegrFile {
    fn default() -> Self {
        Self::new()
    }
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated SEGR"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u8(buf: &mut &[u8]) -> io::Result<u8> {
    Ok(take(buf, 1)?[0])
}

#[inline(always)]
fn le_u16(buf: &mut &[u8]) -> io::Result<u16> {
    let b = take(buf, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Parse a SEGR container from a contiguous byte slice. This is the single
/// source of truth for parsing; `read_file` is a thin wrapper.
pub fn parse_segr_bytes(mut p: &[u8]) -> io::Result<SegrFile> {
    if take(&mut p, 4)? != b"SEGR" {
        return Err(bad("bad SEGR magic"));
    }

    let version = match le_u32(&mut p)? {
        1 => Version::V1,
        2 => Version::V2,
        _ => return Err(bad("unsupported SEGR version")),
    };

    let var_count = le_u32(&mut p)? as usize;
    let mut out = SegrFile::new();

    for _ in 0..var_count {
        let name_len = le_u16(&mut p)? as usize;
        let name = std::str::from_utf8(take(&mut p, name_len)?)
            .map_err(|_| bad("variable name is not UTF-8"))?
            .to_owned();

        let dtype = match le_u8(&mut p)? {
            0 => Dtype::F64,
            1 => Dtype::F32,
            2 => Dtype::I32,
            _ => return Err(bad("unknown SEGR dtype")),
        };

        let rows = le_u32(&mut p)? as usize;
        let cols = le_u32(&mut p)? as usize;
        let count = rows
            .checked_mul(cols)
            .ok_or_else(|| bad("matrix size overflow"))?;
        let payload_len = count
            .checked_mul(dtype.size_of())
            .ok_or_else(|| bad("matrix size overflow"))?;

        let values = match version {
            Version::V1 => {
                let raw = take(&mut p, payload_len)?;
                decode_values(raw, dtype, count)?
            }
            Version::V2 => {
                let comp_len = le_u32(&mut p)? as usize;
                let comp = take(&mut p, comp_len)?;
                let raw = miniz_oxide::inflate::decompress_to_vec_zlib(comp)
                    .map_err(|_| bad("corrupt SEGR deflate payload"))?;
                if raw.len() != payload_len {
                    return Err(bad("inflated payload length mismatch"));
                }
                // v2 payloads are column-major; normalize to row-major.
                col_major_to_row_major(decode_values(&raw, dtype, count)?, rows, cols)
            }
        };

        out.push(name, Matrix { rows, cols, values });
    }

    Ok(out)
}

/// Decode `count` little-endian elements of `dtype` from a raw byte slice.
fn decode_values(raw: &[u8], dtype: Dtype, count: usize) -> io::Result<Values> {
    debug_assert_eq!(raw.len(), count * dtype.size_of());

    // Fast path: reinterpret in place when the slice happens to be aligned.
    // Alignment is not guaranteed (payload offsets depend on name lengths),
    // so fall through to the portable per-element decode on failure.
    #[cfg(target_endian = "little")]
    {
        match dtype {
            Dtype::F64 => {
                if let Ok(v) = bytemuck::try_cast_slice::<u8, f64>(raw) {
                    return Ok(Values::F64(v.to_vec()));
                }
            }
            Dtype::F32 => {
                if let Ok(v) = bytemuck::try_cast_slice::<u8, f32>(raw) {
                    return Ok(Values::F32(v.to_vec()));
                }
            }
            Dtype::I32 => {
                if let Ok(v) = bytemuck::try_cast_slice::<u8, i32>(raw) {
                    return Ok(Values::I32(v.to_vec()));
                }
            }
        }
    }

    Ok(match dtype {
        Dtype::F64 => Values::F64(
            raw.chunks_exact(8)
                .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        ),
        Dtype::F32 => Values::F32(
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        ),
        Dtype::I32 => Values::I32(
            raw.chunks_exact(4)
                .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        ),
    })
}

fn transpose<T: Copy + Default>(data: &[T], rows: usize, cols: usize) -> Vec<T> {
    // data is column-major rows x cols; output is row-major.
    let mut out = vec![T::default(); data.len()];
    for c in 0..cols {
        for r in 0..rows {
            out[r * cols + c] = data[c * rows + r];
        }
    }
    out
}

fn col_major_to_row_major(values: Values, rows: usize, cols: usize) -> Values {
    match values {
        Values::F64(v) => Values::F64(transpose(&v, rows, cols)),
        Values::F32(v) => Values::F32(transpose(&v, rows, cols)),
        Values::I32(v) => Values::I32(transpose(&v, rows, cols)),
    }
}

fn row_major_to_col_major_bytes(m: &Matrix) -> Vec<u8> {
    let mut out = Vec::with_capacity(m.rows * m.cols * m.dtype().size_of());
    match &m.values {
        Values::F64(v) => {
            for c in 0..m.cols {
                for r in 0..m.rows {
                    out.extend_from_slice(&v[r * m.cols + c].to_le_bytes());
                }
            }
        }
        Values::F32(v) => {
            for c in 0..m.cols {
                for r in 0..m.rows {
                    out.extend_from_slice(&v[r * m.cols + c].to_le_bytes());
                }
            }
        }
        Values::I32(v) => {
            for c in 0..m.cols {
                for r in 0..m.rows {
                    out.extend_from_slice(&v[r * m.cols + c].to_le_bytes());
                }
            }
        }
    }
    out
}

fn row_major_bytes(m: &Matrix) -> Vec<u8> {
    // Row-major is the in-memory order, so this is a straight LE dump.
    #[cfg(target_endian = "little")]
    {
        return match &m.values {
            Values::F64(v) => bytemuck::cast_slice::<f64, u8>(v).to_vec(),
            Values::F32(v) => bytemuck::cast_slice::<f32, u8>(v).to_vec(),
            Values::I32(v) => bytemuck::cast_slice::<i32, u8>(v).to_vec(),
        };
    }

    #[cfg(not(target_endian = "little"))]
    {
        let mut out = Vec::with_capacity(m.rows * m.cols * m.dtype().size_of());
        match &m.values {
            Values::F64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Values::F32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Values::I32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        }
        out
    }
}

/// Encode a container to bytes in the requested body layout.
pub fn encode_segr_bytes(file: &SegrFile, version: Version) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&SEGR_MAGIC);
    out.extend_from_slice(&(version as u32).to_le_bytes());
    out.extend_from_slice(&(u32::try_from(file.variables.len())
        .map_err(|_| bad("too many variables"))?)
        .to_le_bytes());

    for (name, m) in &file.variables {
        let name_len = u16::try_from(name.len()).map_err(|_| bad("variable name too long"))?;
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(m.dtype() as u8);
        out.extend_from_slice(
            &(u32::try_from(m.rows).map_err(|_| bad("too many rows"))?).to_le_bytes(),
        );
        out.extend_from_slice(
            &(u32::try_from(m.cols).map_err(|_| bad("too many columns"))?).to_le_bytes(),
        );

        match version {
            Version::V1 => out.extend_from_slice(&row_major_bytes(m)),
            Version::V2 => {
                let comp = miniz_oxide::deflate::compress_to_vec_zlib(
                    &row_major_to_col_major_bytes(m),
                    6,
                );
                let comp_len =
                    u32::try_from(comp.len()).map_err(|_| bad("compressed payload too large"))?;
                out.extend_from_slice(&comp_len.to_le_bytes());
                out.extend_from_slice(&comp);
            }
        }
    }

    Ok(out)
}

pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<SegrFile> {
    let bytes = std::fs::read(path)?;
    parse_segr_bytes(&bytes)
}

/// Read one named matrix from a container file. A missing variable is an
/// error, never an empty result.
pub fn read_variable<P: AsRef<Path>>(path: P, name: &str) -> io::Result<Matrix> {
    let file = read_file(path)?;
    file.variables
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, m)| m)
        .ok_or_else(|| bad("variable not present in SEGR container"))
}

pub fn write_file<P: AsRef<Path>>(path: P, file: &SegrFile, version: Version) -> io::Result<()> {
    let bytes = encode_segr_bytes(file, version)?;
    let mut f = File::create(path)?;
    f.write_all(&bytes)?;
    f.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SegrFile {
        let mut f = SegrFile::new();
        f.push(
            "FspFppDtf",
            Matrix::from_f64(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        );
        f.push("Ids", Matrix::from_i32(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap());
        f.push("Depths", Matrix::from_f32(1, 4, vec![0.5, 1.5, -2.5, 3.25]).unwrap());
        f
    }

    #[test]
    fn v1_round_trip() {
        let file = sample();
        let bytes = encode_segr_bytes(&file, Version::V1).unwrap();
        let back = parse_segr_bytes(&bytes).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn v2_round_trip_transposes_back() {
        let file = sample();
        let bytes = encode_segr_bytes(&file, Version::V2).unwrap();
        let back = parse_segr_bytes(&bytes).unwrap();
        // The column-major v2 payload must decode to the same row-major data.
        assert_eq!(back, file);
    }

    #[test]
    fn v1_and_v2_decode_identically() {
        let file = sample();
        let v1 = parse_segr_bytes(&encode_segr_bytes(&file, Version::V1).unwrap()).unwrap();
        let v2 = parse_segr_bytes(&encode_segr_bytes(&file, Version::V2).unwrap()).unwrap();
        assert_eq!(v1, v2);
    }

    #[test]
    fn v1_payload_is_row_major_on_disk() {
        let mut f = SegrFile::new();
        f.push("M", Matrix::from_i32(2, 2, vec![10, 20, 30, 40]).unwrap());
        let bytes = encode_segr_bytes(&f, Version::V1).unwrap();
        // header (12) + name_len (2) + "M" (1) + dtype (1) + dims (8) = 24
        let payload = &bytes[24..];
        let elems: Vec<i32> = payload
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(elems, vec![10, 20, 30, 40]);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = parse_segr_bytes(b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = encode_segr_bytes(&sample(), Version::V1).unwrap();
        bytes[4] = 9;
        let err = parse_segr_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_truncation() {
        let bytes = encode_segr_bytes(&sample(), Version::V1).unwrap();
        let err = parse_segr_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn rejects_corrupt_deflate() {
        let mut f = SegrFile::new();
        f.push("M", Matrix::from_i32(2, 2, vec![10, 20, 30, 40]).unwrap());
        let mut bytes = encode_segr_bytes(&f, Version::V2).unwrap();
        // header (12) + name_len (2) + "M" (1) + dtype (1) + dims (8)
        // + comp_len (4) = 28: first byte of the zlib stream.
        bytes[28] = 0xff;
        assert!(parse_segr_bytes(&bytes).is_err());
    }

    #[test]
    fn missing_variable_is_an_error() {
        let file = sample();
        let bytes = encode_segr_bytes(&file, Version::V2).unwrap();
        let parsed = parse_segr_bytes(&bytes).unwrap();
        assert!(parsed.variable("NoSuchVar").is_none());
    }

    #[test]
    fn matrix_length_is_validated() {
        assert!(Matrix::from_f64(2, 3, vec![0.0; 5]).is_err());
    }
}
