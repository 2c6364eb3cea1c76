//! Persistent weight files
//!
//! Layout, all integers little-endian:
//!
//! | bytes | content |
//! |---|---|
//! | 4 | magic `RGWM` |
//! | 4 | format version (`u32`) |
//! | 24 | rows, cols, nonzeros (`u64` each) |
//! | 8 × (rows + 1) | row offsets |
//! | 8 × nonzeros | column indices |
//! | 8 × nonzeros | values (`f64`) |
//!
//! Files are written under a temporary name in their final directory and moved into place
//! without replacing an existing file, so a reader only ever sees complete files.

use crate::errors::{RegridError, RegridResult};
use crate::matrix::WeightMatrix;
use log::debug;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

const MAGIC: &[u8; 4] = b"RGWM";
const HEADER_LEN: usize = 4 + 4 + 3 * 8;

/// Version of the file layout, also part of every cache key
pub const FORMAT_VERSION: u32 = 1;

pub(crate) fn encode(matrix: &WeightMatrix) -> Vec<u8> {
    let (rows, cols) = matrix.shape();
    let nnz = matrix.nonzeros();
    let mut bytes = Vec::with_capacity(HEADER_LEN + 8 * (rows + 1 + 2 * nnz));
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    for n in [rows, cols, nnz] {
        bytes.extend_from_slice(&(n as u64).to_le_bytes());
    }
    for &o in matrix.offsets() {
        bytes.extend_from_slice(&(o as u64).to_le_bytes());
    }
    for &c in matrix.columns() {
        bytes.extend_from_slice(&(c as u64).to_le_bytes());
    }
    for &v in matrix.values() {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Little-endian reader over a byte buffer
struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.position.checked_add(N)?;
        let chunk = self.bytes.get(self.position..end)?;
        self.position = end;
        chunk.try_into().ok()
    }

    fn u32(&mut self) -> Option<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn usize(&mut self) -> Option<usize> {
        self.take::<8>()
            .and_then(|b| usize::try_from(u64::from_le_bytes(b)).ok())
    }

    fn f64(&mut self) -> Option<f64> {
        self.take::<8>().map(f64::from_le_bytes)
    }
}

pub(crate) fn decode(
    bytes: &[u8],
    path: &Path,
    expected_shape: Option<(usize, usize)>,
) -> RegridResult<WeightMatrix> {
    let corrupt = |reason: String| RegridError::CacheCorrupt {
        path: path.to_path_buf(),
        reason,
    };
    let truncated = || corrupt(format!("truncated after {} bytes", bytes.len()));

    let mut cursor = Cursor { bytes, position: 0 };
    if cursor.take::<4>().as_ref() != Some(MAGIC) {
        return Err(corrupt("not a weight matrix file".to_string()));
    }
    let version = cursor.u32().ok_or_else(truncated)?;
    if version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "format version {version}, expected {FORMAT_VERSION}"
        )));
    }
    let rows = cursor.usize().ok_or_else(truncated)?;
    let cols = cursor.usize().ok_or_else(truncated)?;
    let nnz = cursor.usize().ok_or_else(truncated)?;

    if let Some((expected_rows, expected_cols)) = expected_shape {
        if (rows, cols) != (expected_rows, expected_cols) {
            return Err(corrupt(format!(
                "shape {rows}x{cols}, expected {expected_rows}x{expected_cols}"
            )));
        }
    }

    let expected_len = rows
        .checked_add(1)
        .and_then(|n| n.checked_add(nnz.checked_mul(2)?))
        .and_then(|n| n.checked_mul(8))
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or_else(|| corrupt("header counts overflow".to_string()))?;
    if bytes.len() != expected_len {
        return Err(corrupt(format!(
            "{} bytes, header describes {}",
            bytes.len(),
            expected_len
        )));
    }

    let offsets = (0..=rows)
        .map(|_| cursor.usize())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(truncated)?;
    let columns = (0..nnz)
        .map(|_| cursor.usize())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(truncated)?;
    let values = (0..nnz)
        .map(|_| cursor.f64())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(truncated)?;

    WeightMatrix::from_parts(rows, cols, offsets, columns, values).map_err(|e| match e {
        RegridError::InvalidConfiguration(reason) => corrupt(reason),
        other => other,
    })
}

/// Read and validate the matrix stored at `path`
///
/// Any mismatch with the expected layout is reported as [`RegridError::CacheCorrupt`].
pub fn load(path: &Path, expected_shape: Option<(usize, usize)>) -> RegridResult<WeightMatrix> {
    let bytes = std::fs::read(path)?;
    decode(&bytes, path, expected_shape)
}

/// Store `matrix` at `path` unless a file is already there
///
/// Returns `false` if another writer got there first; the existing file is kept.
pub fn save(path: &Path, matrix: &WeightMatrix) -> RegridResult<bool> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory)?;

    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(&encode(matrix))?;
    file.as_file().sync_all()?;

    match file.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
            debug!("{} was written concurrently, keeping it", path.display());
            Ok(false)
        }
        Err(e) => Err(e.error.into()),
    }
}
