use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ShapeBuilder};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum VolumeReadError {
    #[error("binary file not found: {0}")]
    NotFound(PathBuf),

    #[error("truncated binary file {path}: holds {actual} elements, {expected} required")]
    TruncatedFile {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Read a flat little-endian u16 file as a column-major volume.
///
/// The flat element order has x varying fastest, matching the archive's
/// binary layout: element `(1, 0, 0)` is the second value in the file.
///
/// # Errors
///
/// `TruncatedFile` when the file holds fewer than `nx * ny * nz` elements;
/// trailing surplus data is ignored.
pub fn read_u16(
    path: impl AsRef<Path>,
    dims: (usize, usize, usize),
) -> Result<Array3<u16>, VolumeReadError> {
    let bytes = read_bytes(path.as_ref())?;
    let elements = decode_le(&bytes, u16::from_le_bytes);
    to_volume(elements, dims, path.as_ref())
}

/// Read a flat little-endian f32 file as a column-major volume.
pub fn read_f32(
    path: impl AsRef<Path>,
    dims: (usize, usize, usize),
) -> Result<Array3<f32>, VolumeReadError> {
    let bytes = read_bytes(path.as_ref())?;
    let elements = decode_le(&bytes, f32::from_le_bytes);
    to_volume(elements, dims, path.as_ref())
}

/// Read an entire little-endian f64 file as a flat vector (sinogram
/// fragments declare no dimensions of their own).
pub fn read_f64_flat(path: impl AsRef<Path>) -> Result<Vec<f64>, VolumeReadError> {
    let bytes = read_bytes(path.as_ref())?;
    Ok(decode_le(&bytes, f64::from_le_bytes))
}

/// Apply a linear rescale to raw stored samples.
pub fn rescale(raw: &Array3<u16>, slope: f32, intercept: f32) -> Array3<f32> {
    raw.mapv(|v| f32::from(v) * slope + intercept)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, VolumeReadError> {
    fs::read(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            VolumeReadError::NotFound(path.to_owned())
        } else {
            VolumeReadError::Io {
                path: path.to_owned(),
                source,
            }
        }
    })
}

fn decode_le<T, const N: usize>(bytes: &[u8], from_le: fn([u8; N]) -> T) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            from_le(buf)
        })
        .collect()
}

fn to_volume<T>(
    mut elements: Vec<T>,
    dims: (usize, usize, usize),
    path: &Path,
) -> Result<Array3<T>, VolumeReadError> {
    let expected = dims.0 * dims.1 * dims.2;
    if elements.len() < expected {
        return Err(VolumeReadError::TruncatedFile {
            path: path.to_owned(),
            expected,
            actual: elements.len(),
        });
    }
    if elements.len() > expected {
        debug!(
            path = %path.display(),
            surplus = elements.len() - expected,
            "ignoring surplus elements past the declared dimensions"
        );
        elements.truncate(expected);
    }
    // Length is exact at this point, so the shape cannot be rejected.
    Array3::from_shape_vec(dims.f(), elements).map_err(|_| VolumeReadError::TruncatedFile {
        path: path.to_owned(),
        expected,
        actual: expected,
    })
}
