use std::path::PathBuf;

use ndarray::Array2;
use tracing::warn;

use crate::volume_reader;

/// Leaf channels per projection row; every fragment carries whole rows of
/// this width.
pub const LEAF_COUNT: usize = 64;

/// Concatenate per-channel binary fragments into a projections × leaves
/// matrix, row-wise in file-list order.
///
/// Fragments whose element count is not a multiple of the leaf count are
/// trimmed down to the nearest multiple with a warning; unreadable
/// fragments are skipped the same way. `None` when nothing loads.
pub fn load_sinogram(paths: &[PathBuf]) -> Option<Array2<f64>> {
    let mut values: Vec<f64> = Vec::new();
    let mut rows = 0usize;

    for path in paths {
        let fragment = match volume_reader::read_f64_flat(path) {
            Ok(fragment) => fragment,
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping unreadable sinogram fragment");
                continue;
            }
        };
        let usable = fragment.len() - fragment.len() % LEAF_COUNT;
        if usable != fragment.len() {
            warn!(
                path = %path.display(),
                elements = fragment.len(),
                usable,
                "fragment length is not a multiple of the leaf count, trimming excess"
            );
        }
        values.extend_from_slice(&fragment[..usable]);
        rows += usable / LEAF_COUNT;
    }

    if rows == 0 {
        return None;
    }
    Array2::from_shape_vec((rows, LEAF_COUNT), values).ok()
}

/// Shape parity check between the fluence and machine-agnostic variants.
/// A mismatch is a warning, never an error; both matrices are retained.
pub fn check_consistency(fluence: Option<&Array2<f64>>, agnostic: Option<&Array2<f64>>) {
    if let (Some(fluence), Some(agnostic)) = (fluence, agnostic) {
        if fluence.dim() != agnostic.dim() {
            warn!(
                fluence = ?fluence.dim(),
                agnostic = ?agnostic.dim(),
                "fluence and machine-agnostic sinogram shapes differ"
            );
        }
    }
}
